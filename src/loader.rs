//! Configuration loading from files and strings.
//!
//! Handles format dispatch by file extension, optional environment variable
//! expansion, parsing into a raw [`Value`] tree, normalization, and handing
//! the normalized tree to serde for binding.

use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::de::{self, DeserializeOwned, EnumAccess, MapAccess, SeqAccess, VariantAccess, Visitor};
use serde::{Deserialize, Deserializer};

use crate::cache::DescriptorCache;
use crate::descriptor::FieldDescriptor;
use crate::error::LoadError;
use crate::normalize::normalize;
use crate::types::{Mapping, Scalar, Schema, Value};

/// `${NAME}` or `$NAME`.
static ENV_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))")
        .expect("valid env var pattern")
});

/// Supported document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Json,
    Yaml,
}

impl Format {
    /// Pick the format from a file extension (case-insensitive).
    ///
    /// Returns `None` for anything other than `.json`, `.yaml` and `.yml`.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "json" => Some(Format::Json),
            "yaml" | "yml" => Some(Format::Yaml),
            _ => None,
        }
    }
}

/// Options for loading a configuration document.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Expand `${NAME}` and `$NAME` from the environment before parsing.
    pub use_env: bool,
}

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set environment variable expansion.
    pub fn use_env(mut self, use_env: bool) -> Self {
        self.use_env = use_env;
        self
    }
}

/// Replace `${NAME}` and `$NAME` with environment variable values.
///
/// Unset variables expand to the empty string. A `$` that does not start a
/// variable name is kept as-is.
pub fn expand_env(content: &str) -> String {
    expand_env_with(content, |name| std::env::var(name).ok())
}

/// Like [`expand_env`], with a custom variable lookup.
pub fn expand_env_with<F>(content: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    ENV_VAR
        .replace_all(content, |caps: &Captures<'_>| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map_or("", |m| m.as_str());
            lookup(name).unwrap_or_default()
        })
        .into_owned()
}

/// Parse a document into a raw mapping.
///
/// An empty document yields an empty mapping.
///
/// # Errors
///
/// Returns `LoadError::InvalidJson` / `LoadError::InvalidYaml` on syntax
/// errors and `LoadError::NotAMapping` if the root is not a mapping.
pub fn parse_document(content: &str, format: Format) -> Result<Mapping, LoadError> {
    let value = match format {
        Format::Json => serde_json::from_str::<serde_json::Value>(content)
            .map(Value::from)
            .map_err(|source| LoadError::InvalidJson { source })?,
        Format::Yaml => serde_yaml::from_str::<YamlDocument>(content)
            .map(|YamlDocument(value)| value)
            .map_err(|source| LoadError::InvalidYaml { source })?,
    };

    match value {
        Value::Mapping(map) => Ok(map),
        Value::Null => Ok(Mapping::new()),
        other => Err(LoadError::NotAMapping {
            actual: other.type_name(),
        }),
    }
}

/// Load a raw document from a file path.
///
/// # Errors
///
/// Returns `LoadError::FileNotFound` if the file doesn't exist,
/// `LoadError::UnrecognizedFileType` for unknown extensions, or a parse
/// error if the content is invalid.
pub fn load_document(path: &Path, options: &LoadOptions) -> Result<Mapping, LoadError> {
    if !path.exists() {
        return Err(LoadError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let format = Format::from_path(path).ok_or_else(|| LoadError::UnrecognizedFileType {
        path: path.to_path_buf(),
    })?;

    let content = std::fs::read_to_string(path).map_err(|source| LoadError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;

    tracing::debug!(
        path = %path.display(),
        ?format,
        use_env = options.use_env,
        "loading config"
    );
    parse_with_options(&content, format, options)
}

/// Load a document from a file path and normalize it against `descriptor`.
pub fn load_normalized(
    path: &Path,
    descriptor: &FieldDescriptor,
    options: &LoadOptions,
) -> Result<Mapping, LoadError> {
    let raw = load_document(path, options)?;
    Ok(normalize(&raw, descriptor))
}

/// Load a configuration file into `T`.
///
/// The descriptor for `T` comes from `cache` (built on first use). The
/// normalized tree is bound with serde, so field names on the serde side
/// must match the canonical (lower-cased) keys.
///
/// # Errors
///
/// Returns any loading or parse error, `LoadError::Build` if `T`'s schema
/// is invalid, or `LoadError::Bind` if the data does not fit `T`.
pub fn load<T>(
    path: &Path,
    cache: &DescriptorCache,
    options: &LoadOptions,
) -> Result<T, LoadError>
where
    T: Schema + DeserializeOwned,
{
    let descriptor = cache.descriptor::<T>()?;
    let normalized = load_normalized(path, &descriptor, options)?;
    bind(normalized)
}

/// Load a configuration string of the given format into `T`.
pub fn load_str<T>(
    content: &str,
    format: Format,
    cache: &DescriptorCache,
    options: &LoadOptions,
) -> Result<T, LoadError>
where
    T: Schema + DeserializeOwned,
{
    let descriptor = cache.descriptor::<T>()?;
    let raw = parse_with_options(content, format, options)?;
    bind(normalize(&raw, &descriptor))
}

/// Load a serialized descriptor tree (JSON).
pub fn load_descriptor(path: &Path) -> Result<FieldDescriptor, LoadError> {
    if !path.exists() {
        return Err(LoadError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let content = std::fs::read_to_string(path).map_err(|source| LoadError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;

    serde_json::from_str(&content).map_err(|source| LoadError::InvalidJson { source })
}

// --- Internal implementation ---

fn parse_with_options(
    content: &str,
    format: Format,
    options: &LoadOptions,
) -> Result<Mapping, LoadError> {
    if options.use_env {
        parse_document(&expand_env(content), format)
    } else {
        parse_document(content, format)
    }
}

fn bind<T: DeserializeOwned>(normalized: Mapping) -> Result<T, LoadError> {
    let json = serde_json::Value::from(Value::Mapping(normalized));
    serde_json::from_value(json).map_err(|source| LoadError::Bind { source })
}

/// YAML document read straight into a [`Value`].
///
/// Integers up to 128 bits keep every digit.
struct YamlDocument(Value);

impl<'de> Deserialize<'de> for YamlDocument {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(YamlValueVisitor).map(YamlDocument)
    }
}

struct YamlValueVisitor;

impl<'de> Visitor<'de> for YamlValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a YAML value")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Scalar(Scalar::Bool(v)))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Scalar(Scalar::Number(v.into())))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        Ok(Value::Scalar(Scalar::Number(v.into())))
    }

    fn visit_i128<E: de::Error>(self, v: i128) -> Result<Value, E> {
        big_integer(&v.to_string())
    }

    fn visit_u128<E: de::Error>(self, v: u128) -> Result<Value, E> {
        big_integer(&v.to_string())
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
        Ok(Value::Scalar(yaml_float(v)))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        Ok(Value::from(v))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
        Ok(Value::from(v))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
        deserializer.deserialize_any(self)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(YamlDocument(item)) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::Sequence(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Value, A::Error> {
        let mut result = Mapping::with_capacity(map.size_hint().unwrap_or(0));
        while let Some((YamlKey(key), YamlDocument(value))) = map.next_entry()? {
            result.insert(key, value);
        }
        Ok(Value::Mapping(result))
    }

    // Custom tags (`!env FOO`) are dropped; the tagged value is kept.
    fn visit_enum<A: EnumAccess<'de>>(self, data: A) -> Result<Value, A::Error> {
        let (_tag, variant) = data.variant::<String>()?;
        variant
            .newtype_variant::<YamlDocument>()
            .map(|YamlDocument(value)| value)
    }
}

/// Mapping key: string, bool and number keys are stringified.
struct YamlKey(String);

impl<'de> Deserialize<'de> for YamlKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(YamlKeyVisitor).map(YamlKey)
    }
}

struct YamlKeyVisitor;

impl<'de> Visitor<'de> for YamlKeyVisitor {
    type Value = String;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a scalar mapping key")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<String, E> {
        Ok(v.to_string())
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<String, E> {
        Ok(v.to_string())
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<String, E> {
        Ok(v.to_string())
    }

    fn visit_i128<E: de::Error>(self, v: i128) -> Result<String, E> {
        Ok(v.to_string())
    }

    fn visit_u128<E: de::Error>(self, v: u128) -> Result<String, E> {
        Ok(v.to_string())
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<String, E> {
        Ok(match yaml_float(v) {
            Scalar::Number(n) => n.to_string(),
            Scalar::String(s) => s,
            Scalar::Bool(b) => b.to_string(),
        })
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<String, E> {
        Ok(v.to_string())
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<String, E> {
        Ok(v)
    }

    fn visit_unit<E: de::Error>(self) -> Result<String, E> {
        Err(E::custom("unsupported mapping key of type null"))
    }

    fn visit_none<E: de::Error>(self) -> Result<String, E> {
        Err(E::custom("unsupported mapping key of type null"))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, _seq: A) -> Result<String, A::Error> {
        Err(de::Error::custom("unsupported mapping key of type sequence"))
    }

    fn visit_map<A: MapAccess<'de>>(self, _map: A) -> Result<String, A::Error> {
        Err(de::Error::custom("unsupported mapping key of type mapping"))
    }

    fn visit_enum<A: EnumAccess<'de>>(self, data: A) -> Result<String, A::Error> {
        let (_tag, variant) = data.variant::<String>()?;
        variant.newtype_variant::<YamlKey>().map(|YamlKey(key)| key)
    }
}

/// An integer too wide for i64/u64, kept digit for digit.
fn big_integer<E: de::Error>(digits: &str) -> Result<Value, E> {
    digits
        .parse::<serde_json::Number>()
        .map(|n| Value::Scalar(Scalar::Number(n)))
        .map_err(E::custom)
}

fn yaml_float(v: f64) -> Scalar {
    // .nan and .inf have no JSON number form
    match serde_json::Number::from_f64(v) {
        Some(n) => Scalar::Number(n),
        None if v.is_nan() => Scalar::String(".nan".to_string()),
        None if v.is_sign_negative() => Scalar::String("-.inf".to_string()),
        None => Scalar::String(".inf".to_string()),
    }
}
