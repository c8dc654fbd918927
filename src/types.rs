//! Core types: schema declarations for target types and the raw value tree.

use std::any::TypeId;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::mpsc::{Receiver, Sender, SyncSender};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;

/// Separator between the key name and its options in a field tag (`"name,optional"`).
pub const TAG_SEPARATOR: char = ',';

/// A type whose declared structure can be described for key normalization.
///
/// Implemented by hand (or by generated code) for configuration structs:
///
/// ```
/// use config_keys::{FieldDecl, Schema, TypeShape};
///
/// struct Database {
///     host: String,
///     port: u16,
/// }
///
/// impl Schema for Database {
///     fn shape() -> TypeShape {
///         TypeShape::record([
///             FieldDecl::named::<String>("Host"),
///             FieldDecl::named::<u16>("Port").tag("port,optional"),
///         ])
///     }
/// }
/// ```
pub trait Schema: 'static {
    fn shape() -> TypeShape;
}

/// Lazy handle to a declared type.
///
/// The shape is only produced when the descriptor builder asks for it, so a
/// type may refer to itself without the declaration looping forever.
#[derive(Clone, Copy)]
pub struct TypeRef {
    id: TypeId,
    name: &'static str,
    shape: fn() -> TypeShape,
}

impl TypeRef {
    pub fn of<T: Schema>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
            shape: T::shape,
        }
    }

    /// Identity of the referenced type.
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Rust type name, for diagnostics only.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Produce the declared shape of the referenced type.
    pub fn shape(&self) -> TypeShape {
        (self.shape)()
    }
}

impl fmt::Debug for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypeRef").field(&self.name).finish()
    }
}

/// Structural kind of a declared type.
#[derive(Debug, Clone)]
pub enum TypeShape {
    /// Fixed set of named fields, in declaration order.
    Record(Vec<FieldDecl>),
    /// Homogeneous collection of the element type.
    Sequence(TypeRef),
    /// String-keyed associative map of the value type.
    Map(TypeRef),
    /// One layer of indirection around the inner type.
    Optional(TypeRef),
    Scalar,
    /// Dynamically typed value; accepts anything.
    Any,
    Callable,
    Channel,
}

impl TypeShape {
    pub fn record(fields: impl IntoIterator<Item = FieldDecl>) -> Self {
        TypeShape::Record(fields.into_iter().collect())
    }

    pub fn kind(&self) -> ShapeKind {
        match self {
            TypeShape::Record(_) => ShapeKind::Record,
            TypeShape::Sequence(_) => ShapeKind::Sequence,
            TypeShape::Map(_) => ShapeKind::Map,
            TypeShape::Optional(_) => ShapeKind::Optional,
            TypeShape::Scalar => ShapeKind::Scalar,
            TypeShape::Any => ShapeKind::Any,
            TypeShape::Callable => ShapeKind::Callable,
            TypeShape::Channel => ShapeKind::Channel,
        }
    }
}

/// Fieldless mirror of [`TypeShape`], used in error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShapeKind {
    Record,
    Sequence,
    Map,
    Optional,
    Scalar,
    Any,
    Callable,
    Channel,
}

impl ShapeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShapeKind::Record => "record",
            ShapeKind::Sequence => "sequence",
            ShapeKind::Map => "map",
            ShapeKind::Optional => "optional",
            ShapeKind::Scalar => "scalar",
            ShapeKind::Any => "any",
            ShapeKind::Callable => "callable",
            ShapeKind::Channel => "channel",
        }
    }
}

impl fmt::Display for ShapeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One declared field of a record.
#[derive(Debug, Clone)]
pub struct FieldDecl {
    ident: &'static str,
    tag: Option<&'static str>,
    embedded: bool,
    exported: bool,
    ty: TypeRef,
}

impl FieldDecl {
    /// A field addressed by its own key.
    pub fn named<T: Schema>(ident: &'static str) -> Self {
        Self {
            ident,
            tag: None,
            embedded: false,
            exported: true,
            ty: TypeRef::of::<T>(),
        }
    }

    /// A flattened field whose own fields live in the parent's namespace.
    pub fn embedded<T: Schema>(ident: &'static str) -> Self {
        Self {
            embedded: true,
            ..Self::named::<T>(ident)
        }
    }

    /// Set the serialization tag, e.g. `"name"` or `"name,optional"`.
    pub fn tag(mut self, tag: &'static str) -> Self {
        self.tag = Some(tag);
        self
    }

    /// Exclude the field from the configuration namespace.
    pub fn skip(mut self) -> Self {
        self.exported = false;
        self
    }

    pub fn ident(&self) -> &'static str {
        self.ident
    }

    pub fn is_embedded(&self) -> bool {
        self.embedded
    }

    pub fn is_exported(&self) -> bool {
        self.exported
    }

    pub fn ty(&self) -> TypeRef {
        self.ty
    }

    /// Key name from the first tag segment, falling back to the identifier
    /// when there is no tag or its name segment is blank.
    pub fn tag_name(&self) -> &'static str {
        let Some(tag) = self.tag else {
            return self.ident;
        };
        let name = tag
            .split_once(TAG_SEPARATOR)
            .map_or(tag, |(head, _)| head)
            .trim();
        if name.is_empty() {
            self.ident
        } else {
            name
        }
    }

    /// Lower-cased tag name; the key this field is matched under.
    pub fn canonical_key(&self) -> String {
        self.tag_name().to_lowercase()
    }
}

// --- Schema impls for std and ecosystem types ---

macro_rules! scalar_schema {
    ($($t:ty),* $(,)?) => {
        $(
            impl Schema for $t {
                fn shape() -> TypeShape {
                    TypeShape::Scalar
                }
            }
        )*
    };
}

scalar_schema!(
    bool, char, String, PathBuf, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize,
    f32, f64,
);

impl<T: Schema> Schema for Option<T> {
    fn shape() -> TypeShape {
        TypeShape::Optional(TypeRef::of::<T>())
    }
}

impl<T: Schema> Schema for Box<T> {
    fn shape() -> TypeShape {
        T::shape()
    }
}

impl<T: Schema> Schema for Rc<T> {
    fn shape() -> TypeShape {
        T::shape()
    }
}

impl<T: Schema> Schema for Arc<T> {
    fn shape() -> TypeShape {
        T::shape()
    }
}

impl<T: Schema> Schema for Vec<T> {
    fn shape() -> TypeShape {
        TypeShape::Sequence(TypeRef::of::<T>())
    }
}

impl<T: Schema> Schema for VecDeque<T> {
    fn shape() -> TypeShape {
        TypeShape::Sequence(TypeRef::of::<T>())
    }
}

impl<T: Schema, S: 'static> Schema for HashSet<T, S> {
    fn shape() -> TypeShape {
        TypeShape::Sequence(TypeRef::of::<T>())
    }
}

impl<T: Schema> Schema for BTreeSet<T> {
    fn shape() -> TypeShape {
        TypeShape::Sequence(TypeRef::of::<T>())
    }
}

impl<T: Schema, const N: usize> Schema for [T; N] {
    fn shape() -> TypeShape {
        TypeShape::Sequence(TypeRef::of::<T>())
    }
}

impl<K: 'static, V: Schema, S: 'static> Schema for HashMap<K, V, S> {
    fn shape() -> TypeShape {
        TypeShape::Map(TypeRef::of::<V>())
    }
}

impl<K: 'static, V: Schema> Schema for BTreeMap<K, V> {
    fn shape() -> TypeShape {
        TypeShape::Map(TypeRef::of::<V>())
    }
}

impl<K: 'static, V: Schema, S: 'static> Schema for IndexMap<K, V, S> {
    fn shape() -> TypeShape {
        TypeShape::Map(TypeRef::of::<V>())
    }
}

impl Schema for serde_json::Value {
    fn shape() -> TypeShape {
        TypeShape::Any
    }
}

impl Schema for Value {
    fn shape() -> TypeShape {
        TypeShape::Any
    }
}

impl<R: 'static> Schema for fn() -> R {
    fn shape() -> TypeShape {
        TypeShape::Callable
    }
}

impl<A: 'static, R: 'static> Schema for fn(A) -> R {
    fn shape() -> TypeShape {
        TypeShape::Callable
    }
}

impl<A: 'static, B: 'static, R: 'static> Schema for fn(A, B) -> R {
    fn shape() -> TypeShape {
        TypeShape::Callable
    }
}

impl<T: 'static> Schema for Sender<T> {
    fn shape() -> TypeShape {
        TypeShape::Channel
    }
}

impl<T: 'static> Schema for SyncSender<T> {
    fn shape() -> TypeShape {
        TypeShape::Channel
    }
}

impl<T: 'static> Schema for Receiver<T> {
    fn shape() -> TypeShape {
        TypeShape::Channel
    }
}

// --- Raw value tree ---

/// String-keyed mapping node; keeps document order.
pub type Mapping = IndexMap<String, Value>;

/// Decoded configuration data, before or after key normalization.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Mapping(Mapping),
    Sequence(Vec<Value>),
    Scalar(Scalar),
    Null,
}

/// Leaf value. Normalization never rewrites these.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Number(serde_json::Number),
    String(String),
}

impl Value {
    /// Returns the value's type name for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Mapping(_) => "mapping",
            Value::Sequence(_) => "sequence",
            Value::Scalar(Scalar::Bool(_)) => "bool",
            Value::Scalar(Scalar::Number(_)) => "number",
            Value::Scalar(Scalar::String(_)) => "string",
            Value::Null => "null",
        }
    }

    pub fn as_mapping(&self) -> Option<&Mapping> {
        match self {
            Value::Mapping(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Value::Sequence(items) => Some(items),
            _ => None,
        }
    }

    /// Look up a key if this is a mapping.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_mapping().and_then(|map| map.get(key))
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Scalar(Scalar::Bool(b)),
            serde_json::Value::Number(n) => Value::Scalar(Scalar::Number(n)),
            serde_json::Value::String(s) => Value::Scalar(Scalar::String(s)),
            serde_json::Value::Array(arr) => {
                Value::Sequence(arr.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(obj) => {
                Value::Mapping(obj.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Scalar(Scalar::Bool(b)) => serde_json::Value::Bool(b),
            Value::Scalar(Scalar::Number(n)) => serde_json::Value::Number(n),
            Value::Scalar(Scalar::String(s)) => serde_json::Value::String(s),
            Value::Sequence(items) => {
                serde_json::Value::Array(items.into_iter().map(serde_json::Value::from).collect())
            }
            Value::Mapping(map) => serde_json::Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, serde_json::Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<Mapping> for Value {
    fn from(map: Mapping) -> Self {
        Value::Mapping(map)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Sequence(items)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Scalar(Scalar::String(s.to_string()))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Scalar(Scalar::String(s))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Scalar(Scalar::Bool(b))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Scalar(Scalar::Number(n.into()))
    }
}
