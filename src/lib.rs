//! Config Keys
//!
//! Schema-aware, case-insensitive key normalization for configuration data.
//!
//! Hand-written JSON/YAML configuration is inconsistently cased. This library
//! describes a target type's declared fields once, as a tree of
//! [`FieldDescriptor`]s, and rewrites every key of a raw document to the
//! canonical (lower-cased, tag-derived) name of the field it addresses.
//!
//! # Example
//!
//! ```
//! use config_keys::{normalize, FieldDecl, FieldDescriptor, Schema, TypeShape, Value};
//! use serde_json::json;
//!
//! struct Nested;
//! impl Schema for Nested {
//!     fn shape() -> TypeShape {
//!         TypeShape::record([FieldDecl::named::<i64>("Value")])
//!     }
//! }
//!
//! struct Config;
//! impl Schema for Config {
//!     fn shape() -> TypeShape {
//!         TypeShape::record([
//!             FieldDecl::named::<String>("Name"),
//!             FieldDecl::named::<Nested>("Nested"),
//!         ])
//!     }
//! }
//!
//! let descriptor = FieldDescriptor::of::<Config>().unwrap();
//! let Value::Mapping(raw) = Value::from(json!({"NAME": "x", "nested": {"VALUE": 3}})) else {
//!     unreachable!()
//! };
//!
//! let normalized = normalize(&raw, &descriptor);
//! assert_eq!(
//!     serde_json::Value::from(Value::Mapping(normalized)),
//!     json!({"name": "x", "nested": {"value": 3}})
//! );
//! ```
//!
//! # Matching Rules
//!
//! | Raw key | Effect |
//! |---------|--------|
//! | Matches a field exactly | Kept, value normalized against the field |
//! | Matches a field after lower-casing | Lower-cased, value normalized |
//! | Under a map field | Kept verbatim, value normalized against the map's value type |
//! | No match | Kept verbatim, value untouched |
//!
//! # Embedded Fields
//!
//! Fields declared with [`FieldDecl::embedded`] contribute their own fields to
//! the parent's namespace. Two fields that end up under the same key must be
//! records with disjoint fields, otherwise building fails with
//! [`BuildError::ConflictingKey`].

mod cache;
mod descriptor;
mod error;
mod loader;
mod normalize;
mod types;

pub use cache::DescriptorCache;
pub use descriptor::{build_descriptor, FieldDescriptor};
pub use error::{BuildError, LoadError};
pub use loader::{
    expand_env, expand_env_with, load, load_descriptor, load_document, load_normalized,
    load_str, parse_document, Format, LoadOptions,
};
pub use normalize::{normalize, normalize_value, unknown_keys};
pub use types::{
    FieldDecl, Mapping, Scalar, Schema, ShapeKind, TypeRef, TypeShape, Value, TAG_SEPARATOR,
};
