//! Field descriptors - the matching shape of a declared schema.
//!
//! A descriptor tree is built once per target type by walking its
//! [`TypeShape`](crate::TypeShape) and is read-only afterwards. Record nodes
//! carry their fields as `children` keyed by canonical (lower-cased) name;
//! map nodes carry a single `wildcard` describing every value of the map.

use std::any::TypeId;
use std::collections::BTreeMap;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::BuildError;
use crate::types::{FieldDecl, Schema, TypeRef, TypeShape};

/// Matching shape of one declared field, or of the values of a map.
///
/// If `wildcard` is set the node is a map node and `children` is not
/// consulted when matching keys. Child keys are canonical: deserializing a
/// descriptor lower-cases them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    #[serde(
        default,
        skip_serializing_if = "BTreeMap::is_empty",
        deserialize_with = "canonical_children"
    )]
    children: BTreeMap<String, FieldDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    wildcard: Option<Box<FieldDescriptor>>,
}

impl FieldDescriptor {
    /// A node with no children and no wildcard. Matches nothing below it.
    pub fn leaf() -> Self {
        Self::default()
    }

    /// A map node whose every value has the given shape.
    pub fn map(value: FieldDescriptor) -> Self {
        Self {
            children: BTreeMap::new(),
            wildcard: Some(Box::new(value)),
        }
    }

    /// A record node with the given children.
    ///
    /// Keys are used as-is; callers building descriptors by hand are
    /// expected to pass lower-cased names.
    pub fn record<K: Into<String>>(
        children: impl IntoIterator<Item = (K, FieldDescriptor)>,
    ) -> Self {
        Self {
            children: children
                .into_iter()
                .map(|(key, child)| (key.into(), child))
                .collect(),
            wildcard: None,
        }
    }

    /// Build the descriptor tree for `T`.
    pub fn of<T: Schema>() -> Result<Self, BuildError> {
        build_descriptor(&TypeRef::of::<T>())
    }

    pub fn children(&self) -> &BTreeMap<String, FieldDescriptor> {
        &self.children
    }

    pub fn child(&self, key: &str) -> Option<&FieldDescriptor> {
        self.children.get(key)
    }

    pub fn wildcard(&self) -> Option<&FieldDescriptor> {
        self.wildcard.as_deref()
    }

    /// True when the node has neither children nor a wildcard.
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty() && self.wildcard.is_none()
    }
}

/// Build the descriptor tree for a declared type.
///
/// # Errors
///
/// Returns `BuildError::UnsupportedType` for callable or channel fields,
/// `BuildError::ConflictingKey` when two fields share a canonical key
/// without being mergeable records, and `BuildError::RecursiveType` when a
/// record type contains itself.
pub fn build_descriptor(ty: &TypeRef) -> Result<FieldDescriptor, BuildError> {
    let descriptor = Builder::default().build(*ty, "")?;
    tracing::debug!(
        type_name = ty.name(),
        fields = descriptor.children.len(),
        "built field descriptor"
    );
    Ok(descriptor)
}

// --- Internal implementation ---

/// Lower-case child keys read from a serialized descriptor.
fn canonical_children<'de, D>(
    deserializer: D,
) -> Result<BTreeMap<String, FieldDescriptor>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, FieldDescriptor>::deserialize(deserializer)?;
    let mut children = BTreeMap::new();
    for (key, child) in raw {
        let canonical = key.to_lowercase();
        if children.insert(canonical.clone(), child).is_some() {
            return Err(D::Error::custom(format!(
                "duplicate descriptor key {} after lower-casing",
                canonical
            )));
        }
    }
    Ok(children)
}

#[derive(Default)]
struct Builder {
    /// Record types currently being expanded, outermost first.
    in_progress: Vec<TypeId>,
}

impl Builder {
    fn build(&mut self, ty: TypeRef, path: &str) -> Result<FieldDescriptor, BuildError> {
        let (ty, shape) = dereference(ty);
        self.build_shape(ty, shape, path)
    }

    fn build_shape(
        &mut self,
        ty: TypeRef,
        shape: TypeShape,
        path: &str,
    ) -> Result<FieldDescriptor, BuildError> {
        match shape {
            TypeShape::Record(fields) => self.build_record(ty, &fields, path),
            // Only the element's shape is recorded; it applies to every element.
            TypeShape::Sequence(elem) => self.build(elem, path),
            // Maps, scalars, dynamic values and doubled indirection all pass
            // through, but their inner types must still be able to hold data.
            other => {
                ensure_supported(ty, &other, path, &mut Vec::new())?;
                Ok(FieldDescriptor::leaf())
            }
        }
    }

    fn build_record(
        &mut self,
        ty: TypeRef,
        fields: &[FieldDecl],
        path: &str,
    ) -> Result<FieldDescriptor, BuildError> {
        if self.in_progress.contains(&ty.id()) {
            return Err(BuildError::RecursiveType {
                type_name: ty.name(),
                path: path.to_string(),
            });
        }

        self.in_progress.push(ty.id());
        let result = self.build_fields(fields, path);
        self.in_progress.pop();
        result
    }

    fn build_fields(
        &mut self,
        fields: &[FieldDecl],
        path: &str,
    ) -> Result<FieldDescriptor, BuildError> {
        let mut info = FieldDescriptor::leaf();

        for field in fields.iter().filter(|f| f.is_exported()) {
            let (ty, shape) = dereference(field.ty());
            let key = field.canonical_key();
            let child_path = join_path(path, &key);

            if field.is_embedded() {
                self.add_embedded(&mut info, key, ty, shape, &child_path)?;
            } else {
                self.add_named(&mut info, key, ty, shape, &child_path)?;
            }
        }

        Ok(info)
    }

    fn add_named(
        &mut self,
        info: &mut FieldDescriptor,
        key: String,
        ty: TypeRef,
        shape: TypeShape,
        path: &str,
    ) -> Result<(), BuildError> {
        let child = match shape {
            TypeShape::Map(value) => FieldDescriptor::map(self.build(value, path)?),
            other => self.build_shape(ty, other, path)?,
        };
        add_or_merge(info, key, child, path)
    }

    fn add_embedded(
        &mut self,
        info: &mut FieldDescriptor,
        key: String,
        ty: TypeRef,
        shape: TypeShape,
        path: &str,
    ) -> Result<(), BuildError> {
        let child = match shape {
            TypeShape::Record(fields) => {
                // Splice the embedded record's fields into the parent.
                let embedded = self.build_record(ty, &fields, path)?;
                for (child_key, child) in embedded.children {
                    tracing::trace!(key = %child_key, path, "splicing embedded field");
                    add_or_merge(info, child_key, child, path)?;
                }
                return Ok(());
            }
            // A map cannot be spliced: its keys are data, so it keeps its own key.
            TypeShape::Map(value) => FieldDescriptor::map(self.build(value, path)?),
            other => {
                ensure_supported(ty, &other, path, &mut Vec::new())?;
                FieldDescriptor::leaf()
            }
        };

        if info.children.contains_key(&key) {
            return Err(conflict(key, path));
        }
        info.children.insert(key, child);
        Ok(())
    }
}

/// Strip exactly one layer of indirection.
fn dereference(ty: TypeRef) -> (TypeRef, TypeShape) {
    match ty.shape() {
        TypeShape::Optional(inner) => (inner, inner.shape()),
        shape => (ty, shape),
    }
}

/// Reject callable and channel types anywhere below a pass-through node.
fn ensure_supported(
    ty: TypeRef,
    shape: &TypeShape,
    path: &str,
    seen: &mut Vec<TypeId>,
) -> Result<(), BuildError> {
    match shape {
        TypeShape::Callable | TypeShape::Channel => Err(BuildError::UnsupportedType {
            kind: shape.kind(),
            type_name: ty.name(),
            path: path.to_string(),
        }),
        TypeShape::Sequence(inner) | TypeShape::Map(inner) | TypeShape::Optional(inner) => {
            ensure_supported(*inner, &inner.shape(), path, seen)
        }
        TypeShape::Record(fields) => {
            if seen.contains(&ty.id()) {
                return Ok(());
            }
            seen.push(ty.id());
            for field in fields.iter().filter(|f| f.is_exported()) {
                let child_path = join_path(path, &field.canonical_key());
                let inner = field.ty();
                ensure_supported(inner, &inner.shape(), &child_path, seen)?;
            }
            Ok(())
        }
        TypeShape::Scalar | TypeShape::Any => Ok(()),
    }
}

fn join_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", parent, key)
    }
}

/// Insert `child` under `key`, merging with an existing record node.
///
/// Merging requires both sides to be non-empty records with disjoint keys.
fn add_or_merge(
    info: &mut FieldDescriptor,
    key: String,
    child: FieldDescriptor,
    path: &str,
) -> Result<(), BuildError> {
    let Some(prev) = info.children.get_mut(&key) else {
        info.children.insert(key, child);
        return Ok(());
    };

    if child.wildcard.is_some() || prev.children.is_empty() || child.children.is_empty() {
        return Err(conflict(key, path));
    }

    for (child_key, grandchild) in child.children {
        if prev.children.contains_key(&child_key) {
            return Err(conflict(child_key, path));
        }
        prev.children.insert(child_key, grandchild);
    }

    Ok(())
}

fn conflict(key: String, path: &str) -> BuildError {
    tracing::debug!(key = %key, path, "conflicting descriptor key");
    BuildError::ConflictingKey {
        key,
        path: path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::mpsc::Sender;

    struct Nested;
    impl Schema for Nested {
        fn shape() -> TypeShape {
            TypeShape::record([FieldDecl::named::<i64>("Value")])
        }
    }

    struct Simple;
    impl Schema for Simple {
        fn shape() -> TypeShape {
            TypeShape::record([
                FieldDecl::named::<String>("Name"),
                FieldDecl::named::<Nested>("Nested"),
                FieldDecl::named::<Option<Nested>>("Maybe").tag("maybeNested"),
                FieldDecl::named::<String>("secret").skip(),
            ])
        }
    }

    #[test]
    fn record_children_are_lower_cased() {
        let info = FieldDescriptor::of::<Simple>().unwrap();

        let keys: Vec<_> = info.children().keys().map(String::as_str).collect();
        assert_eq!(keys, ["maybenested", "name", "nested"]);
        assert!(info.child("name").unwrap().is_leaf());
        assert!(info.child("nested").unwrap().child("value").is_some());
        assert!(info.child("maybenested").unwrap().child("value").is_some());
    }

    #[test]
    fn skipped_fields_are_ignored() {
        let info = FieldDescriptor::of::<Simple>().unwrap();
        assert!(info.child("secret").is_none());
    }

    struct WithCollections;
    impl Schema for WithCollections {
        fn shape() -> TypeShape {
            TypeShape::record([
                FieldDecl::named::<Vec<Nested>>("Items"),
                FieldDecl::named::<HashMap<String, Nested>>("ByName"),
                FieldDecl::named::<HashMap<String, String>>("Labels"),
                FieldDecl::named::<Vec<String>>("Tags"),
            ])
        }
    }

    #[test]
    fn sequence_field_collapses_to_element() {
        let info = FieldDescriptor::of::<WithCollections>().unwrap();
        let items = info.child("items").unwrap();
        assert!(items.wildcard().is_none());
        assert!(items.child("value").is_some());
        assert!(info.child("tags").unwrap().is_leaf());
    }

    #[test]
    fn map_field_gets_wildcard() {
        let info = FieldDescriptor::of::<WithCollections>().unwrap();

        let by_name = info.child("byname").unwrap();
        assert!(by_name.children().is_empty());
        assert!(by_name.wildcard().unwrap().child("value").is_some());

        let labels = info.child("labels").unwrap();
        assert!(labels.wildcard().unwrap().is_leaf());
    }

    #[test]
    fn top_level_map_and_scalar_are_leaves() {
        assert!(FieldDescriptor::of::<HashMap<String, Nested>>()
            .unwrap()
            .is_leaf());
        assert!(FieldDescriptor::of::<String>().unwrap().is_leaf());
        assert!(FieldDescriptor::of::<serde_json::Value>().unwrap().is_leaf());
    }

    #[test]
    fn top_level_sequence_uses_element() {
        let info = FieldDescriptor::of::<Vec<Nested>>().unwrap();
        assert!(info.child("value").is_some());
    }

    struct Base;
    impl Schema for Base {
        fn shape() -> TypeShape {
            TypeShape::record([
                FieldDecl::named::<String>("Host"),
                FieldDecl::named::<u16>("Port"),
            ])
        }
    }

    struct Extra;
    impl Schema for Extra {
        fn shape() -> TypeShape {
            TypeShape::record([FieldDecl::named::<String>("User")])
        }
    }

    struct Embedding;
    impl Schema for Embedding {
        fn shape() -> TypeShape {
            TypeShape::record([
                FieldDecl::embedded::<Base>("Base"),
                FieldDecl::embedded::<Option<Extra>>("Extra"),
                FieldDecl::named::<String>("Name"),
            ])
        }
    }

    #[test]
    fn embedded_records_are_spliced() {
        let info = FieldDescriptor::of::<Embedding>().unwrap();
        let keys: Vec<_> = info.children().keys().map(String::as_str).collect();
        assert_eq!(keys, ["host", "name", "port", "user"]);
    }

    struct BaseAgain;
    impl Schema for BaseAgain {
        fn shape() -> TypeShape {
            TypeShape::record([FieldDecl::named::<String>("HOST")])
        }
    }

    struct Overlapping;
    impl Schema for Overlapping {
        fn shape() -> TypeShape {
            TypeShape::record([
                FieldDecl::embedded::<Base>("Base"),
                FieldDecl::embedded::<BaseAgain>("BaseAgain"),
            ])
        }
    }

    #[test]
    fn overlapping_embedded_records_conflict() {
        let err = FieldDescriptor::of::<Overlapping>().unwrap_err();
        assert!(matches!(err, BuildError::ConflictingKey { ref key, .. } if key == "host"));
    }

    struct Left;
    impl Schema for Left {
        fn shape() -> TypeShape {
            TypeShape::record([FieldDecl::named::<Base>("Db")])
        }
    }

    struct Right;
    impl Schema for Right {
        fn shape() -> TypeShape {
            TypeShape::record([FieldDecl::named::<Extra>("DB")])
        }
    }

    struct MergedRecords;
    impl Schema for MergedRecords {
        fn shape() -> TypeShape {
            TypeShape::record([
                FieldDecl::embedded::<Left>("Left"),
                FieldDecl::embedded::<Right>("Right"),
            ])
        }
    }

    #[test]
    fn same_key_records_with_disjoint_children_merge() {
        let info = FieldDescriptor::of::<MergedRecords>().unwrap();
        let db = info.child("db").unwrap();
        let keys: Vec<_> = db.children().keys().map(String::as_str).collect();
        assert_eq!(keys, ["host", "port", "user"]);
    }

    struct Empty;
    impl Schema for Empty {
        fn shape() -> TypeShape {
            TypeShape::record([])
        }
    }

    struct EmptyHolder;
    impl Schema for EmptyHolder {
        fn shape() -> TypeShape {
            TypeShape::record([FieldDecl::named::<Empty>("Name")])
        }
    }

    struct EmptyCollision;
    impl Schema for EmptyCollision {
        fn shape() -> TypeShape {
            TypeShape::record([
                FieldDecl::named::<Extra>("Name"),
                FieldDecl::embedded::<EmptyHolder>("Holder"),
            ])
        }
    }

    #[test]
    fn empty_record_collision_is_a_conflict() {
        let err = FieldDescriptor::of::<EmptyCollision>().unwrap_err();
        assert!(matches!(err, BuildError::ConflictingKey { ref key, .. } if key == "name"));
    }

    struct LeafCollision;
    impl Schema for LeafCollision {
        fn shape() -> TypeShape {
            TypeShape::record([
                FieldDecl::named::<String>("Name"),
                FieldDecl::named::<String>("NAME"),
            ])
        }
    }

    #[test]
    fn case_variant_fields_conflict() {
        let err = FieldDescriptor::of::<LeafCollision>().unwrap_err();
        assert!(matches!(err, BuildError::ConflictingKey { ref key, .. } if key == "name"));
    }

    struct MapCollision;
    impl Schema for MapCollision {
        fn shape() -> TypeShape {
            TypeShape::record([
                FieldDecl::named::<Extra>("Extra"),
                FieldDecl::named::<HashMap<String, Extra>>("extra"),
            ])
        }
    }

    #[test]
    fn record_and_map_under_same_key_conflict() {
        let err = FieldDescriptor::of::<MapCollision>().unwrap_err();
        assert!(matches!(err, BuildError::ConflictingKey { ref key, .. } if key == "extra"));
    }

    struct EmbeddedMap;
    impl Schema for EmbeddedMap {
        fn shape() -> TypeShape {
            TypeShape::record([
                FieldDecl::named::<String>("Name"),
                FieldDecl::embedded::<HashMap<String, String>>("Extra"),
            ])
        }
    }

    #[test]
    fn embedded_map_keeps_its_own_key() {
        let info = FieldDescriptor::of::<EmbeddedMap>().unwrap();
        let extra = info.child("extra").unwrap();
        assert!(extra.wildcard().is_some());
    }

    struct EmbeddedMapClash;
    impl Schema for EmbeddedMapClash {
        fn shape() -> TypeShape {
            TypeShape::record([
                FieldDecl::named::<String>("Extra"),
                FieldDecl::embedded::<HashMap<String, String>>("Extra"),
            ])
        }
    }

    #[test]
    fn embedded_map_clash_conflicts() {
        let err = FieldDescriptor::of::<EmbeddedMapClash>().unwrap_err();
        assert!(matches!(err, BuildError::ConflictingKey { ref key, .. } if key == "extra"));
    }

    struct DeepChannel;
    impl Schema for DeepChannel {
        fn shape() -> TypeShape {
            TypeShape::record([FieldDecl::named::<Vec<HashMap<String, Sender<u8>>>>("Queues")])
        }
    }

    struct ChannelHolder;
    impl Schema for ChannelHolder {
        fn shape() -> TypeShape {
            TypeShape::record([FieldDecl::named::<HashMap<String, Sender<u8>>>("Queues")])
        }
    }

    #[test]
    fn channel_under_map_is_unsupported() {
        let err = FieldDescriptor::of::<ChannelHolder>().unwrap_err();
        assert!(
            matches!(err, BuildError::UnsupportedType { ref path, .. } if path == "queues"),
            "{err}"
        );
    }

    #[test]
    fn channel_below_pass_through_map_is_unsupported() {
        let err = FieldDescriptor::of::<DeepChannel>().unwrap_err();
        assert!(
            matches!(err, BuildError::UnsupportedType { ref path, .. } if path == "queues"),
            "{err}"
        );
    }

    #[test]
    fn map_inside_sequence_is_a_leaf() {
        struct Groups;
        impl Schema for Groups {
            fn shape() -> TypeShape {
                TypeShape::record([FieldDecl::named::<Vec<HashMap<String, Nested>>>("Groups")])
            }
        }
        let info = FieldDescriptor::of::<Groups>().unwrap();
        assert!(info.child("groups").unwrap().is_leaf());
    }

    struct CallbackHolder;
    impl Schema for CallbackHolder {
        fn shape() -> TypeShape {
            TypeShape::record([
                FieldDecl::named::<String>("Name"),
                FieldDecl::embedded::<fn(String) -> bool>("Hook"),
            ])
        }
    }

    #[test]
    fn embedded_callable_is_unsupported() {
        let err = FieldDescriptor::of::<CallbackHolder>().unwrap_err();
        assert!(matches!(err, BuildError::UnsupportedType { .. }));
    }

    struct Node;
    impl Schema for Node {
        fn shape() -> TypeShape {
            TypeShape::record([
                FieldDecl::named::<String>("Label"),
                FieldDecl::named::<Vec<Node>>("Children"),
            ])
        }
    }

    #[test]
    fn recursive_type_is_rejected() {
        let err = FieldDescriptor::of::<Node>().unwrap_err();
        assert!(matches!(err, BuildError::RecursiveType { ref path, .. } if path == "children"));
    }

    #[test]
    fn sibling_reuse_is_not_recursion() {
        struct Twice;
        impl Schema for Twice {
            fn shape() -> TypeShape {
                TypeShape::record([
                    FieldDecl::named::<Nested>("First"),
                    FieldDecl::named::<Nested>("Second"),
                ])
            }
        }
        let info = FieldDescriptor::of::<Twice>().unwrap();
        assert_eq!(info.child("first"), info.child("second"));
    }

    #[test]
    fn descriptor_json_shape() {
        let info = FieldDescriptor::of::<WithCollections>().unwrap();
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "children": {
                    "byname": { "wildcard": { "children": { "value": {} } } },
                    "items": { "children": { "value": {} } },
                    "labels": { "wildcard": {} },
                    "tags": {}
                }
            })
        );
        let back: FieldDescriptor = serde_json::from_value(json).unwrap();
        assert_eq!(back, info);
    }

    #[test]
    fn deserialized_keys_are_lower_cased() {
        let descriptor: FieldDescriptor = serde_json::from_value(serde_json::json!({
            "children": {"Name": {}, "Nested": {"children": {"VALUE": {}}}}
        }))
        .unwrap();
        assert!(descriptor.child("name").is_some());
        assert!(descriptor.child("Name").is_none());
        assert!(descriptor.child("nested").unwrap().child("value").is_some());
    }

    #[test]
    fn deserialized_keys_colliding_after_lower_casing_fail() {
        let result = serde_json::from_value::<FieldDescriptor>(serde_json::json!({
            "children": {"Name": {}, "name": {}}
        }));
        let err = result.unwrap_err();
        assert!(err.to_string().contains("duplicate descriptor key name"));
    }
}
