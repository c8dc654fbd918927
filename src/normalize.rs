//! Key normalization - rewrites raw document keys to their canonical form.
//!
//! Walks a raw value tree in lockstep with a [`FieldDescriptor`]. Keys that
//! match a declared field (exactly, or after lower-casing) are emitted in
//! canonical form; keys under a map field are kept as data; anything else
//! passes through untouched.

use crate::descriptor::FieldDescriptor;
use crate::types::{Mapping, Value};

/// Normalize the keys of a raw mapping against a descriptor.
///
/// Never fails: unknown keys and unexpected shapes are passed through so
/// that type errors surface later, when the tree is bound to its target.
pub fn normalize(raw: &Mapping, descriptor: &FieldDescriptor) -> Mapping {
    let mut result = Mapping::with_capacity(raw.len());

    for (key, value) in raw {
        let (out_key, out_value) = match resolve_key(key, descriptor) {
            Some((canonical, child)) => (canonical, normalize_value(value, child)),
            None => (key.clone(), value.clone()),
        };

        if let Some(previous) = result.insert(out_key, out_value) {
            tracing::debug!(
                key = %key,
                replaced = previous.type_name(),
                "raw keys collide after normalization; keeping the later one"
            );
        }
    }

    result
}

/// Normalize a single value against the descriptor resolved for it.
///
/// Mappings are normalized, sequences have every element normalized with
/// the same descriptor, and scalars are returned unchanged.
pub fn normalize_value(value: &Value, descriptor: &FieldDescriptor) -> Value {
    match value {
        Value::Mapping(map) => Value::Mapping(normalize(map, descriptor)),
        Value::Sequence(items) => Value::Sequence(
            items
                .iter()
                .map(|item| normalize_value(item, descriptor))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Report raw keys that match no declared field.
///
/// Only record nodes are checked; keys under map fields and below leaf
/// fields are data. Paths are dotted, with sequence elements as `[i]`.
pub fn unknown_keys(raw: &Mapping, descriptor: &FieldDescriptor) -> Vec<String> {
    let mut unknown = Vec::new();
    collect_unknown_map(raw, descriptor, "", &mut unknown);
    unknown
}

// --- Internal implementation ---

/// Find the output key and child descriptor for a raw key.
fn resolve_key<'d>(
    key: &str,
    descriptor: &'d FieldDescriptor,
) -> Option<(String, &'d FieldDescriptor)> {
    // Keys under a map node are data: never case-folded, never matched
    // against children.
    if let Some(wildcard) = descriptor.wildcard() {
        return Some((key.to_string(), wildcard));
    }

    if let Some(child) = descriptor.child(key) {
        return Some((key.to_string(), child));
    }

    let lower = key.to_lowercase();
    descriptor.child(&lower).map(|child| (lower, child))
}

fn collect_unknown_map(
    raw: &Mapping,
    descriptor: &FieldDescriptor,
    path: &str,
    unknown: &mut Vec<String>,
) {
    let is_record = descriptor.wildcard().is_none() && !descriptor.children().is_empty();

    for (key, value) in raw {
        let child_path = if path.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", path, key)
        };

        match resolve_key(key, descriptor) {
            Some((_, child)) => collect_unknown_value(value, child, &child_path, unknown),
            None if is_record => unknown.push(child_path),
            None => {}
        }
    }
}

fn collect_unknown_value(
    value: &Value,
    descriptor: &FieldDescriptor,
    path: &str,
    unknown: &mut Vec<String>,
) {
    match value {
        Value::Mapping(map) => collect_unknown_map(map, descriptor, path, unknown),
        Value::Sequence(items) => {
            for (i, item) in items.iter().enumerate() {
                let item_path = format!("{}[{}]", path, i);
                collect_unknown_value(item, descriptor, &item_path, unknown);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mapping(value: serde_json::Value) -> Mapping {
        match Value::from(value) {
            Value::Mapping(map) => map,
            other => panic!("expected mapping, got {}", other.type_name()),
        }
    }

    fn server_descriptor() -> FieldDescriptor {
        FieldDescriptor::record([
            ("name", FieldDescriptor::leaf()),
            (
                "nested",
                FieldDescriptor::record([("value", FieldDescriptor::leaf())]),
            ),
            ("labels", FieldDescriptor::map(FieldDescriptor::leaf())),
        ])
    }

    #[test]
    fn exact_match_keeps_key() {
        let raw = mapping(json!({"name": "x"}));
        let result = normalize(&raw, &server_descriptor());
        assert_eq!(result, raw);
    }

    #[test]
    fn case_variant_is_lower_cased() {
        let raw = mapping(json!({"NAME": "x", "Nested": {"VaLuE": 3}}));
        let result = normalize(&raw, &server_descriptor());
        assert_eq!(result, mapping(json!({"name": "x", "nested": {"value": 3}})));
    }

    #[test]
    fn unknown_key_passes_through_unrecursed() {
        let raw = mapping(json!({"Other": {"NAME": "kept"}}));
        let result = normalize(&raw, &server_descriptor());
        assert_eq!(result, raw);
    }

    #[test]
    fn map_keys_are_data() {
        let raw = mapping(json!({"LABELS": {"Team": "core", "ENV": "prod"}}));
        let result = normalize(&raw, &server_descriptor());
        assert_eq!(
            result,
            mapping(json!({"labels": {"Team": "core", "ENV": "prod"}}))
        );
    }

    #[test]
    fn scalars_are_never_rewritten() {
        let raw = mapping(json!({"Name": "MiXeD", "nested": "NotAMap"}));
        let result = normalize(&raw, &server_descriptor());
        assert_eq!(result, mapping(json!({"name": "MiXeD", "nested": "NotAMap"})));
    }

    #[test]
    fn empty_sequence_stays_empty() {
        let raw = mapping(json!({"nested": []}));
        let result = normalize(&raw, &server_descriptor());
        assert_eq!(result, raw);
    }

    #[test]
    fn later_colliding_key_wins() {
        let raw = mapping(json!({"name": "first", "NAME": "second"}));
        let result = normalize(&raw, &server_descriptor());
        assert_eq!(result.len(), 1);
        assert_eq!(result["name"], Value::from("second"));
    }

    #[test]
    fn wildcard_wins_over_children() {
        let descriptor: FieldDescriptor = serde_json::from_value(json!({
            "children": {"labels": {"children": {"team": {}}, "wildcard": {}}}
        }))
        .unwrap();
        let raw = mapping(json!({"labels": {"TEAM": "core", "Env": "x"}}));

        let result = normalize(&raw, &descriptor);
        assert_eq!(result, raw);
        assert!(unknown_keys(&raw, &descriptor).is_empty());
    }

    #[test]
    fn unknown_keys_reports_paths() {
        let descriptor = FieldDescriptor::record([
            ("name", FieldDescriptor::leaf()),
            (
                "servers",
                FieldDescriptor::record([("host", FieldDescriptor::leaf())]),
            ),
            ("labels", FieldDescriptor::map(FieldDescriptor::leaf())),
        ]);
        let raw = mapping(json!({
            "Name": "x",
            "nmae": "typo",
            "servers": [{"host": "a"}, {"hots": "b"}],
            "labels": {"anything": "goes"}
        }));

        assert_eq!(unknown_keys(&raw, &descriptor), ["nmae", "servers[1].hots"]);
    }

    #[test]
    fn unknown_keys_ignores_leaf_nodes() {
        let raw = mapping(json!({"anything": {"at": "all"}}));
        assert!(unknown_keys(&raw, &FieldDescriptor::leaf()).is_empty());
    }
}
