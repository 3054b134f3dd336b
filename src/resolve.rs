//! `$ref` / `allOf` resolution for OpenAPI schema fragments.
//!
//! Only intra-document references (`#/a/b/c`) are followed. Every recursion
//! branch carries its own set of visited references: a reference seen twice
//! on the same branch collapses to a generic object schema, while sibling
//! branches (e.g. two properties pointing at the same component) each resolve
//! it in full.
//!
//! `allOf` is a shallow, last-write-wins merge of the resolved members. It is
//! not a JSON-schema intersection: `required` arrays are not unioned, the
//! right-most member simply replaces them.

use std::collections::HashSet;

use serde_json::{json, Map, Value};

/// Look up an intra-document JSON pointer such as `#/components/schemas/Restaurant`.
///
/// Returns `None` for external references and for paths that do not exist.
pub fn resolve_pointer<'a>(document: &'a Value, pointer: &str) -> Option<&'a Value> {
    if pointer == "#" {
        return Some(document);
    }
    let rest = pointer.strip_prefix("#/")?;

    let mut node = document;
    for raw in rest.split('/') {
        let segment = raw.replace("~1", "/").replace("~0", "~");
        node = match node {
            Value::Object(map) => map.get(&segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(node)
}

/// Fully dereference and merge a schema fragment against `document`.
///
/// A `$ref` that points nowhere resolves to `Value::Null`; callers treat that
/// as "no schema".
pub fn resolve_schema(document: &Value, schema: &Value) -> Value {
    resolve_node(document, schema, &HashSet::new())
}

fn resolve_node(document: &Value, node: &Value, seen: &HashSet<String>) -> Value {
    let map = match node {
        Value::Object(map) => map,
        other => return other.clone(),
    };

    if let Some(reference) = map.get("$ref").and_then(Value::as_str) {
        if seen.contains(reference) {
            return cycle_placeholder();
        }
        let target = match resolve_pointer(document, reference) {
            Some(target) => target,
            None => return Value::Null,
        };
        let mut branch = seen.clone();
        branch.insert(reference.to_string());
        return resolve_node(document, target, &branch);
    }

    if let Some(members) = map.get("allOf").and_then(Value::as_array) {
        let mut rest = map.clone();
        rest.remove("allOf");

        let mut merged = match resolve_object(document, &rest, seen) {
            Value::Object(base) => base,
            _ => Map::new(),
        };
        for member in members {
            if let Value::Object(resolved) = resolve_node(document, member, seen) {
                merged.extend(resolved);
            }
        }
        return Value::Object(merged);
    }

    resolve_object(document, map, seen)
}

fn resolve_object(document: &Value, map: &Map<String, Value>, seen: &HashSet<String>) -> Value {
    let mut out = map.clone();

    if let Some(Value::Object(properties)) = map.get("properties") {
        let resolved: Map<String, Value> = properties
            .iter()
            .map(|(name, prop)| (name.clone(), resolve_node(document, prop, seen)))
            .collect();
        out.insert("properties".into(), Value::Object(resolved));
    }

    if let Some(items) = map.get("items") {
        out.insert("items".into(), resolve_node(document, items, seen));
    }

    Value::Object(out)
}

fn cycle_placeholder() -> Value {
    json!({ "type": "object" })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_pointer_walks_nested_objects() {
        let doc = json!({"components": {"schemas": {"Restaurant": {"type": "object"}}}});
        assert_eq!(
            resolve_pointer(&doc, "#/components/schemas/Restaurant"),
            Some(&json!({"type": "object"}))
        );
    }

    #[test]
    fn resolve_pointer_missing_path_is_none() {
        let doc = json!({"components": {}});
        assert!(resolve_pointer(&doc, "#/components/schemas/Nope").is_none());
    }

    #[test]
    fn resolve_pointer_rejects_external_refs() {
        let doc = json!({"a": 1});
        assert!(resolve_pointer(&doc, "other.json#/a").is_none());
    }

    #[test]
    fn resolve_pointer_decodes_escapes_and_indexes_arrays() {
        let doc = json!({"paths": {"/restaurants/{id}": {"parameters": [{"name": "id"}]}}});
        assert_eq!(
            resolve_pointer(&doc, "#/paths/~1restaurants~1{id}/parameters/0/name"),
            Some(&json!("id"))
        );
    }

    #[test]
    fn missing_ref_resolves_to_null() {
        let doc = json!({});
        let schema = json!({"$ref": "#/components/schemas/Missing"});
        assert_eq!(resolve_schema(&doc, &schema), Value::Null);
    }

    #[test]
    fn ref_is_replaced_by_target() {
        let doc = json!({
            "components": {"schemas": {
                "Name": {"type": "string", "minLength": 1}
            }}
        });
        let schema = json!({
            "type": "object",
            "properties": {"name": {"$ref": "#/components/schemas/Name"}}
        });
        let resolved = resolve_schema(&doc, &schema);
        assert_eq!(
            resolved["properties"]["name"],
            json!({"type": "string", "minLength": 1})
        );
    }

    #[test]
    fn ref_cycle_terminates_with_object_schema() {
        let doc = json!({
            "components": {"schemas": {
                "A": {"type": "object", "properties": {"b": {"$ref": "#/components/schemas/B"}}},
                "B": {"type": "object", "properties": {"a": {"$ref": "#/components/schemas/A"}}}
            }}
        });
        let resolved = resolve_schema(&doc, &json!({"$ref": "#/components/schemas/A"}));

        assert!(resolved.is_object());
        assert_eq!(
            resolved["properties"]["b"]["properties"]["a"],
            json!({"type": "object"})
        );
    }

    #[test]
    fn self_reference_terminates() {
        let doc = json!({
            "components": {"schemas": {
                "Node": {"type": "object", "properties": {
                    "children": {"type": "array", "items": {"$ref": "#/components/schemas/Node"}}
                }}
            }}
        });
        let resolved = resolve_schema(&doc, &json!({"$ref": "#/components/schemas/Node"}));
        assert_eq!(
            resolved["properties"]["children"]["items"],
            json!({"type": "object"})
        );
    }

    #[test]
    fn sibling_properties_resolve_same_ref_independently() {
        let doc = json!({
            "components": {"schemas": {
                "Money": {"type": "object", "properties": {"amount": {"type": "number"}}}
            }}
        });
        let schema = json!({
            "type": "object",
            "properties": {
                "min": {"$ref": "#/components/schemas/Money"},
                "max": {"$ref": "#/components/schemas/Money"}
            }
        });
        let resolved = resolve_schema(&doc, &schema);
        let expected = json!({"type": "object", "properties": {"amount": {"type": "number"}}});
        assert_eq!(resolved["properties"]["min"], expected);
        assert_eq!(resolved["properties"]["max"], expected);
    }

    #[test]
    fn all_of_right_most_wins() {
        let doc = json!({});
        let schema = json!({"allOf": [{"a": 1}, {"a": 2, "b": 3}]});
        assert_eq!(resolve_schema(&doc, &schema), json!({"a": 2, "b": 3}));
    }

    #[test]
    fn all_of_does_not_union_required() {
        let doc = json!({
            "components": {"schemas": {
                "Base": {"type": "object", "required": ["id"], "properties": {"id": {"type": "string"}}}
            }}
        });
        let schema = json!({"allOf": [
            {"$ref": "#/components/schemas/Base"},
            {"required": ["name"], "properties": {"name": {"type": "string"}}}
        ]});
        let resolved = resolve_schema(&doc, &schema);
        assert_eq!(resolved["required"], json!(["name"]));
        assert_eq!(resolved["properties"], json!({"name": {"type": "string"}}));
        assert_eq!(resolved["type"], "object");
    }

    #[test]
    fn all_of_members_override_sibling_keys() {
        let doc = json!({});
        let schema = json!({"description": "outer", "title": "T", "allOf": [{"description": "inner"}]});
        assert_eq!(
            resolve_schema(&doc, &schema),
            json!({"description": "inner", "title": "T"})
        );
    }

    #[test]
    fn non_object_fragments_pass_through() {
        let doc = json!({});
        assert_eq!(resolve_schema(&doc, &json!(true)), json!(true));
        assert_eq!(resolve_schema(&doc, &json!(["x"])), json!(["x"]));
    }
}
