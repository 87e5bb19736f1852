//! Default value derivation.

use serde_json::{Map, Value};
use tracing::warn;

const MAX_REF_DEPTH: usize = 32;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Position {
    Root,
    Required,
    Optional,
}

/// Derives the default value described by a schema document.
///
/// The walk is deterministic:
///
/// - a `default` keyword wins outright
/// - a local `$ref` (`#/definitions/..`, `#/$defs/..`) is followed
/// - object defaults from `allOf` branches are merged
/// - an object schema yields an object built from its properties' defaults
/// - a `required` property with nothing derivable gets the zero value of its
///   declared type
/// - anything else yields `None`
///
/// # Example
///
/// ```rust
/// use replicant_schema::compute_default;
/// use serde_json::json;
///
/// let schema = json!({
///     "type": "object",
///     "properties": {
///         "name": { "type": "string" },
///         "lives": { "type": "integer", "default": 3 }
///     },
///     "required": ["name"]
/// });
/// assert_eq!(compute_default(&schema), Some(json!({ "name": "", "lives": 3 })));
/// ```
pub fn compute_default(schema: &Value) -> Option<Value> {
    Walker { root: schema }.derive(schema, Position::Root, 0)
}

/// Returns true if a `default` keyword is reachable along the same walk
/// [`compute_default`] takes: the root, local `$ref` targets, `allOf`
/// branches and nested `properties`.
pub(crate) fn declares_default(schema: &Value) -> bool {
    Walker { root: schema }.declares(schema, 0)
}

struct Walker<'a> {
    root: &'a Value,
}

impl<'a> Walker<'a> {
    fn declares(&self, schema: &'a Value, depth: usize) -> bool {
        let Value::Object(keywords) = schema else {
            return false;
        };
        if keywords.contains_key("default") {
            return true;
        }
        if depth >= MAX_REF_DEPTH {
            return false;
        }
        if let Some(Value::String(reference)) = keywords.get("$ref") {
            return reference
                .strip_prefix('#')
                .and_then(|pointer| self.root.pointer(pointer))
                .is_some_and(|target| self.declares(target, depth + 1));
        }
        let in_all_of = match keywords.get("allOf") {
            Some(Value::Array(branches)) => branches.iter().any(|b| self.declares(b, depth + 1)),
            _ => false,
        };
        let in_properties = match keywords.get("properties") {
            Some(Value::Object(properties)) => properties.values().any(|p| self.declares(p, depth + 1)),
            _ => false,
        };
        in_all_of || in_properties
    }

    fn derive(&self, schema: &'a Value, position: Position, depth: usize) -> Option<Value> {
        let Value::Object(keywords) = schema else {
            return None;
        };

        if let Some(default) = keywords.get("default") {
            return Some(default.clone());
        }

        if let Some(Value::String(reference)) = keywords.get("$ref") {
            return self.follow(reference, position, depth);
        }

        let mut merged = self.derive_all_of(keywords, position, depth);

        if is_object_schema(keywords) {
            let object = merged.get_or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(map) = object {
                self.fill_properties(keywords, map, depth);
            }
        }

        match merged {
            Some(Value::Object(map)) if map.is_empty() && position == Position::Optional => None,
            Some(value) => Some(value),
            None if position == Position::Required => Some(zero_value(keywords)),
            None => None,
        }
    }

    fn follow(&self, reference: &str, position: Position, depth: usize) -> Option<Value> {
        if depth >= MAX_REF_DEPTH {
            warn!(reference, "schema $ref nesting too deep, ignoring default");
            return None;
        }
        let Some(pointer) = reference.strip_prefix('#') else {
            // Remote references are not fetched for defaults.
            return None;
        };
        let target = self.root.pointer(pointer)?;
        self.derive(target, position, depth + 1)
    }

    fn derive_all_of(
        &self,
        keywords: &'a Map<String, Value>,
        position: Position,
        depth: usize,
    ) -> Option<Value> {
        let Some(Value::Array(branches)) = keywords.get("allOf") else {
            return None;
        };

        let mut merged: Option<Value> = None;
        for branch in branches {
            // Branches are partial views; only the enclosing schema decides requiredness.
            let branch_position = if position == Position::Required {
                Position::Optional
            } else {
                position
            };
            let Some(value) = self.derive(branch, branch_position, depth + 1) else {
                continue;
            };
            match merged {
                None => merged = Some(value),
                Some(Value::Object(ref mut acc)) => {
                    if let Value::Object(extra) = value {
                        for (key, value) in extra {
                            acc.entry(key).or_insert(value);
                        }
                    }
                }
                Some(_) => {}
            }
        }
        merged
    }

    fn fill_properties(&self, keywords: &'a Map<String, Value>, map: &mut Map<String, Value>, depth: usize) {
        let Some(Value::Object(properties)) = keywords.get("properties") else {
            return;
        };
        let required: Vec<&str> = match keywords.get("required") {
            Some(Value::Array(names)) => names.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };

        for (key, property) in properties {
            if map.contains_key(key) {
                continue;
            }
            let position = if required.contains(&key.as_str()) {
                Position::Required
            } else {
                Position::Optional
            };
            if let Some(value) = self.derive(property, position, depth + 1) {
                map.insert(key.clone(), value);
            }
        }
    }
}

fn declared_type(keywords: &Map<String, Value>) -> Option<&str> {
    match keywords.get("type")? {
        Value::String(name) => Some(name),
        Value::Array(names) => names.iter().filter_map(Value::as_str).find(|t| *t != "null").or(Some("null")),
        _ => None,
    }
}

fn is_object_schema(keywords: &Map<String, Value>) -> bool {
    match declared_type(keywords) {
        Some(kind) => kind == "object",
        None => keywords.contains_key("properties"),
    }
}

fn zero_value(keywords: &Map<String, Value>) -> Value {
    match declared_type(keywords) {
        Some("string") => Value::String(String::new()),
        Some("integer") | Some("number") => Value::from(0),
        Some("boolean") => Value::Bool(false),
        Some("array") => Value::Array(Vec::new()),
        Some("object") => Value::Object(Map::new()),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn explicit_default_wins() {
        let schema = json!({
            "type": "object",
            "default": { "a": 1 },
            "properties": { "a": { "type": "integer", "default": 2 } }
        });
        assert_eq!(compute_default(&schema), Some(json!({ "a": 1 })));
    }

    #[test]
    fn nested_and_referenced_defaults_are_declared() {
        let nested = json!({
            "type": "object",
            "properties": { "lives": { "type": "integer", "default": 3 } }
        });
        let referenced = json!({
            "$ref": "#/$defs/team",
            "$defs": { "team": { "type": "string", "default": "red" } }
        });
        let zero_only = json!({
            "type": "object",
            "properties": { "name": { "type": "string" } },
            "required": ["name"]
        });
        let looping = json!({ "$ref": "#" });

        assert!(declares_default(&nested));
        assert!(declares_default(&referenced));
        assert!(!declares_default(&zero_only));
        assert!(!declares_default(&looping));
    }

    #[test]
    fn scalar_without_default_is_none() {
        assert_eq!(compute_default(&json!({ "type": "number" })), None);
    }

    #[test]
    fn required_properties_get_zero_values() {
        let schema = json!({
            "type": "object",
            "properties": {
                "s": { "type": "string" },
                "n": { "type": "number" },
                "b": { "type": "boolean" },
                "a": { "type": "array" },
                "o": { "type": "object" },
                "x": {},
                "skipped": { "type": "string" }
            },
            "required": ["s", "n", "b", "a", "o", "x"]
        });
        assert_eq!(
            compute_default(&schema),
            Some(json!({ "s": "", "n": 0, "b": false, "a": [], "o": {}, "x": null }))
        );
    }

    #[test]
    fn nullable_type_uses_non_null_member() {
        let schema = json!({
            "type": "object",
            "properties": { "s": { "type": ["null", "string"] } },
            "required": ["s"]
        });
        assert_eq!(compute_default(&schema), Some(json!({ "s": "" })));
    }

    #[test]
    fn nested_objects_without_defaults_are_omitted() {
        let schema = json!({
            "type": "object",
            "properties": {
                "meta": { "type": "object", "properties": { "tag": { "type": "string" } } },
                "stats": { "type": "object", "properties": { "hp": { "default": 10 } } }
            }
        });
        assert_eq!(compute_default(&schema), Some(json!({ "stats": { "hp": 10 } })));
    }

    #[test]
    fn follows_local_refs() {
        let schema = json!({
            "type": "object",
            "properties": {
                "player": { "$ref": "#/definitions/player" },
                "other": { "$ref": "#/$defs/other" }
            },
            "definitions": {
                "player": { "type": "object", "properties": { "hp": { "default": 100 } } }
            },
            "$defs": { "other": { "type": "string", "default": "x" } }
        });
        assert_eq!(
            compute_default(&schema),
            Some(json!({ "player": { "hp": 100 }, "other": "x" }))
        );
    }

    #[test]
    fn self_referencing_schema_terminates() {
        let schema = json!({
            "type": "object",
            "properties": { "child": { "$ref": "#" } },
            "required": ["child"]
        });
        assert!(compute_default(&schema).is_some());
    }

    #[test]
    fn merges_all_of_branches() {
        let schema = json!({
            "allOf": [
                { "type": "object", "properties": { "a": { "default": 1 } } },
                { "type": "object", "properties": { "b": { "default": 2 } } }
            ]
        });
        assert_eq!(compute_default(&schema), Some(json!({ "a": 1, "b": 2 })));
    }

    #[test]
    fn top_level_object_without_defaults_is_empty_object() {
        let schema = json!({ "type": "object", "properties": { "a": { "type": "string" } } });
        assert_eq!(compute_default(&schema), Some(json!({})));
    }
}
