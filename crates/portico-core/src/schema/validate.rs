//! Request validation against a compiled schema.
//!
//! Validation normalizes as it checks: aliased fields are accepted under
//! either name and emitted under their wire name (the name the upstream
//! tool expects), defaults fill absent optional fields, and unknown fields
//! are dropped.

use super::{CompiledSchema, NodeId, Prim, SchemaNode};
use serde_json::Value;
use thiserror::Error;

/// A validation failure with the offending path.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{path}: {message}")]
pub struct ValidationError {
    /// Dotted path to the failing value, "$" for the root.
    pub path: String,
    /// What went wrong.
    pub message: String,
}

impl ValidationError {
    fn new(path: &str, message: impl Into<String>) -> Self {
        Self { path: path.to_string(), message: message.into() }
    }
}

impl CompiledSchema {
    /// Validates `value` against the schema root and returns the normalized
    /// argument object keyed by wire names.
    ///
    /// # Errors
    /// Returns every violation found, not just the first.
    pub fn validate(&self, value: &Value) -> Result<Value, Vec<ValidationError>> {
        let mut errors = Vec::new();
        let normalized = self.check(self.root_id(), value, "$", &mut errors);
        if errors.is_empty() { Ok(normalized) } else { Err(errors) }
    }

    fn check(
        &self,
        id: NodeId,
        value: &Value,
        path: &str,
        errors: &mut Vec<ValidationError>,
    ) -> Value {
        match self.node(id) {
            SchemaNode::Any => value.clone(),
            SchemaNode::Prim(prim) => {
                if !prim_matches(*prim, value) {
                    errors.push(ValidationError::new(
                        path,
                        format!("expected {}, got {}", prim_name(*prim), type_name(value)),
                    ));
                }
                value.clone()
            }
            SchemaNode::Enum(allowed) => {
                if !allowed.contains(value) {
                    errors.push(ValidationError::new(
                        path,
                        format!("value not in enum ({} alternatives)", allowed.len()),
                    ));
                }
                value.clone()
            }
            SchemaNode::Arr(items) => match value {
                Value::Array(elems) => {
                    let items = *items;
                    let checked = elems
                        .iter()
                        .enumerate()
                        .map(|(i, elem)| {
                            self.check(items, elem, &format!("{}[{}]", path, i), errors)
                        })
                        .collect();
                    Value::Array(checked)
                }
                other => {
                    errors.push(ValidationError::new(
                        path,
                        format!("expected array, got {}", type_name(other)),
                    ));
                    other.clone()
                }
            },
            SchemaNode::Union { alts, nullable } => {
                if value.is_null() && *nullable {
                    return Value::Null;
                }
                for alt in alts {
                    let mut probe = Vec::new();
                    let normalized = self.check(*alt, value, path, &mut probe);
                    if probe.is_empty() {
                        return normalized;
                    }
                }
                errors.push(ValidationError::new(path, "no union alternative matched"));
                value.clone()
            }
            SchemaNode::Obj(fields) => {
                let Some(map) = value.as_object() else {
                    errors.push(ValidationError::new(
                        path,
                        format!("expected object, got {}", type_name(value)),
                    ));
                    return value.clone();
                };
                let mut normalized = serde_json::Map::new();
                for field in fields {
                    // Accept the wire name (what the tool schema declares)
                    // or the stored alias.
                    let present = map
                        .get(&field.wire_name)
                        .or_else(|| map.get(&field.stored_name));
                    let field_path = format!("{}.{}", path, field.wire_name);
                    match present {
                        Some(v) => {
                            let checked = self.check(field.node, v, &field_path, errors);
                            normalized.insert(field.wire_name.clone(), checked);
                        }
                        None if field.required => {
                            errors.push(ValidationError::new(&field_path, "missing required field"));
                        }
                        None => {
                            if let Some(ref default) = field.default {
                                normalized.insert(field.wire_name.clone(), default.clone());
                            }
                        }
                    }
                }
                Value::Object(normalized)
            }
        }
    }
}

fn prim_matches(prim: Prim, value: &Value) -> bool {
    match prim {
        Prim::String => value.is_string(),
        Prim::Integer => value.as_i64().is_some() || value.as_u64().is_some(),
        Prim::Number => value.is_number(),
        Prim::Boolean => value.is_boolean(),
        Prim::Null => value.is_null(),
    }
}

fn prim_name(prim: Prim) -> &'static str {
    match prim {
        Prim::String => "string",
        Prim::Integer => "integer",
        Prim::Number => "number",
        Prim::Boolean => "boolean",
        Prim::Null => "null",
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::super::CompiledSchema;
    use serde_json::json;

    fn schema(properties: serde_json::Value, required: serde_json::Value) -> CompiledSchema {
        CompiledSchema::compile(&json!({
            "type": "object",
            "properties": properties,
            "required": required,
        }))
    }

    #[test]
    fn test_valid_object_passes() {
        let s = schema(json!({"city": {"type": "string"}}), json!(["city"]));
        let out = s.validate(&json!({"city": "Oslo"})).unwrap();
        assert_eq!(out, json!({"city": "Oslo"}));
    }

    #[test]
    fn test_missing_required_field_fails() {
        let s = schema(json!({"city": {"type": "string"}}), json!(["city"]));
        let errors = s.validate(&json!({})).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("missing required field"));
    }

    #[test]
    fn test_wrong_type_fails_with_path() {
        let s = schema(json!({"count": {"type": "integer"}}), json!([]));
        let errors = s.validate(&json!({"count": "three"})).unwrap_err();
        assert_eq!(errors[0].path, "$.count");
    }

    #[test]
    fn test_integer_accepts_whole_numbers_only() {
        let s = schema(json!({"count": {"type": "integer"}}), json!([]));
        assert!(s.validate(&json!({"count": 3})).is_ok());
        assert!(s.validate(&json!({"count": 3.5})).is_err());
    }

    #[test]
    fn test_number_accepts_integers() {
        let s = schema(json!({"ratio": {"type": "number"}}), json!([]));
        assert!(s.validate(&json!({"ratio": 3})).is_ok());
    }

    #[test]
    fn test_unknown_fields_are_dropped() {
        let s = schema(json!({"a": {"type": "string"}}), json!([]));
        let out = s.validate(&json!({"a": "x", "zzz": 1})).unwrap();
        assert_eq!(out, json!({"a": "x"}));
    }

    #[test]
    fn test_defaults_fill_absent_optionals() {
        let s = schema(json!({"limit": {"type": "integer", "default": 10}}), json!([]));
        let out = s.validate(&json!({})).unwrap();
        assert_eq!(out, json!({"limit": 10}));
    }

    #[test]
    fn test_absent_optional_without_default_stays_absent() {
        let s = schema(json!({"limit": {"type": "integer"}}), json!([]));
        let out = s.validate(&json!({})).unwrap();
        assert_eq!(out, json!({}));
    }

    #[test]
    fn test_nullable_union_accepts_null() {
        let s = schema(json!({"v": {"type": ["string", "null"]}}), json!([]));
        assert!(s.validate(&json!({"v": null})).is_ok());
        assert!(s.validate(&json!({"v": "x"})).is_ok());
        assert!(s.validate(&json!({"v": 5})).is_err());
    }

    #[test]
    fn test_enum_rejects_other_values() {
        let s = schema(json!({"color": {"enum": ["red", "green"]}}), json!([]));
        assert!(s.validate(&json!({"color": "red"})).is_ok());
        let errors = s.validate(&json!({"color": "blue"})).unwrap_err();
        assert!(errors[0].message.contains("enum"));
    }

    #[test]
    fn test_union_tries_each_alternative() {
        let s = schema(
            json!({"v": {"anyOf": [{"type": "integer"}, {"type": "string"}]}}),
            json!([]),
        );
        assert!(s.validate(&json!({"v": 1})).is_ok());
        assert!(s.validate(&json!({"v": "x"})).is_ok());
        assert!(s.validate(&json!({"v": true})).is_err());
    }

    #[test]
    fn test_array_items_validated_with_index_path() {
        let s = schema(
            json!({"tags": {"type": "array", "items": {"type": "string"}}}),
            json!([]),
        );
        let errors = s.validate(&json!({"tags": ["ok", 2]})).unwrap_err();
        assert_eq!(errors[0].path, "$.tags[1]");
    }

    #[test]
    fn test_aliased_field_accepted_under_both_names() {
        let s = schema(json!({"_secret": {"type": "string"}}), json!(["_secret"]));
        let from_wire = s.validate(&json!({"_secret": "x"})).unwrap();
        assert_eq!(from_wire, json!({"_secret": "x"}));
        let from_alias = s.validate(&json!({"secret": "x"})).unwrap();
        // Normalized output always uses the wire name the tool expects.
        assert_eq!(from_alias, json!({"_secret": "x"}));
    }

    #[test]
    fn test_nested_object_errors_accumulate() {
        let s = schema(
            json!({"loc": {"type": "object", "properties": {
                "lat": {"type": "number"}, "lon": {"type": "number"}},
                "required": ["lat", "lon"]}}),
            json!(["loc"]),
        );
        let errors = s.validate(&json!({"loc": {"lat": "north"}})).unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_recursive_schema_validates_finite_values() {
        let s = CompiledSchema::compile(&json!({
            "type": "object",
            "properties": {"tree": {"$ref": "#/$defs/Node"}},
            "$defs": {"Node": {"type": "object", "properties": {
                "value": {"type": "string"},
                "children": {"type": "array", "items": {"$ref": "#/$defs/Node"}},
            }}},
        }));
        let value = json!({"tree": {"value": "root", "children": [
            {"value": "leaf", "children": []},
        ]}});
        assert!(s.validate(&value).is_ok());
        let bad = json!({"tree": {"value": "root", "children": [{"value": 5}]}});
        assert!(s.validate(&bad).is_err());
    }
}
