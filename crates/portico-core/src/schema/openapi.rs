//! OpenAPI fragment emission from compiled schemas.

use super::{CompiledSchema, NodeId, Prim, SchemaNode};
use serde_json::{Value, json};

/// Emits an OpenAPI-style JSON Schema for the compiled schema root.
///
/// Recursive nodes emit an unconstrained schema at the point of recursion
/// rather than expanding forever.
pub fn to_openapi_schema(schema: &CompiledSchema) -> Value {
    emit(schema, schema.root_id(), &mut Vec::new())
}

fn emit(schema: &CompiledSchema, id: NodeId, stack: &mut Vec<NodeId>) -> Value {
    if stack.contains(&id) {
        return json!({});
    }
    stack.push(id);
    let result = match schema.node(id) {
        SchemaNode::Any => json!({}),
        SchemaNode::Prim(prim) => json!({"type": prim_type(*prim)}),
        SchemaNode::Enum(values) => json!({"enum": values}),
        SchemaNode::Arr(items) => {
            json!({"type": "array", "items": emit(schema, *items, stack)})
        }
        SchemaNode::Union { alts, nullable } => {
            let mut any_of: Vec<Value> =
                alts.iter().map(|alt| emit(schema, *alt, stack)).collect();
            if *nullable {
                any_of.push(json!({"type": "null"}));
            }
            json!({"anyOf": any_of})
        }
        SchemaNode::Obj(fields) => {
            let mut properties = serde_json::Map::new();
            let mut required = Vec::new();
            for field in fields {
                let mut prop = emit(schema, field.node, stack);
                if let Some(ref description) = field.description {
                    if let Some(obj) = prop.as_object_mut() {
                        obj.insert("description".to_string(), json!(description));
                    }
                }
                if let Some(ref default) = field.default {
                    if let Some(obj) = prop.as_object_mut() {
                        obj.insert("default".to_string(), default.clone());
                    }
                }
                properties.insert(field.wire_name.clone(), prop);
                if field.required {
                    required.push(json!(field.wire_name));
                }
            }
            let mut out = json!({"type": "object", "properties": properties});
            if !required.is_empty() {
                out["required"] = json!(required);
            }
            out
        }
    };
    stack.pop();
    result
}

fn prim_type(prim: Prim) -> &'static str {
    match prim {
        Prim::String => "string",
        Prim::Integer => "integer",
        Prim::Number => "number",
        Prim::Boolean => "boolean",
        Prim::Null => "null",
    }
}
