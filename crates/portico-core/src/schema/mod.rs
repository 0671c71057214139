//! JSON Schema translation for tool endpoints.
//!
//! Each tool's input schema is compiled once into an arena of
//! [`SchemaNode`]s. Nodes reference each other by index, never by pointer,
//! so recursive `$ref`s cannot form ownership cycles. The compiled schema
//! doubles as a request validator and as the source for OpenAPI fragments.

mod openapi;
mod validate;

pub use openapi::to_openapi_schema;
pub use validate::ValidationError;

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Primitive JSON types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prim {
    /// UTF-8 string.
    String,
    /// Integral number.
    Integer,
    /// Any number.
    Number,
    /// Boolean.
    Boolean,
    /// The null literal.
    Null,
}

impl Prim {
    fn from_type_name(name: &str) -> Option<Prim> {
        match name {
            "string" => Some(Prim::String),
            "integer" => Some(Prim::Integer),
            "number" => Some(Prim::Number),
            "boolean" => Some(Prim::Boolean),
            "null" => Some(Prim::Null),
            _ => None,
        }
    }
}

/// Index of a node in the compiled arena.
pub type NodeId = usize;

/// One field of an object node.
#[derive(Debug, Clone)]
pub struct FieldDef {
    /// Internal field name. Differs from `wire_name` only for aliased
    /// fields whose original name starts with underscores.
    pub stored_name: String,
    /// Name used on the wire, both inbound and toward the upstream.
    pub wire_name: String,
    /// Field type.
    pub node: NodeId,
    /// Whether the field must be present.
    pub required: bool,
    /// Default applied when an optional field is absent.
    pub default: Option<Value>,
    /// Description carried into OpenAPI fragments.
    pub description: Option<String>,
}

/// A compiled schema node.
#[derive(Debug, Clone)]
pub enum SchemaNode {
    /// Accepts anything.
    Any,
    /// A primitive type.
    Prim(Prim),
    /// A closed set of literal values.
    Enum(Vec<Value>),
    /// An object with known fields. Unknown fields are dropped.
    Obj(Vec<FieldDef>),
    /// An array with uniform item type.
    Arr(NodeId),
    /// One of several alternatives; `nullable` admits null besides them.
    Union { alts: Vec<NodeId>, nullable: bool },
}

/// A tool input schema compiled into an arena.
#[derive(Debug, Clone)]
pub struct CompiledSchema {
    nodes: Vec<SchemaNode>,
    root: NodeId,
}

impl CompiledSchema {
    /// Compiles a JSON Schema object (`properties` + `required` + `$defs`).
    pub fn compile(schema: &Value) -> CompiledSchema {
        let defs = schema
            .get("$defs")
            .or_else(|| schema.get("definitions"))
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let mut compiler = Compiler {
            nodes: Vec::new(),
            defs,
            ref_cache: HashMap::new(),
            in_progress: Vec::new(),
        };
        let root = compiler.build(schema);
        CompiledSchema { nodes: compiler.nodes, root }
    }

    /// The root node.
    pub fn root(&self) -> &SchemaNode {
        &self.nodes[self.root]
    }

    pub(crate) fn node(&self, id: NodeId) -> &SchemaNode {
        &self.nodes[id]
    }

    pub(crate) fn root_id(&self) -> NodeId {
        self.root
    }

    /// True when the root object has no fields, meaning the endpoint takes
    /// no request body.
    pub fn is_parameterless(&self) -> bool {
        matches!(self.root(), SchemaNode::Obj(fields) if fields.is_empty())
    }

    /// The alias table: wire name -> stored name, for fields that were
    /// renamed. Empty for schemas without leading-underscore fields.
    pub fn aliases(&self) -> BTreeMap<String, String> {
        let mut aliases = BTreeMap::new();
        for node in &self.nodes {
            if let SchemaNode::Obj(fields) = node {
                for field in fields {
                    if field.stored_name != field.wire_name {
                        aliases.insert(field.wire_name.clone(), field.stored_name.clone());
                    }
                }
            }
        }
        aliases
    }
}

/// True when a field name needs aliasing (it starts with an underscore).
pub fn name_needs_alias(name: &str) -> bool {
    name.starts_with('_')
}

/// Strips leading underscores, appending a numeric suffix on collision with
/// any name already in `taken`.
pub fn generate_alias_name(original: &str, taken: &[String]) -> String {
    let base = original.trim_start_matches('_');
    let base = if base.is_empty() { "field".to_string() } else { base.to_string() };
    let mut candidate = base.clone();
    let mut suffix = 1;
    while taken.iter().any(|n| n == &candidate) {
        candidate = format!("{}_{}", base, suffix);
        suffix += 1;
    }
    candidate
}

struct Compiler {
    nodes: Vec<SchemaNode>,
    defs: serde_json::Map<String, Value>,
    ref_cache: HashMap<String, NodeId>,
    in_progress: Vec<String>,
}

impl Compiler {
    fn push(&mut self, node: SchemaNode) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn build(&mut self, schema: &Value) -> NodeId {
        let Some(obj) = schema.as_object() else {
            return self.push(SchemaNode::Any);
        };

        // Closed literal set, unless we are inside a union (handled there).
        if let Some(values) = obj.get("enum").and_then(Value::as_array) {
            if !values.is_empty() {
                return self.push(SchemaNode::Enum(values.clone()));
            }
        }

        if let Some(reference) = obj.get("$ref").and_then(Value::as_str) {
            return self.build_ref(reference);
        }

        if let Some(alts) = obj.get("anyOf").or_else(|| obj.get("oneOf")).and_then(Value::as_array)
        {
            return self.build_union(alts);
        }

        if let Some(parts) = obj.get("allOf").and_then(Value::as_array) {
            return self.build_all_of(parts);
        }

        match obj.get("type") {
            Some(Value::Array(types)) => self.build_type_list(obj, types),
            Some(Value::String(type_name)) => self.build_typed(obj, type_name),
            _ => self.push(SchemaNode::Any),
        }
    }

    fn build_ref(&mut self, reference: &str) -> NodeId {
        // Property-path refs that point back up the tree would loop
        // without a $defs entry to anchor on; resolve them to Any.
        if reference.starts_with("#/properties/") {
            return self.push(SchemaNode::Any);
        }
        let name = reference.rsplit('/').next().unwrap_or(reference).to_string();
        if let Some(&cached) = self.ref_cache.get(&name) {
            return cached;
        }
        if self.in_progress.iter().any(|n| n == &name) {
            // Self-recursive reference: reserve a slot now and fill it when
            // the outer build of this def completes.
            let placeholder = self.push(SchemaNode::Any);
            self.ref_cache.insert(name, placeholder);
            return placeholder;
        }
        let Some(def_schema) = self.defs.get(&name).cloned() else {
            tracing::warn!("Reference {} not found in schema definitions", reference);
            return self.push(SchemaNode::Any);
        };
        self.in_progress.push(name.clone());
        let built = self.build(&def_schema);
        self.in_progress.pop();
        match self.ref_cache.get(&name) {
            Some(&placeholder) => {
                // A recursive inner ref reserved the slot; point it at the
                // finished node.
                self.nodes[placeholder] = self.nodes[built].clone();
                placeholder
            }
            None => {
                self.ref_cache.insert(name, built);
                built
            }
        }
    }

    fn build_union(&mut self, alts: &[Value]) -> NodeId {
        let mut ids = Vec::new();
        let mut nullable = false;
        for alt in alts {
            if alt.get("type").and_then(Value::as_str) == Some("null") {
                nullable = true;
                continue;
            }
            // Enum alternatives coarsen to their base primitive inside a union.
            if let Some(values) = alt.get("enum").and_then(Value::as_array) {
                let prim = values.first().map_or(SchemaNode::Any, |v| match v {
                    Value::String(_) => SchemaNode::Prim(Prim::String),
                    Value::Number(n) if n.is_i64() || n.is_u64() => SchemaNode::Prim(Prim::Integer),
                    Value::Number(_) => SchemaNode::Prim(Prim::Number),
                    Value::Bool(_) => SchemaNode::Prim(Prim::Boolean),
                    _ => SchemaNode::Any,
                });
                ids.push(self.push(prim));
                continue;
            }
            ids.push(self.build(alt));
        }
        if ids.is_empty() {
            let any = self.push(SchemaNode::Any);
            ids.push(any);
        }
        self.push(SchemaNode::Union { alts: ids, nullable })
    }

    fn build_all_of(&mut self, parts: &[Value]) -> NodeId {
        let mut merged_props = serde_json::Map::new();
        let mut merged_required: Vec<Value> = Vec::new();
        for part in parts {
            let resolved = self.resolve_def(part);
            let Some(obj) = resolved.as_object() else {
                return self.build(&resolved);
            };
            if obj.get("type").and_then(Value::as_str) != Some("object") {
                // A non-object branch wins; intersecting with it cannot
                // produce a stricter object.
                return self.build(&resolved);
            }
            if let Some(props) = obj.get("properties").and_then(Value::as_object) {
                for (k, v) in props {
                    merged_props.insert(k.clone(), v.clone());
                }
            }
            if let Some(required) = obj.get("required").and_then(Value::as_array) {
                for r in required {
                    if !merged_required.contains(r) {
                        merged_required.push(r.clone());
                    }
                }
            }
        }
        let composed = serde_json::json!({
            "type": "object",
            "properties": Value::Object(merged_props),
            "required": merged_required,
        });
        self.build(&composed)
    }

    fn resolve_def(&self, schema: &Value) -> Value {
        if let Some(reference) = schema.get("$ref").and_then(Value::as_str) {
            let name = reference.rsplit('/').next().unwrap_or(reference);
            if let Some(def) = self.defs.get(name) {
                return def.clone();
            }
        }
        schema.clone()
    }

    fn build_type_list(&mut self, obj: &serde_json::Map<String, Value>, types: &[Value]) -> NodeId {
        let mut ids = Vec::new();
        let mut nullable = false;
        for type_value in types {
            let Some(type_name) = type_value.as_str() else { continue };
            if type_name == "null" {
                nullable = true;
                continue;
            }
            let id = self.build_typed(obj, type_name);
            ids.push(id);
        }
        match ids.len() {
            0 => self.push(if nullable { SchemaNode::Prim(Prim::Null) } else { SchemaNode::Any }),
            1 if !nullable => ids[0],
            _ => self.push(SchemaNode::Union { alts: ids, nullable }),
        }
    }

    fn build_typed(&mut self, obj: &serde_json::Map<String, Value>, type_name: &str) -> NodeId {
        if let Some(prim) = Prim::from_type_name(type_name) {
            return self.push(SchemaNode::Prim(prim));
        }
        match type_name {
            "object" => self.build_object(obj),
            "array" => {
                let items = match obj.get("items") {
                    Some(items) => self.build(items),
                    None => self.push(SchemaNode::Any),
                };
                self.push(SchemaNode::Arr(items))
            }
            _ => self.push(SchemaNode::Any),
        }
    }

    fn build_object(&mut self, obj: &serde_json::Map<String, Value>) -> NodeId {
        let empty = serde_json::Map::new();
        let properties = obj.get("properties").and_then(Value::as_object).unwrap_or(&empty);
        let required: Vec<&str> = obj
            .get("required")
            .and_then(Value::as_array)
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let mut fields: Vec<FieldDef> = Vec::new();
        for (name, prop_schema) in properties {
            let node = self.build(prop_schema);
            let is_required = required.contains(&name.as_str());
            let stored_name = if name_needs_alias(name) {
                let taken: Vec<String> = properties
                    .keys()
                    .cloned()
                    .chain(fields.iter().map(|f| f.stored_name.clone()))
                    .collect();
                generate_alias_name(name, &taken)
            } else {
                name.clone()
            };
            fields.push(FieldDef {
                stored_name,
                wire_name: name.clone(),
                node,
                required: is_required,
                default: prop_schema.get("default").cloned(),
                description: prop_schema
                    .get("description")
                    .and_then(Value::as_str)
                    .map(String::from),
            });
        }
        self.push(SchemaNode::Obj(fields))
    }
}
