//! Tool Schema Normalization
//!
//! Brokers publish loosely written JSON Schemas: arrays without `items`,
//! `type` given as a list, nested objects with no `type` at all. Chat models
//! reject several of these shapes, so every native schema is converted into
//! a typed [`ObjectSchema`] before it reaches the model.
//!
//! Normalization is total (any JSON value yields a schema) and idempotent:
//! rendering a normalized schema and normalizing it again changes nothing.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

/// Type of a single schema node
#[derive(Clone, Debug, PartialEq)]
pub enum SchemaKind {
    String,
    Number,
    Integer,
    Boolean,
    Array(Box<SchemaNode>),
    Object(ObjectSchema),
}

/// One node of a normalized schema
#[derive(Clone, Debug, PartialEq)]
pub struct SchemaNode {
    pub kind: SchemaKind,
    pub description: Option<String>,
    pub enum_values: Option<Vec<Value>>,
}

impl SchemaNode {
    pub const fn new(kind: SchemaKind) -> Self {
        Self {
            kind,
            description: None,
            enum_values: None,
        }
    }

    /// Element type used when a native array omits `items`
    pub const fn string() -> Self {
        Self::new(SchemaKind::String)
    }
}

/// A named field of an object schema
#[derive(Clone, Debug, PartialEq)]
pub struct Property {
    pub schema: SchemaNode,
    pub required: bool,
}

/// Normalized object schema, the root shape of every tool's parameters
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObjectSchema {
    pub properties: BTreeMap<String, Property>,
}

impl ObjectSchema {
    /// Names of required properties, sorted
    pub fn required(&self) -> Vec<&str> {
        self.properties
            .iter()
            .filter(|(_, p)| p.required)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn is_required(&self, name: &str) -> bool {
        self.properties.get(name).is_some_and(|p| p.required)
    }

    /// Render as a JSON Schema object accepted by function-calling APIs
    pub fn to_json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .properties
            .iter()
            .map(|(name, prop)| (name.clone(), render_node(&prop.schema)))
            .collect();

        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": self.required(),
        })
    }
}

/// Normalize a tool's native input schema.
///
/// The root is always an object; a root of any other shape yields an empty
/// parameter list.
pub fn normalize_parameters(native: &Value) -> ObjectSchema {
    match normalize_node(native).kind {
        SchemaKind::Object(object) => object,
        _ => ObjectSchema::default(),
    }
}

/// Normalize a single schema node, recursing into arrays and objects
pub fn normalize_node(native: &Value) -> SchemaNode {
    let Some(map) = native.as_object() else {
        return SchemaNode::string();
    };

    if declared_type(map).is_none() {
        // Untyped union: adopt its first concrete branch
        if let Some(branch) = first_union_branch(map) {
            let mut node = normalize_node(branch);
            if let Some(description) = description_of(map) {
                node.description = Some(description);
            }
            return node;
        }
    }

    let kind = match inferred_type(map) {
        "number" => SchemaKind::Number,
        "integer" => SchemaKind::Integer,
        "boolean" => SchemaKind::Boolean,
        "array" => {
            let items = match map.get("items") {
                Some(items @ Value::Object(_)) => normalize_node(items),
                Some(Value::Array(tuple)) => tuple.first().map_or_else(SchemaNode::string, normalize_node),
                _ => SchemaNode::string(),
            };
            SchemaKind::Array(Box::new(items))
        }
        "object" => SchemaKind::Object(normalize_object(map)),
        _ => SchemaKind::String,
    };

    SchemaNode {
        kind,
        description: description_of(map),
        enum_values: map.get("enum").and_then(Value::as_array).cloned(),
    }
}

fn normalize_object(map: &Map<String, Value>) -> ObjectSchema {
    let required: Vec<&str> = map
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let properties = map
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| {
            props
                .iter()
                .map(|(name, schema)| {
                    let property = Property {
                        schema: normalize_node(schema),
                        required: required.contains(&name.as_str()),
                    };
                    (name.clone(), property)
                })
                .collect()
        })
        .unwrap_or_default();

    ObjectSchema { properties }
}

/// The `type` keyword, taking the first non-null entry of a type list
fn declared_type(map: &Map<String, Value>) -> Option<&str> {
    match map.get("type")? {
        Value::String(t) => Some(t.as_str()),
        Value::Array(types) => types
            .iter()
            .filter_map(Value::as_str)
            .find(|t| *t != "null"),
        _ => None,
    }
}

fn inferred_type(map: &Map<String, Value>) -> &str {
    if let Some(declared) = declared_type(map) {
        return declared;
    }
    if map.contains_key("properties") {
        "object"
    } else if map.contains_key("items") {
        "array"
    } else {
        "string"
    }
}

fn first_union_branch(map: &Map<String, Value>) -> Option<&Value> {
    ["anyOf", "oneOf"]
        .iter()
        .filter_map(|key| map.get(*key).and_then(Value::as_array))
        .flatten()
        .find(|branch| branch.get("type").and_then(Value::as_str) != Some("null"))
}

fn description_of(map: &Map<String, Value>) -> Option<String> {
    map.get("description")
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

fn render_node(node: &SchemaNode) -> Value {
    let mut out = match &node.kind {
        SchemaKind::Object(object) => object.to_json_schema(),
        SchemaKind::Array(items) => serde_json::json!({"type": "array", "items": render_node(items)}),
        SchemaKind::String => serde_json::json!({"type": "string"}),
        SchemaKind::Number => serde_json::json!({"type": "number"}),
        SchemaKind::Integer => serde_json::json!({"type": "integer"}),
        SchemaKind::Boolean => serde_json::json!({"type": "boolean"}),
    };

    if let Some(map) = out.as_object_mut() {
        if let Some(description) = &node.description {
            map.insert("description".into(), Value::String(description.clone()));
        }
        if let Some(values) = &node.enum_values {
            map.insert("enum".into(), Value::Array(values.clone()));
        }
    }
    out
}
