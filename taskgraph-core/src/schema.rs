//! Port schema model — self-describing records attached to every task input/output.
//!
//! A [`PortSchema`] drives three things throughout the engine: input validation
//! (`spec.md` §4.1 step 3), port compatibility between an edge's producer and
//! consumer (§4.3), and the scheduler's streaming/replication decisions (§4.2). The
//! three semantic annotations — `format`, `x-stream`, `x-replicate` — are static
//! properties of the task class: they never change at runtime (§3 invariant).

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

/// Base JSON type a port accepts. `Any` is the wildcard `true` schema from §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    String,
    Number,
    Boolean,
    Array,
    Object,
    Any,
}

/// Streaming mode for a port's output, from the `x-stream` annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    /// Each emitted value replaces the previous one. Default.
    #[default]
    Replace,
    /// Chunks concatenate (`text-delta` accumulation, §3).
    Append,
}

/// A dotted semantic kind, optionally narrowed to a specific producing task type,
/// e.g. `model` or `model:EmbeddingTask` (§3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticFormat {
    pub kind: String,
    pub narrowing: Option<String>,
}

impl SemanticFormat {
    pub fn parse(raw: &str) -> Self {
        match raw.split_once(':') {
            Some((kind, narrowing)) => Self {
                kind: kind.to_string(),
                narrowing: Some(narrowing.to_string()),
            },
            None => Self {
                kind: raw.to_string(),
                narrowing: None,
            },
        }
    }

    /// A producing format is compatible with a consuming one if the base kind
    /// matches and the consumer's narrowing (if any) matches the producer's.
    pub fn is_compatible_with(&self, consumer: &SemanticFormat) -> bool {
        if self.kind != consumer.kind {
            return false;
        }
        match &consumer.narrowing {
            Some(narrow) => self.narrowing.as_deref() == Some(narrow.as_str()),
            None => true,
        }
    }
}

/// A self-describing port schema: base type, sub-schemas, and the three semantic
/// annotations (`format`, `x-stream`, `x-replicate`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortSchema {
    #[serde(rename = "type")]
    pub schema_type: SchemaType,

    #[serde(default)]
    pub properties: HashMap<String, PortSchema>,

    #[serde(default)]
    pub items: Option<Box<PortSchema>>,

    #[serde(default)]
    pub required: Vec<String>,

    #[serde(default = "default_additional_properties")]
    #[serde(rename = "additionalProperties")]
    pub additional_properties: bool,

    #[serde(default)]
    pub format: Option<SemanticFormat>,

    #[serde(default, rename = "x-stream")]
    pub stream_mode: StreamMode,

    #[serde(default, rename = "x-replicate")]
    pub replicate: bool,

    #[serde(default)]
    pub default: Option<serde_json::Value>,
}

fn default_additional_properties() -> bool {
    false
}

impl Default for PortSchema {
    fn default() -> Self {
        Self {
            schema_type: SchemaType::Any,
            properties: HashMap::new(),
            items: None,
            required: Vec::new(),
            additional_properties: default_additional_properties(),
            format: None,
            stream_mode: StreamMode::default(),
            replicate: false,
            default: None,
        }
    }
}

impl PortSchema {
    pub fn any() -> Self {
        Self {
            schema_type: SchemaType::Any,
            additional_properties: true,
            ..Default::default()
        }
    }

    pub fn string() -> Self {
        Self {
            schema_type: SchemaType::String,
            ..Default::default()
        }
    }

    pub fn object() -> Self {
        Self {
            schema_type: SchemaType::Object,
            ..Default::default()
        }
    }

    pub fn with_stream_mode(mut self, mode: StreamMode) -> Self {
        self.stream_mode = mode;
        self
    }

    pub fn with_format(mut self, format: &str) -> Self {
        self.format = Some(SemanticFormat::parse(format));
        self
    }

    pub fn with_replicate(mut self, replicate: bool) -> Self {
        self.replicate = replicate;
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, schema: PortSchema) -> Self {
        self.properties.insert(name.into(), schema);
        self
    }

    pub fn accepts_streaming_input(&self) -> bool {
        self.stream_mode == StreamMode::Append
    }

    /// Validate `value` against this schema. This is a structural check (base type,
    /// required properties, `additionalProperties`) — full JSON Schema validation is
    /// available behind the `json-validation` feature via [`CompiledSchema`].
    pub fn validate(&self, value: &serde_json::Value) -> Result<(), String> {
        match self.schema_type {
            SchemaType::Any => Ok(()),
            SchemaType::String => {
                if value.is_string() {
                    Ok(())
                } else {
                    Err(format!("expected string, got {}", type_name(value)))
                }
            }
            SchemaType::Number => {
                if value.is_number() {
                    Ok(())
                } else {
                    Err(format!("expected number, got {}", type_name(value)))
                }
            }
            SchemaType::Boolean => {
                if value.is_boolean() {
                    Ok(())
                } else {
                    Err(format!("expected boolean, got {}", type_name(value)))
                }
            }
            SchemaType::Array => {
                let Some(items) = value.as_array() else {
                    return Err(format!("expected array, got {}", type_name(value)));
                };
                if let Some(item_schema) = &self.items {
                    for (i, item) in items.iter().enumerate() {
                        item_schema.validate(item).map_err(|e| format!("index {i}: {e}"))?;
                    }
                }
                Ok(())
            }
            SchemaType::Object => {
                let Some(obj) = value.as_object() else {
                    return Err(format!("expected object, got {}", type_name(value)));
                };
                for required in &self.required {
                    if !obj.contains_key(required) {
                        return Err(format!("missing required property '{required}'"));
                    }
                }
                for (key, val) in obj {
                    match self.properties.get(key) {
                        Some(prop_schema) => prop_schema.validate(val).map_err(|e| format!("property '{key}': {e}"))?,
                        None if self.additional_properties => {}
                        None => return Err(format!("unexpected property '{key}'")),
                    }
                }
                Ok(())
            }
        }
    }
}

fn type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Is `producer` (an output port schema) wire-compatible with `consumer` (an input
/// port schema)? Base-type compatibility plus semantic `format` matching. Per Open
/// Question (1), `ALL_PORTS` forwarding and `additionalProperties: true` both allow
/// unknown keys through; either independently is sufficient.
pub fn is_compatible(producer: &PortSchema, consumer: &PortSchema) -> bool {
    if producer.schema_type == SchemaType::Any || consumer.schema_type == SchemaType::Any {
        return format_compatible(producer, consumer);
    }
    if producer.schema_type != consumer.schema_type {
        return false;
    }
    format_compatible(producer, consumer)
}

fn format_compatible(producer: &PortSchema, consumer: &PortSchema) -> bool {
    match (&producer.format, &consumer.format) {
        (_, None) => true,
        (Some(p), Some(c)) => p.is_compatible_with(c),
        (None, Some(_)) => false,
    }
}

/// Caches compiled schemas per task type so validation work happens once (§9
/// "Schema validation": "Compile each task's schema once; cache the compiled form
/// per task type"). Dynamic-schema tasks invalidate their entry on `schemaChange`.
#[derive(Default)]
pub struct CompiledSchemaCache {
    compiled: RwLock<HashMap<String, Arc<PortSchema>>>,
    dynamic: RwLock<HashSet<String>>,
}

impl CompiledSchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_compile(&self, task_type: &str, schema: &PortSchema) -> Arc<PortSchema> {
        if let Some(cached) = self.compiled.read().unwrap().get(task_type) {
            return cached.clone();
        }
        let compiled = Arc::new(schema.clone());
        self.compiled.write().unwrap().insert(task_type.to_string(), compiled.clone());
        compiled
    }

    /// Mark `task_type` as having a schema that depends on config, forcing
    /// recompilation the next time it changes.
    pub fn mark_dynamic(&self, task_type: &str) {
        self.dynamic.write().unwrap().insert(task_type.to_string());
    }

    /// Invalidate the compiled form for `task_type` (the `schemaChange` event).
    pub fn invalidate(&self, task_type: &str) {
        self.compiled.write().unwrap().remove(task_type);
    }

    pub fn is_dynamic(&self, task_type: &str) -> bool {
        self.dynamic.read().unwrap().contains(task_type)
    }
}

#[cfg(feature = "json-validation")]
pub fn compile_json_schema(schema: &serde_json::Value) -> Result<jsonschema::JSONSchema, String> {
    jsonschema::JSONSchema::compile(schema).map_err(|e| e.to_string())
}
