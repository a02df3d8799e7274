use crate::model::SchemaGeneration;
use serde_json::{Map, Value};

#[derive(thiserror::Error, Debug)]
pub enum ChartError {
    #[error("malformed chart: {0}")]
    Malformed(String),
}

/// A parsed chart file. Field names and units depend on `generation`.
#[derive(Clone, Debug)]
pub struct ChartDocument {
    generation: SchemaGeneration,
    version: Option<String>,
    root: Map<String, Value>,
}

impl ChartDocument {
    pub(crate) fn new(
        generation: SchemaGeneration,
        version: Option<String>,
        root: Map<String, Value>,
    ) -> Self {
        Self {
            generation,
            version,
            root,
        }
    }

    pub fn generation(&self) -> SchemaGeneration {
        self.generation
    }

    /// The raw version marker, if the file carried a string one.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.root.get(key)
    }

    /// Array under `key`, or `None` when absent, null or not an array.
    pub fn records(&self, key: &str) -> Option<&Vec<Value>> {
        self.root.get(key).and_then(Value::as_array)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.root.keys().map(String::as_str)
    }
}

pub fn parse_json_object(bytes: &[u8]) -> Result<Map<String, Value>, ChartError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| ChartError::Malformed(e.to_string()))?;
    into_object(value)
}

pub(crate) fn into_object(value: Value) -> Result<Map<String, Value>, ChartError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(ChartError::Malformed(format!(
            "expected a JSON object at top level, found {}",
            json_kind(&other)
        ))),
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
