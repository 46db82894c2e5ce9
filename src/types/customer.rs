//! Raw customer records as received from clients

use crate::error::EncodingError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A raw customer record, keyed by the Telco field names used at training time
/// (`gender`, `SeniorCitizen`, `tenure`, `Contract`, ...).
///
/// The record keeps the JSON object exactly as the client sent it so the
/// encoder can see stray strings and unknown keys instead of having them
/// rejected or coerced by deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomerRecord(Map<String, Value>);

impl CustomerRecord {
    /// Create an empty record
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builder-style setter used by tests and the load generator
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.0.insert(field.to_string(), value.into());
        self
    }

    /// Insert or replace a field
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(field.into(), value.into());
    }

    /// Look up a field; JSON `null` counts as absent
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field).filter(|v| !v.is_null())
    }

    /// Iterate over all fields in insertion-independent (sorted) order
    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for CustomerRecord {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for CustomerRecord {
    type Error = EncodingError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Err(EncodingError::NotAnObject("null")),
            Value::Bool(_) => Err(EncodingError::NotAnObject("a boolean")),
            Value::Number(_) => Err(EncodingError::NotAnObject("a number")),
            Value::String(_) => Err(EncodingError::NotAnObject("a string")),
            Value::Array(_) => Err(EncodingError::NotAnObject("an array")),
        }
    }
}
