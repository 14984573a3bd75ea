//! Insertion-ordered JSON document wrapper.
//!
//! A thin newtype over `serde_json::Value` (built with `preserve_order`, so
//! objects iterate in insertion order) plus the typed accessors the engine
//! needs when reading manifests and wire messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::ops::{Deref, DerefMut};

/// A self-describing JSON value: null, bool, integer, real, string,
/// insertion-ordered object, or array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct JsonDocument(pub Value);

impl JsonDocument {
    /// An empty object document.
    pub fn object() -> Self {
        JsonDocument(Value::Object(serde_json::Map::new()))
    }

    /// An empty array document.
    pub fn array() -> Self {
        JsonDocument(Value::Array(Vec::new()))
    }

    /// Parse from a JSON string.
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        Ok(JsonDocument(serde_json::from_str(text)?))
    }

    /// Set a key on an object document. No-op on non-objects.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        if let Value::Object(map) = &mut self.0 {
            map.insert(key.to_string(), value.into());
        }
    }

    /// Append to an array document. No-op on non-arrays.
    pub fn push(&mut self, value: impl Into<Value>) {
        if let Value::Array(items) = &mut self.0 {
            items.push(value.into());
        }
    }

    /// String field of an object.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key)?.as_str()
    }

    /// Unsigned integer field of an object.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.0.get(key)?.as_u64()
    }

    /// Boolean field of an object.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key)?.as_bool()
    }

    /// Array field of an object.
    pub fn get_array(&self, key: &str) -> Option<&Vec<Value>> {
        self.0.get(key)?.as_array()
    }
}

impl Deref for JsonDocument {
    type Target = Value;

    fn deref(&self) -> &Value {
        &self.0
    }
}

impl DerefMut for JsonDocument {
    fn deref_mut(&mut self) -> &mut Value {
        &mut self.0
    }
}

impl fmt::Display for JsonDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Value> for JsonDocument {
    fn from(value: Value) -> Self {
        JsonDocument(value)
    }
}
