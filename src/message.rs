//! Decoded task messages.
//!
//! Payloads on the wire are UTF-8 JSON objects carrying a mandatory integer
//! `id`. Every other field is kept as-is in an open map so producers can add
//! fields without the consumer needing to know about them.

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::DecodeError;

/// A unit of work pulled from the stream.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Message {
    id: i64,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl Message {
    /// Create a message with no extra fields.
    pub fn new(id: i64) -> Self {
        Self {
            id,
            fields: Map::new(),
        }
    }

    /// Add an extra field. An `id` key is ignored, the identifier is fixed.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if key != "id" {
            self.fields.insert(key, value.into());
        }
        self
    }

    /// Decode a wire payload.
    ///
    /// `id` accepts a JSON integer, a float with no fractional part, or a
    /// string holding an integer.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_slice(payload)?;
        let Value::Object(mut fields) = value else {
            return Err(DecodeError::NotAnObject);
        };
        let raw_id = fields.remove("id").ok_or(DecodeError::MissingId)?;
        let id = parse_id(&raw_id).ok_or_else(|| DecodeError::InvalidId(raw_id.to_string()))?;
        Ok(Self { id, fields })
    }

    /// Encode back into the wire format.
    pub fn encode(&self) -> Vec<u8> {
        // Map<String, Value> always serializes.
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    /// Look up an extra field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// All fields except `id`.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Decompose into the identifier and the extra fields.
    pub fn into_parts(self) -> (i64, Map<String, Value>) {
        (self.id, self.fields)
    }
}

fn parse_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "id={}", self.id)?;
        for (key, value) in &self.fields {
            write!(f, " {}={}", key, value)?;
        }
        Ok(())
    }
}
