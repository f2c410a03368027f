//! The request context a trigger carries through a run.

use crate::criteria::SearchCriteria;
use crate::error::{Error, Result};
use serde_json::{Map, Value};

/// Field holding the emitted message body.
pub const PAYLOAD_FIELD: &str = "payload";

/// Field holding request-supplied search criteria.
pub const CRITERIA_FIELD: &str = "criteria";

/// Arbitrary upstream data delivered with a trigger.
///
/// Every message a run emits is a copy of this context with
/// [`PAYLOAD_FIELD`] replaced by the raw message text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestContext {
    fields: Map<String, Value>,
}

impl RequestContext {
    /// An empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidContext`] if `value` is not an object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(Error::InvalidContext {
                kind: json_kind(&other),
            }),
        }
    }

    /// Request-supplied search criteria, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCriteria`] if the field holds criteria that
    /// cannot be sent to the server.
    pub fn criteria(&self) -> Result<Option<SearchCriteria>> {
        match self.fields.get(CRITERIA_FIELD) {
            Some(value) => SearchCriteria::from_value(value),
            None => Ok(None),
        }
    }

    /// The current payload.
    #[must_use]
    pub fn payload(&self) -> Option<&Value> {
        self.fields.get(PAYLOAD_FIELD)
    }

    /// Returns a field by name.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Sets a field, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(key.into(), value.into())
    }

    /// Copy of this context carrying `payload`.
    #[must_use]
    pub fn with_payload(&self, payload: impl Into<Value>) -> Self {
        let mut out = self.clone();
        out.fields.insert(PAYLOAD_FIELD.to_string(), payload.into());
        out
    }

    /// The underlying JSON object.
    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

impl From<Map<String, Value>> for RequestContext {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
