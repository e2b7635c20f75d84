//! WORK and ERROR payload shapes.
//!
//! Both are wire-encoded as plain arrays so any codec can carry them:
//! WORK is `(name, args, kwargs)`, ERROR is `(kind, message, traceback)`.

use crate::codec::Value;
use palaver_types::PalaverError;

/// Keyword arguments of a call.
pub type Kwargs = serde_json::Map<String, Value>;

/// A call request: dotted locator plus positional and keyword arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkPayload {
    pub name: String,
    pub args: Vec<Value>,
    pub kwargs: Kwargs,
}

impl WorkPayload {
    pub fn new(name: impl Into<String>, args: Vec<Value>, kwargs: Kwargs) -> Self {
        Self {
            name: name.into(),
            args,
            kwargs,
        }
    }

    pub fn to_value(&self) -> Value {
        Value::Array(vec![
            Value::String(self.name.clone()),
            Value::Array(self.args.clone()),
            Value::Object(self.kwargs.clone()),
        ])
    }

    pub fn from_value(value: Value) -> Result<Self, PalaverError> {
        let parts = match value {
            Value::Array(parts) if parts.len() == 3 => parts,
            other => {
                return Err(PalaverError::Codec(format!(
                    "WORK payload must be a 3-element array, got {other}"
                )))
            }
        };
        let mut parts = parts.into_iter();
        let name = match parts.next() {
            Some(Value::String(name)) => name,
            other => {
                return Err(PalaverError::Codec(format!(
                    "WORK locator must be a string, got {other:?}"
                )))
            }
        };
        let args = match parts.next() {
            Some(Value::Array(args)) => args,
            other => {
                return Err(PalaverError::Codec(format!(
                    "WORK args must be an array, got {other:?}"
                )))
            }
        };
        let kwargs = match parts.next() {
            Some(Value::Object(kwargs)) => kwargs,
            other => {
                return Err(PalaverError::Codec(format!(
                    "WORK kwargs must be a map, got {other:?}"
                )))
            }
        };
        Ok(Self { name, args, kwargs })
    }
}

/// A captured work failure: `(kind, message, traceback)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorPayload {
    pub kind: String,
    pub message: String,
    pub traceback: String,
}

impl ErrorPayload {
    /// Capture a local error for the wire. The traceback slot carries the
    /// error's debug rendering, the closest thing to a stack this side has.
    pub fn capture(error: &PalaverError) -> Self {
        Self {
            kind: error.kind().to_string(),
            message: error.to_string(),
            traceback: format!("{error:?}"),
        }
    }

    pub fn to_value(&self) -> Value {
        Value::Array(vec![
            Value::String(self.kind.clone()),
            Value::String(self.message.clone()),
            Value::String(self.traceback.clone()),
        ])
    }

    pub fn from_value(value: Value) -> Result<Self, PalaverError> {
        let parts = match value {
            Value::Array(parts) if parts.len() == 3 => parts,
            other => {
                return Err(PalaverError::Codec(format!(
                    "ERROR payload must be a 3-element array, got {other}"
                )))
            }
        };
        let mut strings = Vec::with_capacity(3);
        for part in parts {
            match part {
                Value::String(s) => strings.push(s),
                other => {
                    return Err(PalaverError::Codec(format!(
                        "ERROR payload parts must be strings, got {other:?}"
                    )))
                }
            }
        }
        let traceback = strings.pop().unwrap();
        let message = strings.pop().unwrap();
        let kind = strings.pop().unwrap();
        Ok(Self {
            kind,
            message,
            traceback,
        })
    }

    /// Rebuild the native error this payload describes.
    pub fn into_error(self) -> PalaverError {
        PalaverError::from_remote(&self.kind, &self.message, &self.traceback)
    }
}
