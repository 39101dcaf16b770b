//! Audit events parsed from newline-delimited JSON.
//!
//! Each log line is one JSON object carrying an `event` tag, a `timestamp`
//! and a set of event-specific fields (`username`, `client_ip`, `allowed`, ...).
//! The upstream writer always renders UTC instants with a literal trailing
//! `Z`, which is stripped before the value is parsed as a naive date-time.

use chrono::NaiveDateTime;
use serde_json::{Map, Value};

use crate::error::{EvalError, Result};

/// `event` tag of login attempts.
pub const LOGIN_ATTEMPT: &str = "login_attempt";
/// `event` tag of protected patient-record reads.
pub const PATIENT_READ_ATTEMPT: &str = "patient_read_attempt";

/// A single parsed audit event. Immutable once parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    event_type: String,
    timestamp: NaiveDateTime,
    fields: Map<String, Value>,
}

impl AuditEvent {
    /// Parse one log line.
    ///
    /// Fails on malformed JSON, on non-object values, and when the `event`
    /// or `timestamp` field is absent or unusable.
    pub fn from_json_line(line: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(line)?;
        Self::from_value(value)
    }

    /// Build an event from an already-decoded JSON value.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(fields) = value else {
            return Err(EvalError::NotAnObject);
        };

        let event_type = match fields.get("event") {
            Some(Value::String(s)) => s.clone(),
            Some(_) => {
                return Err(EvalError::InvalidField {
                    field: "event".to_string(),
                    reason: "expected a string".to_string(),
                });
            }
            None => return Err(EvalError::MissingField("event".to_string())),
        };

        let timestamp = match fields.get("timestamp") {
            Some(Value::String(s)) => parse_timestamp(s)?,
            Some(_) => {
                return Err(EvalError::InvalidField {
                    field: "timestamp".to_string(),
                    reason: "expected a string".to_string(),
                });
            }
            None => return Err(EvalError::MissingField("timestamp".to_string())),
        };

        Ok(AuditEvent {
            event_type,
            timestamp,
            fields,
        })
    }

    /// The `event` tag, e.g. `login_attempt`.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// The event's own (logical) time.
    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    /// Raw access to any field, including `event` and `timestamp`.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// A field's value when it is a JSON string.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// A field's value when it is a JSON boolean.
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.fields.get(name).and_then(Value::as_bool)
    }

    /// Whether a boolean flag is literally `true`.
    ///
    /// Absent, `null` or non-boolean values count as "not true", so a
    /// login without a `success` field is treated as failed.
    pub fn is_true(&self, name: &str) -> bool {
        self.get_bool(name) == Some(true)
    }

    /// Render a scalar field for use as a grouping-key part or alert detail.
    ///
    /// Returns `Ok(None)` when the field is absent or `null`, and an error
    /// when it holds an object or array.
    pub fn scalar_field(&self, name: &str) -> Result<Option<String>> {
        match self.fields.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(Value::Bool(b)) => Ok(Some(b.to_string())),
            Some(_) => Err(EvalError::InvalidField {
                field: name.to_string(),
                reason: "expected a scalar value".to_string(),
            }),
        }
    }

    /// Like [`scalar_field`](Self::scalar_field), but a structured value is
    /// treated as missing. Used for alert details, where a bad field must not
    /// cost the alert.
    pub fn context_field(&self, name: &str) -> Option<String> {
        self.scalar_field(name).ok().flatten()
    }

    /// The underlying field map.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }
}

/// Parse an upstream timestamp: strip one trailing `Z`, then read the rest
/// as a naive ISO-8601 date-time with optional fractional seconds.
pub fn parse_timestamp(raw: &str) -> Result<NaiveDateTime> {
    let s = raw.strip_suffix('Z').unwrap_or(raw);

    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .map_err(|_| EvalError::InvalidTimestamp(raw.to_string()))
}
