//! Command and response documents

use super::status;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors while turning a JSON document into a command
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CommandError {
    #[error("Command document must be a JSON object")]
    NotAnObject,
}

/// One unit of work read from an input file. Never mutated after parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    id: Option<String>,
    kind: String,
    fields: Map<String, Value>,
}

impl Command {
    /// Parse a command document.
    ///
    /// The kind comes from `type`, falling back to the legacy `command` key,
    /// trimmed and lower-cased. A missing kind parses as the empty kind.
    pub fn from_value(value: Value) -> Result<Self, CommandError> {
        let Value::Object(mut fields) = value else {
            return Err(CommandError::NotAnObject);
        };

        let id = id_token(fields.remove("id").as_ref());

        let kind = match fields.get("type") {
            Some(v) if !v.is_null() => v.clone(),
            _ => fields.get("command").cloned().unwrap_or(Value::Null),
        };
        let kind = match kind {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        };

        Ok(Self {
            id,
            kind: kind.trim().to_lowercase(),
            fields,
        })
    }

    /// Correlation token of a raw document, before it is parsed
    pub fn id_of(document: &Value) -> Option<String> {
        id_token(document.get("id"))
    }

    /// Correlation token supplied by the caller
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Discriminator (`upload_lua`, `send_hex`, ...)
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Raw field value
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Non-empty string field
    pub fn str_field(&self, key: &str) -> Option<&str> {
        match self.fields.get(key) {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.as_str()),
            _ => None,
        }
    }

    /// String field, also accepting numbers (`"port": 7` → `"7"`)
    pub fn text_field(&self, key: &str) -> Option<String> {
        match self.fields.get(key) {
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => self.str_field(key).map(|s| s.trim().to_string()),
        }
    }

    /// Non-negative integer, given as a number or numeric string
    pub fn uint_field(&self, key: &str) -> Option<u64> {
        match self.fields.get(key) {
            Some(Value::Number(n)) => n.as_u64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Truthiness of a field; `default` when absent or null
    pub fn flag(&self, key: &str, default: bool) -> bool {
        match self.fields.get(key) {
            None | Some(Value::Null) => default,
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Array(a)) => !a.is_empty(),
            Some(Value::Object(o)) => !o.is_empty(),
        }
    }
}

fn id_token(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    }
}

/// Outcome written to exactly one output file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub id: Option<String>,
    pub ok: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received: Option<String>,
}

impl Response {
    /// Successful response
    pub fn success(id: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            id: id.map(str::to_string),
            ok: true,
            message: message.into(),
            received: None,
        }
    }

    /// Failed response
    pub fn failure(id: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            id: id.map(str::to_string),
            ok: false,
            message: message.into(),
            received: None,
        }
    }

    /// Response for a file that could not be parsed
    pub fn invalid_json() -> Self {
        Self::failure(None, status::INVALID_JSON)
    }

    /// Attach read-back bytes rendered as hex
    pub fn with_received(mut self, received: Option<String>) -> Self {
        self.received = received;
        self
    }
}
