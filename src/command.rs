//! Serial command protocol: request parsing and response shapes.
//!
//! Each request line is either a JSON object `{"type": ..., "value"?: ...}` or
//! a whitespace-tokenized fallback `<type> [value]`. Every request gets exactly
//! one JSON response line with a `status` field.

use serde::{Deserialize, Serialize};

use crate::{CamError, CamResult};

/// A fully-typed camera command. The wire protocol's loose `{type, value}`
/// pairs are coerced into these closed variants at the parse boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Ping,
    Status,
    Start,
    Stop,
    Zoom(f64),
    Focus(i64),
    Brightness(i64),
}

/// Wire shape of a structured request. Unrecognized fields are rejected so
/// malformed commands fail loudly instead of passing through.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WireCommand {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    value: Option<serde_json::Value>,
}

impl Command {
    /// Parse one trimmed request line. Structured JSON decoding is attempted
    /// first; on failure the line is split into `<type> [value]` tokens.
    pub fn parse(line: &str) -> CamResult<Command> {
        let line = line.trim();
        if line.is_empty() {
            return Err(CamError::CommandParse("empty command".to_string()));
        }

        let (kind, value) = match serde_json::from_str::<WireCommand>(line) {
            Ok(wire) => (wire.kind, wire.value),
            Err(_) => {
                let mut tokens = line.split_whitespace();
                let kind = match tokens.next() {
                    Some(kind) => kind.to_string(),
                    None => return Err(CamError::CommandParse("empty command".to_string())),
                };
                let value = tokens
                    .next()
                    .map(|token| serde_json::Value::String(token.to_string()));
                (kind, value)
            }
        };

        Self::from_wire(&kind, value)
    }

    fn from_wire(kind: &str, value: Option<serde_json::Value>) -> CamResult<Command> {
        match kind.to_ascii_lowercase().as_str() {
            "ping" => Ok(Command::Ping),
            "status" => Ok(Command::Status),
            "start" => Ok(Command::Start),
            "stop" => Ok(Command::Stop),
            "zoom" => Ok(Command::Zoom(coerce_float(value, 1.0)?)),
            "focus" => Ok(Command::Focus(coerce_int(value, 0)?)),
            "brightness" => Ok(Command::Brightness(coerce_int(value, 128)?)),
            other => Err(CamError::CommandParse(format!("unknown command: {other}"))),
        }
    }
}

/// Coerce a JSON number or numeric string into a float.
fn coerce_float(value: Option<serde_json::Value>, default: f64) -> CamResult<f64> {
    match value {
        None | Some(serde_json::Value::Null) => Ok(default),
        Some(serde_json::Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| CamError::CommandParse(format!("invalid number: {n}"))),
        Some(serde_json::Value::String(s)) => s
            .parse()
            .map_err(|_| CamError::CommandParse(format!("invalid value: {s:?}"))),
        Some(other) => Err(CamError::CommandParse(format!("invalid value: {other}"))),
    }
}

/// Coerce a JSON number or numeric string into an integer.
fn coerce_int(value: Option<serde_json::Value>, default: i64) -> CamResult<i64> {
    match value {
        None | Some(serde_json::Value::Null) => Ok(default),
        Some(serde_json::Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| CamError::CommandParse(format!("invalid number: {n}"))),
        Some(serde_json::Value::String(s)) => s
            .parse()
            .map_err(|_| CamError::CommandParse(format!("invalid value: {s:?}"))),
        Some(other) => Err(CamError::CommandParse(format!("invalid value: {other}"))),
    }
}

/// Response status discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

/// One serial response line. Serialized as a single JSON object; absent
/// fields are omitted, while `filename` serializes as an explicit `null`
/// when no recording has produced a file yet.
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recording: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<Option<String>>,
}

impl Response {
    fn empty(status: Status) -> Self {
        Self {
            status,
            message: None,
            command: None,
            value: None,
            recording: None,
            filename: None,
        }
    }

    /// `pong` reply to a ping.
    pub fn pong() -> Self {
        Self {
            message: Some("pong".to_string()),
            ..Self::empty(Status::Ok)
        }
    }

    /// Lifecycle reply, echoing which operation ran and whether it succeeded.
    /// Failures carry the error description so clients can report it.
    pub fn lifecycle(command: &'static str, result: &CamResult<()>) -> Self {
        match result {
            Ok(()) => Self {
                command: Some(command),
                ..Self::empty(Status::Ok)
            },
            Err(e) => Self {
                command: Some(command),
                message: Some(e.to_string()),
                ..Self::empty(Status::Error)
            },
        }
    }

    /// Immediate acknowledgement of a queued property command.
    pub fn accepted(command: &'static str, value: serde_json::Value) -> Self {
        Self {
            command: Some(command),
            value: Some(value),
            ..Self::empty(Status::Ok)
        }
    }

    /// Current recording state snapshot.
    pub fn status_report(recording: bool, filename: Option<String>) -> Self {
        Self {
            recording: Some(recording),
            filename: Some(filename),
            ..Self::empty(Status::Ok)
        }
    }

    /// Error reply carrying a failure description.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::empty(Status::Error)
        }
    }
}
