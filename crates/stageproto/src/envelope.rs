//! The façade ↔ daemon line protocol.
//!
//! One JSON object per line in each direction:
//!
//! ```text
//! -> {"command": "/live/song/get/tempo", "args": [], "id": 1}
//! <- {"id": 1, "ok": true, "result": [120.0]}
//! <- {"id": 1, "ok": false, "error": "timeout"}
//! ```
//!
//! `command` is either an OSC address or one of the daemon's own verbs
//! (`ping`, `status`, `send_message`). `id` is opaque and echoed back, so a
//! client may pipeline requests and match responses out of order.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::command::WireCommand;
use crate::convert::args_from_json;

/// Errors in a request line. The daemon answers them on the same connection
/// and keeps reading.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("missing OSC address")]
    MissingAddress,
    #[error("invalid OSC address: {0}")]
    InvalidAddress(String),
    #[error("unsupported argument at position {index}: {kind}")]
    UnsupportedArgument { index: usize, kind: &'static str },
    #[error("too many requests in flight (limit {limit})")]
    TooManyInFlight { limit: usize },
}

/// A request from the façade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub command: String,

    #[serde(default)]
    pub args: Vec<Value>,

    #[serde(default, alias = "request_id")]
    pub id: Value,

    /// Only used by `send_message`, which carries the address separately.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// What a request asks the daemon to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Ping,
    Status,
    Osc(WireCommand),
}

impl Request {
    /// Request for an OSC address.
    pub fn osc(id: impl Into<Value>, address: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            command: address.into(),
            args,
            id: id.into(),
            address: None,
        }
    }

    /// Request for one of the daemon's own verbs.
    pub fn verb(id: impl Into<Value>, verb: &str) -> Self {
        Self {
            command: verb.to_string(),
            args: Vec::new(),
            id: id.into(),
            address: None,
        }
    }

    /// Work out what this request asks for.
    pub fn action(&self) -> Result<Action, EnvelopeError> {
        let address = match self.command.as_str() {
            "ping" => return Ok(Action::Ping),
            "status" | "get_status" => return Ok(Action::Status),
            "send_message" => self.address.as_deref().ok_or(EnvelopeError::MissingAddress)?,
            other if other.starts_with('/') => other,
            other => return Err(EnvelopeError::UnknownCommand(other.to_string())),
        };

        let args = args_from_json(&self.args)?;
        let command = WireCommand::new(address, args)
            .map_err(|_| EnvelopeError::InvalidAddress(address.to_string()))?;
        Ok(Action::Osc(command))
    }

    pub fn to_json_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// A request line that could not be understood, with whatever id could be
/// recovered from it.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejected {
    pub id: Value,
    pub error: EnvelopeError,
}

impl Rejected {
    pub fn into_response(self) -> Response {
        Response::protocol_error(self.id, &self.error)
    }
}

/// Parse one request line.
///
/// The id may be sent as `id` or `request_id`. When both are present `id`
/// wins and `request_id` is ignored. Rejections carry whichever id could be
/// recovered so the error still reaches the right caller.
pub fn parse_request(line: &str) -> Result<Request, Rejected> {
    let mut value: Value = serde_json::from_str(line).map_err(|e| Rejected {
        id: Value::Null,
        error: EnvelopeError::InvalidJson(e.to_string()),
    })?;

    if let Some(object) = value.as_object_mut() {
        if object.contains_key("id") {
            object.remove("request_id");
        }
    }
    let id = value
        .get("id")
        .or_else(|| value.get("request_id"))
        .cloned()
        .unwrap_or(Value::Null);

    serde_json::from_value(value).map_err(|e| Rejected {
        id,
        error: EnvelopeError::InvalidRequest(e.to_string()),
    })
}

/// A response to the façade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub id: Value,

    pub ok: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            id,
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, message: impl Into<String>) -> Self {
        Self {
            id,
            ok: false,
            result: None,
            error: Some(message.into()),
        }
    }

    pub fn protocol_error(id: Value, error: &EnvelopeError) -> Self {
        Self::error(id, format!("protocol error: {}", error))
    }

    /// Split into the result or the error message.
    pub fn into_result(self) -> Result<Value, String> {
        if self.ok {
            Ok(self.result.unwrap_or(Value::Null))
        } else {
            Err(self
                .error
                .unwrap_or_else(|| "unknown error".to_string()))
        }
    }

    pub fn to_json_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Body of a `status` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub daemon: String,
    pub version: String,
    pub listen: String,
    pub peer: String,
    pub command_port: u16,
    pub reply_port: u16,
    pub pending: usize,
    pub uptime_secs: u64,
}
