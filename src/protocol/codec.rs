//! Newline-delimited JSON framing.
//!
//! Every frame is one JSON object on one line. Requests are written with
//! `encode`; whatever the server writes back is read with `decode` (responses
//! only) or `decode_incoming` (responses, notifications and server requests).

use serde_json::{Map, Value};
use thiserror::Error;

use super::jsonrpc::{Incoming, Notification, Request, Response, ServerRequest, JSONRPC_VERSION};
use crate::error::ClientError;

/// How much of an offending frame is kept for diagnostics.
const FRAME_EXCERPT_CHARS: usize = 200;

/// A frame that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct MalformedMessage {
    /// Request id recovered from the frame, if it had a usable one.
    pub id: Option<u64>,
    pub reason: String,
    /// The start of the offending frame.
    pub excerpt: String,
}

impl MalformedMessage {
    pub fn new(id: Option<u64>, reason: impl Into<String>, frame: &str) -> Self {
        Self {
            id,
            reason: reason.into(),
            excerpt: frame.chars().take(FRAME_EXCERPT_CHARS).collect(),
        }
    }
}

/// Serialize a request as one `\n`-terminated line.
pub fn encode(request: &Request) -> Result<String, ClientError> {
    let mut line = serde_json::to_string(request).map_err(ClientError::Encode)?;
    line.push('\n');
    Ok(line)
}

/// Serialize a notification as one `\n`-terminated line.
pub fn encode_notification(notification: &Notification) -> Result<String, ClientError> {
    let mut line = serde_json::to_string(notification).map_err(ClientError::Encode)?;
    line.push('\n');
    Ok(line)
}

/// Decode a line that must be a response.
pub fn decode(line: &str) -> Result<Response, MalformedMessage> {
    let object = parse_object(line)?;
    decode_response(object, line)
}

/// Decode any frame the server may send.
pub fn decode_incoming(line: &str) -> Result<Incoming, MalformedMessage> {
    let object = parse_object(line)?;

    if object.contains_key("method") {
        check_version(&object, None, line)?;
        let is_request = object.get("id").is_some_and(|id| !id.is_null());
        let value = Value::Object(object);
        return if is_request {
            serde_json::from_value::<ServerRequest>(value)
                .map(Incoming::ServerRequest)
                .map_err(|e| MalformedMessage::new(None, format!("invalid request: {}", e), line))
        } else {
            serde_json::from_value::<Notification>(value)
                .map(Incoming::Notification)
                .map_err(|e| {
                    MalformedMessage::new(None, format!("invalid notification: {}", e), line)
                })
        };
    }

    decode_response(object, line).map(Incoming::Response)
}

fn parse_object(line: &str) -> Result<Map<String, Value>, MalformedMessage> {
    let value: Value = serde_json::from_str(line.trim_end())
        .map_err(|e| MalformedMessage::new(None, format!("invalid JSON: {}", e), line))?;

    match value {
        Value::Object(object) => Ok(object),
        _ => Err(MalformedMessage::new(
            None,
            "frame is not a JSON object",
            line,
        )),
    }
}

fn check_version(
    object: &Map<String, Value>,
    id: Option<u64>,
    line: &str,
) -> Result<(), MalformedMessage> {
    match object.get("jsonrpc") {
        Some(Value::String(version)) if version == JSONRPC_VERSION => Ok(()),
        Some(other) => Err(MalformedMessage::new(
            id,
            format!("unsupported jsonrpc version {}", other),
            line,
        )),
        None => Err(MalformedMessage::new(id, "missing jsonrpc field", line)),
    }
}

fn decode_response(object: Map<String, Value>, line: &str) -> Result<Response, MalformedMessage> {
    let id = match object.get("id") {
        Some(value) => Some(value.as_u64().ok_or_else(|| {
            MalformedMessage::new(None, format!("id {} is not an unsigned integer", value), line)
        })?),
        None => None,
    };

    check_version(&object, id, line)?;
    let Some(id) = id else {
        return Err(MalformedMessage::new(None, "missing id field", line));
    };

    let response: Response = serde_json::from_value(Value::Object(object))
        .map_err(|e| MalformedMessage::new(Some(id), format!("invalid response: {}", e), line))?;

    match (&response.result, &response.error) {
        (Some(_), None) | (None, Some(_)) => Ok(response),
        (Some(_), Some(_)) => Err(MalformedMessage::new(
            Some(id),
            "response carries both result and error",
            line,
        )),
        (None, None) => Err(MalformedMessage::new(
            Some(id),
            "response carries neither result nor error",
            line,
        )),
    }
}
