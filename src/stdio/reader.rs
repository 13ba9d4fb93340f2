//! Line parsing and id extraction for tool-server output.
//!
//! Tool servers routinely print diagnostics on stdout next to protocol
//! traffic, so a line that is not JSON is noise, never an error.

use serde_json::Value;
use tracing::debug;

use crate::rpc::RpcId;

/// Parse one framed line into a JSON value.
///
/// Returns `None` for blank lines and for anything that is not valid JSON.
#[must_use]
pub fn parse_line(session_id: &str, line: &str) -> Option<Value> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => Some(value),
        Err(err) => {
            debug!(session_id, error = %err, raw = trimmed, "discarding non-JSON output line");
            None
        }
    }
}

/// Identifier of a parsed message, if it carries a string or number `id`.
///
/// Notifications (no `id`) and `"id": null` yield `None`.
#[must_use]
pub fn message_id(message: &Value) -> Option<RpcId> {
    match message.get("id")? {
        Value::String(s) => Some(RpcId::String(s.clone())),
        Value::Number(n) => Some(RpcId::Number(n.clone())),
        _ => None,
    }
}

/// Whether a message is a response rather than a request or notification.
#[must_use]
pub fn is_response(message: &Value) -> bool {
    message.get("method").is_none()
        && (message.get("result").is_some() || message.get("error").is_some())
}
