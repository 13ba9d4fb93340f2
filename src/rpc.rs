//! JSON-RPC 2.0 message types exchanged with callers and tool servers.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{AppError, Result};

/// Protocol version tag carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Invalid JSON was received.
pub const PARSE_ERROR: i64 = -32700;
/// The JSON sent is not a valid request object.
pub const INVALID_REQUEST: i64 = -32600;
/// Internal JSON-RPC error; used for every session failure.
pub const INTERNAL_ERROR: i64 = -32603;

/// Request identifier. Matching is exact: `"1"` and `1` are different ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcId {
    /// Numeric identifier.
    Number(serde_json::Number),
    /// String identifier.
    String(String),
}

impl From<&str> for RpcId {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for RpcId {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for RpcId {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl Display for RpcId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
        }
    }
}

/// Outbound request written to a tool server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Always [`JSONRPC_VERSION`].
    pub jsonrpc: String,
    /// Correlation identifier.
    pub id: RpcId,
    /// Method name, e.g. `tools/call`.
    pub method: String,
    /// Method parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RpcRequest {
    /// Build a request with the fixed protocol version.
    #[must_use]
    pub fn new(id: impl Into<RpcId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    /// Build the `tools/call` request for invoking `tool` with `arguments`.
    #[must_use]
    pub fn tool_call(id: impl Into<RpcId>, tool: &str, arguments: Value) -> Self {
        Self::new(
            id,
            "tools/call",
            Some(json!({ "name": tool, "arguments": arguments })),
        )
    }

    /// Validate a caller-supplied JSON value and turn it into a request.
    ///
    /// The `jsonrpc` member is implicit: it is filled in when absent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` when the value is not an object, lacks
    /// a string `method`, or lacks a string/number `id`.
    pub fn from_caller(value: Value) -> Result<Self> {
        let Value::Object(mut map) = value else {
            return Err(AppError::Validation(
                "request must be a JSON object".into(),
            ));
        };

        let method = match map.remove("method") {
            Some(Value::String(method)) if !method.is_empty() => method,
            _ => {
                return Err(AppError::Validation(
                    "request is missing a string `method`".into(),
                ))
            }
        };

        let id = match map.remove("id") {
            Some(Value::String(s)) => RpcId::String(s),
            Some(Value::Number(n)) => RpcId::Number(n),
            _ => {
                return Err(AppError::Validation(
                    "request is missing a string or number `id`".into(),
                ))
            }
        };

        let params = map.remove("params").filter(|p| !p.is_null());
        if let Some(p) = &params {
            if !p.is_object() && !p.is_array() {
                return Err(AppError::Validation(
                    "`params` must be an object or array".into(),
                ));
            }
        }

        Ok(Self::new(id, method, params))
    }
}

/// Error object carried by a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional extra payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Response correlated to a request. Exactly one of `result`/`error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Always [`JSONRPC_VERSION`].
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    /// Identifier of the originating request.
    pub id: RpcId,
    /// Success payload. `Some(Value::Null)` is a successful `"result": null`.
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Value>,
    /// Failure payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
}

fn default_version() -> String {
    JSONRPC_VERSION.to_owned()
}

/// Keeps an explicit `null` as `Some(Value::Null)`; only absence is `None`.
fn present_value<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl RpcResponse {
    /// Interpret a parsed message as a response.
    ///
    /// Returns `Ok(None)` when the message is not a response at all (it has no
    /// id, or carries neither `result` nor a non-null `error`). A `null`
    /// `error` member is treated as absent; a `null` `result` is a success.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` when both a non-null `result` and a
    /// non-null `error` are set, or when the id or error object is malformed.
    pub fn from_message(value: &Value) -> Result<Option<Self>> {
        let Some(id) = value.get("id").filter(|id| !id.is_null()) else {
            return Ok(None);
        };
        let result = value.get("result");
        let error = value.get("error").filter(|e| !e.is_null());

        if error.is_some() && result.is_some_and(|r| !r.is_null()) {
            return Err(AppError::Protocol(
                "response carries both `result` and `error`".into(),
            ));
        }
        if result.is_none() && error.is_none() {
            return Ok(None);
        }

        let id: RpcId = serde_json::from_value(id.clone())
            .map_err(|err| AppError::Protocol(format!("malformed response id: {err}")))?;
        let error = error
            .map(|e| serde_json::from_value::<RpcErrorObject>(e.clone()))
            .transpose()
            .map_err(|err| AppError::Protocol(format!("malformed response: {err}")))?;

        Ok(Some(Self {
            jsonrpc: JSONRPC_VERSION.to_owned(),
            id,
            result: if error.is_some() { None } else { result.cloned() },
            error,
        }))
    }

    /// The `result` or `error` object, unwrapped from the envelope.
    #[must_use]
    pub fn into_payload(self) -> Value {
        match (self.result, self.error) {
            (Some(result), _) => result,
            (None, Some(error)) => serde_json::to_value(error).unwrap_or(Value::Null),
            (None, None) => Value::Null,
        }
    }
}

/// JSON-RPC error envelope not tied to a known request id.
#[must_use]
pub fn error_envelope(code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": Value::Null,
        "error": { "code": code, "message": message },
    })
}
