//! Caller payload validation and session fan-out.

use futures_util::future::join_all;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::gateway::handler::AppState;
use crate::rpc::{RpcRequest, RpcResponse};
use crate::stdio::handshake::{is_reserved, INIT_ID};
use crate::stdio::run_session;
use crate::{AppError, Result};

/// A `POST /mcp` body after validation. The response mirrors its shape.
#[derive(Debug, Clone, PartialEq)]
pub enum McpPayload {
    /// One request object.
    Single(RpcRequest),
    /// A non-empty array of request objects.
    Batch(Vec<RpcRequest>),
}

impl McpPayload {
    /// Validate a parsed body. Every element is checked before anything is
    /// spawned, so an invalid batch starts no sessions at all.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for an empty batch, a non-object
    /// element, a missing `method`/`id`, or use of the reserved handshake id.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Array(items) => {
                if items.is_empty() {
                    return Err(AppError::Validation("batch must not be empty".into()));
                }
                items
                    .into_iter()
                    .map(validate_request)
                    .collect::<Result<Vec<_>>>()
                    .map(Self::Batch)
            }
            other => validate_request(other).map(Self::Single),
        }
    }

    /// Number of sessions this payload will start.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Batch(requests) => requests.len(),
        }
    }

    /// Always `false`; empty batches are rejected during validation.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn validate_request(value: Value) -> Result<RpcRequest> {
    let request = RpcRequest::from_caller(value)?;
    if is_reserved(&request.id) {
        return Err(AppError::Validation(format!(
            "request id {INIT_ID:?} is reserved for the gateway handshake"
        )));
    }
    Ok(request)
}

/// The `tools/call` request `POST /run` sends for `code`.
#[must_use]
pub fn run_request(tool: &str, code: &str) -> RpcRequest {
    RpcRequest::tool_call(
        uuid::Uuid::new_v4().to_string(),
        tool,
        json!({ "code": code }),
    )
}

/// Pull the required `code` string out of a `POST /run` body.
///
/// # Errors
///
/// Returns `AppError::Validation` when the body is empty, not JSON, or has
/// no non-empty string `code`.
pub fn extract_code(body: &[u8]) -> Result<String> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(AppError::Validation("missing required field `code`".into()));
    }
    let value: Value = serde_json::from_slice(body)
        .map_err(|err| AppError::Validation(format!("body is not valid JSON: {err}")))?;
    match value.get("code") {
        Some(Value::String(code)) if !code.is_empty() => Ok(code.clone()),
        Some(Value::String(_)) | None | Some(Value::Null) => {
            Err(AppError::Validation("missing required field `code`".into()))
        }
        Some(_) => Err(AppError::Validation("field `code` must be a string".into())),
    }
}

/// Run one request in its own session.
///
/// # Errors
///
/// Propagates every session failure from [`run_session`].
pub async fn dispatch_one(state: &AppState, request: RpcRequest) -> Result<RpcResponse> {
    debug!(method = %request.method, id = %request.id, "dispatching request");
    run_session(&state.spawn, request, state.session_timeout, &state.ledger).await
}

/// Run every request concurrently, each in its own session.
///
/// Waits for all sessions to conclude; responses keep input order.
///
/// # Errors
///
/// If any session fails, the batch fails with the first failure in input
/// order.
pub async fn dispatch_batch(state: &AppState, requests: Vec<RpcRequest>) -> Result<Vec<RpcResponse>> {
    let size = requests.len();
    let results = join_all(
        requests
            .into_iter()
            .map(|request| dispatch_one(state, request)),
    )
    .await;

    let failures = results.iter().filter(|r| r.is_err()).count();
    info!(size, failures, "batch concluded");
    results.into_iter().collect()
}

/// Dispatch a validated payload, mirroring its shape in the reply.
///
/// # Errors
///
/// See [`dispatch_one`] and [`dispatch_batch`].
pub async fn dispatch(state: &AppState, payload: McpPayload) -> Result<Value> {
    let reply = match payload {
        McpPayload::Single(request) => serde_json::to_value(dispatch_one(state, request).await?),
        McpPayload::Batch(requests) => {
            serde_json::to_value(dispatch_batch(state, requests).await?)
        }
    };
    reply.map_err(|err| AppError::Protocol(format!("failed to encode response: {err}")))
}
