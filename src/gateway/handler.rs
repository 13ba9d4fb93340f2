//! Shared gateway state and the HTTP route handlers.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::stream::{self, Stream};
use futures_util::{future, StreamExt};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{GlobalConfig, ToolConfig};
use crate::gateway::dispatch::{self, McpPayload};
use crate::rpc::{error_envelope, INTERNAL_ERROR, INVALID_REQUEST, PARSE_ERROR};
use crate::stdio::{SessionLedger, SpawnConfig};
use crate::AppError;

/// State shared by every request handler.
pub struct AppState {
    /// Loaded configuration.
    pub config: Arc<GlobalConfig>,
    /// Launch settings derived from `config`, credential included.
    pub spawn: SpawnConfig,
    /// Ceiling for one session.
    pub session_timeout: Duration,
    /// Spawn/termination totals across all sessions.
    pub ledger: Arc<SessionLedger>,
    /// Fires on server shutdown; ends open SSE streams.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Build state from a configuration whose credential is already loaded.
    #[must_use]
    pub fn new(config: GlobalConfig, shutdown: CancellationToken) -> Self {
        let spawn = SpawnConfig::from_config(&config);
        let session_timeout = config.session_timeout();
        Self {
            config: Arc::new(config),
            spawn,
            session_timeout,
            ledger: Arc::new(SessionLedger::default()),
            shutdown,
        }
    }
}

/// Handler for `GET /health`.
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Handler for `POST /mcp`: one session per request object.
pub async fn mcp(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let value: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(err) => {
            warn!(%err, "rejecting unparseable /mcp body");
            return rpc_error(
                StatusCode::BAD_REQUEST,
                PARSE_ERROR,
                &format!("parse error: {err}"),
            );
        }
    };

    let payload = match McpPayload::from_value(value) {
        Ok(payload) => payload,
        Err(err) => return rpc_failure(&err),
    };

    match dispatch::dispatch(&state, payload).await {
        Ok(reply) => Json(reply).into_response(),
        Err(err) => rpc_failure(&err),
    }
}

/// Handler for `POST /run`: wraps `{code}` in a `tools/call` and unwraps the reply.
pub async fn run(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let code = match dispatch::extract_code(&body) {
        Ok(code) => code,
        Err(err) => return plain_failure(&err),
    };

    let request = dispatch::run_request(&state.config.tool.name, &code);
    match dispatch::dispatch_one(&state, request).await {
        Ok(response) => Json(response.into_payload()).into_response(),
        Err(err) => plain_failure(&err),
    }
}

/// Handler for `GET /sse`: one `tools` event, then silence until disconnect.
pub async fn sse(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("sse client connected");
    let first = Event::default()
        .event("tools")
        .data(tools_payload(&state.config.tool).to_string());

    let until_shutdown = stream::once(state.shutdown.clone().cancelled_owned())
        .filter_map(|()| future::ready(None::<Result<Event, Infallible>>));

    Sse::new(stream::once(future::ready(Ok(first))).chain(until_shutdown))
}

/// Descriptor of the advertised tool, in MCP `tools/list` shape.
#[must_use]
pub fn tool_descriptor(tool: &ToolConfig) -> Value {
    json!({
        "name": tool.name,
        "description": tool.description,
        "inputSchema": {
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "The code to execute"
                }
            },
            "required": ["code"]
        }
    })
}

/// Body of the `tools` SSE event.
#[must_use]
pub fn tools_payload(tool: &ToolConfig) -> Value {
    json!({ "tools": [tool_descriptor(tool)] })
}

fn rpc_error(status: StatusCode, code: i64, message: &str) -> Response {
    (status, Json(error_envelope(code, message))).into_response()
}

fn rpc_failure(err: &AppError) -> Response {
    if err.is_caller_error() {
        rpc_error(StatusCode::BAD_REQUEST, INVALID_REQUEST, &err.to_string())
    } else {
        error!(%err, "mcp request failed");
        rpc_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            INTERNAL_ERROR,
            &err.to_string(),
        )
    }
}

fn plain_failure(err: &AppError) -> Response {
    let status = if err.is_caller_error() {
        StatusCode::BAD_REQUEST
    } else {
        error!(%err, "run request failed");
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}
