//! One RPC exchange against one freshly spawned tool server.
//!
//! [`Exchange`] drives the protocol over any pair of async streams:
//!
//! ```text
//! Spawned ─► HandshakeSent ─► HandshakeAcked ─► RequestSent ─► Resolved
//!                    │                                │
//!                    └──────────────┬─────────────────┘
//!                                   ▼
//!                        TimedOut | ProcessError
//! ```
//!
//! [`run_session`] wraps it with the process lifecycle: spawn, race the
//! exchange against the deadline, classify early exits, and terminate the
//! process exactly once on every path.

use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::FramedRead;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::rpc::{RpcRequest, RpcResponse};
use crate::stdio::codec::LineCodec;
use crate::stdio::handshake::{self, INIT_ID};
use crate::stdio::reader::{is_response, message_id, parse_line};
use crate::stdio::spawner::{
    spawn_tool_server, ProcessGuard, SessionLedger, SpawnConfig, StderrCapture,
};
use crate::{AppError, Result};

/// How long output already written by an exited tool server is still read.
const EXIT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Process started, nothing written yet.
    Spawned,
    /// `initialize` written; waiting for its response.
    HandshakeSent,
    /// `initialize` acknowledged.
    HandshakeAcked,
    /// Caller request written; waiting for the correlated response.
    RequestSent,
    /// Correlated response received.
    Resolved,
    /// Deadline elapsed first.
    TimedOut,
    /// Process exited, closed its output, or broke the protocol.
    ProcessError,
}

impl SessionState {
    /// Whether the session has concluded.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::TimedOut | Self::ProcessError)
    }
}

impl Display for SessionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Spawned => "spawned",
            Self::HandshakeSent => "handshake_sent",
            Self::HandshakeAcked => "handshake_acked",
            Self::RequestSent => "request_sent",
            Self::Resolved => "resolved",
            Self::TimedOut => "timed_out",
            Self::ProcessError => "process_error",
        };
        f.write_str(name)
    }
}

/// How an exchange ended when it did not fail outright.
#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeOutcome {
    /// The caller's response was correlated.
    Resolved(RpcResponse),
    /// The tool server closed its output before responding.
    StreamClosed,
}

/// Protocol driver for one session over a reader/writer pair.
///
/// The framed reader holds the session's line buffer: a partial line left at
/// the end of one read stays buffered until a later read completes it.
pub struct Exchange<R, W> {
    session_id: String,
    lines: FramedRead<R, LineCodec>,
    writer: W,
    state: SessionState,
}

impl<R, W> Exchange<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Wrap the tool server's output (`reader`) and input (`writer`).
    pub fn new(session_id: impl Into<String>, reader: R, writer: W) -> Self {
        Self {
            session_id: session_id.into(),
            lines: FramedRead::new(reader, LineCodec::new()),
            writer,
            state: SessionState::Spawned,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run handshake, dispatch, and correlation for `request`.
    ///
    /// Messages with ids other than the reserved handshake id or the caller's
    /// id are ignored, as are notifications and non-JSON lines.
    ///
    /// # Errors
    ///
    /// - `AppError::Io`: writing to the tool server or reading its output failed.
    /// - `AppError::Protocol`: the correlated message is not a valid response.
    pub async fn run(&mut self, request: &RpcRequest) -> Result<ExchangeOutcome> {
        handshake::write_json_line(&mut self.writer, &handshake::initialize_request()).await?;
        self.transition(SessionState::HandshakeSent);

        loop {
            let Some(message) = self.next_message().await? else {
                debug!(
                    session_id = %self.session_id,
                    state = %self.state,
                    "tool server output closed"
                );
                return Ok(ExchangeOutcome::StreamClosed);
            };

            let Some(id) = message_id(&message) else {
                continue;
            };

            match self.state {
                SessionState::HandshakeSent
                    if handshake::is_reserved(&id) && is_response(&message) =>
                {
                    if let Some(error) = message.get("error") {
                        warn!(
                            session_id = %self.session_id,
                            %error,
                            "initialize returned an error; forwarding request anyway"
                        );
                    }
                    self.transition(SessionState::HandshakeAcked);
                    handshake::write_json_line(
                        &mut self.writer,
                        &handshake::initialized_notification(),
                    )
                    .await?;
                    handshake::write_json_line(&mut self.writer, request).await?;
                    self.transition(SessionState::RequestSent);
                }
                SessionState::RequestSent if id == request.id && is_response(&message) => {
                    match RpcResponse::from_message(&message) {
                        Ok(Some(response)) => {
                            self.transition(SessionState::Resolved);
                            return Ok(ExchangeOutcome::Resolved(response));
                        }
                        Ok(None) => {}
                        Err(err) => {
                            self.transition(SessionState::ProcessError);
                            return Err(err);
                        }
                    }
                }
                _ => {
                    debug!(
                        session_id = %self.session_id,
                        %id,
                        state = %self.state,
                        "ignoring uncorrelated message"
                    );
                }
            }
        }
    }

    /// Record a terminal state reached outside [`Exchange::run`].
    pub fn conclude(&mut self, state: SessionState) {
        if !self.state.is_terminal() {
            self.transition(state);
        }
    }

    async fn next_message(&mut self) -> Result<Option<Value>> {
        loop {
            match self.lines.next().await {
                None => return Ok(None),
                Some(Ok(line)) => {
                    if let Some(value) = parse_line(&self.session_id, &line) {
                        return Ok(Some(value));
                    }
                }
                Some(Err(err)) => return Err(err),
            }
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!(
            session_id = %self.session_id,
            from = %self.state,
            to = %next,
            "session state change"
        );
        self.state = next;
    }
}

/// Map an exit that happened before correlation to a session failure.
///
/// `Some(0)` is a clean exit that still left the caller without a response;
/// `None` means the process was killed by a signal.
#[must_use]
pub fn classify_early_exit(code: Option<i32>, stderr: &str) -> AppError {
    let detail = if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    };
    match code {
        Some(0) => AppError::ProcessClosed(format!(
            "tool server exited with status 0 before responding{detail}"
        )),
        Some(code) => AppError::ProcessFailed(format!(
            "tool server exited with code {code}{detail}"
        )),
        None => AppError::ProcessFailed(format!("tool server terminated by signal{detail}")),
    }
}

/// Run `request` in a dedicated tool-server process and return its response.
///
/// # Errors
///
/// - `AppError::Validation`: the request uses the reserved handshake id.
/// - `AppError::Spawn`: the process could not be started.
/// - `AppError::Timeout`: no correlated response within `timeout`.
/// - `AppError::ProcessFailed` / `AppError::ProcessClosed`: the process
///   exited first; the message carries captured stderr.
/// - `AppError::Protocol`: the correlated message was malformed.
pub async fn run_session(
    config: &SpawnConfig,
    request: RpcRequest,
    timeout: Duration,
    ledger: &Arc<SessionLedger>,
) -> Result<RpcResponse> {
    if handshake::is_reserved(&request.id) {
        return Err(AppError::Validation(format!(
            "request id {INIT_ID:?} is reserved for the gateway handshake"
        )));
    }

    let session_id = uuid::Uuid::new_v4().to_string();
    let span = info_span!(
        "session",
        session_id = %session_id,
        method = %request.method,
        id = %request.id
    );

    async move {
        let process = spawn_tool_server(config, &session_id, ledger)?;
        let mut guard = process.guard;
        let mut stderr = process.stderr;
        let mut exchange = Exchange::new(session_id.clone(), process.stdout, process.stdin);

        let outcome = tokio::time::timeout(
            timeout,
            drive(&mut exchange, &mut guard, &mut stderr, &request),
        )
        .await;

        let result = match outcome {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) => {
                exchange.conclude(SessionState::ProcessError);
                Err(err)
            }
            Err(_elapsed) => {
                exchange.conclude(SessionState::TimedOut);
                Err(AppError::Timeout(format!(
                    "tool server did not respond within {}s",
                    timeout.as_secs_f64()
                )))
            }
        };

        guard.terminate().await;
        stderr.abort();

        match &result {
            Ok(_) => info!(state = %exchange.state(), "session resolved"),
            Err(err) => warn!(state = %exchange.state(), %err, "session failed"),
        }
        result
    }
    .instrument(span)
    .await
}

async fn drive<R, W>(
    exchange: &mut Exchange<R, W>,
    guard: &mut ProcessGuard,
    stderr: &mut StderrCapture,
    request: &RpcRequest,
) -> Result<RpcResponse>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let run = exchange.run(request);
    tokio::pin!(run);

    // A wrapper can exit while a descendant still holds stdout open, so the
    // exit status is watched alongside the output.
    let exited = tokio::select! {
        outcome = &mut run => match outcome {
            Ok(ExchangeOutcome::Resolved(response)) => return Ok(response),
            Ok(ExchangeOutcome::StreamClosed) | Err(AppError::Io(_)) => None,
            Err(err) => return Err(err),
        },
        status = guard.wait_exit() => Some(status?),
    };

    let status = match exited {
        Some(status) => {
            debug!(%status, "tool server exited before its output closed");
            // Lines written before the exit are still in the pipe.
            match tokio::time::timeout(EXIT_DRAIN_TIMEOUT, &mut run).await {
                Ok(Ok(ExchangeOutcome::Resolved(response))) => return Ok(response),
                Ok(Err(err)) if !matches!(err, AppError::Io(_)) => return Err(err),
                _ => status,
            }
        }
        None => guard.wait_exit().await?,
    };

    let diagnostics = stderr.collect().await;
    Err(classify_early_exit(status.code(), &diagnostics))
}
