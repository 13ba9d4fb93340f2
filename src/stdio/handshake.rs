//! Fixed initialize handshake written at the start of every session.
//!
//! 1. `initialize` request with the reserved [`INIT_ID`], so its response can
//!    never be mistaken for the caller's.
//! 2. `notifications/initialized` once the response arrives (no id).
//!
//! Nothing is negotiated: the payload is the same for every session and the
//! server's advertised capabilities are not inspected.

use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::rpc::{RpcId, RpcRequest, JSONRPC_VERSION};
use crate::{AppError, Result};

/// Correlation id reserved for the initialize exchange.
pub const INIT_ID: &str = "gateway-initialize";

/// MCP protocol revision announced to tool servers.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Client name announced in `clientInfo`.
pub const CLIENT_NAME: &str = env!("CARGO_PKG_NAME");

/// Whether `id` collides with the reserved handshake id.
#[must_use]
pub fn is_reserved(id: &RpcId) -> bool {
    matches!(id, RpcId::String(s) if s == INIT_ID)
}

/// The `initialize` request sent first in every session.
#[must_use]
pub fn initialize_request() -> RpcRequest {
    RpcRequest::new(
        INIT_ID,
        "initialize",
        Some(json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": CLIENT_NAME,
                "version": env!("CARGO_PKG_VERSION")
            }
        })),
    )
}

/// The `notifications/initialized` notification sent after the ack.
#[must_use]
pub fn initialized_notification() -> Value {
    json!({
        "jsonrpc": JSONRPC_VERSION,
        "method": "notifications/initialized"
    })
}

/// Serialise `value` as one compact JSON line and flush it to `writer`.
///
/// # Errors
///
/// Returns `AppError::Protocol` if serialisation fails and `AppError::Io` if
/// the write fails (typically because the tool server already exited).
pub async fn write_json_line<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let mut bytes = serde_json::to_vec(value)
        .map_err(|e| AppError::Protocol(format!("failed to serialise outbound message: {e}")))?;
    bytes.push(b'\n');
    writer
        .write_all(&bytes)
        .await
        .map_err(|e| AppError::Io(format!("write to tool server failed: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| AppError::Io(format!("flush to tool server failed: {e}")))
}
