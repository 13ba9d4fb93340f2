//! Stdio side of the gateway: tool-server processes speaking NDJSON JSON-RPC.
//!
//! Every session owns one process and its streams exclusively:
//! - `codec`: [`LinesCodec`](tokio_util::codec::LinesCodec)-based line framing.
//! - `reader`: line parsing and id extraction.
//! - `handshake`: the fixed `initialize` exchange.
//! - `spawner`: process launch, stderr capture, and the termination guard.
//! - `session`: the per-request state machine and correlation loop.

pub mod codec;
pub mod handshake;
pub mod reader;
pub mod session;
pub mod spawner;

pub use session::{run_session, Exchange, ExchangeOutcome, SessionState};
pub use spawner::{SessionLedger, SpawnConfig};
