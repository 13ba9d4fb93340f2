#![forbid(unsafe_code)]

//! HTTP/SSE gateway that runs each JSON-RPC call in a fresh stdio tool-server
//! process.

pub mod config;
pub mod errors;
pub mod gateway;
pub mod rpc;
pub mod stdio;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
