//! HTTP side of the gateway: routes, shared state, and session fan-out.

pub mod dispatch;
pub mod handler;
pub mod server;
