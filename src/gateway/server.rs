//! HTTP listener for the gateway routes.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use super::handler::{self, AppState};
use crate::{AppError, Result};

/// Build the gateway router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handler::health))
        .route("/mcp", post(handler::mcp))
        .route("/sse", get(handler::sse))
        .route("/run", post(handler::run))
        .with_state(state)
}

/// Bind `config.http` and serve until `state.shutdown` fires.
///
/// # Errors
///
/// Returns `AppError::Config` if the listener cannot bind or the server fails.
pub async fn serve(state: Arc<AppState>) -> Result<()> {
    let bind = state.config.bind_address();
    let listener = TcpListener::bind(&bind)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind {bind}: {err}")))?;
    serve_with_listener(listener, state).await
}

/// Serve on an already bound listener until `state.shutdown` fires.
///
/// # Errors
///
/// Returns `AppError::Config` if the server fails.
pub async fn serve_with_listener(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    let addr = listener
        .local_addr()
        .map_err(|err| AppError::Config(format!("listener has no local address: {err}")))?;
    let ct = state.shutdown.clone();

    info!(%addr, "starting HTTP gateway");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Config(format!("HTTP server error: {err}")))?;

    info!("HTTP gateway shut down");
    Ok(())
}
