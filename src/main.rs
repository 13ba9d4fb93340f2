#![forbid(unsafe_code)]

//! `mcp-stdio-gateway`: HTTP/SSE front end for stdio JSON-RPC tool servers.
//!
//! Loads configuration and the tool-server credential, then serves the
//! gateway routes until Ctrl-C or `SIGTERM`.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use mcp_stdio_gateway::config::GlobalConfig;
use mcp_stdio_gateway::gateway::handler::AppState;
use mcp_stdio_gateway::gateway::server;
use mcp_stdio_gateway::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "mcp-stdio-gateway",
    about = "HTTP/SSE gateway for stdio JSON-RPC tool servers",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the HTTP port from the configuration file.
    #[arg(long)]
    port: Option<u16>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("mcp-stdio-gateway bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    if let Some(port) = args.port {
        config.http.port = port;
    }

    config.load_credentials().await.map_err(|err| {
        error!(%err, "tool-server credential unavailable");
        err
    })?;
    info!(
        command = %config.process.command,
        timeout_seconds = config.process.timeout_seconds,
        "configuration loaded"
    );

    let ct = CancellationToken::new();
    let state = Arc::new(AppState::new(config, ct.clone()));
    let ledger = Arc::clone(&state.ledger);

    let mut server_handle = tokio::spawn(server::serve(state));

    let finished_early = tokio::select! {
        () = shutdown_signal() => None,
        joined = &mut server_handle => Some(joined),
    };
    let joined = match finished_early {
        Some(joined) => joined,
        None => {
            info!("shutdown signal received");
            ct.cancel();
            server_handle.await
        }
    };

    match joined {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            error!(%err, "gateway server failed");
            return Err(err);
        }
        Err(err) => {
            return Err(AppError::Config(format!("gateway server task panicked: {err}")));
        }
    }

    info!(
        spawned = ledger.spawned(),
        terminated = ledger.terminated(),
        "mcp-stdio-gateway shut down"
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
