//! Error types shared across the gateway.

use std::fmt::{Display, Formatter};

/// Shared gateway result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Gateway error enumeration covering every session and startup failure mode.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// The tool-server credential is missing from both keychain and environment.
    Credential(String),
    /// Caller input was rejected before any subprocess was spawned.
    Validation(String),
    /// The tool-server process could not be created.
    Spawn(String),
    /// No correlated response arrived within the session ceiling.
    Timeout(String),
    /// The tool-server exited with a failure status before responding.
    ProcessFailed(String),
    /// The tool-server exited cleanly or closed its output before responding.
    ProcessClosed(String),
    /// The tool-server produced a message that violates the JSON-RPC contract.
    Protocol(String),
    /// File-system or stream I/O failure.
    Io(String),
}

impl AppError {
    /// Whether the failure originates from caller input rather than the session.
    #[must_use]
    pub fn is_caller_error(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Credential(msg) => write!(f, "credential: {msg}"),
            Self::Validation(msg) => write!(f, "validation: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::ProcessFailed(msg) => write!(f, "process failed: {msg}"),
            Self::ProcessClosed(msg) => write!(f, "process closed: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
