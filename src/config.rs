//! Global configuration parsing, validation, and credential loading.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::{AppError, Result};

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct HttpConfig {
    /// Interface the gateway binds to.
    #[serde(default = "default_http_host")]
    pub host: String,
    /// TCP port; `0` lets the OS pick one.
    #[serde(default = "default_http_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_http_host(),
            port: default_http_port(),
        }
    }
}

/// How the tool-server subprocess is launched and bounded.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ProcessConfig {
    /// Tool-server binary (e.g. `npx`, `uvx`, `python`).
    pub command: String,
    /// Arguments passed to the binary.
    #[serde(default)]
    pub args: Vec<String>,
    /// Directory the child starts in; inherits the gateway's when absent.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Ceiling for one complete session, handshake included.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Grace period between `SIGTERM` and a hard kill.
    #[serde(default = "default_kill_grace_millis")]
    pub kill_grace_millis: u64,
    /// Extra environment variables inherited by the child on top of the allowlist.
    #[serde(default)]
    pub env_passthrough: Vec<String>,
}

/// Where the tool-server API credential comes from and how it reaches the child.
///
/// The secret itself is never read from the TOML file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CredentialConfig {
    /// Keychain service name searched before the environment.
    #[serde(default = "default_keyring_service")]
    pub service: String,
    /// Gateway environment variable holding the credential.
    #[serde(default = "default_credential_env")]
    pub env_var: String,
    /// Variable name the child receives the credential under; defaults to `env_var`.
    #[serde(default)]
    pub child_env: Option<String>,
    /// Credential value (populated at runtime).
    #[serde(skip)]
    pub value: String,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            service: default_keyring_service(),
            env_var: default_credential_env(),
            child_env: None,
            value: String::new(),
        }
    }
}

impl CredentialConfig {
    /// Name of the variable injected into the child environment.
    #[must_use]
    pub fn child_env_name(&self) -> &str {
        self.child_env.as_deref().unwrap_or(&self.env_var)
    }
}

/// The single tool advertised on `/sse` and invoked by `/run`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ToolConfig {
    /// Tool name used in `tools/call`.
    #[serde(default = "default_tool_name")]
    pub name: String,
    /// Human-readable description.
    #[serde(default = "default_tool_description")]
    pub description: String,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            name: default_tool_name(),
            description: default_tool_description(),
        }
    }
}

fn default_http_host() -> String {
    "127.0.0.1".into()
}

fn default_http_port() -> u16 {
    3000
}

fn default_timeout_seconds() -> u64 {
    60
}

fn default_kill_grace_millis() -> u64 {
    2000
}

fn default_keyring_service() -> String {
    "mcp-stdio-gateway".into()
}

fn default_credential_env() -> String {
    "TOOL_API_KEY".into()
}

fn default_tool_name() -> String {
    "run_code".into()
}

fn default_tool_description() -> String {
    "Execute code in a sandboxed environment and return its output.".into()
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// HTTP listener settings.
    #[serde(default)]
    pub http: HttpConfig,
    /// Tool-server launch settings.
    pub process: ProcessConfig,
    /// Credential lookup settings.
    #[serde(default)]
    pub credential: CredentialConfig,
    /// Advertised tool.
    #[serde(default)]
    pub tool: ToolConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the tool-server credential from the OS keychain with env-var fallback.
    ///
    /// This is the gateway's only authentication: the credential must be
    /// present and non-empty, otherwise startup fails.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Credential` if neither keychain nor environment
    /// provides a non-empty value.
    pub async fn load_credentials(&mut self) -> Result<()> {
        self.credential.value =
            load_credential(&self.credential.service, &self.credential.env_var).await?;
        Ok(())
    }

    /// Session ceiling as a [`Duration`].
    #[must_use]
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.process.timeout_seconds)
    }

    /// Grace period between polite and forced termination.
    #[must_use]
    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.process.kill_grace_millis)
    }

    /// `host:port` string the listener binds to.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.http.host, self.http.port)
    }

    fn validate(&mut self) -> Result<()> {
        if self.process.command.trim().is_empty() {
            return Err(AppError::Config("process.command must not be empty".into()));
        }

        if self.process.timeout_seconds == 0 {
            return Err(AppError::Config(
                "process.timeout_seconds must be greater than zero".into(),
            ));
        }

        if self.credential.env_var.trim().is_empty() {
            return Err(AppError::Config(
                "credential.env_var must not be empty".into(),
            ));
        }

        if self.tool.name.trim().is_empty() {
            return Err(AppError::Config("tool.name must not be empty".into()));
        }

        if let Some(dir) = &self.process.working_dir {
            let canonical = dir.canonicalize().map_err(|err| {
                AppError::Config(format!("process.working_dir invalid: {err}"))
            })?;
            self.process.working_dir = Some(canonical);
        }

        Ok(())
    }
}

/// Load a single credential from OS keychain with env-var fallback.
async fn load_credential(service: &str, env_key: &str) -> Result<String> {
    let service_name = service.to_owned();
    let key = env_key.to_owned();

    // keyring is synchronous I/O.
    let keychain_result = tokio::task::spawn_blocking(move || {
        keyring::Entry::new(&service_name, &key).and_then(|entry| entry.get_password())
    })
    .await
    .map_err(|err| AppError::Credential(format!("keychain task panicked: {err}")))?;

    match keychain_result {
        Ok(value) if !value.trim().is_empty() => return Ok(value),
        Ok(_) => {
            warn!(service, key = env_key, "keychain entry is empty, trying env var");
        }
        Err(err) => {
            warn!(service, key = env_key, ?err, "keychain lookup failed, trying env var");
        }
    }

    match env::var(env_key) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(AppError::Credential(format!(
            "{env_key} not found in keychain service {service} or environment"
        ))),
    }
}
