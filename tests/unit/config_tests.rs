//! Unit tests for `GlobalConfig` parsing, defaults, and validation.

use std::time::Duration;

use mcp_stdio_gateway::{config::GlobalConfig, AppError};

fn sample_toml(workdir: &str) -> String {
    format!(
        r#"
[http]
host = "0.0.0.0"
port = 8080

[process]
command = "uvx"
args = ["mcp-server-code-runner"]
working_dir = '{workdir}'
timeout_seconds = 30
kill_grace_millis = 500
env_passthrough = ["HTTPS_PROXY"]

[credential]
service = "code-runner"
env_var = "RUNNER_API_KEY"
child_env = "API_KEY"

[tool]
name = "execute"
description = "Run a snippet"
"#
    )
}

const MINIMAL_TOML: &str = r#"
[process]
command = "npx"
"#;

#[test]
fn full_config_parses() {
    let temp = tempfile::tempdir().expect("tempdir");
    let toml = sample_toml(temp.path().to_str().expect("utf8 path"));
    let config = GlobalConfig::from_toml_str(&toml).expect("config parses");

    assert_eq!(config.bind_address(), "0.0.0.0:8080");
    assert_eq!(config.process.command, "uvx");
    assert_eq!(config.process.args, vec!["mcp-server-code-runner"]);
    assert_eq!(config.session_timeout(), Duration::from_secs(30));
    assert_eq!(config.kill_grace(), Duration::from_millis(500));
    assert_eq!(config.process.env_passthrough, vec!["HTTPS_PROXY"]);
    assert_eq!(config.credential.env_var, "RUNNER_API_KEY");
    assert_eq!(config.credential.child_env_name(), "API_KEY");
    assert_eq!(config.tool.name, "execute");
    assert!(config.process.working_dir.expect("workdir").is_absolute());
}

#[test]
fn minimal_config_applies_defaults() {
    let config = GlobalConfig::from_toml_str(MINIMAL_TOML).expect("config parses");

    assert_eq!(config.http.host, "127.0.0.1");
    assert_eq!(config.http.port, 3000);
    assert!(config.process.args.is_empty());
    assert_eq!(config.session_timeout(), Duration::from_secs(60));
    assert_eq!(config.kill_grace(), Duration::from_millis(2000));
    assert_eq!(config.credential.env_var, "TOOL_API_KEY");
    assert_eq!(config.credential.child_env_name(), "TOOL_API_KEY");
    assert_eq!(config.tool.name, "run_code");
    assert!(config.credential.value.is_empty());
}

#[test]
fn missing_process_section_is_rejected() {
    let result = GlobalConfig::from_toml_str("[http]\nport = 1\n");
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn empty_command_is_rejected() {
    let result = GlobalConfig::from_toml_str("[process]\ncommand = \"  \"\n");
    match result {
        Err(AppError::Config(msg)) => assert!(msg.contains("process.command")),
        other => panic!("expected config error, got {other:?}"),
    }
}

#[test]
fn zero_timeout_is_rejected() {
    let result =
        GlobalConfig::from_toml_str("[process]\ncommand = \"npx\"\ntimeout_seconds = 0\n");
    match result {
        Err(AppError::Config(msg)) => assert!(msg.contains("timeout_seconds")),
        other => panic!("expected config error, got {other:?}"),
    }
}

#[test]
fn nonexistent_working_dir_is_rejected() {
    let result = GlobalConfig::from_toml_str(
        "[process]\ncommand = \"npx\"\nworking_dir = \"/definitely/not/here\"\n",
    );
    match result {
        Err(AppError::Config(msg)) => assert!(msg.contains("working_dir")),
        other => panic!("expected config error, got {other:?}"),
    }
}

#[test]
fn secret_value_is_never_read_from_toml() {
    let toml = "[process]\ncommand = \"npx\"\n\n[credential]\nvalue = \"leaked\"\n";
    let config = GlobalConfig::from_toml_str(toml).expect("unknown keys are ignored");
    assert!(config.credential.value.is_empty());
}

#[test]
fn load_from_path_reads_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("gateway.toml");
    std::fs::write(&path, MINIMAL_TOML).expect("write config");

    let config = GlobalConfig::load_from_path(&path).expect("load");
    assert_eq!(config.process.command, "npx");
}

#[test]
fn load_from_missing_path_is_config_error() {
    let result = GlobalConfig::load_from_path("/no/such/gateway.toml");
    match result {
        Err(AppError::Config(msg)) => assert!(msg.contains("failed to read config")),
        other => panic!("expected config error, got {other:?}"),
    }
}
