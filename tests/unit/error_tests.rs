//! Unit tests for `AppError` display format and classification.

use mcp_stdio_gateway::AppError;

#[test]
fn timeout_display_has_kind_prefix() {
    let err = AppError::Timeout("tool server did not respond within 60s".into());
    assert_eq!(err.to_string(), "timeout: tool server did not respond within 60s");
}

#[test]
fn process_failed_display_includes_stderr_text() {
    let err = AppError::ProcessFailed("tool server exited with code 1: bad key".into());
    let s = err.to_string();
    assert!(s.starts_with("process failed:"));
    assert!(s.contains("bad key"));
}

#[test]
fn every_kind_has_a_distinct_prefix() {
    let errs = [
        AppError::Config("x".into()),
        AppError::Credential("x".into()),
        AppError::Validation("x".into()),
        AppError::Spawn("x".into()),
        AppError::Timeout("x".into()),
        AppError::ProcessFailed("x".into()),
        AppError::ProcessClosed("x".into()),
        AppError::Protocol("x".into()),
        AppError::Io("x".into()),
    ];
    let rendered: std::collections::HashSet<String> =
        errs.iter().map(ToString::to_string).collect();
    assert_eq!(rendered.len(), errs.len());
}

#[test]
fn only_validation_is_a_caller_error() {
    assert!(AppError::Validation("missing code".into()).is_caller_error());
    assert!(!AppError::Spawn("enoent".into()).is_caller_error());
    assert!(!AppError::Timeout("60s".into()).is_caller_error());
    assert!(!AppError::ProcessClosed("exit 0".into()).is_caller_error());
}

#[test]
fn io_error_converts_to_io_variant() {
    let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
    let err: AppError = io.into();
    assert!(matches!(err, AppError::Io(ref msg) if msg.contains("pipe closed")));
}

#[test]
fn toml_error_converts_to_config_variant() {
    let parse = toml::from_str::<toml::Value>("= nope").unwrap_err();
    let err: AppError = parse.into();
    assert!(err.to_string().starts_with("config: invalid config"));
}
