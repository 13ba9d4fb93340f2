//! Integration tests for `POST /run`.

use std::time::Duration;

use serde_json::{json, Value};

use super::test_helpers::{
    client, script_config, script_state, spawn_gateway, ECHO_SERVER, ENV_SERVER, ERROR_SERVER,
    FAILING_SERVER, TEST_CREDENTIAL,
};
use mcp_stdio_gateway::gateway::handler::AppState;

const TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn code_is_sent_as_tool_call_and_result_unwrapped() {
    let state = script_state(ECHO_SERVER, TIMEOUT);
    let url = spawn_gateway(state.clone()).await;

    let resp = client()
        .post(format!("{url}/run"))
        .json(&json!({"code": "print(1 + 1)"}))
        .send()
        .await
        .expect("request");
    assert_eq!(resp.status(), 200);

    // The echo server puts the whole forwarded request under `echo`.
    let body: Value = resp.json().await.expect("json body");
    let forwarded = &body["echo"];
    assert_eq!(forwarded["method"], "tools/call");
    assert_eq!(forwarded["params"]["name"], "run_code");
    assert_eq!(forwarded["params"]["arguments"]["code"], "print(1 + 1)");
    assert!(body.get("jsonrpc").is_none(), "envelope is unwrapped");

    assert_eq!(state.ledger.spawned(), 1);
    assert_eq!(state.ledger.terminated(), 1);
}

#[tokio::test]
async fn error_object_is_returned_unwrapped_with_200() {
    let url = spawn_gateway(script_state(ERROR_SERVER, TIMEOUT)).await;

    let resp = client()
        .post(format!("{url}/run"))
        .json(&json!({"code": "raise SystemExit"}))
        .send()
        .await
        .expect("request");
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.expect("json body");
    assert_eq!(body, json!({"code": -32000, "message": "execution failed"}));
}

#[tokio::test]
async fn missing_code_is_rejected_without_spawning() {
    let state = script_state(ECHO_SERVER, TIMEOUT);
    let url = spawn_gateway(state.clone()).await;

    for body in ["", "{}", "{\"code\": \"\"}"] {
        let resp = client()
            .post(format!("{url}/run"))
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .expect("request");
        assert_eq!(resp.status(), 400, "body {body:?}");

        let reply: Value = resp.json().await.expect("json body");
        assert!(reply["error"]
            .as_str()
            .is_some_and(|e| e.contains("missing required field `code`")));
    }
    assert_eq!(state.ledger.spawned(), 0);
}

#[tokio::test]
async fn tool_server_failure_is_500_with_error_text() {
    let url = spawn_gateway(script_state(FAILING_SERVER, TIMEOUT)).await;

    let resp = client()
        .post(format!("{url}/run"))
        .json(&json!({"code": "1"}))
        .send()
        .await
        .expect("request");
    assert_eq!(resp.status(), 500);

    let body: Value = resp.json().await.expect("json body");
    assert!(body["error"]
        .as_str()
        .is_some_and(|e| e.contains("boom: missing API key")));
}

#[tokio::test]
#[serial_test::serial]
async fn child_sees_credential_but_not_other_gateway_env() {
    std::env::set_var("GATEWAY_TEST_SECRET", "should-not-leak");
    let workdir = tempfile::tempdir().expect("tempdir");

    let mut config = script_config(ENV_SERVER);
    config.process.working_dir = Some(workdir.path().canonicalize().expect("canonical"));
    let state = std::sync::Arc::new(AppState::new(config, tokio_util::sync::CancellationToken::new()));
    let url = spawn_gateway(state).await;

    let resp = client()
        .post(format!("{url}/run"))
        .json(&json!({"code": "env"}))
        .send()
        .await
        .expect("request");
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.expect("json body");
    assert_eq!(body["key"], TEST_CREDENTIAL);
    assert_eq!(body["leak"], "");
    assert_eq!(
        body["pwd"],
        workdir.path().canonicalize().expect("canonical").to_str().expect("utf8")
    );

    std::env::remove_var("GATEWAY_TEST_SECRET");
}
