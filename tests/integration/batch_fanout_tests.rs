//! Integration tests for batched `POST /mcp`: one process per element.

use std::time::{Duration, Instant};

use serde_json::{json, Value};

use super::test_helpers::{
    client, script_state, spawn_gateway, ECHO_SERVER, SELECTIVE_FAILING_SERVER,
};

const TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn batch_runs_one_process_per_request_and_keeps_order() {
    let state = script_state(ECHO_SERVER, TIMEOUT);
    let url = spawn_gateway(state.clone()).await;

    let resp = client()
        .post(format!("{url}/mcp"))
        .json(&json!([
            {"jsonrpc": "2.0", "id": "first", "method": "tools/list"},
            {"jsonrpc": "2.0", "id": 2, "method": "tools/call", "params": {"name": "run_code"}},
            {"jsonrpc": "2.0", "id": "third", "method": "ping"}
        ]))
        .send()
        .await
        .expect("request");
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.expect("json body");
    let replies = body.as_array().expect("batch reply is an array");
    assert_eq!(replies.len(), 3);
    assert_eq!(replies[0]["id"], "first");
    assert_eq!(replies[1]["id"], 2);
    assert_eq!(replies[1]["result"]["echo"]["params"]["name"], "run_code");
    assert_eq!(replies[2]["id"], "third");
    assert_eq!(replies[2]["result"]["echo"]["method"], "ping");

    assert_eq!(state.ledger.spawned(), 3);
    assert_eq!(state.ledger.terminated(), 3);
}

#[tokio::test]
async fn single_element_batch_still_replies_with_array() {
    let url = spawn_gateway(script_state(ECHO_SERVER, TIMEOUT)).await;

    let resp = client()
        .post(format!("{url}/mcp"))
        .json(&json!([{"jsonrpc": "2.0", "id": 1, "method": "tools/list"}]))
        .send()
        .await
        .expect("request");

    let body: Value = resp.json().await.expect("json body");
    assert_eq!(body.as_array().map(Vec::len), Some(1));
}

/// Sessions run concurrently: eight echo sessions finish well within eight
/// sequential handshakes plus termination grace periods.
#[tokio::test]
async fn batch_sessions_run_concurrently() {
    let state = script_state(ECHO_SERVER, TIMEOUT);
    let url = spawn_gateway(state.clone()).await;
    let batch: Vec<Value> = (0..8)
        .map(|i| json!({"jsonrpc": "2.0", "id": i, "method": "tools/list"}))
        .collect();

    let started = Instant::now();
    let resp = client()
        .post(format!("{url}/mcp"))
        .json(&batch)
        .send()
        .await
        .expect("request");
    assert_eq!(resp.status(), 200);
    assert!(started.elapsed() < Duration::from_secs(8));

    let body: Value = resp.json().await.expect("json body");
    let ids: Vec<i64> = body
        .as_array()
        .expect("array")
        .iter()
        .map(|r| r["id"].as_i64().expect("numeric id"))
        .collect();
    assert_eq!(ids, (0..8).collect::<Vec<_>>());
    assert_eq!(state.ledger.live(), 0);
}

#[tokio::test]
async fn empty_batch_is_rejected_without_spawning() {
    let state = script_state(ECHO_SERVER, TIMEOUT);
    let url = spawn_gateway(state.clone()).await;

    let resp = client()
        .post(format!("{url}/mcp"))
        .json(&json!([]))
        .send()
        .await
        .expect("request");
    assert_eq!(resp.status(), 400);

    let body: Value = resp.json().await.expect("json body");
    assert_eq!(body["error"]["code"], -32600);
    assert_eq!(state.ledger.spawned(), 0);
}

#[tokio::test]
async fn invalid_element_rejects_whole_batch_without_spawning() {
    let state = script_state(ECHO_SERVER, TIMEOUT);
    let url = spawn_gateway(state.clone()).await;

    let resp = client()
        .post(format!("{url}/mcp"))
        .json(&json!([
            {"jsonrpc": "2.0", "id": 1, "method": "tools/list"},
            {"jsonrpc": "2.0", "id": 2}
        ]))
        .send()
        .await
        .expect("request");
    assert_eq!(resp.status(), 400);
    assert_eq!(state.ledger.spawned(), 0);
}

#[tokio::test]
async fn one_failed_session_fails_the_whole_batch() {
    let state = script_state(SELECTIVE_FAILING_SERVER, TIMEOUT);
    let url = spawn_gateway(state.clone()).await;

    let resp = client()
        .post(format!("{url}/mcp"))
        .json(&json!([
            {"jsonrpc": "2.0", "id": "ok-1", "method": "tools/list"},
            {"jsonrpc": "2.0", "id": "bad", "method": "tools/list"},
            {"jsonrpc": "2.0", "id": "ok-2", "method": "tools/list"}
        ]))
        .send()
        .await
        .expect("request");
    assert_eq!(resp.status(), 500);

    let body: Value = resp.json().await.expect("json body");
    assert!(body.is_object(), "failure is a single envelope, not an array");
    assert!(body["id"].is_null());
    assert_eq!(body["error"]["code"], -32603);
    let message = body["error"]["message"].as_str().expect("message");
    assert!(message.contains("code 3"), "failing session surfaced: {message}");
    assert!(message.contains("rejected request bad"), "stderr surfaced: {message}");

    assert_eq!(state.ledger.spawned(), 3);
    assert_eq!(state.ledger.terminated(), 3);
}
