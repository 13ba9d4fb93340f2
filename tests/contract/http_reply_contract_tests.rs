//! Contract tests for the JSON shapes returned to HTTP callers.

use mcp_stdio_gateway::config::ToolConfig;
use mcp_stdio_gateway::gateway::handler::tools_payload;
use mcp_stdio_gateway::rpc::{error_envelope, INTERNAL_ERROR, INVALID_REQUEST, PARSE_ERROR};

/// Standard JSON-RPC 2.0 codes the gateway emits itself.
const GATEWAY_ERROR_CODES: &[i64] = &[-32700, -32600, -32603];

#[test]
fn gateway_error_codes_are_standard() {
    assert_eq!(
        [PARSE_ERROR, INVALID_REQUEST, INTERNAL_ERROR].as_slice(),
        GATEWAY_ERROR_CODES
    );
}

#[test]
fn error_envelope_has_exactly_the_envelope_members() {
    let envelope = error_envelope(INTERNAL_ERROR, "timeout: tool server did not respond within 60s");
    let members: Vec<&str> = envelope
        .as_object()
        .expect("object")
        .keys()
        .map(String::as_str)
        .collect();

    assert_eq!(members.len(), 3);
    for key in ["jsonrpc", "id", "error"] {
        assert!(members.contains(&key), "missing {key}");
    }
    assert!(envelope.get("result").is_none());
    assert!(envelope["error"]["message"].is_string());
}

#[test]
fn tools_event_matches_tools_list_shape() {
    let payload = tools_payload(&ToolConfig::default());
    let tool = &payload["tools"][0];

    for key in ["name", "description", "inputSchema"] {
        assert!(tool.get(key).is_some(), "tool descriptor missing {key}");
    }
    let schema = &tool["inputSchema"];
    assert_eq!(schema["type"], "object");
    assert!(schema["properties"]["code"].is_object());
    assert!(schema["required"]
        .as_array()
        .expect("required list")
        .iter()
        .any(|v| v == "code"));
}
