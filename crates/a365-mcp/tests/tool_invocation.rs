use std::collections::HashMap;
use std::time::Duration;

use a365_core::A365Error;
use a365_mcp::{extract_chat_id, HttpTransport, McpClient};
use serde_json::json;
use wiremock::{
    matchers::{body_string_contains, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

async fn teams_server() -> MockServer {
    let server = MockServer::start().await;

    let initialize = concat!(
        "event: message\n",
        "data: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"protocolVersion\":\"2025-03-26\",",
        "\"capabilities\":{\"tools\":{}},\"serverInfo\":{\"name\":\"mcp_TeamsServer\",\"version\":\"1.0.0\"}}}\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/agents/servers/mcp_TeamsServer/mcp"))
        .and(body_string_contains("\"method\":\"initialize\""))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Mcp-Session-Id", "teams-session")
                .set_body_raw(initialize, "text/event-stream"),
        )
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(body_string_contains("notifications/initialized"))
        .and(header("mcp-session-id", "teams-session"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(body_string_contains("\"name\":\"createChat\""))
        .and(header("mcp-session-id", "teams-session"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": { "content": [{ "text": "{\"id\":\"chat-42\"}" }] }
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(body_string_contains("\"name\":\"sendMessage\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 3,
            "error": { "code": -32603, "message": "Chat not found" }
        })))
        .mount(&server)
        .await;

    server
}

async fn client(server: &MockServer) -> McpClient {
    let transport = HttpTransport::with_bearer(
        "teams",
        format!("{}/agents/servers/mcp_TeamsServer/mcp", server.uri()),
        "tok3",
        &HashMap::new(),
        Duration::from_secs(5),
    )
    .unwrap();
    let mut client = McpClient::new("teams", Box::new(transport));
    client.initialize().await.unwrap();
    client
}

#[tokio::test]
async fn create_chat_resolves_chat_id() {
    let server = teams_server().await;
    let client = client(&server).await;

    let result = client
        .call_tool("createChat", json!({ "members": ["manager@contoso.com"] }))
        .await
        .unwrap();
    assert_eq!(extract_chat_id(&result).unwrap(), "chat-42");

    for request in server.received_requests().await.unwrap() {
        let authorization = request.headers.get("authorization").unwrap().to_str().unwrap();
        assert_eq!(authorization, "Bearer tok3");
    }
}

#[tokio::test]
async fn json_rpc_error_with_http_200_is_a_tool_failure() {
    let server = teams_server().await;
    let client = client(&server).await;

    let err = client
        .call_tool("sendMessage", json!({ "chatId": "missing", "content": "hi" }))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        A365Error::ToolInvocation { ref tool, code: -32603, ref message }
            if tool == "sendMessage" && message == "Chat not found"
    ));
    assert!(!err.is_authorization_failure());
    assert!(!err.is_credential_exchange());
}
