//! MCP client implementation

use a365_auth::FinalToken;
use a365_core::{A365Error, Result, ToolServer};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::transport::{HttpTransport, Transport};
use crate::types::{
    InitializeParams, InitializeResult, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    ListToolsResult, McpTool, ToolCallParams, ToolCallResult,
};

/// Client for a single MCP tool server.
pub struct McpClient {
    /// Server name for identification
    name: String,

    transport: Box<dyn Transport>,

    /// Request ID counter
    request_id: AtomicU64,

    /// Set after a successful `initialize`
    server_info: Option<InitializeResult>,
}

impl McpClient {
    pub fn new(name: impl Into<String>, transport: Box<dyn Transport>) -> Self {
        Self {
            name: name.into(),
            transport,
            request_id: AtomicU64::new(1),
            server_info: None,
        }
    }

    /// Client for `server` that presents `token` on every request.
    pub fn connect(
        server: &ToolServer,
        token: &FinalToken,
        headers: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<Self> {
        let transport = HttpTransport::new(&server.name, &server.url, token, headers, timeout)?;
        Ok(Self::new(&server.name, Box::new(transport)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn server_info(&self) -> Option<&InitializeResult> {
        self.server_info.as_ref()
    }

    fn next_request_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn send_request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse> {
        let request = JsonRpcRequest::new(self.next_request_id(), method, params);
        self.transport.send_request(&request).await
    }

    /// Run the `initialize` handshake and announce `notifications/initialized`.
    pub async fn initialize(&mut self) -> Result<InitializeResult> {
        info!("Initializing MCP client: {}", self.name);

        let params = serde_json::to_value(InitializeParams::default())?;
        let response = self.send_request("initialize", Some(params)).await?;

        if let Some(error) = response.error {
            return Err(A365Error::Mcp(format!(
                "Failed to initialize MCP connection to '{}': {} (code {})",
                self.name, error.message, error.code
            )));
        }

        let result: InitializeResult = serde_json::from_value(response.result.ok_or_else(|| {
            A365Error::Mcp(format!("Initialize response from '{}' missing result", self.name))
        })?)?;

        match &result.server_info {
            Some(server_info) => info!(
                "Connected to MCP server: {} v{} (protocol {})",
                server_info.name, server_info.version, result.protocol_version
            ),
            None => info!(
                "MCP client '{}' initialized with protocol version: {}",
                self.name, result.protocol_version
            ),
        }

        self.transport
            .send_notification(&JsonRpcNotification::new("notifications/initialized", None))
            .await?;

        self.server_info = Some(result.clone());
        Ok(result)
    }

    /// List available tools from the MCP server
    pub async fn list_tools(&self) -> Result<Vec<McpTool>> {
        debug!("Listing tools from MCP server: {}", self.name);

        let response = self.send_request("tools/list", None).await?;

        if let Some(error) = response.error {
            return Err(A365Error::Mcp(format!(
                "Failed to list tools on '{}': {}",
                self.name, error.message
            )));
        }

        let result: ListToolsResult = serde_json::from_value(response.result.ok_or_else(|| {
            A365Error::Mcp(format!("List tools response from '{}' missing result", self.name))
        })?)?;

        info!(
            "Discovered {} tools from MCP server '{}'",
            result.tools.len(),
            self.name
        );
        Ok(result.tools)
    }

    /// Call a tool on the MCP server.
    ///
    /// A JSON-RPC error or a result flagged `isError` is a `ToolInvocation` error.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult> {
        debug!("Calling MCP tool '{}' on server '{}'", name, self.name);

        let params = ToolCallParams {
            name: name.to_string(),
            arguments,
        };
        let response = self
            .send_request("tools/call", Some(serde_json::to_value(params)?))
            .await?;

        if let Some(error) = response.error {
            warn!("Tool '{}' on '{}' failed: {}", name, self.name, error.message);
            return Err(A365Error::ToolInvocation {
                tool: name.to_string(),
                code: error.code,
                message: error.message,
            });
        }

        let result: ToolCallResult = serde_json::from_value(response.result.ok_or_else(|| {
            A365Error::Mcp(format!("Tool '{}' response missing result", name))
        })?)?;

        if result.is_error() {
            let message = result.text();
            warn!("Tool '{}' on '{}' returned an error: {}", name, self.name, message);
            return Err(A365Error::ToolInvocation {
                tool: name.to_string(),
                code: 0,
                message: if message.is_empty() {
                    "tool reported an error without details".to_string()
                } else {
                    message
                },
            });
        }

        Ok(result)
    }
}
