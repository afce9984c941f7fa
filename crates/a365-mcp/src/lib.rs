//! MCP (Model Context Protocol) client for Agent 365 tool servers.
//!
//! Speaks JSON-RPC 2.0 over the streamable HTTP transport and presents the
//! delegated agentic token produced by `a365-auth`.

pub mod client;
pub mod payload;
pub mod transport;
pub mod types;

pub use client::McpClient;
pub use payload::extract_chat_id;
pub use transport::{HttpTransport, Transport};
pub use types::{
    ContentItem, InitializeResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse, McpTool,
    ToolCallResult, PROTOCOL_VERSION,
};
