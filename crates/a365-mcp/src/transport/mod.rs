//! Transport layer for MCP communication.
//!
//! Agent 365 tool servers speak the streamable HTTP transport: every message is
//! a POST, and the answer comes back as plain JSON or as a short SSE stream.

use a365_core::Result;
use async_trait::async_trait;

use crate::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

pub mod http;

pub use http::HttpTransport;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a JSON-RPC request and wait for the matching response.
    async fn send_request(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse>;

    /// Send a JSON-RPC notification (no response expected)
    async fn send_notification(&self, notification: &JsonRpcNotification) -> Result<()>;
}
