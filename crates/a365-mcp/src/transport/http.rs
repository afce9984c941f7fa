//! Streamable HTTP transport for Agent 365 MCP tool servers

use a365_auth::FinalToken;
use a365_core::{A365Error, Result};
use async_trait::async_trait;
use eventsource_stream::{EventStreamError, Eventsource};
use futures::StreamExt;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE,
};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::Transport;
use crate::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

/// Session header assigned by the server on `initialize`.
pub const SESSION_HEADER: &str = "mcp-session-id";
pub const ACCEPT_VALUE: &str = "application/json, text/event-stream";

const MAX_ERROR_BODY_CHARS: usize = 512;

/// HTTP transport whose client carries the bearer token in its default headers.
pub struct HttpTransport {
    server: String,
    url: String,
    client: reqwest::Client,
    session_id: RwLock<Option<String>>,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("server", &self.server)
            .field("url", &self.url)
            .finish()
    }
}

impl HttpTransport {
    pub fn new(
        server: impl Into<String>,
        url: impl Into<String>,
        token: &FinalToken,
        headers: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<Self> {
        Self::with_bearer(server, url, token.secret(), headers, timeout)
    }

    /// Build a transport from a raw bearer value. Empty bearers are refused.
    pub fn with_bearer(
        server: impl Into<String>,
        url: impl Into<String>,
        bearer: &str,
        headers: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<Self> {
        let server = server.into();
        let url = url.into();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(A365Error::Config(format!(
                "MCP URL for '{server}' must start with http:// or https://"
            )));
        }
        if bearer.trim().is_empty() {
            return Err(A365Error::Config(format!(
                "Refusing to connect to '{server}' with an empty bearer token"
            )));
        }

        // Extra headers go in first so they can never replace the protocol headers.
        let mut default_headers = HeaderMap::new();
        for (key, value) in headers {
            let header_name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| A365Error::Config(format!("Invalid header name '{}': {}", key, e)))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|e| A365Error::Config(format!("Invalid header value for '{}': {}", key, e)))?;
            default_headers.insert(header_name, header_value);
        }

        let mut authorization = HeaderValue::from_str(&format!("Bearer {bearer}")).map_err(|_| {
            A365Error::Config("Bearer token contains characters not allowed in a header".into())
        })?;
        authorization.set_sensitive(true);
        default_headers.insert(AUTHORIZATION, authorization);
        default_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        default_headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_VALUE));

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(default_headers)
            .build()
            .map_err(|e| A365Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        info!("MCP transport ready for '{}' at {}", server, url);
        Ok(Self {
            server,
            url,
            client,
            session_id: RwLock::new(None),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }

    async fn post(&self, body: String, method: &str) -> Result<reqwest::Response> {
        debug!("POST {} ({})", self.url, method);
        let mut request = self.client.post(&self.url).body(body);
        if let Some(session) = self.session_id().await {
            request = request.header(SESSION_HEADER, session);
        }

        let response = request
            .send()
            .await
            .map_err(|e| self.transport_error(method, e))?;

        let assigned = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        if let Some(assigned) = assigned {
            let mut session = self.session_id.write().await;
            if session.as_deref() != Some(assigned.as_str()) {
                debug!("MCP session for '{}': {}", self.server, assigned);
                *session = Some(assigned);
            }
        }

        let status = response.status();
        if !status.is_success() {
            let challenge = response
                .headers()
                .get(WWW_AUTHENTICATE)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned);
            let body = response.text().await.unwrap_or_default();
            let body = match challenge {
                Some(challenge) if body.trim().is_empty() => challenge,
                _ => truncate(&body),
            };
            return Err(A365Error::ToolServerRejected {
                server: self.server.clone(),
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }

    async fn read_response(&self, response: reqwest::Response, request_id: u64) -> Result<JsonRpcResponse> {
        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|content_type| content_type.starts_with("text/event-stream"))
            .unwrap_or(false);

        if is_event_stream {
            return self.read_event_stream(response, request_id).await;
        }

        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error("reading response", e))?;
        if body.trim().is_empty() {
            return Err(A365Error::Mcp(format!(
                "'{}' sent an empty response to request {}",
                self.server, request_id
            )));
        }
        serde_json::from_str(&body).map_err(|e| {
            A365Error::Mcp(format!(
                "Invalid JSON-RPC response from '{}': {} ({})",
                self.server,
                e,
                truncate(&body)
            ))
        })
    }

    /// Take the first `data:` event that answers the request; the stream is
    /// dropped as soon as it is found.
    async fn read_event_stream(
        &self,
        response: reqwest::Response,
        request_id: u64,
    ) -> Result<JsonRpcResponse> {
        let mut events = Box::pin(response.bytes_stream().eventsource());

        while let Some(event) = events.next().await {
            let event = event.map_err(|e| self.stream_error(e))?;
            if !(event.event.is_empty() || event.event == "message") || event.data.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JsonRpcResponse>(&event.data) {
                Ok(message) if message.answers(request_id) => return Ok(message),
                Ok(_) => debug!("Skipping SSE message that does not answer request {}", request_id),
                Err(e) => debug!("Skipping SSE data that is not JSON-RPC: {}", e),
            }
        }

        Err(A365Error::Mcp(format!(
            "Event stream from '{}' ended without a response to request {}",
            self.server, request_id
        )))
    }

    fn transport_error(&self, context: &str, err: reqwest::Error) -> A365Error {
        A365Error::Transport {
            context: format!("{} on '{}'", context, self.server),
            message: err.to_string(),
            timed_out: err.is_timeout(),
        }
    }

    fn stream_error(&self, err: EventStreamError<reqwest::Error>) -> A365Error {
        let timed_out = matches!(&err, EventStreamError::Transport(e) if e.is_timeout());
        A365Error::Transport {
            context: format!("reading event stream on '{}'", self.server),
            message: err.to_string(),
            timed_out,
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send_request(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse> {
        let body = serde_json::to_string(request)?;
        let response = self.post(body, &request.method).await?;
        self.read_response(response, request.id).await
    }

    async fn send_notification(&self, notification: &JsonRpcNotification) -> Result<()> {
        let body = serde_json::to_string(notification)?;
        self.post(body, &notification.method).await?;
        Ok(())
    }
}

fn truncate(body: &str) -> String {
    if body.chars().count() > MAX_ERROR_BODY_CHARS {
        let head: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
        format!("{head}...")
    } else {
        body.to_string()
    }
}
