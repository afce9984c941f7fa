//! Form-encoded requests against the tenant's OAuth2 v2.0 token endpoint.

use a365_core::{A365Error, ExchangeStage, Result};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";

const CONSENT_REQUIRED: &str = "consent_required";
const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;
const MAX_ERROR_BODY_CHARS: usize = 512;

/// What the identity provider handed back for one successful request.
#[derive(Debug)]
pub(crate) struct IssuedToken {
    pub access_token: String,
    pub expires_in: u64,
    pub scope: Option<String>,
}

#[derive(Deserialize)]
struct TokenEndpointResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<Value>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    suberror: Option<String>,
}

/// HTTP client bound to one identity provider authority.
#[derive(Debug, Clone)]
pub struct TokenEndpoint {
    client: reqwest::Client,
    authority: String,
}

impl TokenEndpoint {
    /// `request_timeout` bounds every single token request.
    pub fn new(authority: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let authority = authority.into();
        if !authority.starts_with("http://") && !authority.starts_with("https://") {
            return Err(A365Error::Config(format!(
                "Identity provider authority must start with http:// or https://: {authority}"
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| A365Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            authority: authority.trim_end_matches('/').to_string(),
        })
    }

    pub fn token_url(&self, tenant_id: &str) -> String {
        format!("{}/{}/oauth2/v2.0/token", self.authority, tenant_id)
    }

    pub(crate) async fn request(
        &self,
        stage: ExchangeStage,
        tenant_id: &str,
        form: &[(&str, &str)],
    ) -> Result<IssuedToken> {
        let url = self.token_url(tenant_id);
        debug!("POST {} ({})", url, stage);

        let response = self
            .client
            .post(&url)
            .form(form)
            .send()
            .await
            .map_err(|e| transport_error(stage, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(stage, e))?;

        let payload: TokenEndpointResponse = match serde_json::from_str(&body) {
            Ok(payload) => payload,
            Err(_) => {
                let error = if status.is_success() {
                    "invalid_response".to_string()
                } else {
                    format!("http_{}", status.as_u16())
                };
                return Err(A365Error::CredentialExchange {
                    stage,
                    error,
                    suberror: None,
                    description: Some(truncate(&body)),
                });
            }
        };

        if !status.is_success() || payload.error.is_some() {
            return Err(classify_failure(stage, status.as_u16(), payload));
        }

        let access_token = payload
            .access_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| A365Error::CredentialExchange {
                stage,
                error: "invalid_response".into(),
                suberror: None,
                description: Some("response did not contain an access_token".into()),
            })?;

        Ok(IssuedToken {
            access_token,
            expires_in: parse_expires_in(payload.expires_in.as_ref()),
            scope: payload.scope,
        })
    }
}

fn classify_failure(stage: ExchangeStage, status: u16, payload: TokenEndpointResponse) -> A365Error {
    if payload.suberror.as_deref() == Some(CONSENT_REQUIRED) {
        return A365Error::ConsentPending {
            stage,
            description: payload.error_description,
        };
    }

    A365Error::CredentialExchange {
        stage,
        error: payload.error.unwrap_or_else(|| format!("http_{status}")),
        suberror: payload.suberror,
        description: payload.error_description,
    }
}

fn transport_error(stage: ExchangeStage, err: reqwest::Error) -> A365Error {
    A365Error::Transport {
        context: format!("token request at {stage}"),
        message: err.to_string(),
        timed_out: err.is_timeout(),
    }
}

// Entra returns a number, some proxies a numeric string.
fn parse_expires_in(value: Option<&Value>) -> u64 {
    match value {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(DEFAULT_EXPIRES_IN_SECS),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(DEFAULT_EXPIRES_IN_SECS),
        _ => DEFAULT_EXPIRES_IN_SECS,
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
