use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Default Agent 365 MCP platform audience.
pub const DEFAULT_MCP_AUDIENCE: &str = "ea9ffc3e-8a23-4a7d-836d-234d7c7565c1";

/// Static credentials used to start the agent user impersonation chain.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialSet {
    pub tenant_id: String,
    pub blueprint_client_id: String,
    pub blueprint_client_secret: String,
    pub agent_identity_client_id: String,
}

impl CredentialSet {
    pub fn new(
        tenant_id: impl Into<String>,
        blueprint_client_id: impl Into<String>,
        blueprint_client_secret: impl Into<String>,
        agent_identity_client_id: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            blueprint_client_id: blueprint_client_id.into(),
            blueprint_client_secret: blueprint_client_secret.into(),
            agent_identity_client_id: agent_identity_client_id.into(),
        }
    }

    /// Names of the fields that are empty. An empty list means the set is usable.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.tenant_id.trim().is_empty() {
            missing.push("tenant_id");
        }
        if self.blueprint_client_id.trim().is_empty() {
            missing.push("blueprint_client_id");
        }
        if self.blueprint_client_secret.trim().is_empty() {
            missing.push("blueprint_client_secret");
        }
        if self.agent_identity_client_id.trim().is_empty() {
            missing.push("agent_identity_client_id");
        }
        missing
    }
}

impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSet")
            .field("tenant_id", &self.tenant_id)
            .field("blueprint_client_id", &self.blueprint_client_id)
            .field("blueprint_client_secret", &"<redacted>")
            .field("agent_identity_client_id", &self.agent_identity_client_id)
            .finish()
    }
}

/// Whose identity the call acts as, and who it is aimed at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityReference {
    pub agent_user_upn: String,
    pub agent_user_object_id: String,
    #[serde(default)]
    pub target_user: String,
}

impl IdentityReference {
    pub fn new(
        agent_user_upn: impl Into<String>,
        agent_user_object_id: impl Into<String>,
    ) -> Self {
        Self {
            agent_user_upn: agent_user_upn.into(),
            agent_user_object_id: agent_user_object_id.into(),
            target_user: String::new(),
        }
    }

    pub fn with_target_user(mut self, target_user: impl Into<String>) -> Self {
        self.target_user = target_user.into();
        self
    }

    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.agent_user_object_id.trim().is_empty() {
            missing.push("agent_user_object_id");
        }
        missing
    }
}

/// A downstream MCP tool server and the permission surface requested for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolServer {
    pub name: String,
    pub url: String,
    pub audience: String,
    pub scope: String,
}

impl ToolServer {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            audience: DEFAULT_MCP_AUDIENCE.to_string(),
            scope: ".default".to_string(),
        }
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = audience.into();
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// `<audience>/<scope>`, e.g. `ea9f.../McpServers.Teams.All`.
    pub fn resource_scope(&self) -> String {
        format!(
            "{}/{}",
            self.audience.trim_end_matches('/'),
            self.scope.trim_start_matches('/')
        )
    }
}

/// Position of a request in the three-step exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExchangeStage {
    Blueprint = 1,
    AgentIdentity = 2,
    ToolServer = 3,
}

impl ExchangeStage {
    pub fn number(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ExchangeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExchangeStage::Blueprint => "blueprint",
            ExchangeStage::AgentIdentity => "agent identity",
            ExchangeStage::ToolServer => "tool server",
        };
        write!(f, "stage {} ({})", self.number(), label)
    }
}

#[derive(Error, Debug)]
pub enum A365Error {
    #[error("Token exchange failed at {stage}: {error}{}", describe(.suberror, .description))]
    CredentialExchange {
        stage: ExchangeStage,
        error: String,
        suberror: Option<String>,
        description: Option<String>,
    },

    #[error("Consent pending at {stage}; permissions have not propagated yet{}", describe(&None, .description))]
    ConsentPending {
        stage: ExchangeStage,
        description: Option<String>,
    },

    #[error("Tool '{tool}' failed (code {code}): {message}")]
    ToolInvocation {
        tool: String,
        code: i64,
        message: String,
    },

    #[error("Tool server '{server}' rejected the request with HTTP {status}: {body}")]
    ToolServerRejected {
        server: String,
        status: u16,
        body: String,
    },

    #[error("Transport failure during {context}: {message}")]
    Transport {
        context: String,
        message: String,
        timed_out: bool,
    },

    #[error("Operation exceeded its {budget_ms}ms deadline")]
    DeadlineExceeded { budget_ms: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("MCP protocol error: {0}")]
    Mcp(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn describe(suberror: &Option<String>, description: &Option<String>) -> String {
    let mut out = String::new();
    if let Some(sub) = suberror {
        out.push_str(&format!(" [{sub}]"));
    }
    if let Some(desc) = description {
        out.push_str(&format!(" - {desc}"));
    }
    out
}

impl A365Error {
    /// True for every failure reported by the identity provider, consent included.
    pub fn is_credential_exchange(&self) -> bool {
        matches!(
            self,
            A365Error::CredentialExchange { .. } | A365Error::ConsentPending { .. }
        )
    }

    pub fn is_consent_pending(&self) -> bool {
        matches!(self, A365Error::ConsentPending { .. })
    }

    /// The token was issued but the tool server refused it (e.g. missing license).
    pub fn is_authorization_failure(&self) -> bool {
        matches!(
            self,
            A365Error::ToolServerRejected { status: 401 | 403, .. }
        )
    }

    /// Failures that a later scheduled run can clear without a config change.
    pub fn is_retryable_later(&self) -> bool {
        matches!(
            self,
            A365Error::ConsentPending { .. }
                | A365Error::Transport { .. }
                | A365Error::DeadlineExceeded { .. }
        )
    }

    pub fn stage(&self) -> Option<ExchangeStage> {
        match self {
            A365Error::CredentialExchange { stage, .. } | A365Error::ConsentPending { stage, .. } => {
                Some(*stage)
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, A365Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_scope_joins_audience_and_scope() {
        let server = ToolServer::new("teams", "https://example.test/mcp")
            .with_audience("api://teams-resource/")
            .with_scope("McpServers.Teams.All");
        assert_eq!(server.resource_scope(), "api://teams-resource/McpServers.Teams.All");

        let default = ToolServer::new("me", "https://example.test/mcp");
        assert_eq!(
            default.resource_scope(),
            format!("{DEFAULT_MCP_AUDIENCE}/.default")
        );
    }

    #[test]
    fn test_missing_fields() {
        let creds = CredentialSet::new("tenant", "", "secret", " ");
        assert_eq!(
            creds.missing_fields(),
            vec!["blueprint_client_id", "agent_identity_client_id"]
        );
        assert!(IdentityReference::new("agent@contoso.com", "")
            .missing_fields()
            .contains(&"agent_user_object_id"));
    }

    #[test]
    fn test_secret_not_in_debug_output() {
        let creds = CredentialSet::new("tenant", "client", "super-secret", "agent");
        let debug = format!("{creds:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_error_classification() {
        let consent = A365Error::ConsentPending {
            stage: ExchangeStage::ToolServer,
            description: None,
        };
        assert!(consent.is_credential_exchange());
        assert!(consent.is_consent_pending());
        assert!(consent.is_retryable_later());
        assert_eq!(consent.stage(), Some(ExchangeStage::ToolServer));

        let exchange = A365Error::CredentialExchange {
            stage: ExchangeStage::Blueprint,
            error: "invalid_client".into(),
            suberror: None,
            description: Some("bad secret".into()),
        };
        assert!(exchange.is_credential_exchange());
        assert!(!exchange.is_consent_pending());
        assert!(!exchange.is_retryable_later());
        assert!(exchange.to_string().contains("stage 1 (blueprint)"));
        assert!(exchange.to_string().contains("bad secret"));

        let rejected = A365Error::ToolServerRejected {
            server: "teams".into(),
            status: 403,
            body: String::new(),
        };
        assert!(rejected.is_authorization_failure());
        assert!(!rejected.is_credential_exchange());
    }
}
