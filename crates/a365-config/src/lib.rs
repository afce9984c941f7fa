use a365_core::{
    A365Error, CredentialSet, IdentityReference, Result, ToolServer, DEFAULT_MCP_AUDIENCE,
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

pub mod env_substitution;

pub use env_substitution::substitute_env_vars;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProactiveConfig {
    pub tenant_id: String,
    pub blueprint: BlueprintSettings,
    #[serde(default)]
    pub identity_provider: IdentityProviderSettings,
    #[serde(default)]
    pub tool_servers: HashMap<String, ToolServerSettings>,
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub agents: Vec<AgentRegistration>,
}

/// Blueprint application credentials shared by every agent in the tenant.
#[derive(Clone, Serialize, Deserialize)]
pub struct BlueprintSettings {
    pub client_id: String,
    pub client_secret: String,
}

impl fmt::Debug for BlueprintSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlueprintSettings")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityProviderSettings {
    #[serde(default = "default_authority")]
    pub authority: String,
    #[serde(default = "default_request_timeout_secs", deserialize_with = "secs_from_number_or_string")]
    pub request_timeout_secs: u64,
    /// Overrides the scope requested for the agent identity exchange token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_exchange_scope: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolServerSettings {
    pub url: String,
    #[serde(default = "default_audience")]
    pub audience: String,
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default = "default_request_timeout_secs", deserialize_with = "secs_from_number_or_string")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_interval_secs", deserialize_with = "secs_from_number_or_string")]
    pub interval_secs: u64,
    #[serde(default = "default_operation_timeout_secs", deserialize_with = "secs_from_number_or_string")]
    pub operation_timeout_secs: u64,
}

/// One agentic user from the agent registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegistration {
    pub agent_user_upn: String,
    pub agent_identity_client_id: String,
    pub agent_user_object_id: String,
    #[serde(default)]
    pub manager_email: String,
    #[serde(default)]
    pub tasks: Vec<ScheduledTask>,
}

impl AgentRegistration {
    pub fn enabled_tasks(&self) -> impl Iterator<Item = &ScheduledTask> {
        self.tasks.iter().filter(|task| task.enabled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub name: String,
    pub server: String,
    pub tool: String,
    #[serde(default = "default_arguments")]
    pub arguments: Value,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl ProactiveConfig {
    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            A365Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        debug!("Loaded configuration from {}", path.display());
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let mut raw: Value = serde_yaml::from_str(yaml)
            .map_err(|e| A365Error::Config(format!("Failed to parse YAML: {}", e)))?;

        substitute_env_vars(&mut raw)?;

        let config: ProactiveConfig = serde_json::from_value(raw)
            .map_err(|e| A365Error::Config(format!("Invalid configuration: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.tenant_id.trim().is_empty() {
            return Err(A365Error::Config("tenant_id cannot be empty".into()));
        }
        if self.blueprint.client_id.trim().is_empty() {
            return Err(A365Error::Config("blueprint.client_id cannot be empty".into()));
        }
        if self.blueprint.client_secret.trim().is_empty() {
            return Err(A365Error::Config("blueprint.client_secret cannot be empty".into()));
        }
        if !is_http_url(&self.identity_provider.authority) {
            return Err(A365Error::Config(
                "identity_provider.authority must start with http:// or https://".into(),
            ));
        }
        if self.identity_provider.request_timeout_secs == 0 {
            return Err(A365Error::Config(
                "identity_provider.request_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.scheduler.interval_secs == 0 {
            return Err(A365Error::Config(
                "scheduler.interval_secs must be greater than zero".into(),
            ));
        }
        if self.scheduler.operation_timeout_secs < self.identity_provider.request_timeout_secs {
            return Err(A365Error::Config(
                "scheduler.operation_timeout_secs must be at least identity_provider.request_timeout_secs"
                    .into(),
            ));
        }

        for (name, server) in &self.tool_servers {
            if !is_http_url(&server.url) {
                return Err(A365Error::Config(format!(
                    "tool_servers.{name}.url must start with http:// or https://"
                )));
            }
            if server.audience.trim().is_empty() {
                return Err(A365Error::Config(format!(
                    "tool_servers.{name}.audience cannot be empty"
                )));
            }
            if server.timeout_secs == 0 {
                return Err(A365Error::Config(format!(
                    "tool_servers.{name}.timeout_secs must be greater than zero"
                )));
            }
        }

        let mut seen = HashSet::new();
        for agent in &self.agents {
            if agent.agent_user_upn.trim().is_empty() {
                return Err(A365Error::Config("agent_user_upn cannot be empty".into()));
            }
            if !seen.insert(agent.agent_user_upn.as_str()) {
                return Err(A365Error::Config(format!(
                    "Agent '{}' is registered more than once",
                    agent.agent_user_upn
                )));
            }
            for task in &agent.tasks {
                if !self.tool_servers.contains_key(&task.server) {
                    return Err(A365Error::Config(format!(
                        "Task '{}' of agent '{}' references unknown tool server '{}'",
                        task.name, agent.agent_user_upn, task.server
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn find_agent(&self, upn: &str) -> Option<&AgentRegistration> {
        self.agents
            .iter()
            .find(|agent| agent.agent_user_upn.eq_ignore_ascii_case(upn))
    }

    pub fn credentials_for(&self, agent: &AgentRegistration) -> CredentialSet {
        CredentialSet::new(
            self.tenant_id.clone(),
            self.blueprint.client_id.clone(),
            self.blueprint.client_secret.clone(),
            agent.agent_identity_client_id.clone(),
        )
    }

    pub fn identity_for(&self, agent: &AgentRegistration) -> IdentityReference {
        IdentityReference::new(
            agent.agent_user_upn.clone(),
            agent.agent_user_object_id.clone(),
        )
        .with_target_user(agent.manager_email.clone())
    }

    /// Every field that keeps this agent from running the exchange.
    pub fn missing_fields(&self, agent: &AgentRegistration) -> Vec<&'static str> {
        let mut missing = self.credentials_for(agent).missing_fields();
        missing.extend(self.identity_for(agent).missing_fields());
        missing
    }

    pub fn tool_server(&self, name: &str) -> Result<ToolServer> {
        let settings = self
            .tool_servers
            .get(name)
            .ok_or_else(|| A365Error::Config(format!("Unknown tool server '{name}'")))?;
        Ok(ToolServer::new(name, settings.url.clone())
            .with_audience(settings.audience.clone())
            .with_scope(settings.scope.clone()))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.identity_provider.request_timeout_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.scheduler.operation_timeout_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.interval_secs)
    }
}

impl Default for IdentityProviderSettings {
    fn default() -> Self {
        Self {
            authority: default_authority(),
            request_timeout_secs: default_request_timeout_secs(),
            identity_exchange_scope: None,
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            operation_timeout_secs: default_operation_timeout_secs(),
        }
    }
}

// `${VAR}` substitution always yields a string, so durations may arrive as "3600".
fn secs_from_number_or_string<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(secs) => Ok(secs),
        Raw::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("expected seconds, got '{text}'"))),
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

fn default_authority() -> String { "https://login.microsoftonline.com".to_string() }
fn default_audience() -> String { DEFAULT_MCP_AUDIENCE.to_string() }
fn default_scope() -> String { ".default".to_string() }
fn default_request_timeout_secs() -> u64 { 30 }
fn default_interval_secs() -> u64 { 3600 }
fn default_operation_timeout_secs() -> u64 { 120 }
fn default_arguments() -> Value { Value::Object(Default::default()) }
fn default_enabled() -> bool { true }
