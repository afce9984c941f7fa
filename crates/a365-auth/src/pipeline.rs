//! Agent user impersonation: blueprint -> agent identity -> agentic user.
//!
//! Every call to [`TokenExchangePipeline::acquire_tool_token`] runs the whole
//! chain again. Nothing is cached between runs, and every stage is attempted
//! exactly once; retrying is left to whoever scheduled the operation.

use a365_core::{A365Error, CredentialSet, ExchangeStage, IdentityReference, Result, ToolServer};
use tracing::{info, instrument};

use crate::endpoint::TokenEndpoint;
use crate::token::{ExchangeToken, FinalToken, ResourceToken, TokenSet};

/// Scope requested by the blueprint for the exchange token.
pub const TOKEN_EXCHANGE_SCOPE: &str = "api://AzureADTokenExchange/.default";
pub const JWT_BEARER_ASSERTION_TYPE: &str =
    "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";
pub const USER_FIC_GRANT: &str = "user_fic";

pub struct TokenExchangePipeline {
    endpoint: TokenEndpoint,
    identity_exchange_scope: Option<String>,
}

impl TokenExchangePipeline {
    pub fn new(endpoint: TokenEndpoint) -> Self {
        Self {
            endpoint,
            identity_exchange_scope: None,
        }
    }

    /// Use a fixed scope for stage 2 instead of the tool server's resource scope.
    pub fn with_identity_exchange_scope(mut self, scope: Option<String>) -> Self {
        self.identity_exchange_scope = scope.filter(|s| !s.trim().is_empty());
        self
    }

    pub fn endpoint(&self) -> &TokenEndpoint {
        &self.endpoint
    }

    /// Run all three stages and return only the token meant for the tool server.
    pub async fn acquire_tool_token(
        &self,
        credentials: &CredentialSet,
        identity: &IdentityReference,
        server: &ToolServer,
    ) -> Result<FinalToken> {
        Ok(self.acquire_token_set(credentials, identity, server).await?.final_token)
    }

    #[instrument(skip_all, fields(agent = %identity.agent_user_upn, server = %server.name))]
    pub async fn acquire_token_set(
        &self,
        credentials: &CredentialSet,
        identity: &IdentityReference,
        server: &ToolServer,
    ) -> Result<TokenSet> {
        let mut missing = credentials.missing_fields();
        missing.extend(identity.missing_fields());
        if !missing.is_empty() {
            return Err(A365Error::Config(format!(
                "Cannot acquire token for {}: missing {}",
                identity.agent_user_upn,
                missing.join(", ")
            )));
        }

        info!("Acquiring tool token for {}", identity.agent_user_upn);
        let exchange = self.acquire_exchange_token(credentials).await?;
        let resource = self
            .acquire_resource_token(credentials, &exchange, server)
            .await?;
        let final_token = self
            .acquire_final_token(credentials, identity, &exchange, &resource, server)
            .await?;

        Ok(TokenSet {
            exchange,
            resource,
            final_token,
        })
    }

    /// Step 1: blueprint client credentials, narrowed to the agent identity via `fmi_path`.
    pub async fn acquire_exchange_token(&self, credentials: &CredentialSet) -> Result<ExchangeToken> {
        info!("Step 1/3: acquiring exchange token (blueprint -> agent identity)");
        let form = [
            ("client_id", credentials.blueprint_client_id.as_str()),
            ("client_secret", credentials.blueprint_client_secret.as_str()),
            ("grant_type", "client_credentials"),
            ("scope", TOKEN_EXCHANGE_SCOPE),
            ("fmi_path", credentials.agent_identity_client_id.as_str()),
        ];

        let issued = self
            .endpoint
            .request(ExchangeStage::Blueprint, &credentials.tenant_id, &form)
            .await?;
        info!("Exchange token acquired ({} chars)", issued.access_token.len());

        let scope = issued.scope.unwrap_or_else(|| TOKEN_EXCHANGE_SCOPE.to_string());
        Ok(ExchangeToken::issued(issued.access_token, scope, issued.expires_in))
    }

    /// Step 2: the agent identity asserts T1 as a signed client assertion.
    pub async fn acquire_resource_token(
        &self,
        credentials: &CredentialSet,
        exchange: &ExchangeToken,
        server: &ToolServer,
    ) -> Result<ResourceToken> {
        info!("Step 2/3: acquiring resource token (agent identity -> agent user)");
        if exchange.secret().trim().is_empty() {
            return Err(A365Error::CredentialExchange {
                stage: ExchangeStage::AgentIdentity,
                error: "invalid_request".into(),
                suberror: None,
                description: Some("client assertion is empty".into()),
            });
        }

        let scope = self
            .identity_exchange_scope
            .clone()
            .unwrap_or_else(|| server.resource_scope());
        let form = [
            ("client_id", credentials.agent_identity_client_id.as_str()),
            ("grant_type", "client_credentials"),
            ("client_assertion_type", JWT_BEARER_ASSERTION_TYPE),
            ("client_assertion", exchange.secret()),
            ("scope", scope.as_str()),
        ];

        let issued = self
            .endpoint
            .request(ExchangeStage::AgentIdentity, &credentials.tenant_id, &form)
            .await?;
        info!("Resource token acquired ({} chars)", issued.access_token.len());

        Ok(ResourceToken::issued(
            issued.access_token,
            issued.scope.unwrap_or(scope),
            issued.expires_in,
        ))
    }

    /// Step 3: `user_fic` grant presenting T1 and T2 for the agentic user.
    pub async fn acquire_final_token(
        &self,
        credentials: &CredentialSet,
        identity: &IdentityReference,
        exchange: &ExchangeToken,
        resource: &ResourceToken,
        server: &ToolServer,
    ) -> Result<FinalToken> {
        info!("Step 3/3: acquiring tool server token (user_fic grant)");
        let scope = server.resource_scope();
        let form = [
            ("client_id", credentials.agent_identity_client_id.as_str()),
            ("grant_type", USER_FIC_GRANT),
            ("client_assertion_type", JWT_BEARER_ASSERTION_TYPE),
            ("client_assertion", exchange.secret()),
            ("user_id", identity.agent_user_object_id.as_str()),
            ("user_federated_identity_credential", resource.secret()),
            ("scope", scope.as_str()),
        ];

        let issued = self
            .endpoint
            .request(ExchangeStage::ToolServer, &credentials.tenant_id, &form)
            .await?;
        info!("Tool server token acquired ({} chars)", issued.access_token.len());

        Ok(FinalToken::issued(
            issued.access_token,
            issued.scope.unwrap_or(scope),
            issued.expires_in,
        ))
    }
}
