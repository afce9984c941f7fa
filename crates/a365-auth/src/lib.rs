//! Delegated agentic token exchange for Agent 365 tool servers.
//!
//! Converts blueprint application credentials into a short-lived bearer token
//! whose subject is an agentic user, through three sequential requests against
//! the tenant's token endpoint.

pub mod endpoint;
pub mod pipeline;
pub mod token;

pub use endpoint::{TokenEndpoint, DEFAULT_AUTHORITY};
pub use pipeline::{TokenExchangePipeline, TOKEN_EXCHANGE_SCOPE};
pub use token::{ExchangeToken, FinalToken, ResourceToken, TokenSet};
