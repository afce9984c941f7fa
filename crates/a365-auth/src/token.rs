//! Role-typed bearer tokens produced by the exchange.
//!
//! Each stage of the exchange returns its own type, and only this crate can
//! construct them. Stage 2 takes an [`ExchangeToken`] and stage 3 takes both an
//! [`ExchangeToken`] and a [`ResourceToken`], so the order is enforced by the
//! compiler instead of by call sites.

use chrono::{DateTime, Duration, Utc};
use std::fmt;

// A year; expiries beyond that are treated as a malformed response.
const MAX_EXPIRES_IN_SECS: u64 = 365 * 24 * 3600;

#[derive(Clone, PartialEq, Eq)]
struct AccessToken {
    secret: String,
    scope: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn issued(secret: String, scope: String, expires_in_secs: u64) -> Self {
        let expires_in = expires_in_secs.min(MAX_EXPIRES_IN_SECS) as i64;
        Self {
            secret,
            scope,
            expires_at: Utc::now() + Duration::seconds(expires_in),
        }
    }
}

macro_rules! token_role {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq)]
        pub struct $name(AccessToken);

        impl $name {
            pub(crate) fn issued(secret: impl Into<String>, scope: impl Into<String>, expires_in_secs: u64) -> Self {
                Self(AccessToken::issued(secret.into(), scope.into(), expires_in_secs))
            }

            /// Raw bearer value. Never log this.
            pub fn secret(&self) -> &str {
                &self.0.secret
            }

            pub fn scope(&self) -> &str {
                &self.0.scope
            }

            pub fn expires_at(&self) -> DateTime<Utc> {
                self.0.expires_at
            }

            pub fn is_expired(&self) -> bool {
                Utc::now() >= self.0.expires_at
            }

            pub fn len(&self) -> usize {
                self.0.secret.len()
            }

            pub fn is_empty(&self) -> bool {
                self.0.secret.is_empty()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("secret", &format_args!("<{} chars>", self.0.secret.len()))
                    .field("scope", &self.0.scope)
                    .field("expires_at", &self.0.expires_at)
                    .finish()
            }
        }
    };
}

token_role!(
    /// T1: issued to the blueprint and scoped to one agent identity through `fmi_path`.
    ExchangeToken
);

token_role!(
    /// T2: issued to the agent identity after it asserted T1.
    ResourceToken
);

token_role!(
    /// The `user_fic` token whose subject is the agentic user. Presented to the MCP tool server.
    FinalToken
);

/// Every token issued during one exchange run.
#[derive(Debug, Clone)]
pub struct TokenSet {
    pub exchange: ExchangeToken,
    pub resource: ResourceToken,
    pub final_token: FinalToken,
}
