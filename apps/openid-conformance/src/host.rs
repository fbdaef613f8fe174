//! Authentication host that asserts one fixed identity

use async_trait::async_trait;
use xavyo_openid::provider::HostError;
use xavyo_openid::{AuthenticationChallenge, AuthenticationDecision, AuthenticationHost};

/// Asserts `identity` for every request, whatever identifier was asked for.
pub struct FixedIdentityHost {
    identity: String,
}

impl FixedIdentityHost {
    #[must_use]
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
        }
    }
}

#[async_trait]
impl AuthenticationHost for FixedIdentityHost {
    async fn decide(
        &self,
        challenge: &AuthenticationChallenge,
    ) -> Result<AuthenticationDecision, HostError> {
        tracing::info!(
            requested = ?challenge.claimed_id,
            asserted = %self.identity,
            "Asserting fixed identity"
        );
        Ok(AuthenticationDecision::assert(
            self.identity.clone(),
            self.identity.clone(),
        ))
    }
}
