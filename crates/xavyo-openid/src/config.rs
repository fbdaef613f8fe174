//! Provider security settings
//!
//! An immutable policy snapshot built once per Provider and consulted
//! during association negotiation and message validation.

use crate::error::{OpenIdError, OpenIdResult};
use chrono::Duration;

/// Inclusive bounds applied to every association lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifetimeBounds {
    pub minimum: Duration,
    pub maximum: Duration,
}

impl LifetimeBounds {
    #[must_use]
    pub fn clamp(&self, requested: Duration) -> Duration {
        requested.max(self.minimum).min(self.maximum)
    }
}

impl Default for LifetimeBounds {
    fn default() -> Self {
        Self {
            minimum: Duration::minutes(1),
            maximum: Duration::days(14),
        }
    }
}

/// Security policy of a Provider.
#[derive(Debug, Clone)]
pub struct SecuritySettings {
    /// Lifetime requested for associations negotiated with Relying Parties
    pub smart_association_lifetime: Duration,

    /// Lifetime of the private associations used for dumb-mode assertions
    pub private_association_lifetime: Duration,

    pub association_lifetime_bounds: LifetimeBounds,

    /// Oldest acceptable message timestamp, relative to now
    pub max_message_age: Duration,

    /// Furthest-future acceptable message timestamp, relative to now
    pub max_clock_skew: Duration,

    pub allow_unsolicited_assertions: bool,

    /// Refuse `no-encryption` associations when the request did not arrive over HTTPS
    pub require_private_association_over_insecure_transport: bool,

    /// Answer check_authentication requests. Disabled, they get a direct error.
    pub check_authentication_enabled: bool,

    /// How long the host may take to decide on an authentication request
    pub host_decision_timeout: std::time::Duration,

    pub minimum_hash_bits: usize,
    pub maximum_hash_bits: usize,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        let max_message_age = Duration::minutes(13);
        Self {
            smart_association_lifetime: Duration::days(14),
            private_association_lifetime: max_message_age,
            association_lifetime_bounds: LifetimeBounds::default(),
            max_message_age,
            max_clock_skew: Duration::minutes(10),
            allow_unsolicited_assertions: true,
            require_private_association_over_insecure_transport: true,
            check_authentication_enabled: true,
            host_decision_timeout: std::time::Duration::from_secs(30),
            minimum_hash_bits: 160,
            maximum_hash_bits: 256,
        }
    }
}

impl SecuritySettings {
    /// Reject settings that cannot be enforced consistently.
    pub fn validate(&self) -> OpenIdResult<()> {
        let bounds = &self.association_lifetime_bounds;
        if bounds.minimum <= Duration::zero() || bounds.minimum > bounds.maximum {
            return Err(invalid(format!(
                "association lifetime bounds [{}s, {}s] are empty",
                bounds.minimum.num_seconds(),
                bounds.maximum.num_seconds()
            )));
        }
        if self.max_message_age <= Duration::zero() {
            return Err(invalid("max_message_age must be positive".to_string()));
        }
        if self.max_clock_skew < Duration::zero() {
            return Err(invalid("max_clock_skew must not be negative".to_string()));
        }
        // Dumb-mode assertions must stay verifiable for as long as they are fresh.
        if self.private_association_lifetime < self.max_message_age {
            return Err(invalid(
                "private_association_lifetime is shorter than max_message_age".to_string(),
            ));
        }
        if self.minimum_hash_bits > self.maximum_hash_bits {
            return Err(invalid(format!(
                "minimum_hash_bits {} exceeds maximum_hash_bits {}",
                self.minimum_hash_bits, self.maximum_hash_bits
            )));
        }
        if self.host_decision_timeout.is_zero() {
            return Err(invalid("host_decision_timeout must be positive".to_string()));
        }
        Ok(())
    }

    /// Whether an association type's MAC strength falls inside the configured range.
    #[must_use]
    pub fn permits_hash_bits(&self, bits: usize) -> bool {
        bits >= self.minimum_hash_bits && bits <= self.maximum_hash_bits
    }
}

fn invalid(detail: String) -> OpenIdError {
    OpenIdError::PolicyViolation(format!("Invalid security settings: {detail}"))
}
