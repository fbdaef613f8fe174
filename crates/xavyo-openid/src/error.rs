//! OpenID protocol error types
//!
//! Every variant is recoverable at the protocol level: the Provider turns it
//! into a direct error response (or an unsuccessful associate response)
//! rather than letting it escape as a fault.

use crate::association::{AssociationError, KeyExchangeError};
use crate::nonce::NonceError;
use http::StatusCode;
use thiserror::Error;

/// Result type for OpenID operations
pub type OpenIdResult<T> = Result<T, OpenIdError>;

/// OpenID protocol errors
#[derive(Debug, Clone, Error)]
pub enum OpenIdError {
    /// Missing or unparseable message fields
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Association handle does not resolve (never issued, or expired)
    #[error("Unknown association handle: {0}")]
    UnknownAssociation(String),

    /// Message is outside the freshness window
    #[error("Message expired: {0}")]
    Expired(String),

    /// Nonce was already presented by this origin
    #[error("Replay detected: nonce {token} from {origin} was already used")]
    Replay { origin: String, token: String },

    /// Signature does not match the signed fields
    #[error("Signature mismatch: {0}")]
    SignatureMismatch(String),

    /// Degenerate or inconsistent Diffie-Hellman values
    #[error("Invalid key exchange parameters: {0}")]
    InvalidKeyExchangeParameters(String),

    /// Security settings forbid the requested operation
    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    /// The host's identity decision callback failed
    #[error("Host decision failed: {0}")]
    HostDecisionFailed(String),

    /// The host's identity decision callback did not complete in time
    #[error("Host decision timed out after {0} seconds")]
    HostDecisionTimedOut(u64),

    /// Association or nonce storage failure
    #[error("Storage error: {0}")]
    Storage(String),
}

impl OpenIdError {
    /// Short machine-readable reason sent to Relying Parties.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            OpenIdError::MalformedMessage(_) => "malformed_message",
            OpenIdError::UnknownAssociation(_) => "unknown_association",
            OpenIdError::Expired(_) => "expired",
            OpenIdError::Replay { .. } => "replay",
            OpenIdError::SignatureMismatch(_) => "signature_mismatch",
            OpenIdError::InvalidKeyExchangeParameters(_) => "invalid_key_exchange_parameters",
            OpenIdError::PolicyViolation(_) => "policy_violation",
            OpenIdError::HostDecisionFailed(_) => "host_decision_failed",
            OpenIdError::HostDecisionTimedOut(_) => "host_decision_timeout",
            OpenIdError::Storage(_) => "server_error",
        }
    }

    /// HTTP status used when the error is written as a direct response.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            OpenIdError::Storage(_)
            | OpenIdError::HostDecisionFailed(_)
            | OpenIdError::HostDecisionTimedOut(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Message that is safe to hand to the Relying Party.
    ///
    /// Storage and host failures, replayed nonces and freshness windows are
    /// logged and replaced with a generic description.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            OpenIdError::Storage(detail) => {
                tracing::error!(detail = %detail, "OpenID storage error");
                "An internal error occurred".to_string()
            }
            OpenIdError::HostDecisionFailed(detail) => {
                tracing::error!(detail = %detail, "OpenID host decision failed");
                "The provider could not complete the authentication request".to_string()
            }
            OpenIdError::HostDecisionTimedOut(_) => {
                "The provider did not decide on the authentication request in time".to_string()
            }
            OpenIdError::Expired(detail) => {
                tracing::warn!(detail = %detail, "OpenID message outside the freshness window");
                "The message is too old or too far in the future".to_string()
            }
            OpenIdError::Replay { origin, token } => {
                tracing::warn!(origin = %origin, token = %token, "OpenID nonce replayed");
                "The message has already been used".to_string()
            }
            OpenIdError::MalformedMessage(_)
            | OpenIdError::UnknownAssociation(_)
            | OpenIdError::SignatureMismatch(_)
            | OpenIdError::InvalidKeyExchangeParameters(_)
            | OpenIdError::PolicyViolation(_) => self.to_string(),
        }
    }
}

impl From<NonceError> for OpenIdError {
    fn from(err: NonceError) -> Self {
        match err {
            NonceError::Replay { origin, token } => OpenIdError::Replay { origin, token },
            NonceError::Expired { .. } => OpenIdError::Expired(err.to_string()),
            NonceError::StorageError(msg) => OpenIdError::Storage(msg),
        }
    }
}

impl From<AssociationError> for OpenIdError {
    fn from(err: AssociationError) -> Self {
        match err {
            AssociationError::NotFound(handle) => OpenIdError::UnknownAssociation(handle),
            AssociationError::DuplicateHandle(_) | AssociationError::StorageError(_) => {
                OpenIdError::Storage(err.to_string())
            }
        }
    }
}

impl From<KeyExchangeError> for OpenIdError {
    fn from(err: KeyExchangeError) -> Self {
        match err {
            KeyExchangeError::Encoding(_) => OpenIdError::MalformedMessage(err.to_string()),
            KeyExchangeError::InvalidParameters(_) | KeyExchangeError::SecretLength { .. } => {
                OpenIdError::InvalidKeyExchangeParameters(err.to_string())
            }
        }
    }
}
