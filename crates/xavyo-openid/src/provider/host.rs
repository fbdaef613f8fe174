//! Host collaborators
//!
//! The hosting application decides who the user is and where in-flight
//! requests are parked. The Provider only packages those decisions.

use crate::message::{keys, Message, MessageKind, ProtocolVersion, IDENTIFIER_SELECT};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use url::Url;

/// Failure reported by a host collaborator
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct HostError(pub String);

/// Extension arguments the host wants added to a positive assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionResponse {
    pub alias: String,
    pub namespace: String,
    pub args: BTreeMap<String, String>,
}

/// The host's answer to an authentication request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthenticationDecision {
    /// Assert that the user controls `claimed_id` (locally known as `local_id`)
    Assert {
        claimed_id: String,
        local_id: String,
        extensions: Vec<ExtensionResponse>,
    },
    /// The user cancelled or could not be authenticated
    Deny,
    /// No answer yet; park the request and resume it later
    Defer,
}

impl AuthenticationDecision {
    #[must_use]
    pub fn assert(claimed_id: impl Into<String>, local_id: impl Into<String>) -> Self {
        AuthenticationDecision::Assert {
            claimed_id: claimed_id.into(),
            local_id: local_id.into(),
            extensions: Vec::new(),
        }
    }
}

/// What the host is asked to decide on.
#[derive(Debug, Clone)]
pub struct AuthenticationChallenge {
    pub version: ProtocolVersion,
    pub immediate: bool,
    /// `None` when the Relying Party lets the Provider choose the identifier
    pub claimed_id: Option<String>,
    pub local_id: Option<String>,
    pub realm: Option<String>,
    pub return_to: Option<Url>,
    /// Requested extension arguments keyed by namespace URI
    pub extensions: BTreeMap<String, BTreeMap<String, String>>,
}

impl AuthenticationChallenge {
    #[must_use]
    pub fn from_request(request: &Message) -> Self {
        let selected = |key: &str| {
            request
                .get(key)
                .filter(|v| *v != IDENTIFIER_SELECT)
                .map(str::to_string)
        };
        let claimed_id = match request.version() {
            ProtocolVersion::V20 => selected(keys::CLAIMED_ID),
            ProtocolVersion::V11 => selected(keys::IDENTITY),
        };
        let extensions = request
            .extension_aliases()
            .into_values()
            .filter_map(|ns| request.extension(ns).map(|args| (ns.to_string(), args)))
            .collect();

        Self {
            version: request.version(),
            immediate: request.kind() == MessageKind::CheckIdRequest { immediate: true },
            claimed_id,
            local_id: selected(keys::IDENTITY),
            realm: request.realm().map(str::to_string),
            return_to: request.return_to().ok().flatten(),
            extensions,
        }
    }

    #[must_use]
    pub fn is_identifier_select(&self) -> bool {
        self.claimed_id.is_none()
    }
}

/// Identity decisions for authentication requests.
#[async_trait]
pub trait AuthenticationHost: Send + Sync {
    async fn decide(
        &self,
        challenge: &AuthenticationChallenge,
    ) -> Result<AuthenticationDecision, HostError>;
}

/// Host-owned storage for deferred authentication requests.
#[async_trait]
pub trait PendingRequestStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, HostError>;

    async fn set(&self, key: &str, value: String) -> Result<(), HostError>;

    /// Remove and return the entry under `key` in one step, so a parked
    /// request is handed out at most once.
    async fn take(&self, key: &str) -> Result<Option<String>, HostError>;
}

/// In-memory pending request store
#[derive(Debug, Default, Clone)]
pub struct InMemoryPendingRequestStore {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryPendingRequestStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PendingRequestStore for InMemoryPendingRequestStore {
    async fn get(&self, key: &str) -> Result<Option<String>, HostError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), HostError> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<String>, HostError> {
        Ok(self.entries.write().await.remove(key))
    }
}
