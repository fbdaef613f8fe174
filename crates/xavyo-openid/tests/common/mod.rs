//! Common test utilities for xavyo-openid integration tests.
//!
//! Provides scripted authentication hosts and helpers that drive a provider
//! through its HTTP-facing interface the way a Relying Party would.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;
use xavyo_openid::channel::{read_direct_response, read_indirect_message, request_for};
use xavyo_openid::message::keys;
use xavyo_openid::provider::HostError;
use xavyo_openid::{
    AuthenticationChallenge, AuthenticationDecision, AuthenticationHost, Message, MessageKind,
    OpenIdProvider, OutgoingResponse, ProtocolVersion, ProviderOutcome, ProviderStoreRegistry,
    SecuritySettings,
};

pub const RETURN_TO: &str = "https://rp.example.com/return";
pub const REALM: &str = "https://rp.example.com/";
pub const CLAIMED_ID: &str = "https://alice.example.com/";
pub const LOCAL_ID: &str = "https://op.example.com/user/alice";

pub fn url(raw: &str) -> Url {
    Url::parse(raw).unwrap()
}

pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("xavyo_openid=debug")
        .with_test_writer()
        .try_init();
}

// ---------------------------------------------------------------------------
// Hosts
// ---------------------------------------------------------------------------

/// Host that always answers with the same decision and records challenges.
pub struct ScriptedHost {
    decision: AuthenticationDecision,
    pub calls: AtomicU32,
    pub last_challenge: Mutex<Option<AuthenticationChallenge>>,
}

impl ScriptedHost {
    pub fn new(decision: AuthenticationDecision) -> Arc<Self> {
        Arc::new(Self {
            decision,
            calls: AtomicU32::new(0),
            last_challenge: Mutex::new(None),
        })
    }

    pub fn asserting() -> Arc<Self> {
        Self::new(AuthenticationDecision::assert(CLAIMED_ID, LOCAL_ID))
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthenticationHost for ScriptedHost {
    async fn decide(
        &self,
        challenge: &AuthenticationChallenge,
    ) -> Result<AuthenticationDecision, HostError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_challenge.lock().unwrap() = Some(challenge.clone());
        Ok(self.decision.clone())
    }
}

/// Host whose decision callback fails.
pub struct FailingHost;

#[async_trait]
impl AuthenticationHost for FailingHost {
    async fn decide(
        &self,
        _challenge: &AuthenticationChallenge,
    ) -> Result<AuthenticationDecision, HostError> {
        Err(HostError("user directory unavailable".to_string()))
    }
}

/// Host that never answers within the provider's timeout.
pub struct StalledHost;

#[async_trait]
impl AuthenticationHost for StalledHost {
    async fn decide(
        &self,
        _challenge: &AuthenticationChallenge,
    ) -> Result<AuthenticationDecision, HostError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(AuthenticationDecision::Deny)
    }
}

// ---------------------------------------------------------------------------
// Provider fixtures
// ---------------------------------------------------------------------------

pub fn provider_at(
    registry: &ProviderStoreRegistry,
    endpoint: &str,
    settings: SecuritySettings,
    host: Arc<dyn AuthenticationHost>,
) -> OpenIdProvider {
    let endpoint = url(endpoint);
    let store = registry.store_for(&endpoint);
    OpenIdProvider::new(endpoint, settings, store, host).unwrap()
}

pub fn provider(host: Arc<dyn AuthenticationHost>) -> OpenIdProvider {
    let settings = SecuritySettings::default();
    let registry = ProviderStoreRegistry::new(settings.clone());
    provider_at(&registry, "http://op.example.com/server", settings, host)
}

// ---------------------------------------------------------------------------
// Relying Party helpers
// ---------------------------------------------------------------------------

/// A 2.0 checkid request for the fixed test identity.
pub fn checkid_request(immediate: bool, assoc_handle: Option<&str>) -> Message {
    let mut request = Message::new(ProtocolVersion::V20, MessageKind::CheckIdRequest { immediate })
        .with(keys::CLAIMED_ID, CLAIMED_ID)
        .with(keys::IDENTITY, LOCAL_ID)
        .with(keys::RETURN_TO, RETURN_TO)
        .with(keys::REALM, REALM);
    if let Some(handle) = assoc_handle {
        request.set(keys::ASSOC_HANDLE, handle);
    }
    request
}

/// Send `message` to the provider's endpoint as a Relying Party would.
pub async fn send(
    provider: &OpenIdProvider,
    message: &Message,
    now: DateTime<Utc>,
) -> ProviderOutcome {
    let request = request_for(message, provider.endpoint());
    provider.handle_request_at(&request, now).await
}

/// Unwrap a direct response and decode it as `kind`.
pub fn direct_reply(outcome: ProviderOutcome, kind: MessageKind) -> Message {
    match outcome {
        ProviderOutcome::Respond(OutgoingResponse::Direct { body, .. }) => {
            read_direct_response(kind, &body).unwrap()
        }
        other => panic!("expected a direct response, got {other:?}"),
    }
}

/// Unwrap a redirect and decode the indirect message it carries.
pub fn redirected_message(outcome: ProviderOutcome) -> Message {
    match outcome {
        ProviderOutcome::Respond(OutgoingResponse::Redirect { location }) => {
            assert!(location.as_str().starts_with(RETURN_TO));
            read_indirect_message(&location).unwrap()
        }
        other => panic!("expected a redirect, got {other:?}"),
    }
}
