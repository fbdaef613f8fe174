//! Replay and freshness tests
//!
//! The Relying Party runs the standard pipeline over assertions it receives;
//! a second presentation of the same assertion must be rejected.

mod common;

use chrono::{Duration, Utc};
use common::*;
use std::sync::Arc;
use xavyo_openid::association::{DhParameters, RelyingPartyExchange};
use xavyo_openid::message::keys;
use xavyo_openid::nonce::check_freshness;
use xavyo_openid::{
    Association, AssociationType, BindingPipeline, InMemoryNonceStore, MessageKind, NonceError,
    NonceStore, OpenIdError, ProviderApplicationStore, RelyingPartyType, ResponseNonce,
    SecuritySettings, SessionType,
};

/// Relying Party state holding the shared association for `provider`.
async fn relying_party_for(
    provider: &xavyo_openid::OpenIdProvider,
    now: chrono::DateTime<Utc>,
) -> (ProviderApplicationStore, String) {
    let exchange = RelyingPartyExchange::new(SessionType::DhSha256, DhParameters::default()).unwrap();
    let response = direct_reply(
        send(provider, &exchange.associate_request(AssociationType::HmacSha256), now).await,
        MessageKind::AssociateResponse,
    );
    let handle = response.get(keys::ASSOC_HANDLE).unwrap().to_string();
    let secret = exchange.decrypt(&response).unwrap();

    let store = ProviderApplicationStore::in_memory(&SecuritySettings::default());
    store
        .associations
        .store(Association::new(
            handle.clone(),
            secret,
            AssociationType::HmacSha256,
            now,
            Duration::days(14),
            RelyingPartyType::Smart,
        ))
        .await
        .unwrap();
    (store, handle)
}

#[tokio::test]
async fn test_assertion_accepted_once_then_replay_rejected() {
    let provider = provider(ScriptedHost::asserting());
    let now = Utc::now();
    let (rp_store, handle) = relying_party_for(&provider, now).await;
    let settings = SecuritySettings::default();
    let pipeline = BindingPipeline::standard();

    let assertion = redirected_message(send(&provider, &checkid_request(false, Some(&handle)), now).await);

    let context = rp_store.binding_context(&settings, now);
    pipeline.process_incoming(assertion.clone(), &context).await.unwrap();

    let replayed = pipeline.process_incoming(assertion, &context).await;
    assert!(matches!(replayed, Err(OpenIdError::Replay { ref origin, .. }) if origin == "http://op.example.com/server"));
}

#[tokio::test]
async fn test_stale_assertion_rejected_as_expired() {
    let provider = provider(ScriptedHost::asserting());
    let now = Utc::now();
    let (rp_store, handle) = relying_party_for(&provider, now).await;
    let settings = SecuritySettings::default();

    let assertion = redirected_message(send(&provider, &checkid_request(false, Some(&handle)), now).await);

    let later = now + Duration::minutes(14);
    let context = rp_store.binding_context(&settings, later);
    let result = BindingPipeline::standard().process_incoming(assertion, &context).await;
    assert!(matches!(result, Err(OpenIdError::Expired(_))));
}

#[tokio::test]
async fn test_tampered_assertion_fails_before_nonce_is_recorded() {
    let provider = provider(ScriptedHost::asserting());
    let now = Utc::now();
    let (rp_store, handle) = relying_party_for(&provider, now).await;
    let settings = SecuritySettings::default();
    let pipeline = BindingPipeline::standard();

    let assertion = redirected_message(send(&provider, &checkid_request(false, Some(&handle)), now).await);
    let mut tampered = assertion.clone();
    tampered.set(keys::RETURN_TO, "https://rp.example.com/elsewhere");

    let context = rp_store.binding_context(&settings, now);
    let result = pipeline.process_incoming(tampered, &context).await;
    assert!(matches!(result, Err(OpenIdError::SignatureMismatch(_))));

    // The genuine assertion is still accepted: the forgery consumed nothing.
    pipeline.process_incoming(assertion, &context).await.unwrap();
}

#[tokio::test]
async fn test_concurrent_presentations_accept_exactly_one() {
    let store = Arc::new(InMemoryNonceStore::from_settings(&SecuritySettings::default()));
    let now = Utc::now();
    let nonce = ResponseNonce::generate(now);
    let token = nonce.to_string();
    let timestamp = nonce.timestamp;

    let mut handles = Vec::new();
    for _ in 0..16 {
        let store = store.clone();
        let token = token.clone();
        handles.push(tokio::spawn(async move {
            store
                .check_and_record("https://op.example.com/server", &token, timestamp, now)
                .await
        }));
    }

    let mut accepted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => accepted += 1,
            Err(NonceError::Replay { .. }) => {}
            Err(other) => panic!("unexpected error {other:?}"),
        }
    }
    assert_eq!(accepted, 1);
}

#[test]
fn test_freshness_window_edges() {
    let now = Utc::now();
    let age = Duration::minutes(13);
    let skew = Duration::minutes(10);

    assert!(check_freshness(now - age, now, age, skew).is_ok());
    assert!(check_freshness(now + skew, now, age, skew).is_ok());
    assert!(matches!(
        check_freshness(now - age - Duration::seconds(1), now, age, skew),
        Err(NonceError::Expired { .. })
    ));
    assert!(matches!(
        check_freshness(now + skew + Duration::seconds(1), now, age, skew),
        Err(NonceError::Expired { .. })
    ));
}
