//! Association poisoning tests
//!
//! Two endpoints share one process and one store registry. A handle issued
//! by the attacker endpoint must never let the victim endpoint assert.

mod common;

use chrono::Utc;
use common::*;
use xavyo_openid::association::{DhParameters, RelyingPartyExchange};
use xavyo_openid::message::keys;
use xavyo_openid::{
    AssociationType, MessageKind, OpenIdError, ProviderOutcome, ProviderStoreRegistry,
    SecuritySettings, SessionType,
};

const ATTACKER: &str = "http://op.example.com/attacker";
const VICTIM: &str = "http://op.example.com/victim";

#[tokio::test]
async fn test_foreign_handle_is_refused_without_downgrade() {
    init_test_logging();
    let settings = SecuritySettings::default();
    let registry = ProviderStoreRegistry::new(settings.clone());
    let attacker = provider_at(&registry, ATTACKER, settings.clone(), ScriptedHost::asserting());
    let victim_host = ScriptedHost::asserting();
    let victim = provider_at(&registry, VICTIM, settings, victim_host.clone());
    let now = Utc::now();

    let exchange = RelyingPartyExchange::new(SessionType::DhSha256, DhParameters::default()).unwrap();
    let response = direct_reply(
        send(&attacker, &exchange.associate_request(AssociationType::HmacSha256), now).await,
        MessageKind::AssociateResponse,
    );
    let handle = response.get(keys::ASSOC_HANDLE).unwrap();

    let outcome = send(&victim, &checkid_request(false, Some(handle)), now).await;
    match outcome {
        ProviderOutcome::Failed { error, response } => {
            assert!(matches!(error, OpenIdError::UnknownAssociation(ref h) if h == handle));
            assert!(response.body().contains("error_code:unknown_association\n"));
        }
        other => panic!("victim must refuse the foreign handle, got {other:?}"),
    }
    assert_eq!(victim_host.calls(), 0);
    assert!(victim.store().associations.lookup(handle, now).await.unwrap().is_none());
    assert_eq!(registry.len(), 2);
}

#[tokio::test]
async fn test_never_issued_handle_is_refused() {
    let host = ScriptedHost::asserting();
    let provider = provider(host.clone());

    let outcome = send(&provider, &checkid_request(false, Some("POISONHANDLE")), Utc::now()).await;
    assert!(matches!(
        outcome,
        ProviderOutcome::Failed {
            error: OpenIdError::UnknownAssociation(_),
            ..
        }
    ));
    assert_eq!(host.calls(), 0);
}

#[tokio::test]
async fn test_private_handle_cannot_be_used_as_shared() {
    let provider = provider(ScriptedHost::asserting());
    let now = Utc::now();

    let assertion = redirected_message(send(&provider, &checkid_request(false, None), now).await);
    let private_handle = assertion.get(keys::ASSOC_HANDLE).unwrap();

    let outcome = send(&provider, &checkid_request(false, Some(private_handle)), now).await;
    assert!(matches!(
        outcome,
        ProviderOutcome::Failed {
            error: OpenIdError::UnknownAssociation(_),
            ..
        }
    ));
}

#[tokio::test]
async fn test_same_endpoint_with_query_shares_associations() {
    let settings = SecuritySettings::default();
    let registry = ProviderStoreRegistry::new(settings.clone());
    let first = provider_at(&registry, VICTIM, settings.clone(), ScriptedHost::asserting());
    let second = provider_at(
        &registry,
        "http://op.example.com/victim?scenario=2",
        settings,
        ScriptedHost::asserting(),
    );
    let now = Utc::now();

    let exchange = RelyingPartyExchange::new(SessionType::DhSha256, DhParameters::default()).unwrap();
    let response = direct_reply(
        send(&first, &exchange.associate_request(AssociationType::HmacSha256), now).await,
        MessageKind::AssociateResponse,
    );
    let handle = response.get(keys::ASSOC_HANDLE).unwrap();

    assert!(second.store().associations.lookup(handle, now).await.unwrap().is_some());
    assert_eq!(registry.len(), 1);
}

#[cfg(feature = "handle-override")]
#[tokio::test]
async fn test_overridden_handle_signs_under_fixed_name() {
    use xavyo_openid::binding::signing;

    let provider = provider(ScriptedHost::asserting());
    let now = Utc::now();

    let exchange = RelyingPartyExchange::new(SessionType::DhSha256, DhParameters::default()).unwrap();
    let request = exchange.associate_request(AssociationType::HmacSha256);
    let mut response = provider
        .create_associate_response(&request, false, now)
        .await
        .unwrap();
    let original = provider
        .store()
        .associations
        .lookup(response.get(keys::ASSOC_HANDLE).unwrap(), now)
        .await
        .unwrap()
        .unwrap();
    let fixed = provider
        .store()
        .associations
        .override_handle(&original, "POISONHANDLE")
        .await
        .unwrap();
    response.set(keys::ASSOC_HANDLE, fixed.handle.clone());

    let reply = match provider.prepare_response(response, None, now).await.unwrap() {
        xavyo_openid::OutgoingResponse::Direct { body, .. } => {
            xavyo_openid::channel::read_direct_response(MessageKind::AssociateResponse, &body)
                .unwrap()
        }
        other => panic!("expected a direct response, got {other:?}"),
    };
    assert_eq!(reply.get(keys::ASSOC_HANDLE), Some("POISONHANDLE"));
    assert!(signing::fields_to_sign(&reply).contains(&keys::ASSOC_HANDLE.to_string()));

    let assertion =
        redirected_message(send(&provider, &checkid_request(false, Some("POISONHANDLE")), now).await);
    assert_eq!(assertion.get(keys::ASSOC_HANDLE), Some("POISONHANDLE"));
}
