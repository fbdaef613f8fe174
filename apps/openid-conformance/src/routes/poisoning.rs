//! Association poisoning Provider
//!
//! Both the victim and the attacker endpoint run this handler. Each hands
//! out every association under the same fixed handle, so a Relying Party
//! that keys associations by handle alone can be tricked into accepting an
//! assertion from the attacker as if the victim had signed it.

use super::into_http_response;
use crate::config::public_url;
use crate::host::FixedIdentityHost;
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Redirect, Response};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use url::Url;
use xavyo_openid::message::keys;
use xavyo_openid::store::canonical_url;
use xavyo_openid::{
    Channel, HttpRequestInfo, Message, MessageKind, OpenIdError, OpenIdProvider, OpenIdResult,
    OutgoingResponse, ProtocolVersion, ProviderOutcome,
};

/// Handle every association is re-keyed to.
pub const POISON_HANDLE: &str = "POISONHANDLE";

/// Relying Party test page the scenario reports back to.
const TEST_PAGE_PATH: &str = "/rp/association-poisoning";

const CHECK_AUTH_REFUSAL: &str = "check_auth message not expected in this test scenario.";

/// `GET|POST /rp/association-poisoning-op[/attacker]`
pub async fn poisoning_op_handler(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = normalize(&state, method, &uri, headers, body);
    let now = Utc::now();

    let endpoint = canonical_url(&request.public_facing_url());
    let store = state.registry.store_for(&endpoint);

    let claimed_id = test_page(&endpoint, uri.path(), "test=1");
    let host = Arc::new(FixedIdentityHost::new(claimed_id.as_str()));
    let provider = match OpenIdProvider::new(endpoint.clone(), state.settings.clone(), store, host)
    {
        Ok(provider) => provider.with_op_endpoint(state.victim_endpoint.clone()),
        Err(e) => {
            tracing::error!(error = %e, "Provider settings rejected");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let channel = Channel::default();
    let message = match channel.read_from_request(&request) {
        Ok(Some(message)) => message,
        Ok(None) => {
            return (StatusCode::BAD_REQUEST, "No OpenID message in request").into_response();
        }
        Err(e) => return into_http_response(provider.direct_error(&e, ProtocolVersion::V20)),
    };
    let version = message.version();
    let context = provider.store().binding_context(provider.settings(), now);
    let message = match channel.process_incoming(message, &context).await {
        Ok(message) => message,
        Err(e) => return into_http_response(provider.direct_error(&e, version)),
    };

    tracing::info!(
        endpoint = %endpoint,
        victim = endpoint == state.victim_endpoint,
        kind = ?message.kind(),
        "Poisoning scenario request"
    );

    let secure = request.is_secure();
    match message.kind() {
        MessageKind::AssociateRequest => {
            match poisoned_association(&provider, &message, secure, now).await {
                Ok(response) => into_http_response(response),
                Err(e) => into_http_response(provider.direct_error(&e, version)),
            }
        }
        MessageKind::CheckIdRequest { .. } => match message.assoc_handle() {
            None => {
                // Stateless Relying Parties cannot be poisoned; the run is invalid.
                tracing::warn!("Relying Party authenticated without an association");
                let target = test_page(&endpoint, uri.path(), "stateless=1");
                Redirect::to(target.as_str()).into_response()
            }
            Some(handle) if handle != POISON_HANDLE => {
                tracing::warn!(handle = %handle, "Relying Party used an unexpected handle");
                (
                    StatusCode::BAD_REQUEST,
                    format!("RP is requesting authentication with unexpected association handle {handle}"),
                )
                    .into_response()
            }
            Some(_) => outcome_response(provider.dispatch(message, secure, now).await),
        },
        MessageKind::CheckAuthenticationRequest => {
            let refusal = Message::new(ProtocolVersion::V20, MessageKind::DirectErrorResponse)
                .with(keys::ERROR, CHECK_AUTH_REFUSAL);
            match provider.prepare_response(refusal, None, now).await {
                Ok(response) => into_http_response(response),
                Err(e) => into_http_response(provider.direct_error(&e, version)),
            }
        }
        _ => outcome_response(provider.dispatch(message, secure, now).await),
    }
}

/// Negotiate normally, then move the new association under [`POISON_HANDLE`].
async fn poisoned_association(
    provider: &OpenIdProvider,
    request: &Message,
    secure: bool,
    now: DateTime<Utc>,
) -> OpenIdResult<OutgoingResponse> {
    let mut response = provider
        .create_associate_response(request, secure, now)
        .await?;
    if response.kind() == MessageKind::AssociateResponse {
        let handle = response.require(keys::ASSOC_HANDLE)?.to_string();
        let associations = &provider.store().associations;
        let association = associations
            .lookup(&handle, now)
            .await?
            .ok_or(OpenIdError::UnknownAssociation(handle))?;
        let poisoned = associations
            .override_handle(&association, POISON_HANDLE)
            .await?;
        response.set(keys::ASSOC_HANDLE, poisoned.handle);
        tracing::info!(endpoint = %provider.endpoint(), "Association issued under the fixed handle");
    }
    provider.prepare_response(response, None, now).await
}

fn outcome_response(outcome: ProviderOutcome) -> Response {
    match outcome {
        ProviderOutcome::Respond(response) | ProviderOutcome::Failed { response, .. } => {
            into_http_response(response)
        }
        ProviderOutcome::NoRequest => {
            (StatusCode::BAD_REQUEST, "No OpenID message in request").into_response()
        }
        ProviderOutcome::Pending { .. } => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// Rebuild the request as the engine sees it: an absolute URL plus headers and body.
fn normalize(
    state: &AppState,
    method: Method,
    uri: &Uri,
    headers: HeaderMap,
    body: Bytes,
) -> HttpRequestInfo {
    let url = public_url(&state.public_base_url, uri.path(), uri.query());
    let mut request = HttpRequestInfo::new(method, url);
    request.headers = headers;
    request.body = body.to_vec();
    request
}

/// The Relying Party test page next to `endpoint`, which was reached on `route_path`.
fn test_page(endpoint: &Url, route_path: &str, query: &str) -> Url {
    let mut base = endpoint.clone();
    base.set_path(endpoint.path().strip_suffix(route_path).unwrap_or(""));
    public_url(&base, TEST_PAGE_PATH, Some(query))
}
