//! Request dispatch
//!
//! Every decoded request maps to exactly one [`ProviderState`]; the match in
//! [`OpenIdProvider::dispatch`] is the whole state machine.

use super::{OpenIdProvider, ProviderOutcome};
use crate::error::OpenIdError;
use crate::message::{Message, MessageKind};
use chrono::{DateTime, Utc};

/// What an incoming request asks the Provider to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderState {
    AssociateRequested,
    AuthenticationRequested,
    CheckAuthenticationRequested,
    Unrecognized,
}

impl ProviderState {
    #[must_use]
    pub fn from_kind(kind: MessageKind) -> Self {
        match kind {
            MessageKind::AssociateRequest => ProviderState::AssociateRequested,
            MessageKind::CheckIdRequest { .. } => ProviderState::AuthenticationRequested,
            MessageKind::CheckAuthenticationRequest => ProviderState::CheckAuthenticationRequested,
            MessageKind::AssociateResponse
            | MessageKind::AssociateUnsuccessfulResponse
            | MessageKind::PositiveAssertion
            | MessageKind::NegativeAssertion { .. }
            | MessageKind::CheckAuthenticationResponse
            | MessageKind::DirectErrorResponse => ProviderState::Unrecognized,
        }
    }
}

impl OpenIdProvider {
    /// Route a decoded, pipeline-checked request to its protocol handler.
    pub async fn dispatch(
        &self,
        request: Message,
        secure_transport: bool,
        now: DateTime<Utc>,
    ) -> ProviderOutcome {
        let state = ProviderState::from_kind(request.kind());
        tracing::debug!(state = ?state, version = ?request.version(), "Dispatching OpenID request");

        match state {
            ProviderState::AssociateRequested => {
                match self
                    .create_associate_response(&request, secure_transport, now)
                    .await
                {
                    Ok(response) => self.respond(response, None, now).await,
                    Err(e) => self.fail(e, request.version()),
                }
            }
            ProviderState::AuthenticationRequested => {
                self.handle_authentication(request, now).await
            }
            ProviderState::CheckAuthenticationRequested => {
                if !self.settings().check_authentication_enabled {
                    return self.fail(
                        OpenIdError::PolicyViolation(
                            "check_authentication is not supported by this provider".to_string(),
                        ),
                        request.version(),
                    );
                }
                match self.verify_check_authentication(&request, now).await {
                    Ok(response) => self.respond(response, None, now).await,
                    Err(e) => self.fail(e, request.version()),
                }
            }
            ProviderState::Unrecognized => self.fail(
                OpenIdError::MalformedMessage(format!(
                    "A provider does not accept {:?} messages",
                    request.kind()
                )),
                request.version(),
            ),
        }
    }
}
