//! OpenID Provider
//!
//! One [`OpenIdProvider`] serves one endpoint: it reads requests through the
//! channel, dispatches them, and packages the host's identity decisions into
//! signed assertions.

mod dispatcher;
pub mod host;
pub mod realm;

pub use dispatcher::ProviderState;
pub use host::{
    AuthenticationChallenge, AuthenticationDecision, AuthenticationHost, ExtensionResponse,
    HostError, InMemoryPendingRequestStore, PendingRequestStore,
};
pub use realm::Realm;

use crate::association::{
    generate_handle, negotiate, preferred_types, Association, NegotiationOutcome,
    RelyingPartyType,
};
use crate::binding::signing;
use crate::channel::{prefixed_fields, Channel};
use crate::config::SecuritySettings;
use crate::error::{OpenIdError, OpenIdResult};
use crate::http::{HttpRequestInfo, OutgoingResponse};
use crate::message::{
    keys, kvform, AssociationType, Message, MessageKind, ProtocolVersion, UNSUPPORTED_TYPE,
};
use crate::nonce::{check_freshness, ResponseNonce};
use crate::store::{canonical_url, ProviderApplicationStore};
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::Arc;
use url::Url;
use zeroize::Zeroizing;

/// Result of handling one request.
#[derive(Debug)]
pub enum ProviderOutcome {
    /// The HTTP request carried no OpenID message
    NoRequest,
    Respond(OutgoingResponse),
    /// The host deferred its decision; resume with [`OpenIdProvider::resume_pending`]
    Pending { key: String },
    /// The request failed. `response` is a ready direct error, but the host
    /// may choose a different reaction based on `error`.
    Failed {
        error: OpenIdError,
        response: OutgoingResponse,
    },
}

impl ProviderOutcome {
    #[must_use]
    pub fn response(&self) -> Option<&OutgoingResponse> {
        match self {
            ProviderOutcome::Respond(response) | ProviderOutcome::Failed { response, .. } => {
                Some(response)
            }
            ProviderOutcome::NoRequest | ProviderOutcome::Pending { .. } => None,
        }
    }
}

/// Provider for one endpoint.
pub struct OpenIdProvider {
    endpoint: Url,
    op_endpoint: Url,
    settings: SecuritySettings,
    store: ProviderApplicationStore,
    channel: Channel,
    host: Arc<dyn AuthenticationHost>,
    pending: Arc<dyn PendingRequestStore>,
}

impl OpenIdProvider {
    pub fn new(
        endpoint: Url,
        settings: SecuritySettings,
        store: ProviderApplicationStore,
        host: Arc<dyn AuthenticationHost>,
    ) -> OpenIdResult<Self> {
        settings.validate()?;
        Ok(Self {
            op_endpoint: canonical_url(&endpoint),
            endpoint,
            settings,
            store,
            channel: Channel::default(),
            host,
            pending: Arc::new(InMemoryPendingRequestStore::new()),
        })
    }

    #[must_use]
    pub fn with_pending_store(mut self, pending: Arc<dyn PendingRequestStore>) -> Self {
        self.pending = pending;
        self
    }

    /// Name a different `op_endpoint` in assertions than the endpoint served.
    #[must_use]
    pub fn with_op_endpoint(mut self, op_endpoint: Url) -> Self {
        self.op_endpoint = canonical_url(&op_endpoint);
        self
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    #[must_use]
    pub fn op_endpoint(&self) -> &Url {
        &self.op_endpoint
    }

    #[must_use]
    pub fn settings(&self) -> &SecuritySettings {
        &self.settings
    }

    #[must_use]
    pub fn store(&self) -> &ProviderApplicationStore {
        &self.store
    }

    pub async fn handle_request(&self, request: &HttpRequestInfo) -> ProviderOutcome {
        self.handle_request_at(request, Utc::now()).await
    }

    /// Read, check and dispatch one request as of `now`.
    pub async fn handle_request_at(
        &self,
        request: &HttpRequestInfo,
        now: DateTime<Utc>,
    ) -> ProviderOutcome {
        let message = match self.channel.read_from_request(request) {
            Ok(None) => return ProviderOutcome::NoRequest,
            Ok(Some(message)) => message,
            Err(e) => return self.fail(e, ProtocolVersion::V20),
        };
        let version = message.version();

        let context = self.store.binding_context(&self.settings, now);
        let message = match self.channel.process_incoming(message, &context).await {
            Ok(message) => message,
            Err(e) => return self.fail(e, version),
        };
        self.dispatch(message, request.is_secure(), now).await
    }

    /// Negotiate and store a new shared association.
    ///
    /// Returns the unsigned response: an AssociateResponse, or an
    /// AssociateUnsuccessfulResponse when the requested types are refused.
    pub async fn create_associate_response(
        &self,
        request: &Message,
        secure_transport: bool,
        now: DateTime<Utc>,
    ) -> OpenIdResult<Message> {
        let version = request.version();
        let negotiated = match negotiate(request, &self.settings, secure_transport)? {
            NegotiationOutcome::Accepted(negotiated) => negotiated,
            NegotiationOutcome::Unsupported { reason } => {
                if version == ProtocolVersion::V11 {
                    return Err(OpenIdError::PolicyViolation(reason));
                }
                let (association_type, session_type) = preferred_types(&self.settings);
                return Ok(
                    Message::new(version, MessageKind::AssociateUnsuccessfulResponse)
                        .with(keys::ERROR, reason)
                        .with(keys::ERROR_CODE, UNSUPPORTED_TYPE)
                        .with(keys::ASSOC_TYPE, association_type.as_str())
                        .with(keys::SESSION_TYPE, session_type.as_str()),
                );
            }
        };

        let association = self
            .store
            .associations
            .create(
                RelyingPartyType::Smart,
                negotiated.association_type,
                negotiated.secret,
                self.settings.smart_association_lifetime,
                &self.settings.association_lifetime_bounds,
                now,
            )
            .await?;

        let mut response = Message::new(version, MessageKind::AssociateResponse)
            .with(keys::ASSOC_HANDLE, association.handle.clone())
            .with(keys::ASSOC_TYPE, negotiated.association_type.as_str())
            .with(
                keys::EXPIRES_IN,
                association.seconds_remaining(now).to_string(),
            );
        if version == ProtocolVersion::V20 || negotiated.session_type.is_diffie_hellman() {
            response.set(keys::SESSION_TYPE, negotiated.session_type.as_str());
        }
        for (key, value) in negotiated.response_fields {
            response.set(key, value);
        }
        Ok(response)
    }

    async fn handle_authentication(&self, request: Message, now: DateTime<Utc>) -> ProviderOutcome {
        let version = request.version();
        match self.verify_return_to(&request) {
            Ok(Some(_)) => {}
            Ok(None) => {
                return self.fail(
                    OpenIdError::MalformedMessage(
                        "Authentication request has no return_to to answer".to_string(),
                    ),
                    version,
                );
            }
            Err(e) => return self.fail(e, version),
        }

        // A handle this endpoint cannot resolve is refused outright, never
        // downgraded to a private association.
        if let Some(handle) = request.assoc_handle() {
            match self.store.associations.lookup(handle, now).await {
                Ok(Some(association))
                    if association.relying_party_type == RelyingPartyType::Smart => {}
                Ok(_) => {
                    tracing::warn!(
                        handle = %handle,
                        endpoint = %self.endpoint,
                        "Authentication request names an association this endpoint did not issue"
                    );
                    return self.fail(OpenIdError::UnknownAssociation(handle.to_string()), version);
                }
                Err(e) => return self.fail(e.into(), version),
            }
        }

        let challenge = AuthenticationChallenge::from_request(&request);
        let timeout = self.settings.host_decision_timeout;
        let decision = match tokio::time::timeout(timeout, self.host.decide(&challenge)).await {
            Ok(Ok(decision)) => decision,
            Ok(Err(e)) => return self.fail(OpenIdError::HostDecisionFailed(e.0), version),
            Err(_) => {
                return self.fail(OpenIdError::HostDecisionTimedOut(timeout.as_secs()), version);
            }
        };
        self.complete(request, decision, None, now).await
    }

    async fn complete(
        &self,
        request: Message,
        decision: AuthenticationDecision,
        pending_key: Option<String>,
        now: DateTime<Utc>,
    ) -> ProviderOutcome {
        let version = request.version();
        let recipient = match request.return_to() {
            Ok(Some(url)) => url,
            Ok(None) => {
                return self.fail(
                    OpenIdError::MalformedMessage("Missing return_to".to_string()),
                    version,
                );
            }
            Err(e) => return self.fail(e, version),
        };
        let immediate = request.kind() == MessageKind::CheckIdRequest { immediate: true };

        match decision {
            AuthenticationDecision::Defer if !immediate => {
                let key = pending_key.unwrap_or_else(generate_handle);
                let serialized = match serde_json::to_string(&request) {
                    Ok(serialized) => serialized,
                    Err(e) => return self.fail(OpenIdError::Storage(e.to_string()), version),
                };
                match self.pending.set(&key, serialized).await {
                    Ok(()) => {
                        tracing::info!("Authentication request deferred by host");
                        ProviderOutcome::Pending { key }
                    }
                    Err(e) => self.fail(OpenIdError::HostDecisionFailed(e.0), version),
                }
            }
            // Immediate requests cannot wait for the user.
            AuthenticationDecision::Defer | AuthenticationDecision::Deny => {
                let negative = self.negative_assertion(&request);
                self.respond(negative, Some(&recipient), now).await
            }
            AuthenticationDecision::Assert {
                claimed_id,
                local_id,
                extensions,
            } => {
                match self
                    .positive_assertion(&request, &claimed_id, &local_id, &extensions, now)
                    .await
                {
                    Ok(assertion) => {
                        tracing::info!(claimed_id = %claimed_id, "Positive assertion issued");
                        self.respond(assertion, Some(&recipient), now).await
                    }
                    Err(e) => self.fail(e, version),
                }
            }
        }
    }

    /// Complete a request the host deferred earlier.
    pub async fn resume_pending(
        &self,
        key: &str,
        decision: AuthenticationDecision,
        now: DateTime<Utc>,
    ) -> ProviderOutcome {
        let raw = match self.pending.take(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                return self.fail(
                    OpenIdError::MalformedMessage(format!(
                        "No pending authentication request under '{key}'"
                    )),
                    ProtocolVersion::V20,
                );
            }
            Err(e) => return self.fail(OpenIdError::HostDecisionFailed(e.0), ProtocolVersion::V20),
        };

        let request: Message = match serde_json::from_str(&raw) {
            Ok(request) => request,
            Err(e) => {
                return self.fail(
                    OpenIdError::MalformedMessage(format!("Pending request is corrupt: {e}")),
                    ProtocolVersion::V20,
                );
            }
        };
        if let Err(e) = request.validate() {
            return self.fail(e, request.version());
        }
        self.complete(request, decision, Some(key.to_string()), now).await
    }

    /// Build the unsigned positive assertion answering `request`.
    ///
    /// Without an `assoc_handle` in the request a private association is
    /// created and the Relying Party must verify via check_authentication.
    pub async fn positive_assertion(
        &self,
        request: &Message,
        claimed_id: &str,
        local_id: &str,
        extensions: &[ExtensionResponse],
        now: DateTime<Utc>,
    ) -> OpenIdResult<Message> {
        let return_to = request.require(keys::RETURN_TO)?;
        let handle = match request.assoc_handle() {
            Some(handle) => handle.to_string(),
            None => self.private_association(now).await?.handle,
        };
        self.build_assertion(
            request.version(),
            return_to,
            &handle,
            claimed_id,
            local_id,
            extensions,
        )
    }

    /// `cancel`, or `setup_needed` for immediate requests.
    #[must_use]
    pub fn negative_assertion(&self, request: &Message) -> Message {
        let version = request.version();
        if request.kind() != (MessageKind::CheckIdRequest { immediate: true }) {
            return Message::new(version, MessageKind::NegativeAssertion { immediate: false });
        }

        let mut negative = Message::new(version, MessageKind::NegativeAssertion { immediate: true });
        if version == ProtocolVersion::V11 {
            let mut setup = Message::new(version, MessageKind::CheckIdRequest { immediate: false });
            for (key, value) in request.fields() {
                setup.set(key.clone(), value.clone());
            }
            let mut setup_url = self.endpoint.clone();
            setup_url.query_pairs_mut().extend_pairs(prefixed_fields(&setup));
            negative.set(keys::USER_SETUP_URL, setup_url.to_string());
        }
        negative
    }

    /// Send an assertion the Relying Party never asked for.
    pub async fn unsolicited_assertion(
        &self,
        return_to: &Url,
        claimed_id: &str,
        local_id: &str,
        extensions: &[ExtensionResponse],
        now: DateTime<Utc>,
    ) -> OpenIdResult<OutgoingResponse> {
        if !self.settings.allow_unsolicited_assertions {
            return Err(OpenIdError::PolicyViolation(
                "Unsolicited assertions are disabled".to_string(),
            ));
        }
        let handle = self.private_association(now).await?.handle;
        let assertion = self.build_assertion(
            ProtocolVersion::V20,
            return_to.as_str(),
            &handle,
            claimed_id,
            local_id,
            extensions,
        )?;
        tracing::info!(claimed_id = %claimed_id, "Unsolicited assertion issued");
        self.prepare_response(assertion, Some(return_to), now).await
    }

    /// Answer a check_authentication request.
    ///
    /// Only assertions signed with a private association are confirmed. The
    /// response nonce is checked for freshness but not consumed, so a
    /// repeated check gives the same answer.
    pub async fn verify_check_authentication(
        &self,
        request: &Message,
        now: DateTime<Utc>,
    ) -> OpenIdResult<Message> {
        if request.kind() != MessageKind::CheckAuthenticationRequest {
            return Err(OpenIdError::MalformedMessage(format!(
                "Expected check_authentication, got {:?}",
                request.kind()
            )));
        }
        let handle = request.require(keys::ASSOC_HANDLE)?;
        let assertion = request.as_asserted();

        let is_valid = match self.store.associations.lookup(handle, now).await? {
            Some(association) if association.relying_party_type == RelyingPartyType::Dumb => {
                match signing::verify(&assertion, &association)
                    .and_then(|()| self.check_freshness(&assertion, now))
                {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(reason = e.reason(), "check_authentication rejected");
                        false
                    }
                }
            }
            Some(_) => {
                tracing::warn!(handle = %handle, "check_authentication names a shared association");
                false
            }
            None => {
                tracing::warn!(handle = %handle, "check_authentication names an unknown association");
                false
            }
        };

        let mut response = Message::new(request.version(), MessageKind::CheckAuthenticationResponse)
            .with(keys::IS_VALID, if is_valid { "true" } else { "false" });

        if let Some(invalidate) = request.get(keys::INVALIDATE_HANDLE) {
            let live = matches!(
                self.store.associations.lookup(invalidate, now).await?,
                Some(association) if association.relying_party_type == RelyingPartyType::Smart
            );
            if !live {
                response.set(keys::INVALIDATE_HANDLE, invalidate);
            }
        }
        Ok(response)
    }

    /// Run the outgoing pipeline and encode `message`.
    pub async fn prepare_response(
        &self,
        message: Message,
        recipient: Option<&Url>,
        now: DateTime<Utc>,
    ) -> OpenIdResult<OutgoingResponse> {
        let context = self.store.binding_context(&self.settings, now);
        self.channel.prepare_response(message, recipient, &context).await
    }

    /// A direct error response carrying the error's reason code.
    #[must_use]
    pub fn direct_error(&self, error: &OpenIdError, version: ProtocolVersion) -> OutgoingResponse {
        let message = Message::new(version, MessageKind::DirectErrorResponse)
            .with(keys::ERROR, error.public_message().replace('\n', " "))
            .with(keys::ERROR_CODE, error.reason());
        let body = kvform::encode(&message.encode())
            .unwrap_or_else(|_| format!("{}:{}\n", keys::ERROR_CODE, error.reason()));
        OutgoingResponse::Direct {
            status: error.status_code(),
            body,
        }
    }

    async fn respond(
        &self,
        message: Message,
        recipient: Option<&Url>,
        now: DateTime<Utc>,
    ) -> ProviderOutcome {
        let version = message.version();
        match self.prepare_response(message, recipient, now).await {
            Ok(response) => ProviderOutcome::Respond(response),
            Err(e) => self.fail(e, version),
        }
    }

    fn fail(&self, error: OpenIdError, version: ProtocolVersion) -> ProviderOutcome {
        tracing::warn!(reason = error.reason(), endpoint = %self.endpoint, "OpenID request failed");
        ProviderOutcome::Failed {
            response: self.direct_error(&error, version),
            error,
        }
    }

    fn verify_return_to(&self, request: &Message) -> OpenIdResult<Option<Url>> {
        let return_to = request.return_to()?;
        if let Some(raw) = request.realm() {
            let realm = Realm::parse(raw)?;
            if let Some(url) = &return_to {
                if !realm.matches(url) {
                    return Err(OpenIdError::PolicyViolation(format!(
                        "return_to {url} is outside realm {raw}"
                    )));
                }
            }
        }
        Ok(return_to)
    }

    fn check_freshness(&self, assertion: &Message, now: DateTime<Utc>) -> OpenIdResult<()> {
        if let Some(raw) = assertion.get(keys::RESPONSE_NONCE) {
            let nonce = ResponseNonce::parse(raw)?;
            check_freshness(
                nonce.timestamp,
                now,
                self.settings.max_message_age,
                self.settings.max_clock_skew,
            )?;
        }
        Ok(())
    }

    async fn private_association(&self, now: DateTime<Utc>) -> OpenIdResult<Association> {
        let association_type = if self
            .settings
            .permits_hash_bits(AssociationType::HmacSha256.hash_bits())
        {
            AssociationType::HmacSha256
        } else {
            AssociationType::HmacSha1
        };
        let mut secret = Zeroizing::new(vec![0u8; association_type.secret_len()]);
        OsRng.fill_bytes(&mut secret);
        Ok(self
            .store
            .associations
            .create(
                RelyingPartyType::Dumb,
                association_type,
                secret,
                self.settings.private_association_lifetime,
                &self.settings.association_lifetime_bounds,
                now,
            )
            .await?)
    }

    fn build_assertion(
        &self,
        version: ProtocolVersion,
        return_to: &str,
        handle: &str,
        claimed_id: &str,
        local_id: &str,
        extensions: &[ExtensionResponse],
    ) -> OpenIdResult<Message> {
        let mut assertion = Message::new(version, MessageKind::PositiveAssertion)
            .with(keys::RETURN_TO, return_to)
            .with(keys::ASSOC_HANDLE, handle)
            .with(keys::IDENTITY, local_id);
        if version == ProtocolVersion::V20 {
            assertion.set(keys::OP_ENDPOINT, self.op_endpoint.as_str());
            assertion.set(keys::CLAIMED_ID, claimed_id);
        }
        for extension in extensions {
            assertion.add_extension(
                &extension.alias,
                &extension.namespace,
                extension.args.clone(),
            )?;
        }
        Ok(assertion)
    }
}
