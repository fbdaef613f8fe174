//! Secret negotiation for associate requests
//!
//! The Provider side turns an AssociateRequest into a fresh MAC key plus the
//! response fields that transfer it. The Relying Party side builds the
//! request and recovers the key from the response.

use super::dh::{decode_btwoc, encode_btwoc, xor_secret, DhKeyPair, DhParameters, KeyExchangeError};
use crate::config::SecuritySettings;
use crate::error::{OpenIdError, OpenIdResult};
use crate::message::{keys, AssociationType, Message, MessageKind, ProtocolVersion, SessionType};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

/// A MAC key ready to be stored, and the fields that hand it to the Relying Party.
pub struct NegotiatedAssociation {
    pub association_type: AssociationType,
    pub session_type: SessionType,
    pub secret: Zeroizing<Vec<u8>>,
    pub response_fields: Vec<(&'static str, String)>,
}

impl std::fmt::Debug for NegotiatedAssociation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NegotiatedAssociation")
            .field("association_type", &self.association_type)
            .field("session_type", &self.session_type)
            .field("secret", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum NegotiationOutcome {
    Accepted(NegotiatedAssociation),
    /// The requested combination is unknown or forbidden; answer with an
    /// unsuccessful response suggesting [`preferred_types`].
    Unsupported { reason: String },
}

/// The association and session types the Provider suggests when refusing a request.
#[must_use]
pub fn preferred_types(settings: &SecuritySettings) -> (AssociationType, SessionType) {
    if settings.permits_hash_bits(AssociationType::HmacSha256.hash_bits()) {
        (AssociationType::HmacSha256, SessionType::DhSha256)
    } else {
        (AssociationType::HmacSha1, SessionType::DhSha1)
    }
}

/// Negotiate the secret for an AssociateRequest.
///
/// `secure_transport` is whether the request arrived over HTTPS.
pub fn negotiate(
    request: &Message,
    settings: &SecuritySettings,
    secure_transport: bool,
) -> OpenIdResult<NegotiationOutcome> {
    if request.kind() != MessageKind::AssociateRequest {
        return Err(OpenIdError::MalformedMessage(format!(
            "Cannot negotiate an association from {:?}",
            request.kind()
        )));
    }

    let raw_assoc = request.require(keys::ASSOC_TYPE)?;
    let raw_session = request.get(keys::SESSION_TYPE).unwrap_or("");
    let (Ok(association_type), Ok(session_type)) =
        (AssociationType::parse(raw_assoc), SessionType::parse(raw_session))
    else {
        return Ok(unsupported(format!(
            "The association type '{raw_assoc}' with session type '{raw_session}' is not supported"
        )));
    };

    if !session_type.is_compatible_with(association_type) {
        return Ok(unsupported(format!(
            "Session type {session_type} cannot carry a {association_type} key"
        )));
    }
    if !settings.permits_hash_bits(association_type.hash_bits()) {
        return Ok(unsupported(format!(
            "{association_type} is outside the permitted hash strength"
        )));
    }
    if request.version() == ProtocolVersion::V11
        && (association_type != AssociationType::HmacSha1
            || session_type == SessionType::DhSha256)
    {
        return Ok(unsupported(
            "OpenID 1.1 associations are limited to HMAC-SHA1".to_string(),
        ));
    }
    if session_type == SessionType::NoEncryption
        && !secure_transport
        && settings.require_private_association_over_insecure_transport
    {
        tracing::warn!("Plaintext association requested over insecure transport");
        return Ok(unsupported(
            "no-encryption associations require HTTPS; use a Diffie-Hellman session".to_string(),
        ));
    }

    let mut secret = Zeroizing::new(vec![0u8; association_type.secret_len()]);
    OsRng.fill_bytes(&mut secret);

    let response_fields = if session_type.is_diffie_hellman() {
        let params =
            DhParameters::from_fields(request.get(keys::DH_MODULUS), request.get(keys::DH_GEN))?;
        let consumer_public = decode_btwoc(request.require(keys::DH_CONSUMER_PUBLIC)?)?;
        let key_pair = params.generate_key_pair();
        let shared = key_pair.shared_secret(&params, &consumer_public)?;
        let masked = xor_secret(session_type, &shared, &secret)?;
        vec![
            (keys::DH_SERVER_PUBLIC, encode_btwoc(key_pair.public())),
            (keys::ENC_MAC_KEY, STANDARD.encode(&*masked)),
        ]
    } else {
        vec![(keys::MAC_KEY, STANDARD.encode(&*secret))]
    };

    tracing::debug!(
        association_type = %association_type,
        session_type = %session_type,
        "Association secret negotiated"
    );

    Ok(NegotiationOutcome::Accepted(NegotiatedAssociation {
        association_type,
        session_type,
        secret,
        response_fields,
    }))
}

fn unsupported(reason: String) -> NegotiationOutcome {
    tracing::warn!(reason = %reason, "Association request refused");
    NegotiationOutcome::Unsupported { reason }
}

/// Relying Party half of a Diffie-Hellman association.
#[derive(Debug)]
pub struct RelyingPartyExchange {
    session_type: SessionType,
    params: DhParameters,
    key_pair: DhKeyPair,
}

impl RelyingPartyExchange {
    pub fn new(session_type: SessionType, params: DhParameters) -> Result<Self, KeyExchangeError> {
        if !session_type.is_diffie_hellman() {
            return Err(KeyExchangeError::InvalidParameters(
                "no-encryption sessions have no key exchange".to_string(),
            ));
        }
        let key_pair = params.generate_key_pair();
        Ok(Self {
            session_type,
            params,
            key_pair,
        })
    }

    /// Build the AssociateRequest carrying this party's public value.
    #[must_use]
    pub fn associate_request(&self, association_type: AssociationType) -> Message {
        let mut request = Message::new(ProtocolVersion::V20, MessageKind::AssociateRequest)
            .with(keys::ASSOC_TYPE, association_type.as_str())
            .with(keys::SESSION_TYPE, self.session_type.as_str())
            .with(keys::DH_CONSUMER_PUBLIC, encode_btwoc(self.key_pair.public()));
        if !self.params.is_default() {
            request.set(keys::DH_MODULUS, encode_btwoc(self.params.modulus()));
            request.set(keys::DH_GEN, encode_btwoc(self.params.generator()));
        }
        request
    }

    /// Recover the MAC key from the Provider's AssociateResponse.
    pub fn decrypt(&self, response: &Message) -> OpenIdResult<Zeroizing<Vec<u8>>> {
        if response.kind() != MessageKind::AssociateResponse {
            return Err(OpenIdError::MalformedMessage(format!(
                "Expected an associate response, got {:?}",
                response.kind()
            )));
        }
        let session_type = SessionType::parse(response.get(keys::SESSION_TYPE).unwrap_or(""))?;
        if session_type != self.session_type {
            return Err(OpenIdError::InvalidKeyExchangeParameters(format!(
                "Provider answered with session type {session_type}, requested {}",
                self.session_type
            )));
        }
        let server_public = decode_btwoc(response.require(keys::DH_SERVER_PUBLIC)?)?;
        let shared = self.key_pair.shared_secret(&self.params, &server_public)?;
        let masked = response.decode_base64(keys::ENC_MAC_KEY)?;
        Ok(xor_secret(session_type, &shared, &masked)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigUint;

    fn response_from(negotiated: &NegotiatedAssociation) -> Message {
        let mut response = Message::new(ProtocolVersion::V20, MessageKind::AssociateResponse)
            .with(keys::ASSOC_HANDLE, "h")
            .with(keys::ASSOC_TYPE, negotiated.association_type.as_str())
            .with(keys::SESSION_TYPE, negotiated.session_type.as_str())
            .with(keys::EXPIRES_IN, "3600");
        for (key, value) in &negotiated.response_fields {
            response.set(*key, value.clone());
        }
        response
    }

    fn accepted(outcome: NegotiationOutcome) -> NegotiatedAssociation {
        match outcome {
            NegotiationOutcome::Accepted(negotiated) => negotiated,
            NegotiationOutcome::Unsupported { reason } => panic!("unexpected refusal: {reason}"),
        }
    }

    #[test]
    fn test_dh_sha256_both_sides_agree_on_secret() {
        let rp = RelyingPartyExchange::new(SessionType::DhSha256, DhParameters::default()).unwrap();
        let request = rp.associate_request(AssociationType::HmacSha256);

        let negotiated =
            accepted(negotiate(&request, &SecuritySettings::default(), false).unwrap());
        assert_eq!(negotiated.secret.len(), 32);

        let recovered = rp.decrypt(&response_from(&negotiated)).unwrap();
        assert_eq!(recovered.as_slice(), negotiated.secret.as_slice());
    }

    #[test]
    fn test_dh_sha1_with_custom_group() {
        let params = DhParameters::new(
            BigUint::from(2_305_843_009_213_693_951u64),
            BigUint::from(37u32),
        )
        .unwrap();
        let rp = RelyingPartyExchange::new(SessionType::DhSha1, params).unwrap();
        let request = rp.associate_request(AssociationType::HmacSha1);
        assert!(request.contains(keys::DH_MODULUS));

        let negotiated =
            accepted(negotiate(&request, &SecuritySettings::default(), false).unwrap());
        let recovered = rp.decrypt(&response_from(&negotiated)).unwrap();
        assert_eq!(recovered.as_slice(), negotiated.secret.as_slice());
    }

    #[test]
    fn test_plaintext_over_http_refused() {
        let request = Message::new(ProtocolVersion::V20, MessageKind::AssociateRequest)
            .with(keys::ASSOC_TYPE, "HMAC-SHA256")
            .with(keys::SESSION_TYPE, "no-encryption");
        let outcome = negotiate(&request, &SecuritySettings::default(), false).unwrap();
        assert!(matches!(outcome, NegotiationOutcome::Unsupported { .. }));
    }

    #[test]
    fn test_plaintext_over_https_returns_mac_key() {
        let request = Message::new(ProtocolVersion::V20, MessageKind::AssociateRequest)
            .with(keys::ASSOC_TYPE, "HMAC-SHA1")
            .with(keys::SESSION_TYPE, "no-encryption");
        let negotiated = accepted(negotiate(&request, &SecuritySettings::default(), true).unwrap());
        let (key, value) = &negotiated.response_fields[0];
        assert_eq!(*key, keys::MAC_KEY);
        assert_eq!(STANDARD.decode(value).unwrap(), negotiated.secret.as_slice());
    }

    #[test]
    fn test_mismatched_pairing_is_unsupported() {
        let request = Message::new(ProtocolVersion::V20, MessageKind::AssociateRequest)
            .with(keys::ASSOC_TYPE, "HMAC-SHA1")
            .with(keys::SESSION_TYPE, "DH-SHA256")
            .with(keys::DH_CONSUMER_PUBLIC, "AgM=");
        let outcome = negotiate(&request, &SecuritySettings::default(), true).unwrap();
        assert!(matches!(outcome, NegotiationOutcome::Unsupported { .. }));
    }

    #[test]
    fn test_unknown_type_is_unsupported_not_malformed() {
        let request = Message::new(ProtocolVersion::V20, MessageKind::AssociateRequest)
            .with(keys::ASSOC_TYPE, "HMAC-MD5")
            .with(keys::SESSION_TYPE, "no-encryption");
        let outcome = negotiate(&request, &SecuritySettings::default(), true).unwrap();
        assert!(matches!(outcome, NegotiationOutcome::Unsupported { .. }));
    }

    #[test]
    fn test_degenerate_consumer_public_rejected() {
        let p = DhParameters::default().modulus().clone();
        let request = Message::new(ProtocolVersion::V20, MessageKind::AssociateRequest)
            .with(keys::ASSOC_TYPE, "HMAC-SHA256")
            .with(keys::SESSION_TYPE, "DH-SHA256")
            .with(
                keys::DH_CONSUMER_PUBLIC,
                encode_btwoc(&(p - BigUint::from(1u32))),
            );
        let err = negotiate(&request, &SecuritySettings::default(), false).unwrap_err();
        assert!(matches!(err, OpenIdError::InvalidKeyExchangeParameters(_)));
    }

    #[test]
    fn test_preferred_types_follow_hash_limits() {
        let settings = SecuritySettings::default();
        assert_eq!(
            preferred_types(&settings),
            (AssociationType::HmacSha256, SessionType::DhSha256)
        );
        let weak = SecuritySettings {
            maximum_hash_bits: 160,
            ..SecuritySettings::default()
        };
        assert_eq!(
            preferred_types(&weak),
            (AssociationType::HmacSha1, SessionType::DhSha1)
        );
    }

    #[test]
    fn test_decrypt_rejects_session_mismatch() {
        let rp = RelyingPartyExchange::new(SessionType::DhSha256, DhParameters::default()).unwrap();
        let response = Message::new(ProtocolVersion::V20, MessageKind::AssociateResponse)
            .with(keys::SESSION_TYPE, "no-encryption")
            .with(keys::MAC_KEY, "AAAA");
        assert!(rp.decrypt(&response).is_err());
    }
}
