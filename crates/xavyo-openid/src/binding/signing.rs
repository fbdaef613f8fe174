//! Message signing
//!
//! The signature is an HMAC over the fields named in `signed`, in that
//! order, keyed with the association secret. Each field enters the MAC as
//! `len(key):key:len(value):value`, lengths in bytes, so any UTF-8 value
//! (newlines included) has exactly one encoding.

use super::{BindingContext, BindingElement};
use crate::association::Association;
use crate::error::{OpenIdError, OpenIdResult};
use crate::message::{keys, AssociationType, Message, MessageKind, ProtocolVersion};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;

/// Fields an associate response signs to confirm the new key.
const KEY_CONFIRMATION_FIELDS: &[&str] = &[
    keys::ASSOC_HANDLE,
    keys::ASSOC_TYPE,
    keys::SESSION_TYPE,
    keys::EXPIRES_IN,
];

/// Never covered by the signature.
const UNSIGNED_FIELDS: &[&str] = &[keys::SIG, keys::SIGNED, keys::INVALIDATE_HANDLE];

/// Signs outgoing assertions and verifies incoming ones.
pub struct SigningElement;

#[async_trait]
impl BindingElement for SigningElement {
    fn name(&self) -> &'static str {
        "signing"
    }

    fn applies_to(&self, message: &Message) -> bool {
        matches!(
            message.kind(),
            MessageKind::PositiveAssertion | MessageKind::AssociateResponse
        )
    }

    async fn prepare_outgoing(
        &self,
        message: &mut Message,
        context: &BindingContext<'_>,
    ) -> OpenIdResult<()> {
        let handle = message.require(keys::ASSOC_HANDLE)?.to_string();
        let association = context
            .associations
            .lookup(&handle, context.now)
            .await?
            .ok_or_else(|| {
                tracing::warn!(handle = %handle, "Cannot sign with unknown association");
                OpenIdError::UnknownAssociation(handle.clone())
            })?;
        sign(message, &association)
    }

    async fn process_incoming(
        &self,
        message: &mut Message,
        context: &BindingContext<'_>,
    ) -> OpenIdResult<()> {
        // Associate responses are confirmed by whoever just derived the key.
        if message.kind() != MessageKind::PositiveAssertion {
            return Ok(());
        }
        let handle = message.require(keys::ASSOC_HANDLE)?.to_string();
        let association = context
            .associations
            .lookup(&handle, context.now)
            .await?
            .ok_or(OpenIdError::UnknownAssociation(handle))?;
        verify(message, &association)
    }
}

/// The fields `sign` covers for this message, in signing order.
#[must_use]
pub fn fields_to_sign(message: &Message) -> Vec<String> {
    match message.kind() {
        MessageKind::AssociateResponse => KEY_CONFIRMATION_FIELDS
            .iter()
            .filter(|key| message.contains(key))
            .map(|key| (*key).to_string())
            .collect(),
        _ => message
            .fields()
            .keys()
            .filter(|key| !UNSIGNED_FIELDS.contains(&key.as_str()))
            .cloned()
            .collect(),
    }
}

/// Sign `message` with `association`, setting `signed` and `sig`.
pub fn sign(message: &mut Message, association: &Association) -> OpenIdResult<()> {
    let signed = fields_to_sign(message);
    let signature = compute_signature(message, &signed, association)?;
    message.set(keys::SIGNED, signed.join(","));
    message.set(keys::SIG, STANDARD.encode(signature));
    Ok(())
}

/// Check `sig` against the fields listed in `signed`.
///
/// Also requires that every field the protocol expects to be covered is
/// actually listed.
pub fn verify(message: &Message, association: &Association) -> OpenIdResult<()> {
    let signed: Vec<String> = message
        .require(keys::SIGNED)?
        .split(',')
        .map(str::to_string)
        .collect();

    for required in required_signed_fields(message) {
        if !signed.iter().any(|s| s == required) {
            return Err(OpenIdError::SignatureMismatch(format!(
                "Field '{required}' is not covered by the signature"
            )));
        }
    }

    let presented = message.decode_base64(keys::SIG)?;
    let expected = compute_signature(message, &signed, association)?;
    if !bool::from(expected.as_slice().ct_eq(presented.as_slice())) {
        tracing::warn!(handle = %association.handle, "Signature mismatch");
        return Err(OpenIdError::SignatureMismatch(
            "Signature does not match the signed fields".to_string(),
        ));
    }
    Ok(())
}

fn required_signed_fields(message: &Message) -> Vec<&'static str> {
    let mut required = match message.version() {
        ProtocolVersion::V20 => vec![
            keys::OP_ENDPOINT,
            keys::RETURN_TO,
            keys::RESPONSE_NONCE,
            keys::ASSOC_HANDLE,
        ],
        ProtocolVersion::V11 => vec![keys::RETURN_TO],
    };
    for identifier in [keys::CLAIMED_ID, keys::IDENTITY] {
        if message.contains(identifier) {
            required.push(identifier);
        }
    }
    required
}

fn compute_signature(
    message: &Message,
    signed: &[String],
    association: &Association,
) -> OpenIdResult<Vec<u8>> {
    let mut pairs = Vec::with_capacity(signed.len());
    for key in signed {
        let value = message.get(key).ok_or_else(|| {
            OpenIdError::SignatureMismatch(format!("Signed field '{key}' is missing"))
        })?;
        pairs.push((key.as_str(), value));
    }
    hmac(association, &signing_input(&pairs))
}

/// Length-prefixed encoding of `pairs`: `len(key):key:len(value):value` each.
#[must_use]
pub fn signing_input(pairs: &[(&str, &str)]) -> Vec<u8> {
    let mut out = Vec::new();
    for (key, value) in pairs {
        out.extend_from_slice(format!("{}:{key}:{}:", key.len(), value.len()).as_bytes());
        out.extend_from_slice(value.as_bytes());
    }
    out
}

fn hmac(association: &Association, data: &[u8]) -> OpenIdResult<Vec<u8>> {
    let invalid_key =
        |e: hmac::digest::InvalidLength| OpenIdError::Storage(format!("Invalid MAC key: {e}"));
    Ok(match association.association_type {
        AssociationType::HmacSha1 => {
            let mut mac = <HmacSha1 as Mac>::new_from_slice(association.secret()).map_err(invalid_key)?;
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
        AssociationType::HmacSha256 => {
            let mut mac =
                <HmacSha256 as Mac>::new_from_slice(association.secret()).map_err(invalid_key)?;
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
    })
}
