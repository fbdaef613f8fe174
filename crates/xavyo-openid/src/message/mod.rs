//! Protocol message model
//!
//! A [`Message`] is a protocol version, a [`MessageKind`] tag and the map of
//! its fields. Field names are stored without the `openid.` transport prefix;
//! `ns` and `mode` are derived from the version and kind and never stored.

mod kind;
pub mod kvform;
mod types;

pub use kind::{MessageKind, Transport};
pub use types::{AssociationType, SessionType};

use crate::error::{OpenIdError, OpenIdResult};
use crate::nonce::ResponseNonce;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// Namespace URI of OpenID Authentication 2.0
pub const OPENID2_NS: &str = "http://specs.openid.net/auth/2.0";

/// Namespace URI some 1.1 parties send explicitly
pub const OPENID11_NS: &str = "http://openid.net/signon/1.1";

/// Identifier the Relying Party sends when the Provider should choose the identity
pub const IDENTIFIER_SELECT: &str = "http://specs.openid.net/auth/2.0/identifier_select";

/// Field names, without the `openid.` prefix
pub mod keys {
    pub const NS: &str = "ns";
    pub const MODE: &str = "mode";
    pub const ASSOC_HANDLE: &str = "assoc_handle";
    pub const ASSOC_TYPE: &str = "assoc_type";
    pub const SESSION_TYPE: &str = "session_type";
    pub const DH_MODULUS: &str = "dh_modulus";
    pub const DH_GEN: &str = "dh_gen";
    pub const DH_CONSUMER_PUBLIC: &str = "dh_consumer_public";
    pub const DH_SERVER_PUBLIC: &str = "dh_server_public";
    pub const ENC_MAC_KEY: &str = "enc_mac_key";
    pub const MAC_KEY: &str = "mac_key";
    pub const EXPIRES_IN: &str = "expires_in";
    pub const ERROR: &str = "error";
    pub const ERROR_CODE: &str = "error_code";
    pub const CONTACT: &str = "contact";
    pub const REFERENCE: &str = "reference";
    pub const CLAIMED_ID: &str = "claimed_id";
    pub const IDENTITY: &str = "identity";
    pub const RETURN_TO: &str = "return_to";
    pub const REALM: &str = "realm";
    pub const TRUST_ROOT: &str = "trust_root";
    pub const OP_ENDPOINT: &str = "op_endpoint";
    pub const RESPONSE_NONCE: &str = "response_nonce";
    pub const INVALIDATE_HANDLE: &str = "invalidate_handle";
    pub const SIGNED: &str = "signed";
    pub const SIG: &str = "sig";
    pub const IS_VALID: &str = "is_valid";
    pub const USER_SETUP_URL: &str = "user_setup_url";
}

/// `error_code` of an unsuccessful associate response
pub const UNSUPPORTED_TYPE: &str = "unsupported-type";

/// Protocol version of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolVersion {
    V11,
    V20,
}

impl ProtocolVersion {
    /// The `ns` value written for this version. 1.1 messages carry none.
    #[must_use]
    pub fn namespace(&self) -> Option<&'static str> {
        match self {
            ProtocolVersion::V11 => None,
            ProtocolVersion::V20 => Some(OPENID2_NS),
        }
    }

    fn from_namespace(ns: Option<&str>) -> OpenIdResult<Self> {
        match ns {
            None | Some(OPENID11_NS) => Ok(ProtocolVersion::V11),
            Some(OPENID2_NS) => Ok(ProtocolVersion::V20),
            Some(other) => Err(OpenIdError::MalformedMessage(format!(
                "Unrecognized protocol namespace '{other}'"
            ))),
        }
    }
}

/// A typed protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    version: ProtocolVersion,
    kind: MessageKind,
    fields: BTreeMap<String, String>,
}

impl Message {
    #[must_use]
    pub fn new(version: ProtocolVersion, kind: MessageKind) -> Self {
        Self {
            version,
            kind,
            fields: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    #[must_use]
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    #[must_use]
    pub fn mode(&self) -> Option<&'static str> {
        self.kind.mode(self.version)
    }

    #[must_use]
    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Get a field that must be present.
    pub fn require(&self, key: &str) -> OpenIdResult<&str> {
        self.get(key).ok_or_else(|| {
            OpenIdError::MalformedMessage(format!("Missing required field '{key}'"))
        })
    }

    /// Set a field. `ns` and `mode` follow from the version and kind and are ignored.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        if key == keys::NS || key == keys::MODE {
            tracing::debug!(key = %key, "Ignoring reserved message field");
            return;
        }
        self.fields.insert(key, value.into());
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.fields.remove(key)
    }

    #[must_use]
    pub fn assoc_handle(&self) -> Option<&str> {
        self.get(keys::ASSOC_HANDLE).filter(|h| !h.is_empty())
    }

    /// The parsed `return_to` URL, if the message carries one.
    pub fn return_to(&self) -> OpenIdResult<Option<Url>> {
        self.get(keys::RETURN_TO).map(parse_absolute_url).transpose()
    }

    /// The realm (2.0) or trust root (1.1) of an authentication request.
    #[must_use]
    pub fn realm(&self) -> Option<&str> {
        match self.version {
            ProtocolVersion::V20 => self.get(keys::REALM),
            ProtocolVersion::V11 => self.get(keys::TRUST_ROOT),
        }
    }

    /// Encode into ordered pairs: `ns`, then `mode`, then every field in key order.
    #[must_use]
    pub fn encode(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::with_capacity(self.fields.len() + 2);
        if let Some(ns) = self.version.namespace() {
            pairs.push((keys::NS.to_string(), ns.to_string()));
        }
        if let Some(mode) = self.mode() {
            pairs.push((keys::MODE.to_string(), mode.to_string()));
        }
        pairs.extend(self.fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        pairs
    }

    /// Decode pairs as a message of a known kind.
    ///
    /// Used for direct responses, whose kind follows from the request that
    /// was sent rather than from a `mode` field.
    pub fn decode<I, K, V>(kind: MessageKind, pairs: I) -> OpenIdResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut map = collect_pairs(pairs)?;
        let version = ProtocolVersion::from_namespace(map.remove(keys::NS).as_deref())?;
        let mode = map.remove(keys::MODE);

        match (kind.mode(version), mode.as_deref()) {
            (Some(expected), Some(actual)) if expected == actual => {}
            (None, None) => {}
            (expected, actual) => {
                return Err(OpenIdError::MalformedMessage(format!(
                    "Mode mismatch for {kind:?}: expected {}, found {}",
                    expected.unwrap_or("none"),
                    actual.unwrap_or("none")
                )));
            }
        }

        let message = Self {
            version,
            kind,
            fields: map,
        };
        message.validate()?;
        Ok(message)
    }

    /// Decode an incoming request-side message, discriminating on `mode`.
    pub fn decode_request<I, K, V>(pairs: I) -> OpenIdResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map = collect_pairs(pairs)?;
        let version = ProtocolVersion::from_namespace(map.get(keys::NS).map(String::as_str))?;
        let mode = map
            .get(keys::MODE)
            .ok_or_else(|| OpenIdError::MalformedMessage("Missing 'mode' field".to_string()))?;
        let kind = MessageKind::from_mode(mode, version, map.contains_key(keys::USER_SETUP_URL))
            .ok_or_else(|| {
                OpenIdError::MalformedMessage(format!("Unrecognized mode '{mode}'"))
            })?;
        Self::decode(kind, map)
    }

    /// Check required fields and typed values for this kind and version.
    pub fn validate(&self) -> OpenIdResult<()> {
        for key in self.required_fields() {
            self.require(key)?;
        }

        match self.kind {
            MessageKind::AssociateRequest => {
                let session = self.get(keys::SESSION_TYPE).unwrap_or("");
                if session.starts_with("DH-") {
                    self.require(keys::DH_CONSUMER_PUBLIC)?;
                }
                self.check_base64(&[keys::DH_CONSUMER_PUBLIC, keys::DH_MODULUS, keys::DH_GEN])?;
            }
            MessageKind::AssociateResponse => {
                AssociationType::parse(self.require(keys::ASSOC_TYPE)?)?;
                let session = SessionType::parse(self.get(keys::SESSION_TYPE).unwrap_or(""))?;
                if session.is_diffie_hellman() {
                    self.require(keys::DH_SERVER_PUBLIC)?;
                    self.require(keys::ENC_MAC_KEY)?;
                } else {
                    self.require(keys::MAC_KEY)?;
                }
                self.parse_u64(keys::EXPIRES_IN)?;
                self.check_base64(&[keys::DH_SERVER_PUBLIC, keys::ENC_MAC_KEY, keys::MAC_KEY])?;
            }
            MessageKind::AssociateUnsuccessfulResponse => {
                if self.get(keys::ERROR_CODE) != Some(UNSUPPORTED_TYPE) {
                    return Err(OpenIdError::MalformedMessage(format!(
                        "error_code must be '{UNSUPPORTED_TYPE}'"
                    )));
                }
                if let Some(assoc_type) = self.get(keys::ASSOC_TYPE) {
                    AssociationType::parse(assoc_type)?;
                }
                if let Some(session_type) = self.get(keys::SESSION_TYPE) {
                    SessionType::parse(session_type)?;
                }
            }
            MessageKind::CheckIdRequest { .. } => {
                if self.version == ProtocolVersion::V20
                    && !self.contains(keys::RETURN_TO)
                    && !self.contains(keys::REALM)
                {
                    return Err(OpenIdError::MalformedMessage(
                        "Authentication request needs return_to or realm".to_string(),
                    ));
                }
                self.check_identifier_pair()?;
                self.return_to()?;
            }
            MessageKind::PositiveAssertion | MessageKind::CheckAuthenticationRequest => {
                self.check_identifier_pair()?;
                self.return_to()?;
                if let Some(endpoint) = self.get(keys::OP_ENDPOINT) {
                    parse_absolute_url(endpoint)?;
                }
                if let Some(nonce) = self.get(keys::RESPONSE_NONCE) {
                    ResponseNonce::parse(nonce)?;
                }
                self.check_base64(&[keys::SIG])?;
            }
            MessageKind::CheckAuthenticationResponse => match self.require(keys::IS_VALID)? {
                "true" | "false" => {}
                other => {
                    return Err(OpenIdError::MalformedMessage(format!(
                        "is_valid must be 'true' or 'false', found '{other}'"
                    )));
                }
            },
            MessageKind::NegativeAssertion { .. } | MessageKind::DirectErrorResponse => {}
        }

        if self.version == ProtocolVersion::V20 {
            self.validate_extensions()?;
        }
        Ok(())
    }

    fn required_fields(&self) -> &'static [&'static str] {
        use keys::*;
        match (self.kind, self.version) {
            (MessageKind::AssociateRequest, ProtocolVersion::V20) => &[ASSOC_TYPE, SESSION_TYPE],
            (MessageKind::AssociateRequest, ProtocolVersion::V11) => &[ASSOC_TYPE],
            (MessageKind::AssociateResponse, ProtocolVersion::V20) => {
                &[ASSOC_HANDLE, ASSOC_TYPE, SESSION_TYPE, EXPIRES_IN]
            }
            (MessageKind::AssociateResponse, ProtocolVersion::V11) => {
                &[ASSOC_HANDLE, ASSOC_TYPE, EXPIRES_IN]
            }
            (MessageKind::AssociateUnsuccessfulResponse, _) => &[ERROR, ERROR_CODE],
            (MessageKind::CheckIdRequest { .. }, ProtocolVersion::V20) => &[],
            (MessageKind::CheckIdRequest { .. }, ProtocolVersion::V11) => &[IDENTITY, RETURN_TO],
            (
                MessageKind::PositiveAssertion | MessageKind::CheckAuthenticationRequest,
                ProtocolVersion::V20,
            ) => &[OP_ENDPOINT, RETURN_TO, RESPONSE_NONCE, ASSOC_HANDLE, SIGNED, SIG],
            (
                MessageKind::PositiveAssertion | MessageKind::CheckAuthenticationRequest,
                ProtocolVersion::V11,
            ) => &[IDENTITY, RETURN_TO, ASSOC_HANDLE, SIGNED, SIG],
            (MessageKind::NegativeAssertion { immediate: true }, ProtocolVersion::V11) => {
                &[USER_SETUP_URL]
            }
            (MessageKind::NegativeAssertion { .. }, _) => &[],
            (MessageKind::CheckAuthenticationResponse, _) => &[IS_VALID],
            (MessageKind::DirectErrorResponse, _) => &[ERROR],
        }
    }

    fn check_identifier_pair(&self) -> OpenIdResult<()> {
        if self.version == ProtocolVersion::V20
            && self.contains(keys::CLAIMED_ID) != self.contains(keys::IDENTITY)
        {
            return Err(OpenIdError::MalformedMessage(
                "claimed_id and identity must be present together".to_string(),
            ));
        }
        Ok(())
    }

    fn check_base64(&self, fields: &[&str]) -> OpenIdResult<()> {
        for key in fields {
            if let Some(value) = self.get(key) {
                STANDARD.decode(value).map_err(|e| {
                    OpenIdError::MalformedMessage(format!("Field '{key}' is not valid base64: {e}"))
                })?;
            }
        }
        Ok(())
    }

    /// Parse a numeric field.
    pub fn parse_u64(&self, key: &str) -> OpenIdResult<u64> {
        let raw = self.require(key)?;
        raw.parse::<u64>().map_err(|e| {
            OpenIdError::MalformedMessage(format!("Field '{key}' is not an integer: {e}"))
        })
    }

    /// Decode a base64 field.
    pub fn decode_base64(&self, key: &str) -> OpenIdResult<Vec<u8>> {
        let raw = self.require(key)?;
        STANDARD.decode(raw).map_err(|e| {
            OpenIdError::MalformedMessage(format!("Field '{key}' is not valid base64: {e}"))
        })
    }

    /// Derive the check_authentication request a Relying Party sends to
    /// verify this assertion: the identical fields under a different mode.
    pub fn to_check_authentication_request(&self) -> OpenIdResult<Message> {
        if self.kind != MessageKind::PositiveAssertion {
            return Err(OpenIdError::MalformedMessage(format!(
                "Only positive assertions can be verified, not {:?}",
                self.kind
            )));
        }
        Ok(Message {
            version: self.version,
            kind: MessageKind::CheckAuthenticationRequest,
            fields: self.fields.clone(),
        })
    }

    /// Reinterpret a check_authentication request as the assertion it carries.
    pub(crate) fn as_asserted(&self) -> Message {
        Message {
            version: self.version,
            kind: MessageKind::PositiveAssertion,
            fields: self.fields.clone(),
        }
    }

    // ── Extensions ──────────────────────────────────────────────────────

    /// Declared extension aliases mapped to their namespace URIs.
    #[must_use]
    pub fn extension_aliases(&self) -> BTreeMap<&str, &str> {
        self.fields
            .iter()
            .filter_map(|(k, v)| k.strip_prefix("ns.").map(|alias| (alias, v.as_str())))
            .collect()
    }

    /// Arguments of the extension declared under `namespace`, keyed without the alias.
    #[must_use]
    pub fn extension(&self, namespace: &str) -> Option<BTreeMap<String, String>> {
        let alias = self
            .extension_aliases()
            .into_iter()
            .find(|(_, uri)| *uri == namespace)
            .map(|(alias, _)| format!("{alias}."))?;

        Some(
            self.fields
                .iter()
                .filter_map(|(k, v)| k.strip_prefix(&alias).map(|arg| (arg.to_string(), v.clone())))
                .collect(),
        )
    }

    /// Declare an extension under `alias` and add its arguments.
    pub fn add_extension<I>(&mut self, alias: &str, namespace: &str, args: I) -> OpenIdResult<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        if alias.is_empty() || alias == keys::NS || alias.contains('.') || alias.contains(',') {
            return Err(OpenIdError::MalformedMessage(format!(
                "Invalid extension alias '{alias}'"
            )));
        }
        let ns_key = format!("ns.{alias}");
        match self.get(&ns_key) {
            Some(existing) if existing != namespace => {
                return Err(OpenIdError::MalformedMessage(format!(
                    "Alias '{alias}' is already bound to {existing}"
                )));
            }
            _ => self.set(ns_key, namespace),
        }
        for (key, value) in args {
            self.set(format!("{alias}.{key}"), value);
        }
        Ok(())
    }

    /// Every dotted field must belong to a declared alias.
    pub fn validate_extensions(&self) -> OpenIdResult<()> {
        let aliases = self.extension_aliases();
        for (key, value) in &self.fields {
            if let Some(alias) = key.strip_prefix("ns.") {
                if alias.is_empty() || alias.contains('.') || value.is_empty() {
                    return Err(OpenIdError::MalformedMessage(format!(
                        "Invalid extension declaration '{key}'"
                    )));
                }
                continue;
            }
            if let Some((alias, _)) = key.split_once('.') {
                if !aliases.contains_key(alias) {
                    return Err(OpenIdError::MalformedMessage(format!(
                        "Extension field '{key}' uses undeclared alias '{alias}'"
                    )));
                }
            }
        }
        Ok(())
    }
}

fn collect_pairs<I, K, V>(pairs: I) -> OpenIdResult<BTreeMap<String, String>>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let mut map = BTreeMap::new();
    for (key, value) in pairs {
        let key = key.into();
        if key.is_empty() || !key.is_ascii() {
            return Err(OpenIdError::MalformedMessage(format!(
                "Invalid field name '{}'",
                key.escape_default()
            )));
        }
        if map.insert(key.clone(), value.into()).is_some() {
            return Err(OpenIdError::MalformedMessage(format!(
                "Duplicate field '{key}'"
            )));
        }
    }
    Ok(map)
}

pub(crate) fn parse_absolute_url(raw: &str) -> OpenIdResult<Url> {
    let url = Url::parse(raw)
        .map_err(|e| OpenIdError::MalformedMessage(format!("Invalid URL '{raw}': {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(OpenIdError::MalformedMessage(format!(
            "URL scheme '{other}' is not allowed"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn positive_assertion() -> Message {
        Message::new(ProtocolVersion::V20, MessageKind::PositiveAssertion)
            .with(keys::OP_ENDPOINT, "https://op.example.com/server")
            .with(keys::CLAIMED_ID, "https://alice.example.com/")
            .with(keys::IDENTITY, "https://alice.example.com/")
            .with(keys::RETURN_TO, "https://rp.example.com/return?x=1")
            .with(keys::RESPONSE_NONCE, "2026-10-17T09:00:00Zabc123")
            .with(keys::ASSOC_HANDLE, "handle-1")
            .with(keys::SIGNED, "op_endpoint,return_to,response_nonce,assoc_handle")
            .with(keys::SIG, "c2lnbmF0dXJl")
    }

    fn all_kinds() -> Vec<Message> {
        vec![
            Message::new(ProtocolVersion::V20, MessageKind::AssociateRequest)
                .with(keys::ASSOC_TYPE, "HMAC-SHA256")
                .with(keys::SESSION_TYPE, "DH-SHA256")
                .with(keys::DH_CONSUMER_PUBLIC, "AQID"),
            Message::new(ProtocolVersion::V20, MessageKind::AssociateResponse)
                .with(keys::ASSOC_HANDLE, "h")
                .with(keys::ASSOC_TYPE, "HMAC-SHA1")
                .with(keys::SESSION_TYPE, "no-encryption")
                .with(keys::EXPIRES_IN, "1209600")
                .with(keys::MAC_KEY, "AAAA"),
            Message::new(ProtocolVersion::V20, MessageKind::AssociateUnsuccessfulResponse)
                .with(keys::ERROR, "nope")
                .with(keys::ERROR_CODE, UNSUPPORTED_TYPE)
                .with(keys::SESSION_TYPE, "DH-SHA256")
                .with(keys::ASSOC_TYPE, "HMAC-SHA256"),
            Message::new(ProtocolVersion::V20, MessageKind::CheckIdRequest { immediate: true })
                .with(keys::RETURN_TO, "https://rp.example.com/")
                .with(keys::REALM, "https://rp.example.com/"),
            positive_assertion(),
            Message::new(ProtocolVersion::V20, MessageKind::NegativeAssertion { immediate: true }),
            Message::new(ProtocolVersion::V11, MessageKind::NegativeAssertion { immediate: true })
                .with(keys::USER_SETUP_URL, "https://op.example.com/setup"),
            positive_assertion().to_check_authentication_request().unwrap(),
            Message::new(ProtocolVersion::V20, MessageKind::CheckAuthenticationResponse)
                .with(keys::IS_VALID, "true"),
            Message::new(ProtocolVersion::V20, MessageKind::DirectErrorResponse)
                .with(keys::ERROR, "bad request"),
        ]
    }

    #[test]
    fn test_decode_of_encode_is_identity_for_every_kind() {
        for message in all_kinds() {
            let decoded = Message::decode(message.kind(), message.encode()).unwrap();
            assert_eq!(decoded, message, "round trip failed for {:?}", message.kind());
        }
    }

    #[test]
    fn test_encode_puts_ns_and_mode_first() {
        let pairs = positive_assertion().encode();
        assert_eq!(pairs[0], ("ns".to_string(), OPENID2_NS.to_string()));
        assert_eq!(pairs[1], ("mode".to_string(), "id_res".to_string()));
    }

    #[test]
    fn test_set_ignores_ns_and_mode() {
        let message = positive_assertion()
            .with("ns", "http://attacker.example.com/ns")
            .with("mode", "cancel");
        assert!(message.fields().get("ns").is_none());
        assert!(message.fields().get("mode").is_none());

        let pairs = message.encode();
        assert_eq!(pairs.iter().filter(|(k, _)| k == "ns").count(), 1);
        assert_eq!(pairs.iter().filter(|(k, _)| k == "mode").count(), 1);
        assert_eq!(pairs[1], ("mode".to_string(), "id_res".to_string()));
        assert_eq!(Message::decode(message.kind(), pairs).unwrap(), message);
    }

    #[test]
    fn test_decode_request_discriminates_on_mode() {
        let msg = Message::decode_request(vec![
            ("ns", OPENID2_NS),
            ("mode", "checkid_setup"),
            ("return_to", "https://rp.example.com/"),
        ])
        .unwrap();
        assert_eq!(msg.kind(), MessageKind::CheckIdRequest { immediate: false });
    }

    #[test]
    fn test_decode_request_without_mode_is_malformed() {
        let err = Message::decode_request(vec![("ns", OPENID2_NS)]).unwrap_err();
        assert!(matches!(err, OpenIdError::MalformedMessage(_)));
    }

    #[test]
    fn test_no_coercion_across_kinds() {
        let pairs = positive_assertion().encode();
        let err = Message::decode(MessageKind::CheckAuthenticationRequest, pairs).unwrap_err();
        assert!(err.to_string().contains("Mode mismatch"));
    }

    #[test]
    fn test_missing_required_field() {
        let mut msg = positive_assertion();
        msg.remove(keys::RESPONSE_NONCE);
        let err = Message::decode(MessageKind::PositiveAssertion, msg.encode()).unwrap_err();
        assert!(err.to_string().contains("response_nonce"));
    }

    #[test]
    fn test_unparseable_timestamp_is_malformed() {
        let msg = positive_assertion().with(keys::RESPONSE_NONCE, "yesterday-ish");
        let err = Message::decode(MessageKind::PositiveAssertion, msg.encode()).unwrap_err();
        assert!(matches!(err, OpenIdError::MalformedMessage(_)));
    }

    #[test]
    fn test_expires_in_must_be_integer() {
        let msg = Message::new(ProtocolVersion::V20, MessageKind::AssociateResponse)
            .with(keys::ASSOC_HANDLE, "h")
            .with(keys::ASSOC_TYPE, "HMAC-SHA1")
            .with(keys::SESSION_TYPE, "no-encryption")
            .with(keys::EXPIRES_IN, "two weeks")
            .with(keys::MAC_KEY, "AAAA");
        assert!(Message::decode(MessageKind::AssociateResponse, msg.encode()).is_err());
    }

    #[test]
    fn test_unknown_namespace_rejected() {
        let err = Message::decode_request(vec![
            ("ns", "http://example.com/openid/3"),
            ("mode", "associate"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("namespace"));
    }

    #[test]
    fn test_duplicate_fields_rejected() {
        let err = Message::decode(
            MessageKind::DirectErrorResponse,
            vec![("error", "a"), ("error", "b")],
        )
        .unwrap_err();
        assert!(err.to_string().contains("Duplicate"));
    }

    #[test]
    fn test_claimed_id_requires_identity() {
        let mut msg = positive_assertion();
        msg.remove(keys::IDENTITY);
        assert!(msg.validate().is_err());
    }

    #[test]
    fn test_return_to_must_be_http() {
        let msg = positive_assertion().with(keys::RETURN_TO, "javascript:alert(1)");
        assert!(msg.validate().is_err());
    }

    #[test]
    fn test_check_authentication_request_copies_fields() {
        let assertion = positive_assertion();
        let check = assertion.to_check_authentication_request().unwrap();
        assert_eq!(check.kind(), MessageKind::CheckAuthenticationRequest);
        assert_eq!(check.fields(), assertion.fields());
        assert_eq!(check.mode(), Some("check_authentication"));
    }

    #[test]
    fn test_check_authentication_from_non_assertion_fails() {
        let msg = Message::new(ProtocolVersion::V20, MessageKind::NegativeAssertion { immediate: false });
        assert!(msg.to_check_authentication_request().is_err());
    }

    #[test]
    fn test_extension_round_trip() {
        let mut msg = positive_assertion();
        msg.add_extension(
            "sreg",
            "http://openid.net/extensions/sreg/1.1",
            vec![("email".to_string(), "alice@example.com".to_string())],
        )
        .unwrap();

        let args = msg.extension("http://openid.net/extensions/sreg/1.1").unwrap();
        assert_eq!(args.get("email").map(String::as_str), Some("alice@example.com"));
        assert!(msg.validate_extensions().is_ok());
        assert!(msg.extension("http://example.com/other").is_none());
    }

    #[test]
    fn test_undeclared_extension_alias_rejected() {
        let msg = positive_assertion().with("sreg.email", "alice@example.com");
        assert!(msg.validate_extensions().is_err());
    }

    #[test]
    fn test_extension_alias_cannot_be_rebound() {
        let mut msg = positive_assertion();
        msg.add_extension("ext", "http://example.com/a", Vec::new()).unwrap();
        assert!(msg
            .add_extension("ext", "http://example.com/b", Vec::new())
            .is_err());
    }

    #[test]
    fn test_v11_trust_root_is_realm() {
        let msg = Message::new(ProtocolVersion::V11, MessageKind::CheckIdRequest { immediate: false })
            .with(keys::TRUST_ROOT, "http://*.example.com/");
        assert_eq!(msg.realm(), Some("http://*.example.com/"));
    }
}
