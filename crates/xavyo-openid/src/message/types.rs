//! Association and session type identifiers

use crate::error::{OpenIdError, OpenIdResult};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// MAC algorithm of an association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssociationType {
    HmacSha1,
    HmacSha256,
}

impl AssociationType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AssociationType::HmacSha1 => "HMAC-SHA1",
            AssociationType::HmacSha256 => "HMAC-SHA256",
        }
    }

    pub fn parse(value: &str) -> OpenIdResult<Self> {
        match value {
            "HMAC-SHA1" => Ok(AssociationType::HmacSha1),
            "HMAC-SHA256" => Ok(AssociationType::HmacSha256),
            other => Err(OpenIdError::MalformedMessage(format!(
                "Unsupported assoc_type '{other}'"
            ))),
        }
    }

    /// Length in bytes of the MAC key.
    #[must_use]
    pub fn secret_len(&self) -> usize {
        match self {
            AssociationType::HmacSha1 => 20,
            AssociationType::HmacSha256 => 32,
        }
    }

    #[must_use]
    pub fn hash_bits(&self) -> usize {
        self.secret_len() * 8
    }
}

impl Display for AssociationType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the MAC key is transferred during association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionType {
    NoEncryption,
    DhSha1,
    DhSha256,
}

impl SessionType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::NoEncryption => "no-encryption",
            SessionType::DhSha1 => "DH-SHA1",
            SessionType::DhSha256 => "DH-SHA256",
        }
    }

    /// Parse a `session_type` value. 1.1 Relying Parties send an empty value
    /// for the plaintext session.
    pub fn parse(value: &str) -> OpenIdResult<Self> {
        match value {
            "no-encryption" | "" => Ok(SessionType::NoEncryption),
            "DH-SHA1" => Ok(SessionType::DhSha1),
            "DH-SHA256" => Ok(SessionType::DhSha256),
            other => Err(OpenIdError::MalformedMessage(format!(
                "Unsupported session_type '{other}'"
            ))),
        }
    }

    #[must_use]
    pub fn is_diffie_hellman(&self) -> bool {
        !matches!(self, SessionType::NoEncryption)
    }

    /// DH sessions must mask a key of exactly their hash length.
    #[must_use]
    pub fn is_compatible_with(&self, association_type: AssociationType) -> bool {
        match self {
            SessionType::NoEncryption => true,
            SessionType::DhSha1 => association_type == AssociationType::HmacSha1,
            SessionType::DhSha256 => association_type == AssociationType::HmacSha256,
        }
    }
}

impl Display for SessionType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_association_type_secret_lengths() {
        assert_eq!(AssociationType::HmacSha1.secret_len(), 20);
        assert_eq!(AssociationType::HmacSha256.secret_len(), 32);
        assert_eq!(AssociationType::HmacSha256.hash_bits(), 256);
    }

    #[test]
    fn test_parse_rejects_unknown_types() {
        assert!(AssociationType::parse("HMAC-MD5").is_err());
        assert!(SessionType::parse("DH-SHA512").is_err());
    }

    #[test]
    fn test_blank_session_type_is_plaintext() {
        assert_eq!(SessionType::parse("").unwrap(), SessionType::NoEncryption);
    }

    #[test]
    fn test_session_association_pairing() {
        assert!(SessionType::DhSha256.is_compatible_with(AssociationType::HmacSha256));
        assert!(!SessionType::DhSha256.is_compatible_with(AssociationType::HmacSha1));
        assert!(!SessionType::DhSha1.is_compatible_with(AssociationType::HmacSha256));
        assert!(SessionType::NoEncryption.is_compatible_with(AssociationType::HmacSha1));
    }
}
