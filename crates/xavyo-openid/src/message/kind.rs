//! Message kinds and transport classification

use super::ProtocolVersion;
use serde::{Deserialize, Serialize};

/// How a message travels between the parties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transport {
    /// Back-channel POST with a key-value form response
    Direct,
    /// Browser redirect (or auto-submitted form) carrying fields in the request
    Indirect,
}

/// Discriminator for every protocol message the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    AssociateRequest,
    AssociateResponse,
    AssociateUnsuccessfulResponse,
    CheckIdRequest { immediate: bool },
    PositiveAssertion,
    NegativeAssertion { immediate: bool },
    CheckAuthenticationRequest,
    CheckAuthenticationResponse,
    DirectErrorResponse,
}

impl MessageKind {
    /// The `mode` value carried on the wire, if the kind has one.
    ///
    /// Direct responses carry no mode. A 1.1 immediate negative assertion is
    /// an `id_res` with a `user_setup_url`.
    #[must_use]
    pub fn mode(&self, version: ProtocolVersion) -> Option<&'static str> {
        match self {
            MessageKind::AssociateRequest => Some("associate"),
            MessageKind::CheckIdRequest { immediate: false } => Some("checkid_setup"),
            MessageKind::CheckIdRequest { immediate: true } => Some("checkid_immediate"),
            MessageKind::PositiveAssertion => Some("id_res"),
            MessageKind::NegativeAssertion { immediate: false } => Some("cancel"),
            MessageKind::NegativeAssertion { immediate: true } => match version {
                ProtocolVersion::V11 => Some("id_res"),
                ProtocolVersion::V20 => Some("setup_needed"),
            },
            MessageKind::CheckAuthenticationRequest => Some("check_authentication"),
            MessageKind::AssociateResponse
            | MessageKind::AssociateUnsuccessfulResponse
            | MessageKind::CheckAuthenticationResponse
            | MessageKind::DirectErrorResponse => None,
        }
    }

    /// Resolve the kind of an incoming request-side message from its mode.
    ///
    /// `has_user_setup_url` disambiguates the 1.1 immediate negative assertion.
    #[must_use]
    pub fn from_mode(mode: &str, version: ProtocolVersion, has_user_setup_url: bool) -> Option<Self> {
        match mode {
            "associate" => Some(MessageKind::AssociateRequest),
            "checkid_setup" => Some(MessageKind::CheckIdRequest { immediate: false }),
            "checkid_immediate" => Some(MessageKind::CheckIdRequest { immediate: true }),
            "id_res" if version == ProtocolVersion::V11 && has_user_setup_url => {
                Some(MessageKind::NegativeAssertion { immediate: true })
            }
            "id_res" => Some(MessageKind::PositiveAssertion),
            "cancel" => Some(MessageKind::NegativeAssertion { immediate: false }),
            "setup_needed" if version == ProtocolVersion::V20 => {
                Some(MessageKind::NegativeAssertion { immediate: true })
            }
            "check_authentication" => Some(MessageKind::CheckAuthenticationRequest),
            _ => None,
        }
    }

    #[must_use]
    pub fn transport(&self) -> Transport {
        match self {
            MessageKind::CheckIdRequest { .. }
            | MessageKind::PositiveAssertion
            | MessageKind::NegativeAssertion { .. } => Transport::Indirect,
            MessageKind::AssociateRequest
            | MessageKind::AssociateResponse
            | MessageKind::AssociateUnsuccessfulResponse
            | MessageKind::CheckAuthenticationRequest
            | MessageKind::CheckAuthenticationResponse
            | MessageKind::DirectErrorResponse => Transport::Direct,
        }
    }

    /// Whether the kind is a response written back over the direct channel.
    #[must_use]
    pub fn is_direct_response(&self) -> bool {
        matches!(
            self,
            MessageKind::AssociateResponse
                | MessageKind::AssociateUnsuccessfulResponse
                | MessageKind::CheckAuthenticationResponse
                | MessageKind::DirectErrorResponse
        )
    }
}
