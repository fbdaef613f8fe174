//! Replay protection binding element

use super::{BindingContext, BindingElement};
use crate::error::OpenIdResult;
use crate::message::{keys, Message, MessageKind, ProtocolVersion};
use crate::nonce::ResponseNonce;
use async_trait::async_trait;

/// Stamps `response_nonce` on outgoing 2.0 assertions and records it on receipt.
///
/// The nonce origin is the asserting Provider's `op_endpoint`.
pub struct ReplayProtectionElement;

#[async_trait]
impl BindingElement for ReplayProtectionElement {
    fn name(&self) -> &'static str {
        "replay_protection"
    }

    fn applies_to(&self, message: &Message) -> bool {
        message.kind() == MessageKind::PositiveAssertion
            && message.version() == ProtocolVersion::V20
    }

    async fn prepare_outgoing(
        &self,
        message: &mut Message,
        context: &BindingContext<'_>,
    ) -> OpenIdResult<()> {
        message.set(
            keys::RESPONSE_NONCE,
            ResponseNonce::generate(context.now).to_string(),
        );
        Ok(())
    }

    async fn process_incoming(
        &self,
        message: &mut Message,
        context: &BindingContext<'_>,
    ) -> OpenIdResult<()> {
        let raw = message.require(keys::RESPONSE_NONCE)?;
        let nonce = ResponseNonce::parse(raw)?;
        let origin = message.require(keys::OP_ENDPOINT)?;
        context
            .nonces
            .check_and_record(origin, raw, nonce.timestamp, context.now)
            .await?;
        Ok(())
    }
}
