//! Message freshness binding element

use super::{BindingContext, BindingElement};
use crate::error::OpenIdResult;
use crate::message::{keys, Message, MessageKind};
use crate::nonce::{check_freshness, ResponseNonce};
use async_trait::async_trait;

/// Rejects assertions whose `response_nonce` timestamp lies outside
/// `[now - max_message_age, now + max_clock_skew]`.
pub struct ExpirationElement;

impl ExpirationElement {
    fn check(message: &Message, context: &BindingContext<'_>) -> OpenIdResult<()> {
        let nonce = ResponseNonce::parse(message.require(keys::RESPONSE_NONCE)?)?;
        check_freshness(
            nonce.timestamp,
            context.now,
            context.settings.max_message_age,
            context.settings.max_clock_skew,
        )?;
        Ok(())
    }
}

#[async_trait]
impl BindingElement for ExpirationElement {
    fn name(&self) -> &'static str {
        "expiration"
    }

    fn applies_to(&self, message: &Message) -> bool {
        message.kind() == MessageKind::PositiveAssertion && message.contains(keys::RESPONSE_NONCE)
    }

    async fn prepare_outgoing(
        &self,
        message: &mut Message,
        context: &BindingContext<'_>,
    ) -> OpenIdResult<()> {
        Self::check(message, context)
    }

    async fn process_incoming(
        &self,
        message: &mut Message,
        context: &BindingContext<'_>,
    ) -> OpenIdResult<()> {
        Self::check(message, context)
    }
}
