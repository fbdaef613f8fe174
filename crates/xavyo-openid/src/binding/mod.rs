//! Binding elements
//!
//! Ordered transforms applied to every message the channel sends or
//! receives. Outgoing messages pass through the elements in order; incoming
//! messages pass through them in reverse, so the signature is checked before
//! freshness and replay.

mod expiration;
mod extensions;
mod replay;
pub mod signing;

pub use expiration::ExpirationElement;
pub use extensions::ExtensionsElement;
pub use replay::ReplayProtectionElement;
pub use signing::SigningElement;

use crate::association::AssociationStore;
use crate::config::SecuritySettings;
use crate::error::OpenIdResult;
use crate::message::Message;
use crate::nonce::NonceStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Stores and policy a binding element may consult.
#[derive(Clone, Copy)]
pub struct BindingContext<'a> {
    pub associations: &'a dyn AssociationStore,
    pub nonces: &'a dyn NonceStore,
    pub settings: &'a SecuritySettings,
    pub now: DateTime<Utc>,
}

/// One transform in the pipeline.
#[async_trait]
pub trait BindingElement: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this element has anything to do with `message`.
    fn applies_to(&self, message: &Message) -> bool;

    async fn prepare_outgoing(
        &self,
        message: &mut Message,
        context: &BindingContext<'_>,
    ) -> OpenIdResult<()>;

    async fn process_incoming(
        &self,
        message: &mut Message,
        context: &BindingContext<'_>,
    ) -> OpenIdResult<()>;
}

/// A linear chain of binding elements.
pub struct BindingPipeline {
    elements: Vec<Box<dyn BindingElement>>,
}

impl Default for BindingPipeline {
    fn default() -> Self {
        Self::standard()
    }
}

impl BindingPipeline {
    /// Extensions, replay protection, expiration, signing.
    #[must_use]
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(ExtensionsElement),
            Box::new(ReplayProtectionElement),
            Box::new(ExpirationElement),
            Box::new(SigningElement),
        ])
    }

    #[must_use]
    pub fn new(elements: Vec<Box<dyn BindingElement>>) -> Self {
        Self { elements }
    }

    #[must_use]
    pub fn element_names(&self) -> Vec<&'static str> {
        self.elements.iter().map(|e| e.name()).collect()
    }

    /// Run every applicable element in order. On failure the message is
    /// dropped; callers never see a partially transformed copy.
    pub async fn prepare_outgoing(
        &self,
        mut message: Message,
        context: &BindingContext<'_>,
    ) -> OpenIdResult<Message> {
        for element in &self.elements {
            if element.applies_to(&message) {
                tracing::debug!(element = element.name(), kind = ?message.kind(), "Outgoing binding");
                element.prepare_outgoing(&mut message, context).await?;
            }
        }
        Ok(message)
    }

    /// Run every applicable element in reverse order.
    pub async fn process_incoming(
        &self,
        mut message: Message,
        context: &BindingContext<'_>,
    ) -> OpenIdResult<Message> {
        for element in self.elements.iter().rev() {
            if element.applies_to(&message) {
                tracing::debug!(element = element.name(), kind = ?message.kind(), "Incoming binding");
                element.process_incoming(&mut message, context).await?;
            }
        }
        Ok(message)
    }
}
