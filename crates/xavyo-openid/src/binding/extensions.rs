//! Extension passthrough

use super::{BindingContext, BindingElement};
use crate::error::OpenIdResult;
use crate::message::{Message, ProtocolVersion};
use async_trait::async_trait;

/// Extension arguments ride along unchanged; this element only checks that
/// every dotted field belongs to a declared `ns.<alias>`.
pub struct ExtensionsElement;

#[async_trait]
impl BindingElement for ExtensionsElement {
    fn name(&self) -> &'static str {
        "extensions"
    }

    fn applies_to(&self, message: &Message) -> bool {
        message.version() == ProtocolVersion::V20
    }

    async fn prepare_outgoing(
        &self,
        message: &mut Message,
        _context: &BindingContext<'_>,
    ) -> OpenIdResult<()> {
        message.validate_extensions()
    }

    async fn process_incoming(
        &self,
        message: &mut Message,
        _context: &BindingContext<'_>,
    ) -> OpenIdResult<()> {
        message.validate_extensions()
    }
}
