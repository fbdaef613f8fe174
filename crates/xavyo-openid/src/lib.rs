//! OpenID 2.0 Provider protocol engine for xavyo
//!
//! This crate provides the Provider side of OpenID Authentication 1.1/2.0:
//! - Typed protocol messages with key-value form and query/form encodings
//! - Association negotiation (plaintext and Diffie-Hellman sessions)
//! - HMAC signing, response nonces and replay protection
//! - A binding pipeline and channel between HTTP and messages
//! - Per-endpoint association and nonce stores
//! - Request dispatch with host-supplied identity decisions

pub mod association;
pub mod binding;
pub mod channel;
pub mod config;
pub mod error;
pub mod http;
pub mod message;
pub mod nonce;
pub mod provider;
pub mod store;

pub use association::{
    Association, AssociationError, AssociationStore, InMemoryAssociationStore, RelyingPartyType,
};
pub use binding::{BindingContext, BindingElement, BindingPipeline};
pub use channel::Channel;
pub use config::{LifetimeBounds, SecuritySettings};
pub use error::{OpenIdError, OpenIdResult};
pub use http::{HttpRequestInfo, OutgoingResponse};
pub use message::{AssociationType, Message, MessageKind, ProtocolVersion, SessionType};
pub use nonce::{InMemoryNonceStore, NonceError, NonceStore, ResponseNonce};
pub use provider::{
    AuthenticationChallenge, AuthenticationDecision, AuthenticationHost, OpenIdProvider,
    ProviderOutcome, ProviderState,
};
pub use store::{ProviderApplicationStore, ProviderStoreRegistry};
