//! Associations: shared signing secrets and how they are negotiated

pub mod dh;
mod negotiator;
mod store;

pub use dh::{DhKeyPair, DhParameters, KeyExchangeError};
pub use negotiator::{
    negotiate, preferred_types, NegotiatedAssociation, NegotiationOutcome, RelyingPartyExchange,
};
pub use store::{
    generate_handle, Association, AssociationStore, InMemoryAssociationStore, RelyingPartyType,
};

use thiserror::Error;

/// Errors from association storage
#[derive(Debug, Clone, Error)]
pub enum AssociationError {
    #[error("Association not found: {0}")]
    NotFound(String),

    #[error("Association handle already in use: {0}")]
    DuplicateHandle(String),

    #[error("Storage error: {0}")]
    StorageError(String),
}
