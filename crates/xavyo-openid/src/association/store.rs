//! Association storage
//!
//! Associations are keyed by handle. Expired entries are treated as absent
//! by `lookup` and removed by `sweep`.

use super::AssociationError;
use crate::config::LifetimeBounds;
use crate::message::AssociationType;
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use zeroize::Zeroizing;

/// Random bytes per handle (192 bits)
const HANDLE_ENTROPY_BYTES: usize = 24;
const MAX_HANDLE_ATTEMPTS: usize = 3;

/// Who holds the association secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelyingPartyType {
    /// The Relying Party negotiated the association and verifies signatures itself
    Smart,
    /// Private to the Provider; the Relying Party verifies via check_authentication
    Dumb,
}

/// A shared signing secret.
#[derive(Clone)]
pub struct Association {
    pub handle: String,
    secret: Zeroizing<Vec<u8>>,
    pub association_type: AssociationType,
    pub issued: DateTime<Utc>,
    pub lifetime: Duration,
    pub relying_party_type: RelyingPartyType,
}

impl std::fmt::Debug for Association {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Association")
            .field("handle", &self.handle)
            .field("secret", &"[REDACTED]")
            .field("association_type", &self.association_type)
            .field("issued", &self.issued)
            .field("lifetime", &self.lifetime)
            .field("relying_party_type", &self.relying_party_type)
            .finish()
    }
}

impl Association {
    #[must_use]
    pub fn new(
        handle: impl Into<String>,
        secret: Zeroizing<Vec<u8>>,
        association_type: AssociationType,
        issued: DateTime<Utc>,
        lifetime: Duration,
        relying_party_type: RelyingPartyType,
    ) -> Self {
        Self {
            handle: handle.into(),
            secret,
            association_type,
            issued,
            lifetime,
            relying_party_type,
        }
    }

    #[must_use]
    pub fn secret(&self) -> &[u8] {
        &self.secret
    }

    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.issued + self.lifetime
    }

    /// Unusable once `now > issued + lifetime`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at()
    }

    /// Whole seconds left, for `expires_in`.
    #[must_use]
    pub fn seconds_remaining(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at() - now).num_seconds().max(0)
    }
}

/// Generate an unguessable association handle, safe in a URL query.
#[must_use]
pub fn generate_handle() -> String {
    let mut bytes = [0u8; HANDLE_ENTROPY_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Association store trait
#[async_trait]
pub trait AssociationStore: Send + Sync {
    /// Insert an association. Fails if the handle is already taken.
    async fn store(&self, association: Association) -> Result<(), AssociationError>;

    /// Resolve a handle. Expired and never-issued handles both yield `None`.
    async fn lookup(
        &self,
        handle: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Association>, AssociationError>;

    /// Remove an association, returning whether it existed.
    async fn remove(&self, handle: &str) -> Result<bool, AssociationError>;

    /// Remove expired associations
    ///
    /// Returns the number of associations deleted
    async fn sweep(&self, now: DateTime<Utc>) -> Result<u64, AssociationError>;

    /// Re-key `association` under `new_handle`, replacing any entry already there.
    ///
    /// Only attack-simulation hosts need a known handle.
    #[cfg(feature = "handle-override")]
    async fn override_handle(
        &self,
        association: &Association,
        new_handle: &str,
    ) -> Result<Association, AssociationError>;

    /// Create and store an association with a fresh random handle.
    ///
    /// `requested_lifetime` is clamped to `bounds`.
    async fn create(
        &self,
        relying_party_type: RelyingPartyType,
        association_type: AssociationType,
        secret: Zeroizing<Vec<u8>>,
        requested_lifetime: Duration,
        bounds: &LifetimeBounds,
        now: DateTime<Utc>,
    ) -> Result<Association, AssociationError> {
        let lifetime = bounds.clamp(requested_lifetime);
        for _ in 0..MAX_HANDLE_ATTEMPTS {
            let association = Association::new(
                generate_handle(),
                secret.clone(),
                association_type,
                now,
                lifetime,
                relying_party_type,
            );
            match self.store(association.clone()).await {
                Ok(()) => {
                    tracing::info!(
                        association_type = %association_type,
                        relying_party_type = ?relying_party_type,
                        lifetime_secs = lifetime.num_seconds(),
                        "Association created"
                    );
                    return Ok(association);
                }
                Err(AssociationError::DuplicateHandle(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(AssociationError::StorageError(
            "Could not allocate a unique association handle".to_string(),
        ))
    }
}

/// In-memory association store
#[derive(Debug, Default, Clone)]
pub struct InMemoryAssociationStore {
    associations: Arc<RwLock<HashMap<String, Association>>>,
}

impl InMemoryAssociationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored associations, expired ones included.
    pub async fn len(&self) -> usize {
        self.associations.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl AssociationStore for InMemoryAssociationStore {
    async fn store(&self, association: Association) -> Result<(), AssociationError> {
        let mut associations = self.associations.write().await;
        if associations.contains_key(&association.handle) {
            return Err(AssociationError::DuplicateHandle(association.handle));
        }
        associations.insert(association.handle.clone(), association);
        Ok(())
    }

    async fn lookup(
        &self,
        handle: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Association>, AssociationError> {
        let associations = self.associations.read().await;
        Ok(associations
            .get(handle)
            .filter(|a| !a.is_expired_at(now))
            .cloned())
    }

    async fn remove(&self, handle: &str) -> Result<bool, AssociationError> {
        let mut associations = self.associations.write().await;
        Ok(associations.remove(handle).is_some())
    }

    async fn sweep(&self, now: DateTime<Utc>) -> Result<u64, AssociationError> {
        let mut associations = self.associations.write().await;
        let before_count = associations.len();

        associations.retain(|_, a| !a.is_expired_at(now));

        let deleted = (before_count - associations.len()) as u64;
        if deleted > 0 {
            tracing::debug!(deleted = deleted, "Swept expired associations");
        }
        Ok(deleted)
    }

    #[cfg(feature = "handle-override")]
    async fn override_handle(
        &self,
        association: &Association,
        new_handle: &str,
    ) -> Result<Association, AssociationError> {
        let mut associations = self.associations.write().await;
        let mut rekeyed = associations
            .remove(&association.handle)
            .ok_or_else(|| AssociationError::NotFound(association.handle.clone()))?;
        rekeyed.handle = new_handle.to_string();
        if associations
            .insert(new_handle.to_string(), rekeyed.clone())
            .is_some()
        {
            tracing::warn!(handle = %new_handle, "Overridden handle replaced an existing association");
        }
        Ok(rekeyed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 17, 12, 0, 0).unwrap()
    }

    fn secret() -> Zeroizing<Vec<u8>> {
        Zeroizing::new(vec![42u8; 32])
    }

    async fn create(store: &InMemoryAssociationStore, lifetime: Duration) -> Association {
        store
            .create(
                RelyingPartyType::Smart,
                AssociationType::HmacSha256,
                secret(),
                lifetime,
                &LifetimeBounds::default(),
                now(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_lookup_within_lifetime_and_absent_after() {
        let store = InMemoryAssociationStore::new();
        let lifetime = Duration::hours(1);
        let assoc = create(&store, lifetime).await;
        let eps = Duration::seconds(1);

        assert!(store
            .lookup(&assoc.handle, now() + lifetime - eps)
            .await
            .unwrap()
            .is_some());
        assert!(store
            .lookup(&assoc.handle, now() + lifetime + eps)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_unknown_and_expired_look_the_same() {
        let store = InMemoryAssociationStore::new();
        let assoc = create(&store, Duration::minutes(5)).await;
        let later = now() + Duration::hours(1);

        let expired = store.lookup(&assoc.handle, later).await.unwrap();
        let unknown = store.lookup("never-issued", later).await.unwrap();
        assert!(expired.is_none());
        assert!(unknown.is_none());
    }

    #[tokio::test]
    async fn test_create_clamps_lifetime() {
        let store = InMemoryAssociationStore::new();
        let short = create(&store, Duration::seconds(1)).await;
        let long = create(&store, Duration::days(400)).await;
        assert_eq!(short.lifetime, Duration::minutes(1));
        assert_eq!(long.lifetime, Duration::days(14));
    }

    #[tokio::test]
    async fn test_handles_are_unique_and_query_safe() {
        let store = InMemoryAssociationStore::new();
        let a = create(&store, Duration::hours(1)).await;
        let b = create(&store, Duration::hours(1)).await;
        assert_ne!(a.handle, b.handle);
        assert!(a
            .handle
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert!(a.handle.len() >= 32);
    }

    #[tokio::test]
    async fn test_duplicate_store_rejected() {
        let store = InMemoryAssociationStore::new();
        let assoc = create(&store, Duration::hours(1)).await;
        let err = store.store(assoc).await.unwrap_err();
        assert!(matches!(err, AssociationError::DuplicateHandle(_)));
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let store = InMemoryAssociationStore::new();
        create(&store, Duration::minutes(2)).await;
        let keep = create(&store, Duration::hours(2)).await;

        let deleted = store.sweep(now() + Duration::hours(1)).await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.len().await, 1);
        assert!(store.lookup(&keep.handle, now()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_remove() {
        let store = InMemoryAssociationStore::new();
        let assoc = create(&store, Duration::hours(1)).await;
        assert!(store.remove(&assoc.handle).await.unwrap());
        assert!(!store.remove(&assoc.handle).await.unwrap());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let assoc = Association::new(
            "h",
            Zeroizing::new(vec![0xAB; 20]),
            AssociationType::HmacSha1,
            now(),
            Duration::hours(1),
            RelyingPartyType::Dumb,
        );
        let debug = format!("{assoc:?}");
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("171"));
    }

    #[cfg(feature = "handle-override")]
    #[tokio::test]
    async fn test_override_handle_rekeys_entry() {
        let store = InMemoryAssociationStore::new();
        let assoc = create(&store, Duration::hours(1)).await;

        let rekeyed = store.override_handle(&assoc, "POISONHANDLE").await.unwrap();
        assert_eq!(rekeyed.handle, "POISONHANDLE");
        assert!(store.lookup(&assoc.handle, now()).await.unwrap().is_none());
        let found = store.lookup("POISONHANDLE", now()).await.unwrap().unwrap();
        assert_eq!(found.secret(), assoc.secret());
    }

    #[cfg(feature = "handle-override")]
    #[tokio::test]
    async fn test_override_handle_replaces_previous_holder() {
        let store = InMemoryAssociationStore::new();
        let first = create(&store, Duration::hours(1)).await;
        let second = create(&store, Duration::hours(1)).await;
        store.override_handle(&first, "FIXED").await.unwrap();
        store.override_handle(&second, "FIXED").await.unwrap();
        assert_eq!(store.len().await, 1);
    }
}
