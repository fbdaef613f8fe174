//! Per-endpoint Provider state
//!
//! Each logical Provider endpoint owns one association store and one nonce
//! store. The registry hands out the pair for an endpoint, creating it on
//! first use, so endpoints hosted in one process never share secrets.

use crate::association::{AssociationStore, InMemoryAssociationStore};
use crate::binding::BindingContext;
use crate::config::SecuritySettings;
use crate::nonce::{InMemoryNonceStore, NonceStore};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use url::Url;

/// Association and nonce storage of one Provider endpoint.
#[derive(Clone)]
pub struct ProviderApplicationStore {
    pub associations: Arc<dyn AssociationStore>,
    pub nonces: Arc<dyn NonceStore>,
}

impl ProviderApplicationStore {
    #[must_use]
    pub fn new(associations: Arc<dyn AssociationStore>, nonces: Arc<dyn NonceStore>) -> Self {
        Self {
            associations,
            nonces,
        }
    }

    #[must_use]
    pub fn in_memory(settings: &SecuritySettings) -> Self {
        Self::new(
            Arc::new(InMemoryAssociationStore::new()),
            Arc::new(InMemoryNonceStore::from_settings(settings)),
        )
    }

    #[must_use]
    pub fn binding_context<'a>(
        &'a self,
        settings: &'a SecuritySettings,
        now: DateTime<Utc>,
    ) -> BindingContext<'a> {
        BindingContext {
            associations: self.associations.as_ref(),
            nonces: self.nonces.as_ref(),
            settings,
            now,
        }
    }
}

/// `url` without query or fragment.
#[must_use]
pub fn canonical_url(url: &Url) -> Url {
    let mut canonical = url.clone();
    canonical.set_query(None);
    canonical.set_fragment(None);
    canonical
}

/// The identity of an endpoint: its canonical URL as a string.
#[must_use]
pub fn canonical_endpoint(url: &Url) -> String {
    canonical_url(url).into()
}

/// Lazily created stores, one per canonical endpoint URL.
pub struct ProviderStoreRegistry {
    stores: DashMap<String, ProviderApplicationStore>,
    settings: SecuritySettings,
}

impl ProviderStoreRegistry {
    #[must_use]
    pub fn new(settings: SecuritySettings) -> Self {
        Self {
            stores: DashMap::new(),
            settings,
        }
    }

    /// The store for `endpoint`, created on first use.
    #[must_use]
    pub fn store_for(&self, endpoint: &Url) -> ProviderApplicationStore {
        let key = canonical_endpoint(endpoint);
        self.stores
            .entry(key)
            .or_insert_with(|| {
                tracing::info!(endpoint = %canonical_endpoint(endpoint), "Provider store created");
                ProviderApplicationStore::in_memory(&self.settings)
            })
            .clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stores.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    /// Sweep expired associations and nonces in every store.
    pub async fn sweep(&self, now: DateTime<Utc>) -> u64 {
        let stores: Vec<ProviderApplicationStore> =
            self.stores.iter().map(|entry| entry.value().clone()).collect();
        let mut removed = 0;
        for store in stores {
            match store.associations.sweep(now).await {
                Ok(n) => removed += n,
                Err(e) => tracing::warn!(error = %e, "Association sweep failed"),
            }
            match store.nonces.purge_expired(now).await {
                Ok(n) => removed += n,
                Err(e) => tracing::warn!(error = %e, "Nonce purge failed"),
            }
        }
        removed
    }
}
