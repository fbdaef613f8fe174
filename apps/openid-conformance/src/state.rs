//! Shared application state

use crate::config::Config;
use std::sync::Arc;
use url::Url;
use xavyo_openid::{ProviderStoreRegistry, SecuritySettings};

/// State handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    /// One association and nonce store per public endpoint URL
    pub registry: Arc<ProviderStoreRegistry>,
    pub settings: SecuritySettings,
    pub public_base_url: Url,
    pub victim_endpoint: Url,
}

impl AppState {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let settings = config.security_settings();
        Self {
            registry: Arc::new(ProviderStoreRegistry::new(settings.clone())),
            settings,
            public_base_url: config.public_base_url.clone(),
            victim_endpoint: config.victim_endpoint.clone(),
        }
    }
}
