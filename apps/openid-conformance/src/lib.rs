//! OpenID conformance host
//!
//! Serves deliberately misbehaving Provider endpoints that probe how a
//! Relying Party handles association handles it did not negotiate with the
//! asserting Provider.

pub mod config;
pub mod host;
pub mod logging;
pub mod routes;
pub mod state;

pub use config::{Config, ConfigError};
pub use state::AppState;
