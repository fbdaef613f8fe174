//! Application configuration loaded from environment variables.
//!
//! Loading is fail-fast: an unparseable value stops startup with a message
//! naming the variable.
//!
//! # Variables
//!
//! - `OPENID_BIND_ADDR` - Listen address (default: "0.0.0.0:8080")
//! - `OPENID_PUBLIC_BASE_URL` - Externally visible base URL (default: "http://localhost:8080")
//! - `OPENID_VICTIM_ENDPOINT` - Endpoint named as `op_endpoint` in every assertion
//!   (default: [`VICTIM_PATH`] under the base URL)
//! - `OPENID_LOG_FILTER` - Log filter directive (default: "info,xavyo_openid=debug")
//! - `OPENID_MAX_MESSAGE_AGE_SECS` - Freshness window for assertions (default: 780)
//! - `OPENID_SMART_ASSOCIATION_LIFETIME_SECS` - Shared association lifetime (default: 1209600)

use chrono::Duration;
use std::env;
use std::net::SocketAddr;
use thiserror::Error;
use url::Url;
use xavyo_openid::{LifetimeBounds, SecuritySettings};

/// Path of the victim Provider endpoint.
pub const VICTIM_PATH: &str = "/rp/association-poisoning-op";

/// Path of the attacker Provider endpoint.
pub const ATTACKER_PATH: &str = "/rp/association-poisoning-op/attacker";

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_PUBLIC_BASE_URL: &str = "http://localhost:8080";
const DEFAULT_LOG_FILTER: &str = "info,xavyo_openid=debug";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub public_base_url: Url,
    pub victim_endpoint: Url,
    pub log_filter: String,
    pub max_message_age: Duration,
    pub smart_association_lifetime: Duration,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_addr = lookup("OPENID_BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| invalid("OPENID_BIND_ADDR", e))?;

        let public_base_url = parse_url(
            "OPENID_PUBLIC_BASE_URL",
            &lookup("OPENID_PUBLIC_BASE_URL").unwrap_or_else(|| DEFAULT_PUBLIC_BASE_URL.to_string()),
        )?;

        let victim_endpoint = match lookup("OPENID_VICTIM_ENDPOINT") {
            Some(raw) => parse_url("OPENID_VICTIM_ENDPOINT", &raw)?,
            None => public_url(&public_base_url, VICTIM_PATH, None),
        };

        let log_filter = lookup("OPENID_LOG_FILTER").unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        let defaults = SecuritySettings::default();
        let bounds = &defaults.association_lifetime_bounds;
        let max_message_age = parse_secs("OPENID_MAX_MESSAGE_AGE_SECS", &lookup)?
            .unwrap_or(defaults.max_message_age);
        // Private associations live exactly as long as messages stay fresh.
        within_bounds("OPENID_MAX_MESSAGE_AGE_SECS", max_message_age, bounds)?;
        let smart_association_lifetime =
            parse_secs("OPENID_SMART_ASSOCIATION_LIFETIME_SECS", &lookup)?
                .unwrap_or(defaults.smart_association_lifetime);
        within_bounds(
            "OPENID_SMART_ASSOCIATION_LIFETIME_SECS",
            smart_association_lifetime,
            bounds,
        )?;

        let config = Self {
            bind_addr,
            public_base_url,
            victim_endpoint,
            log_filter,
            max_message_age,
            smart_association_lifetime,
        };
        config
            .security_settings()
            .validate()
            .map_err(|e| invalid("security settings", e))?;
        Ok(config)
    }

    /// Provider security settings derived from this configuration.
    #[must_use]
    pub fn security_settings(&self) -> SecuritySettings {
        SecuritySettings {
            max_message_age: self.max_message_age,
            private_association_lifetime: self.max_message_age,
            smart_association_lifetime: self.smart_association_lifetime,
            ..SecuritySettings::default()
        }
    }
}

/// `path` (and `query`) appended under the path of `base`.
///
/// Unlike [`Url::join`], a path prefix in `base` is kept, so the host can sit
/// behind a proxy that mounts it below the site root.
#[must_use]
pub fn public_url(base: &Url, path: &str, query: Option<&str>) -> Url {
    let mut url = base.clone();
    let prefix = base.path().trim_end_matches('/');
    url.set_path(&format!("{prefix}{path}"));
    url.set_query(query);
    url.set_fragment(None);
    url
}

fn invalid(var: &str, err: impl std::fmt::Display) -> ConfigError {
    ConfigError::InvalidValue {
        var: var.to_string(),
        message: err.to_string(),
    }
}

fn parse_url(var: &str, raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| invalid(var, e))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(var, "must be an http or https URL"));
    }
    Ok(url)
}

fn within_bounds(var: &str, value: Duration, bounds: &LifetimeBounds) -> Result<(), ConfigError> {
    if value < bounds.minimum || value > bounds.maximum {
        return Err(invalid(
            var,
            format!(
                "{}s is outside the association lifetime bounds [{}s, {}s]",
                value.num_seconds(),
                bounds.minimum.num_seconds(),
                bounds.maximum.num_seconds()
            ),
        ));
    }
    Ok(())
}

fn parse_secs<F>(var: &str, lookup: &F) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    let secs: i64 = raw.trim().parse().map_err(|e| invalid(var, e))?;
    if secs <= 0 {
        return Err(invalid(var, "must be a positive number of seconds"));
    }
    Ok(Some(Duration::seconds(secs)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(
            config.victim_endpoint.as_str(),
            "http://localhost:8080/rp/association-poisoning-op"
        );
        assert_eq!(config.max_message_age, Duration::minutes(13));
        assert_eq!(config.smart_association_lifetime, Duration::days(14));
    }

    #[test]
    fn test_victim_endpoint_override() {
        let config = load(&[
            ("OPENID_PUBLIC_BASE_URL", "https://test-id.example.org"),
            ("OPENID_VICTIM_ENDPOINT", "http://victim.example.org/op"),
        ])
        .unwrap();
        assert_eq!(config.victim_endpoint.as_str(), "http://victim.example.org/op");
    }

    #[test]
    fn test_victim_endpoint_keeps_base_path() {
        let config = load(&[("OPENID_PUBLIC_BASE_URL", "https://test-id.example.org/openid/")]).unwrap();
        assert_eq!(
            config.victim_endpoint.as_str(),
            "https://test-id.example.org/openid/rp/association-poisoning-op"
        );
    }

    #[test]
    fn test_public_url_appends_path_and_query() {
        let base = Url::parse("http://localhost:8080/prefix").unwrap();
        assert_eq!(
            public_url(&base, "/rp/association-poisoning", Some("test=1")).as_str(),
            "http://localhost:8080/prefix/rp/association-poisoning?test=1"
        );
        let root = Url::parse("http://localhost:8080").unwrap();
        assert_eq!(
            public_url(&root, "/health", None).as_str(),
            "http://localhost:8080/health"
        );
    }

    #[test]
    fn test_invalid_values_name_the_variable() {
        let err = load(&[("OPENID_BIND_ADDR", "not-an-addr")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref var, .. } if var == "OPENID_BIND_ADDR"));

        let err = load(&[("OPENID_MAX_MESSAGE_AGE_SECS", "-5")]).unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidValue { ref var, .. } if var == "OPENID_MAX_MESSAGE_AGE_SECS")
        );

        let err = load(&[("OPENID_PUBLIC_BASE_URL", "ftp://example.org")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_lifetime_errors_name_the_failing_variable() {
        let err = load(&[("OPENID_SMART_ASSOCIATION_LIFETIME_SECS", "30")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref var, .. } if var == "OPENID_SMART_ASSOCIATION_LIFETIME_SECS"
        ));

        let err = load(&[("OPENID_SMART_ASSOCIATION_LIFETIME_SECS", "2592000")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref var, .. } if var == "OPENID_SMART_ASSOCIATION_LIFETIME_SECS"
        ));

        let err = load(&[("OPENID_MAX_MESSAGE_AGE_SECS", "2592000")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref var, .. } if var == "OPENID_MAX_MESSAGE_AGE_SECS"
        ));
    }

    #[test]
    fn test_security_settings_follow_message_age() {
        let config = load(&[("OPENID_MAX_MESSAGE_AGE_SECS", "300")]).unwrap();
        let settings = config.security_settings();
        assert_eq!(settings.max_message_age, Duration::minutes(5));
        assert_eq!(settings.private_association_lifetime, Duration::minutes(5));
        assert!(settings.validate().is_ok());
    }
}
