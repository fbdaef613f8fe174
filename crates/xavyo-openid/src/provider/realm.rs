//! Realm matching
//!
//! A realm names the URL space a Relying Party claims. Its host may start
//! with `*.` to cover every subdomain.

use crate::error::{OpenIdError, OpenIdResult};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Realm {
    scheme: String,
    wildcard: bool,
    host: String,
    port: Option<u16>,
    path: String,
}

impl Realm {
    pub fn parse(raw: &str) -> OpenIdResult<Self> {
        let wildcard = raw.contains("://*.");
        let url = Url::parse(&raw.replacen("://*.", "://", 1))
            .map_err(|e| OpenIdError::MalformedMessage(format!("Invalid realm '{raw}': {e}")))?;

        if url.fragment().is_some() {
            return Err(OpenIdError::MalformedMessage(format!(
                "Realm '{raw}' must not contain a fragment"
            )));
        }
        if !matches!(url.scheme(), "http" | "https") {
            return Err(OpenIdError::MalformedMessage(format!(
                "Realm '{raw}' must use http or https"
            )));
        }
        let host = url
            .host_str()
            .ok_or_else(|| OpenIdError::MalformedMessage(format!("Realm '{raw}' has no host")))?
            .to_ascii_lowercase();
        if wildcard && !host.contains('.') {
            return Err(OpenIdError::MalformedMessage(format!(
                "Wildcard realm '{raw}' covers a top-level domain"
            )));
        }

        Ok(Self {
            scheme: url.scheme().to_string(),
            wildcard,
            host,
            port: url.port_or_known_default(),
            path: url.path().to_string(),
        })
    }

    /// Whether `return_to` falls inside this realm.
    #[must_use]
    pub fn matches(&self, return_to: &Url) -> bool {
        if return_to.scheme() != self.scheme || return_to.port_or_known_default() != self.port {
            return false;
        }
        let Some(host) = return_to.host_str().map(str::to_ascii_lowercase) else {
            return false;
        };
        let host_ok = if self.wildcard {
            host == self.host || host.ends_with(&format!(".{}", self.host))
        } else {
            host == self.host
        };
        host_ok && path_within(&self.path, return_to.path())
    }
}

fn path_within(realm_path: &str, path: &str) -> bool {
    if realm_path.ends_with('/') {
        return path.starts_with(realm_path);
    }
    path == realm_path
        || path
            .strip_prefix(realm_path)
            .is_some_and(|rest| rest.starts_with('/'))
}
