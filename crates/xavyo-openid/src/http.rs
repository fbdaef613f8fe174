//! Host-normalized HTTP request and response
//!
//! The hosting layer converts its framework types to [`HttpRequestInfo`]
//! and writes [`OutgoingResponse`] back to the wire.

use http::{header, HeaderMap, Method, StatusCode};
use url::Url;

/// Redirects longer than this are delivered as an auto-submitting form.
pub const MAX_REDIRECT_URL_LENGTH: usize = 2048;

const FORWARDED_PROTO: &str = "x-forwarded-proto";

/// An incoming request as seen by the hosting layer.
#[derive(Debug, Clone)]
pub struct HttpRequestInfo {
    pub method: Method,
    /// Absolute URL as received on the socket
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpRequestInfo {
    #[must_use]
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: header::HeaderName, value: &str) -> Self {
        if let Ok(value) = header::HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
        self
    }

    #[must_use]
    pub fn with_form_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        self.body = body.into();
        self
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The URL the client actually used, rebuilt from `X-Forwarded-Proto`
    /// and `Host` when a proxy rewrote the request.
    ///
    /// Falls back to the literal URL if the headers do not form a valid one.
    #[must_use]
    pub fn public_facing_url(&self) -> Url {
        let scheme = self
            .header(FORWARDED_PROTO)
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_ascii_lowercase())
            .filter(|v| v == "http" || v == "https")
            .unwrap_or_else(|| self.url.scheme().to_string());

        let authority = match self.header(header::HOST.as_str()) {
            Some(host) if !host.trim().is_empty() => host.trim().to_string(),
            _ => match (self.url.host_str(), self.url.port()) {
                (Some(host), Some(port)) => format!("{}:{port}", bracket_ipv6(host)),
                (Some(host), None) => bracket_ipv6(host),
                (None, _) => return self.url.clone(),
            },
        };

        let mut rebuilt = format!("{scheme}://{authority}{}", self.url.path());
        if let Some(query) = self.url.query() {
            rebuilt.push('?');
            rebuilt.push_str(query);
        }

        match Url::parse(&rebuilt) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(error = %e, "Forwarding headers do not form a valid URL");
                self.url.clone()
            }
        }
    }

    /// Whether the client reached the public endpoint over HTTPS.
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.public_facing_url().scheme() == "https"
    }

    #[must_use]
    pub fn is_form_post(&self) -> bool {
        self.method == Method::POST
            && self
                .header(header::CONTENT_TYPE.as_str())
                .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"))
    }
}

fn bracket_ipv6(host: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]")
    } else {
        host.to_string()
    }
}

/// What the hosting layer writes back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingResponse {
    /// Key-value form body answering a direct request
    Direct { status: StatusCode, body: String },
    /// Browser redirect carrying an indirect message
    Redirect { location: Url },
    /// Auto-submitting form for indirect messages too long to redirect
    FormPost {
        action: Url,
        parameters: Vec<(String, String)>,
    },
}

impl OutgoingResponse {
    /// Deliver an indirect message to `recipient`, keeping its existing query.
    #[must_use]
    pub fn indirect(recipient: &Url, parameters: Vec<(String, String)>) -> Self {
        let mut location = recipient.clone();
        location
            .query_pairs_mut()
            .extend_pairs(parameters.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        if location.as_str().len() > MAX_REDIRECT_URL_LENGTH {
            OutgoingResponse::FormPost {
                action: recipient.clone(),
                parameters,
            }
        } else {
            OutgoingResponse::Redirect { location }
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            OutgoingResponse::Direct { status, .. } => *status,
            OutgoingResponse::Redirect { .. } => StatusCode::FOUND,
            OutgoingResponse::FormPost { .. } => StatusCode::OK,
        }
    }

    /// Headers the hosting layer should set.
    #[must_use]
    pub fn headers(&self) -> Vec<(header::HeaderName, String)> {
        let mut headers = vec![(header::CACHE_CONTROL, "no-cache, no-store".to_string())];
        match self {
            OutgoingResponse::Direct { .. } => {
                headers.push((header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()));
            }
            OutgoingResponse::Redirect { location } => {
                headers.push((header::LOCATION, location.to_string()));
            }
            OutgoingResponse::FormPost { .. } => {
                headers.push((header::CONTENT_TYPE, "text/html; charset=utf-8".to_string()));
            }
        }
        headers
    }

    /// Response body: the KV form, empty for redirects, HTML for form posts.
    #[must_use]
    pub fn body(&self) -> String {
        match self {
            OutgoingResponse::Direct { body, .. } => body.clone(),
            OutgoingResponse::Redirect { .. } => String::new(),
            OutgoingResponse::FormPost { action, parameters } => {
                auto_submit_form(action, parameters)
            }
        }
    }
}

fn auto_submit_form(action: &Url, parameters: &[(String, String)]) -> String {
    let inputs: String = parameters
        .iter()
        .map(|(name, value)| {
            format!(
                r#"        <input type="hidden" name="{}" value="{}"/>
"#,
                html_escape(name),
                html_escape(value)
            )
        })
        .collect();

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>OpenID</title>
</head>
<body onload="document.forms[0].submit()">
    <noscript>
        <p>JavaScript is disabled. Click the button below to continue.</p>
    </noscript>
    <form method="POST" action="{}">
{}        <noscript>
            <input type="submit" value="Continue"/>
        </noscript>
    </form>
</body>
</html>"#,
        html_escape(action.as_str()),
        inputs
    )
}

/// HTML escape for XSS prevention
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}
