//! Key-value form encoding
//!
//! `key:value\n` lines, the body format of direct responses.

use crate::error::{OpenIdError, OpenIdResult};

/// Maximum accepted size of a key-value form document (64 KB)
const MAX_KVFORM_SIZE: usize = 64 * 1024;

/// Encode ordered pairs as a key-value form document.
pub fn encode<K, V>(pairs: &[(K, V)]) -> OpenIdResult<String>
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut out = String::new();
    for (key, value) in pairs {
        let (key, value) = (key.as_ref(), value.as_ref());
        if key.is_empty() || key.contains(':') || key.contains('\n') {
            return Err(OpenIdError::MalformedMessage(format!(
                "Key-value form key '{}' contains a reserved character",
                key.escape_default()
            )));
        }
        if value.contains('\n') {
            return Err(OpenIdError::MalformedMessage(format!(
                "Key-value form value for '{key}' contains a newline"
            )));
        }
        out.push_str(key);
        out.push(':');
        out.push_str(value);
        out.push('\n');
    }
    Ok(out)
}

/// Decode a key-value form document into ordered pairs.
pub fn decode(body: &str) -> OpenIdResult<Vec<(String, String)>> {
    if body.len() > MAX_KVFORM_SIZE {
        return Err(OpenIdError::MalformedMessage(format!(
            "Key-value form exceeds maximum size ({} > {MAX_KVFORM_SIZE} bytes)",
            body.len()
        )));
    }

    let mut pairs = Vec::new();
    for (index, line) in body.split('\n').enumerate() {
        if line.is_empty() {
            continue;
        }
        let (key, value) = line.split_once(':').ok_or_else(|| {
            OpenIdError::MalformedMessage(format!(
                "Key-value form line {} has no ':' separator",
                index + 1
            ))
        })?;
        if key.is_empty() {
            return Err(OpenIdError::MalformedMessage(format!(
                "Key-value form line {} has an empty key",
                index + 1
            )));
        }
        pairs.push((key.to_string(), value.to_string()));
    }
    Ok(pairs)
}
