//! Caller-supplied cookie sets and their pool fingerprint.

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::{BrowserError, BrowserResult};

/// Length of the fingerprint prefix that is safe to log and expose.
pub const SHORT_FINGERPRINT_LEN: usize = 12;

#[derive(Debug, Deserialize)]
struct CookieEntry {
    name: String,
    #[serde(default)]
    value: String,
}

/// A set of browser cookies identifying one caller.
///
/// Values are secrets: `Debug` prints cookie names only.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CredentialSet {
    cookies: BTreeMap<String, String>,
}

impl CredentialSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.cookies.insert(name.into(), value.into());
    }

    /// Parse a credential payload.
    ///
    /// Accepts a JSON array of `{name, value}` objects (extra cookie fields
    /// are ignored), a flat JSON object, or a `name=value; name2=value2`
    /// cookie header string.
    pub fn parse(raw: &str) -> BrowserResult<Self> {
        let raw = raw.trim();
        let mut set = Self::new();

        if raw.starts_with('[') {
            let entries: Vec<CookieEntry> = serde_json::from_str(raw)
                .map_err(|e| BrowserError::InvalidCredentials(format!("cookie array: {}", e)))?;
            for entry in entries {
                set.insert(entry.name, entry.value);
            }
        } else if raw.starts_with('{') {
            let map: BTreeMap<String, serde_json::Value> = serde_json::from_str(raw)
                .map_err(|e| BrowserError::InvalidCredentials(format!("cookie map: {}", e)))?;
            for (name, value) in map {
                let value = match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                set.insert(name, value);
            }
        } else {
            for pair in raw.split(';') {
                let Some((name, value)) = pair.split_once('=') else {
                    continue;
                };
                let name = name.trim();
                if !name.is_empty() {
                    set.insert(name, value.trim());
                }
            }
        }

        if set.is_empty() && !raw.is_empty() {
            return Err(BrowserError::InvalidCredentials(
                "no cookies found in credential payload".to_string(),
            ));
        }
        Ok(set)
    }

    /// Parse an `Authorization` header value.
    ///
    /// Returns `Ok(None)` when the header is absent or carries an empty
    /// bearer token, which callers treat as "log in interactively".
    pub fn from_authorization(header: Option<&str>) -> BrowserResult<Option<Self>> {
        let Some(value) = header.map(str::trim).filter(|v| !v.is_empty()) else {
            return Ok(None);
        };
        let token = match value.strip_prefix("Bearer") {
            Some(rest) if rest.is_empty() || rest.starts_with(char::is_whitespace) => rest.trim(),
            _ => {
                return Err(BrowserError::InvalidCredentials(
                    "authorization header must use the Bearer scheme".to_string(),
                ))
            }
        };
        if token.is_empty() {
            return Ok(None);
        }
        Self::parse(token).map(Some)
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.cookies.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// SHA-256 over the cookies sorted by name, each name and value
    /// prefixed with its byte length.
    ///
    /// Two sets fingerprint equal exactly when they hold the same cookies.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for (name, value) in &self.cookies {
            hasher.update((name.len() as u64).to_le_bytes());
            hasher.update(name.as_bytes());
            hasher.update((value.len() as u64).to_le_bytes());
            hasher.update(value.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

impl fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSet")
            .field("names", &self.cookies.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Loggable prefix of a full fingerprint.
pub fn short_fingerprint(fingerprint: &str) -> &str {
    let end = fingerprint.len().min(SHORT_FINGERPRINT_LEN);
    &fingerprint[..end]
}
