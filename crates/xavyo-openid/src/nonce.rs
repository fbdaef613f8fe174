//! Replay protection
//!
//! Response nonces are a UTC timestamp followed by a unique suffix. The
//! nonce store records every (origin, token) pair it accepts until the
//! timestamp falls out of the freshness window.

use crate::config::SecuritySettings;
use crate::error::{OpenIdError, OpenIdResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";
const TIMESTAMP_LEN: usize = 20;
const UNIQUE_LEN: usize = 8;
const MAX_NONCE_LEN: usize = 255;

/// Errors from the nonce store
#[derive(Debug, Clone, Error)]
pub enum NonceError {
    #[error("Nonce {token} from {origin} was already used")]
    Replay { origin: String, token: String },

    #[error("Timestamp {timestamp} is outside the accepted window [{window_start}, {window_end}]")]
    Expired {
        timestamp: DateTime<Utc>,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    },

    #[error("Storage error: {0}")]
    StorageError(String),
}

/// Check that `timestamp` lies within `[now - max_age, now + max_skew]`.
pub fn check_freshness(
    timestamp: DateTime<Utc>,
    now: DateTime<Utc>,
    max_age: Duration,
    max_skew: Duration,
) -> Result<(), NonceError> {
    let window_start = now - max_age;
    let window_end = now + max_skew;
    if timestamp < window_start || timestamp > window_end {
        return Err(NonceError::Expired {
            timestamp,
            window_start,
            window_end,
        });
    }
    Ok(())
}

/// Replay-detection ledger.
#[async_trait]
pub trait NonceStore: Send + Sync {
    /// Check the timestamp window, then record the nonce.
    ///
    /// The lookup and the insert are a single atomic step: of two concurrent
    /// calls with the same (origin, token), exactly one is accepted.
    async fn check_and_record(
        &self,
        origin: &str,
        token: &str,
        timestamp: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), NonceError>;

    /// Drop records whose timestamp is older than the maximum message age.
    ///
    /// Returns the number of records removed
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, NonceError>;
}

#[derive(Debug, Default)]
struct NonceLedger {
    records: HashMap<(String, String), DateTime<Utc>>,
    last_purge: Option<DateTime<Utc>>,
}

impl NonceLedger {
    fn purge(&mut self, now: DateTime<Utc>, max_age: Duration) -> u64 {
        let before = self.records.len();
        self.records.retain(|_, timestamp| *timestamp + max_age >= now);
        self.last_purge = Some(now);
        (before - self.records.len()) as u64
    }
}

/// In-memory nonce store.
///
/// Purges lazily: a write that finds the last purge older than the
/// maximum message age sweeps the ledger first.
#[derive(Debug, Clone)]
pub struct InMemoryNonceStore {
    ledger: Arc<RwLock<NonceLedger>>,
    max_age: Duration,
    max_skew: Duration,
}

impl InMemoryNonceStore {
    #[must_use]
    pub fn new(max_age: Duration, max_skew: Duration) -> Self {
        Self {
            ledger: Arc::new(RwLock::new(NonceLedger::default())),
            max_age,
            max_skew,
        }
    }

    #[must_use]
    pub fn from_settings(settings: &SecuritySettings) -> Self {
        Self::new(settings.max_message_age, settings.max_clock_skew)
    }

    /// Number of records currently held.
    pub async fn len(&self) -> usize {
        self.ledger.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InMemoryNonceStore {
    fn default() -> Self {
        Self::from_settings(&SecuritySettings::default())
    }
}

#[async_trait]
impl NonceStore for InMemoryNonceStore {
    async fn check_and_record(
        &self,
        origin: &str,
        token: &str,
        timestamp: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), NonceError> {
        // Window first, so an expired record awaiting purge can never be replayed.
        check_freshness(timestamp, now, self.max_age, self.max_skew)?;

        let mut ledger = self.ledger.write().await;
        let due = ledger
            .last_purge
            .map_or(true, |last| now - last > self.max_age);
        if due {
            let purged = ledger.purge(now, self.max_age);
            if purged > 0 {
                tracing::debug!(purged = purged, "Purged expired nonces");
            }
        }

        let key = (origin.to_string(), token.to_string());
        if ledger.records.contains_key(&key) {
            tracing::warn!(origin = %origin, "Replayed nonce rejected");
            return Err(NonceError::Replay {
                origin: origin.to_string(),
                token: token.to_string(),
            });
        }
        ledger.records.insert(key, timestamp);
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, NonceError> {
        let mut ledger = self.ledger.write().await;
        Ok(ledger.purge(now, self.max_age))
    }
}

/// A `response_nonce` value: timestamp plus unique suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseNonce {
    pub timestamp: DateTime<Utc>,
    pub unique: String,
}

impl ResponseNonce {
    /// Generate a nonce stamped with `now` (truncated to whole seconds).
    #[must_use]
    pub fn generate(now: DateTime<Utc>) -> Self {
        let timestamp = DateTime::<Utc>::from_timestamp(now.timestamp(), 0).unwrap_or(now);
        let unique = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(UNIQUE_LEN)
            .map(char::from)
            .collect();
        Self { timestamp, unique }
    }

    pub fn parse(raw: &str) -> OpenIdResult<Self> {
        if raw.len() > MAX_NONCE_LEN {
            return Err(OpenIdError::MalformedMessage(format!(
                "response_nonce exceeds {MAX_NONCE_LEN} characters"
            )));
        }
        let stamp = raw.get(..TIMESTAMP_LEN).ok_or_else(|| {
            OpenIdError::MalformedMessage("response_nonce has no timestamp".to_string())
        })?;
        let timestamp = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT)
            .map_err(|e| {
                OpenIdError::MalformedMessage(format!("response_nonce timestamp '{stamp}': {e}"))
            })?
            .and_utc();

        let unique = &raw[TIMESTAMP_LEN..];
        if !unique.bytes().all(|b| (33..=126).contains(&b)) {
            return Err(OpenIdError::MalformedMessage(
                "response_nonce contains non-printable characters".to_string(),
            ));
        }
        Ok(Self {
            timestamp,
            unique: unique.to_string(),
        })
    }
}

impl Display for ResponseNonce {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.timestamp.format(TIMESTAMP_FORMAT), self.unique)
    }
}
