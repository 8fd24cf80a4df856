//! Deduplicator - has this message already been ingested?
//!
//! Keys are matched exactly against the message id, alternate id and source
//! URL columns of stored signals. URLs are normalized before comparison, and
//! there is no substring matching on content. The storage-level UNIQUE
//! constraint on `message_id` closes the race between this check and the insert.

use sha2::{Digest, Sha256};
use tracing::debug;
use url::Url;

use crate::domain::entities::signal::RawMessage;
use crate::persistence::repository::SignalRepository;
use crate::persistence::DatabaseError;

/// Idempotency keys derived from one message, in priority order.
#[derive(Debug, Clone, PartialEq)]
pub struct DedupKeys {
    /// Stored as `signals.message_id`
    pub primary: String,
    /// Remaining candidates (meta `id`, normalized url)
    pub candidates: Vec<String>,
    pub alt_id: Option<String>,
    pub url: Option<String>,
}

impl DedupKeys {
    /// Candidate keys from meta `message_id`, `id`, `url`, in that order.
    /// With none present, the key is `source` + SHA-256 of the text.
    pub fn from_message(message: &RawMessage) -> Self {
        let message_id = message.meta_str("message_id");
        let alt_id = message.meta_str("id");
        let url = message.url().map(|u| normalize_url(&u));

        let mut candidates: Vec<String> = [message_id, alt_id.clone(), url.clone()]
            .into_iter()
            .flatten()
            .collect();
        candidates.dedup();

        let primary = if candidates.is_empty() {
            synthetic_key(&message.source, &message.text)
        } else {
            candidates.remove(0)
        };

        Self {
            primary,
            candidates,
            alt_id,
            url,
        }
    }

    pub fn all(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.primary.as_str()).chain(self.candidates.iter().map(|s| s.as_str()))
    }
}

/// `source` + hex SHA-256 of `text`
pub fn synthetic_key(source: &str, text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    format!("{}:{}", source, hex::encode(digest))
}

/// Lower-case scheme and host, drop the fragment and any trailing slash.
/// Unparseable input is only trimmed.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    match Url::parse(trimmed) {
        Ok(mut url) => {
            url.set_fragment(None);
            let mut s = url.to_string();
            while s.ends_with('/') {
                s.pop();
            }
            s
        }
        Err(_) => trimmed.to_string(),
    }
}

#[derive(Clone)]
pub struct Deduplicator {
    signals: SignalRepository,
}

impl Deduplicator {
    pub fn new(signals: SignalRepository) -> Self {
        Self { signals }
    }

    /// True when any non-empty key, or the normalized `url`, is already bound
    /// to a stored signal.
    pub async fn is_duplicate(
        &self,
        candidate_keys: &[&str],
        url: Option<&str>,
    ) -> Result<bool, DatabaseError> {
        for key in candidate_keys.iter().filter(|k| !k.trim().is_empty()) {
            if let Some(existing) = self.signals.find_by_key(key).await? {
                debug!("Duplicate key {} (signal {})", key, existing.id);
                return Ok(true);
            }
        }

        if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
            let normalized = normalize_url(url);
            if let Some(existing) = self.signals.find_by_key(&normalized).await? {
                debug!("Duplicate url {} (signal {})", normalized, existing.id);
                return Ok(true);
            }
        }

        Ok(false)
    }

    pub async fn is_duplicate_message(&self, keys: &DedupKeys) -> Result<bool, DatabaseError> {
        let all: Vec<&str> = keys.all().collect();
        self.is_duplicate(&all, keys.url.as_deref()).await
    }
}
