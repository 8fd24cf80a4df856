//! Background feed poller.
//!
//! Runs in its own process (`signal_poller`). Each cycle it re-reads the
//! shared credential file, fetches new items from a [`SourceFeed`], drops
//! items already delivered or without an obvious signal, and POSTs the rest
//! to the ingestion endpoint.

use std::future::Future;
use std::num::NonZeroUsize;
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};

use crate::application::services::credential_store::{CredentialPair, CredentialStore};
use crate::config::PollerSettings;
use crate::domain::services::signal_extractor::PatternExtractor;

const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);
const SEEN_CAPACITY: usize = 10_000;
const FAILURES_BEFORE_CREDENTIAL_RELOAD: u32 = 3;
const MAX_BACKOFF: Duration = Duration::from_secs(300);

#[derive(Debug, thiserror::Error)]
pub enum PollerError {
    #[error("Feed error: {0}")]
    Feed(String),

    #[error("Publish error: {0}")]
    Publish(String),
}

/// One item from a feed, with everything but the text kept as `meta`.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedItem {
    pub id: String,
    pub text: String,
    pub meta: Map<String, Value>,
}

impl FeedItem {
    /// `None` for objects without an id or a non-empty text.
    pub fn from_value(value: Value) -> Option<Self> {
        let Value::Object(mut meta) = value else {
            return None;
        };
        let id = match meta.get("id")? {
            Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        let text = match meta.remove("text")? {
            Value::String(s) if !s.trim().is_empty() => s,
            _ => return None,
        };
        Some(Self { id, text, meta })
    }
}

/// Source of raw posts.
#[async_trait]
pub trait SourceFeed: Send + Sync {
    /// Rebuild any session state after a credential change.
    async fn reset_session(&mut self, credentials: Option<&CredentialPair>);

    async fn fetch(&self) -> Result<Vec<FeedItem>, PollerError>;
}

/// Feed backed by a JSON endpoint returning `[{id, text, username, url}]`.
/// Credentials, when present, are sent as cookies.
pub struct HttpJsonFeed {
    client: reqwest::Client,
    url: String,
    credentials: Option<CredentialPair>,
}

impl HttpJsonFeed {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, PollerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PollerError::Feed(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.to_string(),
            credentials: None,
        })
    }
}

#[async_trait]
impl SourceFeed for HttpJsonFeed {
    async fn reset_session(&mut self, credentials: Option<&CredentialPair>) {
        self.credentials = credentials.cloned();
    }

    async fn fetch(&self) -> Result<Vec<FeedItem>, PollerError> {
        let mut request = self.client.get(&self.url);
        if let Some(creds) = &self.credentials {
            request = request
                .header(
                    "Cookie",
                    format!("auth_token={}; ct0={}", creds.auth_token, creds.ct0),
                )
                .header("x-csrf-token", creds.ct0.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| PollerError::Feed(format!("Request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(PollerError::Feed(format!(
                "Feed returned {}",
                response.status()
            )));
        }

        let items: Vec<Value> = response
            .json()
            .await
            .map_err(|e| PollerError::Feed(format!("Invalid feed body: {}", e)))?;
        Ok(items.into_iter().filter_map(FeedItem::from_value).collect())
    }
}

/// Capped exponential backoff
#[derive(Debug)]
struct Backoff {
    initial: Duration,
    current: Duration,
    max: Duration,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            current: initial,
            max,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = std::cmp::min(self.current * 2, self.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub fetched: usize,
    pub skipped_seen: usize,
    pub skipped_no_signal: usize,
    pub published: usize,
    pub publish_failed: usize,
}

pub struct Poller {
    settings: PollerSettings,
    api_key: Option<String>,
    feed: Box<dyn SourceFeed>,
    credentials: CredentialStore,
    client: reqwest::Client,
    seen: LruCache<String, ()>,
    prefilter: PatternExtractor,
    session_version: Option<String>,
    session_started: bool,
    consecutive_failures: u32,
    backoff: Backoff,
}

impl Poller {
    pub fn new(
        settings: PollerSettings,
        api_key: Option<String>,
        feed: Box<dyn SourceFeed>,
        credentials: CredentialStore,
    ) -> Result<Self, PollerError> {
        let client = reqwest::Client::builder()
            .timeout(PUBLISH_TIMEOUT)
            .build()
            .map_err(|e| PollerError::Publish(format!("Failed to create HTTP client: {}", e)))?;
        let interval = Duration::from_secs(settings.interval_secs.max(1));
        let seen_capacity = NonZeroUsize::new(SEEN_CAPACITY).unwrap_or(NonZeroUsize::MIN);

        Ok(Self {
            settings,
            api_key,
            feed,
            credentials,
            client,
            seen: LruCache::new(seen_capacity),
            prefilter: PatternExtractor::new(),
            session_version: None,
            session_started: false,
            consecutive_failures: 0,
            backoff: Backoff::new(interval, std::cmp::max(interval, MAX_BACKOFF)),
        })
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.settings.interval_secs.max(1))
    }

    /// Re-read the credential file and rebuild the feed session on change.
    async fn sync_credentials(&mut self, force: bool) {
        if let Err(e) = self.credentials.reload_from_disk().await {
            warn!("Credential reload failed: {}", e);
        }

        let version = self.credentials.version().await;
        if force || !self.session_started || version != self.session_version {
            let current = self.credentials.current().await;
            self.feed.reset_session(current.as_ref()).await;
            info!(
                "Feed session (re)built with credentials version {}",
                version.as_deref().unwrap_or("none")
            );
            self.session_version = version;
            self.session_started = true;
        }
    }

    async fn publish(&self, item: &FeedItem) -> Result<(), PollerError> {
        let url = format!("{}/signals", self.settings.api_base_url.trim_end_matches('/'));
        let body = json!({
            "text": item.text,
            "source": self.settings.source,
            "meta": item.meta,
        });

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PollerError::Publish(e.to_string()))?;

        // 422 means the API found no signal; the item is still delivered.
        let status = response.status();
        if status.is_success() || status == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
            Ok(())
        } else {
            Err(PollerError::Publish(format!("API returned {}", status)))
        }
    }

    /// One fetch-and-publish cycle. Only a feed failure is an error; publish
    /// failures leave the item unseen so the next cycle retries it.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, PollerError> {
        self.sync_credentials(false).await;

        let items = self.feed.fetch().await?;
        let mut report = CycleReport {
            fetched: items.len(),
            ..CycleReport::default()
        };

        for item in items {
            if self.seen.contains(&item.id) {
                report.skipped_seen += 1;
                continue;
            }
            if self.prefilter.parse(&item.text).is_none() {
                self.seen.put(item.id.clone(), ());
                report.skipped_no_signal += 1;
                continue;
            }

            match self.publish(&item).await {
                Ok(()) => {
                    info!("-> posted {} to API", item.id);
                    self.seen.put(item.id.clone(), ());
                    report.published += 1;
                }
                Err(e) => {
                    warn!("API post failed for {}: {}", item.id, e);
                    report.publish_failed += 1;
                }
            }
        }

        debug!("Poll cycle: {:?}", report);
        Ok(report)
    }

    /// Record a cycle outcome and return how long to sleep.
    async fn after_cycle(&mut self, outcome: &Result<CycleReport, PollerError>) -> Duration {
        match outcome {
            Ok(_) => {
                self.consecutive_failures = 0;
                self.backoff.reset();
                self.interval()
            }
            Err(e) => {
                self.consecutive_failures += 1;
                error!(
                    "Poll cycle failed ({} in a row): {}",
                    self.consecutive_failures, e
                );
                if self.consecutive_failures % FAILURES_BEFORE_CREDENTIAL_RELOAD == 0 {
                    warn!("Re-reading credentials after repeated failures");
                    self.sync_credentials(true).await;
                }
                self.backoff.next_delay()
            }
        }
    }

    /// Poll until `shutdown` resolves.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) {
        info!(
            "✓ Poller started (every {}s, posting to {})",
            self.settings.interval_secs, self.settings.api_base_url
        );
        tokio::pin!(shutdown);

        loop {
            let outcome = self.run_cycle().await;
            let delay = self.after_cycle(&outcome).await;

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = &mut shutdown => {
                    info!("Poller stopping");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct ScriptedFeed {
        items: Arc<Mutex<Vec<Value>>>,
        fail: Arc<Mutex<bool>>,
        resets: Arc<Mutex<Vec<Option<String>>>>,
    }

    #[async_trait]
    impl SourceFeed for ScriptedFeed {
        async fn reset_session(&mut self, credentials: Option<&CredentialPair>) {
            self.resets
                .lock()
                .unwrap()
                .push(credentials.map(|c| c.version()));
        }

        async fn fetch(&self) -> Result<Vec<FeedItem>, PollerError> {
            if *self.fail.lock().unwrap() {
                return Err(PollerError::Feed("boom".to_string()));
            }
            Ok(self
                .items
                .lock()
                .unwrap()
                .iter()
                .cloned()
                .filter_map(FeedItem::from_value)
                .collect())
        }
    }

    async fn poller(feed: ScriptedFeed, name: &str) -> Poller {
        let path = std::env::temp_dir().join(format!(
            "signal_trader_poller_{}_{}.json",
            name,
            std::process::id()
        ));
        let _ = tokio::fs::remove_file(&path).await;
        let settings = PollerSettings {
            interval_secs: 1,
            // Nothing listens here; every publish fails fast
            api_base_url: "http://127.0.0.1:9".to_string(),
            feed_url: None,
            source: "twitter".to_string(),
        };
        Poller::new(settings, None, Box::new(feed), CredentialStore::load(path).await).unwrap()
    }

    #[test]
    fn test_feed_item_parsing() {
        let item = FeedItem::from_value(json!({
            "id": 123, "text": "$AAPL BUY", "username": "trader", "url": "https://x.com/1"
        }))
        .unwrap();
        assert_eq!(item.id, "123");
        assert_eq!(item.text, "$AAPL BUY");
        assert_eq!(item.meta["username"], "trader");
        assert!(!item.meta.contains_key("text"));

        assert!(FeedItem::from_value(json!({"id": "1", "text": "  "})).is_none());
        assert!(FeedItem::from_value(json!({"text": "no id"})).is_none());
        assert!(FeedItem::from_value(json!("not an object")).is_none());
    }

    #[test]
    fn test_backoff_is_capped() {
        let mut backoff = Backoff::new(Duration::from_secs(10), Duration::from_secs(35));
        assert_eq!(backoff.next_delay(), Duration::from_secs(10));
        assert_eq!(backoff.next_delay(), Duration::from_secs(20));
        assert_eq!(backoff.next_delay(), Duration::from_secs(35));
        assert_eq!(backoff.next_delay(), Duration::from_secs(35));
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_prefilter_and_failed_publish_retry() {
        let feed = ScriptedFeed::default();
        *feed.items.lock().unwrap() = vec![
            json!({"id": "1", "text": "good morning everyone"}),
            json!({"id": "2", "text": "$TSLA SELL now"}),
        ];
        let mut poller = poller(feed.clone(), "prefilter").await;

        let report = poller.run_cycle().await.unwrap();
        assert_eq!(report.fetched, 2);
        assert_eq!(report.skipped_no_signal, 1);
        assert_eq!(report.publish_failed, 1);

        // The undelivered item is retried, the filtered one is not
        let report = poller.run_cycle().await.unwrap();
        assert_eq!(report.skipped_seen, 1);
        assert_eq!(report.publish_failed, 1);
    }

    #[tokio::test]
    async fn test_session_rebuilt_on_credential_change_and_after_failures() {
        let feed = ScriptedFeed::default();
        let mut poller = poller(feed.clone(), "session").await;

        poller.run_cycle().await.unwrap();
        assert_eq!(feed.resets.lock().unwrap().len(), 1);

        // Unchanged credentials do not rebuild
        poller.run_cycle().await.unwrap();
        assert_eq!(feed.resets.lock().unwrap().len(), 1);

        // Rotation written by another process is picked up
        let writer = CredentialStore::load(poller.credentials.path().to_path_buf()).await;
        let pair = CredentialPair::new("rotated-token", "rotated-ct0").unwrap();
        writer.refresh(pair.clone()).await.unwrap();
        poller.run_cycle().await.unwrap();
        assert_eq!(
            feed.resets.lock().unwrap().last().cloned().flatten(),
            Some(pair.version())
        );

        // Three consecutive failures force a rebuild
        *feed.fail.lock().unwrap() = true;
        let before = feed.resets.lock().unwrap().len();
        for _ in 0..3 {
            let outcome = poller.run_cycle().await;
            assert!(outcome.is_err());
            poller.after_cycle(&outcome).await;
        }
        assert_eq!(feed.resets.lock().unwrap().len(), before + 1);

        let _ = tokio::fs::remove_file(poller.credentials.path()).await;
    }
}
