//! Language-model extractor backed by the OpenAI chat-completions API.
//!
//! Any failure (transport, status, malformed JSON, invalid fields) yields
//! `None` so the pattern extractor can take over.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::domain::entities::order::OrderSide;
use crate::domain::entities::signal::SignalIntent;
use crate::domain::services::signal_extractor::Extractor;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

const CACHE_SIZE: usize = 512;

const INSTRUCTION: &str = "You extract stock trading signals from social media posts. \
Return only a JSON object of the form \
{\"ticker\": \"AAPL\", \"side\": \"BUY|SELL\", \"confidence\": 0.0, \"timeframe\": null, \"stop\": null, \"take\": null} \
where ticker is a US stock ticker, confidence is between 0 and 1, and timeframe, stop and take are optional. \
If the post contains no trading signal, return null.";

#[derive(Clone)]
pub struct OpenAiConfig {
    pub api_key: Zeroizing<String>,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl OpenAiConfig {
    pub fn new(api_key: Zeroizing<String>) -> Self {
        Self {
            api_key,
            model: DEFAULT_OPENAI_MODEL.to_string(),
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            timeout: Duration::from_secs(15),
        }
    }
}

/// Raw model output before validation.
#[derive(Debug, Deserialize)]
struct ExtractedSignal {
    ticker: Option<String>,
    side: Option<String>,
    confidence: Option<f64>,
    timeframe: Option<String>,
    stop: Option<f64>,
    take: Option<f64>,
}

pub struct OpenAiExtractor {
    config: OpenAiConfig,
    http_client: reqwest::Client,
    cache: Mutex<LruCache<String, Option<SignalIntent>>>,
}

impl OpenAiExtractor {
    pub fn new(config: OpenAiConfig) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        let cache_size = NonZeroUsize::new(CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);

        Ok(Self {
            config,
            http_client,
            cache: Mutex::new(LruCache::new(cache_size)),
        })
    }

    fn cache_key(&self, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.config.model.as_bytes());
        hasher.update(text.as_bytes());
        hex::encode(hasher.finalize())
    }

    async fn complete(&self, text: &str) -> Option<String> {
        let request_body = json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": INSTRUCTION },
                { "role": "user", "content": text }
            ],
            "temperature": 0
        });

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let response = match self
            .http_client
            .post(&url)
            .bearer_auth(self.config.api_key.as_str())
            .json(&request_body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("LLM request failed: {}", e);
                return None;
            }
        };

        if !response.status().is_success() {
            warn!("LLM returned status {}", response.status());
            return None;
        }

        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(e) => {
                warn!("LLM response was not JSON: {}", e);
                return None;
            }
        };

        body["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
    }
}

#[async_trait]
impl Extractor for OpenAiExtractor {
    fn name(&self) -> &str {
        "openai"
    }

    async fn extract(&self, text: &str) -> Option<SignalIntent> {
        let key = self.cache_key(text);
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(cached) = cache.get(&key) {
                debug!("LLM cache hit");
                return cached.clone();
            }
        }

        let content = self.complete(text).await?;
        let intent = parse_completion(&content);
        debug!("LLM extraction: {:?}", intent);

        if let Ok(mut cache) = self.cache.lock() {
            cache.put(key, intent.clone());
        }
        intent
    }
}

/// Remove a surrounding Markdown code fence, with or without a language tag.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_suffix("```").unwrap_or(inner);
    match inner.find('\n') {
        Some(newline) if !inner[..newline].trim_start().starts_with('{') => inner[newline + 1..].trim(),
        _ => inner.trim(),
    }
}

/// Validate the model's JSON answer into an intent.
pub fn parse_completion(content: &str) -> Option<SignalIntent> {
    let body = strip_code_fence(content);
    if body.is_empty() || body.eq_ignore_ascii_case("null") {
        return None;
    }

    let raw: ExtractedSignal = serde_json::from_str(body).ok()?;

    let ticker = raw.ticker?.trim().trim_start_matches('$').to_uppercase();
    if ticker.is_empty() {
        return None;
    }
    let side: OrderSide = raw.side?.parse().ok()?;

    if let Some(confidence) = raw.confidence {
        if !(0.0..=1.0).contains(&confidence) {
            return None;
        }
    }

    let mut intent = SignalIntent::new(&ticker, side);
    intent.confidence = raw.confidence;
    intent.timeframe = raw.timeframe.filter(|t| !t.trim().is_empty());
    intent.stop = raw.stop;
    intent.take = raw.take;
    Some(intent)
}
