use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::order::OrderSide;

/// Structured trade intent extracted from one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalIntent {
    pub ticker: String,
    pub side: OrderSide,
    pub confidence: Option<f64>,
    pub timeframe: Option<String>,
    pub stop: Option<f64>,
    pub take: Option<f64>,
}

impl SignalIntent {
    pub fn new(ticker: &str, side: OrderSide) -> Self {
        Self {
            ticker: ticker.to_uppercase(),
            side,
            confidence: None,
            timeframe: None,
            stop: None,
            take: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// Raw `{text, source, meta}` tuple pushed by a collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMessage {
    pub text: String,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default)]
    pub meta: Map<String, Value>,
}

fn default_source() -> String {
    "unknown".to_string()
}

impl RawMessage {
    pub fn new(text: &str, source: &str) -> Self {
        Self {
            text: text.to_string(),
            source: source.to_string(),
            meta: Map::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.meta.insert(key.to_string(), value.into());
        self
    }

    /// Non-empty string form of a meta value. Numbers are rendered, so a
    /// numeric tweet id still works as a key.
    pub fn meta_str(&self, key: &str) -> Option<String> {
        match self.meta.get(key)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Author attribution: username, then author, then user, then source.
    pub fn author(&self) -> String {
        ["username", "author", "user"]
            .iter()
            .find_map(|key| self.meta_str(key))
            .unwrap_or_else(|| self.source.clone())
    }

    /// Channel id coerced to an integer, 0 when missing or invalid.
    pub fn channel_id(&self) -> i64 {
        match self.meta.get("channel_id") {
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .unwrap_or(0),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
            _ => 0,
        }
    }

    pub fn url(&self) -> Option<String> {
        self.meta_str("url")
    }

    /// Text as stored: the source URL is appended when the text lacks it.
    pub fn stored_content(&self) -> String {
        match self.url() {
            Some(url) if !self.text.contains(&url) => format!("{}\n{}", self.text, url),
            _ => self.text.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_author_fallback_chain() {
        let msg = RawMessage::new("x", "discord").with_meta("author", "bob");
        assert_eq!(msg.author(), "bob");

        let msg = msg.with_meta("username", "alice");
        assert_eq!(msg.author(), "alice");

        let bare = RawMessage::new("x", "discord");
        assert_eq!(bare.author(), "discord");
    }

    #[test]
    fn test_channel_id_coercion() {
        let msg = RawMessage::new("x", "s").with_meta("channel_id", "42");
        assert_eq!(msg.channel_id(), 42);

        let msg = RawMessage::new("x", "s").with_meta("channel_id", json!(7));
        assert_eq!(msg.channel_id(), 7);

        let msg = RawMessage::new("x", "s").with_meta("channel_id", "general");
        assert_eq!(msg.channel_id(), 0);

        assert_eq!(RawMessage::new("x", "s").channel_id(), 0);
    }

    #[test]
    fn test_url_appended_once() {
        let msg = RawMessage::new("$AAPL BUY", "twitter").with_meta("url", "https://x.com/1");
        assert_eq!(msg.stored_content(), "$AAPL BUY\nhttps://x.com/1");

        let msg = RawMessage::new("$AAPL BUY https://x.com/1", "twitter")
            .with_meta("url", "https://x.com/1");
        assert_eq!(msg.stored_content(), "$AAPL BUY https://x.com/1");
    }

    #[test]
    fn test_meta_str_renders_numbers_and_skips_blank() {
        let msg = RawMessage::new("x", "s")
            .with_meta("id", json!(123))
            .with_meta("message_id", "  ");
        assert_eq!(msg.meta_str("id").as_deref(), Some("123"));
        assert_eq!(msg.meta_str("message_id"), None);
    }

    #[test]
    fn test_raw_message_defaults() {
        let msg: RawMessage = serde_json::from_str(r#"{"text":"hi"}"#).unwrap();
        assert_eq!(msg.source, "unknown");
        assert!(msg.meta.is_empty());
    }
}
