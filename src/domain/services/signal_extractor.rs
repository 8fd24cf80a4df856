//! SignalExtractor - raw text to structured trade intent
//!
//! Strategies are tried in order and the first `Some` wins. The usual chain is
//! a language-model extractor followed by the deterministic pattern matcher.
//! A strategy never errors: transport or parse failures are `None`.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::debug;

use crate::domain::entities::order::OrderSide;
use crate::domain::entities::signal::SignalIntent;

/// One extraction strategy
#[async_trait]
pub trait Extractor: Send + Sync {
    fn name(&self) -> &str;

    async fn extract(&self, text: &str) -> Option<SignalIntent>;
}

// `$AAPL` style tickers are preferred
static CASHTAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$([A-Z]{1,6})").unwrap());
static SIDE_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(BUY|LONG|SELL|SHORT)\b").unwrap());
// Bare ticker followed somewhere later by a side keyword
static BARE_TICKER_THEN_SIDE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Z]{2,5})\b.*?(?i:(BUY|LONG|SELL|SHORT))").unwrap());

/// LONG/BUY -> BUY, SHORT/SELL -> SELL
fn side_from_keyword(keyword: &str) -> Option<OrderSide> {
    keyword.parse().ok()
}

/// Deterministic regex extractor. Confidence is always unset.
#[derive(Debug, Default, Clone, Copy)]
pub struct PatternExtractor;

impl PatternExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, text: &str) -> Option<SignalIntent> {
        if let (Some(ticker), Some(side)) = (CASHTAG.captures(text), SIDE_WORD.captures(text)) {
            let side = side_from_keyword(&side[1])?;
            return Some(SignalIntent::new(&ticker[1], side));
        }

        let caps = BARE_TICKER_THEN_SIDE.captures(text)?;
        let side = side_from_keyword(&caps[2])?;
        Some(SignalIntent::new(&caps[1], side))
    }
}

#[async_trait]
impl Extractor for PatternExtractor {
    fn name(&self) -> &str {
        "pattern"
    }

    async fn extract(&self, text: &str) -> Option<SignalIntent> {
        self.parse(text)
    }
}

/// Ordered chain of strategies
#[derive(Clone)]
pub struct SignalExtractor {
    strategies: Vec<Arc<dyn Extractor>>,
}

impl SignalExtractor {
    /// `primary` (typically the LLM extractor) first, pattern fallback last.
    pub fn new(primary: Option<Arc<dyn Extractor>>) -> Self {
        let mut strategies: Vec<Arc<dyn Extractor>> = Vec::new();
        if let Some(primary) = primary {
            strategies.push(primary);
        }
        strategies.push(Arc::new(PatternExtractor::new()));
        Self { strategies }
    }

    pub fn pattern_only() -> Self {
        Self::new(None)
    }

    pub async fn extract(&self, text: &str) -> Option<SignalIntent> {
        for strategy in &self.strategies {
            if let Some(intent) = strategy.extract(text).await {
                debug!(
                    "{} extractor: {} {} (confidence {:?})",
                    strategy.name(),
                    intent.side,
                    intent.ticker,
                    intent.confidence
                );
                return Some(intent);
            }
            debug!("{} extractor found nothing", strategy.name());
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedExtractor(Option<SignalIntent>);

    #[async_trait]
    impl Extractor for FixedExtractor {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn extract(&self, _text: &str) -> Option<SignalIntent> {
            self.0.clone()
        }
    }

    #[test]
    fn test_cashtag_with_side() {
        let intent = PatternExtractor.parse("$AAPL BUY now").unwrap();
        assert_eq!(intent.ticker, "AAPL");
        assert_eq!(intent.side, OrderSide::Buy);
        assert!(intent.confidence.is_none());
    }

    #[test]
    fn test_side_keyword_is_case_insensitive_and_normalized() {
        let intent = PatternExtractor.parse("going short on $TSLA").unwrap();
        assert_eq!(intent.ticker, "TSLA");
        assert_eq!(intent.side, OrderSide::Sell);

        let intent = PatternExtractor.parse("$NVDA long here").unwrap();
        assert_eq!(intent.side, OrderSide::Buy);
    }

    #[test]
    fn test_bare_ticker_fallback() {
        let intent = PatternExtractor.parse("MSFT looks good, buy").unwrap();
        assert_eq!(intent.ticker, "MSFT");
        assert_eq!(intent.side, OrderSide::Buy);
    }

    #[test]
    fn test_no_signal() {
        assert!(PatternExtractor.parse("nothing to see here").is_none());
        assert!(PatternExtractor.parse("$AAPL looks interesting").is_none());
        assert!(PatternExtractor.parse("").is_none());
    }

    #[test]
    fn test_cashtag_wins_over_bare_ticker() {
        let intent = PatternExtractor.parse("CEO says $AMD sell").unwrap();
        assert_eq!(intent.ticker, "AMD");
        assert_eq!(intent.side, OrderSide::Sell);
    }

    #[tokio::test]
    async fn test_primary_strategy_wins() {
        let llm = SignalIntent::new("GOOG", OrderSide::Sell).with_confidence(0.9);
        let extractor = SignalExtractor::new(Some(Arc::new(FixedExtractor(Some(llm.clone())))));
        assert_eq!(extractor.extract("$AAPL BUY").await, Some(llm));
    }

    #[tokio::test]
    async fn test_falls_back_to_pattern_when_primary_fails() {
        let extractor = SignalExtractor::new(Some(Arc::new(FixedExtractor(None))));
        let intent = extractor.extract("$AAPL BUY").await.unwrap();
        assert_eq!(intent.ticker, "AAPL");
        assert!(extractor.extract("hello").await.is_none());
    }
}
