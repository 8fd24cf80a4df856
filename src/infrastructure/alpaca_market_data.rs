//! Historical bars from Alpaca's market-data API.

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use crate::domain::entities::market_bar::MarketBar;
use crate::domain::errors::{BrokerError, BrokerResult};
use crate::infrastructure::alpaca_client::AlpacaConfig;
use crate::persistence::repository::MarketBarRepository;

const PAGE_LIMIT: &str = "10000";

/// Map a user timeframe alias to Alpaca's notation.
pub fn parse_timeframe(raw: &str) -> BrokerResult<&'static str> {
    match raw.trim().to_lowercase().as_str() {
        "1min" | "1m" => Ok("1Min"),
        "5min" | "5m" => Ok("5Min"),
        "15min" | "15m" => Ok("15Min"),
        "1h" | "1hour" => Ok("1Hour"),
        "1d" | "day" | "1day" => Ok("1Day"),
        other => Err(BrokerError::Validation(format!(
            "Unsupported timeframe: {}",
            other
        ))),
    }
}

#[derive(Debug, Deserialize)]
struct BarsPage {
    #[serde(default)]
    bars: Option<Vec<RawBar>>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawBar {
    t: DateTime<Utc>,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    v: f64,
}

pub struct AlpacaMarketData {
    client: Client,
    config: AlpacaConfig,
}

impl AlpacaMarketData {
    pub fn new(config: AlpacaConfig) -> BrokerResult<Self> {
        Ok(Self {
            client: config.http_client()?,
            config,
        })
    }

    /// Fetch every page of bars for `symbol`. Bars carry `timeframe` exactly
    /// as given, which is also the key they are stored under.
    pub async fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> BrokerResult<Vec<MarketBar>> {
        let alpaca_tf = parse_timeframe(timeframe)?;
        let symbol = symbol.trim().to_uppercase();
        let url = format!("{}/v2/stocks/{}/bars", self.config.data_base, symbol);

        let mut bars = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query: Vec<(&str, String)> = vec![
                ("timeframe", alpaca_tf.to_string()),
                ("limit", PAGE_LIMIT.to_string()),
            ];
            if let Some(start) = start {
                query.push(("start", start.to_rfc3339()));
            }
            if let Some(end) = end {
                query.push(("end", end.to_rfc3339()));
            }
            if let Some(token) = &page_token {
                query.push(("page_token", token.clone()));
            }

            let response = self
                .config
                .authorize(self.client.get(&url).query(&query))
                .send()
                .await
                .map_err(|e| BrokerError::Connection(format!("Alpaca bars request: {}", e)))?;

            if !response.status().is_success() {
                let status = response.status();
                let error_text = response.text().await.unwrap_or_default();
                return Err(BrokerError::Exchange(format!(
                    "Alpaca bars error: {} - {}",
                    status, error_text
                )));
            }

            let page: BarsPage = response
                .json()
                .await
                .map_err(|e| BrokerError::Exchange(format!("Failed to parse bars: {}", e)))?;

            let raw = page.bars.unwrap_or_default();
            debug!("Fetched {} {} bars for {}", raw.len(), alpaca_tf, symbol);
            bars.extend(raw.into_iter().map(|b| MarketBar {
                symbol: symbol.clone(),
                timeframe: timeframe.to_string(),
                ts: b.t,
                open: b.o,
                high: b.h,
                low: b.l,
                close: b.c,
                volume: b.v,
            }));

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(bars)
    }

    /// Fetch and store, skipping bars already present.
    ///
    /// # Returns
    /// (fetched, inserted)
    pub async fn fetch_and_store(
        &self,
        repo: &MarketBarRepository,
        symbol: &str,
        timeframe: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> BrokerResult<(usize, u64)> {
        let bars = self.fetch_bars(symbol, timeframe, start, end).await?;
        let inserted = repo.upsert_skip(&bars).await?;
        info!(
            "✓ {} {}: fetched {} bars, stored {} new",
            symbol,
            timeframe,
            bars.len(),
            inserted
        );
        Ok((bars.len(), inserted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeframe_aliases() {
        assert_eq!(parse_timeframe("1m").unwrap(), "1Min");
        assert_eq!(parse_timeframe("5Min").unwrap(), "5Min");
        assert_eq!(parse_timeframe("15m").unwrap(), "15Min");
        assert_eq!(parse_timeframe("1Hour").unwrap(), "1Hour");
        assert_eq!(parse_timeframe("day").unwrap(), "1Day");
        assert_eq!(parse_timeframe("1Day").unwrap(), "1Day");
        assert!(matches!(
            parse_timeframe("2h"),
            Err(BrokerError::Validation(_))
        ));
    }

    #[test]
    fn test_bars_page_parses_missing_bars() {
        let page: BarsPage = serde_json::from_str(r#"{"bars":null,"next_page_token":null}"#).unwrap();
        assert!(page.bars.is_none());

        let page: BarsPage = serde_json::from_str(
            r#"{"bars":[{"t":"2024-01-02T05:00:00Z","o":1.0,"h":2.0,"l":0.5,"c":1.5,"v":100}],"next_page_token":"abc"}"#,
        )
        .unwrap();
        assert_eq!(page.bars.unwrap()[0].c, 1.5);
        assert_eq!(page.next_page_token.as_deref(), Some("abc"));
    }
}
