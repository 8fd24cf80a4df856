use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One OHLCV candle, unique per (symbol, timeframe, ts).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketBar {
    pub symbol: String,
    pub timeframe: String,
    pub ts: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}
