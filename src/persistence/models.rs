//! Database Models
//!
//! Persistent data structures for signals, orders, positions, fills, daily
//! PnL and market bars.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::domain::entities::market_bar::MarketBar;
use crate::domain::entities::order::{OrderResult, OrderStatus};
use crate::domain::entities::position::PositionSnapshot;

/// Signal record in database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SignalRecord {
    pub id: i64,
    pub message_id: String,
    pub alt_id: Option<String>,
    pub source_url: Option<String>,
    pub source: String,
    pub author: String,
    pub channel_id: i64,
    pub content: String,
    pub ticker: String,
    pub side: String, // "BUY" or "SELL"
    pub confidence: Option<f64>,
    pub timeframe: Option<String>,
    pub stop: Option<f64>,
    pub take: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Order record in database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OrderRecord {
    pub id: i64,
    pub broker: String,
    pub ticker: String,
    pub side: String,
    pub qty: f64,
    pub price: Option<f64>,
    pub status: String,
    pub reason: Option<String>,
    pub broker_order_id: Option<String>,
    pub signal_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderRecord {
    pub fn order_status(&self) -> OrderStatus {
        OrderStatus::parse(&self.status)
    }
}

/// Position record in database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PositionRecord {
    pub id: i64,
    pub ticker: String,
    pub qty: f64, // + long / - short
    pub avg_price: f64,
    pub updated_at: DateTime<Utc>,
}

impl PositionRecord {
    pub fn snapshot(&self) -> PositionSnapshot {
        PositionSnapshot::new(self.qty, self.avg_price)
    }
}

/// Execution (fill) record in database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExecutionRecord {
    pub id: i64,
    pub order_id: i64,
    pub ticker: String,
    pub side: String,
    pub qty: f64,
    pub price: f64,
    pub executed_at: DateTime<Utc>,
}

/// Daily PnL snapshot
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PnlRecord {
    pub id: i64,
    pub date: String, // YYYY-MM-DD
    pub realized: f64,
    pub unrealized: f64,
}

/// Market bar record in database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MarketBarRecord {
    pub id: i64,
    pub symbol: String,
    pub timeframe: String,
    pub ts: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl From<MarketBarRecord> for MarketBar {
    fn from(r: MarketBarRecord) -> Self {
        MarketBar {
            symbol: r.symbol,
            timeframe: r.timeframe,
            ts: r.ts,
            open: r.open,
            high: r.high,
            low: r.low,
            close: r.close,
            volume: r.volume,
        }
    }
}

/// Create signal input
#[derive(Debug, Clone)]
pub struct CreateSignal {
    pub message_id: String,
    pub alt_id: Option<String>,
    pub source_url: Option<String>,
    pub source: String,
    pub author: String,
    pub channel_id: i64,
    pub content: String,
    pub ticker: String,
    pub side: String,
    pub confidence: Option<f64>,
    pub timeframe: Option<String>,
    pub stop: Option<f64>,
    pub take: Option<f64>,
}

/// Create order input
#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub broker: String,
    pub ticker: String,
    pub side: String,
    pub qty: f64,
    pub price: Option<f64>,
    pub status: String,
    pub reason: Option<String>,
    pub broker_order_id: Option<String>,
    pub signal_id: Option<i64>,
}

impl CreateOrder {
    pub fn from_result(result: &OrderResult, signal_id: Option<i64>) -> Self {
        Self {
            broker: result.broker.clone(),
            ticker: result.ticker.clone(),
            side: result.side.to_string(),
            qty: result.qty,
            price: result.price,
            status: result.status.to_string(),
            reason: result.reason.clone(),
            broker_order_id: result.order_id.clone(),
            signal_id,
        }
    }
}
