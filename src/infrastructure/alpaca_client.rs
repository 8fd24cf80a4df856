//! Alpaca Markets REST adapter.
//!
//! Authentication is the `APCA-API-KEY-ID` / `APCA-API-SECRET-KEY` header
//! pair; no local gateway is involved. The account is checked on connect and
//! the adapter refuses to start against an inactive or unexpected account.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::domain::entities::order::{
    map_vendor_status, OrderRequest, OrderResult, OrderSide, OrderStatus, OrderType, TimeInForce,
};
use crate::domain::entities::position::{PositionBook, PositionSnapshot};
use crate::domain::errors::{BrokerError, BrokerResult};
use crate::domain::repositories::broker_adapter::BrokerAdapter;

/// Alpaca API endpoints
pub const ALPACA_LIVE_BASE: &str = "https://api.alpaca.markets";
pub const ALPACA_PAPER_BASE: &str = "https://paper-api.alpaca.markets";
pub const ALPACA_DATA_BASE: &str = "https://data.alpaca.markets";

pub const ALPACA_BROKER_NAME: &str = "alpaca";

/// Vendor status -> canonical status
pub const ALPACA_STATUS_MAP: &[(&str, OrderStatus)] = &[
    ("new", OrderStatus::New),
    ("accepted", OrderStatus::New),
    ("pending_new", OrderStatus::New),
    ("accepted_for_bidding", OrderStatus::New),
    ("partially_filled", OrderStatus::PartiallyFilled),
    ("filled", OrderStatus::Filled),
    ("done_for_day", OrderStatus::DoneForDay),
    ("canceled", OrderStatus::Canceled),
    ("expired", OrderStatus::Expired),
    ("replaced", OrderStatus::Replaced),
    ("pending_cancel", OrderStatus::PendingCancel),
    ("pending_replace", OrderStatus::PendingReplace),
    ("stopped", OrderStatus::Stopped),
    ("rejected", OrderStatus::Rejected),
    ("suspended", OrderStatus::Suspended),
    ("calculated", OrderStatus::Calculated),
];

/// Alpaca connection configuration
#[derive(Clone)]
pub struct AlpacaConfig {
    pub api_base: String,
    pub data_base: String,
    pub api_key: Zeroizing<String>,
    pub secret_key: Zeroizing<String>,
    /// When set, the connected account must carry this number
    pub account_number: Option<String>,
    pub timeout: Duration,
    pub paper: bool,
}

impl AlpacaConfig {
    pub fn new(api_key: &str, secret_key: &str, paper: bool) -> Self {
        Self {
            api_base: if paper {
                ALPACA_PAPER_BASE.to_string()
            } else {
                ALPACA_LIVE_BASE.to_string()
            },
            data_base: ALPACA_DATA_BASE.to_string(),
            api_key: Zeroizing::new(api_key.to_string()),
            secret_key: Zeroizing::new(secret_key.to_string()),
            account_number: None,
            timeout: Duration::from_secs(10),
            paper,
        }
    }

    /// Point both trading and data calls at `base` (local test servers)
    pub fn with_base_url(mut self, base: &str) -> Self {
        self.api_base = base.trim_end_matches('/').to_string();
        self.data_base = self.api_base.clone();
        self
    }

    pub fn with_account_number(mut self, account_number: Option<String>) -> Self {
        self.account_number = account_number;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn http_client(&self) -> BrokerResult<Client> {
        Client::builder()
            .timeout(self.timeout)
            .user_agent(concat!("signal_trader/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BrokerError::Configuration(format!("HTTP client: {}", e)))
    }

    pub(crate) fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("APCA-API-KEY-ID", self.api_key.as_str())
            .header("APCA-API-SECRET-KEY", self.secret_key.as_str())
    }
}

/// Account summary returned by `GET /v2/account`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlpacaAccount {
    pub id: String,
    #[serde(default)]
    pub account_number: Option<String>,
    pub status: String,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub cash: Option<String>,
    #[serde(default)]
    pub buying_power: Option<String>,
    #[serde(default)]
    pub equity: Option<String>,
    #[serde(default)]
    pub trading_blocked: bool,
    #[serde(default)]
    pub account_blocked: bool,
}

/// Order body for `POST /v2/orders`
#[derive(Debug, Serialize)]
pub struct AlpacaOrderRequest {
    pub symbol: String,
    pub qty: String,
    pub side: &'static str,
    #[serde(rename = "type")]
    pub order_type: &'static str,
    pub time_in_force: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<String>,
}

/// Order as returned by Alpaca
#[derive(Debug, Clone, Deserialize)]
pub struct AlpacaOrder {
    pub id: String,
    pub symbol: String,
    #[serde(default)]
    pub qty: Option<String>,
    pub side: String,
    #[serde(default)]
    pub limit_price: Option<String>,
    #[serde(default)]
    pub filled_avg_price: Option<String>,
    pub status: String,
}

/// Position as returned by Alpaca
#[derive(Debug, Clone, Deserialize)]
pub struct AlpacaPosition {
    pub symbol: String,
    pub qty: String,
    pub avg_entry_price: String,
}

/// Strip a market prefix: `US.AAPL` -> `AAPL`
pub fn normalize_symbol(ticker: &str) -> String {
    ticker
        .rsplit('.')
        .next()
        .unwrap_or(ticker)
        .trim()
        .to_uppercase()
}

fn parse_num(raw: &str, field: &str) -> BrokerResult<f64> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| BrokerError::Exchange(format!("Unparseable {} '{}'", field, raw)))
}

fn convert_order(order: &OrderRequest) -> BrokerResult<AlpacaOrderRequest> {
    let side = match order.side {
        OrderSide::Buy => "buy",
        OrderSide::Sell => "sell",
    };
    let time_in_force = match order.tif {
        TimeInForce::Day => "day",
        TimeInForce::Gtc => "gtc",
        TimeInForce::Ioc => "ioc",
        TimeInForce::Fok => "fok",
    };
    let (order_type, limit_price) = match order.order_type {
        OrderType::Market => ("market", None),
        OrderType::Limit => {
            let price = order.limit_price().ok_or_else(|| {
                BrokerError::Validation("Limit orders require a price.".to_string())
            })?;
            ("limit", Some(price.to_string()))
        }
    };

    Ok(AlpacaOrderRequest {
        symbol: normalize_symbol(&order.ticker),
        qty: order.qty().to_string(),
        side,
        order_type,
        time_in_force,
        limit_price,
    })
}

/// Alpaca trading client
pub struct AlpacaClient {
    client: Client,
    config: AlpacaConfig,
    account: AlpacaAccount,
}

impl AlpacaClient {
    /// Connect and validate the account.
    ///
    /// # Errors
    /// `Configuration` when credentials are rejected, the account is not
    /// ACTIVE, or its number differs from the configured one.
    pub async fn connect(config: AlpacaConfig) -> BrokerResult<Self> {
        let client = config.http_client()?;

        let response = config
            .authorize(client.get(format!("{}/v2/account", config.api_base)))
            .send()
            .await
            .map_err(|e| BrokerError::Connection(format!("Alpaca account request: {}", e)))?;

        if matches!(
            response.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            return Err(BrokerError::Configuration(format!(
                "Alpaca rejected the API credentials ({})",
                response.status()
            )));
        }
        let account: AlpacaAccount = Self::decode(response, "account").await?;

        if !account.status.eq_ignore_ascii_case("ACTIVE") {
            return Err(BrokerError::Configuration(format!(
                "Alpaca account {} is not active (status {})",
                account.id, account.status
            )));
        }
        if let Some(expected) = &config.account_number {
            if account.account_number.as_deref() != Some(expected.as_str()) {
                return Err(BrokerError::Configuration(format!(
                    "Alpaca account {} is not available with these credentials",
                    expected
                )));
            }
        }

        let mode = if config.paper {
            "paper"
        } else {
            "live"
        };
        info!(
            "✓ Alpaca broker initialised ({} mode, account {})",
            mode,
            account.account_number.as_deref().unwrap_or(&account.id)
        );

        Ok(Self {
            client,
            config,
            account,
        })
    }

    pub fn account(&self) -> &AlpacaAccount {
        &self.account
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response, what: &str) -> BrokerResult<T> {
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(BrokerError::Exchange(format!(
                "Alpaca {} error: {} - {}",
                what, status, error_text
            )));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| BrokerError::Exchange(format!("Failed to parse Alpaca {}: {}", what, e)))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.config.authorize(
            self.client
                .request(method, format!("{}{}", self.config.api_base, path)),
        )
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> BrokerResult<reqwest::Response> {
        request
            .send()
            .await
            .map_err(|e| BrokerError::Connection(format!("Alpaca {} request: {}", what, e)))
    }

    fn format_order(&self, order: &AlpacaOrder) -> BrokerResult<OrderResult> {
        let side: OrderSide = order.side.parse()?;
        let qty = match &order.qty {
            Some(q) => parse_num(q, "qty")?,
            None => 0.0,
        };
        let price = order
            .limit_price
            .as_deref()
            .map(|p| parse_num(p, "limit_price"))
            .transpose()?;

        Ok(OrderResult {
            broker: ALPACA_BROKER_NAME.to_string(),
            ticker: order.symbol.clone(),
            side,
            qty,
            price,
            status: map_vendor_status(ALPACA_STATUS_MAP, &order.status),
            reason: None,
            order_id: Some(order.id.clone()),
        })
    }

    async fn open_orders(&self) -> BrokerResult<Vec<AlpacaOrder>> {
        let response = self
            .send(
                self.request(Method::GET, "/v2/orders")
                    .query(&[("status", "open"), ("limit", "500")]),
                "open orders",
            )
            .await?;
        Self::decode(response, "open orders").await
    }
}

#[async_trait]
impl BrokerAdapter for AlpacaClient {
    fn name(&self) -> &str {
        ALPACA_BROKER_NAME
    }

    async fn place_order(&self, order: &OrderRequest) -> BrokerResult<OrderResult> {
        let body = convert_order(order)?;
        debug!(
            "Placing Alpaca order: {} {} qty={} price={:?} type={} tif={}",
            body.symbol, body.side, body.qty, body.limit_price, body.order_type, body.time_in_force
        );

        let response = self
            .send(
                self.request(Method::POST, "/v2/orders").json(&body),
                "order",
            )
            .await?;
        let placed: AlpacaOrder = Self::decode(response, "order").await?;
        let result = self.format_order(&placed)?;

        info!(
            "Alpaca order submitted: id={} status={}",
            placed.id, result.status
        );
        Ok(result)
    }

    async fn positions(&self) -> BrokerResult<PositionBook> {
        let response = self
            .send(self.request(Method::GET, "/v2/positions"), "positions")
            .await?;
        let raw: Vec<AlpacaPosition> = Self::decode(response, "positions").await?;

        let mut positions = PositionBook::new();
        for pos in raw {
            positions.insert(
                pos.symbol.clone(),
                PositionSnapshot::new(
                    parse_num(&pos.qty, "qty")?,
                    parse_num(&pos.avg_entry_price, "avg_entry_price")?,
                ),
            );
        }
        debug!("Fetched {} positions from Alpaca", positions.len());
        Ok(positions)
    }

    async fn cancel_all(&self) -> BrokerResult<()> {
        let open = self.open_orders().await?;
        let mut cancelled = 0;

        for order in &open {
            let path = format!("/v2/orders/{}", order.id);
            match self.send(self.request(Method::DELETE, &path), "cancel").await {
                Ok(response) if response.status().is_success() => cancelled += 1,
                Ok(response) => warn!(
                    "Alpaca cancel failed for order {} ({}): {}",
                    order.id,
                    order.symbol,
                    response.status()
                ),
                Err(e) => warn!("Alpaca cancel failed for order {}: {}", order.id, e),
            }
        }

        info!(
            "Alpaca cancel_all: {} of {} open orders cancelled",
            cancelled,
            open.len()
        );
        Ok(())
    }

    async fn order_status(&self, order_id: &str) -> BrokerResult<Option<OrderStatus>> {
        let path = format!("/v2/orders/{}", order_id);
        let response = self.send(self.request(Method::GET, &path), "order status").await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let order: AlpacaOrder = Self::decode(response, "order status").await?;
        Ok(Some(map_vendor_status(ALPACA_STATUS_MAP, &order.status)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_symbol() {
        assert_eq!(normalize_symbol("US.AAPL"), "AAPL");
        assert_eq!(normalize_symbol("msft"), "MSFT");
    }

    #[test]
    fn test_status_map_is_total_over_vendor_statuses() {
        let vendor = [
            "new",
            "partially_filled",
            "filled",
            "done_for_day",
            "canceled",
            "expired",
            "replaced",
            "pending_cancel",
            "pending_replace",
            "accepted",
            "pending_new",
            "accepted_for_bidding",
            "stopped",
            "rejected",
            "suspended",
            "calculated",
        ];
        for status in vendor {
            let mapped = map_vendor_status(ALPACA_STATUS_MAP, status);
            assert!(
                OrderStatus::CANONICAL.contains(&mapped),
                "{} mapped to {}",
                status,
                mapped
            );
        }
        assert_eq!(
            map_vendor_status(ALPACA_STATUS_MAP, "held"),
            OrderStatus::Other("HELD".to_string())
        );
    }

    #[test]
    fn test_convert_limit_order() {
        let order = OrderRequest::new(
            "US.AAPL",
            OrderSide::Sell,
            2.0,
            Some(101.5),
            OrderType::Limit,
            TimeInForce::Gtc,
        )
        .unwrap();
        let body = convert_order(&order).unwrap();
        assert_eq!(body.symbol, "AAPL");
        assert_eq!(body.side, "sell");
        assert_eq!(body.order_type, "limit");
        assert_eq!(body.time_in_force, "gtc");
        assert_eq!(body.limit_price.as_deref(), Some("101.5"));

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["type"], "limit");
    }

    #[test]
    fn test_convert_market_order_omits_price() {
        let order = OrderRequest::market("AAPL", OrderSide::Buy, 1.0).unwrap();
        let json = serde_json::to_value(convert_order(&order).unwrap()).unwrap();
        assert!(json.get("limit_price").is_none());
        assert_eq!(json["time_in_force"], "day");
    }
}
