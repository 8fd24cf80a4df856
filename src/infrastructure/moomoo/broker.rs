//! Moomoo / futu adapter on top of an OpenD gateway.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::opend::{
    value_f64, value_u64, MoomooGateway, OpenDGateway, PROTO_GET_ACC_LIST,
    PROTO_GET_ORDER_LIST, PROTO_GET_POSITION_LIST, PROTO_MODIFY_ORDER, PROTO_PLACE_ORDER,
};
use crate::domain::entities::order::{
    map_vendor_status, OrderRequest, OrderResult, OrderSide, OrderStatus, OrderType, TimeInForce,
};
use crate::domain::entities::position::{PositionBook, PositionSnapshot};
use crate::domain::errors::{BrokerError, BrokerResult};
use crate::domain::repositories::broker_adapter::BrokerAdapter;

pub const MOOMOO_BROKER_NAME: &str = "moomoo";

const TRD_SIDE_BUY: i64 = 1;
const TRD_SIDE_SELL: i64 = 2;
const ORDER_TYPE_NORMAL: i64 = 1;
const ORDER_TYPE_MARKET: i64 = 2;
const TIF_DAY: i64 = 0;
const TIF_GTC: i64 = 1;
const MODIFY_OP_CANCEL: i64 = 2;
const POSITION_SIDE_SHORT: i64 = 1;

/// Numeric OrderStatus codes as reported by OpenD.
pub const MOOMOO_STATUS_CODES: &[(i64, &str)] = &[
    (-1, "UNKNOWN"),
    (0, "UNSUBMITTED"),
    (1, "WAITING_SUBMIT"),
    (2, "SUBMITTING"),
    (3, "SUBMIT_FAILED"),
    (4, "TIMEOUT"),
    (5, "SUBMITTED"),
    (10, "FILLED_PART"),
    (11, "FILLED_ALL"),
    (12, "CANCELLING_PART"),
    (13, "CANCELLING_ALL"),
    (14, "CANCELLED_PART"),
    (15, "CANCELLED_ALL"),
    (21, "FAILED"),
    (22, "DISABLED"),
    (23, "DELETED"),
    (24, "FILL_CANCELLED"),
];

pub const MOOMOO_STATUS_MAP: &[(&str, OrderStatus)] = &[
    ("UNKNOWN", OrderStatus::New),
    ("UNSUBMITTED", OrderStatus::New),
    ("WAITING_SUBMIT", OrderStatus::New),
    ("SUBMITTING", OrderStatus::New),
    ("SUBMITTED", OrderStatus::New),
    ("SUBMIT_FAILED", OrderStatus::Rejected),
    ("TIMEOUT", OrderStatus::Rejected),
    ("FAILED", OrderStatus::Rejected),
    ("FILLED_PART", OrderStatus::PartiallyFilled),
    ("FILLED_ALL", OrderStatus::Filled),
    ("CANCELLING_PART", OrderStatus::PendingCancel),
    ("CANCELLING_ALL", OrderStatus::PendingCancel),
    ("CANCELLED_PART", OrderStatus::PartiallyCanceled),
    ("CANCELLED_ALL", OrderStatus::Canceled),
    ("DELETED", OrderStatus::Canceled),
    ("FILL_CANCELLED", OrderStatus::Canceled),
    ("DISABLED", OrderStatus::Suspended),
];

/// Vendor status value (numeric code or name) to canonical status.
pub fn canonical_status(raw: &Value) -> OrderStatus {
    let name = match raw {
        Value::Number(n) => {
            let code = n.as_i64().unwrap_or(i64::MIN);
            match MOOMOO_STATUS_CODES.iter().find(|(c, _)| *c == code) {
                Some((_, name)) => name.to_string(),
                None => return OrderStatus::Other(code.to_string()),
            }
        }
        Value::String(s) => s.trim().to_string(),
        _ => "UNKNOWN".to_string(),
    };
    map_vendor_status(MOOMOO_STATUS_MAP, &name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrdEnv {
    Simulate,
    Real,
}

impl TrdEnv {
    fn code(&self) -> i64 {
        match self {
            TrdEnv::Simulate => 0,
            TrdEnv::Real => 1,
        }
    }
}

impl FromStr for TrdEnv {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "SIMULATE" | "PAPER" => Ok(TrdEnv::Simulate),
            "REAL" | "LIVE" => Ok(TrdEnv::Real),
            other => Err(BrokerError::Configuration(format!(
                "Unknown Moomoo trading environment: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for TrdEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrdEnv::Simulate => write!(f, "SIMULATE"),
            TrdEnv::Real => write!(f, "REAL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrdMarket {
    Hk,
    Us,
    Cn,
}

impl TrdMarket {
    fn code(&self) -> i64 {
        match self {
            TrdMarket::Hk => 1,
            TrdMarket::Us => 2,
            TrdMarket::Cn => 3,
        }
    }

    /// Exchange prefixes OpenD puts on codes of this market
    fn prefixes(&self) -> &'static [&'static str] {
        match self {
            TrdMarket::Hk => &["HK."],
            TrdMarket::Us => &["US."],
            TrdMarket::Cn => &["SH.", "SZ."],
        }
    }
}

impl FromStr for TrdMarket {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "HK" => Ok(TrdMarket::Hk),
            "US" => Ok(TrdMarket::Us),
            "CN" => Ok(TrdMarket::Cn),
            other => Err(BrokerError::Configuration(format!(
                "Unknown Moomoo market: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MoomooConfig {
    pub host: String,
    pub port: u16,
    pub trd_env: TrdEnv,
    pub market: TrdMarket,
    pub account_id: Option<u64>,
    pub timeout: Duration,
}

impl Default for MoomooConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 11111,
            trd_env: TrdEnv::Simulate,
            market: TrdMarket::Us,
            account_id: None,
            timeout: Duration::from_secs(10),
        }
    }
}

pub struct MoomooBroker {
    gateway: Arc<dyn MoomooGateway>,
    trd_env: TrdEnv,
    market: TrdMarket,
    account_id: u64,
}

impl MoomooBroker {
    /// Connect to OpenD and resolve the trading account.
    pub async fn connect(config: MoomooConfig) -> BrokerResult<Self> {
        let gateway = Arc::new(OpenDGateway::new(&config.host, config.port, config.timeout));
        Self::with_gateway(gateway, config.trd_env, config.market, config.account_id).await
    }

    /// Resolve the account among those OpenD lists for `trd_env` with trading
    /// authority on `market`. A requested account that is not listed is a
    /// configuration error.
    pub async fn with_gateway(
        gateway: Arc<dyn MoomooGateway>,
        trd_env: TrdEnv,
        market: TrdMarket,
        requested: Option<u64>,
    ) -> BrokerResult<Self> {
        let s2c = gateway
            .request(PROTO_GET_ACC_LIST, json!({ "userID": 0 }))
            .await?;

        let candidates: Vec<u64> = s2c
            .get("accList")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter(|acc| acc.get("trdEnv").and_then(Value::as_i64) == Some(trd_env.code()))
                    .filter(|acc| {
                        acc.get("trdMarketAuthList")
                            .and_then(Value::as_array)
                            .map(|auth| auth.iter().any(|m| m.as_i64() == Some(market.code())))
                            .unwrap_or(false)
                    })
                    .filter_map(|acc| acc.get("accID").and_then(value_u64))
                    .collect()
            })
            .unwrap_or_default();

        let account_id = match requested {
            Some(id) if candidates.contains(&id) => id,
            Some(id) => {
                return Err(BrokerError::Configuration(format!(
                    "Moomoo account {} is not available for {} trading (found {:?})",
                    id, trd_env, candidates
                )))
            }
            None => *candidates.first().ok_or_else(|| {
                BrokerError::Configuration(format!(
                    "No Moomoo account available for {} trading",
                    trd_env
                ))
            })?,
        };

        info!("✓ Moomoo account {} resolved ({})", account_id, trd_env);
        Ok(Self {
            gateway,
            trd_env,
            market,
            account_id,
        })
    }

    pub fn account_id(&self) -> u64 {
        self.account_id
    }

    fn header(&self) -> Value {
        json!({
            "trdEnv": self.trd_env.code(),
            "accID": self.account_id,
            "trdMarket": self.market.code(),
        })
    }

    fn strip_code(&self, code: &str) -> String {
        let code = code.trim().to_uppercase();
        self.market
            .prefixes()
            .iter()
            .find_map(|prefix| code.strip_prefix(prefix))
            .map(str::to_string)
            .unwrap_or(code)
    }

    async fn order_statuses_by_id(&self) -> BrokerResult<HashMap<String, OrderStatus>> {
        Ok(self
            .order_list()
            .await?
            .iter()
            .filter_map(|row| {
                let id = order_id_of(row)?;
                Some((id, canonical_status(row.get("orderStatus").unwrap_or(&Value::Null))))
            })
            .collect())
    }

    async fn order_list(&self) -> BrokerResult<Vec<Value>> {
        let s2c = self
            .gateway
            .request(PROTO_GET_ORDER_LIST, json!({ "header": self.header() }))
            .await?;
        Ok(s2c
            .get("orderList")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }
}

fn vendor_side(side: OrderSide) -> i64 {
    match side {
        OrderSide::Buy => TRD_SIDE_BUY,
        OrderSide::Sell => TRD_SIDE_SELL,
    }
}

fn vendor_order_type(order_type: OrderType) -> i64 {
    match order_type {
        OrderType::Limit => ORDER_TYPE_NORMAL,
        OrderType::Market => ORDER_TYPE_MARKET,
    }
}

fn vendor_tif(tif: TimeInForce) -> BrokerResult<i64> {
    match tif {
        TimeInForce::Day => Ok(TIF_DAY),
        TimeInForce::Gtc => Ok(TIF_GTC),
        other => Err(BrokerError::Validation(format!(
            "Moomoo does not support time-in-force {}",
            other
        ))),
    }
}

fn order_id_of(row: &Value) -> Option<String> {
    row.get("orderID").and_then(value_u64).map(|id| id.to_string())
}

#[async_trait]
impl BrokerAdapter for MoomooBroker {
    fn name(&self) -> &str {
        MOOMOO_BROKER_NAME
    }

    async fn place_order(&self, order: &OrderRequest) -> BrokerResult<OrderResult> {
        let tif = vendor_tif(order.tif)?;
        let price = order.limit_price().unwrap_or(0.0);

        let c2s = json!({
            "header": self.header(),
            "trdSide": vendor_side(order.side),
            "orderType": vendor_order_type(order.order_type),
            "code": order.ticker,
            "qty": order.qty(),
            "price": price,
            "timeInForce": tif,
            "secMarket": self.market.code(),
        });

        let s2c = self.gateway.request(PROTO_PLACE_ORDER, c2s).await?;
        let order_id = order_id_of(&s2c);

        info!(
            "📤 Moomoo order {} {} {} placed (id {:?})",
            order.side,
            order.qty(),
            order.ticker,
            order_id
        );

        Ok(OrderResult {
            broker: MOOMOO_BROKER_NAME.to_string(),
            ticker: order.ticker.clone(),
            side: order.side,
            qty: order.qty(),
            price: order.limit_price(),
            status: OrderStatus::New,
            reason: None,
            order_id,
        })
    }

    async fn positions(&self) -> BrokerResult<PositionBook> {
        let s2c = self
            .gateway
            .request(PROTO_GET_POSITION_LIST, json!({ "header": self.header() }))
            .await?;

        let mut book = HashMap::new();
        for row in s2c
            .get("positionList")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let Some(code) = row.get("code").and_then(Value::as_str) else {
                continue;
            };
            let qty = row.get("qty").and_then(value_f64).unwrap_or(0.0);
            if qty == 0.0 {
                continue;
            }
            let signed = if row.get("positionSide").and_then(Value::as_i64)
                == Some(POSITION_SIDE_SHORT)
            {
                -qty.abs()
            } else {
                qty
            };
            let avg_price = row
                .get("costPrice")
                .and_then(value_f64)
                .unwrap_or(0.0);
            book.insert(self.strip_code(code), PositionSnapshot::new(signed, avg_price));
        }
        Ok(book)
    }

    async fn cancel_all(&self) -> BrokerResult<()> {
        let orders = self.order_list().await?;
        let open: Vec<String> = orders
            .iter()
            .filter(|row| {
                let status = canonical_status(row.get("orderStatus").unwrap_or(&Value::Null));
                !status.is_terminal() && status != OrderStatus::PendingCancel
            })
            .filter_map(order_id_of)
            .collect();

        for order_id in &open {
            let c2s = json!({
                "header": self.header(),
                "orderID": order_id,
                "modifyOrderOp": MODIFY_OP_CANCEL,
            });
            if let Err(e) = self.gateway.request(PROTO_MODIFY_ORDER, c2s).await {
                warn!("Failed to cancel Moomoo order {}: {}", order_id, e);
            }
        }

        info!("✓ Moomoo cancel requested for {} open orders", open.len());
        Ok(())
    }

    async fn order_status(&self, order_id: &str) -> BrokerResult<Option<OrderStatus>> {
        let statuses = self.order_statuses_by_id().await?;
        Ok(statuses.get(order_id).cloned())
    }

    /// One GetOrderList round trip for the whole batch.
    async fn order_statuses(&self, order_ids: &[String]) -> Vec<BrokerResult<Option<OrderStatus>>> {
        match self.order_statuses_by_id().await {
            Ok(statuses) => order_ids
                .iter()
                .map(|id| Ok(statuses.get(id).cloned()))
                .collect(),
            Err(e) => order_ids.iter().map(|_| Err(e.clone())).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    /// Scripted gateway: answers per proto id and records every request.
    struct FakeGateway {
        replies: HashMap<u32, Value>,
        fail_modify_for: Option<String>,
        calls: StdMutex<Vec<(u32, Value)>>,
    }

    impl FakeGateway {
        fn new() -> Self {
            let mut replies = HashMap::new();
            replies.insert(
                PROTO_GET_ACC_LIST,
                json!({"accList": [
                    {"trdEnv": 1, "accID": "111", "trdMarketAuthList": [2]},
                    {"trdEnv": 0, "accID": "222", "trdMarketAuthList": [1]},
                    {"trdEnv": 0, "accID": 333, "trdMarketAuthList": [1, 2]},
                ]}),
            );
            replies.insert(PROTO_PLACE_ORDER, json!({"orderID": "9001"}));
            replies.insert(
                PROTO_GET_POSITION_LIST,
                json!({"positionList": [
                    {"code": "US.AAPL", "qty": 3.0, "costPrice": 150.5, "positionSide": 0},
                    {"code": "TSLA", "qty": "2", "costPrice": "200", "positionSide": 1},
                    {"code": "MSFT", "qty": 0.0, "costPrice": 1.0},
                ]}),
            );
            replies.insert(
                PROTO_GET_ORDER_LIST,
                json!({"orderList": [
                    {"orderID": "1", "orderStatus": 5},
                    {"orderID": "2", "orderStatus": 11},
                    {"orderID": 3, "orderStatus": 10},
                    {"orderID": "4", "orderStatus": 13},
                ]}),
            );
            replies.insert(PROTO_MODIFY_ORDER, json!({}));
            Self {
                replies,
                fail_modify_for: None,
                calls: StdMutex::new(Vec::new()),
            }
        }

        fn calls_for(&self, proto_id: u32) -> Vec<Value> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(p, _)| *p == proto_id)
                .map(|(_, c)| c.clone())
                .collect()
        }
    }

    #[async_trait]
    impl MoomooGateway for FakeGateway {
        async fn request(&self, proto_id: u32, c2s: Value) -> BrokerResult<Value> {
            self.calls.lock().unwrap().push((proto_id, c2s.clone()));
            if proto_id == PROTO_MODIFY_ORDER {
                if let Some(bad) = &self.fail_modify_for {
                    if c2s["orderID"] == bad.as_str() {
                        return Err(BrokerError::Exchange("order locked".to_string()));
                    }
                }
            }
            self.replies
                .get(&proto_id)
                .cloned()
                .ok_or_else(|| BrokerError::Exchange(format!("no reply for {}", proto_id)))
        }
    }

    async fn broker_with(gateway: Arc<FakeGateway>) -> MoomooBroker {
        MoomooBroker::with_gateway(gateway, TrdEnv::Simulate, TrdMarket::Us, None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_account_resolution_filters_env_and_market() {
        let broker = broker_with(Arc::new(FakeGateway::new())).await;
        assert_eq!(broker.account_id(), 333);

        let real = MoomooBroker::with_gateway(
            Arc::new(FakeGateway::new()),
            TrdEnv::Real,
            TrdMarket::Us,
            Some(111),
        )
        .await
        .unwrap();
        assert_eq!(real.account_id(), 111);
    }

    #[tokio::test]
    async fn test_unknown_account_is_configuration_error() {
        let result = MoomooBroker::with_gateway(
            Arc::new(FakeGateway::new()),
            TrdEnv::Simulate,
            TrdMarket::Us,
            Some(222),
        )
        .await;
        assert!(matches!(result, Err(BrokerError::Configuration(_))));

        let result = MoomooBroker::with_gateway(
            Arc::new(FakeGateway::new()),
            TrdEnv::Real,
            TrdMarket::Hk,
            None,
        )
        .await;
        assert!(matches!(result, Err(BrokerError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_place_order_translates_enums() {
        let gateway = Arc::new(FakeGateway::new());
        let broker = broker_with(gateway.clone()).await;

        let order = OrderRequest::new(
            "aapl",
            OrderSide::Sell,
            2.0,
            Some(101.25),
            OrderType::Limit,
            TimeInForce::Gtc,
        )
        .unwrap();
        let result = broker.place_order(&order).await.unwrap();

        assert_eq!(result.broker, "moomoo");
        assert_eq!(result.ticker, "AAPL");
        assert_eq!(result.status, OrderStatus::New);
        assert_eq!(result.order_id.as_deref(), Some("9001"));

        let sent = &gateway.calls_for(PROTO_PLACE_ORDER)[0];
        assert_eq!(sent["trdSide"], TRD_SIDE_SELL);
        assert_eq!(sent["orderType"], ORDER_TYPE_NORMAL);
        assert_eq!(sent["timeInForce"], TIF_GTC);
        assert_eq!(sent["header"]["accID"], 333);
        assert_eq!(sent["code"], "AAPL");
    }

    #[tokio::test]
    async fn test_unsupported_tif_rejected_before_network() {
        let gateway = Arc::new(FakeGateway::new());
        let broker = broker_with(gateway.clone()).await;

        let order = OrderRequest::new(
            "AAPL",
            OrderSide::Buy,
            1.0,
            None,
            OrderType::Market,
            TimeInForce::Ioc,
        )
        .unwrap();
        assert!(matches!(
            broker.place_order(&order).await,
            Err(BrokerError::Validation(_))
        ));
        assert!(gateway.calls_for(PROTO_PLACE_ORDER).is_empty());
    }

    #[tokio::test]
    async fn test_positions_are_flattened_and_signed() {
        let broker = broker_with(Arc::new(FakeGateway::new())).await;
        let positions = broker.positions().await.unwrap();

        assert_eq!(positions.len(), 2);
        assert_eq!(positions["AAPL"].qty, 3.0);
        assert_eq!(positions["AAPL"].avg_price, 150.5);
        assert_eq!(positions["TSLA"].qty, -2.0);
        assert!(!positions.contains_key("MSFT"));
    }

    #[tokio::test]
    async fn test_cancel_all_skips_terminal_and_logs_failures() {
        let mut fake = FakeGateway::new();
        fake.fail_modify_for = Some("1".to_string());
        let gateway = Arc::new(fake);
        let broker = broker_with(gateway.clone()).await;

        broker.cancel_all().await.unwrap();

        let cancelled: Vec<String> = gateway
            .calls_for(PROTO_MODIFY_ORDER)
            .iter()
            .map(|c| c["orderID"].as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(cancelled, vec!["1".to_string(), "3".to_string()]);
        assert!(gateway
            .calls_for(PROTO_MODIFY_ORDER)
            .iter()
            .all(|c| c["modifyOrderOp"] == MODIFY_OP_CANCEL));
    }

    #[tokio::test]
    async fn test_order_status_lookup() {
        let broker = broker_with(Arc::new(FakeGateway::new())).await;
        assert_eq!(broker.order_status("2").await.unwrap(), Some(OrderStatus::Filled));
        assert_eq!(
            broker.order_status("3").await.unwrap(),
            Some(OrderStatus::PartiallyFilled)
        );
        assert_eq!(broker.order_status("404").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_order_statuses_share_one_order_list_call() {
        let gateway = Arc::new(FakeGateway::new());
        let broker = broker_with(gateway.clone()).await;
        let ids: Vec<String> = ["1", "2", "3", "404"].iter().map(|s| s.to_string()).collect();

        let statuses = broker.order_statuses(&ids).await;
        assert_eq!(statuses.len(), 4);
        assert_eq!(statuses[1], Ok(Some(OrderStatus::Filled)));
        assert_eq!(statuses[2], Ok(Some(OrderStatus::PartiallyFilled)));
        assert_eq!(statuses[3], Ok(None));
        assert_eq!(gateway.calls_for(PROTO_GET_ORDER_LIST).len(), 1);
    }

    #[tokio::test]
    async fn test_cn_positions_strip_both_exchanges() {
        let mut gateway = FakeGateway::new();
        gateway.replies.insert(
            PROTO_GET_ACC_LIST,
            json!({"accList": [{"trdEnv": 0, "accID": 777, "trdMarketAuthList": [3]}]}),
        );
        gateway.replies.insert(
            PROTO_GET_POSITION_LIST,
            json!({"positionList": [
                {"code": "SH.600519", "qty": 100.0, "costPrice": 1500.0, "positionSide": 0},
                {"code": "SZ.000001", "qty": 200.0, "costPrice": 11.0, "positionSide": 0},
            ]}),
        );
        let broker = MoomooBroker::with_gateway(Arc::new(gateway), TrdEnv::Simulate, TrdMarket::Cn, None)
            .await
            .unwrap();

        let book = broker.positions().await.unwrap();
        assert_eq!(book["600519"].qty, 100.0);
        assert_eq!(book["000001"].qty, 200.0);
    }

    #[test]
    fn test_every_vendor_status_maps_to_one_canonical_value() {
        for (code, name) in MOOMOO_STATUS_CODES {
            let status = canonical_status(&json!(code));
            assert!(
                !matches!(status, OrderStatus::Other(_)),
                "{} ({}) is unmapped",
                name,
                code
            );
            assert_eq!(status, canonical_status(&json!(name)));
        }
        assert_eq!(canonical_status(&json!(99)), OrderStatus::Other("99".to_string()));
        assert_eq!(
            canonical_status(&json!("brand_new")),
            OrderStatus::Other("BRAND_NEW".to_string())
        );
    }

    #[test]
    fn test_env_and_market_parsing() {
        assert_eq!("paper".parse::<TrdEnv>().unwrap(), TrdEnv::Simulate);
        assert_eq!("REAL".parse::<TrdEnv>().unwrap(), TrdEnv::Real);
        assert!(matches!(
            "demo".parse::<TrdEnv>(),
            Err(BrokerError::Configuration(_))
        ));
        assert_eq!("us".parse::<TrdMarket>().unwrap(), TrdMarket::Us);
    }
}
