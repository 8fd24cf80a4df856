//! Canonical order vocabulary shared by every broker adapter.
//!
//! Vendor enums and status strings are translated into these types at the
//! adapter boundary; nothing above the adapters sees vendor vocabulary.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::errors::{BrokerError, ValidationError};
use crate::domain::value_objects::{price::Price, quantity::Quantity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// +1 for BUY, -1 for SELL
    pub fn sign(&self) -> f64 {
        match self {
            OrderSide::Buy => 1.0,
            OrderSide::Sell => -1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderSide {
    type Err = BrokerError;

    /// Accepts BUY/SELL and the LONG/SHORT aliases, case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BUY" | "LONG" => Ok(OrderSide::Buy),
            "SELL" | "SHORT" => Ok(OrderSide::Sell),
            other => Err(BrokerError::Validation(format!(
                "Unsupported order side '{}'. Expected BUY or SELL.",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Market,
    Limit,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
        }
    }
}

impl FromStr for OrderType {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "MARKET" => Ok(OrderType::Market),
            "LIMIT" => Ok(OrderType::Limit),
            other => Err(BrokerError::Validation(format!(
                "Unsupported order type '{}'. Expected LIMIT or MARKET.",
                other
            ))),
        }
    }
}

/// Time in force
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    Day,
    Gtc,
    Ioc,
    Fok,
}

impl fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeInForce::Day => write!(f, "DAY"),
            TimeInForce::Gtc => write!(f, "GTC"),
            TimeInForce::Ioc => write!(f, "IOC"),
            TimeInForce::Fok => write!(f, "FOK"),
        }
    }
}

impl FromStr for TimeInForce {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "DAY" => Ok(TimeInForce::Day),
            "GTC" => Ok(TimeInForce::Gtc),
            "IOC" => Ok(TimeInForce::Ioc),
            "FOK" => Ok(TimeInForce::Fok),
            other => Err(BrokerError::Validation(format!(
                "Unsupported time-in-force '{}'. Expected DAY, GTC, IOC, or FOK.",
                other
            ))),
        }
    }
}

/// Broker-agnostic order state.
///
/// `Other` carries an unmapped vendor status, upper-cased, so that nothing a
/// vendor reports is ever dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    PartiallyCanceled,
    Rejected,
    Expired,
    Replaced,
    PendingCancel,
    PendingReplace,
    Stopped,
    Suspended,
    Calculated,
    DoneForDay,
    NotImplemented,
    Other(String),
}

impl OrderStatus {
    pub const CANONICAL: [OrderStatus; 15] = [
        OrderStatus::New,
        OrderStatus::PartiallyFilled,
        OrderStatus::Filled,
        OrderStatus::Canceled,
        OrderStatus::PartiallyCanceled,
        OrderStatus::Rejected,
        OrderStatus::Expired,
        OrderStatus::Replaced,
        OrderStatus::PendingCancel,
        OrderStatus::PendingReplace,
        OrderStatus::Stopped,
        OrderStatus::Suspended,
        OrderStatus::Calculated,
        OrderStatus::DoneForDay,
        OrderStatus::NotImplemented,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::PartiallyCanceled => "PARTIALLY_CANCELED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Expired => "EXPIRED",
            OrderStatus::Replaced => "REPLACED",
            OrderStatus::PendingCancel => "PENDING_CANCEL",
            OrderStatus::PendingReplace => "PENDING_REPLACE",
            OrderStatus::Stopped => "STOPPED",
            OrderStatus::Suspended => "SUSPENDED",
            OrderStatus::Calculated => "CALCULATED",
            OrderStatus::DoneForDay => "DONE_FOR_DAY",
            OrderStatus::NotImplemented => "NOT_IMPLEMENTED",
            OrderStatus::Other(raw) => raw.as_str(),
        }
    }

    /// Parse a stored status. Never fails: unknown text becomes `Other`.
    pub fn parse(raw: &str) -> OrderStatus {
        let upper = raw.trim().to_uppercase();
        Self::CANONICAL
            .iter()
            .find(|s| s.as_str() == upper)
            .cloned()
            .unwrap_or(OrderStatus::Other(upper))
    }

    /// No further transitions are expected once an order is in one of these.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Canceled
                | OrderStatus::Rejected
                | OrderStatus::Expired
                | OrderStatus::DoneForDay
                | OrderStatus::Calculated
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for OrderStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for OrderStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(OrderStatus::parse(&raw))
    }
}

/// Map a vendor status through an adapter's fixed table.
/// Lookup is case-insensitive; misses pass through upper-cased.
pub fn map_vendor_status(table: &[(&str, OrderStatus)], vendor: &str) -> OrderStatus {
    let needle = vendor.trim().to_lowercase();
    table
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(&needle))
        .map(|(_, status)| status.clone())
        .unwrap_or_else(|| OrderStatus::Other(vendor.trim().to_uppercase()))
}

/// A validated order request, ready for an adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub ticker: String,
    pub side: OrderSide,
    pub quantity: Quantity,
    pub price: Option<Price>,
    pub order_type: OrderType,
    pub tif: TimeInForce,
}

impl OrderRequest {
    pub fn new(
        ticker: &str,
        side: OrderSide,
        quantity: f64,
        price: Option<f64>,
        order_type: OrderType,
        tif: TimeInForce,
    ) -> Result<Self, BrokerError> {
        let ticker = ticker.trim().to_uppercase();
        if ticker.is_empty() {
            return Err(ValidationError::InvalidSymbol("empty ticker".to_string()).into());
        }
        let quantity = Quantity::new(quantity)?;
        let price = price.map(Price::new).transpose()?;

        if order_type == OrderType::Limit && price.is_none() {
            return Err(BrokerError::Validation(
                "Limit orders require a price.".to_string(),
            ));
        }

        Ok(OrderRequest {
            ticker,
            side,
            quantity,
            price,
            order_type,
            tif,
        })
    }

    /// Market order with DAY time-in-force, as used by the automatic leg.
    pub fn market(ticker: &str, side: OrderSide, quantity: f64) -> Result<Self, BrokerError> {
        Self::new(
            ticker,
            side,
            quantity,
            None,
            OrderType::Market,
            TimeInForce::Day,
        )
    }

    pub fn qty(&self) -> f64 {
        self.quantity.value()
    }

    pub fn limit_price(&self) -> Option<f64> {
        self.price.map(|p| p.value())
    }
}

/// Canonical result of a placement, whatever the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub broker: String,
    pub ticker: String,
    pub side: OrderSide,
    pub qty: f64,
    pub price: Option<f64>,
    pub status: OrderStatus,
    pub reason: Option<String>,
    pub order_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_aliases() {
        assert_eq!("long".parse::<OrderSide>().unwrap(), OrderSide::Buy);
        assert_eq!("SHORT".parse::<OrderSide>().unwrap(), OrderSide::Sell);
        assert!(matches!(
            "hold".parse::<OrderSide>(),
            Err(BrokerError::Validation(_))
        ));
    }

    #[test]
    fn test_order_type_and_tif_parse() {
        assert_eq!("limit".parse::<OrderType>().unwrap(), OrderType::Limit);
        assert_eq!("fok".parse::<TimeInForce>().unwrap(), TimeInForce::Fok);
        assert!("stop".parse::<OrderType>().is_err());
        assert!("opg".parse::<TimeInForce>().is_err());
    }

    #[test]
    fn test_limit_order_without_price_fails() {
        let result = OrderRequest::new(
            "AAPL",
            OrderSide::Buy,
            1.0,
            None,
            OrderType::Limit,
            TimeInForce::Day,
        );
        assert_eq!(
            result.unwrap_err(),
            BrokerError::Validation("Limit orders require a price.".to_string())
        );
    }

    #[test]
    fn test_zero_limit_price_fails() {
        let result = OrderRequest::new(
            "AAPL",
            OrderSide::Buy,
            1.0,
            Some(0.0),
            OrderType::Limit,
            TimeInForce::Day,
        );
        assert!(matches!(result, Err(BrokerError::Validation(_))));
    }

    #[test]
    fn test_market_order_normalizes_ticker() {
        let order = OrderRequest::market(" aapl ", OrderSide::Sell, 3.0).unwrap();
        assert_eq!(order.ticker, "AAPL");
        assert_eq!(order.qty(), 3.0);
        assert_eq!(order.tif, TimeInForce::Day);
        assert!(order.limit_price().is_none());
    }

    #[test]
    fn test_negative_quantity_rejected() {
        let result = OrderRequest::market("AAPL", OrderSide::Buy, -1.0);
        assert!(matches!(result, Err(BrokerError::Validation(_))));
    }

    #[test]
    fn test_status_parse_roundtrips_canonical_names() {
        for status in OrderStatus::CANONICAL.iter() {
            assert_eq!(&OrderStatus::parse(status.as_str()), status);
        }
        assert_eq!(
            OrderStatus::parse("held"),
            OrderStatus::Other("HELD".to_string())
        );
    }

    #[test]
    fn test_map_vendor_status_passes_unknown_through_uppercased() {
        let table = [("filled", OrderStatus::Filled)];
        assert_eq!(map_vendor_status(&table, "FILLED"), OrderStatus::Filled);
        assert_eq!(
            map_vendor_status(&table, "weird_state"),
            OrderStatus::Other("WEIRD_STATE".to_string())
        );
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Canceled.is_terminal());
        assert!(!OrderStatus::New.is_terminal());
        assert!(!OrderStatus::PartiallyFilled.is_terminal());
        assert!(!OrderStatus::Other("X".into()).is_terminal());
    }

    #[test]
    fn test_status_serializes_as_string() {
        let json = serde_json::to_string(&OrderStatus::PartiallyFilled).unwrap();
        assert_eq!(json, "\"PARTIALLY_FILLED\"");
    }
}
