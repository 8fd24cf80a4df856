use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{ApiError, ListQuery};
use crate::application::state::AppState;
use crate::domain::entities::order::{OrderRequest, OrderSide, OrderType, TimeInForce};
use crate::domain::errors::BrokerError;
use crate::persistence::models::OrderRecord;

/// Body of `POST /orders`
#[derive(Debug, Deserialize)]
pub struct ManualOrderRequest {
    pub ticker: String,
    pub side: String,
    pub qty: f64,
    pub price: Option<f64>,
    pub order_type: Option<String>,
    pub tif: Option<String>,
}

impl ManualOrderRequest {
    /// LIMIT when a price is given, MARKET otherwise; DAY by default.
    pub fn into_order(self) -> Result<OrderRequest, BrokerError> {
        let side: OrderSide = self.side.parse()?;
        let order_type = match self.order_type.as_deref() {
            Some(raw) => raw.parse::<OrderType>()?,
            None if self.price.is_some() => OrderType::Limit,
            None => OrderType::Market,
        };
        let tif = match self.tif.as_deref() {
            Some(raw) => raw.parse::<TimeInForce>()?,
            None => TimeInForce::Day,
        };
        OrderRequest::new(&self.ticker, side, self.qty, self.price, order_type, tif)
    }
}

/// `POST /orders`
pub async fn place_order(
    State(state): State<AppState>,
    Json(body): Json<ManualOrderRequest>,
) -> Result<Json<OrderRecord>, ApiError> {
    let order = body.into_order()?;
    Ok(Json(state.router.place_manual(&order).await?))
}

/// `GET /orders`, newest first
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<OrderRecord>>, ApiError> {
    Ok(Json(state.orders.list(query.limit()).await?))
}

/// `POST /orders/cancel_all`
pub async fn cancel_all(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let broker = state.router.broker();
    broker.cancel_all().await?;
    Ok(Json(json!({ "status": "ok", "broker": broker.name() })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(price: Option<f64>, order_type: Option<&str>, tif: Option<&str>) -> ManualOrderRequest {
        ManualOrderRequest {
            ticker: "aapl".to_string(),
            side: "buy".to_string(),
            qty: 1.0,
            price,
            order_type: order_type.map(str::to_string),
            tif: tif.map(str::to_string),
        }
    }

    #[test]
    fn test_defaults() {
        let order = body(None, None, None).into_order().unwrap();
        assert_eq!(order.order_type, OrderType::Market);
        assert_eq!(order.tif, TimeInForce::Day);
        assert_eq!(order.ticker, "AAPL");

        let order = body(Some(10.0), None, Some("gtc")).into_order().unwrap();
        assert_eq!(order.order_type, OrderType::Limit);
        assert_eq!(order.tif, TimeInForce::Gtc);
    }

    #[test]
    fn test_invalid_inputs_are_validation_errors() {
        assert!(matches!(
            body(None, Some("LIMIT"), None).into_order(),
            Err(BrokerError::Validation(_))
        ));
        assert!(matches!(
            body(None, Some("STOP"), None).into_order(),
            Err(BrokerError::Validation(_))
        ));
        assert!(matches!(
            body(None, None, Some("NEVER")).into_order(),
            Err(BrokerError::Validation(_))
        ));
    }
}
