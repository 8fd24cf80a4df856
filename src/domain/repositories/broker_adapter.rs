//! Broker Adapter Trait
//!
//! This module defines the `BrokerAdapter` trait, the one contract every
//! order backend implements: the in-process paper simulator and each external
//! broker. Adapters translate vendor enums and status strings at this
//! boundary, so callers only ever see canonical `OrderResult`s.
//!
//! Exactly one adapter is live per process. It is built once by the
//! composition root and shared as `Arc<dyn BrokerAdapter>`; implementations
//! holding a session must guard it internally.

use crate::domain::entities::order::{OrderRequest, OrderResult, OrderStatus};
use crate::domain::entities::position::PositionBook;
use crate::domain::errors::BrokerResult;
use async_trait::async_trait;

#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    /// Backend name recorded on every Order row (`paper`, `alpaca`, `moomoo`)
    fn name(&self) -> &str;

    /// Place a validated order.
    ///
    /// # Returns
    /// The canonical result. For the paper backend this is always FILLED.
    async fn place_order(&self, order: &OrderRequest) -> BrokerResult<OrderResult>;

    /// Current holdings keyed by ticker
    async fn positions(&self) -> BrokerResult<PositionBook>;

    /// Best-effort cancellation of every open order.
    ///
    /// Individual cancel failures are logged by the adapter, never aggregated;
    /// an error here means the open orders could not even be listed.
    async fn cancel_all(&self) -> BrokerResult<()>;

    /// Latest canonical status of a previously placed order.
    ///
    /// `Ok(None)` means the backend cannot report, or does not know the id.
    async fn order_status(&self, _order_id: &str) -> BrokerResult<Option<OrderStatus>> {
        Ok(None)
    }

    /// Statuses for several orders, one result per id in input order.
    ///
    /// The default asks `order_status` id by id. Backends that can only list
    /// every order at once override this to list once per call.
    async fn order_statuses(&self, order_ids: &[String]) -> Vec<BrokerResult<Option<OrderStatus>>> {
        let mut statuses = Vec::with_capacity(order_ids.len());
        for order_id in order_ids {
            statuses.push(self.order_status(order_id).await);
        }
        statuses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::order::OrderSide;
    use crate::domain::entities::position::PositionSnapshot;
    use std::collections::HashMap;

    struct FixedBroker;

    #[async_trait]
    impl BrokerAdapter for FixedBroker {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn place_order(&self, order: &OrderRequest) -> BrokerResult<OrderResult> {
            Ok(OrderResult {
                broker: self.name().to_string(),
                ticker: order.ticker.clone(),
                side: order.side,
                qty: order.qty(),
                price: order.limit_price(),
                status: OrderStatus::New,
                reason: None,
                order_id: Some("1".to_string()),
            })
        }

        async fn positions(&self) -> BrokerResult<PositionBook> {
            let mut book = HashMap::new();
            book.insert("AAPL".to_string(), PositionSnapshot::new(1.0, 10.0));
            Ok(book)
        }

        async fn cancel_all(&self) -> BrokerResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_default_order_status_is_unknown() {
        let broker = FixedBroker;
        assert_eq!(broker.order_status("1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_trait_object_dispatch() {
        let broker: Box<dyn BrokerAdapter> = Box::new(FixedBroker);
        let order = OrderRequest::market("msft", OrderSide::Buy, 2.0).unwrap();
        let result = broker.place_order(&order).await.unwrap();
        assert_eq!(result.ticker, "MSFT");
        assert_eq!(result.status, OrderStatus::New);
        assert_eq!(broker.positions().await.unwrap().len(), 1);
    }
}
