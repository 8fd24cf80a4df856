//! In-process paper trading backend.
//!
//! Every order fills immediately at its price, or at the configured default
//! when none is given, and is booked in the local ledger tables.

use async_trait::async_trait;
use tracing::info;

use crate::domain::entities::order::{OrderRequest, OrderResult, OrderStatus};
use crate::domain::entities::position::PositionBook;
use crate::domain::errors::BrokerResult;
use crate::domain::repositories::broker_adapter::BrokerAdapter;
use crate::persistence::repository::{OrderRepository, PaperLedgerRepository, PositionRepository};
use crate::persistence::DbPool;

pub const PAPER_BROKER_NAME: &str = "paper";

pub struct PaperBroker {
    ledger: PaperLedgerRepository,
    positions: PositionRepository,
    orders: OrderRepository,
    default_price: f64,
}

impl PaperBroker {
    pub fn new(pool: DbPool, default_price: f64) -> Self {
        Self {
            ledger: PaperLedgerRepository::new(pool.clone()),
            positions: PositionRepository::new(pool.clone()),
            orders: OrderRepository::new(pool),
            default_price,
        }
    }
}

#[async_trait]
impl BrokerAdapter for PaperBroker {
    fn name(&self) -> &str {
        PAPER_BROKER_NAME
    }

    async fn place_order(&self, order: &OrderRequest) -> BrokerResult<OrderResult> {
        let price = order.limit_price().unwrap_or(self.default_price);
        let fill = self
            .ledger
            .record_fill(
                PAPER_BROKER_NAME,
                &order.ticker,
                order.side,
                order.qty(),
                price,
            )
            .await?;

        info!(
            "📄 Paper fill: {} {} {} @ {} (order {})",
            order.side,
            order.qty(),
            order.ticker,
            price,
            fill.order.id
        );

        Ok(OrderResult {
            broker: PAPER_BROKER_NAME.to_string(),
            ticker: order.ticker.clone(),
            side: order.side,
            qty: order.qty(),
            price: Some(price),
            status: OrderStatus::Filled,
            reason: None,
            order_id: fill.order.broker_order_id,
        })
    }

    async fn positions(&self) -> BrokerResult<PositionBook> {
        let rows = self.positions.list().await?;
        Ok(rows
            .into_iter()
            .map(|r| {
                let snapshot = r.snapshot();
                (r.ticker, snapshot)
            })
            .collect())
    }

    /// Nothing is ever left open
    async fn cancel_all(&self) -> BrokerResult<()> {
        Ok(())
    }

    /// Whatever the ledger booked; unknown ids are `None`.
    async fn order_status(&self, order_id: &str) -> BrokerResult<Option<OrderStatus>> {
        let order = self
            .orders
            .find_by_broker_order_id(PAPER_BROKER_NAME, order_id)
            .await?;
        Ok(order.map(|o| o.order_status()))
    }
}
