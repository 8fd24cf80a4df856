//! Order Reconciler
//!
//! Orders are stored with the status reported at placement. This task polls
//! the active broker for orders that have not reached a terminal state and
//! writes back any change.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::repositories::broker_adapter::BrokerAdapter;
use crate::persistence::repository::OrderRepository;
use crate::persistence::{DatabaseError, DbPool};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    pub checked: usize,
    pub updated: usize,
    pub failed: usize,
}

pub struct OrderReconciler {
    broker: Arc<dyn BrokerAdapter>,
    orders: OrderRepository,
}

impl OrderReconciler {
    pub fn new(broker: Arc<dyn BrokerAdapter>, pool: DbPool) -> Self {
        Self {
            broker,
            orders: OrderRepository::new(pool),
        }
    }

    /// One pass over the broker's non-terminal orders.
    pub async fn reconcile_once(&self) -> Result<ReconcileReport, DatabaseError> {
        let open = self.orders.list_reconcilable(self.broker.name()).await?;
        let mut report = ReconcileReport {
            checked: open.len(),
            ..ReconcileReport::default()
        };

        let open: Vec<_> = open
            .into_iter()
            .filter_map(|order| {
                let broker_order_id = order.broker_order_id.clone()?;
                Some((order, broker_order_id))
            })
            .collect();
        let ids: Vec<String> = open.iter().map(|(_, id)| id.clone()).collect();
        let statuses = self.broker.order_statuses(&ids).await;

        for ((order, _), status) in open.into_iter().zip(statuses) {
            match status {
                Ok(Some(status)) if status != order.order_status() => {
                    self.orders.update_status(order.id, &status).await?;
                    info!(
                        "Order {} ({} {}) {} -> {}",
                        order.id, order.side, order.ticker, order.status, status
                    );
                    report.updated += 1;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        "Status lookup for order {} failed [{}]: {}",
                        order.id,
                        e.error_code(),
                        e
                    );
                    report.failed += 1;
                }
            }
        }

        debug!("Reconciliation pass: {:?}", report);
        Ok(report)
    }

    /// Run `reconcile_once` every `interval` until the runtime shuts down.
    pub fn spawn(self, interval: Duration) -> JoinHandle<()> {
        info!(
            "✓ Order reconciler started for '{}' (every {:?})",
            self.broker.name(),
            interval
        );
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = self.reconcile_once().await {
                    error!("Order reconciliation failed: {}", e);
                }
            }
        })
    }
}
