//! RiskGuard - per-ticker position ceiling
//!
//! A point-in-time check against the active broker's positions. Nothing is
//! reserved, so two concurrent orders can both pass.

use tracing::{debug, warn};

use crate::domain::errors::BrokerResult;
use crate::domain::repositories::broker_adapter::BrokerAdapter;

/// `|current + delta| <= ceiling`
pub fn within_ceiling(current: f64, delta: f64, ceiling: f64) -> bool {
    (current + delta).abs() <= ceiling
}

#[derive(Debug, Clone, Copy)]
pub struct RiskGuard {
    max_position_per_ticker: f64,
}

impl RiskGuard {
    pub fn new(max_position_per_ticker: f64) -> Self {
        Self {
            max_position_per_ticker,
        }
    }

    pub fn ceiling(&self) -> f64 {
        self.max_position_per_ticker
    }

    /// May an order changing `ticker` by the signed `qty_delta` be opened?
    pub async fn can_open(
        &self,
        broker: &dyn BrokerAdapter,
        ticker: &str,
        qty_delta: f64,
    ) -> BrokerResult<bool> {
        let positions = broker.positions().await?;
        let current = positions.get(ticker).map(|p| p.qty).unwrap_or(0.0);
        let allowed = within_ceiling(current, qty_delta, self.max_position_per_ticker);

        if allowed {
            debug!(
                "Risk check passed for {}: {} + {} within {}",
                ticker, current, qty_delta, self.max_position_per_ticker
            );
        } else {
            warn!(
                "Risk check rejected {}: |{} + {}| exceeds {}",
                ticker, current, qty_delta, self.max_position_per_ticker
            );
        }
        Ok(allowed)
    }
}
