use std::sync::Arc;

use crate::application::services::credential_store::CredentialStore;
use crate::domain::services::backtest::BacktestEngine;
use crate::domain::services::order_router::OrderRouter;
use crate::persistence::repository::{
    ExecutionRepository, MarketBarRepository, OrderRepository, PnlRepository, PositionRepository,
    SignalRepository,
};
use crate::persistence::DbPool;

/// Shared handler state. The router owns the single broker adapter.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<OrderRouter>,
    pub signals: SignalRepository,
    pub orders: OrderRepository,
    pub positions: PositionRepository,
    pub executions: ExecutionRepository,
    pub pnl: PnlRepository,
    pub backtest: BacktestEngine,
    pub credentials: Arc<CredentialStore>,
}

impl AppState {
    pub fn new(router: OrderRouter, pool: DbPool, credentials: CredentialStore) -> Self {
        Self {
            router: Arc::new(router),
            signals: SignalRepository::new(pool.clone()),
            orders: OrderRepository::new(pool.clone()),
            positions: PositionRepository::new(pool.clone()),
            executions: ExecutionRepository::new(pool.clone()),
            pnl: PnlRepository::new(pool.clone()),
            backtest: BacktestEngine::new(MarketBarRepository::new(pool)),
            credentials: Arc::new(credentials),
        }
    }
}
