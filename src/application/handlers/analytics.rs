use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use super::ApiError;
use crate::application::state::AppState;
use crate::domain::services::backtest::{BacktestParams, BacktestResult};
use crate::domain::services::performance::{build_equity_from_pnl, PerformanceSummary};

const DEFAULT_INITIAL_EQUITY: f64 = 100_000.0;

#[derive(Debug, Deserialize)]
pub struct PerformanceQuery {
    pub initial_equity: Option<f64>,
}

/// `GET /performance`
pub async fn performance(
    State(state): State<AppState>,
    Query(query): Query<PerformanceQuery>,
) -> Result<Json<PerformanceSummary>, ApiError> {
    let initial_equity = query
        .initial_equity
        .filter(|e| *e > 0.0 && e.is_finite())
        .unwrap_or(DEFAULT_INITIAL_EQUITY);
    let rows = state.pnl.list().await?;
    Ok(Json(build_equity_from_pnl(&rows, initial_equity)))
}

/// Body of `POST /backtest`
#[derive(Debug, Deserialize)]
pub struct BacktestRequest {
    pub symbol: String,
    pub timeframe: String,
    pub start: String,
    pub end: String,
    pub short_window: Option<usize>,
    pub long_window: Option<usize>,
    pub initial_equity: Option<f64>,
}

impl BacktestRequest {
    fn params(&self) -> BacktestParams {
        let defaults = BacktestParams::default();
        BacktestParams {
            short_window: self.short_window.unwrap_or(defaults.short_window),
            long_window: self.long_window.unwrap_or(defaults.long_window),
            initial_equity: self.initial_equity.unwrap_or(defaults.initial_equity),
        }
    }
}

/// `POST /backtest`
pub async fn backtest(
    State(state): State<AppState>,
    Json(request): Json<BacktestRequest>,
) -> Result<Json<BacktestResult>, ApiError> {
    let params = request.params();
    let symbol = request.symbol.trim().to_uppercase();
    let result = state
        .backtest
        .run(&symbol, &request.timeframe, &request.start, &request.end, &params)
        .await?;
    Ok(Json(result))
}
