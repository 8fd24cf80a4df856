use axum::{
    extract::{Query, State},
    Json,
};

use super::{ApiError, ListQuery};
use crate::application::state::AppState;
use crate::infrastructure::paper_broker::PAPER_BROKER_NAME;
use crate::persistence::models::{ExecutionRecord, PositionRecord};

/// `GET /positions`
///
/// External brokers own their ledger; it is mirrored into the local table
/// on every read.
pub async fn list_positions(
    State(state): State<AppState>,
) -> Result<Json<Vec<PositionRecord>>, ApiError> {
    let broker = state.router.broker();
    if broker.name() != PAPER_BROKER_NAME {
        let book = broker.positions().await?;
        state.positions.mirror(&book).await?;
    }
    Ok(Json(state.positions.list().await?))
}

/// `GET /executions`
pub async fn list_executions(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ExecutionRecord>>, ApiError> {
    Ok(Json(state.executions.list(query.limit()).await?))
}
