use axum::{
    extract::{Query, State},
    Json,
};
use serde_json::{json, Value};
use tracing::info;

use super::{ApiError, ListQuery};
use crate::application::state::AppState;
use crate::domain::entities::signal::RawMessage;
use crate::domain::services::order_router::IngestOutcome;
use crate::persistence::models::SignalRecord;

/// `POST /signals`
pub async fn ingest_signal(
    State(state): State<AppState>,
    Json(message): Json<RawMessage>,
) -> Result<Json<Value>, ApiError> {
    match state.router.ingest(message).await? {
        IngestOutcome::Created { signal, order } => {
            info!(
                "Signal {} accepted: {} {} (order: {})",
                signal.id,
                signal.side,
                signal.ticker,
                order.as_ref().map(|o| o.status.as_str()).unwrap_or("none")
            );
            Ok(Json(json!({ "signal": signal, "order": order })))
        }
        IngestOutcome::Duplicate => Ok(Json(json!({ "status": "duplicate" }))),
    }
}

/// `GET /signals`, newest first
pub async fn list_signals(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<SignalRecord>>, ApiError> {
    Ok(Json(state.signals.list_recent(query.limit()).await?))
}
