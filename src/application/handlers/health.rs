use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::application::state::AppState;

/// `GET /health`
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let config = state.router.config();
    Json(json!({
        "ok": true,
        "broker": state.router.broker().name(),
        "auto_trade_enabled": config.auto_trade_enabled,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
