use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::application::handlers::{analytics, credentials, health, orders, portfolio, signals};
use crate::application::state::AppState;
use crate::auth::{require_auth, ApiKeys};
use crate::rate_limit::{rate_limit_middleware, GlobalRateLimiter};

/// Request bodies above this are rejected
const MAX_BODY_BYTES: usize = 256 * 1024;

/// Build the HTTP surface. `/health` is public; everything else goes through
/// the API-key check, and ingestion is additionally rate limited.
pub fn build_router(state: AppState, api_keys: ApiKeys, limiter: GlobalRateLimiter) -> Router {
    let ingestion = Router::new()
        .route("/signals", post(signals::ingest_signal))
        .route_layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));

    let protected = Router::new()
        .route("/signals", get(signals::list_signals))
        .route("/orders", get(orders::list_orders).post(orders::place_order))
        .route("/orders/cancel_all", post(orders::cancel_all))
        .route("/positions", get(portfolio::list_positions))
        .route("/executions", get(portfolio::list_executions))
        .route("/performance", get(analytics::performance))
        .route("/backtest", post(analytics::backtest))
        .route(
            "/credentials",
            get(credentials::get_credentials).put(credentials::put_credentials),
        )
        .merge(ingestion)
        .route_layer(middleware::from_fn_with_state(api_keys, require_auth));

    Router::new()
        .route("/health", get(health::health_check))
        .merge(protected)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES)),
        )
        .with_state(state)
}
