use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use signal_trader::application::routes::build_router;
use signal_trader::application::services::credential_store::CredentialStore;
use signal_trader::application::services::order_reconciler::OrderReconciler;
use signal_trader::application::state::AppState;
use signal_trader::auth::ApiKeys;
use signal_trader::config::{AppConfig, LlmSettings};
use signal_trader::domain::services::order_router::OrderRouter;
use signal_trader::domain::services::risk_guard::RiskGuard;
use signal_trader::domain::services::signal_extractor::{Extractor, SignalExtractor};
use signal_trader::infrastructure::broker_factory::build_broker;
use signal_trader::infrastructure::openai_client::{OpenAiConfig, OpenAiExtractor};
use signal_trader::persistence::connect;
use signal_trader::rate_limit::{create_rate_limiter, RateLimiterConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "signal_trader=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting signal trader...");

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let pool = connect(&config.database).await?;

    let broker = match build_broker(&config, pool.clone()).await {
        Ok(broker) => broker,
        Err(e) => {
            error!("Failed to initialize broker '{}' [{}]: {}", config.broker, e.error_code(), e);
            std::process::exit(1);
        }
    };

    let extractor = build_extractor(&config.llm);
    let router = OrderRouter::new(
        config.router.clone(),
        extractor,
        RiskGuard::new(config.max_position_per_ticker),
        broker.clone(),
        pool.clone(),
    );
    info!(
        "✓ Order router ready (broker: {}, auto trade: {}, min confidence: {})",
        broker.name(),
        config.router.auto_trade_enabled,
        config.router.min_confidence
    );

    if config.reconcile_interval_secs > 0 {
        OrderReconciler::new(broker.clone(), pool.clone())
            .spawn(Duration::from_secs(config.reconcile_interval_secs));
    }

    let credentials = CredentialStore::load(config.cookie_store_path.clone()).await;
    let state = AppState::new(router, pool, credentials);

    let api_keys = ApiKeys::new(&config.api_keys);
    let limiter = create_rate_limiter(RateLimiterConfig {
        requests_per_minute: config.rate_limit_per_minute,
    });

    let app = build_router(state, api_keys, limiter);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("✓ Server listening on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutdown complete");
    Ok(())
}

/// LLM first when configured, pattern rules otherwise.
fn build_extractor(settings: &LlmSettings) -> SignalExtractor {
    let Some(api_key) = settings.api_key.clone().filter(|_| settings.enabled()) else {
        info!("LLM extraction disabled, using pattern extractor only");
        return SignalExtractor::pattern_only();
    };

    let mut openai = OpenAiConfig::new(api_key);
    openai.model = settings.model.clone();
    openai.base_url = settings.base_url.clone();

    match OpenAiExtractor::new(openai) {
        Ok(extractor) => {
            info!("✓ LLM extraction enabled (model: {})", settings.model);
            let extractor: Arc<dyn Extractor> = Arc::new(extractor);
            SignalExtractor::new(Some(extractor))
        }
        Err(e) => {
            warn!("Failed to build LLM client, falling back to patterns: {}", e);
            SignalExtractor::pattern_only()
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
