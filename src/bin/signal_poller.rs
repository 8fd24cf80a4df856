//! Feed collector process. Polls `FEED_URL` and publishes candidate posts to
//! the API's `POST /signals`.

use std::time::Duration;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use signal_trader::application::poller::{HttpJsonFeed, Poller};
use signal_trader::application::services::credential_store::CredentialStore;
use signal_trader::config::AppConfig;

const FEED_TIMEOUT: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "signal_trader=info,signal_poller=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let Some(feed_url) = config.poller.feed_url.clone() else {
        error!("FEED_URL is required for the poller");
        std::process::exit(1);
    };

    let feed = match HttpJsonFeed::new(&feed_url, FEED_TIMEOUT) {
        Ok(feed) => feed,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let credentials = CredentialStore::load(config.cookie_store_path.clone()).await;
    let poller = match Poller::new(
        config.poller,
        config.api_keys.first().cloned(),
        Box::new(feed),
        credentials,
    ) {
        Ok(poller) => poller,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    info!("Polling {}", feed_url);
    poller
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;
}
