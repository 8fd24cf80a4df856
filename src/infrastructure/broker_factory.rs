//! Broker Factory
//!
//! Builds the single broker adapter selected by `BROKER`. It is created once
//! at startup and shared by the router, the HTTP handlers and the
//! reconciler. Any failure here is fatal: the process must not serve with an
//! unusable broker.

use std::sync::Arc;
use tracing::{error, info};

use crate::config::{AlpacaSettings, AppConfig, BrokerKind};
use crate::domain::errors::{BrokerError, BrokerResult};
use crate::domain::repositories::broker_adapter::BrokerAdapter;
use crate::infrastructure::alpaca_client::{AlpacaClient, AlpacaConfig};
use crate::infrastructure::moomoo::MoomooBroker;
use crate::infrastructure::paper_broker::PaperBroker;
use crate::persistence::DbPool;

/// Alpaca settings into a client config. Both keys are required.
pub fn alpaca_config(settings: &AlpacaSettings) -> BrokerResult<AlpacaConfig> {
    let (Some(api_key), Some(secret_key)) = (&settings.api_key, &settings.secret_key) else {
        return Err(BrokerError::Configuration(
            "ALPACA_API_KEY and ALPACA_SECRET_KEY must be set for BROKER=alpaca".to_string(),
        ));
    };

    let mut config = AlpacaConfig::new(api_key, secret_key, settings.paper)
        .with_account_number(settings.account_number.clone());
    if let Some(base_url) = &settings.base_url {
        config = config.with_base_url(base_url);
    }
    Ok(config)
}

/// Create the configured broker adapter
pub async fn build_broker(config: &AppConfig, pool: DbPool) -> BrokerResult<Arc<dyn BrokerAdapter>> {
    let broker: Arc<dyn BrokerAdapter> = match config.broker {
        BrokerKind::Paper => Arc::new(PaperBroker::new(pool, config.paper_default_price)),
        BrokerKind::Alpaca => {
            let alpaca = alpaca_config(&config.alpaca)?.with_timeout(config.broker_timeout);
            Arc::new(AlpacaClient::connect(alpaca).await.map_err(|e| {
                error!("✗ Failed to create Alpaca client: {}", e);
                e
            })?)
        }
        BrokerKind::Moomoo => Arc::new(MoomooBroker::connect(config.moomoo.clone()).await.map_err(
            |e| {
                error!("✗ Failed to create Moomoo client: {}", e);
                e
            },
        )?),
    };

    info!("✓ Broker '{}' ready", broker.name());
    Ok(broker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::init_database;
    use zeroize::Zeroizing;

    #[tokio::test]
    async fn test_paper_broker_by_default() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let broker = build_broker(&AppConfig::default(), pool).await.unwrap();
        assert_eq!(broker.name(), "paper");
    }

    #[tokio::test]
    async fn test_alpaca_without_keys_is_configuration_error() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let config = AppConfig {
            broker: BrokerKind::Alpaca,
            ..AppConfig::default()
        };
        assert!(matches!(
            build_broker(&config, pool).await,
            Err(BrokerError::Configuration(_))
        ));
    }

    #[test]
    fn test_alpaca_config_from_settings() {
        let settings = AlpacaSettings {
            api_key: Some(Zeroizing::new("key".to_string())),
            secret_key: Some(Zeroizing::new("secret".to_string())),
            paper: true,
            account_number: Some("PA123".to_string()),
            base_url: Some("http://127.0.0.1:9999".to_string()),
        };
        let config = alpaca_config(&settings).unwrap();
        assert_eq!(config.api_base, "http://127.0.0.1:9999");
        assert_eq!(config.account_number.as_deref(), Some("PA123"));
        assert!(config.paper);
    }
}
