use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use zeroize::Zeroizing;

use crate::domain::errors::BrokerError;
use crate::domain::services::order_router::RouterConfig;
use crate::infrastructure::moomoo::{MoomooConfig, TrdEnv, TrdMarket};
use crate::persistence::DatabaseConfig;
use crate::secrets::optional_secret;

/// The one broker backend this process trades through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerKind {
    Paper,
    Alpaca,
    Moomoo,
}

impl FromStr for BrokerKind {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "paper" => Ok(BrokerKind::Paper),
            "alpaca" => Ok(BrokerKind::Alpaca),
            "moomoo" | "futu" => Ok(BrokerKind::Moomoo),
            other => Err(BrokerError::Configuration(format!(
                "Unsupported broker: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for BrokerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerKind::Paper => write!(f, "paper"),
            BrokerKind::Alpaca => write!(f, "alpaca"),
            BrokerKind::Moomoo => write!(f, "moomoo"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Language-model extractor settings. Without an API key only the pattern
/// extractor runs.
#[derive(Clone)]
pub struct LlmSettings {
    pub provider: String,
    pub api_key: Option<Zeroizing<String>>,
    pub model: String,
    pub base_url: String,
}

impl LlmSettings {
    pub fn enabled(&self) -> bool {
        self.provider == "openai" && self.api_key.is_some()
    }
}

#[derive(Clone)]
pub struct AlpacaSettings {
    pub api_key: Option<Zeroizing<String>>,
    pub secret_key: Option<Zeroizing<String>>,
    pub paper: bool,
    pub account_number: Option<String>,
    /// Overrides the trading API base (mainly for tests)
    pub base_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub interval_secs: u64,
    pub api_base_url: String,
    pub feed_url: Option<String>,
    pub source: String,
}

/// Process configuration, read once at startup
#[derive(Clone)]
pub struct AppConfig {
    pub broker: BrokerKind,
    pub router: RouterConfig,
    pub max_position_per_ticker: f64,
    pub paper_default_price: f64,
    pub broker_timeout: Duration,
    pub llm: LlmSettings,
    pub alpaca: AlpacaSettings,
    pub moomoo: MoomooConfig,
    pub database: DatabaseConfig,
    pub bind_addr: String,
    pub rate_limit_per_minute: u32,
    pub api_keys: Vec<String>,
    pub cookie_store_path: PathBuf,
    /// Zero disables the reconciler
    pub reconcile_interval_secs: u64,
    pub poller: PollerSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            broker: BrokerKind::Paper,
            router: RouterConfig::default(),
            max_position_per_ticker: 2.0,
            paper_default_price: 1.0,
            broker_timeout: Duration::from_millis(10_000),
            llm: LlmSettings {
                provider: "openai".to_string(),
                api_key: None,
                model: crate::infrastructure::openai_client::DEFAULT_OPENAI_MODEL.to_string(),
                base_url: crate::infrastructure::openai_client::DEFAULT_OPENAI_BASE_URL
                    .to_string(),
            },
            alpaca: AlpacaSettings {
                api_key: None,
                secret_key: None,
                paper: true,
                account_number: None,
                base_url: None,
            },
            moomoo: MoomooConfig::default(),
            database: DatabaseConfig::default(),
            bind_addr: "0.0.0.0:8000".to_string(),
            rate_limit_per_minute: 100,
            api_keys: Vec::new(),
            cookie_store_path: PathBuf::from("/tmp/twitter_cookies.json"),
            reconcile_interval_secs: 60,
            poller: PollerSettings {
                interval_secs: 30,
                api_base_url: "http://127.0.0.1:8000".to_string(),
                feed_url: None,
                source: "twitter".to_string(),
            },
        }
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse `key` into `T`; values that do not parse or fail `valid` are
/// logged and the current value is kept.
fn override_from_env<T>(key: &str, target: &mut T, valid: impl Fn(&T) -> bool)
where
    T: FromStr + fmt::Display,
    T::Err: fmt::Display,
{
    let Some(raw) = env_var(key) else {
        return;
    };
    match raw.parse::<T>() {
        Ok(value) if valid(&value) => *target = value,
        Ok(value) => {
            tracing::warn!("Invalid {} value: {}, using default: {}", key, value, target);
        }
        Err(e) => {
            tracing::warn!("Failed to parse {} '{}': {}, using default: {}", key, raw, e, target);
        }
    }
}

fn override_bool(key: &str, target: &mut bool) {
    if let Some(raw) = env_var(key) {
        match parse_bool(&raw) {
            Some(value) => *target = value,
            None => tracing::warn!("Invalid {} value: {}, using default: {}", key, raw, target),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// Only an unknown `BROKER` is an error; every other bad value falls back
    /// to its default with a warning.
    pub fn from_env() -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(broker) = env_var("BROKER") {
            config.broker = broker.parse()?;
        }

        override_bool("AUTO_TRADE_ENABLED", &mut config.router.auto_trade_enabled);
        override_from_env(
            "MIN_CONFIDENCE_THRESHOLD",
            &mut config.router.min_confidence,
            |v| (0.0..=1.0).contains(v),
        );
        override_from_env("DEFAULT_ORDER_QTY", &mut config.router.default_order_qty, |v| {
            *v > 0.0 && v.is_finite()
        });
        override_from_env(
            "MAX_POSITION_PER_TICKER",
            &mut config.max_position_per_ticker,
            |v| *v >= 0.0 && v.is_finite(),
        );
        override_from_env("PAPER_DEFAULT_PRICE", &mut config.paper_default_price, |v| {
            *v > 0.0 && v.is_finite()
        });

        let mut timeout_ms = config.broker_timeout.as_millis() as u64;
        override_from_env("BROKER_TIMEOUT_MS", &mut timeout_ms, |v| {
            (100..=120_000).contains(v)
        });
        config.broker_timeout = Duration::from_millis(timeout_ms);

        // LLM
        if let Some(provider) = env_var("LLM_PROVIDER") {
            config.llm.provider = provider.to_lowercase();
        }
        config.llm.api_key = optional_secret("OPENAI_API_KEY");
        if let Some(model) = env_var("OPENAI_MODEL") {
            config.llm.model = model;
        }
        if let Some(base_url) = env_var("OPENAI_BASE_URL") {
            config.llm.base_url = base_url;
        }

        // Alpaca
        config.alpaca.api_key = optional_secret("ALPACA_API_KEY");
        config.alpaca.secret_key = optional_secret("ALPACA_SECRET_KEY");
        override_bool("ALPACA_PAPER", &mut config.alpaca.paper);
        config.alpaca.account_number = env_var("ALPACA_ACCOUNT_NUMBER");
        config.alpaca.base_url = env_var("ALPACA_BASE_URL");

        // Moomoo
        if let Some(host) = env_var("MOOMOO_OPEND_HOST") {
            config.moomoo.host = host;
        }
        override_from_env("MOOMOO_OPEND_PORT", &mut config.moomoo.port, |v| *v > 0);
        if let Some(env) = env_var("MOOMOO_TRD_ENV") {
            match env.parse::<TrdEnv>() {
                Ok(value) => config.moomoo.trd_env = value,
                Err(e) => tracing::warn!("{}, using default: {}", e, config.moomoo.trd_env),
            }
        }
        if let Some(market) = env_var("MOOMOO_MARKET") {
            match market.parse::<TrdMarket>() {
                Ok(value) => config.moomoo.market = value,
                Err(e) => tracing::warn!("{}, using default: {:?}", e, config.moomoo.market),
            }
        }
        if let Some(account) = env_var("MOOMOO_ACCOUNT_ID") {
            match account.parse::<u64>() {
                Ok(id) => config.moomoo.account_id = Some(id),
                Err(e) => tracing::warn!("Failed to parse MOOMOO_ACCOUNT_ID '{}': {}", account, e),
            }
        }
        config.moomoo.timeout = config.broker_timeout;

        // Service
        config.database = DatabaseConfig::from_env();
        if let Some(bind_addr) = env_var("BIND_ADDR") {
            config.bind_addr = bind_addr;
        }
        override_from_env(
            "RATE_LIMIT_PER_MINUTE",
            &mut config.rate_limit_per_minute,
            |v| *v > 0,
        );
        if let Some(keys) = env_var("API_KEYS") {
            config.api_keys = keys
                .split(',')
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect();
        }
        if let Some(path) = env_var("COOKIE_STORE_PATH") {
            config.cookie_store_path = PathBuf::from(path);
        }
        override_from_env(
            "RECONCILE_INTERVAL_SECS",
            &mut config.reconcile_interval_secs,
            |_| true,
        );

        // Poller
        override_from_env("POLL_INTERVAL_SECS", &mut config.poller.interval_secs, |v| {
            *v >= 1
        });
        if let Some(url) = env_var("API_BASE_URL") {
            config.poller.api_base_url = url;
        }
        config.poller.feed_url = env_var("FEED_URL");
        if let Some(source) = env_var("POLL_SOURCE") {
            config.poller.source = source;
        }

        Ok(config)
    }
}
