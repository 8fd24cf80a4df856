//! Persistence Layer
//!
//! SQLite storage for the signal pipeline, via sqlx.
//!
//! # Database Schema
//!
//! ## Signals Table
//! - message_id: idempotency key, UNIQUE
//! - alt_id / source_url: secondary dedup keys
//! - author, channel_id, source, content
//! - ticker, side ("BUY" or "SELL"), confidence, timeframe, stop, take
//!
//! ## Orders Table
//! - broker, ticker, side, qty, price
//! - status: canonical order status
//! - reason, broker_order_id, signal_id
//!
//! ## Positions Table
//! - ticker (UNIQUE), signed qty, avg_price. A flat position has no row.
//!
//! ## Executions Table
//! - Append-only fills: order_id, ticker, side, qty, price, executed_at
//!
//! ## PnL Table
//! - date (YYYY-MM-DD, UNIQUE), realized, unrealized
//!
//! ## Market Bars Table
//! - symbol, timeframe, ts (UNIQUE together), OHLCV

pub mod models;
pub mod repository;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::ConnectOptions;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Database connection pool
pub type DbPool = SqlitePool;

/// Database initialization error
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Query error: {0}")]
    QueryError(String),
}

/// Initialize the database connection pool with default settings
///
/// # Arguments
/// - `database_url`: e.g. "sqlite://data/signals.db" or "sqlite::memory:"
///
/// # Errors
/// Returns error if database connection fails or migrations fail
pub async fn init_database(database_url: &str) -> Result<DbPool, DatabaseError> {
    let config = DatabaseConfig {
        url: database_url.to_string(),
        ..DatabaseConfig::default()
    };
    connect(&config).await
}

/// Open the pool described by `config` and run migrations.
pub async fn connect(config: &DatabaseConfig) -> Result<DbPool, DatabaseError> {
    info!("Initializing database: {}", config.url);

    // Ensure data directory exists
    if let Some(db_path) = config.url.strip_prefix("sqlite://") {
        if let Some(parent) = Path::new(db_path).parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::ConnectionError(sqlx::Error::Configuration(Box::new(e)))
            })?;
        }
    }

    let mut options = SqliteConnectOptions::from_str(&config.url)?
        .create_if_missing(true)
        .foreign_keys(true);
    options = if config.log_queries {
        options.log_statements(tracing::log::LevelFilter::Debug)
    } else {
        options.disable_statement_logging()
    };

    // Every connection to ":memory:" is its own database, so pin a single one.
    let pool = if config.is_in_memory() {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?
    } else {
        SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?
    };

    run_migrations(&pool).await?;

    info!("✓ Database initialized successfully");

    Ok(pool)
}

async fn migrate(pool: &DbPool, what: &str, sql: &str) -> Result<(), DatabaseError> {
    sqlx::query(sql)
        .execute(pool)
        .await
        .map_err(|e| DatabaseError::MigrationError(format!("Failed to create {}: {}", what, e)))?;
    Ok(())
}

/// Run database migrations. Idempotent.
async fn run_migrations(pool: &DbPool) -> Result<(), DatabaseError> {
    info!("Running database migrations...");

    migrate(
        pool,
        "signals table",
        r#"
        CREATE TABLE IF NOT EXISTS signals (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            message_id TEXT NOT NULL UNIQUE,
            alt_id TEXT,
            source_url TEXT,
            source TEXT NOT NULL,
            author TEXT NOT NULL,
            channel_id INTEGER NOT NULL DEFAULT 0,
            content TEXT NOT NULL,
            ticker TEXT NOT NULL,
            side TEXT NOT NULL CHECK(side IN ('BUY', 'SELL')),
            confidence REAL,
            timeframe TEXT,
            stop REAL,
            take REAL,
            created_at DATETIME NOT NULL
        )
        "#,
    )
    .await?;

    migrate(
        pool,
        "orders table",
        r#"
        CREATE TABLE IF NOT EXISTS orders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            broker TEXT NOT NULL,
            ticker TEXT NOT NULL,
            side TEXT NOT NULL CHECK(side IN ('BUY', 'SELL')),
            qty REAL NOT NULL,
            price REAL,
            status TEXT NOT NULL,
            reason TEXT,
            broker_order_id TEXT,
            signal_id INTEGER,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            FOREIGN KEY (signal_id) REFERENCES signals(id)
        )
        "#,
    )
    .await?;

    migrate(
        pool,
        "positions table",
        r#"
        CREATE TABLE IF NOT EXISTS positions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ticker TEXT NOT NULL UNIQUE,
            qty REAL NOT NULL,
            avg_price REAL NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
    .await?;

    migrate(
        pool,
        "executions table",
        r#"
        CREATE TABLE IF NOT EXISTS executions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            order_id INTEGER NOT NULL,
            ticker TEXT NOT NULL,
            side TEXT NOT NULL,
            qty REAL NOT NULL,
            price REAL NOT NULL,
            executed_at DATETIME NOT NULL,
            FOREIGN KEY (order_id) REFERENCES orders(id)
        )
        "#,
    )
    .await?;

    migrate(
        pool,
        "pnl table",
        r#"
        CREATE TABLE IF NOT EXISTS pnl (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            date TEXT NOT NULL UNIQUE,
            realized REAL NOT NULL DEFAULT 0.0,
            unrealized REAL NOT NULL DEFAULT 0.0
        )
        "#,
    )
    .await?;

    migrate(
        pool,
        "market_bars table",
        r#"
        CREATE TABLE IF NOT EXISTS market_bars (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            symbol TEXT NOT NULL,
            timeframe TEXT NOT NULL,
            ts DATETIME NOT NULL,
            open REAL NOT NULL,
            high REAL NOT NULL,
            low REAL NOT NULL,
            close REAL NOT NULL,
            volume REAL NOT NULL,
            UNIQUE(symbol, timeframe, ts)
        )
        "#,
    )
    .await?;

    // Create indexes for the dedup lookups and listing views
    for (name, sql) in [
        (
            "idx_signals_alt_id",
            "CREATE INDEX IF NOT EXISTS idx_signals_alt_id ON signals(alt_id)",
        ),
        (
            "idx_signals_source_url",
            "CREATE INDEX IF NOT EXISTS idx_signals_source_url ON signals(source_url)",
        ),
        (
            "idx_signals_created_at",
            "CREATE INDEX IF NOT EXISTS idx_signals_created_at ON signals(created_at)",
        ),
        (
            "idx_orders_status",
            "CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status)",
        ),
        (
            "idx_orders_signal_id",
            "CREATE INDEX IF NOT EXISTS idx_orders_signal_id ON orders(signal_id)",
        ),
    ] {
        migrate(pool, name, sql).await?;
    }

    info!("✓ Database migrations completed successfully");

    Ok(())
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database URL (e.g., "sqlite://data/signals.db")
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Enable query logging
    pub log_queries: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/signals.db".to_string(),
            max_connections: 5,
            log_queries: cfg!(debug_assertions),
        }
    }
}

impl DatabaseConfig {
    /// Load from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let url = std::env::var("DATABASE_URL").unwrap_or(defaults.url);

        let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_connections);

        let log_queries = std::env::var("DATABASE_LOG_QUERIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.log_queries);

        Self {
            url,
            max_connections,
            log_queries,
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_database_init() {
        let pool = init_database("sqlite::memory:").await;
        assert!(pool.is_ok());
    }

    #[tokio::test]
    async fn test_migrations() {
        let pool = init_database("sqlite::memory:").await.unwrap();

        let result: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('signals', 'orders', 'positions', 'executions', 'pnl', 'market_bars')"
        )
        .fetch_one(&pool)
        .await
        .unwrap();

        assert_eq!(result.0, 6);
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        assert!(run_migrations(&pool).await.is_ok());
    }

    #[test]
    fn test_database_config_default() {
        let config = DatabaseConfig::default();
        assert_eq!(config.url, "sqlite://data/signals.db");
        assert_eq!(config.max_connections, 5);
        assert!(!config.is_in_memory());
    }
}
