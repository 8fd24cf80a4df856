use thiserror::Error;

use crate::persistence::DatabaseError;

/// Errors raised by broker adapters.
///
/// Callers decide whether to propagate or absorb: a manual order surfaces
/// these to the client, the automatic leg of the router logs them.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BrokerError {
    /// Bad side / order type / time-in-force, or a limit order without price.
    /// Raised before any network call.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Transport failure or timeout talking to the broker.
    #[error("Broker connection error: {0}")]
    Connection(String),

    /// The broker answered but refused or failed the request.
    #[error("Broker exchange error: {0}")]
    Exchange(String),

    /// Unusable broker setup (unknown backend, unresolvable account).
    #[error("Broker configuration error: {0}")]
    Configuration(String),
}

impl BrokerError {
    /// Short error code for logs.
    pub fn error_code(&self) -> &'static str {
        match self {
            BrokerError::Validation(_) => "ERR_VALIDATION",
            BrokerError::Connection(_) => "ERR_BROKER_CONNECTION",
            BrokerError::Exchange(_) => "ERR_BROKER_EXCHANGE",
            BrokerError::Configuration(_) => "ERR_BROKER_CONFIGURATION",
        }
    }
}

impl From<DatabaseError> for BrokerError {
    fn from(e: DatabaseError) -> Self {
        BrokerError::Exchange(format!("paper ledger: {}", e))
    }
}

/// Result type for every broker adapter call
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Ingestion failures. A duplicate is not an error.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("No trade signal could be extracted from the message")]
    Extraction,

    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),
}

/// Explicit (manual) order placement failures. Both kinds reach the caller.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),
}

#[derive(Debug, Error)]
pub enum BacktestError {
    #[error("Invalid window: {0}")]
    InvalidWindow(String),

    #[error("Invalid date '{0}': expected YYYY-MM-DD or RFC 3339")]
    InvalidDate(String),

    #[error("Storage error: {0}")]
    Storage(#[from] DatabaseError),
}

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("Value must be finite")]
    MustBeFinite,
}

impl From<ValidationError> for BrokerError {
    fn from(e: ValidationError) -> Self {
        BrokerError::Validation(e.to_string())
    }
}
