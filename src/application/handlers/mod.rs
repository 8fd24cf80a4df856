//! HTTP handlers and the error-to-status mapping they share.

pub mod analytics;
pub mod credentials;
pub mod health;
pub mod orders;
pub mod portfolio;
pub mod signals;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::application::services::credential_store::CredentialError;
use crate::domain::errors::{BacktestError, BrokerError, IngestError, OrderError};
use crate::persistence::DatabaseError;

/// Default and maximum page size for listing endpoints
pub const DEFAULT_LIMIT: i64 = 100;
pub const MAX_LIMIT: i64 = 1000;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
}

impl ListQuery {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Backtest(#[from] BacktestError),

    #[error(transparent)]
    Storage(#[from] DatabaseError),

    #[error(transparent)]
    Credentials(#[from] CredentialError),
}

impl From<OrderError> for ApiError {
    fn from(e: OrderError) -> Self {
        match e {
            OrderError::Broker(e) => ApiError::Broker(e),
            OrderError::Storage(e) => ApiError::Storage(e),
        }
    }
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Ingest(IngestError::Extraction) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "ERR_NO_SIGNAL")
            }
            ApiError::Ingest(IngestError::Storage(_)) | ApiError::Storage(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "ERR_STORAGE")
            }
            ApiError::Broker(e) => {
                let status = match e {
                    BrokerError::Validation(_) => StatusCode::BAD_REQUEST,
                    BrokerError::Connection(_) | BrokerError::Exchange(_) => {
                        StatusCode::BAD_GATEWAY
                    }
                    BrokerError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.error_code())
            }
            ApiError::Backtest(BacktestError::InvalidWindow(_))
            | ApiError::Backtest(BacktestError::InvalidDate(_)) => {
                (StatusCode::BAD_REQUEST, "ERR_INVALID_BACKTEST")
            }
            ApiError::Backtest(BacktestError::Storage(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "ERR_STORAGE")
            }
            ApiError::Credentials(CredentialError::Invalid(_)) => {
                (StatusCode::BAD_REQUEST, "ERR_INVALID_CREDENTIALS")
            }
            ApiError::Credentials(_) => (StatusCode::INTERNAL_SERVER_ERROR, "ERR_CREDENTIAL_STORE"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            error!("Request failed [{}]: {}", code, self);
        }
        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ApiError::Ingest(IngestError::Extraction), StatusCode::UNPROCESSABLE_ENTITY),
            (
                ApiError::Broker(BrokerError::Validation("x".into())),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::Broker(BrokerError::Connection("x".into())),
                StatusCode::BAD_GATEWAY,
            ),
            (
                ApiError::Broker(BrokerError::Exchange("x".into())),
                StatusCode::BAD_GATEWAY,
            ),
            (
                ApiError::Broker(BrokerError::Configuration("x".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                ApiError::Backtest(BacktestError::InvalidWindow("x".into())),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::Storage(DatabaseError::QueryError("x".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                ApiError::Credentials(CredentialError::Invalid("x".into())),
                StatusCode::BAD_REQUEST,
            ),
        ];
        for (error, expected) in cases {
            assert_eq!(error.status_and_code().0, expected, "{}", error);
        }
    }

    #[test]
    fn test_list_limit_clamped() {
        assert_eq!(ListQuery { limit: None }.limit(), DEFAULT_LIMIT);
        assert_eq!(ListQuery { limit: Some(0) }.limit(), 1);
        assert_eq!(ListQuery { limit: Some(5000) }.limit(), MAX_LIMIT);
    }
}
