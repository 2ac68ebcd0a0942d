use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    /// The bank transfer has not shown up yet. The buyer should retry shortly.
    #[error("{0}")]
    PaymentPending(String),

    #[error("{0}")]
    OutOfStock(String),

    #[error("{0}")]
    TooManyRequests(String),

    /// An external service (bank statement, email provider, mirror) failed.
    #[error("{0}")]
    Upstream(String),

    #[error("{0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    status: &'static str,
    message: String,
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) | AppError::PaymentPending(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::OutOfStock(_) => StatusCode::CONFLICT,
            AppError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_)
            | AppError::Database(_)
            | AppError::Pool(_)
            | AppError::Io(_)
            | AppError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Storage-layer details stay in the logs
        let message = match &self {
            AppError::Database(_) | AppError::Pool(_) | AppError::Io(_) | AppError::Serialization(_) => {
                tracing::error!(error = %self, "Internal error");
                "Internal server error".to_string()
            }
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                msg.clone()
            }
            AppError::Upstream(msg) => {
                tracing::warn!(error = %msg, "Upstream failure reported to client");
                msg.clone()
            }
            other => other.to_string(),
        };

        (
            status,
            Json(ErrorBody {
                status: "error",
                message,
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_status_codes() {
        assert_eq!(
            AppError::PaymentPending("wait".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::OutOfStock("none".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::Upstream("bank down".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AppError::TooManyRequests("slow down".into()).status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }
}
