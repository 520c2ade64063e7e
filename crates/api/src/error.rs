//! API error type and HTTP mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use coursefunnel_billing::BillingError;
use serde_json::json;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    /// Details are logged, never returned
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::SignatureInvalid => ApiError::BadRequest("Hash validation failed".into()),
            BillingError::InvalidNotification(_) => {
                ApiError::BadRequest("Invalid notification".into())
            }
            BillingError::Validation(message) => ApiError::BadRequest(message),
            BillingError::PaymentNotFound(_) => ApiError::NotFound("Payment not found".into()),
            BillingError::UserNotFound(_) => ApiError::NotFound("User not found".into()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message.as_str()),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message.as_str()),
            ApiError::Internal(details) => {
                tracing::error!(error = %details, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        (status, Json(json!({ "message": message }))).into_response()
    }
}
