//! HTTP routes

mod extract;
mod payments;
mod statistics;
mod users;

use std::time::Duration;

use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::state::AppState;

pub use extract::Payload;

/// `{"message": ...}` response body
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

impl MessageResponse {
    pub fn new(message: &'static str) -> Json<Self> {
        Json(Self { message })
    }
}

/// Build the application router
pub fn create_router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/endpoint-for-validate-payment",
            post(payments::validate_payment),
        )
        .route(
            "/api/generate-payment-process",
            post(payments::generate_payment_process),
        )
        .route("/api/user-controller", post(users::register_user))
        .route(
            "/api/update-user-statistics",
            post(statistics::update_user_statistics),
        )
        // Path used by deployed bot clients
        .route(
            "/api/update-user-statictics",
            post(statistics::update_user_statistics),
        )
        .layer(middleware::from_fn_with_state(
            request_timeout,
            request_deadline,
        ))
        .with_state(state)
}

/// Total latency budget per request. An expired request gets the usual
/// `{"message"}` 500 body; work the handler already spawned keeps running.
async fn request_deadline(
    State(limit): State<Duration>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_owned();
    match tokio::time::timeout(limit, next.run(request)).await {
        Ok(response) => response,
        Err(_) => ApiError::Internal(format!("{} timed out after {:?}", path, limit))
            .into_response(),
    }
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
