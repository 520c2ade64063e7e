//! User registration from the bot's /start flow

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use coursefunnel_billing::NewUser;
use serde::{Deserialize, Serialize};

use super::Payload;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterUserRequest {
    /// Messaging-platform id
    pub id: Option<i64>,
    pub username: Option<String>,
    pub first_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterUserResponse {
    pub id: i64,
}

pub async fn register_user(
    State(state): State<AppState>,
    Payload(request): Payload<RegisterUserRequest>,
) -> ApiResult<(StatusCode, Json<RegisterUserResponse>)> {
    let (Some(external_id), Some(first_name)) = (request.id, request.first_name) else {
        tracing::warn!("Missing required parameters: id or first_name");
        return Err(ApiError::BadRequest("Missing required parameters".into()));
    };

    let (user, created) = state
        .billing
        .directory
        .create(NewUser {
            external_id,
            display_name: first_name,
            handle: request.username.filter(|u| !u.is_empty()),
        })
        .await?;

    let status = if created {
        StatusCode::CREATED
    } else {
        tracing::debug!(external_id, user_id = user.id, "User already registered");
        StatusCode::OK
    };
    Ok((status, Json(RegisterUserResponse { id: user.id })))
}
