//! Funnel statistics updates from the bot and mini-app

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use coursefunnel_billing::{FunnelStage, UserStatistics};
use serde::{Deserialize, Serialize};

use super::Payload;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatisticsRequest {
    pub user_id: Option<i64>,
    pub stage: Option<String>,
    pub value: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatisticsResponse {
    pub message: &'static str,
    pub updated_stats: UserStatistics,
}

pub async fn update_user_statistics(
    State(state): State<AppState>,
    Payload(request): Payload<UpdateStatisticsRequest>,
) -> ApiResult<(StatusCode, Json<UpdateStatisticsResponse>)> {
    let (Some(user_id), Some(stage), Some(value)) = (request.user_id, request.stage, request.value)
    else {
        tracing::warn!("Missing required parameters: userId, stage, or value");
        return Err(ApiError::BadRequest("Missing required parameters".into()));
    };

    let stage: FunnelStage = stage.parse().map_err(|_| {
        tracing::warn!(stage = %stage, "Invalid stage");
        ApiError::BadRequest("Invalid stage".into())
    })?;
    if stage == FunnelStage::CoursePaid {
        tracing::warn!(user_id, "Rejected client write to coursePaid");
        return Err(ApiError::BadRequest(
            "coursePaid is recorded by payment confirmation only".into(),
        ));
    }

    if state.billing.directory.find_by_id(user_id).await?.is_none() {
        tracing::warn!(user_id, "Statistics update for unknown user");
        return Err(ApiError::NotFound("User not found".into()));
    }

    let update = state
        .billing
        .ledger
        .record_stage(user_id, stage, value)
        .await?;

    let (status, message) = if update.created {
        tracing::info!(user_id, stage = %stage, "User statistics created");
        (StatusCode::CREATED, "User statistics created successfully")
    } else {
        tracing::info!(user_id, stage = %stage, "User statistics updated");
        (StatusCode::OK, "User statistics updated successfully")
    };

    Ok((
        status,
        Json(UpdateStatisticsResponse {
            message,
            updated_stats: update.statistics,
        }),
    ))
}
