use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use flux_core::{
    ApprovedIntent, CreatedIntent, IntentId, IntentView, PurchaseDetails, RejectedIntent,
};
use serde::Deserialize;

use super::{require_agent, require_user, ApiError, AppState, CorrelationId, JsonBody};
use crate::auth::Authenticated;

#[derive(Debug, Default, Deserialize)]
pub struct ApproveRequest {
    #[serde(default)]
    pub payment_method_id: String,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/intents", post(create_intent))
        .route("/v1/intents/{intent_id}", get(read_intent))
        .route("/v1/intents/{intent_id}/approve", post(approve_intent))
        .route("/v1/intents/{intent_id}/reject", post(reject_intent))
}

async fn create_intent(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    CorrelationId(correlation_id): CorrelationId,
    JsonBody(details): JsonBody<PurchaseDetails>,
) -> Result<(StatusCode, Json<CreatedIntent>), ApiError> {
    let agent_id = require_agent(&principal, &correlation_id)?;
    let created = state
        .lifecycle
        .create_intent(&agent_id, details, &correlation_id)
        .await
        .map_err(|error| ApiError::from_application(error, &correlation_id))?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn read_intent(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    CorrelationId(correlation_id): CorrelationId,
    Path(intent_id): Path<String>,
) -> Result<Json<IntentView>, ApiError> {
    let view = state
        .lifecycle
        .read_intent(&IntentId(intent_id), &principal)
        .await
        .map_err(|error| ApiError::from_application(error, &correlation_id))?;
    Ok(Json(view))
}

async fn approve_intent(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    CorrelationId(correlation_id): CorrelationId,
    Path(intent_id): Path<String>,
    JsonBody(request): JsonBody<ApproveRequest>,
) -> Result<Json<ApprovedIntent>, ApiError> {
    let user_id = require_user(&principal, &correlation_id)?;
    let approved = state
        .lifecycle
        .approve_intent(&IntentId(intent_id), &user_id, &request.payment_method_id, &correlation_id)
        .await
        .map_err(|error| ApiError::from_application(error, &correlation_id))?;
    Ok(Json(approved))
}

async fn reject_intent(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    CorrelationId(correlation_id): CorrelationId,
    Path(intent_id): Path<String>,
) -> Result<Json<RejectedIntent>, ApiError> {
    let user_id = require_user(&principal, &correlation_id)?;
    let rejected = state
        .lifecycle
        .reject_intent(&IntentId(intent_id), &user_id, &correlation_id)
        .await
        .map_err(|error| ApiError::from_application(error, &correlation_id))?;
    Ok(Json(rejected))
}
