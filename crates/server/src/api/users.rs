use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use flux_core::{
    ApplicationError, Guardrail, GuardrailId, GuardrailRule, NewGuardrail, PendingIntentSummary,
    RuleType, UserProfile,
};
use serde::{Deserialize, Serialize};

use super::{require_user, ApiError, AppState, CorrelationId, JsonBody};
use crate::auth::Authenticated;

/// Wire shape for guardrail creation. `rule_config` may be omitted, in which
/// case the rule is stored with an empty config.
#[derive(Debug, Deserialize)]
pub struct CreateGuardrailRequest {
    pub rule_type: String,
    #[serde(default)]
    pub rule_config: serde_json::Value,
    #[serde(default)]
    pub auto_approve: bool,
    #[serde(default)]
    pub auto_approve_max_cents: i64,
}

impl CreateGuardrailRequest {
    fn into_new_guardrail(self) -> Result<NewGuardrail, ApplicationError> {
        let rule_type = RuleType::parse(&self.rule_type).ok_or_else(|| {
            ApplicationError::validation(format!("unsupported rule_type `{}`", self.rule_type))
        })?;
        let rule = GuardrailRule::from_parts(rule_type, self.rule_config)?;
        Ok(NewGuardrail {
            rule,
            auto_approve: self.auto_approve,
            auto_approve_max_cents: self.auto_approve_max_cents,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ToggleGuardrailRequest {
    pub is_active: bool,
}

#[derive(Debug, Serialize)]
pub struct PendingIntentsResponse {
    pub intents: Vec<PendingIntentSummary>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/users/profile", get(profile))
        .route("/v1/users/guardrails", post(create_guardrail))
        .route("/v1/users/guardrails/{guardrail_id}", patch(toggle_guardrail))
        .route("/v1/users/intents/pending", get(pending_intents))
}

async fn profile(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    CorrelationId(correlation_id): CorrelationId,
) -> Result<Json<UserProfile>, ApiError> {
    let user_id = require_user(&principal, &correlation_id)?;
    let profile = state
        .lifecycle
        .user_profile(&user_id)
        .await
        .map_err(|error| ApiError::from_application(error, &correlation_id))?;
    Ok(Json(profile))
}

async fn create_guardrail(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    CorrelationId(correlation_id): CorrelationId,
    JsonBody(request): JsonBody<CreateGuardrailRequest>,
) -> Result<(StatusCode, Json<Guardrail>), ApiError> {
    let user_id = require_user(&principal, &correlation_id)?;
    let new_guardrail = request
        .into_new_guardrail()
        .map_err(|error| ApiError::from_application(error, &correlation_id))?;
    let guardrail = state
        .lifecycle
        .create_guardrail(&user_id, new_guardrail, &correlation_id)
        .await
        .map_err(|error| ApiError::from_application(error, &correlation_id))?;
    Ok((StatusCode::CREATED, Json(guardrail)))
}

async fn toggle_guardrail(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    CorrelationId(correlation_id): CorrelationId,
    Path(guardrail_id): Path<String>,
    JsonBody(request): JsonBody<ToggleGuardrailRequest>,
) -> Result<Json<Guardrail>, ApiError> {
    let user_id = require_user(&principal, &correlation_id)?;
    let guardrail = state
        .lifecycle
        .set_guardrail_active(&user_id, &GuardrailId(guardrail_id), request.is_active, &correlation_id)
        .await
        .map_err(|error| ApiError::from_application(error, &correlation_id))?;
    Ok(Json(guardrail))
}

async fn pending_intents(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    CorrelationId(correlation_id): CorrelationId,
) -> Result<Json<PendingIntentsResponse>, ApiError> {
    let user_id = require_user(&principal, &correlation_id)?;
    let intents = state
        .lifecycle
        .list_pending_intents(&user_id)
        .await
        .map_err(|error| ApiError::from_application(error, &correlation_id))?;
    Ok(Json(PendingIntentsResponse { intents }))
}
