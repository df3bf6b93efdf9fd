use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use flux_core::{TransactionDetail, TransactionId, TransactionSummary};
use serde::{Deserialize, Serialize};

use super::{require_user, ApiError, AppState, CorrelationId};
use crate::auth::Authenticated;

const DEFAULT_PAGE_SIZE: u32 = 50;
const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub limit: u32,
    pub offset: u32,
    /// Rows on this page.
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct TransactionHistory {
    pub transactions: Vec<TransactionSummary>,
    pub pagination: Pagination,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/transactions", get(list_transactions))
        .route("/v1/transactions/{transaction_id}", get(transaction_detail))
}

async fn list_transactions(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    CorrelationId(correlation_id): CorrelationId,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<TransactionHistory>, ApiError> {
    let user_id = require_user(&principal, &correlation_id)?;
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0);

    let transactions = state
        .lifecycle
        .ledger()
        .list_transactions(&user_id, limit, offset)
        .await
        .map_err(|error| ApiError::from_application(error, &correlation_id))?;
    let total = transactions.len();
    Ok(Json(TransactionHistory { transactions, pagination: Pagination { limit, offset, total } }))
}

async fn transaction_detail(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    CorrelationId(correlation_id): CorrelationId,
    Path(transaction_id): Path<String>,
) -> Result<Json<TransactionDetail>, ApiError> {
    let user_id = require_user(&principal, &correlation_id)?;
    let detail = state
        .lifecycle
        .ledger()
        .transaction_detail(&user_id, &TransactionId(transaction_id))
        .await
        .map_err(|error| ApiError::from_application(error, &correlation_id))?;
    Ok(Json(detail))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::{json, Value};

    use crate::api::tests::{test_app, TestApp, AGENT_KEY, USER_TOKEN};

    async fn approved_purchase(app: &TestApp, description: &str, amount_cents: i64) -> Value {
        let (_, created) = app
            .send(
                "POST",
                "/v1/intents",
                Some(AGENT_KEY),
                Some(json!({
                    "user_id": "user-demo",
                    "description": description,
                    "merchant_name": "Rail Co",
                    "merchant_category": "travel",
                    "amount_cents": amount_cents,
                })),
            )
            .await;
        let intent_id = created["intent_id"].as_str().expect("intent id");
        let (status, approved) = app
            .send(
                "POST",
                &format!("/v1/intents/{intent_id}/approve"),
                Some(USER_TOKEN),
                Some(json!({"payment_method_id": "pm_card_visa"})),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{approved}");
        approved
    }

    #[tokio::test]
    async fn history_pages_newest_first() {
        let app = test_app().await;
        approved_purchase(&app, "Morning train", 2_400).await;
        app.clock.advance(chrono::Duration::seconds(5));
        approved_purchase(&app, "Evening train", 3_100).await;

        let (status, body) = app.send("GET", "/v1/transactions?limit=1", Some(USER_TOKEN), None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pagination"], json!({"limit": 1, "offset": 0, "total": 1}));
        assert_eq!(body["transactions"][0]["description"], "Evening train");

        let (_, body) = app.send("GET", "/v1/transactions?limit=1&offset=1", Some(USER_TOKEN), None).await;
        assert_eq!(body["transactions"][0]["description"], "Morning train");
    }

    #[tokio::test]
    async fn oversized_limit_is_clamped() {
        let app = test_app().await;

        let (status, body) = app.send("GET", "/v1/transactions?limit=5000", Some(USER_TOKEN), None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pagination"]["limit"], 100);
        assert_eq!(body["transactions"], json!([]));
    }

    #[tokio::test]
    async fn detail_includes_intent_agent_and_trail() {
        let app = test_app().await;
        let approved = approved_purchase(&app, "Airport shuttle", 4_500).await;
        let transaction_id = approved["transaction_id"].as_str().expect("transaction id");

        let (status, body) =
            app.send("GET", &format!("/v1/transactions/{transaction_id}"), Some(USER_TOKEN), None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["transaction"]["amount_cents"], 4_500);
        assert_eq!(body["intent"]["status"], "approved");
        assert_eq!(body["agent"]["name"], "TravelGPT");
        let trail = body["audit_trail"].as_array().expect("trail");
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0]["action"], "transaction.created");
    }

    #[tokio::test]
    async fn unknown_transaction_is_not_found() {
        let app = test_app().await;

        let (status, body) = app.send("GET", "/v1/transactions/missing", Some(USER_TOKEN), None).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["message"], "transaction not found");
    }
}
