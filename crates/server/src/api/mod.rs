//! HTTP surface.
//!
//! - `POST  /v1/intents`                      agent submits a purchase intent
//! - `GET   /v1/intents/{id}`                 owner or submitting agent reads it
//! - `POST  /v1/intents/{id}/approve`         owner approves with a payment method
//! - `POST  /v1/intents/{id}/reject`          owner rejects
//! - `GET   /v1/users/profile`                profile with guardrails
//! - `POST  /v1/users/guardrails`             create a guardrail
//! - `PATCH /v1/users/guardrails/{id}`        toggle a guardrail
//! - `GET   /v1/users/intents/pending`        pending intents, newest first
//! - `GET   /v1/transactions`                 transaction history
//! - `GET   /v1/transactions/{id}`            transaction with intent and audit trail
//! - `GET   /v1/notifications/ws`             notification stream
//! - `GET   /health`

use std::sync::Arc;

use axum::extract::{FromRequest, FromRequestParts, Request};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use flux_core::{
    AgentId, ApplicationError, ErrorKind, InterfaceError, LifecycleService, NotificationHub,
    Principal, UserId,
};
use flux_db::{DbPool, SqlStore};
use serde::de::DeserializeOwned;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, warn};
use uuid::Uuid;

use crate::auth::Authenticator;
use crate::health;

pub mod intents;
pub mod notifications;
pub mod transactions;
pub mod users;

pub const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<LifecycleService<SqlStore>>,
    pub hub: Arc<NotificationHub>,
    pub authenticator: Authenticator,
}

pub fn router(state: AppState, db_pool: DbPool, allowed_origin: &str) -> Router {
    Router::new()
        .merge(intents::routes())
        .merge(users::routes())
        .merge(transactions::routes())
        .merge(notifications::routes())
        .with_state(state)
        .merge(health::router(db_pool))
        .layer(middleware::from_fn(assign_correlation_id))
        .layer(cors_layer(allowed_origin))
}

fn cors_layer(allowed_origin: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, HeaderName::from_static(CORRELATION_HEADER)]);

    if allowed_origin == "*" {
        return layer.allow_origin(Any);
    }
    match HeaderValue::from_str(allowed_origin) {
        Ok(origin) => layer.allow_origin(origin),
        Err(error) => {
            warn!(
                event_name = "http.cors.invalid_origin",
                allowed_origin,
                error = %error,
                "allowed origin is not a valid header value; cross-origin requests are refused"
            );
            layer
        }
    }
}

/// Ensures every request carries a correlation id and echoes it back.
async fn assign_correlation_id(mut request: Request, next: Next) -> Response {
    let correlation_id = request
        .headers()
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let header_value = HeaderValue::from_str(&correlation_id).ok();

    if let Some(value) = header_value.clone() {
        request.headers_mut().insert(CORRELATION_HEADER, value);
    }
    let mut response = next.run(request).await;
    if let Some(value) = header_value {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    response
}

pub fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .unwrap_or_else(|| "unassigned".to_owned())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CorrelationId(pub String);

impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(correlation_id(&parts.headers)))
    }
}

/// JSON body whose parse failures surface as `validation_error`.
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        let correlation_id = correlation_id(request.headers());
        match Json::<T>::from_request(request, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(ApiError(
                InterfaceError::new(ErrorKind::Validation, rejection.body_text())
                    .with_correlation_id(correlation_id),
            )),
        }
    }
}

#[derive(Debug)]
pub struct ApiError(pub InterfaceError);

impl ApiError {
    pub fn from_application(error: ApplicationError, correlation_id: &str) -> Self {
        Self(error.into_interface(correlation_id))
    }

    fn access_denied(message: &str, correlation_id: &str) -> Self {
        Self(InterfaceError::new(ErrorKind::AccessDenied, message).with_correlation_id(correlation_id))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error = self.0;
        let status =
            StatusCode::from_u16(error.kind.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if error.kind == ErrorKind::Internal {
            error!(
                event_name = "http.request.failed",
                correlation_id = %error.correlation_id,
                error = %error.message,
                "request failed with internal error"
            );
        }

        let body = json!({
            "error": {
                "kind": error.kind.as_str(),
                "message": error.user_message(),
                "correlation_id": error.correlation_id,
            }
        });
        (status, Json(body)).into_response()
    }
}

pub fn require_user(principal: &Principal, correlation_id: &str) -> Result<UserId, ApiError> {
    principal
        .as_user()
        .cloned()
        .ok_or_else(|| ApiError::access_denied("user credentials required", correlation_id))
}

pub fn require_agent(principal: &Principal, correlation_id: &str) -> Result<AgentId, ApiError> {
    principal
        .as_agent()
        .cloned()
        .ok_or_else(|| ApiError::access_denied("agent credentials required", correlation_id))
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use chrono::{TimeZone, Utc};
    use flux_core::{
        AuditSigner, InMemoryAuditSink, LifecycleService, ManualClock, NotificationHub,
        NotificationSink,
    };
    use flux_db::{connect_with_settings, migrations, DbPool, SeedDataset, SqlStore};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::{router, AppState, CORRELATION_HEADER};
    use crate::auth::Authenticator;

    pub(crate) const AGENT_KEY: &str = "flux_live_test_agent_123";
    pub(crate) const USER_TOKEN: &str = "flux_user_demo_token";

    pub(crate) struct TestApp {
        pub state: AppState,
        pub pool: DbPool,
        pub clock: ManualClock,
    }

    impl TestApp {
        pub fn router(&self) -> Router {
            router(self.state.clone(), self.pool.clone(), "http://localhost:3000")
        }

        pub async fn send(&self, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
            let mut request = Request::builder().method(method).uri(uri);
            if let Some(token) = token {
                request = request.header("authorization", format!("Bearer {token}"));
            }
            let request = match body {
                Some(body) => request
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .expect("request"),
                None => request.body(Body::empty()).expect("request"),
            };

            let response = self.router().oneshot(request).await.expect("response");
            let status = response.status();
            let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
            let json = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).expect("json body") };
            (status, json)
        }
    }

    pub(crate) async fn test_app() -> TestApp {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");
        SeedDataset::load(&pool).await.expect("seed");

        let store = Arc::new(SqlStore::new(pool.clone()));
        let hub = Arc::new(NotificationHub::new());
        let sink: Arc<dyn NotificationSink> = hub.clone();
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).single().expect("time"));
        let lifecycle = Arc::new(LifecycleService::new(
            Arc::clone(&store),
            AuditSigner::new("http-test-signing-key"),
            sink,
            Arc::new(InMemoryAuditSink::default()),
            Arc::new(clock.clone()),
        ));

        TestApp { state: AppState { lifecycle, hub, authenticator: Authenticator::new(store) }, pool, clock }
    }

    #[tokio::test]
    async fn missing_credentials_are_rejected_with_error_envelope() {
        let app = test_app().await;

        let (status, body) = app.send("GET", "/v1/users/profile", None, None).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["kind"], "authentication_error");
        assert_eq!(body["error"]["message"], "No authorization header provided");
        assert!(body["error"]["correlation_id"].as_str().is_some_and(|id| !id.is_empty()));
    }

    #[tokio::test]
    async fn correlation_id_is_echoed() {
        let app = test_app().await;
        let request = Request::builder()
            .uri("/v1/users/profile")
            .header(CORRELATION_HEADER, "req-abc")
            .body(Body::empty())
            .expect("request");

        let response = app.router().oneshot(request).await.expect("response");

        assert_eq!(response.headers().get(CORRELATION_HEADER).and_then(|v| v.to_str().ok()), Some("req-abc"));
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let body: Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(body["error"]["correlation_id"], "req-abc");
    }

    #[tokio::test]
    async fn malformed_json_is_a_validation_error() {
        let app = test_app().await;
        let request = Request::builder()
            .method("POST")
            .uri("/v1/intents")
            .header("authorization", format!("Bearer {AGENT_KEY}"))
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .expect("request");

        let response = app.router().oneshot(request).await.expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
