//! Bearer credential verification.
//!
//! Agents present API keys carrying the `flux_live_` prefix; anything else is
//! treated as a user API token. Both are stored as SHA-256 digests, so the
//! lookup hashes the presented value and never compares plaintext.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use flux_core::ledger::sha256_hex;
use flux_core::{ErrorKind, InterfaceError, Principal};
use flux_db::SqlStore;
use thiserror::Error;
use tracing::warn;

use crate::api::{correlation_id, ApiError, AppState};

pub const AGENT_KEY_PREFIX: &str = "flux_live_";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("No authorization header provided")]
    MissingCredentials,
    #[error("Authorization header must use the Bearer scheme")]
    MalformedHeader,
    #[error("Invalid agent API key")]
    InvalidAgentKey,
    #[error("Invalid user token")]
    InvalidUserToken,
    #[error("credential lookup failed: {0}")]
    Lookup(String),
}

impl AuthError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let kind = match self {
            Self::Lookup(_) => ErrorKind::Internal,
            _ => ErrorKind::Authentication,
        };
        InterfaceError::new(kind, self.to_string()).with_correlation_id(correlation_id)
    }
}

/// Extracts the token from an `Authorization: Bearer <token>` value.
pub fn bearer_token(header: &str) -> Result<&str, AuthError> {
    let token = header.strip_prefix("Bearer ").ok_or(AuthError::MalformedHeader)?.trim();
    if token.is_empty() {
        return Err(AuthError::MalformedHeader);
    }
    Ok(token)
}

#[derive(Clone)]
pub struct Authenticator {
    store: Arc<SqlStore>,
}

impl Authenticator {
    pub fn new(store: Arc<SqlStore>) -> Self {
        Self { store }
    }

    pub async fn authenticate_header(&self, header: Option<&str>) -> Result<Principal, AuthError> {
        let header = header.ok_or(AuthError::MissingCredentials)?;
        self.authenticate_token(bearer_token(header)?).await
    }

    pub async fn authenticate_token(&self, token: &str) -> Result<Principal, AuthError> {
        let digest = sha256_hex(token.as_bytes());

        if token.starts_with(AGENT_KEY_PREFIX) {
            let agent = self
                .store
                .find_agent_by_key_hash(&digest)
                .await
                .map_err(|error| AuthError::Lookup(error.to_string()))?
                .ok_or(AuthError::InvalidAgentKey)?;
            return Ok(Principal::Agent(agent.id));
        }

        let user = self
            .store
            .find_user_by_token_hash(&digest)
            .await
            .map_err(|error| AuthError::Lookup(error.to_string()))?
            .ok_or(AuthError::InvalidUserToken)?;
        Ok(Principal::User(user.id))
    }
}

/// The verified caller of a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Authenticated(pub Principal);

impl FromRequestParts<AppState> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let correlation_id = correlation_id(&parts.headers);
        let header = parts.headers.get(AUTHORIZATION).and_then(|value| value.to_str().ok());

        match state.authenticator.authenticate_header(header).await {
            Ok(principal) => Ok(Self(principal)),
            Err(error) => {
                warn!(
                    event_name = "http.auth.rejected",
                    correlation_id = %correlation_id,
                    reason = %error,
                    "request authentication failed"
                );
                Err(ApiError(error.into_interface(correlation_id)))
            }
        }
    }
}
