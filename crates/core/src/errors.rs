use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::lifecycle::machine::IntentTransitionError;
use crate::store::StoreError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error(transparent)]
    InvalidTransition(#[from] IntentTransitionError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("{entity} not found: {detail}")]
    NotFound { entity: &'static str, detail: String },
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("intent {intent_id} expired at {expired_at}")]
    Expired { intent_id: String, expired_at: DateTime<Utc> },
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl ApplicationError {
    pub fn not_found(entity: &'static str, detail: impl Into<String>) -> Self {
        Self::NotFound { entity, detail: detail.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Domain(DomainError::Validation(message.into()))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Domain(DomainError::Validation(_)) => ErrorKind::Validation,
            // A transition out of a terminal state reads the same as a missing
            // pending intent to the caller.
            Self::Domain(DomainError::InvalidTransition(_)) => ErrorKind::NotFound,
            Self::Domain(DomainError::InvariantViolation(_)) => ErrorKind::Internal,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::AccessDenied(_) => ErrorKind::AccessDenied,
            Self::Expired { .. } => ErrorKind::Expired,
            Self::Persistence(_) | Self::Configuration(_) => ErrorKind::Internal,
        }
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let mut mapped = InterfaceError::from(self);
        mapped.correlation_id = correlation_id.into();
        mapped
    }
}

impl From<IntentTransitionError> for ApplicationError {
    fn from(value: IntentTransitionError) -> Self {
        Self::Domain(DomainError::InvalidTransition(value))
    }
}

impl From<StoreError> for ApplicationError {
    fn from(value: StoreError) -> Self {
        Self::Persistence(value.to_string())
    }
}

/// Stable, machine-readable error classification shared by every surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    AccessDenied,
    Expired,
    Authentication,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation_error",
            Self::NotFound => "not_found",
            Self::AccessDenied => "access_denied",
            Self::Expired => "expired",
            Self::Authentication => "authentication_error",
            Self::Internal => "internal",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation | Self::Expired => 400,
            Self::Authentication => 401,
            Self::AccessDenied => 403,
            Self::NotFound => 404,
            Self::Internal => 500,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{}: {message}", kind.as_str())]
pub struct InterfaceError {
    pub kind: ErrorKind,
    pub message: String,
    pub correlation_id: String,
}

impl InterfaceError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), correlation_id: "unassigned".to_owned() }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, message)
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    /// Message safe to hand to clients. Internal failures never expose their
    /// underlying detail.
    pub fn user_message(&self) -> &str {
        match self.kind {
            ErrorKind::Internal => "An unexpected internal error occurred.",
            _ => &self.message,
        }
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let kind = value.kind();
        let message = match &value {
            ApplicationError::Domain(DomainError::Validation(message)) => message.clone(),
            ApplicationError::Domain(DomainError::InvalidTransition(_)) => {
                "intent not found or not pending".to_owned()
            }
            ApplicationError::NotFound { entity, .. } => format!("{entity} not found"),
            ApplicationError::AccessDenied(message) => message.clone(),
            ApplicationError::Expired { .. } => "intent has expired".to_owned(),
            other => other.to_string(),
        };
        Self::new(kind, message)
    }
}
