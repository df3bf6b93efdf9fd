use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::principal::{AgentId, UserId};
use crate::errors::DomainError;

/// Approval window applied to every intent at creation.
pub const APPROVAL_WINDOW_SECS: i64 = 5 * 60;

pub const MAX_DESCRIPTION_CHARS: usize = 1000;
pub const MAX_MERCHANT_NAME_CHARS: usize = 255;
pub const MAX_MERCHANT_CATEGORY_CHARS: usize = 100;
pub const DEFAULT_CURRENCY: &str = "USD";

pub fn approval_window() -> Duration {
    Duration::seconds(APPROVAL_WINDOW_SECS)
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntentId(pub String);

impl IntentId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for IntentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl IntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// One option the agent weighed before settling on the proposed purchase.
/// Fields beyond the two required ones are kept verbatim.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Alternative {
    pub description: String,
    pub rejection_reason: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Alternative {
    pub fn new(description: impl Into<String>, rejection_reason: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            rejection_reason: rejection_reason.into(),
            extra: serde_json::Map::new(),
        }
    }
}

/// Purchase proposal as submitted by an agent, before validation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PurchaseDetails {
    pub user_id: UserId,
    pub description: String,
    pub merchant_name: String,
    pub merchant_category: String,
    pub amount_cents: i64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub agent_reasoning: Option<String>,
    #[serde(default)]
    pub alternatives: Vec<Alternative>,
}

impl PurchaseDetails {
    /// Checks field bounds and normalizes the currency code.
    pub fn validate(mut self) -> Result<Self, DomainError> {
        require_text("description", &self.description, MAX_DESCRIPTION_CHARS)?;
        require_text("merchant_name", &self.merchant_name, MAX_MERCHANT_NAME_CHARS)?;
        require_text("merchant_category", &self.merchant_category, MAX_MERCHANT_CATEGORY_CHARS)?;

        if self.user_id.0.trim().is_empty() {
            return Err(DomainError::Validation("user_id is required".to_string()));
        }
        if self.amount_cents <= 0 {
            return Err(DomainError::Validation(format!(
                "amount_cents must be a positive integer, got {}",
                self.amount_cents
            )));
        }

        let currency = match self.currency.take() {
            Some(code) => normalize_currency(&code)?,
            None => DEFAULT_CURRENCY.to_string(),
        };
        self.currency = Some(currency);

        for (index, alternative) in self.alternatives.iter().enumerate() {
            if alternative.description.trim().is_empty() {
                return Err(DomainError::Validation(format!(
                    "alternatives[{index}].description must not be empty"
                )));
            }
            if alternative.rejection_reason.trim().is_empty() {
                return Err(DomainError::Validation(format!(
                    "alternatives[{index}].rejection_reason must not be empty"
                )));
            }
        }

        Ok(self)
    }
}

fn require_text(field: &str, value: &str, max_chars: usize) -> Result<(), DomainError> {
    if value.trim().is_empty() {
        return Err(DomainError::Validation(format!("{field} must not be empty")));
    }
    let length = value.chars().count();
    if length > max_chars {
        return Err(DomainError::Validation(format!(
            "{field} must be at most {max_chars} characters, got {length}"
        )));
    }
    Ok(())
}

fn normalize_currency(code: &str) -> Result<String, DomainError> {
    let code = code.trim();
    if code.len() != 3 || !code.chars().all(|ch| ch.is_ascii_alphabetic()) {
        return Err(DomainError::Validation(format!(
            "currency must be a three-letter code, got `{code}`"
        )));
    }
    Ok(code.to_ascii_uppercase())
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransactionIntent {
    pub id: IntentId,
    pub user_id: UserId,
    pub agent_id: AgentId,
    pub description: String,
    pub merchant_name: String,
    pub merchant_category: String,
    pub amount_cents: i64,
    pub currency: String,
    pub agent_reasoning: Option<String>,
    pub alternatives: Vec<Alternative>,
    pub status: IntentStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
}

impl TransactionIntent {
    /// Builds a fresh `pending` intent from already validated details.
    pub fn pending(
        id: IntentId,
        agent_id: AgentId,
        details: PurchaseDetails,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id: details.user_id,
            agent_id,
            description: details.description,
            merchant_name: details.merchant_name,
            merchant_category: details.merchant_category,
            amount_cents: details.amount_cents,
            currency: details.currency.unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
            agent_reasoning: details.agent_reasoning,
            alternatives: details.alternatives,
            status: IntentStatus::Pending,
            expires_at: now + approval_window(),
            created_at: now,
            approved_at: None,
            rejected_at: None,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// `approved_at` and `rejected_at` are never both set, and are both unset
    /// exactly while the intent is pending.
    pub fn timestamps_consistent(&self) -> bool {
        match self.status {
            IntentStatus::Pending => self.approved_at.is_none() && self.rejected_at.is_none(),
            IntentStatus::Approved => self.approved_at.is_some() && self.rejected_at.is_none(),
            IntentStatus::Rejected | IntentStatus::Expired => {
                self.rejected_at.is_some() && self.approved_at.is_none()
            }
        }
    }
}

/// Full intent document returned to readers, joined with display fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntentView {
    pub intent: TransactionIntent,
    pub agent_name: String,
    pub user_email: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingIntentSummary {
    pub intent: TransactionIntent,
    pub agent_name: String,
    pub agent_trust_score: f64,
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{
        Alternative, IntentId, IntentStatus, PurchaseDetails, TransactionIntent,
        APPROVAL_WINDOW_SECS,
    };
    use crate::domain::principal::{AgentId, UserId};
    use crate::errors::DomainError;

    fn details(amount_cents: i64) -> PurchaseDetails {
        PurchaseDetails {
            user_id: UserId("user-1".to_string()),
            description: "Round-trip flight SFO to JFK".to_string(),
            merchant_name: "United Airlines".to_string(),
            merchant_category: "travel".to_string(),
            amount_cents,
            currency: None,
            agent_reasoning: Some("Cheapest nonstop option".to_string()),
            alternatives: vec![Alternative::new("Delta 1-stop", "Longer travel time")],
        }
    }

    #[test]
    fn validate_defaults_currency_to_usd() {
        let validated = details(76_400).validate().expect("valid details");
        assert_eq!(validated.currency.as_deref(), Some("USD"));
    }

    #[test]
    fn validate_normalizes_currency_case() {
        let mut input = details(100);
        input.currency = Some("eur".to_string());
        let validated = input.validate().expect("valid details");
        assert_eq!(validated.currency.as_deref(), Some("EUR"));
    }

    #[test]
    fn validate_rejects_non_positive_amounts() {
        for amount in [0, -1] {
            let error = details(amount).validate().expect_err("amount must be positive");
            assert!(matches!(error, DomainError::Validation(ref message) if message.contains("amount_cents")));
        }
    }

    #[test]
    fn validate_enforces_text_bounds() {
        let mut too_long = details(100);
        too_long.description = "x".repeat(1001);
        assert!(too_long.validate().is_err());

        let mut at_limit = details(100);
        at_limit.description = "x".repeat(1000);
        at_limit.merchant_name = "m".repeat(255);
        at_limit.merchant_category = "c".repeat(100);
        assert!(at_limit.validate().is_ok());

        let mut blank_merchant = details(100);
        blank_merchant.merchant_name = "   ".to_string();
        assert!(blank_merchant.validate().is_err());

        let mut long_category = details(100);
        long_category.merchant_category = "c".repeat(101);
        assert!(long_category.validate().is_err());
    }

    #[test]
    fn validate_rejects_alternative_without_reason() {
        let mut input = details(100);
        input.alternatives = vec![Alternative::new("Amtrak", "")];
        let error = input.validate().expect_err("reason required");
        assert!(error.to_string().contains("alternatives[0].rejection_reason"));
    }

    #[test]
    fn pending_intent_expires_after_fixed_window() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("valid time");
        let intent = TransactionIntent::pending(
            IntentId("intent-1".to_string()),
            AgentId("agent-1".to_string()),
            details(76_400).validate().expect("valid"),
            now,
        );

        assert_eq!(intent.status, IntentStatus::Pending);
        assert_eq!(intent.expires_at - intent.created_at, Duration::seconds(APPROVAL_WINDOW_SECS));
        assert!(!intent.is_expired_at(intent.expires_at));
        assert!(intent.is_expired_at(intent.expires_at + Duration::milliseconds(1)));
        assert!(intent.timestamps_consistent());
    }

    #[test]
    fn alternative_keeps_unknown_fields() {
        let raw = serde_json::json!({
            "description": "Hotel B",
            "rejection_reason": "No free cancellation",
            "price_cents": 18_900
        });
        let alternative: Alternative = serde_json::from_value(raw).expect("decode alternative");
        assert_eq!(alternative.extra.get("price_cents"), Some(&serde_json::json!(18_900)));
    }

    #[test]
    fn status_storage_encoding_round_trips() {
        for status in [
            IntentStatus::Pending,
            IntentStatus::Approved,
            IntentStatus::Rejected,
            IntentStatus::Expired,
        ] {
            assert_eq!(IntentStatus::parse(status.as_str()), Some(status));
        }
        assert!(!IntentStatus::Pending.is_terminal());
        assert!(IntentStatus::Expired.is_terminal());
    }
}
