use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::principal::UserId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GuardrailId(pub String);

impl GuardrailId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for GuardrailId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    SpendingLimit,
    MerchantWhitelist,
    MerchantBlacklist,
    CategoryLimit,
    TransactionCount,
}

impl RuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SpendingLimit => "spending_limit",
            Self::MerchantWhitelist => "merchant_whitelist",
            Self::MerchantBlacklist => "merchant_blacklist",
            Self::CategoryLimit => "category_limit",
            Self::TransactionCount => "transaction_count",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "spending_limit" => Some(Self::SpendingLimit),
            "merchant_whitelist" => Some(Self::MerchantWhitelist),
            "merchant_blacklist" => Some(Self::MerchantBlacklist),
            "category_limit" => Some(Self::CategoryLimit),
            "transaction_count" => Some(Self::TransactionCount),
            _ => None,
        }
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type Extra = serde_json::Map<String, serde_json::Value>;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpendingLimit {
    pub limit_cents: Option<i64>,
    pub period: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MerchantList {
    pub merchants: Vec<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryLimit {
    pub category: Option<String>,
    pub limit_cents: Option<i64>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionCount {
    pub max_transactions: Option<u32>,
    pub period: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Rule payload keyed by rule type. Only `auto_approve` and its ceiling on the
/// owning [`Guardrail`] drive decisions today; the payloads are stored so
/// later evaluators can match on them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule_type", content = "rule_config", rename_all = "snake_case")]
pub enum GuardrailRule {
    SpendingLimit(SpendingLimit),
    MerchantWhitelist(MerchantList),
    MerchantBlacklist(MerchantList),
    CategoryLimit(CategoryLimit),
    TransactionCount(TransactionCount),
}

impl GuardrailRule {
    pub fn rule_type(&self) -> RuleType {
        match self {
            Self::SpendingLimit(_) => RuleType::SpendingLimit,
            Self::MerchantWhitelist(_) => RuleType::MerchantWhitelist,
            Self::MerchantBlacklist(_) => RuleType::MerchantBlacklist,
            Self::CategoryLimit(_) => RuleType::CategoryLimit,
            Self::TransactionCount(_) => RuleType::TransactionCount,
        }
    }

    pub fn config_json(&self) -> serde_json::Value {
        let encoded = match self {
            Self::SpendingLimit(config) => serde_json::to_value(config),
            Self::MerchantWhitelist(config) | Self::MerchantBlacklist(config) => {
                serde_json::to_value(config)
            }
            Self::CategoryLimit(config) => serde_json::to_value(config),
            Self::TransactionCount(config) => serde_json::to_value(config),
        };
        encoded.unwrap_or_else(|_| serde_json::Value::Object(Extra::new()))
    }

    /// Rebuilds the typed rule from its storage columns.
    pub fn from_parts(rule_type: RuleType, config: serde_json::Value) -> Result<Self, DomainError> {
        let config = match config {
            serde_json::Value::Null => serde_json::Value::Object(Extra::new()),
            serde_json::Value::Object(_) => config,
            other => {
                return Err(DomainError::Validation(format!(
                    "rule_config for {rule_type} must be an object, got {other}"
                )))
            }
        };
        let invalid = |error: serde_json::Error| {
            DomainError::Validation(format!("invalid rule_config for {rule_type}: {error}"))
        };

        Ok(match rule_type {
            RuleType::SpendingLimit => Self::SpendingLimit(serde_json::from_value(config).map_err(invalid)?),
            RuleType::MerchantWhitelist => {
                Self::MerchantWhitelist(serde_json::from_value(config).map_err(invalid)?)
            }
            RuleType::MerchantBlacklist => {
                Self::MerchantBlacklist(serde_json::from_value(config).map_err(invalid)?)
            }
            RuleType::CategoryLimit => Self::CategoryLimit(serde_json::from_value(config).map_err(invalid)?),
            RuleType::TransactionCount => {
                Self::TransactionCount(serde_json::from_value(config).map_err(invalid)?)
            }
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Guardrail {
    pub id: GuardrailId,
    pub user_id: UserId,
    #[serde(flatten)]
    pub rule: GuardrailRule,
    pub auto_approve: bool,
    pub auto_approve_max_cents: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Guardrail {
    pub fn allows_auto_approval(&self, amount_cents: i64) -> bool {
        self.is_active && self.auto_approve && amount_cents <= self.auto_approve_max_cents
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewGuardrail {
    #[serde(flatten)]
    pub rule: GuardrailRule,
    #[serde(default)]
    pub auto_approve: bool,
    #[serde(default)]
    pub auto_approve_max_cents: i64,
}

impl NewGuardrail {
    pub fn validate(self) -> Result<Self, DomainError> {
        if self.auto_approve_max_cents < 0 {
            return Err(DomainError::Validation(format!(
                "auto_approve_max_cents must be >= 0, got {}",
                self.auto_approve_max_cents
            )));
        }
        Ok(self)
    }

    pub fn into_guardrail(self, id: GuardrailId, user_id: UserId, now: DateTime<Utc>) -> Guardrail {
        Guardrail {
            id,
            user_id,
            rule: self.rule,
            auto_approve: self.auto_approve,
            auto_approve_max_cents: self.auto_approve_max_cents,
            is_active: true,
            created_at: now,
        }
    }
}
