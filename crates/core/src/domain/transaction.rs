use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::intent::{IntentId, TransactionIntent};
use crate::domain::principal::{Agent, AgentId, UserId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub String);

impl TransactionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Processing,
    Succeeded,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "processing" => Some(Self::Processing),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub intent_id: IntentId,
    pub user_id: UserId,
    pub agent_id: AgentId,
    pub amount_cents: i64,
    pub currency: String,
    pub payment_method_ref: Option<String>,
    pub status: TransactionStatus,
    pub processor_payment_id: Option<String>,
    pub processor_charge_id: Option<String>,
    pub receipt_url: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Opens a `processing` record for an intent that has just been approved.
    /// Amount and currency are copied so later intent reads cannot drift.
    pub fn processing(
        intent: &TransactionIntent,
        payment_method_ref: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TransactionId::generate(),
            intent_id: intent.id.clone(),
            user_id: intent.user_id.clone(),
            agent_id: intent.agent_id.clone(),
            amount_cents: intent.amount_cents,
            currency: intent.currency.clone(),
            payment_method_ref,
            status: TransactionStatus::Processing,
            processor_payment_id: None,
            processor_charge_id: None,
            receipt_url: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Result reported by the payment collaborator for a `processing` transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PaymentOutcome {
    Succeeded {
        processor_payment_id: String,
        #[serde(default)]
        processor_charge_id: Option<String>,
        #[serde(default)]
        receipt_url: Option<String>,
    },
    Failed {
        reason: String,
    },
}

impl PaymentOutcome {
    pub fn status(&self) -> TransactionStatus {
        match self {
            Self::Succeeded { .. } => TransactionStatus::Succeeded,
            Self::Failed { .. } => TransactionStatus::Failed,
        }
    }

    pub fn audit_action(&self) -> &'static str {
        match self {
            Self::Succeeded { .. } => "payment.succeeded",
            Self::Failed { .. } => "payment.failed",
        }
    }
}

/// One sealed row of a transaction's audit trail.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub transaction_id: TransactionId,
    pub sequence: u32,
    pub action: String,
    pub details: serde_json::Value,
    pub prev_hash: String,
    pub entry_hash: String,
    pub signature: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransactionSummary {
    pub transaction: Transaction,
    pub description: String,
    pub merchant_name: String,
    pub merchant_category: String,
    pub agent_name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransactionDetail {
    pub transaction: Transaction,
    pub intent: TransactionIntent,
    pub agent: Agent,
    pub audit_trail: Vec<AuditEntry>,
}
