use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::guardrail::{Guardrail, GuardrailId};
use crate::domain::intent::{IntentId, PendingIntentSummary, TransactionIntent};
use crate::domain::principal::{Agent, AgentId, User, UserId};
use crate::domain::transaction::{
    AuditEntry, PaymentOutcome, Transaction, TransactionId, TransactionSummary,
};
use crate::lifecycle::machine::StatusChange;

pub mod memory;

pub use memory::InMemoryStore;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("write conflict: {0}")]
    Conflict(String),
}

/// Read-only access to users and agents.
#[async_trait]
pub trait DirectoryStore: Send + Sync {
    async fn find_user(&self, id: &UserId) -> Result<Option<User>, StoreError>;
    async fn find_agent(&self, id: &AgentId) -> Result<Option<Agent>, StoreError>;
}

#[async_trait]
pub trait GuardrailStore: Send + Sync {
    async fn insert_guardrail(&self, guardrail: &Guardrail) -> Result<(), StoreError>;

    /// Every guardrail of the user, active or not, in insertion order.
    async fn list_guardrails(&self, user_id: &UserId) -> Result<Vec<Guardrail>, StoreError>;

    /// Returns the updated record, or `None` when the user owns no such guardrail.
    async fn set_guardrail_active(
        &self,
        user_id: &UserId,
        id: &GuardrailId,
        is_active: bool,
    ) -> Result<Option<Guardrail>, StoreError>;
}

#[async_trait]
pub trait IntentStore: Send + Sync {
    async fn insert_intent(&self, intent: &TransactionIntent) -> Result<(), StoreError>;

    async fn find_intent(&self, id: &IntentId) -> Result<Option<TransactionIntent>, StoreError>;

    /// Pending intents of the user, newest first.
    async fn list_pending_intents(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<PendingIntentSummary>, StoreError>;

    /// Atomic compare-and-swap on intent status. `true` only when the stored
    /// status still equalled `change.expected` at write time.
    async fn transition(&self, change: &StatusChange) -> Result<bool, StoreError>;

    /// Applies `change` and inserts the transaction with its first audit entry
    /// as one unit of work. Nothing is written when the swap loses.
    async fn commit_approval(
        &self,
        change: &StatusChange,
        transaction: &Transaction,
        opening_entry: &AuditEntry,
    ) -> Result<bool, StoreError>;

    /// Pending intents whose window closed before `now`, oldest first.
    async fn list_expired_pending(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<TransactionIntent>, StoreError>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn insert_transaction(&self, transaction: &Transaction) -> Result<(), StoreError>;

    async fn find_transaction(
        &self,
        id: &TransactionId,
    ) -> Result<Option<Transaction>, StoreError>;

    async fn find_transaction_for_intent(
        &self,
        intent_id: &IntentId,
    ) -> Result<Option<Transaction>, StoreError>;

    /// Newest first.
    async fn list_transactions(
        &self,
        user_id: &UserId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<TransactionSummary>, StoreError>;

    /// Moves a `processing` transaction to the outcome's terminal status and
    /// appends `entry` in the same unit of work. `false`, with nothing
    /// written, when the transaction was not `processing`. A failed append
    /// leaves the status untouched.
    async fn complete_with_audit(
        &self,
        id: &TransactionId,
        outcome: &PaymentOutcome,
        at: DateTime<Utc>,
        entry: &AuditEntry,
    ) -> Result<bool, StoreError>;

    /// Appends one entry. A duplicate `(transaction_id, sequence)` yields
    /// [`StoreError::Conflict`].
    async fn append_audit_entry(&self, entry: &AuditEntry) -> Result<(), StoreError>;

    /// Entries in sequence order.
    async fn audit_trail(&self, transaction_id: &TransactionId)
        -> Result<Vec<AuditEntry>, StoreError>;
}

pub trait Store: DirectoryStore + GuardrailStore + IntentStore + LedgerStore {}

impl<T> Store for T where T: DirectoryStore + GuardrailStore + IntentStore + LedgerStore {}
