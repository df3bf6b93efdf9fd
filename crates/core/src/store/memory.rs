use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::domain::guardrail::{Guardrail, GuardrailId};
use crate::domain::intent::{IntentId, IntentStatus, PendingIntentSummary, TransactionIntent};
use crate::domain::principal::{Agent, AgentId, User, UserId};
use crate::domain::transaction::{
    AuditEntry, PaymentOutcome, Transaction, TransactionId, TransactionStatus, TransactionSummary,
};
use crate::lifecycle::machine::StatusChange;

use super::{DirectoryStore, GuardrailStore, IntentStore, LedgerStore, StoreError};

#[derive(Default)]
struct State {
    users: HashMap<String, User>,
    agents: HashMap<String, Agent>,
    guardrails: Vec<Guardrail>,
    intents: Vec<TransactionIntent>,
    transactions: Vec<Transaction>,
    audit_entries: Vec<AuditEntry>,
}

impl State {
    fn intent_mut(&mut self, id: &IntentId) -> Option<&mut TransactionIntent> {
        self.intents.iter_mut().find(|intent| intent.id == *id)
    }

    /// Applies the swap in place. Returns `false` when the status moved.
    fn apply_change(&mut self, change: &StatusChange) -> bool {
        let Some(intent) = self.intent_mut(&change.intent_id) else {
            return false;
        };
        if intent.status != change.expected {
            return false;
        }
        intent.status = change.to;
        if change.sets_approved_at() {
            intent.approved_at = Some(change.at);
        }
        if change.sets_rejected_at() {
            intent.rejected_at = Some(change.at);
        }
        true
    }

    fn check_new_transaction(&self, transaction: &Transaction) -> Result<(), StoreError> {
        if self.transactions.iter().any(|existing| existing.id == transaction.id) {
            return Err(StoreError::Conflict(format!("transaction {} already exists", transaction.id)));
        }
        if self.transactions.iter().any(|existing| existing.intent_id == transaction.intent_id) {
            return Err(StoreError::Conflict(format!(
                "intent {} already has a transaction",
                transaction.intent_id
            )));
        }
        if !self.intents.iter().any(|intent| intent.id == transaction.intent_id) {
            return Err(StoreError::Conflict(format!("unknown intent {}", transaction.intent_id)));
        }
        Ok(())
    }

    fn check_new_audit_entry(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        if !self.transactions.iter().any(|transaction| transaction.id == entry.transaction_id) {
            return Err(StoreError::Conflict(format!(
                "unknown transaction {}",
                entry.transaction_id
            )));
        }
        if self.audit_entries.iter().any(|existing| {
            existing.transaction_id == entry.transaction_id && existing.sequence == entry.sequence
        }) {
            return Err(StoreError::Conflict(format!(
                "audit sequence {} already used for transaction {}",
                entry.sequence, entry.transaction_id
            )));
        }
        Ok(())
    }
}

/// Store backed by process memory. A single lock guards all tables so every
/// trait call is atomic with respect to the others.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, user: User) {
        let mut state = self.state.write().await;
        state.users.insert(user.id.0.clone(), user);
    }

    pub async fn insert_agent(&self, agent: Agent) {
        let mut state = self.state.write().await;
        state.agents.insert(agent.id.0.clone(), agent);
    }

    pub async fn transaction_count(&self) -> usize {
        self.state.read().await.transactions.len()
    }
}

#[async_trait]
impl DirectoryStore for InMemoryStore {
    async fn find_user(&self, id: &UserId) -> Result<Option<User>, StoreError> {
        Ok(self.state.read().await.users.get(&id.0).cloned())
    }

    async fn find_agent(&self, id: &AgentId) -> Result<Option<Agent>, StoreError> {
        Ok(self.state.read().await.agents.get(&id.0).cloned())
    }
}

#[async_trait]
impl GuardrailStore for InMemoryStore {
    async fn insert_guardrail(&self, guardrail: &Guardrail) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if !state.users.contains_key(&guardrail.user_id.0) {
            return Err(StoreError::Conflict(format!("unknown user {}", guardrail.user_id)));
        }
        state.guardrails.push(guardrail.clone());
        Ok(())
    }

    async fn list_guardrails(&self, user_id: &UserId) -> Result<Vec<Guardrail>, StoreError> {
        let state = self.state.read().await;
        let mut guardrails: Vec<Guardrail> = state
            .guardrails
            .iter()
            .filter(|guardrail| guardrail.user_id == *user_id)
            .cloned()
            .collect();
        guardrails.sort_by(|left, right| {
            left.created_at.cmp(&right.created_at).then_with(|| left.id.0.cmp(&right.id.0))
        });
        Ok(guardrails)
    }

    async fn set_guardrail_active(
        &self,
        user_id: &UserId,
        id: &GuardrailId,
        is_active: bool,
    ) -> Result<Option<Guardrail>, StoreError> {
        let mut state = self.state.write().await;
        let updated = state
            .guardrails
            .iter_mut()
            .find(|guardrail| guardrail.id == *id && guardrail.user_id == *user_id)
            .map(|guardrail| {
                guardrail.is_active = is_active;
                guardrail.clone()
            });
        Ok(updated)
    }
}

#[async_trait]
impl IntentStore for InMemoryStore {
    async fn insert_intent(&self, intent: &TransactionIntent) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.intents.iter().any(|existing| existing.id == intent.id) {
            return Err(StoreError::Conflict(format!("intent {} already exists", intent.id)));
        }
        if !state.users.contains_key(&intent.user_id.0) {
            return Err(StoreError::Conflict(format!("unknown user {}", intent.user_id)));
        }
        if !state.agents.contains_key(&intent.agent_id.0) {
            return Err(StoreError::Conflict(format!("unknown agent {}", intent.agent_id)));
        }
        state.intents.push(intent.clone());
        Ok(())
    }

    async fn find_intent(&self, id: &IntentId) -> Result<Option<TransactionIntent>, StoreError> {
        let state = self.state.read().await;
        Ok(state.intents.iter().find(|intent| intent.id == *id).cloned())
    }

    async fn list_pending_intents(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<PendingIntentSummary>, StoreError> {
        let state = self.state.read().await;
        // Reverse insertion order first so the stable sort breaks ties newest first.
        let mut pending: Vec<PendingIntentSummary> = state
            .intents
            .iter()
            .rev()
            .filter(|intent| intent.user_id == *user_id && intent.status == IntentStatus::Pending)
            .filter_map(|intent| {
                state.agents.get(&intent.agent_id.0).map(|agent| PendingIntentSummary {
                    intent: intent.clone(),
                    agent_name: agent.name.clone(),
                    agent_trust_score: agent.trust_score,
                })
            })
            .collect();
        pending.sort_by(|left, right| right.intent.created_at.cmp(&left.intent.created_at));
        Ok(pending)
    }

    async fn transition(&self, change: &StatusChange) -> Result<bool, StoreError> {
        Ok(self.state.write().await.apply_change(change))
    }

    async fn commit_approval(
        &self,
        change: &StatusChange,
        transaction: &Transaction,
        opening_entry: &AuditEntry,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let current = state.intents.iter().find(|intent| intent.id == change.intent_id);
        if current.map(|intent| intent.status) != Some(change.expected) {
            return Ok(false);
        }
        state.check_new_transaction(transaction)?;
        if opening_entry.transaction_id != transaction.id {
            return Err(StoreError::Conflict(
                "opening audit entry belongs to another transaction".to_owned(),
            ));
        }

        state.apply_change(change);
        state.transactions.push(transaction.clone());
        state.audit_entries.push(opening_entry.clone());
        Ok(true)
    }

    async fn list_expired_pending(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<TransactionIntent>, StoreError> {
        let state = self.state.read().await;
        let mut expired: Vec<TransactionIntent> = state
            .intents
            .iter()
            .filter(|intent| intent.status == IntentStatus::Pending && intent.expires_at < now)
            .cloned()
            .collect();
        expired.sort_by(|left, right| left.expires_at.cmp(&right.expires_at));
        expired.truncate(limit as usize);
        Ok(expired)
    }
}

#[async_trait]
impl LedgerStore for InMemoryStore {
    async fn insert_transaction(&self, transaction: &Transaction) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.check_new_transaction(transaction)?;
        state.transactions.push(transaction.clone());
        Ok(())
    }

    async fn find_transaction(
        &self,
        id: &TransactionId,
    ) -> Result<Option<Transaction>, StoreError> {
        let state = self.state.read().await;
        Ok(state.transactions.iter().find(|transaction| transaction.id == *id).cloned())
    }

    async fn find_transaction_for_intent(
        &self,
        intent_id: &IntentId,
    ) -> Result<Option<Transaction>, StoreError> {
        let state = self.state.read().await;
        Ok(state.transactions.iter().find(|transaction| transaction.intent_id == *intent_id).cloned())
    }

    async fn list_transactions(
        &self,
        user_id: &UserId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<TransactionSummary>, StoreError> {
        let state = self.state.read().await;
        let mut summaries: Vec<TransactionSummary> = state
            .transactions
            .iter()
            .rev()
            .filter(|transaction| transaction.user_id == *user_id)
            .filter_map(|transaction| {
                let intent = state.intents.iter().find(|intent| intent.id == transaction.intent_id)?;
                let agent = state.agents.get(&transaction.agent_id.0)?;
                Some(TransactionSummary {
                    transaction: transaction.clone(),
                    description: intent.description.clone(),
                    merchant_name: intent.merchant_name.clone(),
                    merchant_category: intent.merchant_category.clone(),
                    agent_name: agent.name.clone(),
                })
            })
            .collect();
        summaries.sort_by(|left, right| right.transaction.created_at.cmp(&left.transaction.created_at));
        Ok(summaries.into_iter().skip(offset as usize).take(limit as usize).collect())
    }

    async fn complete_with_audit(
        &self,
        id: &TransactionId,
        outcome: &PaymentOutcome,
        at: DateTime<Utc>,
        entry: &AuditEntry,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let Some(index) = state
            .transactions
            .iter()
            .position(|transaction| transaction.id == *id && transaction.status == TransactionStatus::Processing)
        else {
            return Ok(false);
        };
        if entry.transaction_id != *id {
            return Err(StoreError::Conflict("audit entry belongs to another transaction".to_owned()));
        }
        state.check_new_audit_entry(entry)?;

        let transaction = &mut state.transactions[index];
        transaction.status = outcome.status();
        transaction.updated_at = at;
        match outcome {
            PaymentOutcome::Succeeded { processor_payment_id, processor_charge_id, receipt_url } => {
                transaction.processor_payment_id = Some(processor_payment_id.clone());
                transaction.processor_charge_id = processor_charge_id.clone();
                transaction.receipt_url = receipt_url.clone();
            }
            PaymentOutcome::Failed { reason } => {
                transaction.failure_reason = Some(reason.clone());
            }
        }
        state.audit_entries.push(entry.clone());
        Ok(true)
    }

    async fn append_audit_entry(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.check_new_audit_entry(entry)?;
        state.audit_entries.push(entry.clone());
        Ok(())
    }

    async fn audit_trail(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        let state = self.state.read().await;
        let mut trail: Vec<AuditEntry> = state
            .audit_entries
            .iter()
            .filter(|entry| entry.transaction_id == *transaction_id)
            .cloned()
            .collect();
        trail.sort_by_key(|entry| entry.sequence);
        Ok(trail)
    }
}
