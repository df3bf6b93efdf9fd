use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::domain::principal::UserId;
use crate::domain::transaction::{
    AuditEntry, PaymentOutcome, Transaction, TransactionDetail, TransactionId, TransactionStatus,
    TransactionSummary,
};
use crate::errors::ApplicationError;
use crate::store::{Store, StoreError};

type HmacSha256 = Hmac<Sha256>;

pub const ACTION_TRANSACTION_CREATED: &str = "transaction.created";
pub const MAX_PAGE_SIZE: u32 = 100;
const APPEND_ATTEMPTS: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    Auto,
    Manual,
}

impl ApprovalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrailVerification {
    pub transaction_id: TransactionId,
    pub valid: bool,
    pub verified_entries: usize,
    pub latest_hash: Option<String>,
    pub failure_reason: Option<String>,
}

/// Seals audit entries into a hash chain and checks existing chains.
///
/// Each entry hash covers the transaction id, sequence, action, canonical
/// details, previous hash and timestamp; the signature is an HMAC-SHA256 of
/// that hash under the ledger key.
#[derive(Clone)]
pub struct AuditSigner {
    signing_key: Vec<u8>,
}

impl std::fmt::Debug for AuditSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditSigner").field("signing_key", &"<redacted>").finish()
    }
}

impl AuditSigner {
    pub fn new(signing_key: impl AsRef<[u8]>) -> Self {
        Self { signing_key: signing_key.as_ref().to_vec() }
    }

    pub fn seal(
        &self,
        transaction_id: &TransactionId,
        sequence: u32,
        action: impl Into<String>,
        details: serde_json::Value,
        prev_hash: &str,
        created_at: DateTime<Utc>,
    ) -> AuditEntry {
        let action = action.into();
        let entry_hash =
            hash_entry_material(transaction_id, sequence, &action, &details, prev_hash, created_at);
        let signature = hmac_hex(&self.signing_key, entry_hash.as_bytes());

        AuditEntry {
            id: Uuid::new_v4().to_string(),
            transaction_id: transaction_id.clone(),
            sequence,
            action,
            details,
            prev_hash: prev_hash.to_owned(),
            entry_hash,
            signature,
            created_at,
        }
    }

    /// First entry of a freshly approved transaction.
    pub fn opening_entry(
        &self,
        transaction: &Transaction,
        mode: ApprovalMode,
        created_at: DateTime<Utc>,
    ) -> AuditEntry {
        self.seal(
            &transaction.id,
            1,
            ACTION_TRANSACTION_CREATED,
            json!({
                "approval_mode": mode.as_str(),
                "intent_id": transaction.intent_id.0,
                "amount_cents": transaction.amount_cents,
                "currency": transaction.currency,
                "payment_method_ref": transaction.payment_method_ref,
            }),
            "",
            created_at,
        )
    }

    pub fn verify(&self, transaction_id: &TransactionId, entries: &[AuditEntry]) -> TrailVerification {
        let failed = |index: usize, latest_hash: Option<String>, reason: String| TrailVerification {
            transaction_id: transaction_id.clone(),
            valid: false,
            verified_entries: index,
            latest_hash,
            failure_reason: Some(reason),
        };

        if entries.is_empty() {
            return failed(0, None, "no audit entries found for transaction".to_owned());
        }

        let mut previous_hash: Option<String> = None;
        for (index, entry) in entries.iter().enumerate() {
            let expected_sequence = u32::try_from(index).unwrap_or(u32::MAX).saturating_add(1);
            if entry.sequence != expected_sequence {
                return failed(
                    index,
                    previous_hash,
                    format!(
                        "sequence mismatch at entry {}: expected {}, found {}",
                        entry.id, expected_sequence, entry.sequence
                    ),
                );
            }

            if entry.prev_hash != previous_hash.as_deref().unwrap_or("") {
                return failed(index, previous_hash, format!("previous hash mismatch at entry {}", entry.id));
            }

            let computed = hash_entry_material(
                &entry.transaction_id,
                entry.sequence,
                &entry.action,
                &entry.details,
                &entry.prev_hash,
                entry.created_at,
            );
            if computed != entry.entry_hash {
                return failed(index, previous_hash, format!("entry hash mismatch at entry {}", entry.id));
            }

            if hmac_hex(&self.signing_key, entry.entry_hash.as_bytes()) != entry.signature {
                return failed(index, previous_hash, format!("signature mismatch at entry {}", entry.id));
            }

            previous_hash = Some(entry.entry_hash.clone());
        }

        TrailVerification {
            transaction_id: transaction_id.clone(),
            valid: true,
            verified_entries: entries.len(),
            latest_hash: previous_hash,
            failure_reason: None,
        }
    }
}

/// Transaction records and their append-only audit trail.
pub struct LedgerService<S: ?Sized> {
    store: Arc<S>,
    signer: AuditSigner,
    clock: Arc<dyn Clock>,
}

impl<S> Clone for LedgerService<S>
where
    S: ?Sized,
{
    fn clone(&self) -> Self {
        Self { store: Arc::clone(&self.store), signer: self.signer.clone(), clock: Arc::clone(&self.clock) }
    }
}

impl<S> LedgerService<S>
where
    S: Store + ?Sized,
{
    pub fn new(store: Arc<S>, signer: AuditSigner, clock: Arc<dyn Clock>) -> Self {
        Self { store, signer, clock }
    }

    pub fn signer(&self) -> &AuditSigner {
        &self.signer
    }

    /// Persists a `processing` transaction recorded outside the approval
    /// path, which inserts through `IntentStore::commit_approval` instead.
    pub async fn record_attempt(&self, transaction: &Transaction) -> Result<(), ApplicationError> {
        if transaction.status != TransactionStatus::Processing {
            return Err(ApplicationError::validation(format!(
                "new transactions must be processing, got {}",
                transaction.status.as_str()
            )));
        }
        self.store.insert_transaction(transaction).await?;
        info!(
            event_name = "ledger.transaction.recorded",
            transaction_id = %transaction.id,
            intent_id = %transaction.intent_id,
            amount_cents = transaction.amount_cents,
            "transaction recorded"
        );
        Ok(())
    }

    /// Appends one sealed entry after the current tail of the trail.
    pub async fn append_audit(
        &self,
        transaction_id: &TransactionId,
        action: &str,
        details: serde_json::Value,
    ) -> Result<AuditEntry, ApplicationError> {
        if self.store.find_transaction(transaction_id).await?.is_none() {
            return Err(ApplicationError::not_found("transaction", transaction_id.0.clone()));
        }

        let mut last_conflict = None;
        for _ in 0..APPEND_ATTEMPTS {
            let trail = self.store.audit_trail(transaction_id).await?;
            let sequence = trail.last().map_or(1, |entry| entry.sequence.saturating_add(1));
            let prev_hash = trail.last().map(|entry| entry.entry_hash.as_str()).unwrap_or("");
            let entry =
                self.signer.seal(transaction_id, sequence, action, details.clone(), prev_hash, now_micros(&*self.clock));

            match self.store.append_audit_entry(&entry).await {
                Ok(()) => return Ok(entry),
                Err(StoreError::Conflict(message)) => {
                    warn!(
                        event_name = "ledger.audit.append_conflict",
                        transaction_id = %transaction_id,
                        sequence,
                        "audit append lost a sequence race; retrying"
                    );
                    last_conflict = Some(message);
                }
                Err(error) => return Err(error.into()),
            }
        }

        Err(ApplicationError::Persistence(format!(
            "audit append for {transaction_id} kept conflicting: {}",
            last_conflict.unwrap_or_default()
        )))
    }

    /// Records the payment collaborator's verdict. Only `processing`
    /// transactions move; anything else is rejected.
    pub async fn report_outcome(
        &self,
        transaction_id: &TransactionId,
        outcome: PaymentOutcome,
    ) -> Result<Transaction, ApplicationError> {
        let current = self
            .store
            .find_transaction(transaction_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("transaction", transaction_id.0.clone()))?;

        if current.status != TransactionStatus::Processing {
            return Err(already_final(transaction_id, current.status));
        }

        let details = serde_json::to_value(&outcome)
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?;
        let action = outcome.audit_action();

        let mut last_conflict = None;
        let mut completed = false;
        for _ in 0..APPEND_ATTEMPTS {
            let trail = self.store.audit_trail(transaction_id).await?;
            let sequence = trail.last().map_or(1, |entry| entry.sequence.saturating_add(1));
            let prev_hash = trail.last().map(|entry| entry.entry_hash.as_str()).unwrap_or("");
            let at = now_micros(&*self.clock);
            let entry = self.signer.seal(transaction_id, sequence, action, details.clone(), prev_hash, at);

            match self.store.complete_with_audit(transaction_id, &outcome, at, &entry).await {
                Ok(true) => {
                    completed = true;
                    break;
                }
                Ok(false) => {
                    let status = self
                        .store
                        .find_transaction(transaction_id)
                        .await?
                        .map_or(current.status, |transaction| transaction.status);
                    return Err(already_final(transaction_id, status));
                }
                Err(StoreError::Conflict(message)) => {
                    warn!(
                        event_name = "ledger.audit.append_conflict",
                        transaction_id = %transaction_id,
                        sequence,
                        "outcome entry lost a sequence race; retrying"
                    );
                    last_conflict = Some(message);
                }
                Err(error) => return Err(error.into()),
            }
        }
        if !completed {
            return Err(ApplicationError::Persistence(format!(
                "outcome for {transaction_id} kept conflicting: {}",
                last_conflict.unwrap_or_default()
            )));
        }

        info!(
            event_name = "ledger.transaction.completed",
            transaction_id = %transaction_id,
            status = outcome.status().as_str(),
            "payment outcome recorded"
        );

        self.store
            .find_transaction(transaction_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("transaction", transaction_id.0.clone()))
    }

    pub async fn audit_trail(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Vec<AuditEntry>, ApplicationError> {
        Ok(self.store.audit_trail(transaction_id).await?)
    }

    pub async fn verify_trail(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<TrailVerification, ApplicationError> {
        let trail = self.store.audit_trail(transaction_id).await?;
        Ok(self.signer.verify(transaction_id, &trail))
    }

    /// Newest first; `limit` is clamped to `1..=100`.
    pub async fn list_transactions(
        &self,
        user_id: &UserId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<TransactionSummary>, ApplicationError> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        Ok(self.store.list_transactions(user_id, limit, offset).await?)
    }

    /// A transaction the user does not own is reported as missing.
    pub async fn transaction_detail(
        &self,
        user_id: &UserId,
        transaction_id: &TransactionId,
    ) -> Result<TransactionDetail, ApplicationError> {
        let not_found = || ApplicationError::not_found("transaction", transaction_id.0.clone());

        let transaction = self
            .store
            .find_transaction(transaction_id)
            .await?
            .filter(|transaction| transaction.user_id == *user_id)
            .ok_or_else(not_found)?;
        let intent = self.store.find_intent(&transaction.intent_id).await?.ok_or_else(not_found)?;
        let agent = self.store.find_agent(&transaction.agent_id).await?.ok_or_else(not_found)?;
        let audit_trail = self.store.audit_trail(transaction_id).await?;

        Ok(TransactionDetail { transaction, intent, agent, audit_trail })
    }
}

fn already_final(transaction_id: &TransactionId, status: TransactionStatus) -> ApplicationError {
    ApplicationError::validation(format!("transaction {transaction_id} is already {}", status.as_str()))
}

/// Storage keeps microsecond precision; hashing must see the same instant
/// before and after a round trip.
pub(crate) fn now_micros(clock: &dyn Clock) -> DateTime<Utc> {
    use chrono::SubsecRound;
    clock.now().trunc_subsecs(6)
}

fn hash_entry_material(
    transaction_id: &TransactionId,
    sequence: u32,
    action: &str,
    details: &serde_json::Value,
    prev_hash: &str,
    created_at: DateTime<Utc>,
) -> String {
    let canonical_details = serde_json::to_string(details).unwrap_or_default();
    let material = format!(
        "{}|{}|{}|{}|{}|{}",
        transaction_id.0,
        sequence,
        action,
        canonical_details,
        prev_hash,
        created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
    );
    sha256_hex(material.as_bytes())
}

fn hmac_hex(secret: &[u8], payload: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return sha256_hex(payload),
    };
    mac.update(payload);
    encode_hex(mac.finalize().into_bytes().as_slice())
}

pub fn sha256_hex(payload: &[u8]) -> String {
    let digest = Sha256::digest(payload);
    encode_hex(digest.as_slice())
}

fn encode_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;

    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(output, "{byte:02x}");
    }
    output
}
