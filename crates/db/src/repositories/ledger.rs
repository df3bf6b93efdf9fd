use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteExecutor, SqliteRow};

use flux_core::store::LedgerStore;
use flux_core::{
    AgentId, AuditEntry, IntentId, PaymentOutcome, StoreError, Transaction, TransactionId,
    TransactionStatus, TransactionSummary, UserId,
};

use super::{column, encode_ts, ts_column, RepositoryError, SqlStore};

const TRANSACTION_COLUMNS: &str = "t.id, t.intent_id, t.user_id, t.agent_id, t.amount_cents,
     t.currency, t.payment_method_ref, t.status, t.processor_payment_id, t.processor_charge_id,
     t.receipt_url, t.failure_reason, t.created_at, t.updated_at";

const AUDIT_COLUMNS: &str = "id, transaction_id, sequence, action, details, prev_hash, entry_hash,
     signature, created_at";

fn row_to_transaction(row: &SqliteRow) -> Result<Transaction, RepositoryError> {
    let status: String = column(row, "status")?;
    Ok(Transaction {
        id: TransactionId(column(row, "id")?),
        intent_id: IntentId(column(row, "intent_id")?),
        user_id: UserId(column(row, "user_id")?),
        agent_id: AgentId(column(row, "agent_id")?),
        amount_cents: column(row, "amount_cents")?,
        currency: column(row, "currency")?,
        payment_method_ref: column(row, "payment_method_ref")?,
        status: TransactionStatus::parse(&status).ok_or_else(|| {
            RepositoryError::Decode(format!("unknown transaction status `{status}`"))
        })?,
        processor_payment_id: column(row, "processor_payment_id")?,
        processor_charge_id: column(row, "processor_charge_id")?,
        receipt_url: column(row, "receipt_url")?,
        failure_reason: column(row, "failure_reason")?,
        created_at: ts_column(row, "created_at")?,
        updated_at: ts_column(row, "updated_at")?,
    })
}

fn row_to_audit_entry(row: &SqliteRow) -> Result<AuditEntry, RepositoryError> {
    let sequence: i64 = column(row, "sequence")?;
    let details: String = column(row, "details")?;
    Ok(AuditEntry {
        id: column(row, "id")?,
        transaction_id: TransactionId(column(row, "transaction_id")?),
        sequence: u32::try_from(sequence)
            .map_err(|_| RepositoryError::Decode(format!("sequence out of range: {sequence}")))?,
        action: column(row, "action")?,
        details: serde_json::from_str(&details)?,
        prev_hash: column(row, "prev_hash")?,
        entry_hash: column(row, "entry_hash")?,
        signature: column(row, "signature")?,
        created_at: ts_column(row, "created_at")?,
    })
}

pub(crate) async fn insert_transaction_row<'e, E>(
    executor: E,
    transaction: &Transaction,
) -> Result<(), sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        "INSERT INTO transactions (
             id, intent_id, user_id, agent_id, amount_cents, currency, payment_method_ref,
             status, processor_payment_id, processor_charge_id, receipt_url, failure_reason,
             created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&transaction.id.0)
    .bind(&transaction.intent_id.0)
    .bind(&transaction.user_id.0)
    .bind(&transaction.agent_id.0)
    .bind(transaction.amount_cents)
    .bind(&transaction.currency)
    .bind(&transaction.payment_method_ref)
    .bind(transaction.status.as_str())
    .bind(&transaction.processor_payment_id)
    .bind(&transaction.processor_charge_id)
    .bind(&transaction.receipt_url)
    .bind(&transaction.failure_reason)
    .bind(encode_ts(transaction.created_at))
    .bind(encode_ts(transaction.updated_at))
    .execute(executor)
    .await?;
    Ok(())
}

pub(crate) async fn insert_audit_row<'e, E>(
    executor: E,
    entry: &AuditEntry,
) -> Result<(), RepositoryError>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        "INSERT INTO audit_logs (id, transaction_id, sequence, action, details, prev_hash,
                                 entry_hash, signature, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&entry.id)
    .bind(&entry.transaction_id.0)
    .bind(i64::from(entry.sequence))
    .bind(&entry.action)
    .bind(serde_json::to_string(&entry.details)?)
    .bind(&entry.prev_hash)
    .bind(&entry.entry_hash)
    .bind(&entry.signature)
    .bind(encode_ts(entry.created_at))
    .execute(executor)
    .await?;
    Ok(())
}

/// Guarded move out of `processing`. `false` when the row was not processing.
async fn apply_outcome<'e, E>(
    executor: E,
    id: &TransactionId,
    outcome: &PaymentOutcome,
    at: DateTime<Utc>,
) -> Result<bool, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    let (payment_id, charge_id, receipt_url, failure_reason) = match outcome {
        PaymentOutcome::Succeeded { processor_payment_id, processor_charge_id, receipt_url } => (
            Some(processor_payment_id.as_str()),
            processor_charge_id.as_deref(),
            receipt_url.as_deref(),
            None,
        ),
        PaymentOutcome::Failed { reason } => (None, None, None, Some(reason.as_str())),
    };

    let updated = sqlx::query(
        "UPDATE transactions
         SET status = ?,
             processor_payment_id = COALESCE(?, processor_payment_id),
             processor_charge_id = COALESCE(?, processor_charge_id),
             receipt_url = COALESCE(?, receipt_url),
             failure_reason = COALESCE(?, failure_reason),
             updated_at = ?
         WHERE id = ? AND status = 'processing'",
    )
    .bind(outcome.status().as_str())
    .bind(payment_id)
    .bind(charge_id)
    .bind(receipt_url)
    .bind(failure_reason)
    .bind(encode_ts(at))
    .bind(&id.0)
    .execute(executor)
    .await?;
    Ok(updated.rows_affected() == 1)
}

impl SqlStore {
    async fn fetch_transaction(
        &self,
        filter: &str,
        value: &str,
    ) -> Result<Option<Transaction>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions t WHERE {filter} = ?"
        ))
        .bind(value)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(row_to_transaction).transpose()
    }
}

#[async_trait]
impl LedgerStore for SqlStore {
    async fn insert_transaction(&self, transaction: &Transaction) -> Result<(), StoreError> {
        insert_transaction_row(self.pool(), transaction).await.map_err(RepositoryError::from)?;
        Ok(())
    }

    async fn find_transaction(
        &self,
        id: &TransactionId,
    ) -> Result<Option<Transaction>, StoreError> {
        Ok(self.fetch_transaction("t.id", &id.0).await?)
    }

    async fn find_transaction_for_intent(
        &self,
        intent_id: &IntentId,
    ) -> Result<Option<Transaction>, StoreError> {
        Ok(self.fetch_transaction("t.intent_id", &intent_id.0).await?)
    }

    async fn list_transactions(
        &self,
        user_id: &UserId,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<TransactionSummary>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS}, i.description, i.merchant_name, i.merchant_category,
                    a.name AS agent_name
             FROM transactions t
             JOIN transaction_intents i ON i.id = t.intent_id
             JOIN agents a ON a.id = t.agent_id
             WHERE t.user_id = ?
             ORDER BY t.created_at DESC, t.rowid DESC
             LIMIT ? OFFSET ?"
        ))
        .bind(&user_id.0)
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(self.pool())
        .await
        .map_err(RepositoryError::from)?;

        let summaries = rows
            .iter()
            .map(|row| {
                Ok(TransactionSummary {
                    transaction: row_to_transaction(row)?,
                    description: column(row, "description")?,
                    merchant_name: column(row, "merchant_name")?,
                    merchant_category: column(row, "merchant_category")?,
                    agent_name: column(row, "agent_name")?,
                })
            })
            .collect::<Result<Vec<_>, RepositoryError>>()?;
        Ok(summaries)
    }

    async fn complete_with_audit(
        &self,
        id: &TransactionId,
        outcome: &PaymentOutcome,
        at: DateTime<Utc>,
        entry: &AuditEntry,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool().begin().await.map_err(RepositoryError::from)?;

        if !apply_outcome(&mut *tx, id, outcome, at).await.map_err(RepositoryError::from)? {
            tx.rollback().await.map_err(RepositoryError::from)?;
            return Ok(false);
        }
        insert_audit_row(&mut *tx, entry).await?;

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(true)
    }

    async fn append_audit_entry(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        insert_audit_row(self.pool(), entry).await?;
        Ok(())
    }

    async fn audit_trail(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_logs WHERE transaction_id = ? ORDER BY sequence ASC"
        ))
        .bind(&transaction_id.0)
        .fetch_all(self.pool())
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.iter().map(row_to_audit_entry).collect::<Result<Vec<_>, _>>()?)
    }
}
