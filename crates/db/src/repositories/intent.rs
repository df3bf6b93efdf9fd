use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteExecutor, SqliteRow};

use flux_core::store::IntentStore;
use flux_core::{
    AgentId, AuditEntry, IntentId, IntentStatus, PendingIntentSummary, StatusChange, StoreError,
    Transaction, TransactionIntent, UserId,
};

use super::ledger::{insert_audit_row, insert_transaction_row};
use super::{column, encode_ts, optional_ts_column, ts_column, RepositoryError, SqlStore};

const INTENT_COLUMNS: &str = "i.id, i.user_id, i.agent_id, i.description, i.merchant_name,
     i.merchant_category, i.amount_cents, i.currency, i.agent_reasoning, i.alternatives,
     i.status, i.expires_at, i.created_at, i.approved_at, i.rejected_at";

pub(crate) fn row_to_intent(row: &SqliteRow) -> Result<TransactionIntent, RepositoryError> {
    let status: String = column(row, "status")?;
    let alternatives: String = column(row, "alternatives")?;

    Ok(TransactionIntent {
        id: IntentId(column(row, "id")?),
        user_id: UserId(column(row, "user_id")?),
        agent_id: AgentId(column(row, "agent_id")?),
        description: column(row, "description")?,
        merchant_name: column(row, "merchant_name")?,
        merchant_category: column(row, "merchant_category")?,
        amount_cents: column(row, "amount_cents")?,
        currency: column(row, "currency")?,
        agent_reasoning: column(row, "agent_reasoning")?,
        alternatives: serde_json::from_str(&alternatives)?,
        status: IntentStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown intent status `{status}`")))?,
        expires_at: ts_column(row, "expires_at")?,
        created_at: ts_column(row, "created_at")?,
        approved_at: optional_ts_column(row, "approved_at")?,
        rejected_at: optional_ts_column(row, "rejected_at")?,
    })
}

/// Conditional status update. Succeeds only while the stored status still
/// equals `change.expected`.
async fn apply_status_change<'e, E>(executor: E, change: &StatusChange) -> Result<bool, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    let stamp_column = if change.sets_approved_at() { "approved_at" } else { "rejected_at" };
    let updated = sqlx::query(&format!(
        "UPDATE transaction_intents SET status = ?, {stamp_column} = ?
         WHERE id = ? AND status = ?"
    ))
    .bind(change.to.as_str())
    .bind(encode_ts(change.at))
    .bind(&change.intent_id.0)
    .bind(change.expected.as_str())
    .execute(executor)
    .await?;
    Ok(updated.rows_affected() == 1)
}

#[async_trait]
impl IntentStore for SqlStore {
    async fn insert_intent(&self, intent: &TransactionIntent) -> Result<(), StoreError> {
        let alternatives = serde_json::to_string(&intent.alternatives).map_err(RepositoryError::from)?;
        sqlx::query(
            "INSERT INTO transaction_intents (
                 id, user_id, agent_id, description, merchant_name, merchant_category,
                 amount_cents, currency, agent_reasoning, alternatives, status,
                 expires_at, created_at, approved_at, rejected_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&intent.id.0)
        .bind(&intent.user_id.0)
        .bind(&intent.agent_id.0)
        .bind(&intent.description)
        .bind(&intent.merchant_name)
        .bind(&intent.merchant_category)
        .bind(intent.amount_cents)
        .bind(&intent.currency)
        .bind(&intent.agent_reasoning)
        .bind(alternatives)
        .bind(intent.status.as_str())
        .bind(encode_ts(intent.expires_at))
        .bind(encode_ts(intent.created_at))
        .bind(intent.approved_at.map(encode_ts))
        .bind(intent.rejected_at.map(encode_ts))
        .execute(self.pool())
        .await
        .map_err(RepositoryError::from)?;
        Ok(())
    }

    async fn find_intent(&self, id: &IntentId) -> Result<Option<TransactionIntent>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {INTENT_COLUMNS} FROM transaction_intents i WHERE i.id = ?"
        ))
        .bind(&id.0)
        .fetch_optional(self.pool())
        .await
        .map_err(RepositoryError::from)?;
        Ok(row.as_ref().map(row_to_intent).transpose()?)
    }

    async fn list_pending_intents(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<PendingIntentSummary>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {INTENT_COLUMNS}, a.name AS agent_name, a.trust_score AS agent_trust_score
             FROM transaction_intents i
             JOIN agents a ON a.id = i.agent_id
             WHERE i.user_id = ? AND i.status = 'pending'
             ORDER BY i.created_at DESC, i.rowid DESC"
        ))
        .bind(&user_id.0)
        .fetch_all(self.pool())
        .await
        .map_err(RepositoryError::from)?;

        let summaries = rows
            .iter()
            .map(|row| {
                Ok(PendingIntentSummary {
                    intent: row_to_intent(row)?,
                    agent_name: column(row, "agent_name")?,
                    agent_trust_score: column(row, "agent_trust_score")?,
                })
            })
            .collect::<Result<Vec<_>, RepositoryError>>()?;
        Ok(summaries)
    }

    async fn transition(&self, change: &StatusChange) -> Result<bool, StoreError> {
        Ok(apply_status_change(self.pool(), change).await.map_err(RepositoryError::from)?)
    }

    async fn commit_approval(
        &self,
        change: &StatusChange,
        transaction: &Transaction,
        opening_entry: &AuditEntry,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool().begin().await.map_err(RepositoryError::from)?;

        if !apply_status_change(&mut *tx, change).await.map_err(RepositoryError::from)? {
            tx.rollback().await.map_err(RepositoryError::from)?;
            return Ok(false);
        }
        insert_transaction_row(&mut *tx, transaction).await.map_err(RepositoryError::from)?;
        insert_audit_row(&mut *tx, opening_entry).await?;

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(true)
    }

    async fn list_expired_pending(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<TransactionIntent>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {INTENT_COLUMNS} FROM transaction_intents i
             WHERE i.status = 'pending' AND i.expires_at < ?
             ORDER BY i.expires_at ASC, i.rowid ASC
             LIMIT ?"
        ))
        .bind(encode_ts(now))
        .bind(i64::from(limit))
        .fetch_all(self.pool())
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.iter().map(row_to_intent).collect::<Result<Vec<_>, _>>()?)
    }
}
