use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;

use flux_core::store::GuardrailStore;
use flux_core::{Guardrail, GuardrailId, GuardrailRule, RuleType, StoreError, UserId};

use super::{column, encode_ts, ts_column, RepositoryError, SqlStore};

const GUARDRAIL_COLUMNS: &str =
    "id, user_id, rule_type, rule_config, auto_approve, auto_approve_max_cents, is_active, created_at";

fn row_to_guardrail(row: &SqliteRow) -> Result<Guardrail, RepositoryError> {
    let rule_type: String = column(row, "rule_type")?;
    let rule_type = RuleType::parse(&rule_type)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown rule_type `{rule_type}`")))?;
    let rule_config: String = column(row, "rule_config")?;
    let rule = GuardrailRule::from_parts(rule_type, serde_json::from_str(&rule_config)?)
        .map_err(|error| RepositoryError::Decode(error.to_string()))?;

    Ok(Guardrail {
        id: GuardrailId(column(row, "id")?),
        user_id: UserId(column(row, "user_id")?),
        rule,
        auto_approve: column(row, "auto_approve")?,
        auto_approve_max_cents: column(row, "auto_approve_max_cents")?,
        is_active: column(row, "is_active")?,
        created_at: ts_column(row, "created_at")?,
    })
}

impl SqlStore {
    async fn fetch_guardrail(
        &self,
        user_id: &UserId,
        id: &GuardrailId,
    ) -> Result<Option<Guardrail>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {GUARDRAIL_COLUMNS} FROM guardrails WHERE id = ? AND user_id = ?"
        ))
        .bind(&id.0)
        .bind(&user_id.0)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(row_to_guardrail).transpose()
    }
}

#[async_trait]
impl GuardrailStore for SqlStore {
    async fn insert_guardrail(&self, guardrail: &Guardrail) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO guardrails (id, user_id, rule_type, rule_config, auto_approve,
                                     auto_approve_max_cents, is_active, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&guardrail.id.0)
        .bind(&guardrail.user_id.0)
        .bind(guardrail.rule.rule_type().as_str())
        .bind(guardrail.rule.config_json().to_string())
        .bind(guardrail.auto_approve)
        .bind(guardrail.auto_approve_max_cents)
        .bind(guardrail.is_active)
        .bind(encode_ts(guardrail.created_at))
        .execute(self.pool())
        .await
        .map_err(RepositoryError::from)?;
        Ok(())
    }

    async fn list_guardrails(&self, user_id: &UserId) -> Result<Vec<Guardrail>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {GUARDRAIL_COLUMNS} FROM guardrails
             WHERE user_id = ?
             ORDER BY created_at ASC, rowid ASC"
        ))
        .bind(&user_id.0)
        .fetch_all(self.pool())
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.iter().map(row_to_guardrail).collect::<Result<Vec<_>, _>>()?)
    }

    async fn set_guardrail_active(
        &self,
        user_id: &UserId,
        id: &GuardrailId,
        is_active: bool,
    ) -> Result<Option<Guardrail>, StoreError> {
        let updated = sqlx::query("UPDATE guardrails SET is_active = ? WHERE id = ? AND user_id = ?")
            .bind(is_active)
            .bind(&id.0)
            .bind(&user_id.0)
            .execute(self.pool())
            .await
            .map_err(RepositoryError::from)?;
        if updated.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(self.fetch_guardrail(user_id, id).await?)
    }
}
