use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;

use flux_core::store::DirectoryStore;
use flux_core::{Agent, AgentId, StoreError, User, UserId};

use super::{column, encode_ts, ts_column, RepositoryError, SqlStore};

const USER_COLUMNS: &str = "id, email, created_at";
const AGENT_COLUMNS: &str = "id, name, trust_score, is_active, created_at";

fn row_to_user(row: &SqliteRow) -> Result<User, RepositoryError> {
    Ok(User {
        id: UserId(column(row, "id")?),
        email: column(row, "email")?,
        created_at: ts_column(row, "created_at")?,
    })
}

fn row_to_agent(row: &SqliteRow) -> Result<Agent, RepositoryError> {
    Ok(Agent {
        id: AgentId(column(row, "id")?),
        name: column(row, "name")?,
        trust_score: column(row, "trust_score")?,
        is_active: column(row, "is_active")?,
        created_at: ts_column(row, "created_at")?,
    })
}

impl SqlStore {
    /// Registers a user. `api_token_hash` is the SHA-256 hex digest of the
    /// bearer token the user authenticates with.
    pub async fn insert_user(
        &self,
        user: &User,
        api_token_hash: Option<&str>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO users (id, email, api_token_hash, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&user.id.0)
        .bind(&user.email)
        .bind(api_token_hash)
        .bind(encode_ts(user.created_at))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn insert_agent(&self, agent: &Agent, api_key_hash: &str) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO agents (id, name, api_key_hash, trust_score, is_active, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&agent.id.0)
        .bind(&agent.name)
        .bind(api_key_hash)
        .bind(agent.trust_score)
        .bind(agent.is_active)
        .bind(encode_ts(agent.created_at))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Active agent holding the key with this digest.
    pub async fn find_agent_by_key_hash(
        &self,
        api_key_hash: &str,
    ) -> Result<Option<Agent>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {AGENT_COLUMNS} FROM agents WHERE api_key_hash = ? AND is_active = 1"
        ))
        .bind(api_key_hash)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(row_to_agent).transpose()
    }

    pub async fn find_user_by_token_hash(
        &self,
        api_token_hash: &str,
    ) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE api_token_hash = ?"))
            .bind(api_token_hash)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(row_to_user).transpose()
    }
}

#[async_trait]
impl DirectoryStore for SqlStore {
    async fn find_user(&self, id: &UserId) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(self.pool())
            .await
            .map_err(RepositoryError::from)?;
        Ok(row.as_ref().map(row_to_user).transpose()?)
    }

    async fn find_agent(&self, id: &AgentId) -> Result<Option<Agent>, StoreError> {
        let row = sqlx::query(&format!("SELECT {AGENT_COLUMNS} FROM agents WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(self.pool())
            .await
            .map_err(RepositoryError::from)?;
        Ok(row.as_ref().map(row_to_agent).transpose()?)
    }
}
