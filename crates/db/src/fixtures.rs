use chrono::{SecondsFormat, Utc};
use tracing::info;

use flux_core::ledger::sha256_hex;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

/// Default test agent every fresh environment is seeded with.
pub const SEED_AGENT_ID: &str = "agent-travelgpt";
pub const SEED_AGENT_NAME: &str = "TravelGPT";
pub const SEED_AGENT_API_KEY: &str = "flux_live_test_agent_123";
pub const SEED_AGENT_TRUST_SCORE: f64 = 0.8;

/// Demo account that approves what the seed agent submits.
pub const SEED_USER_ID: &str = "user-demo";
pub const SEED_USER_EMAIL: &str = "demo@flux.local";
pub const SEED_USER_API_TOKEN: &str = "flux_user_demo_token";

/// Deterministic development dataset. Loading is idempotent: existing rows
/// are left untouched.
pub struct SeedDataset;

impl SeedDataset {
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        let mut tx = pool.begin().await?;

        let agents_created = sqlx::query(
            "INSERT OR IGNORE INTO agents (id, name, api_key_hash, trust_score, is_active, created_at)
             VALUES (?, ?, ?, ?, 1, ?)",
        )
        .bind(SEED_AGENT_ID)
        .bind(SEED_AGENT_NAME)
        .bind(sha256_hex(SEED_AGENT_API_KEY.as_bytes()))
        .bind(SEED_AGENT_TRUST_SCORE)
        .bind(&now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let users_created = sqlx::query(
            "INSERT OR IGNORE INTO users (id, email, api_token_hash, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(SEED_USER_ID)
        .bind(SEED_USER_EMAIL)
        .bind(sha256_hex(SEED_USER_API_TOKEN.as_bytes()))
        .bind(&now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        info!(
            event_name = "db.seed.loaded",
            agents_created,
            users_created,
            "seed dataset loaded"
        );
        Ok(SeedResult { agents_created, users_created })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        let agent_ok: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM agents
                           WHERE id = ?1 AND name = ?2 AND api_key_hash = ?3 AND is_active = 1)",
        )
        .bind(SEED_AGENT_ID)
        .bind(SEED_AGENT_NAME)
        .bind(sha256_hex(SEED_AGENT_API_KEY.as_bytes()))
        .fetch_one(pool)
        .await?;
        checks.push(("seed-agent", agent_ok == 1));

        let trust_score: Option<f64> =
            sqlx::query_scalar("SELECT trust_score FROM agents WHERE id = ?1")
                .bind(SEED_AGENT_ID)
                .fetch_optional(pool)
                .await?;
        checks.push((
            "seed-agent-trust-score",
            trust_score.is_some_and(|score| (score - SEED_AGENT_TRUST_SCORE).abs() < f64::EPSILON),
        ));

        let user_ok: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1 AND email = ?2 AND api_token_hash = ?3)",
        )
        .bind(SEED_USER_ID)
        .bind(SEED_USER_EMAIL)
        .bind(sha256_hex(SEED_USER_API_TOKEN.as_bytes()))
        .fetch_one(pool)
        .await?;
        checks.push(("seed-user", user_ok == 1));

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SeedResult {
    pub agents_created: u64,
    pub users_created: u64,
}

#[derive(Clone, Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

impl VerificationResult {
    pub fn failed_checks(&self) -> Vec<&'static str> {
        self.checks.iter().filter(|(_, ok)| !*ok).map(|(label, _)| *label).collect()
    }
}
