use flux_core::ledger::sha256_hex;
use flux_core::store::DirectoryStore;
use flux_core::{AgentId, UserId};
use flux_db::fixtures::{
    SEED_AGENT_API_KEY, SEED_AGENT_ID, SEED_AGENT_NAME, SEED_USER_API_TOKEN, SEED_USER_EMAIL,
    SEED_USER_ID,
};
use flux_db::migrations::run_pending;
use flux_db::{connect_with_settings, DbPool, SeedDataset, SqlStore};

async fn migrated_pool() -> DbPool {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    run_pending(&pool).await.expect("migrate");
    pool
}

#[tokio::test]
async fn seed_creates_default_agent_and_demo_user() {
    let pool = migrated_pool().await;

    let result = SeedDataset::load(&pool).await.expect("seed");
    assert_eq!(result.agents_created, 1);
    assert_eq!(result.users_created, 1);

    let verification = SeedDataset::verify(&pool).await.expect("verify");
    assert!(verification.all_present, "failed checks: {:?}", verification.failed_checks());
}

#[tokio::test]
async fn seed_is_idempotent() {
    let pool = migrated_pool().await;

    SeedDataset::load(&pool).await.expect("first seed");
    let second = SeedDataset::load(&pool).await.expect("second seed");

    assert_eq!(second.agents_created, 0);
    assert_eq!(second.users_created, 0);
    let agents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM agents")
        .fetch_one(&pool)
        .await
        .expect("count agents");
    assert_eq!(agents, 1);
}

#[tokio::test]
async fn verify_reports_missing_rows() {
    let pool = migrated_pool().await;

    let verification = SeedDataset::verify(&pool).await.expect("verify");

    assert!(!verification.all_present);
    assert_eq!(
        verification.failed_checks(),
        vec!["seed-agent", "seed-agent-trust-score", "seed-user"]
    );
}

#[tokio::test]
async fn seeded_credentials_resolve_by_digest_only() {
    let pool = migrated_pool().await;
    SeedDataset::load(&pool).await.expect("seed");
    let store = SqlStore::new(pool);

    let agent = store
        .find_agent_by_key_hash(&sha256_hex(SEED_AGENT_API_KEY.as_bytes()))
        .await
        .expect("lookup")
        .expect("seed agent");
    assert_eq!(agent.id, AgentId(SEED_AGENT_ID.to_owned()));
    assert_eq!(agent.name, SEED_AGENT_NAME);
    assert!((agent.trust_score - 0.8).abs() < f64::EPSILON);

    let by_plaintext = store.find_agent_by_key_hash(SEED_AGENT_API_KEY).await.expect("lookup");
    assert!(by_plaintext.is_none(), "keys are stored hashed");

    let user = store
        .find_user_by_token_hash(&sha256_hex(SEED_USER_API_TOKEN.as_bytes()))
        .await
        .expect("lookup")
        .expect("seed user");
    assert_eq!(user.id, UserId(SEED_USER_ID.to_owned()));
    assert_eq!(user.email, SEED_USER_EMAIL);

    let found = store.find_user(&UserId(SEED_USER_ID.to_owned())).await.expect("find user");
    assert_eq!(found, Some(user));
}

#[tokio::test]
async fn deactivated_agent_key_no_longer_resolves() {
    let pool = migrated_pool().await;
    SeedDataset::load(&pool).await.expect("seed");
    sqlx::query("UPDATE agents SET is_active = 0 WHERE id = ?")
        .bind(SEED_AGENT_ID)
        .execute(&pool)
        .await
        .expect("deactivate");
    let store = SqlStore::new(pool);

    let agent = store
        .find_agent_by_key_hash(&sha256_hex(SEED_AGENT_API_KEY.as_bytes()))
        .await
        .expect("lookup");
    assert!(agent.is_none());
}
