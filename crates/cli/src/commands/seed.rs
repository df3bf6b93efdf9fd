use flux_db::fixtures::{SEED_AGENT_API_KEY, SEED_AGENT_NAME, SEED_USER_API_TOKEN, SEED_USER_EMAIL};
use flux_db::{SeedDataset, SeedResult, VerificationResult};

use crate::commands::{run_with_database, CommandResult};

pub fn run() -> CommandResult {
    let result = run_with_database("seed", |_config, pool| async move {
        let seeded = SeedDataset::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 6u8))?;
        let verification = SeedDataset::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 7u8))?;

        if verification.all_present {
            Ok(seeded)
        } else {
            Err(("seed_verification", verification_failure_message(&verification), 7u8))
        }
    });

    match result {
        Ok(seeded) => CommandResult::success("seed", summary(&seeded)),
        Err(failure) => failure,
    }
}

fn summary(seeded: &SeedResult) -> String {
    format!(
        "seed dataset ready ({} agents created, {} users created):\n  - agent {SEED_AGENT_NAME} (key {SEED_AGENT_API_KEY})\n  - user {SEED_USER_EMAIL} (token {SEED_USER_API_TOKEN})",
        seeded.agents_created, seeded.users_created
    )
}

fn verification_failure_message(verification: &VerificationResult) -> String {
    let failed_checks = verification.failed_checks();
    if failed_checks.is_empty() {
        "Some seed data failed to load".to_string()
    } else {
        format!("Seed verification failed for checks: {}", failed_checks.join(", "))
    }
}
