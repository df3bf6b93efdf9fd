use std::sync::Arc;

use flux_core::{
    AuditSigner, LifecycleService, NoopSink, SweepReport, SystemClock, TracingAuditSink,
};
use flux_db::SqlStore;
use secrecy::ExposeSecret;

use crate::commands::{run_with_database, CommandResult};

/// One expiration pass. Connected clients are not notified, so no hub is
/// wired in.
pub fn run(batch_size: Option<u32>) -> CommandResult {
    let result = run_with_database("sweep", |config, pool| async move {
        let lifecycle = LifecycleService::new(
            Arc::new(SqlStore::new(pool)),
            AuditSigner::new(config.ledger.signing_key.expose_secret()),
            Arc::new(NoopSink),
            Arc::new(TracingAuditSink),
            Arc::new(SystemClock),
        );
        let batch_size = batch_size.unwrap_or(config.lifecycle.sweep_batch_size);
        lifecycle
            .sweep_expired(batch_size)
            .await
            .map_err(|error| ("sweep_execution", error.to_string(), 6u8))
    });

    match result {
        Ok(report) => CommandResult::success("sweep", describe(&report)),
        Err(failure) => failure,
    }
}

fn describe(report: &SweepReport) -> String {
    let mut message =
        format!("expired {} of {} lapsed pending intents", report.expired.len(), report.scanned);
    if report.skipped > 0 {
        message.push_str(&format!(" ({} already settled by another writer)", report.skipped));
    }
    message
}
