use std::sync::Arc;
use std::time::Duration;

use flux_core::store::Store;
use flux_core::LifecycleService;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Periodically expires pending intents whose approval window has closed.
/// Exits once `shutdown` carries `true`.
pub async fn run_sweeper<S>(
    lifecycle: Arc<LifecycleService<S>>,
    interval: Duration,
    batch_size: u32,
    mut shutdown: watch::Receiver<bool>,
) where
    S: Store + ?Sized,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        event_name = "system.sweeper.started",
        interval_secs = interval.as_secs(),
        batch_size,
        "expiration sweeper started"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => match lifecycle.sweep_expired(batch_size).await {
                Ok(report) if !report.expired.is_empty() => info!(
                    event_name = "system.sweeper.swept",
                    scanned = report.scanned,
                    expired = report.expired.len(),
                    skipped = report.skipped,
                    "expired lapsed intents"
                ),
                Ok(_) => debug!(event_name = "system.sweeper.idle", "no lapsed intents"),
                Err(error) => error!(
                    event_name = "system.sweeper.failed",
                    error = %error,
                    "expiration sweep failed; retrying next tick"
                ),
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!(event_name = "system.sweeper.stopped", "expiration sweeper stopped");
}

pub fn spawn<S>(
    lifecycle: Arc<LifecycleService<S>>,
    interval: Duration,
    batch_size: u32,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    S: Store + ?Sized + 'static,
{
    tokio::spawn(run_sweeper(lifecycle, interval, batch_size, shutdown))
}
