//! Periodic cache eviction.

use crate::cache::store::CacheStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Run `sweep(max_age)` every `period` until the runtime shuts down.
///
/// The first pass happens one full period after startup, since startup
/// already sweeps once before the server binds.
pub fn spawn_periodic_sweep(
    store: Arc<CacheStore>,
    max_age: Duration,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match store.sweep(max_age).await {
                Ok(report) => tracing::info!(
                    areas_scanned = report.areas_scanned,
                    files_removed = report.files_removed,
                    failures = report.failures,
                    "Periodic cache sweep finished"
                ),
                Err(e) => tracing::error!("Periodic cache sweep failed: {}", e),
            }
        }
    })
}
