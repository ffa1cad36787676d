//! Scheduled expiry sweep

use std::future::Future;
use std::sync::Arc;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use crate::engine::BillingEngine;

/// Sweeps on the sweeper's interval until `shutdown` resolves
///
/// The first sweep runs immediately. A failed sweep is logged and the loop
/// carries on. Returns the number of sweeps attempted.
pub async fn run_sweeper<F>(engine: Arc<BillingEngine>, shutdown: F) -> usize
where
    F: Future<Output = ()>,
{
    let period = engine.sweeper().config().interval;
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    info!(interval_secs = period.as_secs(), "Expiry sweeper started");
    let mut runs = 0;
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                runs += 1;
                match engine.sweep_expired().await {
                    Ok(report) => info!(
                        scanned = report.scanned,
                        failed = report.failed,
                        skipped = report.skipped,
                        "Expiry sweep finished"
                    ),
                    Err(e) => error!(error = %e, "Expiry sweep failed"),
                }
            }
        }
    }
    info!(runs, "Expiry sweeper stopped");
    runs
}
