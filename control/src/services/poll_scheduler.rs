use podwatch_monitor::services::fetcher::worst_case_duration;
use podwatch_monitor::services::CycleOutcome;
use podwatch_monitor::Poller;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Background task that runs a poll cycle every `interval`.
///
/// The first cycle starts immediately. A tick that fires while a cycle is still
/// running (for example one started from the refresh endpoint) is dropped.
pub async fn poll_scheduler(poller: Arc<Poller>, interval: Duration) {
    info!("Starting poll scheduler (every {:?})", interval);

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        match poller.run_cycle().await {
            Ok(CycleOutcome::Completed(report)) => {
                let budget =
                    worst_case_duration(report.overview.nodes_queried, poller.config().rpc_timeout);
                if budget > interval {
                    warn!(
                        "Worst-case fetch time {:?} for {} pods exceeds refresh interval {:?}",
                        budget, report.overview.nodes_queried, interval
                    );
                }
            }
            Ok(CycleOutcome::Skipped) => {
                debug!("Scheduled cycle skipped, previous cycle still running");
            }
            // Already logged by the poller; the next tick retries discovery.
            Err(_) => {}
        }
    }
}
