//! Periodic tick: hands due tasks to the supervisor.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::supervisor::{LaunchOutcome, Supervisor};

/// Ticks every `every` (the first tick fires immediately) until `shutdown`
/// is cancelled.
pub async fn run_tick_loop(supervisor: Arc<Supervisor>, every: Duration, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::info!("scheduler ticking every {:?}", every);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => tick_once(&supervisor).await,
        }
    }
    tracing::info!("scheduler stopped");
}

/// One scheduling pass; errors are logged, never fatal.
pub async fn tick_once(supervisor: &Supervisor) {
    match supervisor.run_due_tasks().await {
        Ok(outcomes) => {
            let launched = outcomes
                .iter()
                .filter(|(_, o)| matches!(o, LaunchOutcome::Launched { .. }))
                .count();
            tracing::debug!(due = outcomes.len(), launched, "scheduler tick");
        }
        Err(e) => tracing::error!("scheduler tick: {:#}", e),
    }
}
