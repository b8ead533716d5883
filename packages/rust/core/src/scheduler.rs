//! Periodic scheduler: submits the scheduled-run task every `interval` and
//! the retention cleanup every `cleanup_interval` until shut down.

use std::sync::Arc;
use std::time::Duration;

use bylawdb_shared::SchedulerConfig;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::queue::{Task, TaskQueue};

/// Shortest tick; `tokio::time::interval` rejects a zero period.
const MIN_TICK: Duration = Duration::from_secs(1);

pub struct Scheduler {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl Scheduler {
    /// Start ticking. Both tasks are submitted once immediately.
    pub fn start(queue: Arc<dyn TaskQueue>, config: &SchedulerConfig) -> Self {
        let (shutdown, mut stop) = watch::channel(false);

        let interval = config.interval.max(MIN_TICK);
        let cleanup_interval = config.cleanup_interval.max(MIN_TICK);
        let mut runs = tokio::time::interval(interval);
        runs.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut cleanups = tokio::time::interval(cleanup_interval);
        cleanups.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let retention_days = config.retention_days;

        info!(
            interval_secs = interval.as_secs(),
            cleanup_interval_secs = cleanup_interval.as_secs(),
            "scheduler started"
        );

        let handle = tokio::spawn(async move {
            loop {
                let task = tokio::select! {
                    _ = stop.changed() => break,
                    _ = runs.tick() => Task::RunScheduled,
                    _ = cleanups.tick() => Task::CleanupJobs { retention_days },
                };
                match queue.enqueue(task.clone()).await {
                    Ok(task_id) => debug!(task = task.name(), task_id = %task_id, "periodic task submitted"),
                    Err(e) => error!(task = task.name(), error = %e, "periodic task not submitted"),
                }
            }
            info!("scheduler stopped");
        });

        Self { handle, shutdown }
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            error!(error = %e, "scheduler task panicked");
        }
    }
}
