//! Job orchestration and archival for the bylaw archive.
//!
//! This crate ties the crawler, extractor, datastore and object store
//! together:
//! - [`preserver`]: write-once archival of fetched pages and files
//! - [`orchestrator`]: job eligibility, execution, retry and bookkeeping
//! - [`queue`]: task submission and the in-process worker pool
//! - [`scheduler`]: periodic scheduled runs and retention cleanup
//! - [`schedule`]: cron evaluation for `next_run_at`

pub mod orchestrator;
pub mod preserver;
pub mod progress;
pub mod queue;
pub mod schedule;
pub mod scheduler;

pub use orchestrator::{
    BatchEntry, Eligibility, JobOrchestrator, OrchestratorSettings, PreparedJob, ScheduleOutcome,
    SkipReason, evaluate,
};
pub use preserver::{Capture, IntegrityReport, PreservationResult, Preserver};
pub use progress::{JobProgress, SilentProgress};
pub use queue::{LocalTaskQueue, Task, TaskQueue, WorkerPool};
pub use schedule::{CronSchedule, next_run_at};
pub use scheduler::Scheduler;
