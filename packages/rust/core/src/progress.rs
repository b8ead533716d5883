//! Job progress callbacks.

use bylawdb_shared::{JobId, JobResult};

/// Trait for receiving progress updates while a job runs.
pub trait JobProgress: Send + Sync {
    /// Called once the job has moved to `running`.
    fn started(&self, job_id: &JobId, jurisdiction_id: &str);
    /// Called after each fetch. `queued` is the number of URLs still waiting.
    fn page_fetched(&self, url: &str, fetched: u32, queued: usize);
    fn page_preserved(&self, url: &str, changed: bool);
    fn page_failed(&self, url: &str, error: &str);
    /// Called when the job reaches a terminal state.
    fn done(&self, result: &JobResult);
}

/// A no-op progress reporter.
pub struct SilentProgress;

impl JobProgress for SilentProgress {
    fn started(&self, _job_id: &JobId, _jurisdiction_id: &str) {}
    fn page_fetched(&self, _url: &str, _fetched: u32, _queued: usize) {}
    fn page_preserved(&self, _url: &str, _changed: bool) {}
    fn page_failed(&self, _url: &str, _error: &str) {}
    fn done(&self, _result: &JobResult) {}
}
