//! Scrape job lifecycle: eligibility, creation, execution, retry and
//! bookkeeping.
//!
//! States move `pending → running → {completed | failed | cancelled}` and
//! never leave a terminal state. A retry is always a new job row that
//! references the failed one through `retry_of`.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use bylawdb_artifacts::ObjectStore;
use bylawdb_crawler::parser::is_binary_url;
use bylawdb_crawler::{
    FetchOptions, Fetcher, Frontier, JurisdictionSource, ParsedPage, Renderer, SourceRegistry,
    capture_assets, default_renderer,
};
use bylawdb_extract::{ExtractionContext, RequirementExtractor, RequirementSet};
use bylawdb_shared::{
    AppConfig, BylawError, ConfigSpec, DocumentKind, FetchConfig, JobErrorEntry, JobId,
    JobResult, JobStatus, JobType, Jurisdiction, JurisdictionConfig, Result, SchedulerConfig,
    ScrapeJob, WorkerConfig,
};
use bylawdb_storage::{JobCompletion, Storage};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::preserver::{Capture, Preserver};
use crate::progress::{JobProgress, SilentProgress};
use crate::queue::{Task, TaskQueue};
use crate::schedule::{CronSchedule, next_run_at};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Runtime settings of a [`JobOrchestrator`].
#[derive(Debug, Clone, Default)]
pub struct OrchestratorSettings {
    pub fetch: FetchConfig,
    pub scheduler: SchedulerConfig,
    pub worker: WorkerConfig,
}

impl From<&AppConfig> for OrchestratorSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            fetch: FetchConfig::from(config),
            scheduler: SchedulerConfig::from(config),
            worker: WorkerConfig::from(config),
        }
    }
}

// ---------------------------------------------------------------------------
// Eligibility
// ---------------------------------------------------------------------------

/// Why a jurisdiction was not scheduled. Skips are not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SkipReason {
    /// No active configuration.
    NoConfig,
    /// The jurisdiction does not allow scheduled scraping.
    Disabled,
    /// Too many consecutive failures.
    CircuitOpen { failure_count: u32 },
    /// The last run was too recent.
    Cooldown { last_run_at: DateTime<Utc> },
    /// A pending or running job already exists (or is being created).
    AlreadyRunning { job_id: Option<JobId> },
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoConfig => "no-config",
            Self::Disabled => "disabled",
            Self::CircuitOpen { .. } => "circuit-open",
            Self::Cooldown { .. } => "cooldown",
            Self::AlreadyRunning { .. } => "already-running",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Circuit breaker and cooldown gate for one config.
pub fn evaluate(
    config: &JurisdictionConfig,
    now: DateTime<Utc>,
    settings: &SchedulerConfig,
) -> Option<SkipReason> {
    if !config.spec.is_active {
        return Some(SkipReason::NoConfig);
    }
    if config.failure_count >= settings.failure_threshold {
        return Some(SkipReason::CircuitOpen {
            failure_count: config.failure_count,
        });
    }
    match config.last_run_at {
        Some(last_run_at) if now - last_run_at < settings.cooldown => {
            Some(SkipReason::Cooldown { last_run_at })
        }
        _ => None,
    }
}

/// Result of [`JobOrchestrator::check_eligibility`].
#[derive(Debug, Clone)]
pub enum Eligibility {
    Eligible(JurisdictionConfig),
    Skipped(SkipReason),
}

/// Result of [`JobOrchestrator::prepare_job`].
#[derive(Debug, Clone)]
pub enum PreparedJob {
    Created(ScrapeJob),
    Skipped(SkipReason),
}

/// Result of scheduling one jurisdiction.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScheduleOutcome {
    Queued { job_id: JobId, task_id: String },
    Skipped { reason: SkipReason },
}

/// Per-jurisdiction outcome of a batch or scheduled run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchEntry {
    pub jurisdiction_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ScheduleOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchEntry {
    fn new(jurisdiction_id: &str, result: Result<ScheduleOutcome>) -> Self {
        let (outcome, error) = match result {
            Ok(outcome) => (Some(outcome), None),
            Err(e) => (None, Some(e.to_string())),
        };
        Self {
            jurisdiction_id: jurisdiction_id.to_string(),
            outcome,
            error,
        }
    }
}

// ---------------------------------------------------------------------------
// Advisory locks
// ---------------------------------------------------------------------------

/// In-process advisory locks keyed by jurisdiction id.
#[derive(Default)]
struct JurisdictionLocks {
    held: Mutex<HashSet<String>>,
}

struct LockGuard<'a> {
    locks: &'a JurisdictionLocks,
    id: String,
}

impl JurisdictionLocks {
    fn try_lock(&self, id: &str) -> Option<LockGuard<'_>> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if !held.insert(id.to_string()) {
            return None;
        }
        Some(LockGuard {
            locks: self,
            id: id.to_string(),
        })
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.locks
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

// ---------------------------------------------------------------------------
// Crawl state
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct CrawlState {
    found: u32,
    fetched: u32,
    processed: u32,
    changed: u32,
    errors: Vec<JobErrorEntry>,
    cancelled: bool,
}

impl CrawlState {
    fn record_error(&mut self, url: &str, message: impl Into<String>, progress: &dyn JobProgress) {
        let message = message.into();
        warn!(url, error = %message, "document skipped");
        progress.page_failed(url, &message);
        self.errors.push(JobErrorEntry {
            url: url.to_string(),
            message,
        });
    }
}

// ---------------------------------------------------------------------------
// JobOrchestrator
// ---------------------------------------------------------------------------

/// Drives jurisdictions through scrape jobs. Built once per process with its
/// datastore, object store and renderer injected.
pub struct JobOrchestrator {
    storage: Arc<Storage>,
    preserver: Preserver,
    sources: SourceRegistry,
    renderer: Arc<dyn Renderer>,
    settings: OrchestratorSettings,
    locks: JurisdictionLocks,
}

impl JobOrchestrator {
    pub fn new(
        storage: Arc<Storage>,
        store: Arc<dyn ObjectStore>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            preserver: Preserver::new(storage.clone(), store),
            storage,
            sources: SourceRegistry::new(),
            renderer: default_renderer(),
            settings,
            locks: JurisdictionLocks::default(),
        }
    }

    /// Replace the browser renderer.
    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Replace the source family registry.
    pub fn with_sources(mut self, sources: SourceRegistry) -> Self {
        self.sources = sources;
        self
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn preserver(&self) -> &Preserver {
        &self.preserver
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    // -----------------------------------------------------------------------
    // Jurisdiction management
    // -----------------------------------------------------------------------

    /// Create or update a jurisdiction and make `spec` its active config.
    /// The new config is due immediately.
    pub async fn register_jurisdiction(
        &self,
        jurisdiction: &Jurisdiction,
        spec: &ConfigSpec,
    ) -> Result<JurisdictionConfig> {
        self.sources.build(spec)?;
        if let Some(cron) = spec.schedule_cron.as_deref() {
            CronSchedule::parse(cron)?;
        }
        if spec.target_urls.is_empty() && spec.discovery_urls.is_empty() {
            return Err(BylawError::validation("config has no target or discovery URLs"));
        }

        self.storage.upsert_jurisdiction(jurisdiction).await?;
        let config = self
            .storage
            .replace_active_config(&jurisdiction.id, spec, None)
            .await?;
        info!(jurisdiction = %jurisdiction.id, config_id = %config.id, "jurisdiction registered");
        Ok(config)
    }

    /// Manually close the circuit breaker of a jurisdiction's active config.
    pub async fn reset_circuit(&self, jurisdiction_id: &str) -> Result<()> {
        let config = self
            .storage
            .active_config(jurisdiction_id)
            .await?
            .ok_or_else(|| BylawError::NotFound(format!("active config of {jurisdiction_id}")))?;
        self.storage.reset_circuit(&config.id).await?;
        info!(jurisdiction = jurisdiction_id, "circuit breaker reset");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Eligibility
    // -----------------------------------------------------------------------

    pub async fn check_eligibility(&self, jurisdiction_id: &str) -> Result<Eligibility> {
        let Some(config) = self.storage.active_config(jurisdiction_id).await? else {
            return Ok(Eligibility::Skipped(SkipReason::NoConfig));
        };
        Ok(match evaluate(&config, Utc::now(), &self.settings.scheduler) {
            Some(reason) => Eligibility::Skipped(reason),
            None => Eligibility::Eligible(config),
        })
    }

    /// Whether a jurisdiction may run now: it has an active config, its
    /// circuit is closed and its cooldown has elapsed.
    pub async fn should_run(&self, jurisdiction_id: &str) -> Result<bool> {
        Ok(matches!(
            self.check_eligibility(jurisdiction_id).await?,
            Eligibility::Eligible(_)
        ))
    }

    // -----------------------------------------------------------------------
    // Job creation
    // -----------------------------------------------------------------------

    /// Insert a `pending` job row.
    pub async fn create_job(
        &self,
        jurisdiction_id: &str,
        config_id: Option<&str>,
        job_type: JobType,
        triggered_by: Option<&str>,
    ) -> Result<ScrapeJob> {
        let job = ScrapeJob {
            id: JobId::new(),
            jurisdiction_id: jurisdiction_id.to_string(),
            config_id: config_id.map(str::to_string),
            job_type,
            status: JobStatus::Pending,
            triggered_by: triggered_by.map(str::to_string),
            attempt: 1,
            retry_of: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            duration_seconds: None,
            documents_found: 0,
            documents_processed: 0,
            documents_changed: 0,
            error_message: None,
            error_details: None,
            errors: Vec::new(),
            task_id: None,
        };
        self.storage.insert_job(&job).await?;
        info!(job_id = %job.id, jurisdiction = jurisdiction_id, job_type = %job_type, "job created");
        Ok(job)
    }

    /// Run every gate and, if the jurisdiction may run, create its job.
    ///
    /// `force` bypasses the circuit breaker and cooldown, never the
    /// one-active-job rule. Scheduled and batch jobs also require the
    /// jurisdiction to allow scraping.
    pub async fn prepare_job(
        &self,
        jurisdiction_id: &str,
        job_type: JobType,
        triggered_by: Option<&str>,
        force: bool,
    ) -> Result<PreparedJob> {
        let Some(_guard) = self.locks.try_lock(jurisdiction_id) else {
            return Ok(PreparedJob::Skipped(SkipReason::AlreadyRunning { job_id: None }));
        };

        if let Some(active) = self.storage.active_job_for(jurisdiction_id).await? {
            debug!(jurisdiction = jurisdiction_id, job_id = %active, "job already active");
            return Ok(PreparedJob::Skipped(SkipReason::AlreadyRunning {
                job_id: Some(active),
            }));
        }

        let Some(config) = self.storage.active_config(jurisdiction_id).await? else {
            return Ok(PreparedJob::Skipped(SkipReason::NoConfig));
        };

        if job_type != JobType::Manual {
            let enabled = self
                .storage
                .get_jurisdiction(jurisdiction_id)
                .await?
                .is_some_and(|j| j.scraping_enabled);
            if !enabled {
                return Ok(PreparedJob::Skipped(SkipReason::Disabled));
            }
        }

        if !force {
            if let Some(reason) = evaluate(&config, Utc::now(), &self.settings.scheduler) {
                info!(jurisdiction = jurisdiction_id, reason = %reason, "jurisdiction skipped");
                return Ok(PreparedJob::Skipped(reason));
            }
        }

        let job = self
            .create_job(jurisdiction_id, Some(&config.id), job_type, triggered_by)
            .await?;
        Ok(PreparedJob::Created(job))
    }

    // -----------------------------------------------------------------------
    // Scheduling
    // -----------------------------------------------------------------------

    /// Create a job for one jurisdiction and submit it to `queue`.
    #[instrument(skip(self, queue))]
    pub async fn schedule_jurisdiction(
        &self,
        queue: &dyn TaskQueue,
        jurisdiction_id: &str,
        job_type: JobType,
        triggered_by: Option<&str>,
        force: bool,
    ) -> Result<ScheduleOutcome> {
        let job = match self
            .prepare_job(jurisdiction_id, job_type, triggered_by, force)
            .await?
        {
            PreparedJob::Created(job) => job,
            PreparedJob::Skipped(reason) => return Ok(ScheduleOutcome::Skipped { reason }),
        };

        match queue
            .enqueue(Task::RunJob {
                job_id: job.id.clone(),
            })
            .await
        {
            Ok(task_id) => {
                info!(job_id = %job.id, task_id = %task_id, "job queued");
                Ok(ScheduleOutcome::Queued {
                    job_id: job.id,
                    task_id,
                })
            }
            Err(e) => {
                let mut completion = JobCompletion::empty(JobStatus::Failed);
                completion.error_message = Some(format!("enqueue failed: {e}"));
                self.storage.finish_job(&job.id, &completion).await?;
                Err(e)
            }
        }
    }

    /// Schedule each jurisdiction independently. One failure does not stop
    /// the others.
    pub async fn schedule_batch(
        &self,
        queue: &dyn TaskQueue,
        jurisdiction_ids: &[String],
        triggered_by: Option<&str>,
    ) -> Vec<BatchEntry> {
        let mut entries = Vec::with_capacity(jurisdiction_ids.len());
        for id in jurisdiction_ids {
            let result = self
                .schedule_jurisdiction(queue, id, JobType::Batch, triggered_by, false)
                .await;
            if let Err(e) = &result {
                warn!(jurisdiction = %id, error = %e, "batch entry failed");
            }
            entries.push(BatchEntry::new(id, result));
        }
        entries
    }

    /// Queue a job for every jurisdiction whose config is due.
    #[instrument(skip_all)]
    pub async fn run_scheduled(&self, queue: &dyn TaskQueue) -> Result<Vec<BatchEntry>> {
        let now = Utc::now();
        let due = self.storage.due_configs(now).await?;
        debug!(due = due.len(), "scheduled run");

        let mut entries = Vec::with_capacity(due.len());
        for config in due {
            let result = self
                .schedule_jurisdiction(queue, &config.jurisdiction_id, JobType::Scheduled, None, false)
                .await;

            if let Ok(ScheduleOutcome::Queued { .. }) = &result {
                match next_run_at(config.spec.schedule_cron.as_deref(), now) {
                    Ok(next) => self.storage.set_next_run(&config.id, next).await?,
                    Err(e) => warn!(config_id = %config.id, error = %e, "cannot compute next run"),
                }
            }
            entries.push(BatchEntry::new(&config.jurisdiction_id, result));
        }

        let queued = entries
            .iter()
            .filter(|e| matches!(e.outcome, Some(ScheduleOutcome::Queued { .. })))
            .count();
        info!(due = entries.len(), queued, "scheduled jurisdictions");
        Ok(entries)
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Entry point for queue workers.
    pub async fn handle_task(&self, queue: &dyn TaskQueue, task_id: &str, task: &Task) -> Result<()> {
        match task {
            Task::RunJob { job_id } => {
                self.execute(job_id, Some(task_id), Some(queue), &SilentProgress)
                    .await?;
            }
            Task::RunScheduled => {
                self.run_scheduled(queue).await?;
            }
            Task::CleanupJobs { retention_days } => {
                self.cleanup_old_jobs(*retention_days).await?;
            }
        }
        Ok(())
    }

    /// Run a job and, when it fails and a queue is given, schedule a retry.
    pub async fn execute(
        &self,
        job_id: &JobId,
        task_id: Option<&str>,
        queue: Option<&dyn TaskQueue>,
        progress: &dyn JobProgress,
    ) -> Result<JobResult> {
        let result = self.run_job(job_id, task_id, progress).await?;

        if result.status == JobStatus::Failed {
            if let Some(queue) = queue {
                if let Err(e) = self.schedule_retry(queue, job_id).await {
                    warn!(job_id = %job_id, error = %e, "could not schedule retry");
                }
            }
        }
        Ok(result)
    }

    /// Execute a pending job: fetch, parse, extract and preserve every
    /// discovered URL in order, then record the outcome.
    ///
    /// Per-URL failures are collected in the result. A job-level failure
    /// (no config, invalid config, every fetch failed, datastore error) is
    /// recorded as `failed` and returned as a result, not an error. Errors
    /// are returned only when the job cannot be started.
    #[instrument(skip_all, fields(job_id = %job_id))]
    pub async fn run_job(
        &self,
        job_id: &JobId,
        task_id: Option<&str>,
        progress: &dyn JobProgress,
    ) -> Result<JobResult> {
        let job = self
            .storage
            .get_job(job_id)
            .await?
            .ok_or_else(|| BylawError::NotFound(format!("job {job_id}")))?;

        if !self.storage.start_job(job_id, Utc::now(), task_id).await? {
            let from = self
                .storage
                .job_status(job_id)
                .await?
                .unwrap_or(job.status);
            return Err(BylawError::InvalidTransition {
                from: from.to_string(),
                to: JobStatus::Running.to_string(),
            });
        }

        info!(jurisdiction = %job.jurisdiction_id, attempt = job.attempt, "job started");
        progress.started(job_id, &job.jurisdiction_id);
        let started = Instant::now();
        let mut state = CrawlState::default();

        let (config, outcome) = match self.job_config(&job).await {
            Ok(config) => {
                let outcome = self.crawl(&job, &config, &mut state, progress).await;
                (Some(config), outcome)
            }
            Err(e) => (None, Err(e)),
        };

        let failure = match outcome {
            Err(e) => Some(e),
            Ok(()) if state.found > 0 && state.fetched == 0 && !state.cancelled => Some(
                BylawError::Network(format!("all {} URL(s) failed to fetch", state.found)),
            ),
            Ok(()) => None,
        };

        let duration_seconds = started.elapsed().as_secs_f64();
        let mut completion = JobCompletion {
            status: JobStatus::Completed,
            completed_at: Utc::now(),
            duration_seconds,
            documents_found: state.found,
            documents_processed: state.processed,
            documents_changed: state.changed,
            error_message: None,
            error_details: None,
            errors: state.errors.clone(),
        };

        let config_id = config.as_ref().map(|c| c.id.as_str());
        let status = if state.cancelled {
            info!("job cancelled");
            JobStatus::Cancelled
        } else if let Some(e) = failure {
            let message = e.to_string();
            warn!(error = %message, kind = e.kind(), "job failed");
            completion.status = JobStatus::Failed;
            completion.error_message = Some(message.clone());
            completion.error_details = Some(json!({
                "type": e.kind(),
                "message": message,
                "attempt": job.attempt,
                "urls_failed": state.errors.len(),
            }));
            let status = self.finish(job_id, &completion).await?;
            if status != JobStatus::Failed {
                info!(%status, "job ended before its failure was recorded");
            } else if let Some(config_id) = config_id {
                let failures = self.storage.record_failure(config_id, &message).await?;
                if failures >= self.settings.scheduler.failure_threshold {
                    warn!(
                        jurisdiction = %job.jurisdiction_id,
                        failures,
                        "circuit breaker open"
                    );
                }
            }
            status
        } else {
            let status = self.finish(job_id, &completion).await?;
            if status == JobStatus::Completed {
                if let Some(config) = &config {
                    let next = next_run_at(config.spec.schedule_cron.as_deref(), Utc::now())
                        .map_err(|e| warn!(error = %e, "cannot compute next run"))
                        .ok();
                    self.storage.record_success(&config.id, next).await?;
                }
            }
            status
        };

        let result = JobResult {
            job_id: job_id.clone(),
            status,
            documents_found: state.found,
            documents_processed: state.processed,
            documents_changed: state.changed,
            duration_seconds,
            errors: state.errors,
        };
        info!(
            status = %result.status,
            found = result.documents_found,
            processed = result.documents_processed,
            changed = result.documents_changed,
            duration_secs = duration_seconds,
            "job finished"
        );
        progress.done(&result);
        Ok(result)
    }

    /// Write the terminal state. Returns the status actually stored, which
    /// is `cancelled` when the job was cancelled while finishing.
    async fn finish(&self, job_id: &JobId, completion: &JobCompletion) -> Result<JobStatus> {
        if self.storage.finish_job(job_id, completion).await? {
            return Ok(completion.status);
        }
        let stored = self.storage.job_status(job_id).await?;
        debug!(?stored, wanted = %completion.status, "terminal state already set");
        Ok(stored.unwrap_or(completion.status))
    }

    async fn job_config(&self, job: &ScrapeJob) -> Result<JurisdictionConfig> {
        let config = match &job.config_id {
            Some(config_id) => self.storage.get_config(config_id).await?,
            None => self.storage.active_config(&job.jurisdiction_id).await?,
        };
        config.ok_or_else(|| {
            BylawError::config(format!(
                "jurisdiction {} has no configuration for this job",
                job.jurisdiction_id
            ))
        })
    }

    /// Build the source and fetcher for a config, crawl, and release the
    /// browser session whatever the outcome.
    async fn crawl(
        &self,
        job: &ScrapeJob,
        config: &JurisdictionConfig,
        state: &mut CrawlState,
        progress: &dyn JobProgress,
    ) -> Result<()> {
        let source = self.sources.build(&config.spec)?;
        let fetcher = Fetcher::new(
            &self.settings.fetch,
            &config.spec.custom_headers,
            self.renderer.clone(),
        )?;

        let outcome = self
            .crawl_urls(job, &config.spec, source, &fetcher, state, progress)
            .await;
        fetcher.cleanup().await;
        outcome
    }

    async fn crawl_urls(
        &self,
        job: &ScrapeJob,
        spec: &ConfigSpec,
        source: Arc<dyn JurisdictionSource>,
        fetcher: &Fetcher,
        state: &mut CrawlState,
        progress: &dyn JobProgress,
    ) -> Result<()> {
        let page_options = if spec.requires_javascript {
            FetchOptions::browser(spec.capture_screenshots)
        } else {
            FetchOptions::http()
        };

        let mut frontier = Frontier::new(self.settings.fetch.max_pages_per_job);
        frontier.extend(source.discover());
        debug!(source = source.name(), seeds = frontier.len(), "crawl started");

        while let Some(url) = frontier.pop() {
            if self.storage.job_status(&job.id).await? == Some(JobStatus::Cancelled) {
                state.cancelled = true;
                break;
            }
            state.found += 1;

            // Binary files are never rendered.
            let options = if is_binary_url(&url) {
                FetchOptions::http()
            } else {
                page_options
            };
            let content = match fetcher.fetch(&url, options).await {
                Ok(content) => content,
                Err(e) => {
                    state.record_error(&url, e.to_string(), progress);
                    self.save_progress(job, state).await?;
                    continue;
                }
            };
            state.fetched += 1;
            progress.page_fetched(&url, state.fetched, frontier.len());

            let parse_source = source.clone();
            let parse_url = url.clone();
            let analyzed = tokio::task::spawn_blocking(move || {
                let page = parse_source.parse(
                    &parse_url,
                    content.metadata.content_type.as_deref(),
                    &content.body,
                );
                let requirements = match &page {
                    Ok(page) if page.kind != DocumentKind::Binary => {
                        analyze_requirements(&parse_url, &page.text)
                    }
                    _ => None,
                };
                (content, page, requirements)
            })
            .await;

            let (content, page, requirements) = match analyzed {
                Ok(analyzed) => analyzed,
                Err(e) => {
                    state.record_error(&url, format!("parse task failed: {e}"), progress);
                    self.save_progress(job, state).await?;
                    continue;
                }
            };

            let page = match page {
                Ok(page) => page,
                Err(e) => {
                    // The raw page is still archived.
                    state.record_error(&url, e.to_string(), progress);
                    ParsedPage {
                        kind: DocumentKind::Unknown,
                        items: Vec::new(),
                        pagination: Vec::new(),
                        text: String::new(),
                    }
                }
            };

            let assets = if spec.capture_assets && page.kind != DocumentKind::Binary {
                capture_assets(fetcher, &content.text(), &url).await
            } else {
                Vec::new()
            };

            let preserved = self
                .preserver
                .preserve(Capture {
                    jurisdiction_id: &job.jurisdiction_id,
                    job_id: Some(&job.id),
                    url: &url,
                    kind: page.kind,
                    content: &content,
                    assets: &assets,
                    items: &page.items,
                    requirements: requirements.as_ref(),
                })
                .await;

            if preserved.success {
                state.processed += 1;
                if preserved.changed {
                    state.changed += 1;
                }
                progress.page_preserved(&url, preserved.changed);
            } else {
                state.record_error(&url, preserved.errors.join("; "), progress);
            }

            let queued = frontier.extend(source.follow(&page));
            if queued > 0 {
                debug!(url = %url, queued, "followed links");
            }
            self.save_progress(job, state).await?;
        }

        if frontier.dropped() > 0 {
            warn!(
                dropped = frontier.dropped(),
                limit = self.settings.fetch.max_pages_per_job,
                "page limit reached, remaining URLs skipped"
            );
        }
        Ok(())
    }

    async fn save_progress(&self, job: &ScrapeJob, state: &CrawlState) -> Result<()> {
        self.storage
            .update_job_progress(&job.id, state.found, state.processed, state.changed)
            .await
    }

    /// Create and submit the retry of a failed job, unless retries are
    /// exhausted or the jurisdiction's circuit is open.
    pub async fn schedule_retry(
        &self,
        queue: &dyn TaskQueue,
        failed_job_id: &JobId,
    ) -> Result<Option<JobId>> {
        let failed = self
            .storage
            .get_job(failed_job_id)
            .await?
            .ok_or_else(|| BylawError::NotFound(format!("job {failed_job_id}")))?;

        let max_retries = self.settings.worker.max_task_retries;
        if failed.attempt > max_retries {
            warn!(job_id = %failed.id, attempts = failed.attempt, "retries exhausted");
            return Ok(None);
        }

        if let Some(config_id) = &failed.config_id {
            if let Some(config) = self.storage.get_config(config_id).await? {
                if config.failure_count >= self.settings.scheduler.failure_threshold {
                    warn!(job_id = %failed.id, failures = config.failure_count, "circuit open, not retrying");
                    return Ok(None);
                }
            }
        }

        let retry = ScrapeJob {
            id: JobId::new(),
            status: JobStatus::Pending,
            attempt: failed.attempt + 1,
            retry_of: Some(failed.id.clone()),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            duration_seconds: None,
            documents_found: 0,
            documents_processed: 0,
            documents_changed: 0,
            error_message: None,
            error_details: None,
            errors: Vec::new(),
            task_id: None,
            ..failed
        };
        self.storage.insert_job(&retry).await?;

        let delay = self.settings.worker.retry_delay;
        queue
            .enqueue_after(
                Task::RunJob {
                    job_id: retry.id.clone(),
                },
                delay,
            )
            .await?;
        info!(
            job_id = %retry.id,
            retry_of = %failed_job_id,
            attempt = retry.attempt,
            delay_secs = delay.as_secs(),
            "retry scheduled"
        );
        Ok(Some(retry.id))
    }

    /// Fail a job whose execution was terminated from outside (hard time
    /// limit). Counts written so far are kept.
    pub async fn abort_job(&self, job_id: &JobId, reason: &str) -> Result<()> {
        let job = self
            .storage
            .get_job(job_id)
            .await?
            .ok_or_else(|| BylawError::NotFound(format!("job {job_id}")))?;

        let now = Utc::now();
        let completion = JobCompletion {
            status: JobStatus::Failed,
            completed_at: now,
            duration_seconds: job
                .started_at
                .map(|t| (now - t).num_milliseconds() as f64 / 1000.0)
                .unwrap_or(0.0),
            documents_found: job.documents_found,
            documents_processed: job.documents_processed,
            documents_changed: job.documents_changed,
            error_message: Some(reason.to_string()),
            error_details: Some(json!({ "type": "TimeLimit", "message": reason })),
            errors: job.errors.clone(),
        };

        if self.storage.finish_job(job_id, &completion).await? {
            warn!(job_id = %job_id, reason, "job aborted");
            if let Some(config_id) = &job.config_id {
                self.storage.record_failure(config_id, reason).await?;
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Delete terminal jobs created more than `retention_days` ago.
    pub async fn cleanup_old_jobs(&self, retention_days: u32) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));
        let deleted = self.storage.delete_terminal_jobs_before(cutoff).await?;
        info!(retention_days, deleted, "old jobs cleaned up");
        Ok(deleted)
    }

    /// Flip a pending or running job to `cancelled`. A running job stops
    /// before its next URL. Returns `false` if the job was already terminal.
    pub async fn cancel_job(&self, job_id: &JobId) -> Result<bool> {
        let cancelled = self.storage.cancel_job(job_id).await?;
        if cancelled {
            info!(job_id = %job_id, "job cancelled");
        }
        Ok(cancelled)
    }

    pub async fn job_status(&self, job_id: &JobId) -> Result<ScrapeJob> {
        self.storage
            .get_job(job_id)
            .await?
            .ok_or_else(|| BylawError::NotFound(format!("job {job_id}")))
    }
}

/// Requirement extraction for relevant pages; implausible values are logged.
fn analyze_requirements(url: &str, text: &str) -> Option<RequirementSet> {
    let extractor = RequirementExtractor::new();
    if !extractor.is_relevant(text) {
        return None;
    }
    let set = extractor.extract(text, &ExtractionContext::for_url(url));
    let report = extractor.validate(&set);
    for warning in &report.warnings {
        warn!(url, warning = %warning, "implausible requirement value");
    }
    Some(set)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use bylawdb_artifacts::MemoryObjectStore;
    use bylawdb_crawler::NoopRenderer;
    use bylawdb_shared::PreservationStatus;
    use chrono::Duration as ChronoDuration;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::queue::LocalTaskQueue;

    const ADU_PAGE: &str = r#"<html><head><title>Accessory Dwelling Units</title></head>
<body><main><h1>Bylaw 2024-45 Accessory Dwelling Units</h1>
<p>An accessory dwelling unit shall have a maximum height of 4.5 meters.</p>
<p>The front setback shall be at least 3 feet.</p></main></body></html>"#;

    const LISTING_PAGE: &str = r#"<html><head><title>Bylaws</title></head><body><main><ul>
<li><a href="/bylaws/adu">ADU bylaw</a></li>
<li><a href="/bylaws/parking">Parking bylaw</a></li>
<li><a href="/bylaws/noise">Noise bylaw</a></li>
<li><a href="/bylaws/fences">Fence bylaw</a></li>
<li><a href="/bylaws/signs">Sign bylaw</a></li>
<li><a href="/bylaws/trees">Tree protection bylaw</a></li>
</ul></main></body></html>"#;

    /// Records submitted tasks without running them.
    #[derive(Default)]
    struct RecordingQueue {
        tasks: StdMutex<Vec<(Task, Duration)>>,
    }

    impl RecordingQueue {
        fn tasks(&self) -> Vec<(Task, Duration)> {
            self.tasks.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TaskQueue for RecordingQueue {
        async fn enqueue(&self, task: Task) -> Result<String> {
            self.enqueue_after(task, Duration::ZERO).await
        }

        async fn enqueue_after(&self, task: Task, delay: Duration) -> Result<String> {
            self.tasks.lock().unwrap().push((task, delay));
            Ok(Uuid::now_v7().to_string())
        }
    }

    fn settings() -> OrchestratorSettings {
        let mut settings = OrchestratorSettings::default();
        settings.fetch.max_attempts = 1;
        settings.fetch.backoff_base = Duration::from_millis(5);
        settings.fetch.backoff_cap = Duration::from_millis(10);
        settings
    }

    async fn orchestrator() -> (Arc<JobOrchestrator>, Arc<MemoryObjectStore>) {
        let tmp = std::env::temp_dir().join(format!("bylawdb_test_{}.db", Uuid::now_v7()));
        let storage = Arc::new(Storage::open(&tmp, 4).await.unwrap());
        let store = Arc::new(MemoryObjectStore::new());
        let orchestrator = JobOrchestrator::new(storage, store.clone(), settings())
            .with_renderer(Arc::new(NoopRenderer));
        (Arc::new(orchestrator), store)
    }

    async fn register(orchestrator: &JobOrchestrator, spec: ConfigSpec) -> JurisdictionConfig {
        orchestrator
            .register_jurisdiction(
                &Jurisdiction {
                    id: "saanich".into(),
                    name: "District of Saanich".into(),
                    scraping_enabled: true,
                },
                &spec,
            )
            .await
            .unwrap()
    }

    async fn html(server: &MockServer, route: &str, body: &str) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(body.to_owned(), "text/html; charset=utf-8"),
            )
            .mount(server)
            .await;
    }

    async fn created(orchestrator: &JobOrchestrator, force: bool) -> ScrapeJob {
        match orchestrator
            .prepare_job("saanich", JobType::Manual, Some("tests"), force)
            .await
            .unwrap()
        {
            PreparedJob::Created(job) => job,
            PreparedJob::Skipped(reason) => panic!("unexpected skip: {reason}"),
        }
    }

    fn config_with(failure_count: u32, last_run_at: Option<DateTime<Utc>>) -> JurisdictionConfig {
        JurisdictionConfig {
            id: "c1".into(),
            jurisdiction_id: "saanich".into(),
            spec: ConfigSpec::with_targets(vec!["https://saanich.ca/bylaws".into()]),
            failure_count,
            last_error: None,
            last_run_at,
            next_run_at: None,
        }
    }

    #[test]
    fn circuit_breaker_and_cooldown_gate() {
        let settings = SchedulerConfig::default();
        let now = Utc::now();

        let tripped = config_with(5, Some(now - ChronoDuration::hours(3)));
        assert_eq!(
            evaluate(&tripped, now, &settings),
            Some(SkipReason::CircuitOpen { failure_count: 5 })
        );

        let recent = now - ChronoDuration::minutes(10);
        assert_eq!(
            evaluate(&config_with(0, Some(recent)), now, &settings),
            Some(SkipReason::Cooldown { last_run_at: recent })
        );

        assert_eq!(evaluate(&config_with(4, Some(now - ChronoDuration::hours(2))), now, &settings), None);
        assert_eq!(evaluate(&config_with(0, None), now, &settings), None);

        let mut inactive = config_with(0, None);
        inactive.spec.is_active = false;
        assert_eq!(evaluate(&inactive, now, &settings), Some(SkipReason::NoConfig));
    }

    #[tokio::test]
    async fn open_circuit_skips_without_creating_a_job() {
        let (orchestrator, _) = orchestrator().await;
        let config = register(&orchestrator, ConfigSpec::with_targets(vec!["https://saanich.ca/a".into()])).await;
        for _ in 0..5 {
            orchestrator.storage().record_failure(&config.id, "boom").await.unwrap();
        }

        assert!(!orchestrator.should_run("saanich").await.unwrap());

        let queue = RecordingQueue::default();
        let outcome = orchestrator
            .schedule_jurisdiction(&queue, "saanich", JobType::Scheduled, None, false)
            .await
            .unwrap();
        match outcome {
            ScheduleOutcome::Skipped { reason } => assert_eq!(reason.as_str(), "circuit-open"),
            other => panic!("expected skip, got {other:?}"),
        }
        assert!(queue.tasks().is_empty());
        assert!(orchestrator.storage().list_jobs("saanich", 10).await.unwrap().is_empty());

        orchestrator.reset_circuit("saanich").await.unwrap();
        let config = orchestrator.storage().active_config("saanich").await.unwrap().unwrap();
        assert_eq!(config.failure_count, 0);
    }

    #[tokio::test]
    async fn recent_run_is_in_cooldown() {
        let (orchestrator, _) = orchestrator().await;
        let config = register(&orchestrator, ConfigSpec::with_targets(vec!["https://saanich.ca/a".into()])).await;
        assert!(orchestrator.should_run("saanich").await.unwrap());

        orchestrator.storage().record_success(&config.id, None).await.unwrap();
        assert!(!orchestrator.should_run("saanich").await.unwrap());
        assert!(!orchestrator.should_run("nowhere").await.unwrap());
    }

    #[tokio::test]
    async fn job_crawls_extracts_and_preserves() {
        let server = MockServer::start().await;
        html(&server, "/bylaws", LISTING_PAGE).await;
        html(&server, "/bylaws/adu", ADU_PAGE).await;

        let (orchestrator, store) = orchestrator().await;
        let mut spec = ConfigSpec::with_targets(Vec::new());
        spec.discovery_urls = vec![format!("{}/bylaws", server.uri())];
        let config = register(&orchestrator, spec).await;

        let job = created(&orchestrator, false).await;
        let result = orchestrator
            .run_job(&job.id, Some("task-1"), &SilentProgress)
            .await
            .unwrap();

        assert_eq!(result.status, JobStatus::Completed);
        // The listing and six linked bylaws, of which only one exists.
        assert_eq!(result.documents_found, 7);
        assert_eq!(result.documents_processed, 2);
        assert_eq!(result.documents_changed, 2);
        assert_eq!(result.errors.len(), 5);
        assert!(result.errors.iter().any(|e| e.url.ends_with("/bylaws/parking")));

        let stored = orchestrator.job_status(&job.id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.task_id.as_deref(), Some("task-1"));
        assert_eq!(stored.documents_processed, 2);
        assert!(stored.duration_seconds.is_some());

        let config = orchestrator.storage().get_config(&config.id).await.unwrap().unwrap();
        assert_eq!(config.failure_count, 0);
        assert!(config.last_run_at.is_some());
        assert!(config.next_run_at.unwrap() > Utc::now());

        let docs = orchestrator
            .storage()
            .list_documents_for_job(&job.id.to_string())
            .await
            .unwrap();
        assert_eq!(docs.len(), 2);
        assert!(docs.iter().all(|d| d.preservation_status == PreservationStatus::Preserved));

        let adu = docs.iter().find(|d| d.source_url.ends_with("/bylaws/adu")).unwrap();
        let manifest: serde_json::Value = serde_json::from_slice(
            &store.get(adu.metadata_path.as_deref().unwrap()).await.unwrap(),
        )
        .unwrap();
        assert_eq!(manifest["requirements"]["fields"]["max_height_m"]["value"], 4.5);
        assert_eq!(manifest["requirements"]["fields"]["front_setback_m"]["value"], 0.91);
        assert_eq!(manifest["job_id"], job.id.to_string());

        let report = orchestrator.preserver().verify_integrity(&adu.id).await.unwrap();
        assert!(report.valid);
    }

    #[tokio::test]
    async fn failed_fetches_fail_the_job_and_schedule_a_retry() {
        let server = MockServer::start().await;
        let (orchestrator, _) = orchestrator().await;
        let config = register(
            &orchestrator,
            ConfigSpec::with_targets(vec![format!("{}/bylaws/gone", server.uri())]),
        )
        .await;

        let job = created(&orchestrator, false).await;
        let queue = RecordingQueue::default();
        let result = orchestrator
            .execute(&job.id, None, Some(&queue), &SilentProgress)
            .await
            .unwrap();

        assert_eq!(result.status, JobStatus::Failed);
        assert_eq!(result.errors.len(), 1);

        let failed = orchestrator.job_status(&job.id).await.unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error_details.as_ref().unwrap()["type"], "Network");

        let config = orchestrator.storage().get_config(&config.id).await.unwrap().unwrap();
        assert_eq!(config.failure_count, 1);

        let tasks = queue.tasks();
        assert_eq!(tasks.len(), 1);
        let (Task::RunJob { job_id }, delay) = &tasks[0] else {
            panic!("expected a job task");
        };
        assert_eq!(*delay, Duration::from_secs(60));
        let retry = orchestrator.job_status(job_id).await.unwrap();
        assert_eq!(retry.status, JobStatus::Pending);
        assert_eq!(retry.attempt, 2);
        assert_eq!(retry.retry_of.as_ref(), Some(&job.id));
        // The failed row stays failed.
        assert_eq!(orchestrator.job_status(&job.id).await.unwrap().status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn cancel_during_a_failing_fetch_does_not_count_as_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bylaws/slow"))
            .respond_with(ResponseTemplate::new(404).set_delay(Duration::from_millis(300)))
            .mount(&server)
            .await;
        let (orchestrator, _) = orchestrator().await;
        let config = register(
            &orchestrator,
            ConfigSpec::with_targets(vec![format!("{}/bylaws/slow", server.uri())]),
        )
        .await;

        let job = created(&orchestrator, false).await;
        let runner = orchestrator.clone();
        let job_id = job.id.clone();
        let run = tokio::spawn(async move { runner.run_job(&job_id, None, &SilentProgress).await });

        while orchestrator.storage().job_status(&job.id).await.unwrap() != Some(JobStatus::Running) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(orchestrator.cancel_job(&job.id).await.unwrap());

        let result = run.await.unwrap().unwrap();
        assert_eq!(result.status, JobStatus::Cancelled);
        assert_eq!(orchestrator.job_status(&job.id).await.unwrap().status, JobStatus::Cancelled);

        let config = orchestrator.storage().get_config(&config.id).await.unwrap().unwrap();
        assert_eq!(config.failure_count, 0);
        assert!(config.last_error.is_none());
    }

    #[tokio::test]
    async fn no_retry_once_the_circuit_opens() {
        let server = MockServer::start().await;
        let (orchestrator, _) = orchestrator().await;
        let config = register(
            &orchestrator,
            ConfigSpec::with_targets(vec![format!("{}/bylaws/gone", server.uri())]),
        )
        .await;
        for _ in 0..4 {
            orchestrator.storage().record_failure(&config.id, "earlier").await.unwrap();
        }

        let job = created(&orchestrator, true).await;
        let queue = RecordingQueue::default();
        let result = orchestrator
            .execute(&job.id, None, Some(&queue), &SilentProgress)
            .await
            .unwrap();

        assert_eq!(result.status, JobStatus::Failed);
        assert!(queue.tasks().is_empty());
        assert!(!orchestrator.should_run("saanich").await.unwrap());
    }

    #[tokio::test]
    async fn retries_stop_after_the_limit() {
        let (orchestrator, _) = orchestrator().await;
        register(&orchestrator, ConfigSpec::with_targets(vec!["https://saanich.ca/a".into()])).await;
        let mut job = orchestrator
            .create_job("saanich", None, JobType::Scheduled, None)
            .await
            .unwrap();
        job.attempt = 4;
        job.id = JobId::new();
        orchestrator.storage().insert_job(&job).await.unwrap();

        let queue = RecordingQueue::default();
        assert_eq!(orchestrator.schedule_retry(&queue, &job.id).await.unwrap(), None);
        assert!(queue.tasks().is_empty());
    }

    #[tokio::test]
    async fn cancelled_job_cannot_start() {
        let (orchestrator, _) = orchestrator().await;
        register(&orchestrator, ConfigSpec::with_targets(vec!["https://saanich.ca/a".into()])).await;
        let job = created(&orchestrator, false).await;

        assert!(orchestrator.cancel_job(&job.id).await.unwrap());
        assert!(!orchestrator.cancel_job(&job.id).await.unwrap());

        let err = orchestrator
            .run_job(&job.id, None, &SilentProgress)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "InvalidTransition");
        assert_eq!(
            orchestrator.job_status(&job.id).await.unwrap().status,
            JobStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn one_active_job_per_jurisdiction() {
        let (orchestrator, _) = orchestrator().await;
        register(&orchestrator, ConfigSpec::with_targets(vec!["https://saanich.ca/a".into()])).await;
        let first = created(&orchestrator, false).await;

        let second = orchestrator
            .prepare_job("saanich", JobType::Manual, None, true)
            .await
            .unwrap();
        match second {
            PreparedJob::Skipped(SkipReason::AlreadyRunning { job_id }) => {
                assert_eq!(job_id, Some(first.id));
            }
            other => panic!("expected already-running, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn batch_reports_each_jurisdiction() {
        let (orchestrator, _) = orchestrator().await;
        register(&orchestrator, ConfigSpec::with_targets(vec!["https://saanich.ca/a".into()])).await;
        orchestrator
            .storage()
            .upsert_jurisdiction(&Jurisdiction {
                id: "oak-bay".into(),
                name: "Oak Bay".into(),
                scraping_enabled: false,
            })
            .await
            .unwrap();

        let queue = RecordingQueue::default();
        let ids = vec!["saanich".to_string(), "oak-bay".to_string(), "nowhere".to_string()];
        let entries = orchestrator.schedule_batch(&queue, &ids, Some("ops")).await;

        assert_eq!(entries.len(), 3);
        assert!(matches!(entries[0].outcome, Some(ScheduleOutcome::Queued { .. })));
        assert!(matches!(
            entries[1].outcome,
            Some(ScheduleOutcome::Skipped { reason: SkipReason::NoConfig })
        ));
        assert!(matches!(
            entries[2].outcome,
            Some(ScheduleOutcome::Skipped { reason: SkipReason::NoConfig })
        ));
        assert_eq!(queue.tasks().len(), 1);

        let jobs = orchestrator.storage().list_jobs("saanich", 10).await.unwrap();
        assert_eq!(jobs[0].job_type, JobType::Batch);
        assert_eq!(jobs[0].triggered_by.as_deref(), Some("ops"));
    }

    #[tokio::test]
    async fn disabled_jurisdictions_only_run_manually() {
        let (orchestrator, _) = orchestrator().await;
        orchestrator
            .register_jurisdiction(
                &Jurisdiction {
                    id: "saanich".into(),
                    name: "Saanich".into(),
                    scraping_enabled: false,
                },
                &ConfigSpec::with_targets(vec!["https://saanich.ca/a".into()]),
            )
            .await
            .unwrap();

        let scheduled = orchestrator
            .prepare_job("saanich", JobType::Scheduled, None, false)
            .await
            .unwrap();
        assert!(matches!(scheduled, PreparedJob::Skipped(SkipReason::Disabled)));
        assert!(matches!(
            orchestrator
                .prepare_job("saanich", JobType::Manual, None, false)
                .await
                .unwrap(),
            PreparedJob::Created(_)
        ));
    }

    #[tokio::test]
    async fn scheduled_run_queues_due_configs_once() {
        let (orchestrator, _) = orchestrator().await;
        let config = register(&orchestrator, ConfigSpec::with_targets(vec!["https://saanich.ca/a".into()])).await;

        let queue = RecordingQueue::default();
        let entries = orchestrator.run_scheduled(&queue).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(matches!(entries[0].outcome, Some(ScheduleOutcome::Queued { .. })));

        let config = orchestrator.storage().get_config(&config.id).await.unwrap().unwrap();
        assert!(config.next_run_at.unwrap() > Utc::now());
        assert!(orchestrator.run_scheduled(&queue).await.unwrap().is_empty());
        assert_eq!(queue.tasks().len(), 1);
    }

    #[tokio::test]
    async fn cleanup_removes_only_terminal_jobs() {
        let (orchestrator, _) = orchestrator().await;
        register(&orchestrator, ConfigSpec::with_targets(vec!["https://saanich.ca/a".into()])).await;
        let done = orchestrator
            .create_job("saanich", None, JobType::Manual, None)
            .await
            .unwrap();
        orchestrator.cancel_job(&done.id).await.unwrap();
        let pending = orchestrator
            .create_job("saanich", None, JobType::Manual, None)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(orchestrator.cleanup_old_jobs(0).await.unwrap(), 1);
        assert!(orchestrator.job_status(&done.id).await.is_err());
        assert!(orchestrator.job_status(&pending.id).await.is_ok());
    }

    #[tokio::test]
    async fn register_rejects_unknown_families_and_bad_schedules() {
        let (orchestrator, _) = orchestrator().await;
        let jurisdiction = Jurisdiction {
            id: "saanich".into(),
            name: "Saanich".into(),
            scraping_enabled: true,
        };

        let mut spec = ConfigSpec::with_targets(vec!["https://saanich.ca/a".into()]);
        spec.source = "unknown-cms".into();
        assert!(orchestrator.register_jurisdiction(&jurisdiction, &spec).await.is_err());

        let mut spec = ConfigSpec::with_targets(vec!["https://saanich.ca/a".into()]);
        spec.schedule_cron = Some("every day".into());
        assert!(orchestrator.register_jurisdiction(&jurisdiction, &spec).await.is_err());

        let spec = ConfigSpec::with_targets(Vec::new());
        assert!(orchestrator.register_jurisdiction(&jurisdiction, &spec).await.is_err());
    }

    #[tokio::test]
    async fn local_queue_runs_scheduled_jobs() {
        let server = MockServer::start().await;
        html(&server, "/bylaws/adu", ADU_PAGE).await;

        let (orchestrator, _) = orchestrator().await;
        register(
            &orchestrator,
            ConfigSpec::with_targets(vec![format!("{}/bylaws/adu", server.uri())]),
        )
        .await;

        let (queue, workers) = LocalTaskQueue::start(orchestrator.clone(), &WorkerConfig::default());
        let outcome = orchestrator
            .schedule_jurisdiction(&queue, "saanich", JobType::Manual, Some("tests"), false)
            .await
            .unwrap();
        let ScheduleOutcome::Queued { job_id, task_id } = outcome else {
            panic!("expected the job to be queued");
        };

        let mut job = orchestrator.job_status(&job_id).await.unwrap();
        for _ in 0..200 {
            if job.status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
            job = orchestrator.job_status(&job_id).await.unwrap();
        }
        workers.shutdown().await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.task_id, Some(task_id));
        assert_eq!(job.documents_processed, 1);
    }
}
