//! Task queue: one task per job, executed by a bounded pool of workers.
//!
//! [`TaskQueue`] is the submission seam used by the orchestrator.
//! [`LocalTaskQueue`] is the in-process implementation: an unbounded tokio
//! channel drained by `concurrency` workers, each running one task at a time.
//! A task that outlives the soft limit is logged; one that outlives the hard
//! limit is dropped and, for job tasks, its job is marked failed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bylawdb_shared::{BylawError, JobId, Result, WorkerConfig, new_record_id};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::orchestrator::JobOrchestrator;

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// A unit of work submitted to a [`TaskQueue`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum Task {
    /// Execute one pending scrape job.
    RunJob { job_id: JobId },
    /// Queue jobs for every due jurisdiction.
    RunScheduled,
    /// Delete terminal jobs older than the retention window.
    CleanupJobs { retention_days: u32 },
}

impl Task {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RunJob { .. } => "run_job",
            Self::RunScheduled => "run_scheduled",
            Self::CleanupJobs { .. } => "cleanup_jobs",
        }
    }
}

/// Job submission. Returns the task's correlation id.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task: Task) -> Result<String>;

    /// Submit `task` once `delay` has elapsed.
    async fn enqueue_after(&self, task: Task, delay: Duration) -> Result<String>;
}

#[derive(Debug)]
struct Envelope {
    id: String,
    task: Task,
}

// ---------------------------------------------------------------------------
// LocalTaskQueue
// ---------------------------------------------------------------------------

/// Handle for submitting tasks to an in-process worker pool. Cheap to clone.
#[derive(Clone)]
pub struct LocalTaskQueue {
    tx: mpsc::UnboundedSender<Envelope>,
    shutdown: watch::Receiver<bool>,
}

/// The running workers behind a [`LocalTaskQueue`].
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl LocalTaskQueue {
    /// Spawn `config.concurrency` workers executing tasks against `orchestrator`.
    pub fn start(orchestrator: Arc<JobOrchestrator>, config: &WorkerConfig) -> (Self, WorkerPool) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let queue = Self {
            tx,
            shutdown: shutdown_rx.clone(),
        };
        let rx = Arc::new(Mutex::new(rx));
        let concurrency = config.concurrency.max(1);

        let workers = (0..concurrency)
            .map(|index| {
                let worker = Worker {
                    index,
                    rx: rx.clone(),
                    queue: queue.clone(),
                    orchestrator: orchestrator.clone(),
                    soft_limit: config.soft_time_limit,
                    hard_limit: config.hard_time_limit.max(config.soft_time_limit),
                    shutdown: shutdown_rx.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        info!(concurrency, "task workers started");
        (
            queue,
            WorkerPool {
                workers,
                shutdown: shutdown_tx,
            },
        )
    }

    fn submit(&self, id: String, task: Task) -> Result<()> {
        self.tx
            .send(Envelope { id, task })
            .map_err(|_| BylawError::Task("task queue is closed".into()))
    }
}

#[async_trait]
impl TaskQueue for LocalTaskQueue {
    async fn enqueue(&self, task: Task) -> Result<String> {
        let id = new_record_id();
        debug!(task_id = %id, task = task.name(), "task enqueued");
        self.submit(id.clone(), task)?;
        Ok(id)
    }

    async fn enqueue_after(&self, task: Task, delay: Duration) -> Result<String> {
        if *self.shutdown.borrow() {
            return Err(BylawError::Task("task queue is shutting down".into()));
        }

        let id = new_record_id();
        let queue = self.clone();
        let mut shutdown = self.shutdown.clone();
        let task_id = id.clone();
        debug!(task_id = %id, task = task.name(), delay_secs = delay.as_secs(), "task delayed");

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    if let Err(e) = queue.submit(task_id.clone(), task) {
                        warn!(task_id = %task_id, error = %e, "delayed task dropped");
                    }
                }
                _ = shutdown.changed() => {
                    warn!(task_id = %task_id, task = task.name(), "delayed task dropped at shutdown");
                }
            }
        });
        Ok(id)
    }
}

impl WorkerPool {
    /// Stop taking new tasks and wait for in-flight ones to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for worker in self.workers {
            if let Err(e) = worker.await {
                error!(error = %e, "task worker panicked");
            }
        }
        info!("task workers stopped");
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

struct Worker {
    index: usize,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Envelope>>>,
    queue: LocalTaskQueue,
    orchestrator: Arc<JobOrchestrator>,
    soft_limit: Duration,
    hard_limit: Duration,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    async fn run(mut self) {
        loop {
            if *self.shutdown.borrow() {
                break;
            }
            let rx = self.rx.clone();
            let envelope = tokio::select! {
                _ = self.shutdown.changed() => break,
                envelope = async move { rx.lock().await.recv().await } => match envelope {
                    Some(envelope) => envelope,
                    None => break,
                },
            };
            self.execute(envelope).await;
        }
        debug!(worker = self.index, "task worker exiting");
    }

    async fn execute(&self, envelope: Envelope) {
        let Envelope { id, task } = envelope;
        let started = Instant::now();
        debug!(worker = self.index, task_id = %id, task = task.name(), "task started");

        let outcome = {
            let run = self.orchestrator.handle_task(&self.queue, &id, &task);
            tokio::pin!(run);
            match tokio::time::timeout(self.soft_limit, &mut run).await {
                Ok(outcome) => Some(outcome),
                Err(_) => {
                    warn!(
                        task_id = %id,
                        task = task.name(),
                        limit_secs = self.soft_limit.as_secs(),
                        "task exceeded soft time limit"
                    );
                    tokio::time::timeout(self.hard_limit - self.soft_limit, &mut run)
                        .await
                        .ok()
                }
            }
        };

        match outcome {
            Some(Ok(())) => debug!(
                task_id = %id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "task finished"
            ),
            Some(Err(e)) => error!(task_id = %id, task = task.name(), error = %e, "task failed"),
            None => {
                error!(
                    task_id = %id,
                    task = task.name(),
                    limit_secs = self.hard_limit.as_secs(),
                    "task exceeded hard time limit, terminated"
                );
                if let Task::RunJob { job_id } = &task {
                    let reason = format!(
                        "hard time limit of {}s exceeded",
                        self.hard_limit.as_secs()
                    );
                    if let Err(e) = self.orchestrator.abort_job(job_id, &reason).await {
                        error!(job_id = %job_id, error = %e, "could not mark timed-out job failed");
                    }
                }
            }
        }
    }
}
