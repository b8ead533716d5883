//! Scrape job records and their lifecycle transitions.
//!
//! Every status change is a conditional `UPDATE ... WHERE status IN (...)`
//! so that a terminal job can never be moved again, whatever the caller does.

use bylawdb_shared::{BylawError, JobErrorEntry, JobId, JobStatus, Result, ScrapeJob};
use chrono::{DateTime, Utc};
use libsql::params;

use crate::{Storage, fmt_ts, get_json, get_opt_ts, get_string, get_ts, get_u32, to_json};

const JOB_COLUMNS: &str = "id, jurisdiction_id, config_id, job_type, status, triggered_by, \
     attempt, retry_of, created_at, started_at, completed_at, duration_seconds, \
     documents_found, documents_processed, documents_changed, error_message, \
     error_details, errors_json, task_id";

/// Final bookkeeping written when a job leaves the running state.
#[derive(Debug, Clone)]
pub struct JobCompletion {
    pub status: JobStatus,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub documents_found: u32,
    pub documents_processed: u32,
    pub documents_changed: u32,
    pub error_message: Option<String>,
    pub error_details: Option<serde_json::Value>,
    pub errors: Vec<JobErrorEntry>,
}

impl JobCompletion {
    /// A completion with no counts, used when a job fails or is cancelled
    /// before doing any work.
    pub fn empty(status: JobStatus) -> Self {
        Self {
            status,
            completed_at: Utc::now(),
            duration_seconds: 0.0,
            documents_found: 0,
            documents_processed: 0,
            documents_changed: 0,
            error_message: None,
            error_details: None,
            errors: Vec::new(),
        }
    }
}

/// The states from which `target` may be entered, as a SQL list.
fn allowed_sources(target: JobStatus) -> String {
    [JobStatus::Pending, JobStatus::Running]
        .into_iter()
        .filter(|from| from.can_transition_to(target))
        .map(|from| format!("'{}'", from.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

impl Storage {
    /// Insert a new job row.
    pub async fn insert_job(&self, job: &ScrapeJob) -> Result<()> {
        let conn = self.acquire().await?;
        let details = job.error_details.as_ref().map(to_json).transpose()?;
        conn.execute(
            "INSERT INTO scrape_jobs (
                 id, jurisdiction_id, config_id, job_type, status, triggered_by,
                 attempt, retry_of, created_at, error_message, error_details, errors_json, task_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                job.id.to_string(),
                job.jurisdiction_id.as_str(),
                job.config_id.as_deref(),
                job.job_type.as_str(),
                job.status.as_str(),
                job.triggered_by.as_deref(),
                job.attempt,
                job.retry_of.as_ref().map(|id| id.to_string()),
                fmt_ts(&job.created_at),
                job.error_message.as_deref(),
                details,
                to_json(&job.errors)?,
                job.task_id.as_deref(),
            ],
        )
        .await
        .map_err(BylawError::storage)?;
        Ok(())
    }

    /// Get a job by ID.
    pub async fn get_job(&self, id: &JobId) -> Result<Option<ScrapeJob>> {
        let conn = self.acquire().await?;
        let sql = format!("SELECT {JOB_COLUMNS} FROM scrape_jobs WHERE id = ?1");
        let mut rows = conn
            .query(&sql, params![id.to_string()])
            .await
            .map_err(BylawError::storage)?;

        match rows.next().await.map_err(BylawError::storage)? {
            Some(row) => Ok(Some(row_to_job(&row)?)),
            None => Ok(None),
        }
    }

    /// Current status of a job, without loading the whole row.
    pub async fn job_status(&self, id: &JobId) -> Result<Option<JobStatus>> {
        let conn = self.acquire().await?;
        let mut rows = conn
            .query(
                "SELECT status FROM scrape_jobs WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(BylawError::storage)?;

        match rows.next().await.map_err(BylawError::storage)? {
            Some(row) => Ok(Some(get_string(&row, 0)?.parse()?)),
            None => Ok(None),
        }
    }

    /// Most recent jobs of a jurisdiction, newest first.
    pub async fn list_jobs(&self, jurisdiction_id: &str, limit: u32) -> Result<Vec<ScrapeJob>> {
        let conn = self.acquire().await?;
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM scrape_jobs
             WHERE jurisdiction_id = ?1 ORDER BY created_at DESC LIMIT ?2"
        );
        let mut rows = conn
            .query(&sql, params![jurisdiction_id, limit])
            .await
            .map_err(BylawError::storage)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(BylawError::storage)? {
            results.push(row_to_job(&row)?);
        }
        Ok(results)
    }

    /// A pending or running job of the jurisdiction, if any.
    pub async fn active_job_for(&self, jurisdiction_id: &str) -> Result<Option<JobId>> {
        let conn = self.acquire().await?;
        let mut rows = conn
            .query(
                "SELECT id FROM scrape_jobs
                 WHERE jurisdiction_id = ?1 AND status IN ('pending', 'running')
                 ORDER BY created_at LIMIT 1",
                params![jurisdiction_id],
            )
            .await
            .map_err(BylawError::storage)?;

        match rows.next().await.map_err(BylawError::storage)? {
            Some(row) => {
                let raw = get_string(&row, 0)?;
                let id = raw
                    .parse()
                    .map_err(|e| BylawError::Storage(format!("invalid job id '{raw}': {e}")))?;
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    /// `pending → running`. Returns `false` when the job was not pending
    /// (already started, cancelled, or missing).
    pub async fn start_job(
        &self,
        id: &JobId,
        started_at: DateTime<Utc>,
        task_id: Option<&str>,
    ) -> Result<bool> {
        let conn = self.acquire().await?;
        let affected = conn
            .execute(
                "UPDATE scrape_jobs SET status = 'running', started_at = ?2, task_id = COALESCE(?3, task_id)
                 WHERE id = ?1 AND status = 'pending'",
                params![id.to_string(), fmt_ts(&started_at), task_id],
            )
            .await
            .map_err(BylawError::storage)?;
        Ok(affected == 1)
    }

    /// Move a job into a terminal state with its final counts.
    ///
    /// Returns `false` when the transition is not legal from the stored
    /// status (the row is left untouched).
    pub async fn finish_job(&self, id: &JobId, completion: &JobCompletion) -> Result<bool> {
        if !completion.status.is_terminal() {
            return Err(BylawError::InvalidTransition {
                from: "running".into(),
                to: completion.status.to_string(),
            });
        }

        let conn = self.acquire().await?;
        let sql = format!(
            "UPDATE scrape_jobs SET
                 status = ?2, completed_at = ?3, duration_seconds = ?4,
                 documents_found = ?5, documents_processed = ?6, documents_changed = ?7,
                 error_message = ?8, error_details = ?9, errors_json = ?10
             WHERE id = ?1 AND status IN ({})",
            allowed_sources(completion.status)
        );
        let details = completion.error_details.as_ref().map(to_json).transpose()?;
        let affected = conn
            .execute(
                &sql,
                params![
                    id.to_string(),
                    completion.status.as_str(),
                    fmt_ts(&completion.completed_at),
                    completion.duration_seconds,
                    completion.documents_found,
                    completion.documents_processed,
                    completion.documents_changed,
                    completion.error_message.as_deref(),
                    details,
                    to_json(&completion.errors)?,
                ],
            )
            .await
            .map_err(BylawError::storage)?;
        Ok(affected == 1)
    }

    /// Flip a pending or running job to `cancelled`. Advisory only: a worker
    /// already running the job notices between URLs.
    pub async fn cancel_job(&self, id: &JobId) -> Result<bool> {
        // Counts a running worker may already have written are kept.
        let conn = self.acquire().await?;
        let sql = format!(
            "UPDATE scrape_jobs SET status = 'cancelled', completed_at = ?2, error_message = 'cancelled'
             WHERE id = ?1 AND status IN ({})",
            allowed_sources(JobStatus::Cancelled)
        );
        let affected = conn
            .execute(&sql, params![id.to_string(), fmt_ts(&Utc::now())])
            .await
            .map_err(BylawError::storage)?;
        Ok(affected == 1)
    }

    /// Write intermediate counters of a running job.
    pub async fn update_job_progress(
        &self,
        id: &JobId,
        found: u32,
        processed: u32,
        changed: u32,
    ) -> Result<()> {
        let conn = self.acquire().await?;
        conn.execute(
            "UPDATE scrape_jobs SET documents_found = ?2, documents_processed = ?3, documents_changed = ?4
             WHERE id = ?1 AND status = 'running'",
            params![id.to_string(), found, processed, changed],
        )
        .await
        .map_err(BylawError::storage)?;
        Ok(())
    }

    /// Delete completed/failed/cancelled jobs created before `cutoff`.
    /// Returns the number of deleted rows.
    pub async fn delete_terminal_jobs_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let conn = self.acquire().await?;
        let deleted = conn
            .execute(
                "DELETE FROM scrape_jobs
                 WHERE created_at < ?1 AND status IN ('completed', 'failed', 'cancelled')",
                params![fmt_ts(&cutoff)],
            )
            .await
            .map_err(BylawError::storage)?;
        Ok(deleted)
    }
}

/// Convert a database row (in `JOB_COLUMNS` order) to a [`ScrapeJob`].
fn row_to_job(row: &libsql::Row) -> Result<ScrapeJob> {
    let parse_id = |raw: String| -> Result<JobId> {
        raw.parse()
            .map_err(|e| BylawError::Storage(format!("invalid job id '{raw}': {e}")))
    };

    Ok(ScrapeJob {
        id: parse_id(get_string(row, 0)?)?,
        jurisdiction_id: get_string(row, 1)?,
        config_id: row.get::<String>(2).ok(),
        job_type: get_string(row, 3)?.parse()?,
        status: get_string(row, 4)?.parse()?,
        triggered_by: row.get::<String>(5).ok(),
        attempt: get_u32(row, 6).max(1),
        retry_of: row.get::<String>(7).ok().map(parse_id).transpose()?,
        created_at: get_ts(row, 8)?,
        started_at: get_opt_ts(row, 9)?,
        completed_at: get_opt_ts(row, 10)?,
        duration_seconds: row.get::<f64>(11).ok(),
        documents_found: get_u32(row, 12),
        documents_processed: get_u32(row, 13),
        documents_changed: get_u32(row, 14),
        error_message: row.get::<String>(15).ok(),
        error_details: match row.get::<String>(16).ok() {
            Some(raw) => Some(serde_json::from_str(&raw).map_err(BylawError::storage)?),
            None => None,
        },
        errors: get_json(row, 17)?,
        task_id: row.get::<String>(18).ok(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_storage;
    use bylawdb_shared::{JobType, Jurisdiction};

    fn pending_job(jurisdiction_id: &str) -> ScrapeJob {
        ScrapeJob {
            id: JobId::new(),
            jurisdiction_id: jurisdiction_id.into(),
            config_id: None,
            job_type: JobType::Manual,
            status: JobStatus::Pending,
            triggered_by: Some("operator".into()),
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
        }
    }

    async fn seeded() -> Storage {
        let storage = test_storage().await;
        storage
            .upsert_jurisdiction(&Jurisdiction {
                id: "langford".into(),
                name: "Langford".into(),
                scraping_enabled: true,
            })
            .await
            .unwrap();
        storage
    }

    #[tokio::test]
    async fn job_lifecycle() {
        let storage = seeded().await;
        let job = pending_job("langford");
        storage.insert_job(&job).await.expect("insert job");
        assert_eq!(storage.active_job_for("langford").await.unwrap(), Some(job.id.clone()));

        assert!(storage.start_job(&job.id, Utc::now(), Some("task-1")).await.unwrap());
        assert!(!storage.start_job(&job.id, Utc::now(), None).await.unwrap());

        let mut done = JobCompletion::empty(JobStatus::Completed);
        done.documents_found = 4;
        done.documents_processed = 3;
        done.documents_changed = 1;
        done.duration_seconds = 2.5;
        done.errors.push(JobErrorEntry {
            url: "https://city.example.ca/bylaws/404".into(),
            message: "HTTP 404".into(),
        });
        assert!(storage.finish_job(&job.id, &done).await.unwrap());

        let stored = storage.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.documents_processed, 3);
        assert_eq!(stored.task_id.as_deref(), Some("task-1"));
        assert_eq!(stored.errors.len(), 1);
        assert!(stored.started_at.is_some());
        assert_eq!(storage.active_job_for("langford").await.unwrap(), None);
    }

    #[tokio::test]
    async fn terminal_jobs_do_not_move() {
        let storage = seeded().await;
        let job = pending_job("langford");
        storage.insert_job(&job).await.unwrap();

        assert!(storage.cancel_job(&job.id).await.unwrap());
        assert!(!storage.start_job(&job.id, Utc::now(), None).await.unwrap());
        assert!(
            !storage
                .finish_job(&job.id, &JobCompletion::empty(JobStatus::Failed))
                .await
                .unwrap()
        );
        assert!(!storage.cancel_job(&job.id).await.unwrap());
        assert_eq!(
            storage.job_status(&job.id).await.unwrap(),
            Some(JobStatus::Cancelled)
        );
    }

    #[tokio::test]
    async fn pending_job_cannot_complete() {
        let storage = seeded().await;
        let job = pending_job("langford");
        storage.insert_job(&job).await.unwrap();

        let moved = storage
            .finish_job(&job.id, &JobCompletion::empty(JobStatus::Completed))
            .await
            .unwrap();
        assert!(!moved);

        let err = storage
            .finish_job(&job.id, &JobCompletion::empty(JobStatus::Running))
            .await
            .unwrap_err();
        assert!(matches!(err, BylawError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn retry_rows_link_to_previous_attempt() {
        let storage = seeded().await;
        let first = pending_job("langford");
        storage.insert_job(&first).await.unwrap();

        let mut retry = pending_job("langford");
        retry.attempt = 2;
        retry.retry_of = Some(first.id.clone());
        retry.error_details = Some(serde_json::json!({"error_type": "Network"}));
        storage.insert_job(&retry).await.unwrap();

        let stored = storage.get_job(&retry.id).await.unwrap().unwrap();
        assert_eq!(stored.attempt, 2);
        assert_eq!(stored.retry_of, Some(first.id));
        assert_eq!(stored.error_details.unwrap()["error_type"], "Network");
    }

    #[tokio::test]
    async fn cleanup_deletes_only_old_terminal_jobs() {
        let storage = seeded().await;

        let mut old_done = pending_job("langford");
        old_done.created_at = Utc::now() - chrono::Duration::days(40);
        storage.insert_job(&old_done).await.unwrap();
        storage.start_job(&old_done.id, Utc::now(), None).await.unwrap();
        storage
            .finish_job(&old_done.id, &JobCompletion::empty(JobStatus::Completed))
            .await
            .unwrap();

        let mut old_pending = pending_job("langford");
        old_pending.created_at = Utc::now() - chrono::Duration::days(40);
        storage.insert_job(&old_pending).await.unwrap();

        let recent = pending_job("langford");
        storage.insert_job(&recent).await.unwrap();
        storage.cancel_job(&recent.id).await.unwrap();

        let cutoff = Utc::now() - chrono::Duration::days(30);
        assert_eq!(storage.delete_terminal_jobs_before(cutoff).await.unwrap(), 1);
        assert!(storage.get_job(&old_done.id).await.unwrap().is_none());
        assert!(storage.get_job(&old_pending.id).await.unwrap().is_some());
        assert!(storage.get_job(&recent.id).await.unwrap().is_some());
    }

    #[test]
    fn allowed_sources_follow_lifecycle() {
        assert_eq!(allowed_sources(JobStatus::Completed), "'running'");
        assert_eq!(allowed_sources(JobStatus::Failed), "'pending', 'running'");
        assert_eq!(allowed_sources(JobStatus::Running), "'pending'");
    }
}
