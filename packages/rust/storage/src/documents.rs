//! Preserved-document records and the per-URL head pointer.

use std::collections::BTreeMap;

use bylawdb_shared::{BylawError, DocumentKind, PreservationStatus, PreservedDocument, Result};
use chrono::{DateTime, Utc};
use libsql::params;

use crate::{Storage, fmt_ts, get_string, get_ts, prefixed, to_json};

const DOCUMENT_COLUMNS: &str = "id, jurisdiction_id, job_id, source_url, document_type, \
     scraped_at, content_hash, html_path, binary_path, screenshot_path, metadata_path, \
     file_size_bytes, preservation_status, preservation_error";

/// Data known when a capture starts, before any artifact is written.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub id: String,
    pub jurisdiction_id: String,
    pub job_id: Option<String>,
    pub source_url: String,
    pub document_type: DocumentKind,
    pub scraped_at: DateTime<Utc>,
    pub http_status: Option<u16>,
    pub http_headers: BTreeMap<String, String>,
}

/// Hash and storage paths recorded when a capture is preserved.
#[derive(Debug, Clone, Default)]
pub struct PreservedArtifacts {
    pub content_hash: String,
    pub html_path: Option<String>,
    pub binary_path: Option<String>,
    pub screenshot_path: Option<String>,
    pub metadata_path: Option<String>,
    pub file_size_bytes: u64,
    /// Uploads of optional artifacts (the screenshot) that failed. When set
    /// the document is recorded as `partial` with this as its error.
    pub partial_error: Option<String>,
}

impl PreservedArtifacts {
    pub fn status(&self) -> PreservationStatus {
        if self.partial_error.is_some() {
            PreservationStatus::Partial
        } else {
            PreservationStatus::Preserved
        }
    }
}

impl Storage {
    /// Create a document record in `pending` state.
    pub async fn insert_pending_document(&self, doc: &NewDocument) -> Result<()> {
        let conn = self.acquire().await?;
        conn.execute(
            "INSERT INTO preserved_documents (
                 id, jurisdiction_id, job_id, source_url, document_type, scraped_at,
                 http_status, http_headers, preservation_status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'pending')",
            params![
                doc.id.as_str(),
                doc.jurisdiction_id.as_str(),
                doc.job_id.as_deref(),
                doc.source_url.as_str(),
                doc.document_type.as_str(),
                fmt_ts(&doc.scraped_at),
                doc.http_status.map(i64::from),
                to_json(&doc.http_headers)?,
            ],
        )
        .await
        .map_err(BylawError::storage)?;
        Ok(())
    }

    /// Mark a pending document `preserved` (or `partial`) and point the URL's
    /// head at it, in one transaction.
    ///
    /// Returns whether the content differs from the previous head (a URL
    /// seen for the first time counts as changed).
    pub async fn finalize_preserved(
        &self,
        document_id: &str,
        artifacts: &PreservedArtifacts,
    ) -> Result<bool> {
        let conn = self.acquire().await?;
        let tx = conn.transaction().await.map_err(BylawError::storage)?;

        let affected = tx
            .execute(
                "UPDATE preserved_documents SET
                     preservation_status = ?8, preservation_error = ?9,
                     content_hash = ?2, html_path = ?3, binary_path = ?4,
                     screenshot_path = ?5, metadata_path = ?6, file_size_bytes = ?7
                 WHERE id = ?1 AND preservation_status = 'pending'",
                params![
                    document_id,
                    artifacts.content_hash.as_str(),
                    artifacts.html_path.as_deref(),
                    artifacts.binary_path.as_deref(),
                    artifacts.screenshot_path.as_deref(),
                    artifacts.metadata_path.as_deref(),
                    artifacts.file_size_bytes as i64,
                    artifacts.status().as_str(),
                    artifacts.partial_error.as_deref(),
                ],
            )
            .await
            .map_err(BylawError::storage)?;

        if affected != 1 {
            tx.rollback().await.map_err(BylawError::storage)?;
            return Err(BylawError::Conflict {
                path: format!("document {document_id} is not pending"),
            });
        }

        let mut rows = tx
            .query(
                "SELECT h.content_hash
                 FROM document_heads h
                 JOIN preserved_documents d
                   ON d.jurisdiction_id = h.jurisdiction_id AND d.source_url = h.source_url
                 WHERE d.id = ?1",
                params![document_id],
            )
            .await
            .map_err(BylawError::storage)?;
        let previous = match rows.next().await.map_err(BylawError::storage)? {
            Some(row) => row.get::<String>(0).ok(),
            None => None,
        };
        drop(rows);

        tx.execute(
            "INSERT INTO document_heads (jurisdiction_id, source_url, document_id, content_hash, updated_at)
             SELECT jurisdiction_id, source_url, id, ?2, ?3 FROM preserved_documents WHERE id = ?1
             ON CONFLICT(jurisdiction_id, source_url) DO UPDATE SET
               document_id = excluded.document_id,
               content_hash = excluded.content_hash,
               updated_at = excluded.updated_at",
            params![
                document_id,
                artifacts.content_hash.as_str(),
                fmt_ts(&Utc::now())
            ],
        )
        .await
        .map_err(BylawError::storage)?;

        tx.commit().await.map_err(BylawError::storage)?;

        Ok(previous.as_deref() != Some(artifacts.content_hash.as_str()))
    }

    /// Mark a pending document `failed` with the given error.
    pub async fn mark_document_failed(&self, document_id: &str, error: &str) -> Result<()> {
        let conn = self.acquire().await?;
        conn.execute(
            "UPDATE preserved_documents SET preservation_status = 'failed', preservation_error = ?2
             WHERE id = ?1 AND preservation_status = 'pending'",
            params![document_id, error],
        )
        .await
        .map_err(BylawError::storage)?;
        Ok(())
    }

    /// Get a preserved document by ID.
    pub async fn get_document(&self, document_id: &str) -> Result<Option<PreservedDocument>> {
        let conn = self.acquire().await?;
        let sql = format!("SELECT {DOCUMENT_COLUMNS} FROM preserved_documents WHERE id = ?1");
        let mut rows = conn
            .query(&sql, params![document_id])
            .await
            .map_err(BylawError::storage)?;

        match rows.next().await.map_err(BylawError::storage)? {
            Some(row) => Ok(Some(row_to_document(&row)?)),
            None => Ok(None),
        }
    }

    /// The document the URL's head currently points at.
    pub async fn current_document(
        &self,
        jurisdiction_id: &str,
        source_url: &str,
    ) -> Result<Option<PreservedDocument>> {
        let conn = self.acquire().await?;
        let columns = prefixed("d", DOCUMENT_COLUMNS);
        let sql = format!(
            "SELECT {columns} FROM document_heads h
             JOIN preserved_documents d ON d.id = h.document_id
             WHERE h.jurisdiction_id = ?1 AND h.source_url = ?2"
        );
        let mut rows = conn
            .query(&sql, params![jurisdiction_id, source_url])
            .await
            .map_err(BylawError::storage)?;

        match rows.next().await.map_err(BylawError::storage)? {
            Some(row) => Ok(Some(row_to_document(&row)?)),
            None => Ok(None),
        }
    }

    /// All documents captured by a job, in capture order.
    pub async fn list_documents_for_job(&self, job_id: &str) -> Result<Vec<PreservedDocument>> {
        let conn = self.acquire().await?;
        let sql = format!(
            "SELECT {DOCUMENT_COLUMNS} FROM preserved_documents WHERE job_id = ?1 ORDER BY scraped_at"
        );
        let mut rows = conn
            .query(&sql, params![job_id])
            .await
            .map_err(BylawError::storage)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(BylawError::storage)? {
            results.push(row_to_document(&row)?);
        }
        Ok(results)
    }
}

/// Convert a database row (in `DOCUMENT_COLUMNS` order) to a [`PreservedDocument`].
fn row_to_document(row: &libsql::Row) -> Result<PreservedDocument> {
    Ok(PreservedDocument {
        id: get_string(row, 0)?,
        jurisdiction_id: get_string(row, 1)?,
        job_id: row.get::<String>(2).ok(),
        source_url: get_string(row, 3)?,
        document_type: get_string(row, 4)?.parse()?,
        scraped_at: get_ts(row, 5)?,
        content_hash: row.get::<String>(6).ok(),
        html_path: row.get::<String>(7).ok(),
        binary_path: row.get::<String>(8).ok(),
        screenshot_path: row.get::<String>(9).ok(),
        metadata_path: row.get::<String>(10).ok(),
        file_size_bytes: row.get::<i64>(11).ok().map(|v| v.max(0) as u64),
        preservation_status: get_string(row, 12)?.parse::<PreservationStatus>()?,
        preservation_error: row.get::<String>(13).ok(),
    })
}
