//! libSQL storage layer for the bylaw archive (embedded, offline mode).
//!
//! The [`Storage`] struct wraps a libSQL database holding jurisdictions,
//! their scraping configs, scrape job history and preserved-document records.
//!
//! Connections are handed out by a bounded pool: each logical operation
//! acquires a connection, runs, and releases it when the guard drops.

mod documents;
mod jobs;
mod jurisdictions;
mod migrations;

use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bylawdb_shared::{BylawError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database, params};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub use documents::{NewDocument, PreservedArtifacts};
pub use jobs::JobCompletion;

/// How long a connection waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    db: Database,
    permits: Arc<Semaphore>,
    pool_size: usize,
}

/// A pooled connection; the pool slot is released on drop.
pub struct PooledConnection {
    conn: Connection,
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl Storage {
    /// Open or create a database at `path` with at most `pool_size`
    /// simultaneously open connections.
    pub async fn open(path: &Path, pool_size: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| BylawError::io(parent, e))?;
            }
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(BylawError::storage)?;

        let pool_size = pool_size.max(1);
        let storage = Self {
            db,
            permits: Arc::new(Semaphore::new(pool_size)),
            pool_size,
        };
        storage.run_migrations().await?;
        tracing::debug!(path = %path.display(), pool_size, "storage opened");
        Ok(storage)
    }

    /// Maximum number of simultaneously open connections.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Acquire a connection from the pool, waiting for a free slot.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| BylawError::Storage("connection pool closed".into()))?;

        let conn = self.db.connect().map_err(BylawError::storage)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(BylawError::storage)?;

        Ok(PooledConnection {
            conn,
            _permit: permit,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.schema_version().await;
        let conn = self.acquire().await?;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                conn.execute_batch(migration.sql).await.map_err(|e| {
                    BylawError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    pub async fn schema_version(&self) -> u32 {
        let Ok(conn) = self.acquire().await else {
            return 0;
        };
        let result = conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }
}

// ---------------------------------------------------------------------------
// Column helpers
// ---------------------------------------------------------------------------

/// Timestamps are stored as fixed-width RFC 3339 text so they sort lexically.
pub(crate) fn fmt_ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| BylawError::Storage(format!("invalid date '{s}': {e}")))
}

pub(crate) fn get_string(row: &libsql::Row, idx: i32) -> Result<String> {
    row.get::<String>(idx).map_err(BylawError::storage)
}

pub(crate) fn get_ts(row: &libsql::Row, idx: i32) -> Result<DateTime<Utc>> {
    parse_ts(&get_string(row, idx)?)
}

/// Nullable timestamp column.
pub(crate) fn get_opt_ts(row: &libsql::Row, idx: i32) -> Result<Option<DateTime<Utc>>> {
    row.get::<String>(idx).ok().map(|s| parse_ts(&s)).transpose()
}

pub(crate) fn get_bool(row: &libsql::Row, idx: i32) -> bool {
    row.get::<i64>(idx).map(|v| v != 0).unwrap_or(false)
}

pub(crate) fn get_u32(row: &libsql::Row, idx: i32) -> u32 {
    row.get::<i64>(idx).map(|v| v.max(0) as u32).unwrap_or(0)
}

/// Deserialize a JSON text column.
pub(crate) fn get_json<T: serde::de::DeserializeOwned>(row: &libsql::Row, idx: i32) -> Result<T> {
    let raw = get_string(row, idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| BylawError::Storage(format!("invalid JSON in column {idx}: {e}")))
}

/// Qualify a comma-separated column list with a table alias.
pub(crate) fn prefixed(alias: &str, columns: &str) -> String {
    columns
        .split(',')
        .map(|c| format!("{alias}.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(BylawError::storage)
}
