//! Jurisdictions and their scraping configurations.

use bylawdb_shared::{BylawError, ConfigSpec, Jurisdiction, JurisdictionConfig, Result, new_record_id};
use chrono::{DateTime, Utc};
use libsql::params;

use crate::{Storage, fmt_ts, get_bool, get_json, get_opt_ts, get_string, get_u32, prefixed, to_json};

const CONFIG_COLUMNS: &str = "id, jurisdiction_id, target_urls, discovery_urls, selectors, \
     schedule_cron, requires_javascript, custom_headers, is_active, source, \
     capture_screenshots, capture_assets, failure_count, last_error, last_run_at, next_run_at";

impl Storage {
    // -----------------------------------------------------------------------
    // Jurisdiction operations
    // -----------------------------------------------------------------------

    /// Insert a jurisdiction or update its name and scraping flag.
    pub async fn upsert_jurisdiction(&self, jurisdiction: &Jurisdiction) -> Result<()> {
        let conn = self.acquire().await?;
        let now = fmt_ts(&Utc::now());
        conn.execute(
            "INSERT INTO jurisdictions (id, name, scraping_enabled, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(id) DO UPDATE SET
               name = excluded.name,
               scraping_enabled = excluded.scraping_enabled,
               updated_at = excluded.updated_at",
            params![
                jurisdiction.id.as_str(),
                jurisdiction.name.as_str(),
                jurisdiction.scraping_enabled as i64,
                now.as_str(),
            ],
        )
        .await
        .map_err(BylawError::storage)?;
        Ok(())
    }

    /// Get a jurisdiction by ID.
    pub async fn get_jurisdiction(&self, id: &str) -> Result<Option<Jurisdiction>> {
        let conn = self.acquire().await?;
        let mut rows = conn
            .query(
                "SELECT id, name, scraping_enabled FROM jurisdictions WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(BylawError::storage)?;

        match rows.next().await.map_err(BylawError::storage)? {
            Some(row) => Ok(Some(Jurisdiction {
                id: get_string(&row, 0)?,
                name: get_string(&row, 1)?,
                scraping_enabled: get_bool(&row, 2),
            })),
            None => Ok(None),
        }
    }

    /// List all jurisdictions ordered by name.
    pub async fn list_jurisdictions(&self) -> Result<Vec<Jurisdiction>> {
        let conn = self.acquire().await?;
        let mut rows = conn
            .query(
                "SELECT id, name, scraping_enabled FROM jurisdictions ORDER BY name",
                params![],
            )
            .await
            .map_err(BylawError::storage)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(BylawError::storage)? {
            results.push(Jurisdiction {
                id: get_string(&row, 0)?,
                name: get_string(&row, 1)?,
                scraping_enabled: get_bool(&row, 2),
            });
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Config operations
    // -----------------------------------------------------------------------

    /// Insert a new config for a jurisdiction. Fails if the jurisdiction
    /// already has an active config and `spec.is_active` is set.
    pub async fn insert_config(
        &self,
        jurisdiction_id: &str,
        spec: &ConfigSpec,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<JurisdictionConfig> {
        let conn = self.acquire().await?;
        let config = new_config(jurisdiction_id, spec, next_run_at);
        insert_config_row(&conn, &config).await?;
        Ok(config)
    }

    /// Deactivate the current active config (if any) and insert `spec` as the
    /// new active config, in one transaction.
    pub async fn replace_active_config(
        &self,
        jurisdiction_id: &str,
        spec: &ConfigSpec,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<JurisdictionConfig> {
        let conn = self.acquire().await?;
        let tx = conn.transaction().await.map_err(BylawError::storage)?;
        let now = fmt_ts(&Utc::now());

        tx.execute(
            "UPDATE jurisdictions_config SET is_active = 0, updated_at = ?2
             WHERE jurisdiction_id = ?1 AND is_active = 1",
            params![jurisdiction_id, now.as_str()],
        )
        .await
        .map_err(BylawError::storage)?;

        let config = new_config(jurisdiction_id, spec, next_run_at);
        insert_config_row(&tx, &config).await?;
        tx.commit().await.map_err(BylawError::storage)?;
        Ok(config)
    }

    /// The active config of a jurisdiction.
    pub async fn active_config(&self, jurisdiction_id: &str) -> Result<Option<JurisdictionConfig>> {
        let conn = self.acquire().await?;
        let sql = format!(
            "SELECT {CONFIG_COLUMNS} FROM jurisdictions_config
             WHERE jurisdiction_id = ?1 AND is_active = 1"
        );
        let mut rows = conn
            .query(&sql, params![jurisdiction_id])
            .await
            .map_err(BylawError::storage)?;

        match rows.next().await.map_err(BylawError::storage)? {
            Some(row) => Ok(Some(row_to_config(&row)?)),
            None => Ok(None),
        }
    }

    /// Get a config by ID, active or not.
    pub async fn get_config(&self, config_id: &str) -> Result<Option<JurisdictionConfig>> {
        let conn = self.acquire().await?;
        let sql = format!("SELECT {CONFIG_COLUMNS} FROM jurisdictions_config WHERE id = ?1");
        let mut rows = conn
            .query(&sql, params![config_id])
            .await
            .map_err(BylawError::storage)?;

        match rows.next().await.map_err(BylawError::storage)? {
            Some(row) => Ok(Some(row_to_config(&row)?)),
            None => Ok(None),
        }
    }

    /// Active configs whose `next_run_at` has elapsed and whose jurisdiction
    /// allows scraping. A config that was never scheduled is due.
    pub async fn due_configs(&self, now: DateTime<Utc>) -> Result<Vec<JurisdictionConfig>> {
        let conn = self.acquire().await?;
        let columns = prefixed("c", CONFIG_COLUMNS);
        let sql = format!(
            "SELECT {columns} FROM jurisdictions_config c
             JOIN jurisdictions j ON j.id = c.jurisdiction_id
             WHERE c.is_active = 1
               AND j.scraping_enabled = 1
               AND (c.next_run_at IS NULL OR c.next_run_at <= ?1)
             ORDER BY c.next_run_at"
        );
        let now = fmt_ts(&now);
        let mut rows = conn
            .query(&sql, params![now.as_str()])
            .await
            .map_err(BylawError::storage)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(BylawError::storage)? {
            results.push(row_to_config(&row)?);
        }
        Ok(results)
    }

    /// Record a failed execution: bump the failure count, store the error and
    /// the run time. Returns the new failure count.
    pub async fn record_failure(&self, config_id: &str, error: &str) -> Result<u32> {
        let conn = self.acquire().await?;
        let now = fmt_ts(&Utc::now());
        let mut rows = conn
            .query(
                "UPDATE jurisdictions_config
                 SET failure_count = failure_count + 1,
                     last_error = ?2,
                     last_run_at = ?3,
                     updated_at = ?3
                 WHERE id = ?1
                 RETURNING failure_count",
                params![config_id, error, now.as_str()],
            )
            .await
            .map_err(BylawError::storage)?;

        match rows.next().await.map_err(BylawError::storage)? {
            Some(row) => Ok(get_u32(&row, 0)),
            None => Err(BylawError::NotFound(format!("config {config_id}"))),
        }
    }

    /// Record a successful execution: reset the circuit and schedule the next run.
    pub async fn record_success(
        &self,
        config_id: &str,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let conn = self.acquire().await?;
        let now = fmt_ts(&Utc::now());
        let next = next_run_at.map(|t| fmt_ts(&t));
        let affected = conn
            .execute(
                "UPDATE jurisdictions_config
                 SET failure_count = 0,
                     last_error = NULL,
                     last_run_at = ?2,
                     next_run_at = ?3,
                     updated_at = ?2
                 WHERE id = ?1",
                params![config_id, now.as_str(), next.as_deref()],
            )
            .await
            .map_err(BylawError::storage)?;

        if affected == 0 {
            return Err(BylawError::NotFound(format!("config {config_id}")));
        }
        Ok(())
    }

    /// Manually close the circuit breaker of a config.
    pub async fn reset_circuit(&self, config_id: &str) -> Result<()> {
        let conn = self.acquire().await?;
        let now = fmt_ts(&Utc::now());
        let affected = conn
            .execute(
                "UPDATE jurisdictions_config
                 SET failure_count = 0, last_error = NULL, updated_at = ?2
                 WHERE id = ?1",
                params![config_id, now.as_str()],
            )
            .await
            .map_err(BylawError::storage)?;

        if affected == 0 {
            return Err(BylawError::NotFound(format!("config {config_id}")));
        }
        Ok(())
    }

    /// Move `next_run_at` without touching the breaker state.
    pub async fn set_next_run(&self, config_id: &str, next_run_at: DateTime<Utc>) -> Result<()> {
        let conn = self.acquire().await?;
        let next = fmt_ts(&next_run_at);
        conn.execute(
            "UPDATE jurisdictions_config SET next_run_at = ?2 WHERE id = ?1",
            params![config_id, next.as_str()],
        )
        .await
        .map_err(BylawError::storage)?;
        Ok(())
    }
}

fn new_config(
    jurisdiction_id: &str,
    spec: &ConfigSpec,
    next_run_at: Option<DateTime<Utc>>,
) -> JurisdictionConfig {
    JurisdictionConfig {
        id: new_record_id(),
        jurisdiction_id: jurisdiction_id.to_string(),
        spec: spec.clone(),
        failure_count: 0,
        last_error: None,
        last_run_at: None,
        next_run_at,
    }
}

async fn insert_config_row(conn: &libsql::Connection, config: &JurisdictionConfig) -> Result<()> {
    let spec = &config.spec;
    let now = fmt_ts(&Utc::now());
    let next = config.next_run_at.map(|t| fmt_ts(&t));
    conn.execute(
        "INSERT INTO jurisdictions_config (
             id, jurisdiction_id, target_urls, discovery_urls, selectors, schedule_cron,
             requires_javascript, custom_headers, is_active, source,
             capture_screenshots, capture_assets, failure_count, next_run_at,
             created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 0, ?13, ?14, ?14)",
        params![
            config.id.as_str(),
            config.jurisdiction_id.as_str(),
            to_json(&spec.target_urls)?,
            to_json(&spec.discovery_urls)?,
            to_json(&spec.selectors)?,
            spec.schedule_cron.as_deref(),
            spec.requires_javascript as i64,
            to_json(&spec.custom_headers)?,
            spec.is_active as i64,
            spec.source.as_str(),
            spec.capture_screenshots as i64,
            spec.capture_assets as i64,
            next.as_deref(),
            now.as_str(),
        ],
    )
    .await
    .map_err(|e| {
        let message = e.to_string();
        if message.contains("UNIQUE") {
            BylawError::Conflict {
                path: format!("active config for {}", config.jurisdiction_id),
            }
        } else {
            BylawError::Storage(message)
        }
    })?;
    Ok(())
}

/// Convert a database row (in `CONFIG_COLUMNS` order) to a [`JurisdictionConfig`].
fn row_to_config(row: &libsql::Row) -> Result<JurisdictionConfig> {
    Ok(JurisdictionConfig {
        id: get_string(row, 0)?,
        jurisdiction_id: get_string(row, 1)?,
        spec: ConfigSpec {
            target_urls: get_json(row, 2)?,
            discovery_urls: get_json(row, 3)?,
            selectors: get_json(row, 4)?,
            schedule_cron: row.get::<String>(5).ok(),
            requires_javascript: get_bool(row, 6),
            custom_headers: get_json(row, 7)?,
            is_active: get_bool(row, 8),
            source: get_string(row, 9)?,
            capture_screenshots: get_bool(row, 10),
            capture_assets: get_bool(row, 11),
        },
        failure_count: get_u32(row, 12),
        last_error: row.get::<String>(13).ok(),
        last_run_at: get_opt_ts(row, 14)?,
        next_run_at: get_opt_ts(row, 15)?,
    })
}
