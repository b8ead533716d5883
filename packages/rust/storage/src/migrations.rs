//! SQL migration definitions for the bylaw archive database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a set of SQL statements executed as one batch.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: jurisdictions, configs, scrape_jobs, preserved_documents",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Owning entity; scraping_enabled gates the scheduled variant
CREATE TABLE IF NOT EXISTS jurisdictions (
    id               TEXT PRIMARY KEY,
    name             TEXT NOT NULL,
    scraping_enabled INTEGER NOT NULL DEFAULT 1,
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL
);

-- Operator-supplied scraping configuration plus circuit-breaker bookkeeping
CREATE TABLE IF NOT EXISTS jurisdictions_config (
    id                  TEXT PRIMARY KEY,
    jurisdiction_id     TEXT NOT NULL REFERENCES jurisdictions(id),
    target_urls         TEXT NOT NULL,
    discovery_urls      TEXT NOT NULL DEFAULT '[]',
    selectors           TEXT NOT NULL DEFAULT '{}',
    schedule_cron       TEXT,
    requires_javascript INTEGER NOT NULL DEFAULT 0,
    custom_headers      TEXT NOT NULL DEFAULT '{}',
    is_active           INTEGER NOT NULL DEFAULT 1,
    source              TEXT NOT NULL DEFAULT 'municipal',
    capture_screenshots INTEGER NOT NULL DEFAULT 0,
    capture_assets      INTEGER NOT NULL DEFAULT 0,
    failure_count       INTEGER NOT NULL DEFAULT 0,
    last_error          TEXT,
    last_run_at         TEXT,
    next_run_at         TEXT,
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_config_one_active
    ON jurisdictions_config(jurisdiction_id) WHERE is_active = 1;
CREATE INDEX IF NOT EXISTS idx_config_next_run ON jurisdictions_config(next_run_at);

-- One row per execution attempt of the scrape pipeline
CREATE TABLE IF NOT EXISTS scrape_jobs (
    id                  TEXT PRIMARY KEY,
    jurisdiction_id     TEXT NOT NULL REFERENCES jurisdictions(id),
    config_id           TEXT,
    job_type            TEXT NOT NULL,
    status              TEXT NOT NULL,
    triggered_by        TEXT,
    attempt             INTEGER NOT NULL DEFAULT 1,
    retry_of            TEXT,
    created_at          TEXT NOT NULL,
    started_at          TEXT,
    completed_at        TEXT,
    duration_seconds    REAL,
    documents_found     INTEGER NOT NULL DEFAULT 0,
    documents_processed INTEGER NOT NULL DEFAULT 0,
    documents_changed   INTEGER NOT NULL DEFAULT 0,
    error_message       TEXT,
    error_details       TEXT,
    errors_json         TEXT NOT NULL DEFAULT '[]',
    task_id             TEXT
);

CREATE INDEX IF NOT EXISTS idx_jobs_jurisdiction_status ON scrape_jobs(jurisdiction_id, status);
CREATE INDEX IF NOT EXISTS idx_jobs_status_created ON scrape_jobs(status, created_at);

-- Archived captures; never rewritten once preserved
CREATE TABLE IF NOT EXISTS preserved_documents (
    id                  TEXT PRIMARY KEY,
    jurisdiction_id     TEXT NOT NULL,
    job_id              TEXT,
    source_url          TEXT NOT NULL,
    document_type       TEXT NOT NULL,
    scraped_at          TEXT NOT NULL,
    http_status         INTEGER,
    http_headers        TEXT,
    content_hash        TEXT,
    html_path           TEXT,
    binary_path         TEXT,
    screenshot_path     TEXT,
    metadata_path       TEXT,
    file_size_bytes     INTEGER,
    preservation_status TEXT NOT NULL,
    preservation_error  TEXT
);

CREATE INDEX IF NOT EXISTS idx_documents_url ON preserved_documents(jurisdiction_id, source_url);
CREATE INDEX IF NOT EXISTS idx_documents_job ON preserved_documents(job_id);

CREATE TRIGGER IF NOT EXISTS preserved_documents_immutable
BEFORE UPDATE ON preserved_documents
WHEN old.preservation_status = 'preserved'
BEGIN
    SELECT RAISE(ABORT, 'preserved documents are immutable');
END;

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "document_heads: current preserved document per source URL",
            sql: r#"
CREATE TABLE IF NOT EXISTS document_heads (
    jurisdiction_id TEXT NOT NULL,
    source_url      TEXT NOT NULL,
    document_id     TEXT NOT NULL,
    content_hash    TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    PRIMARY KEY (jurisdiction_id, source_url)
);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
        Migration {
            version: 3,
            description: "partial documents are immutable like preserved ones",
            sql: r#"
DROP TRIGGER IF EXISTS preserved_documents_immutable;

CREATE TRIGGER preserved_documents_immutable
BEFORE UPDATE ON preserved_documents
WHEN old.preservation_status IN ('preserved', 'partial')
BEGIN
    SELECT RAISE(ABORT, 'preserved documents are immutable');
END;

INSERT INTO schema_migrations (version) VALUES (3);
"#,
        },
    ]
}
