//! Core domain types for the bylaw archive: jurisdiction configs, scrape jobs,
//! preserved documents and parser output.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BylawError;

/// Name of the selector-driven source family used when a config names none.
pub const DEFAULT_SOURCE_FAMILY: &str = "municipal";

// ---------------------------------------------------------------------------
// JobId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for scrape job identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Generate a new time-sortable job identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Generate a fresh time-sortable identifier for any stored record.
pub fn new_record_id() -> String {
    Uuid::now_v7().to_string()
}

// ---------------------------------------------------------------------------
// Enumerations stored as text
// ---------------------------------------------------------------------------

macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            /// The lowercase name used in the datastore and in JSON.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = BylawError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(BylawError::validation(format!(
                        concat!("unknown ", stringify!($name), " '{}'"),
                        other
                    ))),
                }
            }
        }
    };
}

/// How a scrape job was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Manual,
    Scheduled,
    Batch,
}

text_enum!(JobType {
    Manual => "manual",
    Scheduled => "scheduled",
    Batch => "batch",
});

/// Lifecycle state of a scrape job.
///
/// `pending → running → {completed | failed | cancelled}`; terminal states are final.
/// A pending job may also be cancelled, or failed when it cannot start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

text_enum!(JobStatus {
    Pending => "pending",
    Running => "running",
    Completed => "completed",
    Failed => "failed",
    Cancelled => "cancelled",
});

impl JobStatus {
    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether `self → next` is a legal lifecycle transition.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Running) => true,
            (Self::Pending, Self::Cancelled) | (Self::Pending, Self::Failed) => true,
            (Self::Running, next) => next.is_terminal(),
            _ => false,
        }
    }
}

/// Archival state of a preserved document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreservationStatus {
    Pending,
    Preserved,
    Failed,
    Partial,
}

text_enum!(PreservationStatus {
    Pending => "pending",
    Preserved => "preserved",
    Failed => "failed",
    Partial => "partial",
});

/// Classification of a fetched page or file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// A page holding a single regulation.
    Regulation,
    /// A page listing links to many regulations.
    Listing,
    /// A non-HTML file (PDF, Word, ...).
    Binary,
    Unknown,
}

text_enum!(DocumentKind {
    Regulation => "regulation",
    Listing => "listing",
    Binary => "binary",
    Unknown => "unknown",
});

/// Kind of an item produced by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Regulation,
    Link,
    BinaryDocument,
}

text_enum!(ItemKind {
    Regulation => "regulation",
    Link => "link",
    BinaryDocument => "binary_document",
});

// ---------------------------------------------------------------------------
// Jurisdiction configuration
// ---------------------------------------------------------------------------

/// Operator-supplied scraping configuration for one jurisdiction.
///
/// This is the input shape accepted from TOML/JSON files; the stored form
/// adds bookkeeping in [`JurisdictionConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSpec {
    /// Pages that are always fetched.
    pub target_urls: Vec<String>,
    /// Listing pages fetched to discover further documents.
    #[serde(default)]
    pub discovery_urls: Vec<String>,
    /// CSS selectors keyed by purpose (`links`, `title`, `content`, ...).
    #[serde(default)]
    pub selectors: BTreeMap<String, String>,
    /// Cron expression controlling `next_run_at`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_cron: Option<String>,
    /// Render pages in a headless browser instead of plain HTTP.
    #[serde(default)]
    pub requires_javascript: bool,
    /// Extra request headers.
    #[serde(default)]
    pub custom_headers: BTreeMap<String, String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    /// Source family used to discover and parse this jurisdiction.
    #[serde(default = "default_source")]
    pub source: String,
    /// Capture a full-page screenshot (browser strategy only).
    #[serde(default)]
    pub capture_screenshots: bool,
    /// Download and archive page assets alongside the HTML.
    #[serde(default)]
    pub capture_assets: bool,
}

fn default_true() -> bool {
    true
}

fn default_source() -> String {
    DEFAULT_SOURCE_FAMILY.into()
}

impl ConfigSpec {
    /// A minimal active config over the given target URLs.
    pub fn with_targets(target_urls: Vec<String>) -> Self {
        Self {
            target_urls,
            discovery_urls: Vec::new(),
            selectors: BTreeMap::new(),
            schedule_cron: None,
            requires_javascript: false,
            custom_headers: BTreeMap::new(),
            is_active: true,
            source: default_source(),
            capture_screenshots: false,
            capture_assets: false,
        }
    }
}

/// A stored jurisdiction config with its scheduling bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JurisdictionConfig {
    pub id: String,
    pub jurisdiction_id: String,
    #[serde(flatten)]
    pub spec: ConfigSpec,
    /// Consecutive failed executions; reset to 0 on success.
    pub failure_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
}

/// A jurisdiction (municipality) that owns configs, jobs and documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jurisdiction {
    pub id: String,
    pub name: String,
    /// Owner-level switch for the scheduled variant.
    pub scraping_enabled: bool,
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// One invocation of the scrape pipeline for a jurisdiction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeJob {
    pub id: JobId,
    pub jurisdiction_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_id: Option<String>,
    pub job_type: JobType,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggered_by: Option<String>,
    /// 1 for the first execution, incremented per retry.
    pub attempt: u32,
    /// The failed job this one retries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_of: Option<JobId>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    pub documents_found: u32,
    pub documents_processed: u32,
    pub documents_changed: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<JobErrorEntry>,
    /// Correlation id of the task-queue execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

/// A non-fatal error recorded against one URL during a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobErrorEntry {
    pub url: String,
    pub message: String,
}

/// Result object handed back to callers of the orchestration layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: JobId,
    pub status: JobStatus,
    pub documents_found: u32,
    pub documents_processed: u32,
    pub documents_changed: u32,
    pub duration_seconds: f64,
    #[serde(default)]
    pub errors: Vec<JobErrorEntry>,
}

// ---------------------------------------------------------------------------
// Preserved documents
// ---------------------------------------------------------------------------

/// An archived capture of one URL. Immutable once `preserved`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreservedDocument {
    pub id: String,
    pub jurisdiction_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub source_url: String,
    pub document_type: DocumentKind,
    pub scraped_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size_bytes: Option<u64>,
    pub preservation_status: PreservationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preservation_error: Option<String>,
}

// ---------------------------------------------------------------------------
// Parser output
// ---------------------------------------------------------------------------

/// A structured candidate extracted from a fetched page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedItem {
    pub kind: ItemKind,
    /// The page the item was found on (for links: the resolved target).
    pub source_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Regulation number such as `2024-45`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_date: Option<String>,
    /// Label/value pairs found on the page.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    /// For links: the listing page the link was found on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub found_at: Option<String>,
    pub extracted_at: DateTime<Utc>,
}

impl ExtractedItem {
    /// An empty item of the given kind for `source_url`.
    pub fn new(kind: ItemKind, source_url: impl Into<String>) -> Self {
        Self {
            kind,
            source_url: source_url.into(),
            title: None,
            identifier: None,
            category: None,
            full_text: None,
            effective_date: None,
            metadata: BTreeMap::new(),
            found_at: None,
            extracted_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_roundtrip() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().expect("parse JobId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn terminal_states_are_final() {
        for terminal in [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled] {
            assert!(terminal.is_terminal());
            for next in [
                JobStatus::Pending,
                JobStatus::Running,
                JobStatus::Completed,
                JobStatus::Failed,
                JobStatus::Cancelled,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn lifecycle_moves_forward_only() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Cancelled));
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed));
    }

    #[test]
    fn status_text_roundtrip() {
        for status in ["pending", "running", "completed", "failed", "cancelled"] {
            let parsed: JobStatus = status.parse().expect("parse status");
            assert_eq!(parsed.as_str(), status);
        }
        assert!("paused".parse::<JobStatus>().is_err());
    }

    #[test]
    fn config_spec_defaults() {
        let json = r#"{"target_urls": ["https://city.example.ca/bylaws"]}"#;
        let spec: ConfigSpec = serde_json::from_str(json).expect("deserialize");
        assert!(spec.is_active);
        assert!(!spec.requires_javascript);
        assert_eq!(spec.source, DEFAULT_SOURCE_FAMILY);
        assert!(spec.discovery_urls.is_empty());
    }

    #[test]
    fn config_spec_from_toml() {
        let toml_str = r##"
target_urls = ["https://city.example.ca/bylaws/zoning"]
discovery_urls = ["https://city.example.ca/bylaws"]
schedule_cron = "0 3 * * *"
requires_javascript = true

[selectors]
content = "#main"

[custom_headers]
"Accept-Language" = "en-CA"
"##;
        let spec: ConfigSpec = toml::from_str(toml_str).expect("parse");
        assert_eq!(spec.selectors.get("content").map(String::as_str), Some("#main"));
        assert_eq!(spec.schedule_cron.as_deref(), Some("0 3 * * *"));
        assert!(spec.requires_javascript);
        assert_eq!(spec.custom_headers.len(), 1);
    }
}
