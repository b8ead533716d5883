//! Application configuration for the bylaw archive.
//!
//! User config lives at `~/.bylawdb/bylawdb.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BylawError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "bylawdb.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".bylawdb";

// ---------------------------------------------------------------------------
// Config structs (matching bylawdb.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub fetch: FetchSection,

    #[serde(default)]
    pub scheduler: SchedulerSection,

    #[serde(default)]
    pub worker: WorkerSection,
}

/// `[database]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// libSQL database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// Maximum simultaneously open connections.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            pool_size: default_pool_size(),
        }
    }
}

fn default_db_path() -> String {
    "var/bylawdb.db".into()
}
fn default_pool_size() -> usize {
    5
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory of the local archive.
    #[serde(default = "default_storage_root")]
    pub root: String,

    /// Bucket (top-level directory) for source documents.
    #[serde(default = "default_bucket")]
    pub bucket: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            bucket: default_bucket(),
        }
    }
}

fn default_storage_root() -> String {
    "var/archive".into()
}
fn default_bucket() -> String {
    "source-documents".into()
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchSection {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Total attempts per URL, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,

    /// Upper bound on URLs fetched by one job (targets + discovered).
    #[serde(default = "default_max_pages")]
    pub max_pages_per_job: usize,

    #[serde(default = "default_timeout_secs")]
    pub render_timeout_secs: u64,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            max_pages_per_job: default_max_pages(),
            render_timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_user_agent() -> String {
    concat!(
        "Mozilla/5.0 (compatible; BylawDB/",
        env!("CARGO_PKG_VERSION"),
        "; +https://bylawdb.com/bot)"
    )
    .into()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    1_000
}
fn default_backoff_cap_ms() -> u64 {
    10_000
}
fn default_max_pages() -> usize {
    200
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSection {
    /// Period of the "run eligible jurisdictions" task.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Period of the retention cleanup task.
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// Terminal jobs older than this are deleted.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Consecutive failures that open the circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Minimum time between runs of one jurisdiction.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            retention_days: default_retention_days(),
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

fn default_interval_secs() -> u64 {
    300
}
fn default_cleanup_interval_secs() -> u64 {
    86_400
}
fn default_retention_days() -> u32 {
    30
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_cooldown_secs() -> u64 {
    3_600
}

/// `[worker]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSection {
    /// Number of queue workers; each runs one task at a time.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_soft_limit")]
    pub soft_time_limit_secs: u64,

    #[serde(default = "default_hard_limit")]
    pub hard_time_limit_secs: u64,

    #[serde(default = "default_max_task_retries")]
    pub max_task_retries: u32,

    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            soft_time_limit_secs: default_soft_limit(),
            hard_time_limit_secs: default_hard_limit(),
            max_task_retries: default_max_task_retries(),
            retry_delay_secs: default_retry_delay(),
        }
    }
}

fn default_concurrency() -> usize {
    2
}
fn default_soft_limit() -> u64 {
    25 * 60
}
fn default_hard_limit() -> u64 {
    30 * 60
}
fn default_max_task_retries() -> u32 {
    3
}
fn default_retry_delay() -> u64 {
    60
}

// ---------------------------------------------------------------------------
// Runtime configs (merged from config file + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime fetch configuration.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout: Duration,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub max_pages_per_job: usize,
    pub render_timeout: Duration,
}

impl From<&AppConfig> for FetchConfig {
    fn from(config: &AppConfig) -> Self {
        let f = &config.fetch;
        Self {
            user_agent: f.user_agent.clone(),
            timeout: Duration::from_secs(f.timeout_secs),
            max_attempts: f.max_attempts.max(1),
            backoff_base: Duration::from_millis(f.backoff_base_ms),
            backoff_cap: Duration::from_millis(f.backoff_cap_ms),
            max_pages_per_job: f.max_pages_per_job,
            render_timeout: Duration::from_secs(f.render_timeout_secs),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

/// Runtime scheduling / circuit-breaker configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub interval: Duration,
    pub cleanup_interval: Duration,
    pub retention_days: u32,
    pub failure_threshold: u32,
    pub cooldown: chrono::Duration,
}

impl From<&AppConfig> for SchedulerConfig {
    fn from(config: &AppConfig) -> Self {
        let s = &config.scheduler;
        Self {
            interval: Duration::from_secs(s.interval_secs.max(1)),
            cleanup_interval: Duration::from_secs(s.cleanup_interval_secs.max(1)),
            retention_days: s.retention_days,
            failure_threshold: s.failure_threshold,
            cooldown: chrono::Duration::seconds(s.cooldown_secs as i64),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

/// Runtime worker / task-queue configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub soft_time_limit: Duration,
    pub hard_time_limit: Duration,
    pub max_task_retries: u32,
    pub retry_delay: Duration,
}

impl From<&AppConfig> for WorkerConfig {
    fn from(config: &AppConfig) -> Self {
        let w = &config.worker;
        Self {
            concurrency: w.concurrency.max(1),
            soft_time_limit: Duration::from_secs(w.soft_time_limit_secs),
            hard_time_limit: Duration::from_secs(w.hard_time_limit_secs),
            max_task_retries: w.max_task_retries,
            retry_delay: Duration::from_secs(w.retry_delay_secs),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.bylawdb/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| BylawError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.bylawdb/bylawdb.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| BylawError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| BylawError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| BylawError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content = toml::to_string_pretty(&config).map_err(|e| BylawError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| BylawError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
