//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bylawdb_artifacts::LocalObjectStore;
use bylawdb_core::{
    BatchEntry, JobOrchestrator, JobProgress, LocalTaskQueue, OrchestratorSettings, PreparedJob,
    ScheduleOutcome, Scheduler, TaskQueue,
};
use bylawdb_shared::{
    AppConfig, ConfigSpec, JobId, JobResult, JobType, Jurisdiction, init_config, load_config,
    load_config_from,
};
use bylawdb_storage::Storage;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// bylawdb: archive municipal bylaws and extract ADU requirements.
#[derive(Parser)]
#[command(
    name = "bylawdb",
    version,
    about = "Archive municipal bylaw pages and extract accessory dwelling unit requirements.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.bylawdb/bylawdb.toml).
    #[arg(long, env = "BYLAWDB_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Manage jurisdictions and their scraping configs.
    Jurisdiction {
        #[command(subcommand)]
        action: JurisdictionAction,
    },

    /// Run a manual scrape job for one jurisdiction and wait for it.
    Scrape {
        /// Jurisdiction ID.
        #[arg(short, long)]
        jurisdiction: String,

        /// Ignore the circuit breaker and cooldown.
        #[arg(long)]
        force: bool,
    },

    /// Queue jobs for several jurisdictions and wait for all of them.
    Batch {
        /// Jurisdiction IDs.
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Run queue workers and the periodic scheduler until Ctrl-C.
    Worker,

    /// Delete finished jobs older than the retention window.
    Cleanup {
        /// Retention in days (defaults to the configured value).
        #[arg(long)]
        days: Option<u32>,
    },

    /// Inspect or cancel jobs.
    Job {
        #[command(subcommand)]
        action: JobAction,
    },

    /// Re-hash a preserved document and compare with the recorded hash.
    Verify {
        /// Document ID.
        document_id: String,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Jurisdiction subcommands.
#[derive(Subcommand)]
pub(crate) enum JurisdictionAction {
    /// Register a jurisdiction, or replace its active config.
    Add {
        #[arg(long)]
        id: String,

        #[arg(long)]
        name: String,

        /// Scraping config file (.toml or .json).
        #[arg(long)]
        config: PathBuf,

        /// Exclude the jurisdiction from scheduled and batch runs.
        #[arg(long)]
        disabled: bool,
    },
    /// List registered jurisdictions with their breaker state.
    List,
    /// Close the circuit breaker of a jurisdiction.
    Reset {
        #[arg(long)]
        id: String,
    },
}

/// Job subcommands.
#[derive(Subcommand)]
pub(crate) enum JobAction {
    /// Show one job as JSON.
    Status { id: JobId },
    /// Cancel a pending or running job.
    Cancel { id: JobId },
    /// List recent jobs of a jurisdiction.
    List {
        #[arg(long)]
        jurisdiction: String,

        #[arg(long, default_value = "20")]
        limit: u32,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "bylawdb=info",
        1 => "bylawdb=debug",
        _ => "bylawdb=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    if let Command::Config { action } = &cli.command {
        return match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(cli.config.as_deref()),
        };
    }

    let config = resolve_config(cli.config.as_deref())?;
    let orchestrator = open_orchestrator(&config).await?;

    match cli.command {
        Command::Jurisdiction { action } => match action {
            JurisdictionAction::Add {
                id,
                name,
                config: spec_path,
                disabled,
            } => cmd_jurisdiction_add(&orchestrator, id, name, &spec_path, !disabled).await,
            JurisdictionAction::List => cmd_jurisdiction_list(&orchestrator).await,
            JurisdictionAction::Reset { id } => {
                orchestrator.reset_circuit(&id).await?;
                println!("Circuit breaker reset for {id}");
                Ok(())
            }
        },
        Command::Scrape {
            jurisdiction,
            force,
        } => cmd_scrape(&orchestrator, &jurisdiction, force).await,
        Command::Batch { ids } => cmd_batch(orchestrator, &ids).await,
        Command::Worker => cmd_worker(orchestrator).await,
        Command::Cleanup { days } => {
            let days = days.unwrap_or(config.scheduler.retention_days);
            let deleted = orchestrator.cleanup_old_jobs(days).await?;
            println!("Deleted {deleted} job(s) older than {days} day(s)");
            Ok(())
        }
        Command::Job { action } => match action {
            JobAction::Status { id } => {
                let job = orchestrator.job_status(&id).await?;
                println!("{}", serde_json::to_string_pretty(&job)?);
                Ok(())
            }
            JobAction::Cancel { id } => {
                if orchestrator.cancel_job(&id).await? {
                    println!("Job {id} cancelled");
                } else {
                    println!("Job {id} already finished");
                }
                Ok(())
            }
            JobAction::List {
                jurisdiction,
                limit,
            } => cmd_job_list(&orchestrator, &jurisdiction, limit).await,
        },
        Command::Verify { document_id } => cmd_verify(&orchestrator, &document_id).await,
        Command::Config { .. } => Ok(()),
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

async fn open_orchestrator(config: &AppConfig) -> Result<Arc<JobOrchestrator>> {
    let db_path = PathBuf::from(&config.database.path);
    let storage = Storage::open(&db_path, config.database.pool_size)
        .await
        .wrap_err_with(|| format!("cannot open database at {}", db_path.display()))?;
    let store = LocalObjectStore::new(&config.storage.root, &config.storage.bucket);
    info!(
        database = %db_path.display(),
        archive = %store.root().display(),
        "archive opened"
    );

    Ok(Arc::new(JobOrchestrator::new(
        Arc::new(storage),
        Arc::new(store),
        OrchestratorSettings::from(config),
    )))
}

// ---------------------------------------------------------------------------
// Jurisdictions
// ---------------------------------------------------------------------------

/// Parse a scraping config from a `.json` or `.toml` file.
fn read_config_spec(path: &Path) -> Result<ConfigSpec> {
    let content = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("cannot read {}", path.display()))?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let spec = if is_json {
        serde_json::from_str(&content)
            .wrap_err_with(|| format!("invalid JSON config {}", path.display()))?
    } else {
        toml::from_str(&content)
            .wrap_err_with(|| format!("invalid TOML config {}", path.display()))?
    };
    Ok(spec)
}

async fn cmd_jurisdiction_add(
    orchestrator: &JobOrchestrator,
    id: String,
    name: String,
    spec_path: &Path,
    scraping_enabled: bool,
) -> Result<()> {
    let spec = read_config_spec(spec_path)?;
    let jurisdiction = Jurisdiction {
        id,
        name,
        scraping_enabled,
    };
    let config = orchestrator.register_jurisdiction(&jurisdiction, &spec).await?;

    println!();
    println!("  Jurisdiction registered");
    println!("  ID:        {}", jurisdiction.id);
    println!("  Name:      {}", jurisdiction.name);
    println!("  Config:    {}", config.id);
    println!("  Targets:   {}", spec.target_urls.len());
    println!("  Discovery: {}", spec.discovery_urls.len());
    println!(
        "  Schedule:  {}",
        spec.schedule_cron.as_deref().unwrap_or("daily")
    );
    println!();
    Ok(())
}

async fn cmd_jurisdiction_list(orchestrator: &JobOrchestrator) -> Result<()> {
    let storage = orchestrator.storage();
    let jurisdictions = storage.list_jurisdictions().await?;
    if jurisdictions.is_empty() {
        println!("No jurisdictions registered.");
        return Ok(());
    }

    let threshold = orchestrator.settings().scheduler.failure_threshold;
    println!(
        "{:<20} {:<28} {:<8} {:<9} {:<25}",
        "ID", "NAME", "ENABLED", "FAILURES", "NEXT RUN"
    );
    for jurisdiction in jurisdictions {
        let config = storage.active_config(&jurisdiction.id).await?;
        let (failures, next_run) = match &config {
            Some(config) => (
                format!(
                    "{}{}",
                    config.failure_count,
                    if config.failure_count >= threshold { "!" } else { "" }
                ),
                config
                    .next_run_at
                    .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
                    .unwrap_or_else(|| "due".into()),
            ),
            None => ("-".into(), "no config".into()),
        };
        println!(
            "{:<20} {:<28} {:<8} {:<9} {:<25}",
            jurisdiction.id,
            jurisdiction.name,
            if jurisdiction.scraping_enabled { "yes" } else { "no" },
            failures,
            next_run
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

async fn cmd_scrape(orchestrator: &JobOrchestrator, jurisdiction: &str, force: bool) -> Result<()> {
    let triggered_by = std::env::var("USER").ok();
    let job = match orchestrator
        .prepare_job(jurisdiction, JobType::Manual, triggered_by.as_deref(), force)
        .await?
    {
        PreparedJob::Created(job) => job,
        PreparedJob::Skipped(reason) => {
            println!("Skipped {jurisdiction}: {reason}");
            return Ok(());
        }
    };

    info!(job_id = %job.id, jurisdiction, "running manual job");
    let progress = CliProgress::new();
    let result = orchestrator
        .execute(&job.id, None, None, &progress)
        .await?;

    print_result(&result);
    Ok(())
}

fn print_result(result: &JobResult) {
    println!();
    println!("  Job {}", result.status);
    println!("  ID:        {}", result.job_id);
    println!("  Found:     {}", result.documents_found);
    println!("  Processed: {}", result.documents_processed);
    println!("  Changed:   {}", result.documents_changed);
    println!("  Errors:    {}", result.errors.len());
    println!("  Time:      {:.1}s", result.duration_seconds);
    for error in result.errors.iter().take(10) {
        println!("    {}: {}", error.url, error.message);
    }
    if result.errors.len() > 10 {
        println!("    ... and {} more", result.errors.len() - 10);
    }
    println!();
}

async fn cmd_batch(orchestrator: Arc<JobOrchestrator>, ids: &[String]) -> Result<()> {
    let (queue, workers) =
        LocalTaskQueue::start(orchestrator.clone(), &orchestrator.settings().worker);
    let triggered_by = std::env::var("USER").ok();
    let entries = orchestrator
        .schedule_batch(&queue, ids, triggered_by.as_deref())
        .await;
    print_batch(&entries);

    let queued: Vec<JobId> = entries
        .iter()
        .filter_map(|entry| match &entry.outcome {
            Some(ScheduleOutcome::Queued { job_id, .. }) => Some(job_id.clone()),
            _ => None,
        })
        .collect();

    if !queued.is_empty() {
        let spinner = spinner();
        let mut pending = queued.clone();
        while !pending.is_empty() {
            spinner.set_message(format!("Waiting for {} job(s)", pending.len()));
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    spinner.finish_and_clear();
                    println!("Interrupted; queued jobs stay pending.");
                    workers.shutdown().await;
                    return Ok(());
                }
                _ = tokio::time::sleep(Duration::from_millis(500)) => {}
            }
            let mut still_running = Vec::with_capacity(pending.len());
            for id in pending {
                if !orchestrator.job_status(&id).await?.status.is_terminal() {
                    still_running.push(id);
                }
            }
            pending = still_running;
        }
        spinner.finish_and_clear();

        println!();
        for id in &queued {
            let job = orchestrator.job_status(id).await?;
            println!(
                "  {:<20} {:<10} processed {:>3}, changed {:>3}, errors {:>3}",
                job.jurisdiction_id,
                job.status.as_str(),
                job.documents_processed,
                job.documents_changed,
                job.errors.len()
            );
        }
        println!();
    }

    // Retries are delayed; they are not waited for.
    workers.shutdown().await;
    Ok(())
}

fn print_batch(entries: &[BatchEntry]) {
    for entry in entries {
        match (&entry.outcome, &entry.error) {
            (Some(ScheduleOutcome::Queued { job_id, .. }), _) => {
                println!("  {:<20} queued  {job_id}", entry.jurisdiction_id);
            }
            (Some(ScheduleOutcome::Skipped { reason }), _) => {
                println!("  {:<20} skipped {reason}", entry.jurisdiction_id);
            }
            (None, Some(error)) => {
                println!("  {:<20} error   {error}", entry.jurisdiction_id);
            }
            (None, None) => {}
        }
    }
}

async fn cmd_worker(orchestrator: Arc<JobOrchestrator>) -> Result<()> {
    let settings = orchestrator.settings().clone();
    let (queue, workers) = LocalTaskQueue::start(orchestrator.clone(), &settings.worker);
    let queue: Arc<dyn TaskQueue> = Arc::new(queue);
    let scheduler = Scheduler::start(queue, &settings.scheduler);

    println!("Worker running ({} task worker(s)). Press Ctrl-C to stop.", settings.worker.concurrency);
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| eyre!("cannot listen for Ctrl-C: {e}"))?;

    info!("shutdown requested");
    scheduler.shutdown().await;
    workers.shutdown().await;
    Ok(())
}

async fn cmd_job_list(orchestrator: &JobOrchestrator, jurisdiction: &str, limit: u32) -> Result<()> {
    let jobs = orchestrator.storage().list_jobs(jurisdiction, limit).await?;
    if jobs.is_empty() {
        println!("No jobs for {jurisdiction}.");
        return Ok(());
    }
    println!(
        "{:<38} {:<10} {:<10} {:<8} {:<10} {:<20}",
        "ID", "TYPE", "STATUS", "ATTEMPT", "PROCESSED", "CREATED"
    );
    for job in jobs {
        println!(
            "{:<38} {:<10} {:<10} {:<8} {:<10} {:<20}",
            job.id.to_string(),
            job.job_type.as_str(),
            job.status.as_str(),
            job.attempt,
            job.documents_processed,
            job.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

async fn cmd_verify(orchestrator: &JobOrchestrator, document_id: &str) -> Result<()> {
    let report = orchestrator.preserver().verify_integrity(document_id).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.valid {
        return Err(eyre!("document {document_id} failed integrity verification"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

fn spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        spinner.set_style(
            style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
    }
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner
}

/// Job progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        Self { spinner: spinner() }
    }
}

impl JobProgress for CliProgress {
    fn started(&self, job_id: &JobId, jurisdiction_id: &str) {
        self.spinner
            .set_message(format!("Scraping {jurisdiction_id} (job {job_id})"));
    }

    fn page_fetched(&self, url: &str, fetched: u32, queued: usize) {
        self.spinner
            .set_message(format!("Fetched [{fetched}, {queued} queued] {url}"));
    }

    fn page_preserved(&self, url: &str, changed: bool) {
        let label = if changed { "Preserved" } else { "Unchanged" };
        self.spinner.set_message(format!("{label} {url}"));
    }

    fn page_failed(&self, url: &str, error: &str) {
        self.spinner.println(format!("  ! {url}: {error}"));
    }

    fn done(&self, _result: &JobResult) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = resolve_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scrape_flags() {
        let cli = Cli::try_parse_from(["bylawdb", "-vv", "scrape", "--jurisdiction", "saanich", "--force"])
            .unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(
            cli.command,
            Command::Scrape { ref jurisdiction, force: true } if jurisdiction == "saanich"
        ));
    }

    #[test]
    fn batch_requires_ids() {
        assert!(Cli::try_parse_from(["bylawdb", "batch"]).is_err());
        let cli = Cli::try_parse_from(["bylawdb", "batch", "saanich", "oak-bay"]).unwrap();
        assert!(matches!(cli.command, Command::Batch { ref ids } if ids.len() == 2));
    }

    #[test]
    fn job_ids_must_be_uuids() {
        assert!(Cli::try_parse_from(["bylawdb", "job", "status", "not-a-uuid"]).is_err());
        let id = JobId::new().to_string();
        assert!(Cli::try_parse_from(["bylawdb", "job", "cancel", &id]).is_ok());
    }

    #[test]
    fn reads_toml_and_json_specs() {
        let dir = std::env::temp_dir().join(format!("bylawdb_cli_{}", JobId::new()));
        std::fs::create_dir_all(&dir).unwrap();

        let toml_path = dir.join("saanich.toml");
        std::fs::write(
            &toml_path,
            r##"
target_urls = ["https://saanich.ca/bylaws/adu"]
schedule_cron = "0 3 * * 1"

[selectors]
content = "#main"
"##,
        )
        .unwrap();
        let spec = read_config_spec(&toml_path).unwrap();
        assert_eq!(spec.target_urls.len(), 1);
        assert_eq!(spec.schedule_cron.as_deref(), Some("0 3 * * 1"));
        assert!(spec.is_active);

        let json_path = dir.join("oak-bay.json");
        std::fs::write(
            &json_path,
            r#"{"target_urls": [], "discovery_urls": ["https://oakbay.ca/bylaws"], "requires_javascript": true}"#,
        )
        .unwrap();
        let spec = read_config_spec(&json_path).unwrap();
        assert_eq!(spec.discovery_urls, vec!["https://oakbay.ca/bylaws".to_string()]);
        assert!(spec.requires_javascript);

        std::fs::remove_dir_all(&dir).ok();
    }
}
