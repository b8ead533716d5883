//! Shared types, error model, and configuration for the bylaw archive.
//!
//! This crate is the foundation depended on by all other bylawdb crates.
//! It provides:
//! - [`BylawError`]: the unified error type
//! - Domain types: [`JurisdictionConfig`], [`ScrapeJob`], [`PreservedDocument`], [`ExtractedItem`]
//! - Configuration: [`AppConfig`], [`FetchConfig`], config loading

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DatabaseConfig, FetchConfig, FetchSection, SchedulerConfig, SchedulerSection,
    StorageConfig, WorkerConfig, WorkerSection, config_dir, config_file_path, init_config,
    load_config, load_config_from,
};
pub use error::{BylawError, Result};
pub use types::{
    ConfigSpec, DEFAULT_SOURCE_FAMILY, DocumentKind, ExtractedItem, ItemKind, JobErrorEntry,
    JobId, JobResult, JobStatus, JobType, Jurisdiction, JurisdictionConfig, PreservationStatus,
    PreservedDocument, ScrapeJob, new_record_id,
};
