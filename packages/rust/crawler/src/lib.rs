//! Fetching, parsing and discovery of jurisdiction web pages.
//!
//! This crate provides:
//! - [`charset`]: character encoding detection for fetched HTML
//! - [`fetcher`]: HTTP and browser fetching with bounded retry
//! - [`renderer`]: headless browser sessions (Chromium with the `browser` feature)
//! - [`parser`]: page classification and item extraction
//! - [`frontier`]: per-job URL queue with cycle avoidance
//! - [`sources`]: jurisdiction source families and their registry
//! - [`assets`]: capture of page images, stylesheets and scripts

pub mod assets;
pub mod charset;
pub mod fetcher;
pub mod frontier;
pub mod parser;
pub mod renderer;
pub mod sources;

pub use assets::{AssetRef, CapturedAsset, asset_refs, capture_assets};
pub use fetcher::{
    FetchError, FetchMetadata, FetchMethod, FetchOptions, FetchedContent, Fetcher, RetryPolicy,
};
pub use frontier::{Frontier, normalize_url};
pub use parser::{PageParser, ParsedPage, SelectorSet};
pub use renderer::{Navigation, NoopRenderer, RenderSession, Renderer, default_renderer};
pub use sources::{JurisdictionSource, MunicipalSource, SourceFactory, SourceRegistry};
