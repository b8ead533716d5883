//! Jurisdiction sources: how a family of sites is discovered and parsed.
//!
//! A source is chosen by the `source` field of a jurisdiction config and
//! built from that config by a factory in the [`SourceRegistry`].

mod municipal;

use std::collections::BTreeMap;
use std::sync::Arc;

use bylawdb_shared::{BylawError, ConfigSpec, Result};

use crate::parser::ParsedPage;

pub use municipal::MunicipalSource;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Discovery and parsing rules for one family of jurisdiction sites.
pub trait JurisdictionSource: Send + Sync {
    /// Family name, as used in configs.
    fn name(&self) -> &str;

    /// Seed URLs for a run, in fetch order.
    fn discover(&self) -> Vec<String>;

    /// Parse fetched content. `content_type` is the response header, if any.
    fn parse(&self, url: &str, content_type: Option<&str>, body: &[u8]) -> Result<ParsedPage>;

    /// URLs from a parsed page that should be fetched in the same run.
    fn follow(&self, page: &ParsedPage) -> Vec<String>;
}

/// Builds a source from a jurisdiction config.
pub type SourceFactory = fn(&ConfigSpec) -> Result<Arc<dyn JurisdictionSource>>;

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Source factories keyed by family name.
pub struct SourceRegistry {
    factories: BTreeMap<String, SourceFactory>,
}

impl SourceRegistry {
    /// A registry with the built-in families.
    pub fn new() -> Self {
        let mut registry = Self {
            factories: BTreeMap::new(),
        };
        registry.register(MunicipalSource::FAMILY, |spec| {
            Ok(Arc::new(MunicipalSource::from_config(spec)?))
        });
        registry
    }

    pub fn register(&mut self, family: &str, factory: SourceFactory) {
        self.factories.insert(family.to_string(), factory);
    }

    /// Build the source named by `spec.source`.
    pub fn build(&self, spec: &ConfigSpec) -> Result<Arc<dyn JurisdictionSource>> {
        let factory = self.factories.get(&spec.source).ok_or_else(|| {
            BylawError::config(format!(
                "unknown source family '{}' (known: {})",
                spec.source,
                self.families().join(", ")
            ))
        })?;
        factory(spec)
    }

    pub fn families(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
