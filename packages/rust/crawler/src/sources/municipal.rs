use bylawdb_shared::{ConfigSpec, ItemKind, Result};

use super::JurisdictionSource;
use crate::charset;
use crate::parser::{PageParser, ParsedPage, is_binary_content_type, is_binary_url};

/// URL fragments that mark a link as pointing at a regulation.
const REGULATION_URL_KEYWORDS: &[&str] = &["bylaw", "ordinance", "regulation", "code", "zoning"];

/// Selector-driven source for municipal bylaw sites.
///
/// Seeds are the configured targets followed by the discovery pages.
/// Regulation links found on listing pages and all pagination links are
/// followed within the same run.
#[derive(Debug, Clone)]
pub struct MunicipalSource {
    parser: PageParser,
    target_urls: Vec<String>,
    discovery_urls: Vec<String>,
}

impl MunicipalSource {
    pub const FAMILY: &'static str = "municipal";

    pub fn from_config(spec: &ConfigSpec) -> Result<Self> {
        Ok(Self {
            parser: PageParser::from_config(&spec.selectors)?,
            target_urls: spec.target_urls.clone(),
            discovery_urls: spec.discovery_urls.clone(),
        })
    }
}

fn looks_like_regulation(url: &str) -> bool {
    let lower = url.to_lowercase();
    REGULATION_URL_KEYWORDS.iter().any(|k| lower.contains(k))
}

impl JurisdictionSource for MunicipalSource {
    fn name(&self) -> &str {
        Self::FAMILY
    }

    fn discover(&self) -> Vec<String> {
        self.target_urls
            .iter()
            .chain(&self.discovery_urls)
            .cloned()
            .collect()
    }

    fn parse(&self, url: &str, content_type: Option<&str>, body: &[u8]) -> Result<ParsedPage> {
        if is_binary_url(url) || content_type.is_some_and(is_binary_content_type) {
            return Ok(PageParser::parse_binary(url));
        }
        let encoding = charset::detect_encoding(content_type, body);
        self.parser.parse(&charset::decode(encoding, body), url)
    }

    fn follow(&self, page: &ParsedPage) -> Vec<String> {
        page.items
            .iter()
            .filter(|item| item.kind == ItemKind::Link && looks_like_regulation(&item.source_url))
            .map(|item| item.source_url.clone())
            .chain(page.pagination.iter().cloned())
            .collect()
    }
}
