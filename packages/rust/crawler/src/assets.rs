//! Capture of images, stylesheets and scripts referenced by a page.

use std::collections::HashSet;
use std::sync::LazyLock;

use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::fetcher::{FetchOptions, Fetcher};

static ASSET_TAGS: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("img[src], link[href], script[src]").expect("valid asset selector")
});

/// An asset reference found in page markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRef {
    pub tag: String,
    /// Attribute value as written in the page.
    pub original_url: String,
    pub absolute_url: String,
}

/// A downloaded asset ready to be archived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedAsset {
    pub original_url: String,
    pub absolute_url: String,
    /// Unique file name within the page's asset directory.
    pub file_name: String,
    pub content_type: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

/// Asset references in document order, skipping inline `data:` URIs and
/// protocol-relative references.
pub fn asset_refs(html: &str, page_url: &str) -> Vec<AssetRef> {
    let Ok(base) = Url::parse(page_url) else {
        return Vec::new();
    };
    let doc = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut refs = Vec::new();

    for el in doc.select(&ASSET_TAGS) {
        let tag = el.value().name();
        let attr = if tag == "link" { "href" } else { "src" };
        let Some(raw) = el.value().attr(attr).map(str::trim) else {
            continue;
        };
        if raw.is_empty() || raw.starts_with("data:") || raw.starts_with("//") {
            continue;
        }
        let Ok(absolute) = base.join(raw) else {
            continue;
        };
        if !matches!(absolute.scheme(), "http" | "https") {
            continue;
        }
        if seen.insert(raw.to_string()) {
            refs.push(AssetRef {
                tag: tag.to_string(),
                original_url: raw.to_string(),
                absolute_url: absolute.to_string(),
            });
        }
    }
    refs
}

/// File name for the `index`-th asset: the last URL path segment, or
/// `{tag}_{index}` when the path has none.
fn file_name_for(asset: &AssetRef, index: usize) -> String {
    Url::parse(&asset.absolute_url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut s| s.next_back().map(str::to_string))
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| format!("{}_{index}", asset.tag))
}

/// Download every asset of the page. Failed downloads are logged and skipped.
pub async fn capture_assets(fetcher: &Fetcher, html: &str, page_url: &str) -> Vec<CapturedAsset> {
    let refs = asset_refs(html, page_url);
    let mut names = HashSet::new();
    let mut captured = Vec::with_capacity(refs.len());

    for (index, asset) in refs.into_iter().enumerate() {
        let content = match fetcher.fetch(&asset.absolute_url, FetchOptions::http()).await {
            Ok(content) => content,
            Err(e) => {
                warn!(url = %asset.absolute_url, error = %e, "asset capture failed");
                continue;
            }
        };

        let mut file_name = file_name_for(&asset, index);
        if !names.insert(file_name.clone()) {
            file_name = format!("{index}_{file_name}");
            names.insert(file_name.clone());
        }

        captured.push(CapturedAsset {
            original_url: asset.original_url,
            absolute_url: asset.absolute_url,
            file_name,
            content_type: content
                .metadata
                .content_type
                .clone()
                .unwrap_or_else(|| "application/octet-stream".into()),
            bytes: content.body,
        });
    }

    debug!(page = page_url, count = captured.len(), "captured assets");
    captured
}
