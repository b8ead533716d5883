//! Deterministic storage layout for one capture:
//! `{jurisdiction_id}/{domain}/{yyyy}/{mm}/{dd}/{HHMMSS}_{url8}/{artifact}`,
//! where `url8` is the first 8 hex digits of the URL's SHA-256. Two URLs of
//! one site captured in the same second get distinct directories; the same
//! URL captured twice in one second maps to the same paths. Binary
//! documents are stored as `document.{ext}`, keeping their own format.

use bylawdb_shared::{BylawError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{DOCUMENT_TYPES, document_extension_for};

/// Extension of binary documents whose format cannot be told.
const UNKNOWN_DOCUMENT_EXTENSION: &str = "bin";

/// Storage paths of every artifact a capture may produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoragePaths {
    pub base: String,
    pub html: String,
    pub binary: String,
    pub screenshot: String,
    /// Directory prefix (with trailing `/`) for page assets.
    pub assets: String,
    pub metadata: String,
}

impl StoragePaths {
    /// Build the paths for a capture of `url` taken at `at`. `content_type`
    /// names the binary document's format when the URL does not.
    pub fn generate(
        jurisdiction_id: &str,
        url: &str,
        content_type: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Self> {
        if jurisdiction_id.is_empty()
            || jurisdiction_id.contains('/')
            || jurisdiction_id.starts_with('.')
        {
            return Err(BylawError::validation(format!(
                "jurisdiction id '{jurisdiction_id}' cannot be used in a storage path"
            )));
        }

        let base = format!(
            "{jurisdiction_id}/{}/{}_{}",
            domain_segment(url)?,
            at.format("%Y/%m/%d/%H%M%S"),
            &crate::compute_hash(url.as_bytes())[..8]
        );

        Ok(Self {
            html: format!("{base}/page.html"),
            binary: format!("{base}/document.{}", document_extension(url, content_type)),
            screenshot: format!("{base}/screenshot.png"),
            assets: format!("{base}/assets/"),
            metadata: format!("{base}/metadata.json"),
            base,
        })
    }

    /// Path of an asset file inside the capture's asset directory.
    pub fn asset(&self, file_name: &str) -> String {
        let clean: String = file_name
            .chars()
            .map(|c| match c {
                '/' | '\\' | '?' | '#' | ':' => '_',
                c => c,
            })
            .collect();
        let clean = clean.trim_start_matches('.');
        let clean = if clean.is_empty() { "asset" } else { clean };
        format!("{}{clean}", self.assets)
    }
}

/// The URL's own document extension, else the one its content type implies.
fn document_extension(url: &str, content_type: Option<&str>) -> &'static str {
    let from_url = Url::parse(url).ok().and_then(|u| {
        let ext = u.path().rsplit_once('.')?.1.to_ascii_lowercase();
        DOCUMENT_TYPES.iter().find(|(e, _)| *e == ext).map(|(e, _)| *e)
    });
    from_url
        .or_else(|| content_type.and_then(document_extension_for))
        .unwrap_or(UNKNOWN_DOCUMENT_EXTENSION)
}

/// Host of `url` without a leading `www.`, with the port appended when present.
fn domain_segment(url: &str) -> Result<String> {
    let parsed =
        Url::parse(url).map_err(|e| BylawError::validation(format!("invalid URL '{url}': {e}")))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| BylawError::validation(format!("URL '{url}' has no host")))?;
    let host = host.strip_prefix("www.").unwrap_or(host);

    Ok(match parsed.port() {
        Some(port) => format!("{host}_{port}"),
        None => host.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn layout_follows_capture_time() {
        let at = Utc.with_ymd_and_hms(2024, 3, 7, 9, 5, 1).unwrap();
        let paths =
            StoragePaths::generate("j-42", "https://www.saanich.ca/bylaws/zoning?x=1", None, at)
                .unwrap();

        let suffix = &crate::compute_hash(b"https://www.saanich.ca/bylaws/zoning?x=1")[..8];
        let base = format!("j-42/saanich.ca/2024/03/07/090501_{suffix}");

        assert_eq!(paths.base, base);
        assert_eq!(paths.html, format!("{base}/page.html"));
        assert_eq!(paths.binary, format!("{base}/document.bin"));
        assert_eq!(paths.screenshot, format!("{base}/screenshot.png"));
        assert_eq!(paths.assets, format!("{base}/assets/"));
        assert_eq!(paths.metadata, format!("{base}/metadata.json"));
    }

    #[test]
    fn same_second_urls_do_not_collide() {
        let at = Utc.with_ymd_and_hms(2024, 3, 7, 9, 5, 1).unwrap();
        let a = StoragePaths::generate("j", "https://example.ca/bylaws/a", None, at).unwrap();
        let b = StoragePaths::generate("j", "https://example.ca/bylaws/b", None, at).unwrap();
        let again = StoragePaths::generate("j", "https://example.ca/bylaws/a", None, at).unwrap();
        assert_ne!(a.html, b.html);
        assert_eq!(a, again);
    }

    #[test]
    fn port_is_kept_in_domain() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let paths = StoragePaths::generate("j", "http://127.0.0.1:8080/a", None, at).unwrap();
        assert!(paths.base.starts_with("j/127.0.0.1_8080/"));
    }

    #[test]
    fn asset_names_are_flattened() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let paths = StoragePaths::generate("j", "https://example.ca", None, at).unwrap();
        assert_eq!(paths.asset("../style.css"), format!("{}_style.css", paths.assets));
        assert_eq!(paths.asset("logo.png"), format!("{}logo.png", paths.assets));
    }

    #[test]
    fn rejects_unusable_inputs() {
        let at = Utc::now();
        assert!(StoragePaths::generate("a/b", "https://example.ca", None, at).is_err());
        assert!(StoragePaths::generate("j", "not a url", None, at).is_err());
    }

    #[test]
    fn binary_documents_keep_their_format() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let binary = |url: &str, content_type: Option<&str>| {
            let paths = StoragePaths::generate("j", url, content_type, at).unwrap();
            paths.binary.rsplit_once('/').unwrap().1.to_string()
        };

        assert_eq!(binary("https://example.ca/bylaws/zoning.DOCX", None), "document.docx");
        assert_eq!(
            binary("https://example.ca/bylaws/fees.xlsx", Some("application/octet-stream")),
            "document.xlsx"
        );
        assert_eq!(
            binary("https://example.ca/download?id=7", Some("application/msword")),
            "document.doc"
        );
        assert_eq!(
            binary("https://example.ca/bylaws/zoning.pdf", Some("application/pdf")),
            "document.pdf"
        );
        assert_eq!(binary("https://example.ca/download?id=8", None), "document.bin");
    }
}
