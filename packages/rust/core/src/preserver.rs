//! Write-once archival of fetched pages and files.
//!
//! A capture is recorded as `pending` before anything is written, each
//! artifact is uploaded with the no-overwrite flag, and the record becomes
//! `preserved` only when every required artifact landed. A screenshot that
//! cannot be stored leaves it `partial`. Failures never escape as errors:
//! callers inspect [`PreservationResult::success`].

use std::sync::{Arc, LazyLock};

use bylawdb_artifacts::{ObjectStore, StoragePaths, compute_hash, content_type_for};
use bylawdb_crawler::{CapturedAsset, FetchMetadata, FetchedContent, charset};
use bylawdb_extract::RequirementSet;
use bylawdb_shared::{
    BylawError, DocumentKind, ExtractedItem, JobId, PreservationStatus, Result, new_record_id,
};
use bylawdb_storage::{NewDocument, PreservedArtifacts, Storage};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

/// Name of the `<meta>` tag stamped into every archived page.
pub const PRESERVED_META_NAME: &str = "bylaw-db-preserved";

static HEAD_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<head(?:\s[^>]*)?>").expect("valid head pattern"));

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Everything known about one fetched URL at preservation time.
#[derive(Debug, Clone, Copy)]
pub struct Capture<'a> {
    pub jurisdiction_id: &'a str,
    pub job_id: Option<&'a JobId>,
    pub url: &'a str,
    /// `Binary` stores the body as a document; anything else as an HTML page.
    pub kind: DocumentKind,
    pub content: &'a FetchedContent,
    pub assets: &'a [CapturedAsset],
    pub items: &'a [ExtractedItem],
    pub requirements: Option<&'a RequirementSet>,
}

/// Outcome of [`Preserver::preserve`].
#[derive(Debug, Clone, Serialize)]
pub struct PreservationResult {
    pub success: bool,
    pub document_id: String,
    /// Whether the content differs from the URL's previous preserved capture.
    pub changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    pub errors: Vec<String>,
}

impl PreservationResult {
    fn failed(document_id: String, content_hash: Option<String>, errors: Vec<String>) -> Self {
        Self {
            success: false,
            document_id,
            changed: false,
            content_hash,
            errors,
        }
    }
}

/// Result of re-hashing a preserved document's stored content.
#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub document_id: String,
    pub status: PreservationStatus,
    /// The hashed artifact (page or binary document).
    pub path: Option<String>,
    pub expected_hash: Option<String>,
    pub actual_hash: Option<String>,
    /// Recorded artifacts that are no longer in the object store.
    pub missing: Vec<String>,
    pub valid: bool,
}

#[derive(Serialize)]
struct Manifest<'a> {
    document_id: &'a str,
    jurisdiction_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    job_id: Option<String>,
    source_url: &'a str,
    document_type: DocumentKind,
    preserved_at: DateTime<Utc>,
    content_hash: &'a str,
    fetch: &'a FetchMetadata,
    storage_paths: &'a StoragePaths,
    assets_preserved: usize,
    assets: &'a [ManifestAsset],
    items: &'a [ExtractedItem],
    #[serde(skip_serializing_if = "Option::is_none")]
    requirements: Option<&'a RequirementSet>,
}

#[derive(Debug, Clone, Serialize)]
struct ManifestAsset {
    original_url: String,
    path: String,
    content_type: String,
}

// ---------------------------------------------------------------------------
// Preserver
// ---------------------------------------------------------------------------

pub struct Preserver {
    storage: Arc<Storage>,
    store: Arc<dyn ObjectStore>,
}

impl Preserver {
    pub fn new(storage: Arc<Storage>, store: Arc<dyn ObjectStore>) -> Self {
        Self { storage, store }
    }

    /// Archive one capture. Never returns an error; failures are reported in
    /// the result and recorded on the document row.
    #[instrument(skip_all, fields(jurisdiction = capture.jurisdiction_id, url = capture.url))]
    pub async fn preserve(&self, capture: Capture<'_>) -> PreservationResult {
        let document_id = new_record_id();
        let metadata = &capture.content.metadata;

        let record = NewDocument {
            id: document_id.clone(),
            jurisdiction_id: capture.jurisdiction_id.to_string(),
            job_id: capture.job_id.map(JobId::to_string),
            source_url: capture.url.to_string(),
            document_type: capture.kind,
            scraped_at: metadata.fetched_at,
            http_status: Some(metadata.status),
            http_headers: metadata.headers.clone(),
        };
        if let Err(e) = self.storage.insert_pending_document(&record).await {
            warn!(error = %e, "could not create document record");
            return PreservationResult::failed(
                document_id,
                None,
                vec![format!("document record: {e}")],
            );
        }

        match self.store_artifacts(&document_id, &capture).await {
            Ok(result) => result,
            Err(e) => {
                let message = format!("preservation error ({}): {e}", e.kind());
                self.mark_failed(&document_id, &message).await;
                PreservationResult::failed(document_id, None, vec![message])
            }
        }
    }

    async fn store_artifacts(
        &self,
        document_id: &str,
        capture: &Capture<'_>,
    ) -> Result<PreservationResult> {
        let metadata = &capture.content.metadata;
        let paths = StoragePaths::generate(
            capture.jurisdiction_id,
            capture.url,
            metadata.content_type.as_deref(),
            metadata.fetched_at,
        )?;
        let body = capture.content.body.as_slice();

        let mut errors = Vec::new();
        let mut artifacts = PreservedArtifacts::default();
        let mut preserved_assets = Vec::new();

        if capture.kind == DocumentKind::Binary {
            let content_type = metadata
                .content_type
                .as_deref()
                .unwrap_or_else(|| content_type_for(&paths.binary));
            artifacts.content_hash = compute_hash(body);
            artifacts.file_size_bytes = body.len() as u64;
            match self.store.put(&paths.binary, body, content_type, true).await {
                Ok(()) => artifacts.binary_path = Some(paths.binary.clone()),
                Err(e) => errors.push(format!("binary upload failed: {e}")),
            }
        } else {
            // Assets go first so only those actually archived are rewritten.
            for asset in capture.assets {
                let path = paths.asset(&asset.file_name);
                match self.store.put(&path, &asset.bytes, &asset.content_type, true).await {
                    Ok(()) => preserved_assets.push(ManifestAsset {
                        original_url: asset.original_url.clone(),
                        path,
                        content_type: asset.content_type.clone(),
                    }),
                    Err(e) => warn!(asset = %asset.absolute_url, error = %e, "asset not preserved"),
                }
            }

            // Pages are stored in the encoding they were served in.
            let encoding = capture.content.encoding();
            let decoded = charset::decode(encoding, body);
            let html = rewrite_asset_refs(&decoded, &paths.base, &preserved_assets);
            let html = stamp_preserved(&html, capture.url);
            let (bytes, written) = charset::encode(encoding, &html);
            artifacts.content_hash = compute_hash(&bytes);
            artifacts.file_size_bytes = bytes.len() as u64;
            match self
                .store
                .put(&paths.html, &bytes, &charset::html_content_type(written), true)
                .await
            {
                Ok(()) => artifacts.html_path = Some(paths.html.clone()),
                Err(e) => errors.push(format!("HTML upload failed: {e}")),
            }
        }

        if let Some(screenshot) = capture.content.screenshot.as_deref() {
            match self.store.put(&paths.screenshot, screenshot, "image/png", true).await {
                Ok(()) => artifacts.screenshot_path = Some(paths.screenshot.clone()),
                Err(e) => {
                    warn!(document_id, error = %e, "screenshot not preserved");
                    artifacts.partial_error = Some(format!("screenshot upload failed: {e}"));
                }
            }
        }

        let manifest = Manifest {
            document_id,
            jurisdiction_id: capture.jurisdiction_id,
            job_id: capture.job_id.map(JobId::to_string),
            source_url: capture.url,
            document_type: capture.kind,
            preserved_at: Utc::now(),
            content_hash: &artifacts.content_hash,
            fetch: metadata,
            storage_paths: &paths,
            assets_preserved: preserved_assets.len(),
            assets: &preserved_assets,
            items: capture.items,
            requirements: capture.requirements,
        };
        let manifest = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| BylawError::validation(format!("manifest encoding: {e}")))?;
        match self
            .store
            .put(&paths.metadata, &manifest, "application/json", true)
            .await
        {
            Ok(()) => artifacts.metadata_path = Some(paths.metadata.clone()),
            Err(e) => errors.push(format!("metadata upload failed: {e}")),
        }

        if !errors.is_empty() {
            let message = errors.join("; ");
            warn!(document_id, error = %message, "preservation failed");
            self.mark_failed(document_id, &message).await;
            return Ok(PreservationResult::failed(
                document_id.to_string(),
                Some(artifacts.content_hash),
                errors,
            ));
        }

        let changed = self.storage.finalize_preserved(document_id, &artifacts).await?;
        info!(
            document_id,
            hash = %artifacts.content_hash,
            bytes = artifacts.file_size_bytes,
            assets = preserved_assets.len(),
            changed,
            status = %artifacts.status(),
            "document preserved"
        );

        Ok(PreservationResult {
            success: true,
            document_id: document_id.to_string(),
            changed,
            content_hash: Some(artifacts.content_hash),
            errors: artifacts.partial_error.into_iter().collect(),
        })
    }

    async fn mark_failed(&self, document_id: &str, message: &str) {
        if let Err(e) = self.storage.mark_document_failed(document_id, message).await {
            warn!(document_id, error = %e, "could not mark document failed");
        }
    }

    /// Re-read a preserved document's page or binary and compare its hash
    /// with the recorded one. Also reports recorded artifacts that vanished.
    #[instrument(skip(self))]
    pub async fn verify_integrity(&self, document_id: &str) -> Result<IntegrityReport> {
        let document = self
            .storage
            .get_document(document_id)
            .await?
            .ok_or_else(|| BylawError::NotFound(format!("document {document_id}")))?;

        let path = document
            .html_path
            .clone()
            .or_else(|| document.binary_path.clone());

        let actual_hash = match &path {
            Some(path) => match self.store.get(path).await {
                Ok(bytes) => Some(compute_hash(&bytes)),
                Err(BylawError::NotFound(_)) => None,
                Err(e) => return Err(e),
            },
            None => None,
        };

        let mut missing = Vec::new();
        let recorded = [
            &document.html_path,
            &document.binary_path,
            &document.screenshot_path,
            &document.metadata_path,
        ];
        for artifact in recorded.into_iter().flatten() {
            if !self.store.exists(artifact).await? {
                missing.push(artifact.clone());
            }
        }

        let valid = matches!(
            document.preservation_status,
            PreservationStatus::Preserved | PreservationStatus::Partial
        )
            && actual_hash.is_some()
            && actual_hash == document.content_hash
            && missing.is_empty();
        debug!(valid, missing = missing.len(), "integrity checked");

        Ok(IntegrityReport {
            document_id: document.id,
            status: document.preservation_status,
            path,
            expected_hash: document.content_hash,
            actual_hash,
            missing,
            valid,
        })
    }
}

// ---------------------------------------------------------------------------
// HTML rewriting
// ---------------------------------------------------------------------------

/// Point `src`/`href` attributes that reference archived assets at their
/// archived copies, relative to the page's own location.
fn rewrite_asset_refs(html: &str, base: &str, assets: &[ManifestAsset]) -> String {
    let mut html = html.to_string();
    for asset in assets {
        let relative = asset
            .path
            .strip_prefix(base)
            .unwrap_or(&asset.path)
            .trim_start_matches('/');

        let mut variants = vec![regex::escape(&asset.original_url)];
        let entity_encoded = asset.original_url.replace('&', "&amp;");
        if entity_encoded != asset.original_url {
            variants.push(regex::escape(&entity_encoded));
        }
        let alternatives = variants.join("|");

        let pattern = format!(r#"(?i)\b(src|href)(\s*=\s*)(?:"(?:{alternatives})"|'(?:{alternatives})')"#);
        let re = match Regex::new(&pattern) {
            Ok(re) => re,
            Err(e) => {
                warn!(asset = %asset.original_url, error = %e, "cannot rewrite asset reference");
                continue;
            }
        };
        html = re
            .replace_all(&html, |caps: &regex::Captures<'_>| {
                format!("{}{}\"{relative}\"", &caps[1], &caps[2])
            })
            .into_owned();
    }
    html
}

/// Add the preservation `<meta>` tag at the start of `<head>`. Pages
/// without a head are left as they are.
fn stamp_preserved(html: &str, source_url: &str) -> String {
    let Some(head) = HEAD_OPEN.find(html) else {
        return html.to_string();
    };
    let tag = format!(
        "<meta name=\"{PRESERVED_META_NAME}\" content=\"{}\">",
        escape_attr(source_url)
    );
    let mut out = String::with_capacity(html.len() + tag.len());
    out.push_str(&html[..head.end()]);
    out.push_str(&tag);
    out.push_str(&html[head.end()..]);
    out
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use bylawdb_artifacts::MemoryObjectStore;
    use bylawdb_crawler::FetchMethod;
    use bylawdb_shared::Jurisdiction;
    use chrono::TimeZone;
    use uuid::Uuid;

    use super::*;

    const PAGE: &str = r#"<html><head><title>Bylaw 2024-45</title><link rel="stylesheet" href="/css/site.css"></head>
<body><img src="logo.png?v=1&amp;x=2"><p>Accessory dwelling units</p></body></html>"#;

    async fn setup() -> (Arc<Storage>, Arc<MemoryObjectStore>, Preserver) {
        let tmp = std::env::temp_dir().join(format!("bylawdb_test_{}.db", Uuid::now_v7()));
        let storage = Arc::new(Storage::open(&tmp, 4).await.unwrap());
        storage
            .upsert_jurisdiction(&Jurisdiction {
                id: "saanich".into(),
                name: "Saanich".into(),
                scraping_enabled: true,
            })
            .await
            .unwrap();
        let store = Arc::new(MemoryObjectStore::new());
        let preserver = Preserver::new(storage.clone(), store.clone());
        (storage, store, preserver)
    }

    fn fetched(url: &str, body: &[u8], content_type: &str, second: u32) -> FetchedContent {
        FetchedContent {
            body: body.to_vec(),
            metadata: FetchMetadata {
                url: url.into(),
                final_url: url.into(),
                method: FetchMethod::Http,
                status: 200,
                headers: BTreeMap::new(),
                elapsed_ms: 12,
                content_length: body.len(),
                content_type: Some(content_type.into()),
                fetched_at: Utc.with_ymd_and_hms(2024, 3, 7, 9, 5, second).unwrap(),
                attempts: 1,
                page_title: None,
                performance: None,
            },
            screenshot: None,
        }
    }

    fn capture<'a>(url: &'a str, content: &'a FetchedContent, kind: DocumentKind) -> Capture<'a> {
        Capture {
            jurisdiction_id: "saanich",
            job_id: None,
            url,
            kind,
            content,
            assets: &[],
            items: &[],
            requirements: None,
        }
    }

    #[tokio::test]
    async fn preserves_page_and_manifest() {
        let (storage, store, preserver) = setup().await;
        let url = "https://www.saanich.ca/bylaws/zoning";
        let content = fetched(url, PAGE.as_bytes(), "text/html", 1);

        let result = preserver.preserve(capture(url, &content, DocumentKind::Regulation)).await;
        assert!(result.success, "{:?}", result.errors);
        assert!(result.changed);

        let doc = storage.get_document(&result.document_id).await.unwrap().unwrap();
        assert_eq!(doc.preservation_status, PreservationStatus::Preserved);
        let html_path = doc.html_path.clone().unwrap();
        let stored = store.get(&html_path).await.unwrap();
        assert_eq!(Some(compute_hash(&stored)), doc.content_hash);

        let html = String::from_utf8(stored).unwrap();
        assert!(html.contains(r#"<meta name="bylaw-db-preserved""#));

        let manifest: serde_json::Value =
            serde_json::from_slice(&store.get(doc.metadata_path.as_deref().unwrap()).await.unwrap())
                .unwrap();
        assert_eq!(manifest["source_url"], url);
        assert_eq!(manifest["content_hash"], doc.content_hash.clone().unwrap());
        assert_eq!(manifest["fetch"]["status"], 200);
        assert_eq!(manifest["assets_preserved"], 0);
    }

    #[tokio::test]
    async fn unchanged_content_is_not_counted_as_changed() {
        let (_storage, _store, preserver) = setup().await;
        let url = "https://www.saanich.ca/bylaws/zoning";
        let first = fetched(url, PAGE.as_bytes(), "text/html", 1);
        let second = fetched(url, PAGE.as_bytes(), "text/html", 2);

        let a = preserver.preserve(capture(url, &first, DocumentKind::Regulation)).await;
        let b = preserver.preserve(capture(url, &second, DocumentKind::Regulation)).await;
        assert!(a.success && b.success);
        assert!(a.changed);
        assert!(!b.changed);
        assert_eq!(a.content_hash, b.content_hash);
    }

    #[tokio::test]
    async fn second_write_to_same_path_conflicts() {
        let (storage, store, preserver) = setup().await;
        let url = "https://www.saanich.ca/bylaws/zoning";
        let first = fetched(url, PAGE.as_bytes(), "text/html", 1);
        let altered = fetched(url, b"<html><head></head><body>altered</body></html>", "text/html", 1);

        let a = preserver.preserve(capture(url, &first, DocumentKind::Regulation)).await;
        assert!(a.success);
        let b = preserver.preserve(capture(url, &altered, DocumentKind::Regulation)).await;
        assert!(!b.success);
        assert!(b.errors.iter().any(|e| e.contains("conflict")), "{:?}", b.errors);

        let failed = storage.get_document(&b.document_id).await.unwrap().unwrap();
        assert_eq!(failed.preservation_status, PreservationStatus::Failed);
        assert!(failed.preservation_error.unwrap().contains("HTML upload failed"));

        // The first capture is untouched.
        let report = preserver.verify_integrity(&a.document_id).await.unwrap();
        assert!(report.valid);
        let original = store.get(report.path.as_deref().unwrap()).await.unwrap();
        assert!(String::from_utf8(original).unwrap().contains("Accessory dwelling units"));
    }

    #[tokio::test]
    async fn binary_documents_are_stored_verbatim() {
        let (storage, store, preserver) = setup().await;
        let url = "https://www.saanich.ca/files/zoning-bylaw.pdf";
        let pdf = b"%PDF-1.7 fake";
        let content = fetched(url, pdf, "application/pdf", 3);

        let result = preserver.preserve(capture(url, &content, DocumentKind::Binary)).await;
        assert!(result.success);
        let doc = storage.get_document(&result.document_id).await.unwrap().unwrap();
        assert!(doc.html_path.is_none());
        let binary_path = doc.binary_path.unwrap();
        assert_eq!(store.get(&binary_path).await.unwrap(), pdf.to_vec());
        assert_eq!(doc.content_hash.unwrap(), compute_hash(pdf));
        assert_eq!(store.content_type(&binary_path).as_deref(), Some("application/pdf"));
        assert!(binary_path.ends_with("/document.pdf"));
    }

    #[tokio::test]
    async fn word_documents_keep_their_extension() {
        let (storage, _store, preserver) = setup().await;
        let url = "https://www.saanich.ca/files/secondary-suites.docx";
        let content = fetched(url, b"PK\x03\x04 fake docx", "application/octet-stream", 3);

        let result = preserver.preserve(capture(url, &content, DocumentKind::Binary)).await;
        assert!(result.success);
        let doc = storage.get_document(&result.document_id).await.unwrap().unwrap();
        assert!(doc.binary_path.unwrap().ends_with("/document.docx"));
    }

    #[tokio::test]
    async fn latin1_pages_are_archived_in_their_own_encoding() {
        let (storage, store, preserver) = setup().await;
        let url = "https://www.ville.example.qc.ca/reglements/zonage";
        let body = b"<html><head><title>R\xE8glement</title></head><body><p>Unit\xE9 d'habitation accessoire</p></body></html>";
        let content = fetched(url, body, "text/html; charset=ISO-8859-1", 5);

        let result = preserver.preserve(capture(url, &content, DocumentKind::Regulation)).await;
        assert!(result.success, "{:?}", result.errors);
        let doc = storage.get_document(&result.document_id).await.unwrap().unwrap();
        let html_path = doc.html_path.unwrap();
        let stored = store.get(&html_path).await.unwrap();

        assert_eq!(
            store.content_type(&html_path).as_deref(),
            Some("text/html; charset=windows-1252")
        );
        assert!(String::from_utf8(stored.clone()).is_err(), "page was re-encoded as UTF-8");
        assert!(stored.windows(10).any(|w| w == b"R\xE8glement"));
        let (text, _, malformed) = encoding_rs::WINDOWS_1252.decode(&stored);
        assert!(!malformed);
        assert!(!text.contains('\u{FFFD}'));
        assert!(text.contains("Unit\u{e9} d'habitation"));
        assert!(text.contains(r#"<meta name="bylaw-db-preserved""#));
        assert_eq!(doc.content_hash, Some(compute_hash(&stored)));
    }

    #[tokio::test]
    async fn failed_screenshot_leaves_document_partial() {
        let tmp = std::env::temp_dir().join(format!("bylawdb_test_{}.db", Uuid::now_v7()));
        let storage = Arc::new(Storage::open(&tmp, 4).await.unwrap());
        storage
            .upsert_jurisdiction(&Jurisdiction {
                id: "saanich".into(),
                name: "Saanich".into(),
                scraping_enabled: true,
            })
            .await
            .unwrap();
        let store = Arc::new(ScreenshotRejectingStore(MemoryObjectStore::new()));
        let preserver = Preserver::new(storage.clone(), store);

        let url = "https://www.saanich.ca/bylaws/zoning";
        let mut content = fetched(url, PAGE.as_bytes(), "text/html", 6);
        content.screenshot = Some(vec![0x89, 0x50, 0x4e, 0x47]);

        let result = preserver.preserve(capture(url, &content, DocumentKind::Regulation)).await;
        assert!(result.success);
        assert!(result.changed);
        assert!(result.errors[0].contains("screenshot upload failed"), "{:?}", result.errors);

        let doc = storage.get_document(&result.document_id).await.unwrap().unwrap();
        assert_eq!(doc.preservation_status, PreservationStatus::Partial);
        assert!(doc.html_path.is_some() && doc.metadata_path.is_some());
        assert!(doc.screenshot_path.is_none());
        assert!(doc.preservation_error.unwrap().contains("screenshot"));

        let report = preserver.verify_integrity(&result.document_id).await.unwrap();
        assert!(report.valid, "{report:?}");
    }

    struct ScreenshotRejectingStore(MemoryObjectStore);

    #[async_trait::async_trait]
    impl ObjectStore for ScreenshotRejectingStore {
        async fn put(&self, path: &str, bytes: &[u8], content_type: &str, no_overwrite: bool) -> Result<()> {
            if path.ends_with("screenshot.png") {
                return Err(BylawError::Storage("disk full".into()));
            }
            self.0.put(path, bytes, content_type, no_overwrite).await
        }

        async fn get(&self, path: &str) -> Result<Vec<u8>> {
            self.0.get(path).await
        }

        async fn exists(&self, path: &str) -> Result<bool> {
            self.0.exists(path).await
        }
    }

    #[tokio::test]
    async fn assets_are_archived_and_rewritten() {
        let (storage, store, preserver) = setup().await;
        let url = "https://www.saanich.ca/bylaws/zoning";
        let content = fetched(url, PAGE.as_bytes(), "text/html", 4);
        let assets = vec![
            CapturedAsset {
                original_url: "/css/site.css".into(),
                absolute_url: "https://www.saanich.ca/css/site.css".into(),
                file_name: "site.css".into(),
                content_type: "text/css".into(),
                bytes: b"body{}".to_vec(),
            },
            CapturedAsset {
                original_url: "logo.png?v=1&x=2".into(),
                absolute_url: "https://www.saanich.ca/bylaws/logo.png?v=1&x=2".into(),
                file_name: "logo.png".into(),
                content_type: "image/png".into(),
                bytes: vec![0x89, 0x50],
            },
        ];
        let mut request = capture(url, &content, DocumentKind::Regulation);
        request.assets = &assets;

        let result = preserver.preserve(request).await;
        assert!(result.success);
        let doc = storage.get_document(&result.document_id).await.unwrap().unwrap();
        let html = String::from_utf8(store.get(&doc.html_path.unwrap()).await.unwrap()).unwrap();
        assert!(html.contains(r#"href="assets/site.css""#), "{html}");
        assert!(html.contains(r#"src="assets/logo.png""#), "{html}");
        assert!(!html.contains("/css/site.css"));
        // page + 2 assets + manifest
        assert_eq!(store.len(), 4);
    }

    #[tokio::test]
    async fn verify_detects_missing_document() {
        let (_storage, _store, preserver) = setup().await;
        let err = preserver.verify_integrity("nope").await.unwrap_err();
        assert_eq!(err.kind(), "NotFound");
    }

    #[test]
    fn stamp_requires_head() {
        let stamped = stamp_preserved("<html><HEAD lang=\"en\"><title>x</title>", "https://a.ca/?q=\"x\"");
        assert!(stamped.starts_with(
            "<html><HEAD lang=\"en\"><meta name=\"bylaw-db-preserved\" content=\"https://a.ca/?q=&quot;x&quot;\">"
        ));
        assert_eq!(stamp_preserved("<p>no head</p>", "https://a.ca"), "<p>no head</p>");
        // <header> is not <head>
        assert_eq!(stamp_preserved("<header>x</header>", "https://a.ca"), "<header>x</header>");
    }
}
