//! Write-once object storage for preserved artifacts.
//!
//! Objects are addressed by a relative `/`-separated path (see [`paths`]).
//! [`ObjectStore::put`] with `no_overwrite` refuses to replace an existing
//! object and reports [`BylawError::Conflict`] instead.

pub mod local;
pub mod memory;
pub mod paths;

use async_trait::async_trait;
use bylawdb_shared::{BylawError, Result};
use sha2::{Digest, Sha256};

pub use local::LocalObjectStore;
pub use memory::MemoryObjectStore;
pub use paths::StoragePaths;

/// Path-addressed, content-type aware object storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` at `path`. With `no_overwrite`, an occupied path fails
    /// with [`BylawError::Conflict`] and the stored object is left untouched.
    async fn put(&self, path: &str, bytes: &[u8], content_type: &str, no_overwrite: bool)
    -> Result<()>;

    /// Read the object at `path`, or [`BylawError::NotFound`].
    async fn get(&self, path: &str) -> Result<Vec<u8>>;

    /// Whether an object exists at `path`.
    async fn exists(&self, path: &str) -> Result<bool>;
}

/// SHA-256 hex digest of `bytes`.
pub fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// MIME types of the document files a capture may store, by extension.
const DOCUMENT_TYPES: &[(&str, &str)] = &[
    ("pdf", "application/pdf"),
    ("doc", "application/msword"),
    (
        "docx",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    ),
    ("xls", "application/vnd.ms-excel"),
    (
        "xlsx",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    ),
    ("rtf", "application/rtf"),
    ("odt", "application/vnd.oasis.opendocument.text"),
];

/// Best-effort MIME type from a path's extension.
pub fn content_type_for(path: &str) -> &'static str {
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    if let Some(&(_, mime)) = DOCUMENT_TYPES.iter().find(|(e, _)| *e == ext) {
        return mime;
    }
    match ext.as_str() {
        "html" | "htm" => "text/html",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}

/// File extension for a document served with `content_type`.
pub fn document_extension_for(content_type: &str) -> Option<&'static str> {
    let mime = content_type.split(';').next()?.trim().to_ascii_lowercase();
    DOCUMENT_TYPES
        .iter()
        .find(|(_, m)| *m == mime)
        .map(|(ext, _)| *ext)
}

/// Reject absolute paths, empty segments and parent references.
pub(crate) fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() || path.starts_with('/') || path.ends_with('/') {
        return Err(BylawError::validation(format!("invalid object path '{path}'")));
    }
    if path
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == ".." || segment.contains('\\'))
    {
        return Err(BylawError::validation(format!("invalid object path '{path}'")));
    }
    Ok(())
}
