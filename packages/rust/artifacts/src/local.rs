//! Filesystem-backed object store rooted at `{root}/{bucket}`.
//!
//! Writes go to a temp file in the target directory first. A no-overwrite
//! put publishes it with `hard_link`, which fails atomically when the target
//! exists; otherwise the temp file is renamed over the target.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bylawdb_shared::{BylawError, Result};
use tracing::debug;
use uuid::Uuid;

use crate::{ObjectStore, validate_path};

/// Object store writing to a local directory tree.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    /// Store objects under `{root}/{bucket}`.
    pub fn new(root: impl AsRef<Path>, bucket: &str) -> Self {
        Self {
            root: root.as_ref().join(bucket),
        }
    }

    /// Directory objects are written under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        validate_path(path)?;
        Ok(path.split('/').fold(self.root.clone(), |acc, seg| acc.join(seg)))
    }
}

/// Blocking write; run on the blocking pool.
fn write_object(target: &Path, object_path: &str, bytes: &[u8], no_overwrite: bool) -> Result<()> {
    let dir = target
        .parent()
        .ok_or_else(|| BylawError::validation(format!("invalid object path '{object_path}'")))?;
    std::fs::create_dir_all(dir).map_err(|e| BylawError::io(dir, e))?;

    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = dir.join(format!(".{file_name}.{}.tmp", Uuid::now_v7()));
    std::fs::write(&temp, bytes).map_err(|e| BylawError::io(&temp, e))?;

    let published = if no_overwrite {
        let linked = std::fs::hard_link(&temp, target);
        let _ = std::fs::remove_file(&temp);
        match linked {
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(BylawError::Conflict {
                    path: object_path.to_string(),
                });
            }
            other => other,
        }
    } else {
        std::fs::rename(&temp, target)
    };

    published.map_err(|e| {
        let _ = std::fs::remove_file(&temp);
        BylawError::io(target, e)
    })
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(
        &self,
        path: &str,
        bytes: &[u8],
        content_type: &str,
        no_overwrite: bool,
    ) -> Result<()> {
        let target = self.resolve(path)?;
        let object_path = path.to_string();
        let bytes = bytes.to_vec();
        let size = bytes.len();

        tokio::task::spawn_blocking(move || write_object(&target, &object_path, &bytes, no_overwrite))
            .await
            .map_err(|e| BylawError::Task(format!("object write task failed: {e}")))??;

        debug!(path, content_type, size, "stored object");
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let target = self.resolve(path)?;
        match tokio::fs::read(&target).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(BylawError::NotFound(format!("object {path}")))
            }
            Err(e) => Err(BylawError::io(target, e)),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let target = self.resolve(path)?;
        tokio::fs::try_exists(&target)
            .await
            .map_err(|e| BylawError::io(target, e))
    }
}
