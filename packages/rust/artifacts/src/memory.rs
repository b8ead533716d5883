//! In-memory object store, used by tests and dry runs.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bylawdb_shared::{BylawError, Result};

use crate::{ObjectStore, validate_path};

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Vec<u8>,
    content_type: String,
}

/// Object store keeping every object in a map.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, StoredObject>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Content type recorded for `path`.
    pub fn content_type(&self, path: &str) -> Option<String> {
        self.objects
            .lock()
            .ok()
            .and_then(|m| m.get(path).map(|o| o.content_type.clone()))
    }

    /// Sorted list of stored paths.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .objects
            .lock()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        paths.sort();
        paths
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, StoredObject>>> {
        self.objects
            .lock()
            .map_err(|_| BylawError::Storage("object map lock poisoned".into()))
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(
        &self,
        path: &str,
        bytes: &[u8],
        content_type: &str,
        no_overwrite: bool,
    ) -> Result<()> {
        validate_path(path)?;
        let mut objects = self.lock()?;
        if no_overwrite && objects.contains_key(path) {
            return Err(BylawError::Conflict {
                path: path.to_string(),
            });
        }
        objects.insert(
            path.to_string(),
            StoredObject {
                bytes: bytes.to_vec(),
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        self.lock()?
            .get(path)
            .map(|o| o.bytes.clone())
            .ok_or_else(|| BylawError::NotFound(format!("object {path}")))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.lock()?.contains_key(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_once_semantics() {
        let store = MemoryObjectStore::new();
        store.put("j/a.html", b"one", "text/html", true).await.unwrap();

        let err = store.put("j/a.html", b"two", "text/html", true).await.unwrap_err();
        assert!(matches!(err, BylawError::Conflict { .. }));
        assert_eq!(store.get("j/a.html").await.unwrap(), b"one");
        assert_eq!(store.content_type("j/a.html").as_deref(), Some("text/html"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn get_missing() {
        let store = MemoryObjectStore::new();
        assert!(store.is_empty());
        assert!(matches!(
            store.get("j/missing").await.unwrap_err(),
            BylawError::NotFound(_)
        ));
    }
}
