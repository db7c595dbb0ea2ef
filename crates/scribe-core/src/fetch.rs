use crate::error::{Result, ScribeError};
use crate::types::Document;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Read-only boundary to the document store.
///
/// Implementations report `NotFound` when the object does not exist and
/// `TransientFetch` for anything that may succeed on a later attempt. They
/// never retry on their own.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;

    /// Store identifier (used in logs).
    fn name(&self) -> &str;
}

#[async_trait]
impl<S: DocumentStore + ?Sized> DocumentStore for Arc<S> {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        (**self).get(bucket, key).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Fetches a document for one run.
#[derive(Clone)]
pub struct DocumentFetcher {
    store: Arc<dyn DocumentStore>,
}

impl DocumentFetcher {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn fetch(&self, bucket: &str, key: &str) -> Result<Document> {
        let content = self.store.get(bucket, key).await?;
        Ok(Document {
            bucket: bucket.to_string(),
            key: key.to_string(),
            content,
            fetched_at: Utc::now(),
        })
    }

    pub fn store_name(&self) -> &str {
        self.store.name()
    }
}

/// Filesystem-backed store: object `key` of `bucket` lives at
/// `{root}/{bucket}/{key}`.
pub struct FsDocumentStore {
    root: PathBuf,
}

impl FsDocumentStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Resolve an object path, refusing keys that would escape the bucket.
    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        let relative = Path::new(bucket).join(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if escapes || bucket.is_empty() || key.is_empty() {
            return Err(ScribeError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(ScribeError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            Err(e) => Err(ScribeError::TransientFetch {
                key: key.to_string(),
                reason: format!("{}: {}", path.display(), e),
            }),
        }
    }

    fn name(&self) -> &str {
        "fs"
    }
}

/// In-memory store, keyed by (bucket, key).
#[derive(Default)]
pub struct MemoryDocumentStore {
    objects: RwLock<HashMap<(String, String), Vec<u8>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, bucket: &str, key: &str, content: impl Into<Vec<u8>>) {
        self.objects
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert((bucket.to_string(), key.to_string()), content.into());
    }

    pub fn remove(&self, bucket: &str, key: &str) -> bool {
        self.objects
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&(bucket.to_string(), key.to_string()))
            .is_some()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        self.objects
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| ScribeError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_fs_store_reads_nested_keys() {
        let dir = TempDir::new().unwrap();
        let object = dir.path().join("b1").join("reports").join("q1.txt");
        std::fs::create_dir_all(object.parent().unwrap()).unwrap();
        std::fs::write(&object, "Revenue grew 10%.").unwrap();

        let fetcher = DocumentFetcher::new(Arc::new(FsDocumentStore::new(dir.path())));
        let doc = fetcher.fetch("b1", "reports/q1.txt").await.unwrap();

        assert_eq!(doc.key, "reports/q1.txt");
        assert_eq!(doc.bucket, "b1");
        assert_eq!(doc.content, b"Revenue grew 10%.");
    }

    #[tokio::test]
    async fn test_fs_store_missing_object_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = FsDocumentStore::new(dir.path());

        let err = store.get("b1", "gone.txt").await.unwrap_err();
        assert!(matches!(err, ScribeError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_fs_store_rejects_traversal() {
        let dir = TempDir::new().unwrap();
        let store = FsDocumentStore::new(dir.path().join("root"));

        let err = store.get("b1", "../../etc/passwd").await.unwrap_err();
        assert!(matches!(err, ScribeError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip_and_delete() {
        let store = MemoryDocumentStore::new();
        store.put("b1", "a.txt", "hello");
        assert_eq!(store.get("b1", "a.txt").await.unwrap(), b"hello");

        assert!(store.remove("b1", "a.txt"));
        assert!(matches!(
            store.get("b1", "a.txt").await,
            Err(ScribeError::NotFound { .. })
        ));
    }
}
