use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;
use walkdir::WalkDir;

use super::{ObjectStore, StorageError};

/// Directory-backed store for local development (`STORAGE_BACKEND=fs`).
///
/// Keys map to relative paths under `root`. Content types are not kept.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        if key.split('/').any(|part| part == "..") || key.starts_with('/') {
            return Err(StorageError::Backend(format!("invalid object key '{key}'")));
        }
        Ok(self.root.join(key))
    }
}

fn key_for(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<_> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, body: Bytes, _content_type: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &body).await?;
        debug!("Wrote {} bytes to {}", body.len(), path.display());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.path_for(key)?;
        Ok(tokio::fs::try_exists(&path).await? && path.is_file())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let root = self.root.clone();
        let prefix = prefix.to_string();

        tokio::task::spawn_blocking(move || {
            if !root.exists() {
                return Ok(Vec::new());
            }
            let mut keys = Vec::new();
            for entry in WalkDir::new(&root).follow_links(false) {
                let entry = entry.map_err(|e| StorageError::Backend(e.to_string()))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                if let Some(key) = key_for(&root, entry.path()) {
                    if key.starts_with(&prefix) {
                        keys.push(key);
                    }
                }
            }
            keys.sort();
            Ok(keys)
        })
        .await
        .map_err(|e| StorageError::Backend(format!("list task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fs_store_round_trip_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());

        store
            .put("decks/htmls/j/slide_1.html", Bytes::from_static(b"<div/>"), "text/html")
            .await
            .unwrap();
        store
            .put("decks/inputs/u/doc.txt", Bytes::from_static(b"hi"), "text/plain")
            .await
            .unwrap();

        assert!(store.exists("decks/htmls/j/slide_1.html").await.unwrap());
        assert!(!store.exists("decks/htmls/j/slide_2.html").await.unwrap());
        assert_eq!(
            store.list("decks/htmls/").await.unwrap(),
            vec!["decks/htmls/j/slide_1.html"]
        );
        assert_eq!(store.get("decks/inputs/u/doc.txt").await.unwrap(), "hi");

        store.delete("decks/inputs/u/doc.txt").await.unwrap();
        assert!(matches!(
            store.get("decks/inputs/u/doc.txt").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_fs_store_rejects_parent_segments() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        assert!(store.get("../etc/passwd").await.is_err());
    }
}
