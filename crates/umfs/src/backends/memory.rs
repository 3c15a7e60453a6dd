//! In-memory blob-style backend.
//!
//! Objects live in one flat key space under a container name, the way a
//! cloud blob store keeps them. There are no directories: a "directory" is
//! any key prefix ending in `/`, listing synthesizes directory entries from
//! deeper keys, and deleting a directory deletes every key under the prefix.
//! All data is ephemeral.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::io::{AsyncRead, AsyncReadExt};
use uuid::Uuid;

use super::{ContentReader, EntryKind, ListEntry, Locator, ObjectAttr, StorageBackend};
use crate::error::{BackendError, BackendResult};
use crate::path::Subpath;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Arc<Vec<u8>>,
    modified: SystemTime,
}

impl StoredObject {
    fn new(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(data),
            modified: SystemTime::now(),
        }
    }

    fn attr(&self) -> ObjectAttr {
        ObjectAttr {
            size: self.data.len() as u64,
            modified: Some(self.modified),
        }
    }
}

/// In-memory blob backend.
///
/// Thread-safe via internal `RwLock`. All data is lost when dropped.
#[derive(Debug)]
pub struct MemoryBackend {
    container: String,
    /// Each instance is its own store, whatever the container name.
    instance: Uuid,
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl MemoryBackend {
    /// Create an empty container.
    pub fn new(container: impl Into<String>) -> Self {
        let container = container.into().trim_matches('/').to_string();
        Self {
            container,
            instance: Uuid::new_v4(),
            objects: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    /// Number of stored objects, side-cars included.
    pub fn object_count(&self) -> usize {
        self.objects.read().len()
    }

    /// Key prefix for listing a directory locator.
    fn dir_prefix(dir: &Locator) -> String {
        let key = dir.as_str().trim_end_matches('/');
        if key.is_empty() {
            String::new()
        } else {
            format!("{key}/")
        }
    }

    /// Keys strictly under `prefix`.
    fn keys_under(objects: &BTreeMap<String, StoredObject>, prefix: &str) -> Vec<String> {
        objects
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn kind(&self) -> &'static str {
        "memory"
    }

    fn store_id(&self) -> String {
        format!("memory:{}", self.instance)
    }

    fn locator(&self, subpath: &Subpath) -> Locator {
        match (self.container.is_empty(), subpath.is_root()) {
            (_, true) => Locator::new(self.container.clone()),
            (true, false) => Locator::new(subpath.as_str()),
            (false, false) => Locator::new(format!("{}/{}", self.container, subpath.as_str())),
        }
    }

    async fn exists(&self, locator: &Locator) -> BackendResult<bool> {
        Ok(self.objects.read().contains_key(locator.as_str()))
    }

    async fn stat(&self, locator: &Locator) -> BackendResult<Option<ObjectAttr>> {
        Ok(self.objects.read().get(locator.as_str()).map(StoredObject::attr))
    }

    async fn open_read(&self, locator: &Locator) -> BackendResult<ContentReader> {
        let data = self
            .objects
            .read()
            .get(locator.as_str())
            .map(|o| Arc::clone(&o.data))
            .ok_or_else(|| BackendError::not_found(locator.as_str()))?;
        // Snapshot: later writes to the key do not affect an open reader.
        Ok(Box::new(std::io::Cursor::new(data.as_ref().clone())))
    }

    async fn list(&self, dir: &Locator) -> BackendResult<Vec<ListEntry>> {
        let prefix = Self::dir_prefix(dir);
        let objects = self.objects.read();

        let mut files = Vec::new();
        let mut dirs = BTreeSet::new();
        for key in Self::keys_under(&objects, &prefix) {
            let rest = &key[prefix.len()..];
            match rest.split_once('/') {
                Some((child_dir, _)) => {
                    dirs.insert(child_dir.to_string());
                }
                None => {
                    let attr = objects.get(&key).map(StoredObject::attr);
                    files.push(ListEntry {
                        name: rest.to_string(),
                        kind: EntryKind::File,
                        attr,
                    });
                }
            }
        }

        let mut entries: Vec<ListEntry> = dirs
            .into_iter()
            .map(|name| ListEntry {
                name,
                kind: EntryKind::Directory,
                attr: None,
            })
            .chain(files)
            .collect();

        // Sort for consistent ordering
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn write(&self, locator: &Locator, data: &[u8]) -> BackendResult<()> {
        self.objects
            .write()
            .insert(locator.as_str().to_string(), StoredObject::new(data.to_vec()));
        Ok(())
    }

    async fn write_stream(
        &self,
        locator: &Locator,
        source: &mut (dyn AsyncRead + Send + Unpin),
    ) -> BackendResult<u64> {
        let mut data = Vec::new();
        source.read_to_end(&mut data).await?;
        let written = data.len() as u64;
        self.objects
            .write()
            .insert(locator.as_str().to_string(), StoredObject::new(data));
        Ok(written)
    }

    async fn delete(&self, locator: &Locator) -> BackendResult<bool> {
        Ok(self.objects.write().remove(locator.as_str()).is_some())
    }

    async fn copy(&self, from: &Locator, to: &Locator) -> BackendResult<()> {
        let mut objects = self.objects.write();
        let source = objects
            .get(from.as_str())
            .ok_or_else(|| BackendError::not_found(from.as_str()))?;
        let copied = StoredObject {
            data: Arc::clone(&source.data),
            modified: SystemTime::now(),
        };
        objects.insert(to.as_str().to_string(), copied);
        Ok(())
    }

    async fn rename(&self, from: &Locator, to: &Locator) -> BackendResult<()> {
        let mut objects = self.objects.write();
        let source = objects
            .remove(from.as_str())
            .ok_or_else(|| BackendError::not_found(from.as_str()))?;
        objects.insert(to.as_str().to_string(), source);
        Ok(())
    }

    async fn delete_dir(&self, dir: &Locator) -> BackendResult<()> {
        let prefix = Self::dir_prefix(dir);
        if prefix.is_empty() || prefix == format!("{}/", self.container) {
            return Err(BackendError::other("refusing to delete the storage root"));
        }

        let mut objects = self.objects.write();
        let doomed = Self::keys_under(&objects, &prefix);
        if doomed.is_empty() {
            return Err(BackendError::not_found(dir.as_str()));
        }
        for key in doomed {
            objects.remove(&key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::canonicalize;

    fn loc(backend: &MemoryBackend, raw: &str) -> Locator {
        backend.locator(&canonicalize(raw))
    }

    #[test]
    fn test_locator_prefixes_container() {
        let backend = MemoryBackend::new("/media/");
        assert_eq!(loc(&backend, "/a/b.png").as_str(), "media/a/b.png");
        assert_eq!(loc(&backend, "").as_str(), "media");

        let bare = MemoryBackend::new("");
        assert_eq!(loc(&bare, "a/b.png").as_str(), "a/b.png");
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let backend = MemoryBackend::new("media");
        let l = loc(&backend, "deep/ly/nested.txt");

        // No parent creation needed in a flat namespace
        backend.write(&l, b"hello").await.unwrap();
        assert_eq!(backend.read_all(&l).await.unwrap(), b"hello");
        assert_eq!(backend.stat(&l).await.unwrap().unwrap().size, 5);
        assert_eq!(backend.object_count(), 1);
    }

    #[tokio::test]
    async fn test_list_synthesizes_directories() {
        let backend = MemoryBackend::new("media");
        for path in ["images/a.png", "images/b.png", "images/sub/c.png", "imagesX/d.png"] {
            backend.write(&loc(&backend, path), b"x").await.unwrap();
        }

        let entries = backend.list(&loc(&backend, "images")).await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| (e.name.as_str(), e.kind)).collect();
        assert_eq!(
            names,
            vec![
                ("a.png", EntryKind::File),
                ("b.png", EntryKind::File),
                ("sub", EntryKind::Directory),
            ]
        );

        let root = backend.list(&loc(&backend, "")).await.unwrap();
        let names: Vec<_> = root.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["images", "imagesX"]);
    }

    #[tokio::test]
    async fn test_delete_dir_by_prefix() {
        let backend = MemoryBackend::new("media");
        backend.write(&loc(&backend, "a/x.txt"), b"x").await.unwrap();
        backend.write(&loc(&backend, "a/y/z.txt"), b"z").await.unwrap();
        backend.write(&loc(&backend, "ab.txt"), b"keep").await.unwrap();

        backend.delete_dir(&loc(&backend, "a")).await.unwrap();
        assert_eq!(backend.object_count(), 1);
        assert!(backend.exists(&loc(&backend, "ab.txt")).await.unwrap());

        let err = backend.delete_dir(&loc(&backend, "a")).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(backend.delete_dir(&loc(&backend, "")).await.is_err());
    }

    #[tokio::test]
    async fn test_copy_rename_delete() {
        let backend = MemoryBackend::new("media");
        let a = loc(&backend, "a.txt");
        let b = loc(&backend, "b.txt");

        backend.write(&a, b"data").await.unwrap();
        backend.copy(&a, &b).await.unwrap();
        assert!(backend.delete(&a).await.unwrap());
        assert!(!backend.delete(&a).await.unwrap());

        backend.rename(&b, &a).await.unwrap();
        assert_eq!(backend.read_all(&a).await.unwrap(), b"data");
        assert!(backend.rename(&b, &a).await.unwrap_err().is_not_found());
    }
}
