//! Local filesystem backend.
//!
//! Maps subpaths onto real directories under a root, with path security
//! to prevent escaping the root directory.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncWriteExt};

use super::{ContentReader, EntryKind, ListEntry, Locator, ObjectAttr, StorageBackend};
use crate::error::{BackendError, BackendResult, ConfigError};
use crate::path::Subpath;

/// Map a canonical subpath onto a native path under `root`.
///
/// Segments are joined with the platform separator, so `images/a.png` under
/// `/srv/media` becomes `/srv/media/images/a.png` (or `C:\srv\media\images\a.png`).
pub fn to_backing_locator(subpath: &Subpath, root: &Path) -> Locator {
    let mut full = root.to_path_buf();
    for segment in subpath.segments() {
        full.push(segment);
    }
    Locator::new(full.to_string_lossy().into_owned())
}

/// Local filesystem backend.
///
/// All operations are relative to `root`. For example, if `root` is
/// `/srv/media`, then the subpath `images/photo.png` is stored at
/// `/srv/media/images/photo.png`.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Create a local backend rooted at the given path.
    ///
    /// The root is canonicalized at construction time when it exists, to
    /// handle symlinks (e.g. macOS `/tmp` → `/private/tmp`). It does not need
    /// to exist yet; the first write creates it.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let root: PathBuf = root.into();
        if root.as_os_str().is_empty() {
            return Err(ConfigError::EmptyRoot);
        }
        let root = dunce::canonicalize(&root).unwrap_or(root);
        if root.to_str().is_none() {
            return Err(ConfigError::NonUtf8Root(root));
        }
        Ok(Self { root })
    }

    /// Get the root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Turn a locator back into a path, refusing anything outside the root.
    fn path_of(&self, locator: &Locator) -> BackendResult<PathBuf> {
        let path = PathBuf::from(locator.as_str());
        if !path.starts_with(&self.root) {
            return Err(BackendError::other(format!(
                "{} is not under {}",
                path.display(),
                self.root.display()
            )));
        }
        Ok(path)
    }

    async fn ensure_parent(path: &Path) -> BackendResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| BackendError::from_io(e, parent.display().to_string()))?;
        }
        Ok(())
    }

    fn attr_of(meta: &std::fs::Metadata) -> ObjectAttr {
        ObjectAttr {
            size: meta.len(),
            modified: meta.modified().ok(),
        }
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn kind(&self) -> &'static str {
        "disk"
    }

    fn store_id(&self) -> String {
        format!("disk:{}", self.root.display())
    }

    fn locator(&self, subpath: &Subpath) -> Locator {
        to_backing_locator(subpath, &self.root)
    }

    async fn exists(&self, locator: &Locator) -> BackendResult<bool> {
        Ok(self.stat(locator).await?.is_some())
    }

    async fn stat(&self, locator: &Locator) -> BackendResult<Option<ObjectAttr>> {
        let path = self.path_of(locator)?;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(Self::attr_of(&meta))),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BackendError::Io(e)),
        }
    }

    async fn open_read(&self, locator: &Locator) -> BackendResult<ContentReader> {
        let path = self.path_of(locator)?;
        let file = fs::File::open(&path)
            .await
            .map_err(|e| BackendError::from_io(e, locator.as_str()))?;
        Ok(Box::new(file))
    }

    async fn list(&self, dir: &Locator) -> BackendResult<Vec<ListEntry>> {
        let path = self.path_of(dir)?;
        let mut read_dir = match fs::read_dir(&path).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BackendError::from_io(e, dir.as_str())),
        };

        let mut entries = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let meta = entry.metadata().await?;
            let (kind, attr) = if meta.is_dir() {
                (EntryKind::Directory, None)
            } else if meta.is_file() {
                (EntryKind::File, Some(Self::attr_of(&meta)))
            } else {
                // symlinks and special files are not part of the model
                continue;
            };

            entries.push(ListEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind,
                attr,
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn write(&self, locator: &Locator, data: &[u8]) -> BackendResult<()> {
        let path = self.path_of(locator)?;
        Self::ensure_parent(&path).await?;
        fs::write(&path, data)
            .await
            .map_err(|e| BackendError::from_io(e, locator.as_str()))
    }

    async fn write_stream(
        &self,
        locator: &Locator,
        source: &mut (dyn AsyncRead + Send + Unpin),
    ) -> BackendResult<u64> {
        let path = self.path_of(locator)?;
        Self::ensure_parent(&path).await?;

        let mut file = fs::File::create(&path)
            .await
            .map_err(|e| BackendError::from_io(e, locator.as_str()))?;
        let written = tokio::io::copy(source, &mut file).await?;
        file.flush().await?;
        Ok(written)
    }

    async fn delete(&self, locator: &Locator) -> BackendResult<bool> {
        let path = self.path_of(locator)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(BackendError::Io(e)),
        }
    }

    async fn copy(&self, from: &Locator, to: &Locator) -> BackendResult<()> {
        let from_path = self.path_of(from)?;
        let to_path = self.path_of(to)?;
        Self::ensure_parent(&to_path).await?;

        fs::copy(&from_path, &to_path)
            .await
            .map(|_| ())
            .map_err(|e| BackendError::from_io(e, from.as_str()))
    }

    async fn rename(&self, from: &Locator, to: &Locator) -> BackendResult<()> {
        let from_path = self.path_of(from)?;
        let to_path = self.path_of(to)?;

        // Ensure parent of destination exists
        Self::ensure_parent(&to_path).await?;

        fs::rename(&from_path, &to_path)
            .await
            .map_err(|e| BackendError::from_io(e, from.as_str()))
    }

    async fn delete_dir(&self, dir: &Locator) -> BackendResult<()> {
        let path = self.path_of(dir)?;
        if path == self.root {
            return Err(BackendError::other("refusing to delete the storage root"));
        }
        fs::remove_dir_all(&path)
            .await
            .map_err(|e| BackendError::from_io(e, dir.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::canonicalize;
    use tempfile::TempDir;

    fn setup() -> (LocalBackend, TempDir) {
        let dir = TempDir::new().unwrap();
        let backend = LocalBackend::new(dir.path()).unwrap();
        (backend, dir)
    }

    fn loc(backend: &LocalBackend, raw: &str) -> Locator {
        backend.locator(&canonicalize(raw))
    }

    #[test]
    fn test_locator_uses_native_separator() {
        let root = Path::new("/srv/media");
        let locator = to_backing_locator(&canonicalize("images/sub/a.png"), root);
        let expected: PathBuf = ["/srv/media", "images", "sub", "a.png"].iter().collect();
        assert_eq!(locator.as_str(), expected.to_string_lossy());
        assert_eq!(
            to_backing_locator(&Subpath::root(), root).as_str(),
            root.to_string_lossy()
        );
    }

    #[test]
    fn test_empty_root_rejected() {
        assert!(matches!(LocalBackend::new(""), Err(ConfigError::EmptyRoot)));
    }

    #[tokio::test]
    async fn test_write_creates_parents_and_reads_back() {
        let (backend, dir) = setup();
        let l = loc(&backend, "a/b/c.txt");

        backend.write(&l, b"hello world").await.unwrap();
        assert!(dir.path().join("a/b/c.txt").is_file());

        let data = backend.read_all(&l).await.unwrap();
        assert_eq!(data, b"hello world");

        let attr = backend.stat(&l).await.unwrap().unwrap();
        assert_eq!(attr.size, 11);
        assert!(attr.modified.is_some());
    }

    #[tokio::test]
    async fn test_write_stream() {
        let (backend, _dir) = setup();
        let l = loc(&backend, "stream.bin");

        let mut source = std::io::Cursor::new(vec![7u8; 4096]);
        let written = backend.write_stream(&l, &mut source).await.unwrap();
        assert_eq!(written, 4096);
        assert_eq!(backend.read_all(&l).await.unwrap().len(), 4096);
    }

    #[tokio::test]
    async fn test_directory_is_not_content() {
        let (backend, _dir) = setup();
        backend.write(&loc(&backend, "d/f.txt"), b"x").await.unwrap();

        assert!(!backend.exists(&loc(&backend, "d")).await.unwrap());
        assert!(backend.stat(&loc(&backend, "d")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_immediate_children() {
        let (backend, _dir) = setup();
        backend.write(&loc(&backend, "d/b.txt"), b"b").await.unwrap();
        backend.write(&loc(&backend, "d/a.txt"), b"a").await.unwrap();
        backend.write(&loc(&backend, "d/sub/c.txt"), b"c").await.unwrap();

        let entries = backend.list(&loc(&backend, "d")).await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "sub"]);
        assert!(entries[2].kind.is_dir());
        assert_eq!(entries[0].attr.as_ref().unwrap().size, 1);

        let missing = backend.list(&loc(&backend, "nope")).await.unwrap();
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn test_delete_reports_absence() {
        let (backend, _dir) = setup();
        let l = loc(&backend, "gone.txt");

        assert!(!backend.delete(&l).await.unwrap());
        backend.write(&l, b"x").await.unwrap();
        assert!(backend.delete(&l).await.unwrap());
        assert!(!backend.exists(&l).await.unwrap());
    }

    #[tokio::test]
    async fn test_copy_and_rename() {
        let (backend, _dir) = setup();
        let a = loc(&backend, "a.txt");
        let b = loc(&backend, "copies/b.txt");
        let c = loc(&backend, "moved/c.txt");

        backend.write(&a, b"content").await.unwrap();
        backend.copy(&a, &b).await.unwrap();
        backend.rename(&b, &c).await.unwrap();

        assert!(backend.exists(&a).await.unwrap());
        assert!(!backend.exists(&b).await.unwrap());
        assert_eq!(backend.read_all(&c).await.unwrap(), b"content");

        let err = backend.copy(&b, &a).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_dir() {
        let (backend, _dir) = setup();
        backend.write(&loc(&backend, "d/x/y.txt"), b"y").await.unwrap();

        backend.delete_dir(&loc(&backend, "d")).await.unwrap();
        assert!(!backend.exists(&loc(&backend, "d/x/y.txt")).await.unwrap());

        let err = backend.delete_dir(&loc(&backend, "d")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_path_escape_blocked() {
        let (backend, _dir) = setup();
        let outside = Locator::new("/etc/passwd");
        assert!(backend.read_all(&outside).await.is_err());
    }
}
