//! Storage provider.
//!
//! Resolves subpaths to [`FileHandle`]s over one backend, runs the
//! authorization hook, and handles whole-directory operations.

use std::fmt;
use std::sync::Arc;

use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use crate::backends::{LocalBackend, MemoryBackend, ObjectAttr, StorageBackend};
use crate::content_type::{ContentTypeLookup, ExtensionContentTypes};
use crate::error::{ConfigError, StorageError, StorageResult};
use crate::handle::{FileHandle, HandleState, Resource, guarded};
use crate::options::StorageProviderOptions;
use crate::path::{Subpath, canonicalize, ensure_directory_subpath, ensure_file_subpath};
use crate::sidecar::is_sidecar_name;

/// State shared by a provider and every handle it hands out.
pub(crate) struct StorageContext {
    pub(crate) backend: Arc<dyn StorageBackend>,
    pub(crate) content_types: Arc<dyn ContentTypeLookup>,
    pub(crate) options: StorageProviderOptions,
    pub(crate) cancel: CancellationToken,
}

impl StorageContext {
    fn authorized(&self, handle: &FileHandle) -> bool {
        self.options
            .authorization
            .check(handle, self.options.default_access)
    }
}

/// Entry point for file operations on one backing store.
///
/// Cheap to clone; clones share the backend and cancellation token.
#[derive(Clone)]
pub struct StorageProvider {
    ctx: Arc<StorageContext>,
}

impl fmt::Debug for StorageProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageProvider")
            .field("backend", &self.ctx.backend)
            .field("options", &self.ctx.options)
            .finish()
    }
}

impl StorageProvider {
    /// Provider over `backend`. Fails if the options are invalid.
    pub fn new(
        backend: impl StorageBackend + 'static,
        options: StorageProviderOptions,
    ) -> Result<Self, ConfigError> {
        Self::with_backend(Arc::new(backend), options)
    }

    /// Provider over an already shared backend.
    pub fn with_backend(
        backend: Arc<dyn StorageBackend>,
        options: StorageProviderOptions,
    ) -> Result<Self, ConfigError> {
        options.validate()?;
        tracing::debug!(backend = backend.kind(), root = %options.root, "storage provider ready");
        Ok(Self {
            ctx: Arc::new(StorageContext {
                backend,
                content_types: Arc::new(ExtensionContentTypes::new()),
                options,
                cancel: CancellationToken::new(),
            }),
        })
    }

    /// Disk provider rooted at `options.root`.
    pub fn local(options: StorageProviderOptions) -> Result<Self, ConfigError> {
        options.validate()?;
        let backend = LocalBackend::new(&options.root)?;
        Self::new(backend, options)
    }

    /// In-memory blob provider with `options.root` as the container name.
    pub fn memory(options: StorageProviderOptions) -> Result<Self, ConfigError> {
        options.validate()?;
        let backend = MemoryBackend::new(options.root.clone());
        Self::new(backend, options)
    }

    fn rebuild(&self, content_types: Arc<dyn ContentTypeLookup>, cancel: CancellationToken) -> Self {
        Self {
            ctx: Arc::new(StorageContext {
                backend: Arc::clone(&self.ctx.backend),
                content_types,
                options: self.ctx.options.clone(),
                cancel,
            }),
        }
    }

    /// Replace the content-type lookup for handles built from now on.
    pub fn with_content_types(self, lookup: impl ContentTypeLookup + 'static) -> Self {
        self.rebuild(Arc::new(lookup), self.ctx.cancel.clone())
    }

    /// Use `token` as the parent of every handle's cancellation token.
    pub fn with_cancellation(self, token: CancellationToken) -> Self {
        self.rebuild(Arc::clone(&self.ctx.content_types), token)
    }

    pub fn options(&self) -> &StorageProviderOptions {
        &self.ctx.options
    }

    /// Configured root location.
    pub fn root(&self) -> &str {
        &self.ctx.options.root
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.ctx.backend
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.ctx.cancel
    }

    /// Canonical form of `raw`.
    pub fn canonicalize(&self, raw: &str) -> Subpath {
        canonicalize(raw)
    }

    fn check_cancelled(&self, op: &str, raw: &str) -> StorageResult<()> {
        if self.ctx.cancel.is_cancelled() {
            return Err(StorageError::cancelled(format!("{op} {raw}")));
        }
        Ok(())
    }

    // ========================================================================
    // Files
    // ========================================================================

    /// New handle for `subpath`. Never touches the backing store.
    pub fn create(&self, subpath: &str) -> StorageResult<FileHandle> {
        self.check_cancelled("create", subpath)?;
        let handle = FileHandle::with_state(Arc::clone(&self.ctx), canonicalize(subpath), HandleState::New)?;
        if !self.ctx.authorized(&handle) {
            return Err(StorageError::access_denied(handle.subpath().to_string()));
        }
        Ok(handle)
    }

    /// Persisted handle for existing content, `None` if there is none.
    #[tracing::instrument(skip(self), name = "provider.get")]
    pub async fn get(&self, subpath: &str) -> StorageResult<Option<FileHandle>> {
        self.check_cancelled("get", subpath)?;
        let subpath = canonicalize(subpath);
        ensure_file_subpath(&subpath)?;

        let locator = self.ctx.backend.locator(&subpath);
        let attr = guarded(
            &self.ctx.cancel,
            "stat",
            &subpath,
            Resource::Content,
            self.ctx.backend.stat(&locator),
        )
        .await?;
        let Some(attr) = attr else {
            tracing::debug!(subpath = %subpath, "no content");
            return Ok(None);
        };

        let handle = FileHandle::with_state(Arc::clone(&self.ctx), subpath, HandleState::persisted(&attr))?;
        if !self.ctx.authorized(&handle) {
            tracing::warn!(subpath = %handle.subpath(), "access denied");
            return Err(StorageError::access_denied(handle.subpath().to_string()));
        }
        Ok(Some(handle))
    }

    /// True if content exists at `subpath`.
    pub async fn exists(&self, subpath: &str) -> StorageResult<bool> {
        self.create(subpath)?.exists().await
    }

    /// Make sure nothing is stored at `subpath`. Always true on success.
    pub async fn delete(&self, subpath: &str) -> StorageResult<bool> {
        match self.get(subpath).await? {
            Some(mut handle) => handle.delete().await,
            None => self.create(subpath)?.delete().await,
        }
    }

    /// `create` then `write_from_bytes`.
    pub async fn save(&self, subpath: &str, bytes: &[u8], cache: bool) -> StorageResult<FileHandle> {
        let mut handle = self.create(subpath)?;
        handle.write_from_bytes(bytes, cache).await?;
        Ok(handle)
    }

    /// `create` then `write_from_stream`.
    ///
    /// With `cache` the stream is buffered in memory first so the bytes can
    /// stay on the returned handle.
    pub async fn save_stream<R>(&self, subpath: &str, source: &mut R, cache: bool) -> StorageResult<FileHandle>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let mut handle = self.create(subpath)?;
        handle.write_stream(source, cache).await?;
        Ok(handle)
    }

    // ========================================================================
    // Directories
    // ========================================================================

    /// Recursively remove everything under `subpath`.
    ///
    /// A directory that is already gone counts as deleted.
    #[tracing::instrument(skip(self), name = "provider.delete_directory")]
    pub async fn delete_directory(&self, subpath: &str) -> StorageResult<()> {
        self.check_cancelled("delete directory", subpath)?;
        let dir = canonicalize(subpath);
        ensure_directory_subpath(&dir)?;
        if dir.is_root() {
            return Err(StorageError::invalid_argument("refusing to delete the storage root"));
        }

        let locator = self.ctx.backend.locator(&dir);
        match guarded(
            &self.ctx.cancel,
            "delete directory",
            &dir,
            Resource::Content,
            self.ctx.backend.delete_dir(&locator),
        )
        .await
        {
            Ok(()) => {
                tracing::info!(dir = %dir, "deleted directory");
                Ok(())
            }
            Err(StorageError::NotFound(_)) => {
                tracing::info!(dir = %dir, "directory already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Files directly under `subpath`, sorted by name.
    ///
    /// Side-cars and subdirectories are left out, as are files the
    /// authorization hook rejects.
    #[tracing::instrument(skip(self), name = "provider.enumerate_directory")]
    pub async fn enumerate_directory(&self, subpath: &str) -> StorageResult<Vec<FileHandle>> {
        self.check_cancelled("enumerate", subpath)?;
        let dir = canonicalize(subpath);
        ensure_directory_subpath(&dir)?;

        let locator = self.ctx.backend.locator(&dir);
        let entries = guarded(
            &self.ctx.cancel,
            "list",
            &dir,
            Resource::Content,
            self.ctx.backend.list(&locator),
        )
        .await?;

        let mut handles = Vec::with_capacity(entries.len());
        for entry in entries {
            if !entry.kind.is_file() || is_sidecar_name(&entry.name) {
                continue;
            }
            let child = dir.join(&entry.name);
            if child.name() != entry.name {
                tracing::warn!(dir = %dir, name = %entry.name, "skipping entry with non-canonical name");
                continue;
            }
            let attr = entry.attr.unwrap_or(ObjectAttr {
                size: 0,
                modified: None,
            });
            let handle = match FileHandle::with_state(Arc::clone(&self.ctx), child, HandleState::persisted(&attr)) {
                Ok(handle) => handle,
                Err(e) => {
                    tracing::warn!(dir = %dir, name = %entry.name, error = %e, "skipping entry");
                    continue;
                }
            };
            if self.ctx.authorized(&handle) {
                handles.push(handle);
            } else {
                tracing::debug!(subpath = %handle.subpath(), "omitting unauthorized file");
            }
        }
        Ok(handles)
    }
}
