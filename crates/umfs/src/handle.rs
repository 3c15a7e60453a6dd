//! File handles.
//!
//! A [`FileHandle`] is the in-memory view of one logical file. It moves
//! through three states:
//!
//! ```text
//!   New ──(first successful write)──▶ Persisted ──(delete / move away)──▶ Deleted
//! ```
//!
//! - **New** handles come from [`StorageProvider::create`](crate::StorageProvider::create).
//!   Nothing is stored yet: reads and metadata access fail with
//!   [`StorageError::InvalidState`].
//! - **Persisted** handles come from `get`, enumeration, or a write.
//! - **Deleted** is terminal. `exists()` still answers, everything else
//!   refuses. Ask the provider for a fresh handle to reuse the subpath.
//!
//! Every content operation touches two resources: the primary content and
//! its metadata side-car (see [`crate::sidecar`]). Multi-step operations run
//! content first, then side-car, and are not atomic. An interrupted copy
//! leaves a destination with content and no metadata, which reads back as an
//! empty metadata map rather than an error.
//!
//! Metadata is loaded lazily, once per handle instance. Two handles for the
//! same subpath can hold different snapshots; [`FileHandle::reload_metadata`]
//! re-reads the side-car explicitly.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::backends::{Locator, ObjectAttr};
use crate::convert::{MetadataValue, convert_or};
use crate::error::{BackendError, BackendResult, StorageError, StorageResult};
use crate::path::{Subpath, canonicalize, ensure_file_subpath};
use crate::provider::StorageContext;
use crate::sidecar::{MetadataMap, SidecarStore};

/// Reserved metadata key holding the id of the creating user.
pub const CREATED_BY_ID_KEY: &str = "umfs:createdById";

/// Reserved metadata key holding the original (display) file name.
pub const FILE_NAME_KEY: &str = "umfs:fileName";

/// Lifecycle state of a handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleState {
    /// Not yet backed by stored content.
    New,
    /// Backed by stored content.
    Persisted {
        /// Size reported by the backing store.
        length: u64,
        last_modified: Option<SystemTime>,
    },
    /// Removed through this handle. Terminal.
    Deleted,
}

impl HandleState {
    pub(crate) fn persisted(attr: &ObjectAttr) -> Self {
        Self::Persisted {
            length: attr.size,
            last_modified: attr.modified,
        }
    }
}

/// Which resource an I/O failure belongs to.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Resource {
    Content,
    Sidecar,
}

/// Run backend I/O under a cancellation token, wrapping failures.
///
/// Cancellation is checked before the I/O starts and raced against it; a
/// cancelled write leaves whatever the transport already wrote.
pub(crate) async fn guarded<T, F>(
    cancel: &CancellationToken,
    op: &'static str,
    subpath: &Subpath,
    resource: Resource,
    fut: F,
) -> StorageResult<T>
where
    F: Future<Output = BackendResult<T>>,
{
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracing::debug!(op, subpath = %subpath, "operation cancelled");
            return Err(StorageError::cancelled(format!("{op} {subpath}")));
        }
        r = fut => r,
    };

    result.map_err(|source| {
        tracing::warn!(op, subpath = %subpath, ?resource, error = %source, "backing store operation failed");
        match resource {
            Resource::Content if source.is_not_found() => StorageError::not_found(subpath.to_string()),
            Resource::Content => StorageError::Io {
                op,
                subpath: subpath.to_string(),
                source,
            },
            Resource::Sidecar => StorageError::MetadataIo {
                op,
                subpath: subpath.to_string(),
                source,
            },
        }
    })
}

pub(crate) fn ensure_buffer_size(buffer_size: usize) -> StorageResult<()> {
    if buffer_size < 1 {
        return Err(StorageError::invalid_argument("buffer size must be at least 1"));
    }
    Ok(())
}

#[derive(Debug, Default)]
struct LoadedMetadata {
    map: MetadataMap,
    /// Mutated since the last load or flush.
    dirty: bool,
}

/// One logical file and its lifecycle state.
pub struct FileHandle {
    ctx: Arc<StorageContext>,
    subpath: Subpath,
    locator: Locator,
    content_type: String,
    state: HandleState,
    cached: Option<Vec<u8>>,
    metadata: Option<LoadedMetadata>,
    cancel: CancellationToken,
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileHandle")
            .field("subpath", &self.subpath)
            .field("locator", &self.locator)
            .field("content_type", &self.content_type)
            .field("state", &self.state)
            .field("cached", &self.cached.is_some())
            .field("metadata_loaded", &self.metadata.is_some())
            .finish()
    }
}

impl FileHandle {
    /// Build a handle bound to `subpath`. Validates the subpath; no I/O.
    pub(crate) fn with_state(
        ctx: Arc<StorageContext>,
        subpath: Subpath,
        state: HandleState,
    ) -> StorageResult<Self> {
        ensure_file_subpath(&subpath)?;
        let locator = ctx.backend.locator(&subpath);
        let content_type = ctx.content_types.content_type(subpath.name());
        let cancel = ctx.cancel.child_token();
        Ok(Self {
            ctx,
            subpath,
            locator,
            content_type,
            state,
            cached: None,
            metadata: None,
            cancel,
        })
    }

    /// New handle on the same provider.
    fn sibling(&self, raw: &str) -> StorageResult<FileHandle> {
        Self::with_state(Arc::clone(&self.ctx), canonicalize(raw), HandleState::New)
    }

    // ========================================================================
    // Attributes
    // ========================================================================

    pub fn subpath(&self) -> &Subpath {
        &self.subpath
    }

    /// Last path segment.
    pub fn name(&self) -> &str {
        self.subpath.name()
    }

    /// Backing-store address of the content.
    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    /// MIME type derived from the name when the handle was built.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Authorization category (lowercased extension).
    pub fn category(&self) -> Option<String> {
        self.subpath.extension()
    }

    pub fn state(&self) -> &HandleState {
        &self.state
    }

    pub fn is_new(&self) -> bool {
        matches!(self.state, HandleState::New)
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self.state, HandleState::Deleted)
    }

    /// Stored size, `None` while new or after deletion.
    pub fn length(&self) -> Option<u64> {
        match self.state {
            HandleState::Persisted { length, .. } => Some(length),
            _ => None,
        }
    }

    pub fn last_modified(&self) -> Option<SystemTime> {
        match self.state {
            HandleState::Persisted { last_modified, .. } => last_modified,
            _ => None,
        }
    }

    /// True if content bytes are cached on this handle.
    pub fn is_cached(&self) -> bool {
        self.cached.is_some()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Replace the token this handle's operations observe.
    pub fn set_cancellation(&mut self, token: CancellationToken) {
        self.cancel = token;
    }

    // ========================================================================
    // Guards and I/O plumbing
    // ========================================================================

    fn check_cancelled(&self, op: &str) -> StorageResult<()> {
        if self.cancel.is_cancelled() {
            return Err(StorageError::cancelled(format!("{op} {}", self.subpath)));
        }
        Ok(())
    }

    fn ensure_persisted(&self, op: &str) -> StorageResult<()> {
        match self.state {
            HandleState::Persisted { .. } => Ok(()),
            HandleState::New => Err(StorageError::invalid_state(format!(
                "cannot {op} {}: nothing has been written yet",
                self.subpath
            ))),
            HandleState::Deleted => Err(StorageError::invalid_state(format!(
                "cannot {op} {}: handle was deleted",
                self.subpath
            ))),
        }
    }

    fn ensure_not_deleted(&self, op: &str) -> StorageResult<()> {
        if self.is_deleted() {
            return Err(StorageError::invalid_state(format!(
                "cannot {op} {}: handle was deleted",
                self.subpath
            )));
        }
        Ok(())
    }

    async fn content_io<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = BackendResult<T>>,
    ) -> StorageResult<T> {
        guarded(&self.cancel, op, &self.subpath, Resource::Content, fut).await
    }

    async fn metadata_io<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = BackendResult<T>>,
    ) -> StorageResult<T> {
        guarded(&self.cancel, op, &self.subpath, Resource::Sidecar, fut).await
    }

    fn sidecars(&self) -> SidecarStore<'_> {
        SidecarStore::new(self.ctx.backend.as_ref())
    }

    /// True if both handles address the same physical store, even through
    /// separate providers.
    fn shares_backend(&self, other: &FileHandle) -> bool {
        Arc::ptr_eq(&self.ctx.backend, &other.ctx.backend)
            || self.ctx.backend.store_id() == other.ctx.backend.store_id()
    }

    /// Enter (or stay in) Persisted with the store's view of the content.
    ///
    /// If the store cannot be asked, `length` falls back to what was written
    /// and `last_modified` is a local estimate (now), not the store's value.
    async fn settle_persisted(&mut self, expected_len: u64) {
        let attr = match self.ctx.backend.stat(&self.locator).await {
            Ok(Some(attr)) => attr,
            Ok(None) => ObjectAttr {
                size: expected_len,
                modified: Some(SystemTime::now()),
            },
            Err(e) => {
                tracing::warn!(subpath = %self.subpath, error = %e, "stat after write failed");
                ObjectAttr {
                    size: expected_len,
                    modified: Some(SystemTime::now()),
                }
            }
        };
        self.state = HandleState::persisted(&attr);
    }

    fn mark_deleted(&mut self) {
        self.state = HandleState::Deleted;
        self.cached = None;
        self.metadata = None;
    }

    // ========================================================================
    // Content
    // ========================================================================

    /// True if primary content exists. Allowed in every state.
    pub async fn exists(&self) -> StorageResult<bool> {
        self.check_cancelled("check")?;
        self.content_io("exists", self.ctx.backend.exists(&self.locator))
            .await
    }

    /// Re-read length and modification time from the backing store.
    ///
    /// Returns false, leaving the attributes alone, if the content has
    /// disappeared underneath the handle.
    pub async fn refresh(&mut self) -> StorageResult<bool> {
        self.check_cancelled("refresh")?;
        self.ensure_persisted("refresh")?;
        let attr = self
            .content_io("stat", self.ctx.backend.stat(&self.locator))
            .await?;
        match attr {
            Some(attr) => {
                self.state = HandleState::persisted(&attr);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Read the whole content with the provider's buffer size.
    pub async fn read_all_bytes(&mut self, cache: bool) -> StorageResult<Vec<u8>> {
        let buffer_size = self.ctx.options.buffer_size;
        self.read_all_bytes_buffered(cache, buffer_size).await
    }

    /// Read the whole content, `buffer_size` bytes at a time.
    ///
    /// With `cache`, a previously cached copy is returned as-is, and a fresh
    /// read is kept on the handle for next time.
    #[tracing::instrument(skip(self), fields(subpath = %self.subpath), name = "file.read")]
    pub async fn read_all_bytes_buffered(
        &mut self,
        cache: bool,
        buffer_size: usize,
    ) -> StorageResult<Vec<u8>> {
        self.check_cancelled("read")?;
        ensure_buffer_size(buffer_size)?;
        self.ensure_persisted("read")?;

        if cache {
            if let Some(bytes) = &self.cached {
                return Ok(bytes.clone());
            }
        }

        let mut reader = self
            .content_io("open", self.ctx.backend.open_read(&self.locator))
            .await?;
        let mut data = Vec::with_capacity(self.length().unwrap_or(0) as usize);
        let mut buf = vec![0u8; buffer_size];
        loop {
            let n = self
                .content_io("read", async {
                    reader.read(&mut buf).await.map_err(BackendError::from)
                })
                .await?;
            if n == 0 {
                break;
            }
            data.extend_from_slice(&buf[..n]);
        }

        tracing::debug!(bytes = data.len(), "read content");
        if cache {
            self.cached = Some(data.clone());
        }
        Ok(data)
    }

    /// Read the whole content as UTF-8.
    pub async fn read_to_string(&mut self, cache: bool) -> StorageResult<String> {
        let bytes = self.read_all_bytes(cache).await?;
        String::from_utf8(bytes).map_err(|e| StorageError::Io {
            op: "decode",
            subpath: self.subpath.to_string(),
            source: BackendError::invalid_data(e.to_string()),
        })
    }

    /// Stream the content into `sink`, returning bytes written.
    #[tracing::instrument(skip(self, sink), fields(subpath = %self.subpath), name = "file.write_to")]
    pub async fn write_to<W>(&mut self, sink: &mut W, buffer_size: Option<usize>) -> StorageResult<u64>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        self.check_cancelled("stream")?;
        let buffer_size = buffer_size.unwrap_or(self.ctx.options.buffer_size);
        ensure_buffer_size(buffer_size)?;
        self.ensure_persisted("stream")?;

        if let Some(bytes) = &self.cached {
            self.content_io("write to sink", async {
                sink.write_all(bytes).await?;
                sink.flush().await?;
                Ok::<_, BackendError>(())
            })
            .await?;
            return Ok(bytes.len() as u64);
        }

        let mut reader = self
            .content_io("open", self.ctx.backend.open_read(&self.locator))
            .await?;
        let mut buf = vec![0u8; buffer_size];
        let mut total = 0u64;
        loop {
            let n = self
                .content_io("read", async {
                    reader.read(&mut buf).await.map_err(BackendError::from)
                })
                .await?;
            if n == 0 {
                break;
            }
            self.content_io("write to sink", async {
                sink.write_all(&buf[..n]).await.map_err(BackendError::from)
            })
            .await?;
            total += n as u64;
        }
        self.content_io("write to sink", async {
            sink.flush().await.map_err(BackendError::from)
        })
        .await?;
        Ok(total)
    }

    /// Store `bytes` as the content, creating parent paths as needed.
    ///
    /// Empty content is rejected: a persisted file always has content.
    #[tracing::instrument(skip(self, bytes), fields(subpath = %self.subpath, len = bytes.len()), name = "file.write")]
    pub async fn write_from_bytes(&mut self, bytes: &[u8], cache: bool) -> StorageResult<()> {
        self.check_cancelled("write")?;
        self.ensure_not_deleted("write")?;
        if bytes.is_empty() {
            return Err(StorageError::invalid_argument(format!(
                "refusing to write empty content to {}",
                self.subpath
            )));
        }

        self.cached = None;
        self.content_io("write", self.ctx.backend.write(&self.locator, bytes))
            .await?;
        self.settle_persisted(bytes.len() as u64).await;
        if cache {
            self.cached = Some(bytes.to_vec());
        }
        tracing::debug!("wrote content");
        Ok(())
    }

    /// Store a UTF-8 string as the content.
    pub async fn write_from_string(&mut self, text: &str, cache: bool) -> StorageResult<()> {
        self.write_from_bytes(text.as_bytes(), cache).await
    }

    /// Store everything `source` yields as the content.
    ///
    /// A source that is empty from the start is rejected before anything is
    /// written. Streamed content is not cached on the handle.
    pub async fn write_from_stream<R>(&mut self, source: &mut R) -> StorageResult<u64>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        self.write_stream(source, false).await
    }

    /// Stream `source` into the store, or with `cache` buffer it whole and
    /// keep the bytes on the handle.
    #[tracing::instrument(skip(self, source), fields(subpath = %self.subpath), name = "file.write_stream")]
    pub(crate) async fn write_stream<R>(&mut self, source: &mut R, cache: bool) -> StorageResult<u64>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        if cache {
            self.check_cancelled("write")?;
            self.ensure_not_deleted("write")?;
            let mut data = Vec::new();
            self.content_io("read source", async {
                source.read_to_end(&mut data).await.map_err(BackendError::from)
            })
            .await?;
            self.write_from_bytes(&data, true).await?;
            return Ok(data.len() as u64);
        }

        self.check_cancelled("write")?;
        self.ensure_not_deleted("write")?;

        let mut first = vec![0u8; self.ctx.options.buffer_size];
        let n = self
            .content_io("read source", async {
                source.read(&mut first).await.map_err(BackendError::from)
            })
            .await?;
        if n == 0 {
            return Err(StorageError::invalid_argument(format!(
                "refusing to write empty content to {}",
                self.subpath
            )));
        }
        first.truncate(n);

        self.cached = None;
        let mut content = std::io::Cursor::new(first).chain(source);
        let written = self
            .content_io(
                "write",
                self.ctx.backend.write_stream(&self.locator, &mut content),
            )
            .await?;
        self.settle_persisted(written).await;
        tracing::debug!(bytes = written, "wrote content");
        Ok(written)
    }

    // ========================================================================
    // Copy / move / delete
    // ========================================================================

    fn ensure_transfer(&self, dest: &FileHandle, op: &str) -> StorageResult<()> {
        self.ensure_not_deleted(op)?;
        dest.ensure_not_deleted(op)?;
        if self.shares_backend(dest) && self.locator == dest.locator {
            return Err(StorageError::invalid_argument(format!(
                "cannot {op} {} onto itself",
                self.subpath
            )));
        }
        Ok(())
    }

    /// Stream content into a handle on another backend.
    ///
    /// Fails if nothing was written: persisted content is never empty, and a
    /// move must not go on to delete the source.
    async fn stream_content_into(&self, dest: &FileHandle) -> StorageResult<u64> {
        let mut reader = self
            .content_io("open", self.ctx.backend.open_read(&self.locator))
            .await?;
        let written = dest
            .content_io(
                "write",
                dest.ctx.backend.write_stream(&dest.locator, &mut *reader),
            )
            .await?;
        if written == 0 {
            tracing::warn!(from = %self.subpath, to = %dest.subpath, "streamed transfer wrote no content");
            return Err(StorageError::Io {
                op: "transfer",
                subpath: dest.subpath.to_string(),
                source: BackendError::invalid_data("source yielded no content"),
            });
        }
        Ok(written)
    }

    /// Carry the persisted side-car to a handle on another backend.
    async fn stream_sidecar_into(&self, dest: &FileHandle) -> StorageResult<bool> {
        let map = self
            .metadata_io("load", self.sidecars().load(&self.locator))
            .await?;
        dest.metadata_io("store", dest.sidecars().store(&dest.locator, &map))
            .await?;
        Ok(!map.is_empty())
    }

    /// Copy to a new handle at `destination` on the same provider.
    pub async fn copy_to(&mut self, destination: &str) -> StorageResult<FileHandle> {
        let mut dest = self.sibling(destination)?;
        self.copy_to_handle(&mut dest).await?;
        Ok(dest)
    }

    /// Copy content, then side-car, onto `dest` and mark it persisted.
    ///
    /// Existing destination content is replaced; a destination side-car is
    /// replaced or removed to match the source. Only persisted metadata is
    /// copied, not unflushed changes on this handle.
    #[tracing::instrument(skip(self, dest), fields(from = %self.subpath, to = %dest.subpath), name = "file.copy")]
    pub async fn copy_to_handle(&mut self, dest: &mut FileHandle) -> StorageResult<()> {
        self.check_cancelled("copy")?;
        self.ensure_transfer(dest, "copy")?;
        if !self.exists().await? {
            return Err(StorageError::not_found(self.subpath.to_string()));
        }

        let with_metadata = if self.shares_backend(dest) {
            self.content_io("copy", self.ctx.backend.copy(&self.locator, &dest.locator))
                .await?;
            self.metadata_io("copy", self.sidecars().copy(&self.locator, &dest.locator))
                .await?
        } else {
            self.stream_content_into(dest).await?;
            self.stream_sidecar_into(dest).await?
        };

        dest.cached = None;
        dest.metadata = None;
        dest.settle_persisted(self.length().unwrap_or(0)).await;
        tracing::debug!(with_metadata, "copied file");
        Ok(())
    }

    /// Move to a new handle at `destination` on the same provider.
    pub async fn move_to(&mut self, destination: &str) -> StorageResult<FileHandle> {
        let mut dest = self.sibling(destination)?;
        self.move_to_handle(&mut dest).await?;
        Ok(dest)
    }

    /// Move content, then side-car, onto `dest`. This handle ends up deleted.
    #[tracing::instrument(skip(self, dest), fields(from = %self.subpath, to = %dest.subpath), name = "file.move")]
    pub async fn move_to_handle(&mut self, dest: &mut FileHandle) -> StorageResult<()> {
        self.check_cancelled("move")?;
        self.ensure_transfer(dest, "move")?;
        if !self.exists().await? {
            return Err(StorageError::not_found(self.subpath.to_string()));
        }

        let with_metadata = if self.shares_backend(dest) {
            self.content_io("move", self.ctx.backend.rename(&self.locator, &dest.locator))
                .await?;
            self.metadata_io("move", self.sidecars().rename(&self.locator, &dest.locator))
                .await?
        } else {
            self.stream_content_into(dest).await?;
            let with_metadata = self.stream_sidecar_into(dest).await?;
            self.content_io("move", self.ctx.backend.delete(&self.locator))
                .await?;
            self.metadata_io("move", self.sidecars().remove(&self.locator))
                .await?;
            with_metadata
        };

        let expected_len = self.length().unwrap_or(0);
        self.mark_deleted();
        dest.cached = None;
        dest.metadata = None;
        dest.settle_persisted(expected_len).await;
        tracing::debug!(with_metadata, "moved file");
        Ok(())
    }

    /// Remove content and side-car.
    ///
    /// Deleting something that is not there succeeds: the contract is "make
    /// sure it is gone", not "it must have existed".
    #[tracing::instrument(skip(self), fields(subpath = %self.subpath), name = "file.delete")]
    pub async fn delete(&mut self) -> StorageResult<bool> {
        self.check_cancelled("delete")?;
        let removed = self
            .content_io("delete", self.ctx.backend.delete(&self.locator))
            .await?;
        let sidecar_removed = self
            .metadata_io("delete", self.sidecars().remove(&self.locator))
            .await?;
        self.mark_deleted();
        tracing::debug!(removed, sidecar_removed, "deleted file");
        Ok(true)
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    /// Materialize the map from the side-car on first use.
    async fn loaded_metadata(&mut self, op: &str) -> StorageResult<&mut LoadedMetadata> {
        self.ensure_persisted(op)?;
        if self.metadata.is_none() {
            let map = self
                .metadata_io("load", self.sidecars().load(&self.locator))
                .await?;
            self.metadata = Some(LoadedMetadata { map, dirty: false });
        }
        Ok(self.metadata.get_or_insert_with(LoadedMetadata::default))
    }

    fn ensure_key(key: &str) -> StorageResult<()> {
        if key.trim().is_empty() {
            return Err(StorageError::invalid_argument("metadata key must not be empty"));
        }
        Ok(())
    }

    /// Typed metadata value, `fallback` if absent or unconvertible.
    pub async fn get_metadata<T: MetadataValue>(&mut self, key: &str, fallback: T) -> StorageResult<T> {
        self.check_cancelled("read metadata")?;
        let loaded = self.loaded_metadata("read metadata of").await?;
        Ok(convert_or(loaded.map.get(key).map(String::as_str), fallback))
    }

    /// Metadata value through a custom converter.
    pub async fn get_metadata_with<T, F>(&mut self, key: &str, fallback: T, convert: F) -> StorageResult<T>
    where
        F: FnOnce(&str) -> Option<T>,
    {
        self.check_cancelled("read metadata")?;
        let loaded = self.loaded_metadata("read metadata of").await?;
        Ok(loaded.map.get(key).and_then(|raw| convert(raw)).unwrap_or(fallback))
    }

    /// Snapshot of the whole map.
    pub async fn metadata(&mut self) -> StorageResult<MetadataMap> {
        self.check_cancelled("read metadata")?;
        let loaded = self.loaded_metadata("read metadata of").await?;
        Ok(loaded.map.clone())
    }

    /// Upsert `key`. `None`, or a value with an empty string form, removes it.
    ///
    /// Without `write_immediately` the change stays in memory until
    /// [`FileHandle::flush_metadata`].
    pub async fn set_metadata<T: MetadataValue>(
        &mut self,
        key: &str,
        value: Option<T>,
        write_immediately: bool,
    ) -> StorageResult<()> {
        self.check_cancelled("write metadata")?;
        Self::ensure_key(key)?;
        let stored = value.map(|v| v.to_metadata()).filter(|s| !s.is_empty());

        let loaded = self.loaded_metadata("write metadata of").await?;
        match stored {
            Some(value) => {
                loaded.map.insert(key.to_string(), value);
            }
            None => {
                loaded.map.remove(key);
            }
        }
        loaded.dirty = true;

        if write_immediately {
            self.flush_metadata().await?;
        }
        Ok(())
    }

    pub async fn remove_metadata(&mut self, key: &str, write_immediately: bool) -> StorageResult<()> {
        self.set_metadata::<String>(key, None, write_immediately).await
    }

    pub async fn clear_metadata(&mut self, write_immediately: bool) -> StorageResult<()> {
        self.check_cancelled("write metadata")?;
        let loaded = self.loaded_metadata("write metadata of").await?;
        loaded.map.clear();
        loaded.dirty = true;

        if write_immediately {
            self.flush_metadata().await?;
        }
        Ok(())
    }

    /// Persist the in-memory map.
    ///
    /// A non-empty map is written. An empty map deletes the side-car if it
    /// was emptied through this handle; otherwise the side-car on storage is
    /// checked first and only removed if it is empty too, so metadata this
    /// handle never loaded is not clobbered. On failure the in-memory map is
    /// left as it was and the flush can be retried.
    #[tracing::instrument(skip(self), fields(subpath = %self.subpath), name = "file.flush_metadata")]
    pub async fn flush_metadata(&mut self) -> StorageResult<()> {
        self.check_cancelled("flush metadata")?;
        self.ensure_persisted("flush metadata of")?;

        let store = self.sidecars();
        match &self.metadata {
            Some(loaded) if !loaded.map.is_empty() => {
                self.metadata_io("flush", store.store(&self.locator, &loaded.map))
                    .await?;
            }
            Some(loaded) if loaded.dirty => {
                self.metadata_io("flush", store.remove(&self.locator))
                    .await?;
            }
            _ => {
                let on_disk = self
                    .metadata_io("flush", store.load(&self.locator))
                    .await?;
                if on_disk.is_empty() {
                    self.metadata_io("flush", store.remove(&self.locator))
                        .await?;
                }
            }
        }

        if let Some(loaded) = self.metadata.as_mut() {
            loaded.dirty = false;
        }
        Ok(())
    }

    /// Drop the materialized map (and any unflushed changes) and re-read
    /// the side-car.
    pub async fn reload_metadata(&mut self) -> StorageResult<()> {
        self.check_cancelled("reload metadata")?;
        self.ensure_persisted("reload metadata of")?;
        self.metadata = None;
        self.loaded_metadata("reload metadata of").await?;
        Ok(())
    }

    /// Id of the user who created the file.
    pub async fn created_by_id<T: MetadataValue>(&mut self, fallback: T) -> StorageResult<T> {
        self.get_metadata(CREATED_BY_ID_KEY, fallback).await
    }

    pub async fn set_created_by_id<T: MetadataValue>(
        &mut self,
        id: Option<T>,
        write_immediately: bool,
    ) -> StorageResult<()> {
        self.set_metadata(CREATED_BY_ID_KEY, id, write_immediately).await
    }

    /// Original file name, as supplied by whoever uploaded it.
    pub async fn file_name(&mut self) -> StorageResult<Option<String>> {
        self.check_cancelled("read metadata")?;
        let loaded = self.loaded_metadata("read metadata of").await?;
        Ok(loaded.map.get(FILE_NAME_KEY).cloned())
    }

    pub async fn set_file_name(&mut self, name: Option<&str>, write_immediately: bool) -> StorageResult<()> {
        self.set_metadata(FILE_NAME_KEY, name.map(str::to_string), write_immediately)
            .await
    }
}
