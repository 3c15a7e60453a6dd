//! Backing stores.
//!
//! A backend is the transport a provider writes through: local disk, a blob
//! container, anything else that can hold named byte blobs. Backends know
//! nothing about handles, metadata, or authorization; they implement
//! [`StorageBackend`] and the handle/provider layer does the rest.
//!
//! - [`LocalBackend`] - real directories on the local filesystem
//! - [`MemoryBackend`] - flat key namespace, the way blob storage behaves

mod local;
mod memory;

pub use local::{LocalBackend, to_backing_locator};
pub use memory::MemoryBackend;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;
use tokio::io::AsyncRead;

use crate::error::BackendResult;
use crate::path::Subpath;

/// Readable content stream handed out by a backend.
pub type ContentReader = Box<dyn AsyncRead + Send + Unpin>;

/// Concrete address of a resource inside a backend.
///
/// For the disk backend this is a native filesystem path, for blob-style
/// backends it is the object key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Locator(String);

impl Locator {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Same location with `suffix` appended to the final name.
    pub fn with_suffix(&self, suffix: &str) -> Locator {
        Self(format!("{}{}", self.0, suffix))
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Size and modification time of a stored resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectAttr {
    /// Size in bytes.
    pub size: u64,
    /// Last modification time, if the backend tracks it.
    pub modified: Option<SystemTime>,
}

/// Entry kind returned by [`StorageBackend::list`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    /// Stored content.
    File,
    /// Directory, real or synthesized from key prefixes.
    Directory,
}

impl EntryKind {
    pub fn is_file(&self) -> bool {
        matches!(self, EntryKind::File)
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, EntryKind::Directory)
    }
}

/// Immediate child of a listed directory.
#[derive(Debug, Clone)]
pub struct ListEntry {
    /// Child name (single segment).
    pub name: String,
    pub kind: EntryKind,
    /// Present for files.
    pub attr: Option<ObjectAttr>,
}

/// Capability interface every backing store implements.
///
/// Operations address resources by [`Locator`], obtained from
/// [`StorageBackend::locator`]. Writers create whatever parent directory or
/// container path the store needs. None of the operations lock; concurrent
/// callers racing on one locator get whatever the store gives them.
#[async_trait]
pub trait StorageBackend: Send + Sync + fmt::Debug {
    /// Short transport name for logs.
    fn kind(&self) -> &'static str;

    /// Identity of the physical store behind this backend.
    ///
    /// Two backends with equal ids address the same resources, so equal
    /// locators on them name the same content.
    fn store_id(&self) -> String;

    /// Map a canonical subpath to this store's address.
    ///
    /// Pure, deterministic, and injective for a given backend.
    fn locator(&self, subpath: &Subpath) -> Locator;

    // ========================================================================
    // Reading
    // ========================================================================

    /// True if content exists at `locator` (directories do not count).
    async fn exists(&self, locator: &Locator) -> BackendResult<bool>;

    /// Attributes of the content at `locator`, `None` if absent.
    async fn stat(&self, locator: &Locator) -> BackendResult<Option<ObjectAttr>>;

    /// Open the content for streaming reads.
    async fn open_read(&self, locator: &Locator) -> BackendResult<ContentReader>;

    /// Immediate children of a directory, sorted by name.
    ///
    /// A directory that does not exist lists as empty.
    async fn list(&self, dir: &Locator) -> BackendResult<Vec<ListEntry>>;

    // ========================================================================
    // Writing
    // ========================================================================

    /// Replace the content at `locator`.
    async fn write(&self, locator: &Locator, data: &[u8]) -> BackendResult<()>;

    /// Replace the content at `locator` from a stream, returning bytes written.
    async fn write_stream(
        &self,
        locator: &Locator,
        source: &mut (dyn AsyncRead + Send + Unpin),
    ) -> BackendResult<u64>;

    /// Remove the content. Returns false if nothing was there.
    async fn delete(&self, locator: &Locator) -> BackendResult<bool>;

    /// Copy content, replacing the destination.
    async fn copy(&self, from: &Locator, to: &Locator) -> BackendResult<()>;

    /// Move content, replacing the destination.
    async fn rename(&self, from: &Locator, to: &Locator) -> BackendResult<()>;

    /// Recursively remove a directory.
    ///
    /// Fails with [`BackendError::NotFound`](crate::BackendError::NotFound)
    /// when there is nothing under `dir`.
    async fn delete_dir(&self, dir: &Locator) -> BackendResult<()>;

    // ========================================================================
    // Convenience methods (default implementations)
    // ========================================================================

    /// Read entire content.
    async fn read_all(&self, locator: &Locator) -> BackendResult<Vec<u8>> {
        use tokio::io::AsyncReadExt;

        let mut reader = self.open_read(locator).await?;
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await?;
        Ok(data)
    }
}
