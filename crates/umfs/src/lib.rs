//! # umfs
//!
//! Virtual file storage with side-car metadata.
//!
//! A [`StorageProvider`] gives the same create/read/write/copy/move/delete
//! and enumerate contract over any [`StorageBackend`]: real directories on
//! disk ([`LocalBackend`]) or a flat blob namespace ([`MemoryBackend`]).
//! Every file can carry a string key/value map, persisted next to the content
//! in a `.umfsmeta` side-car so it works the same on every backend.
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use umfs::{StorageProvider, StorageProviderOptions};
//!
//! let provider = StorageProvider::local(StorageProviderOptions::new("/srv/media"))?;
//! let mut photo = provider.save("/images/photo.png", &[0u8; 2048], false).await?;
//! photo.set_metadata("caption", Some("sunset".to_string()), true).await?;
//!
//! for file in provider.enumerate_directory("/images").await? {
//!     println!("{} {} {:?}", file.subpath(), file.content_type(), file.length());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Design Decisions
//!
//! - **Handles are stateful**: a [`FileHandle`] is New until its first write,
//!   then Persisted, and Deleted for good once removed.
//! - **No locking**: concurrent callers on one subpath race. Deletes are
//!   idempotent and `get` treats absence as `None`, not an error.
//! - **Lazy metadata**: the side-car is read once per handle instance;
//!   use [`FileHandle::reload_metadata`] to see external changes.

pub mod auth;
pub mod backends;
pub mod content_type;
pub mod convert;
mod error;
mod handle;
pub mod options;
pub mod path;
mod provider;
pub mod sidecar;

pub use auth::{AccessDefault, AuthorizationHandler, AuthorizationRegistry, WILDCARD_CATEGORY};
pub use backends::{
    ContentReader, EntryKind, ListEntry, LocalBackend, Locator, MemoryBackend, ObjectAttr,
    StorageBackend, to_backing_locator,
};
pub use content_type::{ContentTypeLookup, ExtensionContentTypes, FALLBACK_CONTENT_TYPE};
pub use convert::{MetadataValue, convert_or};
pub use error::{BackendError, BackendResult, ConfigError, StorageError, StorageResult};
pub use handle::{CREATED_BY_ID_KEY, FILE_NAME_KEY, FileHandle, HandleState};
pub use options::{DEFAULT_BUFFER_SIZE, StorageProviderOptions};
pub use path::{Subpath, canonicalize};
pub use provider::StorageProvider;
pub use sidecar::{MetadataMap, SIDECAR_SUFFIX};

// Re-export for callers wiring cancellation.
pub use tokio_util::sync::CancellationToken;
