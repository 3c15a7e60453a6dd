//! Storage provider options.
//!
//! Options are plain data and load from RON:
//!
//! ```ron
//! (
//!     root: "/srv/media",
//!     default_access: deny,
//!     buffer_size: 65536,
//! )
//! ```
//!
//! Authorization handlers are code, so they are attached after loading with
//! [`StorageProviderOptions::authorize`].

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::auth::{AccessDefault, AuthorizationHandler, AuthorizationRegistry};
use crate::error::ConfigError;
use crate::handle::FileHandle;

/// Default read/stream buffer size in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 81_920;

/// Configuration for a [`StorageProvider`](crate::StorageProvider).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageProviderOptions {
    /// Disk directory or blob container the provider is rooted at.
    pub root: String,

    /// Outcome for files no authorization handler claims.
    pub default_access: AccessDefault,

    /// Buffer size for streamed reads and writes.
    pub buffer_size: usize,

    /// Authorization handlers keyed by file category.
    #[serde(skip)]
    pub authorization: AuthorizationRegistry,
}

impl Default for StorageProviderOptions {
    fn default() -> Self {
        Self {
            root: String::new(),
            default_access: AccessDefault::Allow,
            buffer_size: DEFAULT_BUFFER_SIZE,
            authorization: AuthorizationRegistry::default(),
        }
    }
}

impl StorageProviderOptions {
    /// Options rooted at `root`, everything else default.
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Parse and validate RON options.
    pub fn from_ron_str(text: &str) -> Result<Self, ConfigError> {
        let options: Self = ron::from_str(text)?;
        options.validate()?;
        Ok(options)
    }

    /// Read, parse and validate a RON options file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ron_str(&text)
    }

    /// Check the options are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.root.trim().is_empty() {
            return Err(ConfigError::EmptyRoot);
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::ZeroBufferSize);
        }
        Ok(())
    }

    pub fn with_default_access(mut self, default_access: AccessDefault) -> Self {
        self.default_access = default_access;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Register an authorization handler for a file category.
    pub fn authorize(mut self, category: &str, handler: impl AuthorizationHandler + 'static) -> Self {
        self.authorization.register(category, Arc::new(handler));
        self
    }

    /// Register a closure as the handler for a file category.
    pub fn authorize_fn<F>(self, category: &str, check: F) -> Self
    where
        F: Fn(&FileHandle) -> bool + Send + Sync + 'static,
    {
        self.authorize(category, check)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_ron() {
        let options = StorageProviderOptions::from_ron_str(
            r#"(root: "/srv/media", default_access: deny, buffer_size: 4096)"#,
        )
        .unwrap();
        assert_eq!(options.root, "/srv/media");
        assert_eq!(options.default_access, AccessDefault::Deny);
        assert_eq!(options.buffer_size, 4096);
        assert!(options.authorization.is_empty());
    }

    #[test]
    fn test_defaults_fill_missing_fields() {
        let options = StorageProviderOptions::from_ron_str(r#"(root: "media")"#).unwrap();
        assert_eq!(options.default_access, AccessDefault::Allow);
        assert_eq!(options.buffer_size, DEFAULT_BUFFER_SIZE);
    }

    #[test]
    fn test_invalid_options_are_fatal() {
        assert!(matches!(
            StorageProviderOptions::from_ron_str(r#"(root: "  ")"#),
            Err(ConfigError::EmptyRoot)
        ));
        assert!(matches!(
            StorageProviderOptions::from_ron_str(r#"(root: "m", buffer_size: 0)"#),
            Err(ConfigError::ZeroBufferSize)
        ));
        assert!(matches!(
            StorageProviderOptions::from_ron_str("(root: "),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("storage.ron");
        std::fs::write(&path, r#"(root: "media", buffer_size: 10)"#).unwrap();

        let options = StorageProviderOptions::load(&path).unwrap();
        assert_eq!(options.buffer_size, 10);

        let missing = StorageProviderOptions::load(dir.path().join("missing.ron"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }
}
