//! Metadata side-car persistence.
//!
//! Each file's key/value metadata lives in a second resource next to the
//! content, at the content locator plus [`SIDECAR_SUFFIX`], encoded as a JSON
//! object of strings. Keeping metadata out of the content stream means every
//! backend gets the same metadata support, whether or not the transport has
//! extensible native metadata.
//!
//! The side-car exists only while the map is non-empty: storing an empty
//! map deletes it.

use std::collections::BTreeMap;

use crate::backends::{Locator, StorageBackend};
use crate::error::BackendResult;

/// Reserved suffix for side-car resources.
pub const SIDECAR_SUFFIX: &str = ".umfsmeta";

/// Per-file metadata.
pub type MetadataMap = BTreeMap<String, String>;

/// True if `name` lives in the reserved side-car namespace.
pub fn is_sidecar_name(name: &str) -> bool {
    name.ends_with(SIDECAR_SUFFIX)
}

/// Side-car locator for a content locator.
pub fn sidecar_locator(primary: &Locator) -> Locator {
    primary.with_suffix(SIDECAR_SUFFIX)
}

/// Encode a map as a side-car document.
pub fn encode(map: &MetadataMap) -> BackendResult<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(map)?)
}

/// Decode a side-car document. Blank documents decode to an empty map.
pub fn decode(bytes: &[u8]) -> BackendResult<MetadataMap> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(MetadataMap::new());
    }
    Ok(serde_json::from_slice(bytes)?)
}

/// Side-car operations against one backend, addressed by content locator.
#[derive(Clone, Copy)]
pub(crate) struct SidecarStore<'a> {
    backend: &'a dyn StorageBackend,
}

impl<'a> SidecarStore<'a> {
    pub(crate) fn new(backend: &'a dyn StorageBackend) -> Self {
        Self { backend }
    }

    pub(crate) async fn exists(&self, primary: &Locator) -> BackendResult<bool> {
        self.backend.exists(&sidecar_locator(primary)).await
    }

    /// Load the map, empty if there is no side-car.
    pub(crate) async fn load(&self, primary: &Locator) -> BackendResult<MetadataMap> {
        match self.backend.read_all(&sidecar_locator(primary)).await {
            Ok(bytes) => decode(&bytes),
            Err(e) if e.is_not_found() => Ok(MetadataMap::new()),
            Err(e) => Err(e),
        }
    }

    /// Persist the map; an empty map removes the side-car.
    pub(crate) async fn store(&self, primary: &Locator, map: &MetadataMap) -> BackendResult<()> {
        if map.is_empty() {
            self.remove(primary).await?;
            return Ok(());
        }
        let bytes = encode(map)?;
        self.backend.write(&sidecar_locator(primary), &bytes).await
    }

    /// Remove the side-car, false if there was none.
    pub(crate) async fn remove(&self, primary: &Locator) -> BackendResult<bool> {
        self.backend.delete(&sidecar_locator(primary)).await
    }

    /// Mirror the source side-car onto `to`.
    ///
    /// When the source has none, any side-car at the destination is removed so
    /// stale metadata does not attach to the new content. Returns whether
    /// metadata was copied.
    pub(crate) async fn copy(&self, from: &Locator, to: &Locator) -> BackendResult<bool> {
        if self.exists(from).await? {
            self.backend
                .copy(&sidecar_locator(from), &sidecar_locator(to))
                .await?;
            Ok(true)
        } else {
            self.remove(to).await?;
            Ok(false)
        }
    }

    /// Move the source side-car onto `to`, same rules as [`Self::copy`].
    pub(crate) async fn rename(&self, from: &Locator, to: &Locator) -> BackendResult<bool> {
        if self.exists(from).await? {
            self.backend
                .rename(&sidecar_locator(from), &sidecar_locator(to))
                .await?;
            Ok(true)
        } else {
            self.remove(to).await?;
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MemoryBackend;
    use crate::path::canonicalize;

    #[test]
    fn test_sidecar_locator() {
        let primary = Locator::new("media/docs/a.txt");
        assert_eq!(sidecar_locator(&primary).as_str(), "media/docs/a.txt.umfsmeta");
        assert!(is_sidecar_name("a.txt.umfsmeta"));
        assert!(!is_sidecar_name("a.umfsmeta.txt"));
    }

    #[test]
    fn test_decode_blank_and_invalid() {
        assert!(decode(b"").unwrap().is_empty());
        assert!(decode(b" \n").unwrap().is_empty());
        assert!(decode(b"{}").unwrap().is_empty());
        assert!(decode(b"not json").is_err());
        assert!(decode(br#"{"k": 1}"#).is_err());
    }

    #[tokio::test]
    async fn test_store_empty_removes() {
        let backend = MemoryBackend::new("c");
        let store = SidecarStore::new(&backend);
        let primary = backend.locator(&canonicalize("a.txt"));

        let mut map = MetadataMap::new();
        map.insert("k".into(), "v".into());
        store.store(&primary, &map).await.unwrap();
        assert!(store.exists(&primary).await.unwrap());
        assert_eq!(store.load(&primary).await.unwrap(), map);

        store.store(&primary, &MetadataMap::new()).await.unwrap();
        assert!(!store.exists(&primary).await.unwrap());
        assert!(store.load(&primary).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_copy_clears_stale_destination() {
        let backend = MemoryBackend::new("c");
        let store = SidecarStore::new(&backend);
        let a = backend.locator(&canonicalize("a.txt"));
        let b = backend.locator(&canonicalize("b.txt"));

        let mut map = MetadataMap::new();
        map.insert("stale".into(), "yes".into());
        store.store(&b, &map).await.unwrap();

        assert!(!store.copy(&a, &b).await.unwrap());
        assert!(!store.exists(&b).await.unwrap());
    }
}
