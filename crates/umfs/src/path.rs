//! Subpath canonicalization.
//!
//! Callers spell paths many ways (`/a/b.txt`, `~/a\b.txt`, `a//b.txt `).
//! [`canonicalize`] folds all of them into one [`Subpath`]: root-relative,
//! forward-slash separated, no empty or padded segments. It never fails and
//! never touches storage.
//!
//! `.` and `..` segments are deliberately left in place. Rejecting traversal
//! is the provider's job ([`ensure_file_subpath`], [`ensure_directory_subpath`]);
//! silently resolving it here would turn an attack into a different valid
//! path.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{StorageError, StorageResult};
use crate::sidecar::is_sidecar_name;

/// App-relative marker stripped from the front of raw paths.
const APP_RELATIVE_SEGMENT: &str = "~";

/// Canonical, root-relative path of a logical file or directory.
///
/// The root itself is the empty subpath.
///
/// Deserializing goes through [`canonicalize`], so a decoded value is always
/// canonical.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Subpath(String);

impl From<String> for Subpath {
    fn from(raw: String) -> Self {
        canonicalize(&raw)
    }
}

impl From<Subpath> for String {
    fn from(subpath: Subpath) -> Self {
        subpath.0
    }
}

impl Subpath {
    /// The root marker.
    pub fn root() -> Self {
        Self(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Path segments, root yields none.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Last segment, empty for the root.
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or("")
    }

    /// Lowercased extension of the last segment, if any.
    pub fn extension(&self) -> Option<String> {
        let name = self.name();
        match name.rfind('.') {
            Some(idx) if idx > 0 && idx + 1 < name.len() => {
                Some(name[idx + 1..].to_ascii_lowercase())
            }
            _ => None,
        }
    }

    /// Containing directory, the root is its own parent.
    pub fn parent(&self) -> Subpath {
        match self.0.rfind('/') {
            Some(idx) => Self(self.0[..idx].to_string()),
            None => Self::root(),
        }
    }

    /// Append a child path, canonicalizing the result.
    pub fn join(&self, child: &str) -> Subpath {
        if self.is_root() {
            canonicalize(child)
        } else {
            canonicalize(&format!("{}/{}", self.0, child))
        }
    }

    /// True if any segment is `.` or `..`.
    pub fn has_traversal(&self) -> bool {
        self.segments().any(|s| s == "." || s == "..")
    }
}

impl fmt::Display for Subpath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0)
    }
}

impl AsRef<str> for Subpath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Normalize any path spelling into a [`Subpath`].
///
/// Trims the input, turns backslashes into slashes, drops empty segments
/// (collapsing repeated slashes and the leading slash), trims each segment,
/// and strips any leading `~/` markers. Empty or whitespace-only input
/// yields the root. Idempotent.
pub fn canonicalize(raw: &str) -> Subpath {
    let normalized = raw.trim().replace('\\', "/");
    let trailing_slash = normalized.ends_with('/');

    let mut segments: Vec<&str> = normalized
        .split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    // `~/x` -> `x`, and a bare `~/` is the root. A bare `~` is a file name.
    let mut skip = 0;
    while segments.len() - skip >= 2 && segments[skip] == APP_RELATIVE_SEGMENT {
        skip += 1;
    }
    if segments.len() - skip == 1 && segments[skip] == APP_RELATIVE_SEGMENT && trailing_slash {
        skip += 1;
    }
    segments.drain(..skip);

    Subpath(segments.join("/"))
}

/// Validate a subpath that names a file.
pub fn ensure_file_subpath(subpath: &Subpath) -> StorageResult<()> {
    if subpath.is_root() {
        return Err(StorageError::invalid_argument("file subpath must not be empty"));
    }
    ensure_directory_subpath(subpath)?;
    if is_sidecar_name(subpath.name()) {
        return Err(StorageError::invalid_argument(format!(
            "{subpath} uses the reserved metadata suffix"
        )));
    }
    Ok(())
}

/// Validate a subpath that names a directory (the root is allowed).
pub fn ensure_directory_subpath(subpath: &Subpath) -> StorageResult<()> {
    if subpath.has_traversal() {
        return Err(StorageError::invalid_argument(format!(
            "{subpath} contains a relative segment"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: &[&str] = &[
        "",
        "   ",
        "/",
        "~/",
        "~",
        "~/~/a.txt",
        "/~/a.txt",
        "~ /a.txt",
        "a/~/b",
        "  /images//photo.png ",
        "\\images\\sub\\photo.png",
        "images/ sub /photo.png",
        "images/",
        "//",
        "../etc/passwd",
        "a/./b",
        "a\\\\b//c",
    ];

    #[test]
    fn test_rules() {
        assert_eq!(canonicalize("/images/photo.png").as_str(), "images/photo.png");
        assert_eq!(canonicalize("~/images/photo.png").as_str(), "images/photo.png");
        assert_eq!(canonicalize("\\images\\photo.png").as_str(), "images/photo.png");
        assert_eq!(canonicalize("images///photo.png").as_str(), "images/photo.png");
        assert_eq!(canonicalize("  images/photo.png\t").as_str(), "images/photo.png");
        assert_eq!(canonicalize("images/ sub /photo.png").as_str(), "images/sub/photo.png");
        assert_eq!(canonicalize("images/").as_str(), "images");
    }

    #[test]
    fn test_empty_is_root() {
        assert!(canonicalize("").is_root());
        assert!(canonicalize("   ").is_root());
        assert!(canonicalize("/").is_root());
        assert!(canonicalize("~/").is_root());
    }

    #[test]
    fn test_tilde_only_stripped_as_prefix() {
        assert_eq!(canonicalize("~").as_str(), "~");
        assert_eq!(canonicalize("a/~/b").as_str(), "a/~/b");
        assert_eq!(canonicalize("~/~/a.txt").as_str(), "a.txt");
        assert_eq!(canonicalize("/~/a.txt").as_str(), "a.txt");
    }

    #[test]
    fn test_traversal_left_for_provider() {
        let p = canonicalize("../etc/passwd");
        assert_eq!(p.as_str(), "../etc/passwd");
        assert!(p.has_traversal());
        assert!(ensure_file_subpath(&p).is_err());
        assert!(canonicalize("a/./b").has_traversal());
        assert!(!canonicalize("a/..b/c").has_traversal());
    }

    #[test]
    fn test_idempotent() {
        for raw in SAMPLES {
            let once = canonicalize(raw);
            let twice = canonicalize(once.as_str());
            assert_eq!(once, twice, "not idempotent for {raw:?}");
        }
    }

    #[test]
    fn test_name_parent_extension() {
        let p = canonicalize("/images/sub/Photo.PNG");
        assert_eq!(p.name(), "Photo.PNG");
        assert_eq!(p.extension().as_deref(), Some("png"));
        assert_eq!(p.parent().as_str(), "images/sub");
        assert_eq!(p.parent().parent().parent(), Subpath::root());
        assert_eq!(canonicalize(".bashrc").extension(), None);
        assert_eq!(Subpath::root().name(), "");
    }

    #[test]
    fn test_join() {
        let dir = canonicalize("images");
        assert_eq!(dir.join("a.png").as_str(), "images/a.png");
        assert_eq!(Subpath::root().join("/a.png").as_str(), "a.png");
    }

    #[test]
    fn test_reserved_suffix_rejected() {
        let p = canonicalize("docs/readme.txt.umfsmeta");
        assert!(matches!(
            ensure_file_subpath(&p),
            Err(StorageError::InvalidArgument(_))
        ));
        assert!(ensure_file_subpath(&Subpath::root()).is_err());
        assert!(ensure_directory_subpath(&Subpath::root()).is_ok());
    }

    #[test]
    fn test_deserialize_canonicalizes() {
        let decoded: Subpath = serde_json::from_str(r#""\\docs\\a//b.txt ""#).unwrap();
        assert_eq!(decoded.as_str(), "docs/a/b.txt");
        assert_eq!(serde_json::to_string(&decoded).unwrap(), r#""docs/a/b.txt""#);

        let from_ron: Subpath = ron::from_str(r#""~/x//y.png""#).unwrap();
        assert_eq!(from_ron, canonicalize("x/y.png"));
    }
}
