//! File name to content-type lookup.

use std::collections::HashMap;

/// Content type for names with no known extension.
pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Maps a file name to a MIME content type. Never fails.
pub trait ContentTypeLookup: Send + Sync {
    fn content_type(&self, file_name: &str) -> String;
}

const BUILTIN: &[(&str, &str)] = &[
    ("avif", "image/avif"),
    ("bmp", "image/bmp"),
    ("css", "text/css"),
    ("csv", "text/csv"),
    ("doc", "application/msword"),
    ("docx", "application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
    ("gif", "image/gif"),
    ("gz", "application/gzip"),
    ("htm", "text/html"),
    ("html", "text/html"),
    ("ico", "image/vnd.microsoft.icon"),
    ("jpeg", "image/jpeg"),
    ("jpg", "image/jpeg"),
    ("js", "text/javascript"),
    ("json", "application/json"),
    ("md", "text/markdown"),
    ("mp3", "audio/mpeg"),
    ("mp4", "video/mp4"),
    ("pdf", "application/pdf"),
    ("png", "image/png"),
    ("svg", "image/svg+xml"),
    ("tif", "image/tiff"),
    ("tiff", "image/tiff"),
    ("txt", "text/plain"),
    ("wav", "audio/wav"),
    ("webm", "video/webm"),
    ("webp", "image/webp"),
    ("xls", "application/vnd.ms-excel"),
    ("xlsx", "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
    ("xml", "application/xml"),
    ("yaml", "application/yaml"),
    ("yml", "application/yaml"),
    ("zip", "application/zip"),
];

/// Extension-table lookup with per-extension overrides.
#[derive(Debug, Clone, Default)]
pub struct ExtensionContentTypes {
    overrides: HashMap<String, String>,
}

impl ExtensionContentTypes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `extension` (without the dot, any case) to `content_type`.
    pub fn with(mut self, extension: &str, content_type: impl Into<String>) -> Self {
        self.overrides
            .insert(extension.trim_start_matches('.').to_ascii_lowercase(), content_type.into());
        self
    }
}

impl ContentTypeLookup for ExtensionContentTypes {
    fn content_type(&self, file_name: &str) -> String {
        let Some((stem, ext)) = file_name.rsplit_once('.') else {
            return FALLBACK_CONTENT_TYPE.to_string();
        };
        if stem.is_empty() {
            return FALLBACK_CONTENT_TYPE.to_string();
        }
        let ext = ext.to_ascii_lowercase();

        if let Some(ct) = self.overrides.get(&ext) {
            return ct.clone();
        }
        BUILTIN
            .iter()
            .find(|(e, _)| *e == ext)
            .map(|(_, ct)| (*ct).to_string())
            .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_and_unknown() {
        let lookup = ExtensionContentTypes::new();
        assert_eq!(lookup.content_type("photo.png"), "image/png");
        assert_eq!(lookup.content_type("PHOTO.JPG"), "image/jpeg");
        assert_eq!(lookup.content_type("archive.tar.gz"), "application/gzip");
        assert_eq!(lookup.content_type("README"), FALLBACK_CONTENT_TYPE);
        assert_eq!(lookup.content_type(".hidden"), FALLBACK_CONTENT_TYPE);
        assert_eq!(lookup.content_type("data.qqq"), FALLBACK_CONTENT_TYPE);
    }

    #[test]
    fn test_override() {
        let lookup = ExtensionContentTypes::new().with(".QQQ", "application/x-qqq");
        assert_eq!(lookup.content_type("data.qqq"), "application/x-qqq");
    }
}
