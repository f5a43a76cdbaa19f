//! MIME type to file extension resolution.
//!
//! [`ExtensionResolver`] asks an [`ExtensionLookup`] backing store for the
//! extension of a MIME type and falls back to a caller-supplied default when
//! the lookup fails or finds nothing. Two legacy overrides are applied to
//! whichever value wins: `.html` becomes `.htm` and `.jfif` becomes `.jpg`.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

/// Error type returned by fallible lookups.
pub type LookupError = Box<dyn std::error::Error + Send + Sync>;

/// Backing store mapping a bare MIME type (`image/png`) to an extension.
pub trait ExtensionLookup: Send + Sync {
    /// Returns the extension registered for `mime_type`, with or without a
    /// leading dot, or `None` when the type is unknown.
    ///
    /// # Errors
    ///
    /// Any error is treated by the resolver as "not found".
    fn lookup_extension(&self, mime_type: &str) -> Result<Option<String>, LookupError>;
}

/// Static MIME table used when no other backing store is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinExtensionTable;

impl ExtensionLookup for BuiltinExtensionTable {
    fn lookup_extension(&self, mime_type: &str) -> Result<Option<String>, LookupError> {
        Ok(builtin_extension(&mime_type.to_ascii_lowercase()).map(str::to_string))
    }
}

fn builtin_extension(mime: &str) -> Option<&'static str> {
    let extension = match mime {
        "text/html" | "application/xhtml+xml" => ".html",
        "text/plain" => ".txt",
        "text/css" => ".css",
        "text/csv" => ".csv",
        "text/markdown" => ".md",
        "text/javascript" | "application/javascript" => ".js",
        "application/json" => ".json",
        "application/xml" | "text/xml" => ".xml",
        "application/rss+xml" => ".rss",
        "application/atom+xml" => ".atom",
        "application/pdf" => ".pdf",
        "application/zip" => ".zip",
        "application/gzip" | "application/x-gzip" => ".gz",
        "application/x-tar" => ".tar",
        "application/x-7z-compressed" => ".7z",
        "application/msword" => ".doc",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => ".docx",
        "application/vnd.ms-excel" => ".xls",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => ".xlsx",
        "application/epub+zip" => ".epub",
        "application/octet-stream" => ".bin",
        "image/jpeg" => ".jpg",
        "image/pjpeg" | "image/jfif" => ".jfif",
        "image/png" => ".png",
        "image/gif" => ".gif",
        "image/webp" => ".webp",
        "image/bmp" => ".bmp",
        "image/svg+xml" => ".svg",
        "image/x-icon" | "image/vnd.microsoft.icon" => ".ico",
        "image/tiff" => ".tif",
        "audio/mpeg" => ".mp3",
        "audio/ogg" => ".ogg",
        "audio/wav" | "audio/x-wav" => ".wav",
        "video/mp4" => ".mp4",
        "video/webm" => ".webm",
        "video/quicktime" => ".mov",
        "font/woff" => ".woff",
        "font/woff2" => ".woff2",
        _ => return None,
    };
    Some(extension)
}

/// Maps MIME types to canonical file extensions.
#[derive(Clone)]
pub struct ExtensionResolver {
    lookup: Arc<dyn ExtensionLookup>,
}

impl fmt::Debug for ExtensionResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionResolver").finish_non_exhaustive()
    }
}

impl Default for ExtensionResolver {
    fn default() -> Self {
        Self::new(Arc::new(BuiltinExtensionTable))
    }
}

impl ExtensionResolver {
    /// Creates a resolver backed by `lookup`.
    #[must_use]
    pub fn new(lookup: Arc<dyn ExtensionLookup>) -> Self {
        Self { lookup }
    }

    /// Resolves the extension for `mime_type`, falling back to `default`.
    ///
    /// Parameters after `;` are ignored. The result is lower-case with a
    /// leading dot, or empty when both lookup and default are empty.
    ///
    /// # Example
    ///
    /// ```
    /// use fetcher_core::download::ExtensionResolver;
    ///
    /// let resolver = ExtensionResolver::default();
    /// assert_eq!(resolver.resolve(Some("text/html; charset=utf-8"), ".txt"), ".htm");
    /// assert_eq!(resolver.resolve(Some("application/x-unknown"), ".dat"), ".dat");
    /// assert_eq!(resolver.resolve(None, ".jfif"), ".jpg");
    /// ```
    #[must_use]
    pub fn resolve(&self, mime_type: Option<&str>, default: &str) -> String {
        let essence = mime_type
            .and_then(|value| value.split(';').next())
            .map(str::trim)
            .unwrap_or_default();

        let found = if essence.is_empty() {
            None
        } else {
            match self.lookup.lookup_extension(essence) {
                Ok(found) => found.filter(|ext| !ext.trim().trim_start_matches('.').is_empty()),
                Err(error) => {
                    debug!(mime = essence, %error, "extension lookup failed, using default");
                    None
                }
            }
        };

        apply_overrides(normalize(found.as_deref().unwrap_or(default)))
    }
}

fn normalize(extension: &str) -> String {
    let trimmed = extension.trim().trim_start_matches('.');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(".{}", trimmed.to_lowercase())
    }
}

fn apply_overrides(extension: String) -> String {
    match extension.as_str() {
        ".html" => ".htm".to_string(),
        ".jfif" => ".jpg".to_string(),
        _ => extension,
    }
}
