//! Unique destination path reservation and filename helpers.
//!
//! [`reserve_unique_path`] claims a destination that does not exist yet by
//! leaving a zero-byte placeholder file behind. Colliding candidates are
//! versioned as `name(01).ext`, `name(02).ext`, ... after stripping any
//! existing `(NN)` suffix from the stem.

use std::fs::OpenOptions;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

use super::constants::DEFAULT_EXTENSION;
use super::error::is_disk_full;

// Serializes check-then-create for every reservation in the process.
static RESERVATION_LOCK: Mutex<()> = Mutex::new(());

/// Why a destination could not be reserved.
#[derive(Debug, Error)]
pub enum ReserveError {
    /// The candidate does not name a usable file location.
    #[error("invalid destination path: {path}")]
    InvalidPath {
        /// The rejected candidate.
        path: PathBuf,
    },

    /// Storage is exhausted.
    #[error("disk full reserving {path}: {source}")]
    DiskFull {
        /// The path being created.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Any other file system failure (permissions, read-only volume, ...).
    #[error("IO error reserving {path}: {source}")]
    Io {
        /// The path being created.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },
}

impl ReserveError {
    fn from_io(path: &Path, source: io::Error) -> Self {
        if is_disk_full(&source) {
            Self::DiskFull {
                path: path.to_path_buf(),
                source,
            }
        } else {
            Self::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

/// Reserves a destination path that did not exist before the call.
///
/// Creates the parent directory when absent and leaves an empty placeholder
/// file at the returned path. Concurrent callers asking for the same
/// candidate always receive distinct paths.
///
/// # Errors
///
/// Returns [`ReserveError::InvalidPath`] when `candidate` has no usable file
/// name, [`ReserveError::DiskFull`] when storage is exhausted, and
/// [`ReserveError::Io`] for other file system failures.
#[instrument(level = "debug", fields(candidate = %candidate.display()))]
pub fn reserve_unique_path(candidate: &Path) -> Result<PathBuf, ReserveError> {
    let candidate = validate_candidate(candidate)?;
    let parent = candidate
        .parent()
        .ok_or_else(|| ReserveError::InvalidPath {
            path: candidate.clone(),
        })?;
    let (stem, extension) = split_file_name(&candidate)?;
    let base_stem = strip_version_suffix(&stem);

    let _guard = RESERVATION_LOCK
        .lock()
        .unwrap_or_else(PoisonError::into_inner);

    std::fs::create_dir_all(parent).map_err(|e| ReserveError::from_io(parent, e))?;

    if try_create_placeholder(&candidate)? {
        debug!(path = %candidate.display(), "reserved destination");
        return Ok(candidate);
    }

    let mut version: u64 = 1;
    loop {
        let path = parent.join(format!("{base_stem}({version:02}){extension}"));
        if try_create_placeholder(&path)? {
            debug!(path = %path.display(), version, "reserved versioned destination");
            return Ok(path);
        }
        version += 1;
    }
}

/// Creates an empty file at `path` unless something already exists there.
fn try_create_placeholder(path: &Path) -> Result<bool, ReserveError> {
    if path.exists() {
        return Ok(false);
    }
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(ReserveError::from_io(path, e)),
    }
}

fn validate_candidate(candidate: &Path) -> Result<PathBuf, ReserveError> {
    let invalid = || ReserveError::InvalidPath {
        path: candidate.to_path_buf(),
    };

    if candidate.as_os_str().is_empty() {
        return Err(invalid());
    }
    if !matches!(candidate.components().next_back(), Some(Component::Normal(_))) {
        return Err(invalid());
    }
    let absolute = std::path::absolute(candidate).map_err(|_| invalid())?;
    if absolute.is_dir() {
        return Err(invalid());
    }
    Ok(absolute)
}

/// Splits a path's file name into `(stem, extension)`; the extension keeps
/// its leading dot and is empty when absent.
fn split_file_name(path: &Path) -> Result<(String, String), ReserveError> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| ReserveError::InvalidPath {
            path: path.to_path_buf(),
        })?;
    Ok(match file_name.rfind('.') {
        Some(pos) if pos > 0 => (file_name[..pos].to_string(), file_name[pos..].to_string()),
        _ => (file_name.to_string(), String::new()),
    })
}

/// Removes a trailing `(digits)` group from `stem`.
///
/// `report(03)` becomes `report`; `report(v2)` and `(01)` are left alone.
pub(crate) fn strip_version_suffix(stem: &str) -> &str {
    let Some(without_close) = stem.strip_suffix(')') else {
        return stem;
    };
    let Some(open) = without_close.rfind('(') else {
        return stem;
    };
    let digits = &without_close[open + 1..];
    if open == 0 || digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return stem;
    }
    &stem[..open]
}

/// Returns the extension of `path` with a leading dot, lower-cased, or an
/// empty string.
pub(crate) fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_lowercase()))
        .unwrap_or_default()
}

/// Derives a filesystem-safe file name from the last path segment of `url`.
///
/// Falls back to `download.bin` when the URL has no usable segment.
#[must_use]
pub fn filename_from_url(url: &str) -> String {
    let fallback = || format!("download{DEFAULT_EXTENSION}");
    let Ok(parsed) = Url::parse(url) else {
        return fallback();
    };
    let Some(last) = parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
    else {
        return fallback();
    };

    let decoded = urlencoding::decode(last).unwrap_or_else(|e| {
        debug!(segment = %last, error = %e, "URL decoding failed, using raw segment");
        last.into()
    });
    let sanitized = sanitize_filename(&decoded);
    if sanitized.trim_matches('_').is_empty() {
        fallback()
    } else {
        sanitized
    }
}

/// Sanitizes filename for filesystem safety.
///
/// Replaces characters that are invalid on common filesystems:
/// / \ : * ? " < > |
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    // "." and ".." are not file names
    if sanitized.chars().all(|c| c == '.') {
        sanitized.replace('.', "_")
    } else {
        sanitized
    }
}
