//! Error types for the download module.
//!
//! [`DownloadError`] describes why a single attempt failed; the engine
//! classifies it and turns it into a retry or a terminal [`JobError`].
//! [`FatalError`] is the one condition that escapes the engine.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::transport::TransportError;
use crate::job::{ErrorKind, Job, JobError};

/// Why one fetch attempt failed.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The URL does not parse as an absolute `http`/`https` URL.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The rejected URL string.
        url: String,
    },

    /// The destination path cannot hold a file.
    #[error("unusable destination path {path}")]
    InvalidDestination {
        /// The rejected path.
        path: PathBuf,
    },

    /// The transport failed before a complete response was received.
    #[error("transport error fetching {url}: {source}")]
    Transport {
        /// The URL being fetched.
        url: String,
        /// The underlying transport error.
        #[source]
        source: TransportError,
    },

    /// The server answered with a 4xx/5xx status, or a 3xx without a target.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The URL that returned the status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// 3xx or `Refresh` pointing to a new URL.
    #[error("redirected from {from} to {to}")]
    Redirect {
        /// URL before the redirect.
        from: String,
        /// Redirect target, already applied to the job.
        to: String,
    },

    /// Redirect target equals the current URL.
    #[error("redirect loop at {url}")]
    RedirectLoop {
        /// The URL redirecting to itself.
        url: String,
    },

    /// Attempt ceiling reached without a terminal answer.
    #[error("no terminal response for {url} after {attempts} attempts")]
    AttemptsExhausted {
        /// The last URL tried.
        url: String,
        /// Attempts made.
        attempts: u32,
    },

    /// 204 or zero-length body.
    #[error("empty response (HTTP {status}) fetching {url}")]
    EmptyResponse {
        /// The URL that returned no content.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// File system error while reserving, writing or renaming the destination.
    #[error("IO error at {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },
}

impl DownloadError {
    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates an invalid destination error.
    pub fn invalid_destination(path: impl Into<PathBuf>) -> Self {
        Self::InvalidDestination { path: path.into() }
    }

    /// Creates a transport error.
    pub fn transport(url: impl Into<String>, source: TransportError) -> Self {
        Self::Transport {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// HTTP status reported alongside this error, if any.
    ///
    /// Redirect loops report 409 (Conflict).
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } | Self::EmptyResponse { status, .. } => Some(*status),
            Self::RedirectLoop { .. } | Self::AttemptsExhausted { .. } => Some(409),
            _ => None,
        }
    }

    /// True when the error is caused by exhausted storage.
    #[must_use]
    pub fn is_disk_full(&self) -> bool {
        matches!(self, Self::Io { source, .. } if is_disk_full(source))
    }

    pub(crate) fn to_job_error(&self, kind: ErrorKind) -> JobError {
        JobError::new(kind, self.status(), self.to_string())
    }
}

// Note: no From<io::Error> / From<TransportError> impls. Every variant needs
// the URL or path for context, so the helper constructors are used instead.

/// Condition that aborts the whole batch, not just the job.
#[derive(Debug, Error)]
pub enum FatalError {
    /// Storage exhausted while writing a destination.
    #[error("disk full at {path}: {source}")]
    DiskFull {
        /// The path being written when space ran out.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: io::Error,
        /// The job as it stood after cleanup.
        job: Box<Job>,
    },
}

impl FatalError {
    /// The job that triggered the abort.
    #[must_use]
    pub fn job(&self) -> &Job {
        match self {
            Self::DiskFull { job, .. } => job,
        }
    }
}

/// Returns true when `error` reports exhausted storage.
///
/// Inspects the raw OS error code (`ENOSPC`/`EDQUOT` on unix,
/// `ERROR_DISK_FULL`/`ERROR_HANDLE_DISK_FULL` on Windows) before falling back
/// to [`io::ErrorKind::StorageFull`].
#[must_use]
pub fn is_disk_full(error: &io::Error) -> bool {
    if error.raw_os_error().is_some_and(is_disk_full_code) {
        return true;
    }
    error.kind() == io::ErrorKind::StorageFull
}

#[cfg(unix)]
fn is_disk_full_code(code: i32) -> bool {
    code == libc::ENOSPC || code == libc::EDQUOT
}

#[cfg(windows)]
fn is_disk_full_code(code: i32) -> bool {
    use windows_sys::Win32::Foundation::{ERROR_DISK_FULL, ERROR_HANDLE_DISK_FULL};

    u32::try_from(code).is_ok_and(|code| code == ERROR_DISK_FULL || code == ERROR_HANDLE_DISK_FULL)
}

#[cfg(not(any(unix, windows)))]
fn is_disk_full_code(_code: i32) -> bool {
    false
}
