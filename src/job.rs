//! Job records: one logical fetch request and its outcome.
//!
//! Callers describe a fetch with a [`JobRequest`] and turn it into a [`Job`].
//! From then on only the download engine can change the response side of the
//! record (final URL, MIME type, timestamps, failure bookkeeping, resolved
//! destination); callers get read-only accessors.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::Serialize;

/// Caller-owned description of a single fetch.
///
/// # Example
///
/// ```
/// use fetcher_core::JobRequest;
///
/// let request = JobRequest::new("https://example.com/report.pdf")
///     .with_destination("/tmp/report.pdf")
///     .with_referer("https://example.com/");
/// assert_eq!(request.url(), "https://example.com/report.pdf");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobRequest {
    url: String,
    destination: Option<PathBuf>,
    referer: Option<String>,
    cookie: Option<String>,
    body: Option<String>,
    sequence_number: u64,
}

impl JobRequest {
    /// Creates a request for `url` with in-memory capture.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Sets the file the response should be written to.
    ///
    /// An empty path keeps in-memory capture.
    #[must_use]
    pub fn with_destination(mut self, destination: impl Into<PathBuf>) -> Self {
        let destination = destination.into();
        self.destination = (!destination.as_os_str().is_empty()).then_some(destination);
        self
    }

    /// Sets the `Referer` header sent with the request.
    #[must_use]
    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = non_empty(referer.into());
        self
    }

    /// Sets the `Cookie` header sent with the request.
    #[must_use]
    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = non_empty(cookie.into());
        self
    }

    /// Sets a request payload; a non-empty body turns the request into a POST.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = non_empty(body.into());
        self
    }

    /// Sets the diagnostic sequence number used to correlate log lines.
    #[must_use]
    pub fn with_sequence_number(mut self, sequence_number: u64) -> Self {
        self.sequence_number = sequence_number;
        self
    }

    /// The requested URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The requested destination, if any.
    #[must_use]
    pub fn destination(&self) -> Option<&Path> {
        self.destination.as_deref()
    }

    /// The diagnostic sequence number.
    #[must_use]
    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

/// Classification of a job failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Invalid URL or unusable destination path.
    Argument,
    /// Connection reset, timeout, cancellation or another transport fault.
    TransientNetwork,
    /// TLS trust or certificate validation failure.
    TrustFailure,
    /// 3xx or `Refresh` pointing at a new URL. Never terminal.
    RedirectUpdate,
    /// Redirect pointing back at the current URL, or no progress within the
    /// attempt ceiling.
    RedirectLoop,
    /// 4xx/5xx status without special handling.
    ServerError,
    /// 204 or zero-length body without a session cookie.
    EmptyResponse,
    /// Storage exhausted; aborts the whole batch.
    DiskFull,
    /// Anything else.
    Unknown,
}

impl ErrorKind {
    /// Short machine-friendly label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Argument => "argument",
            Self::TransientNetwork => "transient_network",
            Self::TrustFailure => "trust_failure",
            Self::RedirectUpdate => "redirect_update",
            Self::RedirectLoop => "redirect_loop",
            Self::ServerError => "server_error",
            Self::EmptyResponse => "empty_response",
            Self::DiskFull => "disk_full",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured description of the last failure recorded on a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobError {
    kind: ErrorKind,
    status: Option<u16>,
    message: String,
}

impl JobError {
    pub(crate) fn new(kind: ErrorKind, status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            message: message.into(),
        }
    }

    /// Failure classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// HTTP status associated with the failure, if any.
    ///
    /// Redirect loops report 409 (Conflict).
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "[{}] HTTP {status}: {}", self.kind, self.message),
            None => write!(f, "[{}] {}", self.kind, self.message),
        }
    }
}

/// One download request/response record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Job {
    url: String,
    destination: Option<PathBuf>,
    referer: Option<String>,
    cookie: Option<String>,
    body: Option<String>,
    mime_type: Option<String>,
    charset: Option<String>,
    last_modified: Option<SystemTime>,
    failure_count: u32,
    last_error: Option<JobError>,
    sequence_number: u64,
}

impl From<JobRequest> for Job {
    fn from(request: JobRequest) -> Self {
        Self {
            url: request.url,
            destination: request.destination,
            referer: request.referer,
            cookie: request.cookie,
            body: request.body,
            mime_type: None,
            charset: None,
            last_modified: None,
            failure_count: 0,
            last_error: None,
            sequence_number: request.sequence_number,
        }
    }
}

impl Job {
    /// Current URL; after a run this is the server's final URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Destination file. After a successful run this is the resolved path,
    /// which may differ from the requested one in name or extension.
    #[must_use]
    pub fn destination(&self) -> Option<&Path> {
        self.destination.as_deref()
    }

    /// `Referer` sent with the request.
    #[must_use]
    pub fn referer(&self) -> Option<&str> {
        self.referer.as_deref()
    }

    /// Cookie string; merged with server-issued cookies after a run.
    #[must_use]
    pub fn cookie(&self) -> Option<&str> {
        self.cookie.as_deref()
    }

    /// Request payload before a run; captured response payload after an
    /// in-memory run.
    #[must_use]
    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// Response MIME type without parameters.
    #[must_use]
    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    /// Response charset, present for textual responses.
    #[must_use]
    pub fn charset(&self) -> Option<&str> {
        self.charset.as_deref()
    }

    /// Response `Last-Modified` (or `Date`, or local time of receipt).
    #[must_use]
    pub fn last_modified(&self) -> Option<SystemTime> {
        self.last_modified
    }

    /// Number of failed attempts recorded on this job across all runs.
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// Last failure, or `None` when the job succeeded.
    #[must_use]
    pub fn last_error(&self) -> Option<&JobError> {
        self.last_error.as_ref()
    }

    /// Diagnostic sequence number.
    #[must_use]
    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    /// True when the last run ended without an error.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.last_error.is_none()
    }

    pub(crate) fn set_url(&mut self, url: impl Into<String>) {
        self.url = url.into();
    }

    pub(crate) fn set_destination(&mut self, destination: Option<PathBuf>) {
        self.destination = destination;
    }

    pub(crate) fn set_cookie(&mut self, cookie: Option<String>) {
        self.cookie = cookie;
    }

    pub(crate) fn set_body(&mut self, body: Option<String>) {
        self.body = body;
    }

    pub(crate) fn set_content_type(&mut self, mime_type: Option<String>, charset: Option<String>) {
        self.mime_type = mime_type;
        self.charset = charset;
    }

    pub(crate) fn set_last_modified(&mut self, last_modified: SystemTime) {
        self.last_modified = Some(last_modified);
    }

    pub(crate) fn record_failure(&mut self) {
        self.failure_count = self.failure_count.saturating_add(1);
    }

    pub(crate) fn set_last_error(&mut self, error: Option<JobError>) {
        self.last_error = error;
    }

    pub(crate) fn set_sequence_number(&mut self, sequence_number: u64) {
        self.sequence_number = sequence_number;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_destination_means_in_memory() {
        let request = JobRequest::new("https://example.com/a").with_destination("");
        assert!(request.destination().is_none());

        let job = Job::from(request);
        assert!(job.destination().is_none());
    }

    #[test]
    fn test_empty_body_is_not_a_payload() {
        let job = Job::from(JobRequest::new("https://example.com/a").with_body(""));
        assert!(job.body().is_none());
    }

    #[test]
    fn test_new_job_has_no_response_metadata() {
        let job = Job::from(
            JobRequest::new("https://example.com/a")
                .with_cookie("sid=1")
                .with_sequence_number(7),
        );
        assert_eq!(job.url(), "https://example.com/a");
        assert_eq!(job.cookie(), Some("sid=1"));
        assert_eq!(job.sequence_number(), 7);
        assert!(job.mime_type().is_none());
        assert!(job.last_modified().is_none());
        assert_eq!(job.failure_count(), 0);
        assert!(job.is_success());
    }

    #[test]
    fn test_job_error_display_includes_status_and_kind() {
        let error = JobError::new(ErrorKind::RedirectLoop, Some(409), "redirect loop at /x");
        let msg = error.to_string();
        assert!(msg.contains("redirect_loop"), "missing kind in: {msg}");
        assert!(msg.contains("409"), "missing status in: {msg}");
    }

    #[test]
    fn test_record_failure_marks_job_failed() {
        let mut job = Job::from(JobRequest::new("https://example.com/a"));
        job.record_failure();
        job.set_last_error(Some(JobError::new(ErrorKind::ServerError, Some(404), "gone")));
        assert!(!job.is_success());
        assert_eq!(job.failure_count(), 1);
        assert_eq!(job.last_error().unwrap().status(), Some(404));
    }

    #[test]
    fn test_job_serializes_error_kind_as_snake_case() {
        let mut job = Job::from(JobRequest::new("https://example.com/a"));
        job.set_last_error(Some(JobError::new(ErrorKind::TrustFailure, None, "bad cert")));
        let json = serde_json::to_string(&job).unwrap();
        assert!(json.contains("\"trust_failure\""), "json: {json}");
    }
}
