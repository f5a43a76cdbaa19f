//! Per-job download state machine.
//!
//! [`DownloadEngine::run_one`] drives a single [`Job`] from validation to a
//! terminal state: it reserves the destination, issues requests through the
//! injected [`Transport`], interprets each response, retries according to the
//! [`RetryBudget`] and finally persists, renames and timestamps the result.
//!
//! Only disk exhaustion escapes as an error ([`FatalError`]); every other
//! failure is recorded on the returned job.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use fetcher_core::JobRequest;
//! use fetcher_core::download::{DownloadEngine, EngineConfig, ReqwestTransport};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = Arc::new(ReqwestTransport::new()?);
//! let engine = DownloadEngine::new(transport, EngineConfig::default());
//! let job = engine
//!     .fetch(JobRequest::new("https://example.com/logo").with_destination("./downloads/logo"))
//!     .await?;
//! if let Some(error) = job.last_error() {
//!     eprintln!("failed: {error}");
//! }
//! # Ok(())
//! # }
//! ```

mod persistence;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use reqwest::header::{
    ACCEPT_LANGUAGE, CONTENT_TYPE, COOKIE, HeaderMap, HeaderName, HeaderValue, REFERER,
    USER_AGENT,
};
use reqwest::{Method, StatusCode};
use tracing::{debug, info, instrument, warn};
use url::Url;

use self::persistence::{CapturedBody, capture_body, oversized_placeholder, stream_to_file};
use super::config::EngineConfig;
use super::extension::{ExtensionLookup, ExtensionResolver};
use super::file_times::{FileTimestamps, StdFileTimestamps};
use super::filename::{ReserveError, extension_of, reserve_unique_path};
use super::response::{
    content_length, content_type, has_refresh, last_modified, merge_cookies, redirect_target,
};
use super::retry::{RetryBudget, RetryDecision, classify_error};
use super::transport::{Transport, TransportRequest, TransportResponse};
use super::{DownloadError, FatalError, is_disk_full};
use crate::job::{ErrorKind, Job, JobRequest};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// How a successful attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    /// Body written to the destination file.
    Saved,
    /// Body stored on the job.
    Captured,
    /// Empty response that still issued a cookie.
    CookieOnly,
}

/// Executes jobs one at a time against an injected transport.
///
/// The engine holds no per-job state, so one instance can be shared across
/// concurrent tasks.
pub struct DownloadEngine {
    transport: Arc<dyn Transport>,
    extensions: ExtensionResolver,
    file_times: Arc<dyn FileTimestamps>,
    config: EngineConfig,
}

impl std::fmt::Debug for DownloadEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadEngine")
            .field("extensions", &self.extensions)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DownloadEngine {
    /// Creates an engine using the builtin extension table and std file times.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, config: EngineConfig) -> Self {
        Self {
            transport,
            extensions: ExtensionResolver::default(),
            file_times: Arc::new(StdFileTimestamps),
            config,
        }
    }

    /// Replaces the MIME type lookup backing extension resolution.
    #[must_use]
    pub fn with_extension_lookup(mut self, lookup: Arc<dyn ExtensionLookup>) -> Self {
        self.extensions = ExtensionResolver::new(lookup);
        self
    }

    /// Replaces the file timestamp capability.
    #[must_use]
    pub fn with_file_timestamps(mut self, file_times: Arc<dyn FileTimestamps>) -> Self {
        self.file_times = file_times;
        self
    }

    /// The configuration this engine was built with.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Builds a job from `request` and runs it.
    ///
    /// # Errors
    ///
    /// See [`run_one`](Self::run_one).
    pub async fn fetch(&self, request: JobRequest) -> Result<Job, FatalError> {
        self.run_one(Job::from(request)).await
    }

    /// Runs `job` to a terminal state.
    ///
    /// On return, `last_error` is `None` for a success and describes the
    /// failure otherwise. Files created during a failed run are removed and
    /// the destination reverts to the requested path.
    ///
    /// # Errors
    ///
    /// Returns [`FatalError::DiskFull`] when storage is exhausted. The job
    /// inside the error has already been cleaned up.
    #[instrument(skip(self, job), fields(url = %job.url(), seq = job.sequence_number()))]
    pub async fn run_one(&self, mut job: Job) -> Result<Job, FatalError> {
        job.set_last_error(None);
        let requested = job.destination().map(Path::to_path_buf);
        let mut created = CreatedFiles::default();
        let mut budget = RetryBudget::new(self.config.retry_backoff);
        let mut attempts: u32 = 0;

        let mut pending = self.prepare(&mut job, &mut created).await.err();
        loop {
            let error = match pending.take() {
                Some(error) => error,
                None => {
                    attempts += 1;
                    match self.attempt(&mut job).await {
                        Ok(outcome) => match self.complete(&mut job, outcome, &mut created).await {
                            Ok(()) => {
                                created.keep();
                                info!(
                                    destination = ?job.destination(),
                                    mime = job.mime_type().unwrap_or("unknown"),
                                    attempts,
                                    "download complete"
                                );
                                return Ok(job);
                            }
                            Err(error) => error,
                        },
                        Err(error) => error,
                    }
                }
            };

            let kind = classify_error(&error);
            if kind != ErrorKind::RedirectUpdate {
                job.record_failure();
            }

            if kind == ErrorKind::DiskFull {
                let job_error = error.to_job_error(kind);
                created.remove_all().await;
                job.set_destination(requested.clone());
                job.set_last_error(Some(job_error));
                if let DownloadError::Io { path, source } = error {
                    warn!(path = %path.display(), error = %source, "disk full, aborting");
                    return Err(FatalError::DiskFull {
                        path,
                        source,
                        job: Box::new(job),
                    });
                }
                return Ok(job);
            }

            let retryable = !matches!(
                kind,
                ErrorKind::Argument
                    | ErrorKind::RedirectLoop
                    | ErrorKind::ServerError
                    | ErrorKind::EmptyResponse
                    | ErrorKind::Unknown
            );
            if retryable && attempts >= self.config.max_attempts {
                // The redirect target was never fetched; report the last URL tried.
                let error = match error {
                    DownloadError::Redirect { from, .. } => {
                        job.set_url(from.as_str());
                        DownloadError::AttemptsExhausted {
                            url: from,
                            attempts,
                        }
                    }
                    other => other,
                };
                return Ok(fail_job(job, &error, &mut created, requested).await);
            }

            match budget.decide(kind) {
                RetryDecision::Immediately => {
                    debug!(url = job.url(), "following redirect");
                }
                RetryDecision::Backoff(delay) => {
                    debug!(error = %error, delay_ms = delay.as_millis(), "retrying after backoff");
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::ToggleScheme => match toggled_scheme(job.url()) {
                    Some(url) => {
                        debug!(error = %error, to = %url, "retrying with other scheme");
                        job.set_url(url);
                    }
                    None => return Ok(fail_job(job, &error, &mut created, requested).await),
                },
                RetryDecision::DoNotRetry { reason } => {
                    debug!(reason, "not retrying");
                    return Ok(fail_job(job, &error, &mut created, requested).await);
                }
            }
        }
    }

    /// Validates the URL and reserves the destination placeholder.
    async fn prepare(
        &self,
        job: &mut Job,
        created: &mut CreatedFiles,
    ) -> Result<(), DownloadError> {
        parse_url(job.url())?;
        if let Some(candidate) = job.destination().map(Path::to_path_buf) {
            let reserved = reserve(candidate).await?;
            debug!(path = %reserved.display(), "reserved destination");
            created.push(reserved.clone());
            job.set_destination(Some(reserved));
        }
        Ok(())
    }

    /// Issues one request and interprets the response.
    async fn attempt(&self, job: &mut Job) -> Result<Outcome, DownloadError> {
        let url = parse_url(job.url())?;
        let request = self.build_request(job, url);
        let TransportResponse {
            status,
            headers,
            final_url,
            body,
        } = self
            .transport
            .send(request)
            .await
            .map_err(|e| DownloadError::transport(job.url(), e))?;

        debug!(status = status.as_u16(), final_url = %final_url, "response received");
        if final_url.as_str() != job.url() {
            job.set_url(final_url.as_str());
        }
        let cookies = merge_cookies(job.cookie(), &headers);
        job.set_cookie(cookies.merged);
        job.set_last_modified(last_modified(&headers));
        let (mime_type, charset) = content_type(&headers);
        job.set_content_type(mime_type, charset);

        if status.is_client_error() || status.is_server_error() {
            return Err(DownloadError::http_status(job.url(), status.as_u16()));
        }

        if status.is_redirection() || has_refresh(&headers) {
            match redirect_target(status, &headers, &final_url) {
                Some(target) if target == final_url => {
                    return Err(DownloadError::RedirectLoop {
                        url: job.url().to_string(),
                    });
                }
                Some(target) => {
                    let from = job.url().to_string();
                    job.set_url(target.as_str());
                    return Err(DownloadError::Redirect {
                        from,
                        to: target.to_string(),
                    });
                }
                None if status.is_redirection() => {
                    return Err(DownloadError::http_status(job.url(), status.as_u16()));
                }
                None => {}
            }
        }

        let empty = DownloadError::EmptyResponse {
            url: job.url().to_string(),
            status: status.as_u16(),
        };
        if status == StatusCode::NO_CONTENT || content_length(&headers) == Some(0) {
            return if cookies.obtained {
                Ok(Outcome::CookieOnly)
            } else {
                Err(empty)
            };
        }

        match job.destination().map(Path::to_path_buf) {
            Some(path) => {
                let written = stream_to_file(body, job.url(), &path).await?;
                debug!(bytes = written, path = %path.display(), "body written");
                if written == 0 {
                    return if cookies.obtained {
                        Ok(Outcome::CookieOnly)
                    } else {
                        Err(empty)
                    };
                }
                Ok(Outcome::Saved)
            }
            None => {
                let limit = self.config.max_in_memory_body;
                let captured = capture_body(body, job.url(), job.charset(), limit).await?;
                match captured {
                    CapturedBody::Empty if cookies.obtained => Ok(Outcome::CookieOnly),
                    CapturedBody::Empty => Err(empty),
                    CapturedBody::Text(text) | CapturedBody::Base64(text) => {
                        job.set_body(Some(text));
                        Ok(Outcome::Captured)
                    }
                    CapturedBody::Oversized => {
                        job.set_body(Some(oversized_placeholder(job.mime_type(), limit)));
                        Ok(Outcome::Captured)
                    }
                }
            }
        }
    }

    fn build_request(&self, job: &Job, url: Url) -> TransportRequest {
        let mut headers = HeaderMap::new();
        insert_header(&mut headers, USER_AGENT, &self.config.user_agent);
        insert_header(&mut headers, ACCEPT_LANGUAGE, &self.config.accept_language);
        if let Some(referer) = job.referer() {
            insert_header(&mut headers, REFERER, referer);
        }
        if let Some(cookie) = job.cookie() {
            insert_header(&mut headers, COOKIE, cookie);
        }

        let method = if job.body().is_some() {
            insert_header(&mut headers, CONTENT_TYPE, FORM_CONTENT_TYPE);
            Method::POST
        } else {
            Method::GET
        };

        TransportRequest {
            method,
            url,
            headers,
            body: job.body().map(str::to_string),
        }
    }

    /// Applies the side effects of a successful attempt.
    async fn complete(
        &self,
        job: &mut Job,
        outcome: Outcome,
        created: &mut CreatedFiles,
    ) -> Result<(), DownloadError> {
        match outcome {
            Outcome::Captured => Ok(()),
            Outcome::CookieOnly => {
                debug!("empty response issued a cookie, treating as success");
                created.remove_all().await;
                job.set_destination(None);
                Ok(())
            }
            Outcome::Saved => {
                self.adjust_extension(job, created).await?;
                self.stamp(job).await
            }
        }
    }

    /// Renames the download when its MIME type maps to another extension.
    async fn adjust_extension(
        &self,
        job: &mut Job,
        created: &mut CreatedFiles,
    ) -> Result<(), DownloadError> {
        let Some(current) = job.destination().map(Path::to_path_buf) else {
            return Ok(());
        };
        let current_extension = extension_of(&current);
        let resolved = self.extensions.resolve(job.mime_type(), &current_extension);
        if resolved.eq_ignore_ascii_case(&current_extension) {
            return Ok(());
        }

        let candidate = current.with_extension(resolved.trim_start_matches('.'));
        let target = reserve(candidate).await?;
        created.push(target.clone());
        tokio::fs::remove_file(&target)
            .await
            .map_err(|e| DownloadError::io(&target, e))?;
        tokio::fs::rename(&current, &target)
            .await
            .map_err(|e| DownloadError::io(&target, e))?;
        debug!(
            from = %current.display(),
            to = %target.display(),
            "renamed to match content type"
        );
        job.set_destination(Some(target));
        Ok(())
    }

    /// Stamps the destination with the response timestamp.
    async fn stamp(&self, job: &Job) -> Result<(), DownloadError> {
        let (Some(path), Some(when)) = (job.destination(), job.last_modified()) else {
            return Ok(());
        };
        let file_times = Arc::clone(&self.file_times);
        let target = path.to_path_buf();
        let stamped = tokio::task::spawn_blocking(move || {
            file_times.set_timestamps(&target, Some(when), Some(when), Some(when))
        })
        .await
        .unwrap_or_else(|e| Err(io::Error::other(e)));
        match stamped {
            Ok(()) => Ok(()),
            Err(error) if is_disk_full(&error) => Err(DownloadError::io(path, error)),
            Err(error) => {
                warn!(path = %path.display(), error = %error, "could not set file timestamps");
                Ok(())
            }
        }
    }
}

/// Records `error` as the terminal failure and cleans up the run.
async fn fail_job(
    mut job: Job,
    error: &DownloadError,
    created: &mut CreatedFiles,
    requested: Option<PathBuf>,
) -> Job {
    let kind = classify_error(error);
    created.remove_all().await;
    job.set_destination(requested);

    if kind == ErrorKind::Unknown {
        if cfg!(debug_assertions) {
            warn!(error = ?error, failures = job.failure_count(), "download failed");
        } else {
            warn!(error = %error, failures = job.failure_count(), "download failed");
        }
    } else {
        warn!(
            kind = %kind,
            status = ?error.status(),
            error = %error,
            failures = job.failure_count(),
            "download failed"
        );
    }

    job.set_last_error(Some(error.to_job_error(kind)));
    job
}

fn parse_url(raw: &str) -> Result<Url, DownloadError> {
    match Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => Ok(url),
        _ => Err(DownloadError::invalid_url(raw)),
    }
}

fn toggled_scheme(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw).ok()?;
    let other = match url.scheme() {
        "https" => "http",
        "http" => "https",
        _ => return None,
    };
    url.set_scheme(other).ok()?;
    Some(url.into())
}

fn insert_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => debug!(header = %name, "skipping header with invalid value"),
    }
}

fn reserve_error(error: ReserveError) -> DownloadError {
    match error {
        ReserveError::InvalidPath { path } => DownloadError::invalid_destination(path),
        ReserveError::DiskFull { path, source } | ReserveError::Io { path, source } => {
            DownloadError::io(path, source)
        }
    }
}

/// Reserves `candidate` on the blocking pool; the reservation lock is held there.
async fn reserve(candidate: PathBuf) -> Result<PathBuf, DownloadError> {
    let path = candidate.clone();
    tokio::task::spawn_blocking(move || reserve_unique_path(&candidate).map_err(reserve_error))
        .await
        .map_err(|e| DownloadError::io(path, io::Error::other(e)))?
}

/// Files created during one run.
///
/// Paths still tracked when the guard drops (a panic or a cancelled future)
/// are removed synchronously.
#[derive(Debug, Default)]
struct CreatedFiles {
    paths: Vec<PathBuf>,
}

impl CreatedFiles {
    fn push(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    /// Stops tracking every file so the drop leaves them in place.
    fn keep(&mut self) {
        self.paths.clear();
    }

    /// Deletes tracked files; missing files are ignored.
    async fn remove_all(&mut self) {
        for path in std::mem::take(&mut self.paths) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(path = %path.display(), "removed partial file"),
                Err(error) if error.kind() == io::ErrorKind::NotFound => {}
                Err(error) => {
                    warn!(path = %path.display(), error = %error, "could not remove partial file");
                }
            }
        }
    }
}

impl Drop for CreatedFiles {
    fn drop(&mut self) {
        for path in self.paths.drain(..) {
            if std::fs::remove_file(&path).is_ok() {
                debug!(path = %path.display(), "removed file left by an interrupted job");
            }
        }
    }
}
