//! Failure classification and the per-run retry budget.
//!
//! When an attempt fails, the [`DownloadError`] is classified into an
//! [`ErrorKind`] and the [`RetryBudget`] of the current run decides what
//! happens next:
//!
//! | Kind               | Decision                                   |
//! |--------------------|--------------------------------------------|
//! | `TrustFailure`     | toggle `http` ↔ `https`, once per run      |
//! | `TransientNetwork` | wait the fixed backoff, once per run       |
//! | `RedirectUpdate`   | retry immediately (attempt ceiling applies)|
//! | anything else      | terminal                                   |
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use fetcher_core::ErrorKind;
//! use fetcher_core::download::{RetryBudget, RetryDecision};
//!
//! let mut budget = RetryBudget::new(Duration::from_secs(2));
//! assert_eq!(
//!     budget.decide(ErrorKind::TransientNetwork),
//!     RetryDecision::Backoff(Duration::from_secs(2))
//! );
//! assert!(matches!(
//!     budget.decide(ErrorKind::TransientNetwork),
//!     RetryDecision::DoNotRetry { .. }
//! ));
//! ```

use std::time::Duration;

use tracing::{debug, instrument};

use super::DownloadError;
use super::transport::TransportError;
use crate::job::ErrorKind;

/// Retries allowed per condition type within one run.
const MAX_RETRIES_PER_CONDITION: u32 = 1;

/// What to do after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Switch the URL scheme (`http` ↔ `https`) and retry at once.
    ToggleScheme,
    /// Sleep for the given delay, then retry.
    Backoff(Duration),
    /// Retry at once; the job URL was already updated.
    Immediately,
    /// Give up.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Per-run retry counters.
///
/// A fresh budget is created every time the engine runs a job, so a job
/// re-queued by the batch scheduler gets its retries back.
#[derive(Debug, Clone)]
pub struct RetryBudget {
    backoff: Duration,
    trust_failures: u32,
    transient_failures: u32,
}

impl RetryBudget {
    /// Creates a budget using `backoff` for transient failures.
    #[must_use]
    pub fn new(backoff: Duration) -> Self {
        Self {
            backoff,
            trust_failures: 0,
            transient_failures: 0,
        }
    }

    /// Records a failure of `kind` and decides whether to retry.
    #[instrument(level = "debug", skip(self))]
    pub fn decide(&mut self, kind: ErrorKind) -> RetryDecision {
        match kind {
            ErrorKind::TrustFailure => {
                self.trust_failures += 1;
                if self.trust_failures <= MAX_RETRIES_PER_CONDITION {
                    debug!(failures = self.trust_failures, "toggling scheme after trust failure");
                    RetryDecision::ToggleScheme
                } else {
                    exhausted(kind)
                }
            }
            ErrorKind::TransientNetwork => {
                self.transient_failures += 1;
                if self.transient_failures <= MAX_RETRIES_PER_CONDITION {
                    debug!(
                        failures = self.transient_failures,
                        delay_ms = self.backoff.as_millis(),
                        "backing off after transient failure"
                    );
                    RetryDecision::Backoff(self.backoff)
                } else {
                    exhausted(kind)
                }
            }
            ErrorKind::RedirectUpdate => RetryDecision::Immediately,
            ErrorKind::Argument
            | ErrorKind::RedirectLoop
            | ErrorKind::ServerError
            | ErrorKind::EmptyResponse
            | ErrorKind::DiskFull
            | ErrorKind::Unknown => RetryDecision::DoNotRetry {
                reason: format!("{kind} failures are not retried"),
            },
        }
    }
}

fn exhausted(kind: ErrorKind) -> RetryDecision {
    RetryDecision::DoNotRetry {
        reason: format!("{kind} retry already used"),
    }
}

/// Classifies an attempt error.
///
/// | Error                          | Kind               |
/// |--------------------------------|--------------------|
/// | InvalidUrl, InvalidDestination | `Argument`         |
/// | Transport (TLS)                | `TrustFailure`     |
/// | Transport (other)              | `TransientNetwork` |
/// | HttpStatus                     | `ServerError`      |
/// | Redirect                       | `RedirectUpdate`   |
/// | RedirectLoop, AttemptsExhausted| `RedirectLoop`     |
/// | EmptyResponse                  | `EmptyResponse`    |
/// | Io (ENOSPC and friends)        | `DiskFull`         |
/// | Io (other)                     | `Unknown`          |
#[must_use]
pub fn classify_error(error: &DownloadError) -> ErrorKind {
    match error {
        DownloadError::InvalidUrl { .. } | DownloadError::InvalidDestination { .. } => {
            ErrorKind::Argument
        }
        DownloadError::Transport {
            source: TransportError::Tls(_),
            ..
        } => ErrorKind::TrustFailure,
        DownloadError::Transport { .. } => ErrorKind::TransientNetwork,
        DownloadError::HttpStatus { .. } => ErrorKind::ServerError,
        DownloadError::Redirect { .. } => ErrorKind::RedirectUpdate,
        DownloadError::RedirectLoop { .. } | DownloadError::AttemptsExhausted { .. } => {
            ErrorKind::RedirectLoop
        }
        DownloadError::EmptyResponse { .. } => ErrorKind::EmptyResponse,
        DownloadError::Io { .. } if error.is_disk_full() => ErrorKind::DiskFull,
        DownloadError::Io { .. } => ErrorKind::Unknown,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io;

    use super::*;

    const BACKOFF: Duration = Duration::from_secs(2);

    #[test]
    fn test_trust_failure_toggles_once() {
        let mut budget = RetryBudget::new(BACKOFF);
        assert_eq!(budget.decide(ErrorKind::TrustFailure), RetryDecision::ToggleScheme);
        assert!(matches!(
            budget.decide(ErrorKind::TrustFailure),
            RetryDecision::DoNotRetry { .. }
        ));
    }

    #[test]
    fn test_transient_failure_backs_off_once() {
        let mut budget = RetryBudget::new(BACKOFF);
        assert_eq!(
            budget.decide(ErrorKind::TransientNetwork),
            RetryDecision::Backoff(BACKOFF)
        );
        assert!(matches!(
            budget.decide(ErrorKind::TransientNetwork),
            RetryDecision::DoNotRetry { .. }
        ));
    }

    #[test]
    fn test_conditions_have_independent_budgets() {
        let mut budget = RetryBudget::new(BACKOFF);
        assert_eq!(budget.decide(ErrorKind::TrustFailure), RetryDecision::ToggleScheme);
        assert_eq!(
            budget.decide(ErrorKind::TransientNetwork),
            RetryDecision::Backoff(BACKOFF)
        );
    }

    #[test]
    fn test_redirect_update_always_retries() {
        let mut budget = RetryBudget::new(BACKOFF);
        for _ in 0..5 {
            assert_eq!(budget.decide(ErrorKind::RedirectUpdate), RetryDecision::Immediately);
        }
    }

    #[test]
    fn test_terminal_kinds_never_retry() {
        for kind in [
            ErrorKind::Argument,
            ErrorKind::RedirectLoop,
            ErrorKind::ServerError,
            ErrorKind::EmptyResponse,
            ErrorKind::DiskFull,
            ErrorKind::Unknown,
        ] {
            let mut budget = RetryBudget::new(BACKOFF);
            assert!(
                matches!(budget.decide(kind), RetryDecision::DoNotRetry { .. }),
                "{kind} should be terminal"
            );
        }
    }

    #[test]
    fn test_classify_transport_errors() {
        let tls = DownloadError::transport("https://x", TransportError::Tls("bad cert".into()));
        assert_eq!(classify_error(&tls), ErrorKind::TrustFailure);

        for source in [
            TransportError::Timeout,
            TransportError::Cancelled,
            TransportError::Connect("reset".into()),
            TransportError::Body("eof".into()),
            TransportError::Other("?".into()),
        ] {
            let error = DownloadError::transport("https://x", source);
            assert_eq!(classify_error(&error), ErrorKind::TransientNetwork);
        }
    }

    #[test]
    fn test_classify_response_errors() {
        assert_eq!(
            classify_error(&DownloadError::http_status("https://x", 503)),
            ErrorKind::ServerError
        );
        assert_eq!(
            classify_error(&DownloadError::RedirectLoop { url: "https://x".into() }),
            ErrorKind::RedirectLoop
        );
        assert_eq!(
            classify_error(&DownloadError::EmptyResponse {
                url: "https://x".into(),
                status: 204
            }),
            ErrorKind::EmptyResponse
        );
        assert_eq!(
            classify_error(&DownloadError::invalid_url("nope")),
            ErrorKind::Argument
        );
    }

    #[test]
    fn test_classify_io_errors() {
        let denied = DownloadError::io(
            "/tmp/x",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(classify_error(&denied), ErrorKind::Unknown);

        let full = DownloadError::io("/tmp/x", io::Error::new(io::ErrorKind::StorageFull, "full"));
        assert_eq!(classify_error(&full), ErrorKind::DiskFull);
    }
}
