//! Bounded-concurrency batch execution with an optional retry pass.
//!
//! The [`BatchScheduler`] runs every request through a shared
//! [`DownloadEngine`] using a semaphore-based concurrency limit, collects
//! per-job durations and, when a [`RetryPredicate`] is supplied, re-runs the
//! failed jobs it selects.
//!
//! # Concurrency Model
//!
//! - Each job runs on its own tokio task in a `JoinSet`
//! - A semaphore permit is acquired before a task is spawned and held until
//!   the job reaches a terminal state
//! - A [`FatalError`] from any job raises a shared abort flag; no further
//!   jobs are dispatched, in-flight jobs finish, then the error is returned
//! - A job that panics stays in the report as a failure of kind
//!   [`ErrorKind::Unknown`]
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use fetcher_core::JobRequest;
//! use fetcher_core::batch::{BatchScheduler, Concurrency, retry_transient_failures};
//! use fetcher_core::download::{DownloadEngine, EngineConfig, ReqwestTransport};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = DownloadEngine::new(Arc::new(ReqwestTransport::new()?), EngineConfig::default());
//! let scheduler = BatchScheduler::new(Arc::new(engine));
//! let requests = vec![
//!     JobRequest::new("https://example.com/a.png").with_destination("./out/a.png"),
//!     JobRequest::new("https://example.com/b.png").with_destination("./out/b.png"),
//! ];
//! let report = scheduler
//!     .run_batch(requests, Concurrency::Limited(4), Some(Arc::new(retry_transient_failures)))
//!     .await?;
//! println!("{} ok, {} failed", report.succeeded(), report.failed());
//! # Ok(())
//! # }
//! ```

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use serde::{Serialize, Serializer};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::download::{DownloadEngine, FatalError};
use crate::job::{ErrorKind, Job, JobError, JobRequest};

/// Default number of retry passes after the first pass.
pub const DEFAULT_MAX_RETRY_PASSES: usize = 1;

/// Caller-supplied test deciding whether a failed job is re-run.
pub type RetryPredicate = Arc<dyn Fn(&Job) -> bool + Send + Sync>;

/// How many jobs may run at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Concurrency {
    /// At most `n` jobs in flight; `n` must be at least 1.
    Limited(usize),
    /// No limit.
    Unbounded,
}

impl Concurrency {
    /// Fully serial execution.
    pub const SERIAL: Self = Self::Limited(1);

    fn permits(self) -> Result<usize, BatchError> {
        match self {
            Self::Limited(0) => Err(BatchError::InvalidConcurrency { value: 0 }),
            Self::Limited(n) => Ok(n.min(Semaphore::MAX_PERMITS)),
            Self::Unbounded => Ok(Semaphore::MAX_PERMITS),
        }
    }
}

/// Error type for batch execution.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// Concurrency limit of zero.
    #[error("invalid concurrency value {value}: must be at least 1")]
    InvalidConcurrency {
        /// The rejected value.
        value: usize,
    },

    /// A job hit a condition that stops the whole batch.
    #[error("batch aborted: {0}")]
    Fatal(#[from] FatalError),

    /// Semaphore was closed unexpectedly.
    #[error("semaphore closed unexpectedly")]
    SemaphoreClosed,
}

/// Summary statistics over job durations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DurationStats {
    /// Number of samples.
    pub count: usize,
    /// Total time.
    #[serde(rename = "sum_ms", serialize_with = "as_millis")]
    pub sum: Duration,
    /// Shortest sample.
    #[serde(rename = "min_ms", serialize_with = "as_millis")]
    pub min: Duration,
    /// Longest sample.
    #[serde(rename = "max_ms", serialize_with = "as_millis")]
    pub max: Duration,
    /// `max - min`.
    #[serde(rename = "range_ms", serialize_with = "as_millis")]
    pub range: Duration,
    /// Arithmetic mean.
    #[serde(rename = "mean_ms", serialize_with = "as_millis")]
    pub mean: Duration,
    /// Middle sample; the average of the two middle samples for even counts.
    #[serde(rename = "median_ms", serialize_with = "as_millis")]
    pub median: Duration,
}

impl DurationStats {
    /// Computes statistics over `samples`. Empty input yields all zeros.
    #[must_use]
    pub fn from_samples(samples: &[Duration]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let mut sorted = samples.to_vec();
        sorted.sort_unstable();
        let count = sorted.len();
        let sum: Duration = sorted.iter().sum();
        let min = sorted[0];
        let max = sorted[count - 1];
        let mid = count / 2;
        let median = if count % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2
        } else {
            sorted[mid]
        };
        let mean = u32::try_from(count).map_or(Duration::ZERO, |n| sum / n);

        Self {
            count,
            sum,
            min,
            max,
            range: max - min,
            mean,
            median,
        }
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn as_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64() * 1000.0)
}

/// Outcome of one pass over a set of jobs.
#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
    /// 1 for the first pass, 2 for the first retry pass, and so on.
    pub pass: usize,
    /// Jobs dispatched in this pass.
    pub dispatched: usize,
    /// Jobs that ended without an error.
    pub succeeded: usize,
    /// Jobs that ended with an error.
    pub failed: usize,
    /// Per-job wall-clock durations.
    pub durations: DurationStats,
}

/// Result of [`BatchScheduler::run_batch`].
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    /// One report per pass, in execution order.
    pub passes: Vec<PassReport>,
    /// Final job states, in input order.
    pub jobs: Vec<Job>,
}

impl BatchReport {
    /// Jobs whose final state is a success.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.jobs.iter().filter(|job| job.is_success()).count()
    }

    /// Jobs whose final state is a failure.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.jobs.len() - self.succeeded()
    }
}

/// Stock retry predicate: transient network and TLS trust failures.
#[must_use]
pub fn retry_transient_failures(job: &Job) -> bool {
    job.last_error().is_some_and(|error| {
        matches!(
            error.kind(),
            ErrorKind::TransientNetwork | ErrorKind::TrustFailure
        )
    })
}

/// Runs lists of jobs through a shared engine.
#[derive(Debug, Clone)]
pub struct BatchScheduler {
    engine: Arc<DownloadEngine>,
    max_retry_passes: usize,
}

impl BatchScheduler {
    /// Creates a scheduler with one retry pass.
    #[must_use]
    pub fn new(engine: Arc<DownloadEngine>) -> Self {
        Self {
            engine,
            max_retry_passes: DEFAULT_MAX_RETRY_PASSES,
        }
    }

    /// Sets how many retry passes may follow the first pass.
    #[must_use]
    pub fn with_max_retry_passes(mut self, max_retry_passes: usize) -> Self {
        self.max_retry_passes = max_retry_passes;
        self
    }

    /// Runs every request once, then re-runs failed jobs accepted by `retry`.
    ///
    /// Requests without a sequence number get their 1-based input position.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::InvalidConcurrency`] for `Concurrency::Limited(0)`
    /// and [`BatchError::Fatal`] when a job exhausts storage.
    #[instrument(skip(self, requests, retry), fields(jobs = requests.len()))]
    pub async fn run_batch(
        &self,
        requests: Vec<JobRequest>,
        concurrency: Concurrency,
        retry: Option<RetryPredicate>,
    ) -> Result<BatchReport, BatchError> {
        let permits = concurrency.permits()?;
        info!(?concurrency, "starting batch");

        let work: Vec<(usize, Job)> = requests
            .into_iter()
            .zip(1u64..)
            .map(|(request, position)| {
                let mut job = Job::from(request);
                if job.sequence_number() == 0 {
                    job.set_sequence_number(position);
                }
                job
            })
            .enumerate()
            .collect();
        let total = work.len();
        let (finished, report) = self.run_pass(1, work, permits).await?;
        let mut slots: Vec<Option<Job>> = Vec::new();
        slots.resize_with(total, || None);
        for (index, job) in finished {
            if let Some(slot) = slots.get_mut(index) {
                *slot = Some(job);
            }
        }
        let mut passes = vec![report];

        if let Some(retry) = retry {
            for pass in 2..=self.max_retry_passes + 1 {
                let work: Vec<(usize, Job)> = slots
                    .iter_mut()
                    .enumerate()
                    .filter_map(|(index, slot)| {
                        let eligible = slot
                            .as_ref()
                            .is_some_and(|job| !job.is_success() && retry(job));
                        if eligible {
                            slot.take().map(|job| (index, job))
                        } else {
                            None
                        }
                    })
                    .collect();
                if work.is_empty() {
                    break;
                }

                info!(pass, jobs = work.len(), "starting retry pass");
                let (finished, report) = self.run_pass(pass, work, permits).await?;
                for (index, job) in finished {
                    if let Some(slot) = slots.get_mut(index) {
                        *slot = Some(job);
                    }
                }
                passes.push(report);
            }
        }

        let report = BatchReport {
            passes,
            jobs: slots.into_iter().flatten().collect(),
        };
        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            passes = report.passes.len(),
            "batch complete"
        );
        Ok(report)
    }

    /// Runs one pass. Returned jobs keep their input index.
    async fn run_pass(
        &self,
        pass: usize,
        work: Vec<(usize, Job)>,
        permits: usize,
    ) -> Result<(Vec<(usize, Job)>, PassReport), BatchError> {
        let semaphore = Arc::new(Semaphore::new(permits));
        let abort = Arc::new(AtomicBool::new(false));
        let live = Arc::new(AtomicUsize::new(0));
        let durations = Arc::new(Mutex::new(Vec::with_capacity(work.len())));
        let mut tasks = JoinSet::new();
        let mut finished: Vec<(usize, Job)> = Vec::with_capacity(work.len());
        let mut dispatched = 0usize;

        let mut pending = work.into_iter();
        while let Some((index, job)) = pending.next() {
            // Acquire semaphore permit (blocks if at concurrency limit)
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|_| BatchError::SemaphoreClosed)?;

            if abort.load(Ordering::SeqCst) {
                debug!(pass, remaining = pending.len() + 1, "abort raised, stopping dispatch");
                finished.push((index, job));
                finished.extend(pending.by_ref());
                break;
            }

            dispatched += 1;
            let engine = Arc::clone(&self.engine);
            let abort = Arc::clone(&abort);
            let live = Arc::clone(&live);
            let durations = Arc::clone(&durations);

            tasks.spawn(async move {
                // Permit is dropped when this block exits (RAII)
                let _permit = permit;
                let active = live.fetch_add(1, Ordering::SeqCst) + 1;
                debug!(index, active, "job started");

                let started = Instant::now();
                let fallback = job.clone();
                let result = match AssertUnwindSafe(engine.run_one(job)).catch_unwind().await {
                    Ok(result) => result,
                    Err(panic) => Ok(panicked(fallback, panic.as_ref())),
                };
                let elapsed = started.elapsed();

                durations
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(elapsed);
                live.fetch_sub(1, Ordering::SeqCst);
                if result.is_err() {
                    abort.store(true, Ordering::SeqCst);
                }
                (index, result)
            });
        }

        let mut fatal: Option<FatalError> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(job))) => finished.push((index, job)),
                Ok((index, Err(error))) => {
                    warn!(index, error = %error, "fatal error, batch will stop");
                    fatal.get_or_insert(error);
                }
                // Panics are caught inside the task; only runtime shutdown lands here
                Err(error) => warn!(error = %error, "job task did not complete"),
            }
        }
        if let Some(error) = fatal {
            return Err(BatchError::Fatal(error));
        }

        finished.sort_unstable_by_key(|(index, _)| *index);
        let samples = durations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let succeeded = finished.iter().filter(|(_, job)| job.is_success()).count();
        let report = PassReport {
            pass,
            dispatched,
            succeeded,
            failed: finished.len() - succeeded,
            durations: DurationStats::from_samples(&samples),
        };
        info!(
            pass,
            dispatched,
            succeeded = report.succeeded,
            failed = report.failed,
            mean_ms = report.durations.mean.as_millis(),
            median_ms = report.durations.median.as_millis(),
            "pass complete"
        );
        Ok((finished, report))
    }
}

/// Marks a job whose run panicked as failed.
fn panicked(mut job: Job, panic: &(dyn Any + Send)) -> Job {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    warn!(url = job.url(), panic = %message, "job panicked");
    job.record_failure();
    job.set_last_error(Some(JobError::new(
        ErrorKind::Unknown,
        None,
        format!("job panicked: {message}"),
    )));
    job
}
