//! Fetcher Core Library
//!
//! This library provides the download job engine behind the `fetcher` tool:
//! it fetches HTTP(S) resources to disk or memory with bounded retries,
//! redirect handling, collision-free filenames and content-type based
//! renaming, and runs lists of jobs under a concurrency limit.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`job`] - Job request, job state and structured job errors
//! - [`download`] - Per-job engine, transport, filename and extension handling
//! - [`batch`] - Bounded-concurrency scheduler with retry passes

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod batch;
pub mod download;
pub mod job;
mod user_agent;

// Re-export commonly used types
pub use batch::{
    BatchError, BatchReport, BatchScheduler, Concurrency, DurationStats, PassReport,
    RetryPredicate, retry_transient_failures,
};
pub use download::{
    DownloadEngine, DownloadError, EngineConfig, FatalError, ReqwestTransport, Transport,
};
pub use job::{ErrorKind, Job, JobError, JobRequest};
