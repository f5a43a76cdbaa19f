//! Download job engine.
//!
//! This module turns a [`Job`](crate::Job) into a file on disk or a body in
//! memory, handling redirects, retries, filename collisions and content-type
//! based renaming.
//!
//! # Features
//!
//! - One engine parameterized by an injected [`Transport`]
//! - Collision-free destination reservation ([`reserve_unique_path`])
//! - MIME type to extension resolution with legacy overrides
//! - Bounded, per-condition retries (scheme toggle, fixed backoff)
//! - Partial files removed on every failure path
//! - Disk exhaustion surfaced as [`FatalError`]
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use fetcher_core::JobRequest;
//! use fetcher_core::download::{DownloadEngine, EngineConfig, ReqwestTransport};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = DownloadEngine::new(Arc::new(ReqwestTransport::new()?), EngineConfig::default());
//! let job = engine.fetch(JobRequest::new("https://example.com/data.json")).await?;
//! println!("captured: {:?}", job.body());
//! # Ok(())
//! # }
//! ```

mod config;
pub mod constants;
mod engine;
mod error;
mod extension;
mod file_times;
mod filename;
mod response;
mod retry;
mod transport;

pub use config::EngineConfig;
pub use engine::DownloadEngine;
pub use error::{DownloadError, FatalError, is_disk_full};
pub use extension::{BuiltinExtensionTable, ExtensionLookup, ExtensionResolver, LookupError};
pub use file_times::{FileTimestamps, StdFileTimestamps};
pub use filename::{ReserveError, filename_from_url, reserve_unique_path, sanitize_filename};
pub use retry::{RetryBudget, RetryDecision, classify_error};
pub use transport::{
    BodyStream, ReqwestTransport, Transport, TransportError, TransportRequest, TransportResponse,
};

// Note: no module-local Result aliases.
// Use `Result<T, DownloadError>` explicitly in function signatures.
