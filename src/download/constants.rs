//! Constants for the download module (timeouts, retry, capture limits).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default whole-request timeout (5 minutes for large files).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Fixed wait before retrying a transient transport failure.
pub const TRANSIENT_RETRY_BACKOFF: Duration = Duration::from_secs(2);

/// Upper bound on attempts for one run, redirects included.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Largest response body kept in memory when no destination is given (1 MiB).
pub const MAX_IN_MEMORY_BODY: usize = 1024 * 1024;

/// `Accept-Language` sent with every request.
pub const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.5";

/// Extension used when neither the URL nor the MIME type yields one.
pub const DEFAULT_EXTENSION: &str = ".bin";
