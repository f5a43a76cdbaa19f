//! Engine configuration passed explicitly at construction time.

use std::time::Duration;

use super::constants::{
    ACCEPT_LANGUAGE, DEFAULT_MAX_ATTEMPTS, MAX_IN_MEMORY_BODY, TRANSIENT_RETRY_BACKOFF,
};
use crate::user_agent;

/// Tunables for a [`DownloadEngine`](super::DownloadEngine).
///
/// # Default Values
///
/// - `user_agent`: `fetcher/<version> (batch-fetch-tool)`
/// - `accept_language`: `en-US,en;q=0.5`
/// - `retry_backoff`: 2 seconds
/// - `max_attempts`: 10
/// - `max_in_memory_body`: 1 MiB
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// `User-Agent` sent with every request.
    pub user_agent: String,
    /// `Accept-Language` sent with every request.
    pub accept_language: String,
    /// Fixed wait before retrying a transient failure.
    pub retry_backoff: Duration,
    /// Upper bound on attempts within one run, redirects included.
    pub max_attempts: u32,
    /// Largest body captured in memory when the job has no destination.
    pub max_in_memory_body: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            user_agent: user_agent::default_user_agent(),
            accept_language: ACCEPT_LANGUAGE.to_string(),
            retry_backoff: TRANSIENT_RETRY_BACKOFF,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_in_memory_body: MAX_IN_MEMORY_BODY,
        }
    }
}

impl EngineConfig {
    /// Returns a copy with a different transient-failure backoff.
    #[must_use]
    pub fn with_retry_backoff(mut self, retry_backoff: Duration) -> Self {
        self.retry_backoff = retry_backoff;
        self
    }

    /// Returns a copy with a different attempt ceiling (minimum 1).
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.accept_language, "en-US,en;q=0.5");
        assert_eq!(config.retry_backoff, Duration::from_secs(2));
        assert_eq!(config.max_attempts, 10);
        assert_eq!(config.max_in_memory_body, 1024 * 1024);
        assert!(config.user_agent.starts_with("fetcher/"));
    }

    #[test]
    fn test_max_attempts_minimum_is_one() {
        assert_eq!(EngineConfig::default().with_max_attempts(0).max_attempts, 1);
    }
}
