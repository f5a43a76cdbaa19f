//! User-Agent string sent with every fetch.

/// Default User-Agent for fetch requests (identifies the tool and version).
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("fetcher/{version} (batch-fetch-tool)")
}
