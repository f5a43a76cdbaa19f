//! HTTP transport capability consumed by the download engine.
//!
//! The engine never talks to an HTTP library directly. It builds a
//! [`TransportRequest`], hands it to a [`Transport`], and interprets the
//! returned [`TransportResponse`] (status, headers, final URL, body stream)
//! itself. [`ReqwestTransport`] is the production implementation.

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use reqwest::header::HeaderMap;
use reqwest::redirect::Policy;
use reqwest::{Client, Method, StatusCode};
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

use super::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};

/// Response body as a stream of byte chunks.
pub type BodyStream = BoxStream<'static, Result<Vec<u8>, TransportError>>;

/// Transport-level failure, classified for retry decisions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The request or a body read timed out.
    #[error("request timed out")]
    Timeout,

    /// The request was cancelled before completion.
    #[error("request cancelled")]
    Cancelled,

    /// Connecting to the server failed (DNS, refused, reset).
    #[error("connection failed: {0}")]
    Connect(String),

    /// TLS handshake or certificate validation failed.
    #[error("TLS trust failure: {0}")]
    Tls(String),

    /// The body stream broke off mid-transfer.
    #[error("response body interrupted: {0}")]
    Body(String),

    /// Any other transport fault.
    #[error("transport failure: {0}")]
    Other(String),
}

/// One outgoing HTTP request.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// `GET`, or `POST` when a body is present.
    pub method: Method,
    /// Absolute `http`/`https` URL.
    pub url: Url,
    /// Request headers.
    pub headers: HeaderMap,
    /// Request payload.
    pub body: Option<String>,
}

/// The final response after at most one automatic redirect hop.
pub struct TransportResponse {
    /// HTTP status of the final response.
    pub status: StatusCode,
    /// Headers of the final response.
    pub headers: HeaderMap,
    /// URL that produced the final response.
    pub final_url: Url,
    /// Decompressed response body.
    pub body: BodyStream,
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("final_url", &self.final_url.as_str())
            .finish_non_exhaustive()
    }
}

impl TransportResponse {
    /// Builds a response whose body is a single in-memory chunk.
    #[must_use]
    pub fn from_bytes(
        status: StatusCode,
        headers: HeaderMap,
        final_url: Url,
        body: impl Into<Vec<u8>>,
    ) -> Self {
        let body = body.into();
        let chunks = if body.is_empty() { Vec::new() } else { vec![Ok(body)] };
        Self {
            status,
            headers,
            final_url,
            body: stream::iter(chunks).boxed(),
        }
    }
}

/// HTTP client capability.
///
/// Implementations decompress gzip/deflate bodies and follow at most one
/// redirect hop on their own; any further 3xx is returned as-is.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `request` and returns the final response.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when no response could be obtained.
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}

/// [`Transport`] backed by a pooled `reqwest` client.
///
/// The client is safe to share across concurrent jobs; it keeps no cookie
/// state between requests.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Creates a transport with default timeouts.
    ///
    /// # Errors
    ///
    /// Returns the builder error when the TLS backend cannot be initialized.
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_timeouts(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            Duration::from_secs(READ_TIMEOUT_SECS),
        )
    }

    /// Creates a transport with explicit connect and whole-request timeouts.
    ///
    /// # Errors
    ///
    /// Returns the builder error when the TLS backend cannot be initialized.
    #[instrument(level = "debug")]
    pub fn with_timeouts(
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .gzip(true)
            .deflate(true)
            .redirect(single_hop_policy())
            .build()?;
        Ok(Self { client })
    }
}

/// Follows the first redirect and stops at the second, handing that 3xx
/// response back to the caller.
fn single_hop_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() > 1 {
            attempt.stop()
        } else {
            attempt.follow()
        }
    })
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        let status = response.status();
        let headers = response.headers().clone();
        let final_url = response.url().clone();
        debug!(status = status.as_u16(), final_url = %final_url, "response received");

        let body = response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| match classify_reqwest_error(&e) {
                        TransportError::Other(message) => TransportError::Body(message),
                        other => other,
                    })
            })
            .boxed();

        Ok(TransportResponse {
            status,
            headers,
            final_url,
            body,
        })
    }
}

/// Maps a reqwest error onto the transport taxonomy.
///
/// TLS problems surface as connect errors in reqwest, so the error chain is
/// checked for TLS markers first.
fn classify_reqwest_error(error: &reqwest::Error) -> TransportError {
    let message = error_chain_message(error);
    if is_tls_message(&message) {
        TransportError::Tls(message)
    } else if error.is_timeout() {
        TransportError::Timeout
    } else if error.is_connect() {
        TransportError::Connect(message)
    } else if error.is_body() || error.is_decode() {
        TransportError::Body(message)
    } else {
        TransportError::Other(message)
    }
}

fn error_chain_message(error: &(dyn StdError + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn is_tls_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("certificate")
        || lower.contains("tls")
        || lower.contains("ssl")
        || lower.contains("handshake")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_is_tls_message() {
        assert!(is_tls_message("invalid peer certificate: UnknownIssuer"));
        assert!(is_tls_message("error trying to connect: TLS handshake eof"));
        assert!(!is_tls_message("connection refused"));
    }

    #[tokio::test]
    async fn test_from_bytes_yields_single_chunk() {
        let response = TransportResponse::from_bytes(
            StatusCode::OK,
            HeaderMap::new(),
            Url::parse("https://example.com/").unwrap(),
            b"abc".to_vec(),
        );
        let chunks: Vec<_> = response.body.collect().await;
        assert_eq!(chunks, vec![Ok(b"abc".to_vec())]);
    }

    #[tokio::test]
    async fn test_from_bytes_empty_body_has_no_chunks() {
        let response = TransportResponse::from_bytes(
            StatusCode::NO_CONTENT,
            HeaderMap::new(),
            Url::parse("https://example.com/").unwrap(),
            Vec::new(),
        );
        assert_eq!(response.body.count().await, 0);
    }

    #[tokio::test]
    async fn test_connection_refused_is_connect_error() {
        // Bind then drop a listener so the port is very likely closed.
        let Ok(listener) = std::net::TcpListener::bind("127.0.0.1:0") else {
            eprintln!("cannot bind localhost socket; skipping");
            return;
        };
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let transport =
            ReqwestTransport::with_timeouts(Duration::from_secs(2), Duration::from_secs(5))
                .unwrap();
        let request = TransportRequest {
            method: Method::GET,
            url: Url::parse(&format!("http://127.0.0.1:{port}/")).unwrap(),
            headers: HeaderMap::new(),
            body: None,
        };

        let result = transport.send(request).await;

        assert!(
            matches!(result, Err(TransportError::Connect(_))),
            "expected connect error, got {result:?}"
        );
    }
}
