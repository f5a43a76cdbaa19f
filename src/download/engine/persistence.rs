use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use futures_util::StreamExt;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;

use super::super::DownloadError;
use super::super::transport::BodyStream;

/// Body captured in memory for a job without a destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum CapturedBody {
    /// No bytes were received.
    Empty,
    /// Textual body decoded with the response charset.
    Text(String),
    /// Binary body, base64-encoded.
    Base64(String),
    /// Body exceeded the in-memory limit; reading stopped early.
    Oversized,
}

/// Streams the response body into `path`, truncating the placeholder.
///
/// Returns the number of bytes written.
pub(super) async fn stream_to_file(
    body: BodyStream,
    url: &str,
    path: &Path,
) -> Result<u64, DownloadError> {
    let file = File::create(path)
        .await
        .map_err(|e| DownloadError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    let mut body = body;
    let mut bytes_written: u64 = 0;

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| DownloadError::transport(url, e))?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(path, e))?;
        bytes_written += chunk.len() as u64;
    }

    writer.flush().await.map_err(|e| DownloadError::io(path, e))?;
    writer
        .into_inner()
        .sync_all()
        .await
        .map_err(|e| DownloadError::io(path, e))?;

    Ok(bytes_written)
}

/// Reads the response body into memory, never holding more than `limit`
/// bytes.
pub(super) async fn capture_body(
    body: BodyStream,
    url: &str,
    charset: Option<&str>,
    limit: usize,
) -> Result<CapturedBody, DownloadError> {
    let mut body = body;
    let mut buffer: Vec<u8> = Vec::new();

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| DownloadError::transport(url, e))?;
        if buffer.len() + chunk.len() > limit {
            debug!(limit, "response body exceeds in-memory limit");
            return Ok(CapturedBody::Oversized);
        }
        buffer.extend_from_slice(&chunk);
    }

    if buffer.is_empty() {
        return Ok(CapturedBody::Empty);
    }
    Ok(match charset {
        Some(charset) => CapturedBody::Text(decode_text(&buffer, charset)),
        None => CapturedBody::Base64(STANDARD.encode(&buffer)),
    })
}

/// Text stored in the job body when the response was too large to keep.
pub(super) fn oversized_placeholder(mime_type: Option<&str>, limit: usize) -> String {
    format!(
        "[{} response larger than {limit} bytes not captured]",
        mime_type.unwrap_or("unknown")
    )
}

fn decode_text(bytes: &[u8], charset: &str) -> String {
    match charset {
        "iso-8859-1" | "latin1" | "latin-1" | "l1" | "windows-1252" | "cp1252" => {
            bytes.iter().map(|&b| char::from(b)).collect()
        }
        _ => {
            let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}
