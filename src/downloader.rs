use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::models::{DownloadOutput, DownloadProgress, DownloadSession, Window, DEFAULT_WINDOW_SIZE};
use crate::retry::{RetryError, RetryPolicy};

/// Why a single window request failed. Always retryable.
#[derive(Debug, Error)]
pub enum ChunkFetchError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("server returned status {0}")]
    Status(StatusCode),
    #[error("short body: expected {expected} bytes, got {received}")]
    ShortBody { expected: u64, received: u64 },
}

/// Custom errors for download operations.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("content length of {0} is unknown")]
    SizeUnknown(Url),
    #[error("chunk {start}-{end} failed: {source}")]
    ChunkFetch {
        start: u64,
        end: u64,
        #[source]
        source: ChunkFetchError,
    },
    #[error("chunk {start}-{end} failed after {attempts} attempts: {last}")]
    ChunkRetryExhausted {
        start: u64,
        end: u64,
        attempts: u32,
        last: ChunkFetchError,
    },
    #[error("server ignored the range request for {0}")]
    RangeUnsupported(Url),
    #[error("download cancelled")]
    Cancelled,
}

impl DownloadError {
    /// Only single-window fetch failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DownloadError::ChunkFetch { .. })
    }
}

/// HTTP Basic credentials for the file server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BasicAuth {
    pub username: String,
    pub password: Option<String>,
}

/// Options for a chunked download.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Size of each ranged request.
    pub window_size: u64,
    pub retry: RetryPolicy,
    /// Per-request timeout.
    pub timeout: Duration,
    pub credentials: Option<BasicAuth>,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(30),
            credentials: None,
        }
    }
}

/// Fetches a file window by window with `Range` requests.
#[derive(Debug, Clone)]
pub struct ChunkedDownloader {
    client: Client,
    options: DownloadOptions,
}

impl ChunkedDownloader {
    pub fn new(client: Client, options: DownloadOptions) -> Self {
        Self { client, options }
    }

    pub fn options(&self) -> &DownloadOptions {
        &self.options
    }

    /// Downloads `url` into memory.
    ///
    /// Windows are requested strictly in ascending order and the result is their
    /// concatenation. `on_progress` runs after every completed window; a panic
    /// inside it is logged and swallowed. Cancelling `token` aborts the in-flight
    /// request or backoff sleep and yields [`DownloadError::Cancelled`].
    pub async fn download<F>(
        &self,
        url: Url,
        token: CancellationToken,
        mut on_progress: F,
    ) -> Result<DownloadOutput, DownloadError>
    where
        F: FnMut(DownloadProgress),
    {
        if token.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        let total_size = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(DownloadError::Cancelled),
            size = self.probe_size(&url) => size?,
        };

        let windows = Window::partition(total_size, self.options.window_size);
        info!(url = %url, total_size, windows = windows.remaining(), "starting chunked download");

        let mut session = DownloadSession::new(url, total_size, token);
        for window in windows {
            if session.cancellation.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }

            let chunk = tokio::select! {
                biased;
                _ = session.cancellation.cancelled() => return Err(DownloadError::Cancelled),
                chunk = self.fetch_window_with_retry(&session.target_url, window, total_size) => chunk?,
            };
            session.push_chunk(chunk);

            let progress = DownloadProgress {
                percent: session.percent(),
                received_bytes: session.received_bytes,
                total_size,
            };
            debug!(received = progress.received_bytes, percent = progress.percent, "window complete");
            if catch_unwind(AssertUnwindSafe(|| on_progress(progress))).is_err() {
                warn!("progress callback panicked; continuing download");
            }
        }

        info!(url = %session.target_url, total_size, "chunked download complete");
        Ok(session.assemble())
    }

    /// Issues a HEAD request and reads `Content-Length`.
    pub async fn probe_size(&self, url: &Url) -> Result<u64, DownloadError> {
        let resp = self
            .authorize(self.client.head(url.clone()))
            .timeout(self.options.timeout)
            .send()
            .await?
            .error_for_status()?;
        // Body-derived lengths are zero for HEAD responses; read the header itself.
        resp.headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .filter(|size| *size > 0)
            .ok_or_else(|| DownloadError::SizeUnknown(url.clone()))
    }

    async fn fetch_window_with_retry(
        &self,
        url: &Url,
        window: Window,
        total_size: u64,
    ) -> Result<Bytes, DownloadError> {
        let result = self
            .options
            .retry
            .retry(
                |attempt| async move {
                    debug!(range = %window.range_header(), attempt, "requesting window");
                    self.fetch_window(url, window, total_size).await
                },
                DownloadError::is_retryable,
            )
            .await;

        match result {
            Ok(bytes) => Ok(bytes),
            Err(RetryError::Aborted(e)) => Err(e),
            Err(RetryError::Exhausted { attempts, last }) => {
                warn!(start = window.start, end = window.end, attempts, error = %last, "giving up on window");
                let last = match last {
                    DownloadError::ChunkFetch { source, .. } => source,
                    other => return Err(other),
                };
                Err(DownloadError::ChunkRetryExhausted {
                    start: window.start,
                    end: window.end,
                    attempts,
                    last,
                })
            }
        }
    }

    async fn fetch_window(&self, url: &Url, window: Window, total_size: u64) -> Result<Bytes, DownloadError> {
        let chunk_err = |source: ChunkFetchError| DownloadError::ChunkFetch {
            start: window.start,
            end: window.end,
            source,
        };

        let resp = self
            .authorize(self.client.get(url.clone()))
            .header(reqwest::header::RANGE, window.range_header())
            .timeout(self.options.timeout)
            .send()
            .await
            .map_err(|e| chunk_err(e.into()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(chunk_err(ChunkFetchError::Status(status)));
        }
        if status == StatusCode::OK && window.size() != total_size {
            return Err(DownloadError::RangeUnsupported(url.clone()));
        }

        let expected = window.size();
        let mut buf = BytesMut::with_capacity(expected as usize);
        let mut stream = resp.bytes_stream();
        while let Some(piece) = stream.next().await {
            let piece = piece.map_err(|e| chunk_err(e.into()))?;
            buf.extend_from_slice(&piece);
        }

        let received = buf.len() as u64;
        if received != expected {
            return Err(chunk_err(ChunkFetchError::ShortBody { expected, received }));
        }
        Ok(buf.freeze())
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.options.credentials {
            Some(auth) => request.basic_auth(&auth.username, auth.password.as_ref()),
            None => request,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_window_failures_are_retryable() {
        let transient = DownloadError::ChunkFetch {
            start: 0,
            end: 9,
            source: ChunkFetchError::ShortBody { expected: 10, received: 4 },
        };
        assert!(transient.is_retryable());
        assert!(!DownloadError::Cancelled.is_retryable());
        let url = Url::parse("https://files.example.org/a.bin").unwrap();
        assert!(!DownloadError::RangeUnsupported(url.clone()).is_retryable());
        assert!(!DownloadError::SizeUnknown(url).is_retryable());
    }

    #[test]
    fn exhaustion_message_names_the_window() {
        let err = DownloadError::ChunkRetryExhausted {
            start: 1048576,
            end: 2097151,
            attempts: 10,
            last: ChunkFetchError::Status(StatusCode::SERVICE_UNAVAILABLE),
        };
        assert_eq!(
            err.to_string(),
            "chunk 1048576-2097151 failed after 10 attempts: server returned status 503 Service Unavailable"
        );
    }

    #[test]
    fn default_options_use_one_mib_windows() {
        let options = DownloadOptions::default();
        assert_eq!(options.window_size, 1024 * 1024);
        assert_eq!(options.retry, RetryPolicy::default());
        assert!(options.credentials.is_none());
    }
}
