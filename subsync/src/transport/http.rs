//! HTTP content client with download resume.
//!
//! Resuming uses a `Range: bytes=<offset>-` request:
//! - `206 Partial Content` appends to the existing file
//! - `200 OK` means the server ignored the range, so the file is rewritten
//! - `416 Range Not Satisfiable` means the file is already complete

use std::path::Path;
use std::time::Duration;

use reqwest::header::RANGE;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::{validate_url, BoxFuture, ContentClient};
use crate::error::{SyncError, SyncResult};

/// Default timeout for HTTP requests in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300; // 5 minutes

/// reqwest-backed [`ContentClient`].
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    timeout: Duration,
}

impl HttpClient {
    /// Create a client with the default timeout.
    pub fn new() -> SyncResult<Self> {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Create a client with a custom per-request timeout.
    pub fn with_timeout(timeout: Duration) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::InvalidConfig(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn request_error(&self, url: &str, e: reqwest::Error, download: bool) -> SyncError {
        if e.is_timeout() {
            SyncError::Timeout {
                url: url.to_string(),
                timeout_secs: self.timeout.as_secs(),
            }
        } else if download {
            SyncError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        } else {
            SyncError::UpdateCheckFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    }

    async fn fetch_json(&self, url: &str) -> SyncResult<Value> {
        validate_url(url)?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.request_error(url, e, false))?;

        if !response.status().is_success() {
            return Err(SyncError::UpdateCheckFailed {
                url: url.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| self.request_error(url, e, false))?;

        serde_json::from_slice(&body).map_err(|e| SyncError::UpdateCheckFailed {
            url: url.to_string(),
            reason: format!("invalid JSON: {}", e),
        })
    }

    async fn fetch_file(&self, url: &str, offset: u64, dest: &Path) -> SyncResult<u64> {
        validate_url(url)?;

        let mut request = self.client.get(url);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={}-", offset));
        }

        let mut response = request
            .send()
            .await
            .map_err(|e| self.request_error(url, e, true))?;

        let status = response.status();
        let append = match status {
            StatusCode::RANGE_NOT_SATISFIABLE if offset > 0 => {
                debug!(url, offset, "Download already complete");
                return Ok(offset);
            }
            StatusCode::PARTIAL_CONTENT if offset > 0 => true,
            s if s.is_success() => false,
            s => {
                return Err(SyncError::DownloadFailed {
                    url: url.to_string(),
                    reason: format!("HTTP {}", s),
                })
            }
        };

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::CreateDirFailed {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        let mut options = OpenOptions::new();
        if append {
            options.create(true).append(true);
        } else {
            options.create(true).write(true).truncate(true);
        }
        let mut file = options
            .open(dest)
            .await
            .map_err(|e| SyncError::WriteFailed {
                path: dest.to_path_buf(),
                source: e,
            })?;

        let mut written = if append { offset } else { 0 };
        let write_err = |e| SyncError::WriteFailed {
            path: dest.to_path_buf(),
            source: e,
        };

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| self.request_error(url, e, true))?
        {
            file.write_all(&chunk).await.map_err(write_err)?;
            written += chunk.len() as u64;
        }

        file.flush().await.map_err(write_err)?;
        file.sync_all().await.map_err(write_err)?;

        debug!(url, bytes = written, resumed = append, "Download finished");
        Ok(written)
    }
}

impl ContentClient for HttpClient {
    fn get_json<'a>(&'a self, url: &'a str) -> BoxFuture<'a, SyncResult<Value>> {
        Box::pin(self.fetch_json(url))
    }

    fn get_file<'a>(
        &'a self,
        url: &'a str,
        offset: u64,
        dest: &'a Path,
    ) -> BoxFuture<'a, SyncResult<u64>> {
        Box::pin(self.fetch_file(url, offset, dest))
    }
}
