//! reqwest-backed [`RemoteFetcher`] with a local-file fallback.

use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};

use super::{is_remote, local_path, ChunkCallback, FetchError, FetchResult, RemoteFetcher};
use crate::BoxFuture;

/// Default timeout for HTTP requests in seconds.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// Buffer size for local file copies (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Fetches `http(s)://` locations with reqwest and everything else from disk.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    /// Create a fetcher with the default timeout.
    pub fn new() -> FetchResult<Self> {
        Self::with_timeout(Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS))
    }

    /// Create a fetcher with a custom request timeout.
    pub fn with_timeout(timeout: Duration) -> FetchResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("bundlepatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self { client, timeout })
    }

    /// Configured request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn map_request_error(&self, location: &str, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout {
                location: location.to_string(),
                timeout_secs: self.timeout.as_secs(),
            }
        } else {
            FetchError::Request {
                location: location.to_string(),
                reason: e.to_string(),
            }
        }
    }

    async fn get(&self, location: &str) -> FetchResult<reqwest::Response> {
        let response = self
            .client
            .get(location)
            .send()
            .await
            .map_err(|e| self.map_request_error(location, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                location: location.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    async fn http_text(&self, location: &str) -> FetchResult<String> {
        let response = self.get(location).await?;
        response
            .text()
            .await
            .map_err(|e| self.map_request_error(location, e))
    }

    async fn http_to_file(
        &self,
        location: &str,
        dest: &Path,
        on_chunk: ChunkCallback<'_>,
    ) -> FetchResult<u64> {
        let mut response = self.get(location).await?;
        let mut writer = BufWriter::new(create_file(dest).await?);
        let mut written = 0u64;

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| self.map_request_error(location, e))?
        {
            writer.write_all(&chunk).await.map_err(|e| io_error(dest, e))?;
            written += chunk.len() as u64;
            on_chunk(chunk.len() as u64);
        }

        writer.flush().await.map_err(|e| io_error(dest, e))?;
        Ok(written)
    }

    async fn file_to_file(
        &self,
        location: &str,
        dest: &Path,
        on_chunk: ChunkCallback<'_>,
    ) -> FetchResult<u64> {
        let source = local_path(location);
        let mut reader = tokio::fs::File::open(&source)
            .await
            .map_err(|e| io_error(&source, e))?;
        let mut writer = BufWriter::new(create_file(dest).await?);
        let mut buffer = vec![0u8; BUFFER_SIZE];
        let mut written = 0u64;

        loop {
            let read = reader
                .read(&mut buffer)
                .await
                .map_err(|e| io_error(&source, e))?;
            if read == 0 {
                break;
            }
            writer
                .write_all(&buffer[..read])
                .await
                .map_err(|e| io_error(dest, e))?;
            written += read as u64;
            on_chunk(read as u64);
        }

        writer.flush().await.map_err(|e| io_error(dest, e))?;
        Ok(written)
    }
}

impl RemoteFetcher for HttpFetcher {
    fn fetch_text<'a>(&'a self, location: &'a str) -> BoxFuture<'a, FetchResult<String>> {
        Box::pin(async move {
            if is_remote(location) {
                self.http_text(location).await
            } else {
                let path = local_path(location);
                tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|e| io_error(&path, e))
            }
        })
    }

    fn fetch_to_file<'a>(
        &'a self,
        location: &'a str,
        dest: &'a Path,
        on_chunk: ChunkCallback<'a>,
    ) -> BoxFuture<'a, FetchResult<u64>> {
        Box::pin(async move {
            if is_remote(location) {
                self.http_to_file(location, dest, on_chunk).await
            } else {
                self.file_to_file(location, dest, on_chunk).await
            }
        })
    }
}

async fn create_file(dest: &Path) -> FetchResult<tokio::fs::File> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_error(parent, e))?;
    }
    tokio::fs::File::create(dest)
        .await
        .map_err(|e| io_error(dest, e))
}

fn io_error(path: &Path, source: std::io::Error) -> FetchError {
    FetchError::Io {
        path: path.to_path_buf(),
        source,
    }
}
