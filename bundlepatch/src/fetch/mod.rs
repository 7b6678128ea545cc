//! Remote fetching of configuration text and bundle files.
//!
//! Every remote read in the crate goes through [`RemoteFetcher`]. A location
//! is either an `http(s)://` URL or a filesystem path (optionally prefixed
//! with `file://`), so offline installations and test fixtures use the same
//! code path as a real content server.

mod http;

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::BoxFuture;

pub use http::{HttpFetcher, DEFAULT_FETCH_TIMEOUT_SECS};

/// Result type for fetch operations.
pub type FetchResult<T> = Result<T, FetchError>;

/// Callback invoked with the number of bytes received by each chunk.
pub type ChunkCallback<'a> = &'a (dyn Fn(u64) + Send + Sync);

/// Errors raised while fetching a remote resource.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request did not finish within the configured timeout.
    #[error("request to {location} timed out after {timeout_secs}s")]
    Timeout { location: String, timeout_secs: u64 },

    /// The server answered with a non-success status.
    #[error("request to {location} failed with status {status}")]
    Status { location: String, status: u16 },

    /// The request could not be sent or the body could not be read.
    #[error("request to {location} failed: {reason}")]
    Request { location: String, reason: String },

    /// A local file could not be read or written.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to create HTTP client: {0}")]
    Client(String),
}

/// Source of remote text and files.
///
/// Implementations must be `Send + Sync`; one fetcher is shared by the
/// orchestrator and every package it drives.
pub trait RemoteFetcher: Send + Sync {
    /// Fetch `location` as UTF-8 text.
    fn fetch_text<'a>(&'a self, location: &'a str) -> BoxFuture<'a, FetchResult<String>>;

    /// Stream `location` into `dest`, calling `on_chunk` as bytes arrive.
    ///
    /// Returns the number of bytes written.
    fn fetch_to_file<'a>(
        &'a self,
        location: &'a str,
        dest: &'a Path,
        on_chunk: ChunkCallback<'a>,
    ) -> BoxFuture<'a, FetchResult<u64>>;
}

/// Whether `location` must be fetched over HTTP.
pub fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// Filesystem path for a non-HTTP location.
pub fn local_path(location: &str) -> PathBuf {
    PathBuf::from(location.strip_prefix("file://").unwrap_or(location))
}

/// Append `file` to a base location, for URLs and paths alike.
pub fn join_location(base: &str, file: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), file.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_remote() {
        assert!(is_remote("https://cdn.example.com/app.json"));
        assert!(is_remote("http://localhost:8080/app.json"));
        assert!(!is_remote("/opt/game/app.json"));
        assert!(!is_remote("file:///opt/game/app.json"));
    }

    #[test]
    fn test_local_path_strips_scheme() {
        assert_eq!(local_path("file:///opt/a.json"), PathBuf::from("/opt/a.json"));
        assert_eq!(local_path("relative/a.json"), PathBuf::from("relative/a.json"));
    }

    #[test]
    fn test_join_location() {
        assert_eq!(
            join_location("https://cdn.example.com/main/", "/main.version"),
            "https://cdn.example.com/main/main.version"
        );
        assert_eq!(join_location("/srv/content", "dlc"), "/srv/content/dlc");
    }
}
