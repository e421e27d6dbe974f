//! Error types for the cache intermediary.

use std::path::PathBuf;

use thiserror::Error;

use crate::network::NetworkError;
use crate::worker::WorkerState;

pub type Result<T> = std::result::Result<T, CacheError>;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Invalid request URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Invalid bucket name: {0:?}")]
    InvalidBucketName(String),

    #[error("Bucket not found: {0}")]
    BucketNotFound(String),

    #[error("Manifest entry listed twice: {0}")]
    DuplicateManifestEntry(String),

    #[error("Manifest entry {url} returned status {status}")]
    BadManifestResponse { url: String, status: u16 },

    #[error("Install of {bucket} failed: {source}")]
    Install {
        bucket: String,
        #[source]
        source: Box<CacheError>,
    },

    #[error("Storage I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt cache entry {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Worker for {bucket} is {state}, cannot {action}")]
    InvalidState {
        bucket: String,
        state: WorkerState,
        action: &'static str,
    },

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the failure came from the network rather than from storage.
    pub fn is_network(&self) -> bool {
        match self {
            CacheError::Network(_) | CacheError::BadManifestResponse { .. } => true,
            CacheError::Install { source, .. } => source.is_network(),
            _ => false,
        }
    }
}
