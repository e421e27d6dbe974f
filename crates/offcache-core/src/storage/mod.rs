//! Cache bucket storage.
//!
//! This module provides the `CacheStorage` trait and two implementations:
//! - `MemoryStorage`: process-local buckets, used by tests and ephemeral runs
//! - `DiskStorage`: persistent buckets under a cache directory
//!
//! Buckets are addressed by name and kept in creation order. A lookup across
//! all buckets returns the first bucket's entry that matches.

pub mod disk;
pub mod memory;

use async_trait::async_trait;

use crate::error::{CacheError, Result};
use crate::models::{CacheRequest, CachedResponse, EntryInfo};

pub use disk::DiskStorage;
pub use memory::MemoryStorage;

#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Create the bucket if it does not exist yet.
    async fn open(&self, name: &str) -> Result<()>;

    async fn has(&self, name: &str) -> Result<bool>;

    /// Look the request up in every bucket, oldest bucket first.
    async fn match_request(&self, request: &CacheRequest) -> Result<Option<CachedResponse>> {
        for name in self.keys().await? {
            if let Some(response) = self.match_in(&name, request).await? {
                return Ok(Some(response));
            }
        }
        Ok(None)
    }

    /// Look the request up in one bucket. A missing bucket is a miss.
    async fn match_in(
        &self,
        name: &str,
        request: &CacheRequest,
    ) -> Result<Option<CachedResponse>>;

    /// Store a response, replacing any previous entry for the same identity.
    async fn put(
        &self,
        name: &str,
        request: &CacheRequest,
        response: &CachedResponse,
    ) -> Result<()>;

    /// Delete a bucket and everything in it. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool>;

    /// Bucket names in creation order.
    async fn keys(&self) -> Result<Vec<String>>;

    async fn entries(&self, name: &str) -> Result<Vec<EntryInfo>>;
}

/// Bucket names double as directory names, so keep them to a safe alphabet.
pub fn validate_bucket_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(CacheError::InvalidBucketName(name.to_string()))
    }
}
