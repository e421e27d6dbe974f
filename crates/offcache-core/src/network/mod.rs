//! Live network access for cache misses and manifest seeding.
//!
//! This module provides the `Fetcher` trait the intermediary calls when it
//! has to go to the network, and `HttpFetcher`, the reqwest-backed
//! implementation. Any HTTP status counts as a successful fetch; only
//! transport failures are errors.

pub mod client;
pub mod error;

use async_trait::async_trait;

use crate::models::{CacheRequest, CachedResponse};

pub use client::HttpFetcher;
pub use error::NetworkError;

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &CacheRequest) -> Result<CachedResponse, NetworkError>;
}
