//! Cache-first request handling with read-through population.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use super::tasks::BackgroundTasks;
use crate::error::CacheError;
use crate::models::{CacheRequest, CachedResponse};
use crate::network::Fetcher;
use crate::storage::CacheStorage;

/// Which terminal state a request ended in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterceptOutcome {
    /// Served from a bucket, no network activity
    CacheHit,
    /// Fetched with status 200, a copy is being written to the current bucket
    WriteThrough,
    /// Fetched with any other status (or a non-GET method), not cached
    Fetched,
    /// Cache miss and the network failed: synthetic 503
    Offline,
    /// The cache was not consulted at all (no active worker for the client)
    Bypassed,
}

impl InterceptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterceptOutcome::CacheHit => "hit",
            InterceptOutcome::WriteThrough => "miss-stored",
            InterceptOutcome::Fetched => "miss",
            InterceptOutcome::Offline => "offline",
            InterceptOutcome::Bypassed => "bypass",
        }
    }
}

impl std::fmt::Display for InterceptOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Intercepted {
    pub response: CachedResponse,
    pub outcome: InterceptOutcome,
}

impl Intercepted {
    fn new(response: CachedResponse, outcome: InterceptOutcome) -> Self {
        Self { response, outcome }
    }
}

/// Answer `request` from any bucket, else from the network.
///
/// A 200 response to a GET is duplicated: one copy is returned, the other is
/// written to `bucket` by a task tracked in `tasks`. The bucket is not created
/// here; install opened it, and a write to a deleted bucket is dropped. The
/// caller never waits for that write and never sees a network error.
pub async fn intercept(
    storage: &Arc<dyn CacheStorage>,
    fetcher: &dyn Fetcher,
    bucket: &str,
    tasks: &BackgroundTasks,
    request: CacheRequest,
) -> Intercepted {
    if request.is_cacheable() {
        match storage.match_request(&request).await {
            Ok(Some(response)) => {
                debug!(url = %request.url(), "Serving from cache");
                return Intercepted::new(response, InterceptOutcome::CacheHit);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(url = %request.url(), error = %e, "Cache lookup failed, treating as a miss");
            }
        }
    }

    let response = match fetcher.fetch(&request).await {
        Ok(response) => response,
        Err(e) => {
            warn!(url = %request.url(), error = %e, "Network fetch failed, serving offline response");
            return Intercepted::new(CachedResponse::offline(), InterceptOutcome::Offline);
        }
    };

    // Don't cache non-successful responses
    if !response.is_success() || !request.is_cacheable() {
        return Intercepted::new(response, InterceptOutcome::Fetched);
    }

    let storage = Arc::clone(storage);
    let bucket = bucket.to_string();
    let copy = response.clone();
    tasks.spawn(async move {
        // Never recreate the bucket: once a newer version's activate has
        // deleted it, this late write is dropped
        match storage.put(&bucket, &request, &copy).await {
            Ok(()) => debug!(bucket = %bucket, url = %request.url(), "Cached network response"),
            Err(CacheError::BucketNotFound(_)) => {
                debug!(bucket = %bucket, url = %request.url(), "Bucket gone, dropping cache write")
            }
            Err(e) => {
                warn!(bucket = %bucket, url = %request.url(), error = %e, "Failed to cache network response")
            }
        }
    });

    Intercepted::new(response, InterceptOutcome::WriteThrough)
}

/// Forward straight to the network, with the same offline fallback.
pub async fn passthrough(fetcher: &dyn Fetcher, request: CacheRequest) -> Intercepted {
    match fetcher.fetch(&request).await {
        Ok(response) => Intercepted::new(response, InterceptOutcome::Bypassed),
        Err(e) => {
            warn!(url = %request.url(), error = %e, "Network fetch failed, serving offline response");
            Intercepted::new(CachedResponse::offline(), InterceptOutcome::Offline)
        }
    }
}
