//! Install and activate steps.
//!
//! Install seeds a bucket from the manifest and fails as a whole. Activate
//! deletes every other bucket and never fails: a bucket that cannot be
//! deleted is logged and left for the next activation.

use futures::future::{join_all, try_join_all};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{CacheError, Result};
use crate::models::{CacheRequest, CachedResponse};
use crate::network::Fetcher;
use crate::storage::CacheStorage;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    pub bucket: String,
    pub stored: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActivateReport {
    pub bucket: String,
    pub deleted: Vec<String>,
    pub failed: Vec<String>,
    /// Clients that came under this worker's control through claiming
    pub claimed: usize,
}

/// Open `bucket` and store a response for every request in it.
///
/// All fetches run concurrently and nothing is stored until every one of them
/// has returned a 2xx status, so a failed install leaves the bucket empty (or
/// as it was). Any failure is returned wrapped in `CacheError::Install`.
pub async fn install(
    storage: &dyn CacheStorage,
    fetcher: &dyn Fetcher,
    bucket: &str,
    requests: &[CacheRequest],
) -> Result<InstallReport> {
    seed(storage, fetcher, bucket, requests)
        .await
        .map_err(|e| CacheError::Install {
            bucket: bucket.to_string(),
            source: Box::new(e),
        })
}

async fn seed(
    storage: &dyn CacheStorage,
    fetcher: &dyn Fetcher,
    bucket: &str,
    requests: &[CacheRequest],
) -> Result<InstallReport> {
    storage.open(bucket).await?;
    info!(bucket, entries = requests.len(), "Caching app files");

    let responses =
        try_join_all(requests.iter().map(|request| fetch_entry(fetcher, request))).await?;

    for (request, response) in requests.iter().zip(&responses) {
        storage.put(bucket, request, response).await?;
        debug!(bucket, url = %request.url(), "Seeded cache entry");
    }

    Ok(InstallReport {
        bucket: bucket.to_string(),
        stored: responses.len(),
    })
}

async fn fetch_entry(fetcher: &dyn Fetcher, request: &CacheRequest) -> Result<CachedResponse> {
    let response = fetcher.fetch(request).await?;
    if !response.is_ok() {
        return Err(CacheError::BadManifestResponse {
            url: request.url().to_string(),
            status: response.status,
        });
    }
    Ok(response)
}

/// Delete every bucket except `current`.
pub async fn activate(storage: &dyn CacheStorage, current: &str) -> ActivateReport {
    let mut report = ActivateReport {
        bucket: current.to_string(),
        ..Default::default()
    };

    let names = match storage.keys().await {
        Ok(names) => names,
        Err(e) => {
            warn!(error = %e, "Failed to list cache buckets, skipping cleanup");
            return report;
        }
    };

    let stale: Vec<String> = names.into_iter().filter(|n| n != current).collect();
    let results = join_all(stale.iter().map(|name| async move {
        info!(bucket = %name, "Deleting old cache");
        (name, storage.delete(name).await)
    }))
    .await;

    for (name, result) in results {
        match result {
            Ok(true) => report.deleted.push(name.clone()),
            Ok(false) => debug!(bucket = %name, "Old cache already gone"),
            Err(e) => {
                warn!(bucket = %name, error = %e, "Failed to delete old cache");
                report.failed.push(name.clone());
            }
        }
    }
    report
}
