//! Test doubles shared by the worker tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::models::{CacheRequest, CachedResponse};
use crate::network::{Fetcher, NetworkError};

/// Answers by URL path; unknown paths get a 404. Counts every call.
#[derive(Default)]
pub(crate) struct MockFetcher {
    routes: Mutex<HashMap<String, CachedResponse>>,
    route_delays: Mutex<HashMap<String, Duration>>,
    offline: AtomicBool,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl MockFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Serves 200 for every entry of the app shell manifest.
    pub(crate) fn app_shell() -> Self {
        let fetcher = Self::new();
        for path in crate::manifest::APP_SHELL {
            fetcher.route(path, CachedResponse::new(200, format!("shell {}", path)));
        }
        fetcher
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn route(&self, path: &str, response: CachedResponse) {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), response);
    }

    /// Like `route`, but the response arrives after `delay`.
    pub(crate) fn route_delayed(&self, path: &str, response: CachedResponse, delay: Duration) {
        self.route(path, response);
        self.route_delays
            .lock()
            .unwrap()
            .insert(path.to_string(), delay);
    }

    pub(crate) fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, request: &CacheRequest) -> Result<CachedResponse, NetworkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let route_delay = self
            .route_delays
            .lock()
            .unwrap()
            .get(request.url().path())
            .copied();
        if let Some(delay) = route_delay.or(self.delay) {
            tokio::time::sleep(delay).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(NetworkError::Timeout {
                url: request.url().to_string(),
            });
        }
        let routes = self.routes.lock().unwrap();
        Ok(routes
            .get(request.url().path())
            .cloned()
            .unwrap_or_else(|| CachedResponse::new(404, "not found")))
    }
}
