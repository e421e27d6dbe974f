//! One deployed version of the intermediary and its three host hooks.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use reqwest::Url;
use tracing::{debug, error, info};

use super::interceptor::{self, Intercepted};
use super::lifecycle::{self, ActivateReport, InstallReport};
use super::state::WorkerState;
use super::tasks::BackgroundTasks;
use crate::error::{CacheError, Result};
use crate::manifest::Manifest;
use crate::models::CacheRequest;
use crate::network::Fetcher;
use crate::storage::{validate_bucket_name, CacheStorage};

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Version-tagged bucket name, e.g. `research-terminal-v1`
    pub cache_name: String,
    /// Base URL manifest paths are resolved against
    pub origin: Url,
    pub manifest: Manifest,
    /// Activate as soon as install succeeds instead of waiting for old clients to close
    pub skip_waiting: bool,
    /// Take control of already-open clients on activate
    pub claim_clients: bool,
}

impl WorkerSettings {
    pub fn new(cache_name: impl Into<String>, origin: Url) -> Self {
        Self {
            cache_name: cache_name.into(),
            origin,
            manifest: Manifest::app_shell(),
            skip_waiting: true,
            claim_clients: true,
        }
    }

    pub fn with_manifest(mut self, manifest: Manifest) -> Self {
        self.manifest = manifest;
        self
    }

    pub fn skip_waiting(mut self, enabled: bool) -> Self {
        self.skip_waiting = enabled;
        self
    }

    pub fn claim_clients(mut self, enabled: bool) -> Self {
        self.claim_clients = enabled;
        self
    }
}

pub struct OfflineWorker {
    settings: WorkerSettings,
    storage: Arc<dyn CacheStorage>,
    fetcher: Arc<dyn Fetcher>,
    state: Mutex<WorkerState>,
    tasks: BackgroundTasks,
}

impl OfflineWorker {
    pub fn new(
        settings: WorkerSettings,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self> {
        validate_bucket_name(&settings.cache_name)?;
        Ok(Self {
            settings,
            storage,
            fetcher,
            state: Mutex::new(WorkerState::Parsed),
            tasks: BackgroundTasks::new(),
        })
    }

    pub fn cache_name(&self) -> &str {
        &self.settings.cache_name
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    pub fn storage(&self) -> &Arc<dyn CacheStorage> {
        &self.storage
    }

    fn lock_state(&self) -> MutexGuard<'_, WorkerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> WorkerState {
        *self.lock_state()
    }

    fn set_state(&self, state: WorkerState) {
        *self.lock_state() = state;
        debug!(bucket = %self.cache_name(), %state, "Worker state changed");
    }

    /// Move from `from` to `to`, or fail with the state we were actually in.
    fn transition(&self, from: WorkerState, to: WorkerState, action: &'static str) -> Result<()> {
        let mut state = self.lock_state();
        if *state != from {
            return Err(CacheError::InvalidState {
                bucket: self.cache_name().to_string(),
                state: *state,
                action,
            });
        }
        *state = to;
        Ok(())
    }

    /// Install hook: seed this version's bucket from the manifest.
    ///
    /// On failure the worker becomes redundant and the error is returned so the
    /// host does not activate it.
    pub async fn on_install(&self) -> Result<InstallReport> {
        self.transition(WorkerState::Parsed, WorkerState::Installing, "install")?;

        let result = match self.settings.manifest.requests(&self.settings.origin) {
            Ok(requests) => {
                lifecycle::install(
                    self.storage.as_ref(),
                    self.fetcher.as_ref(),
                    self.cache_name(),
                    &requests,
                )
                .await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(report) => {
                self.set_state(WorkerState::Installed);
                info!(
                    bucket = %report.bucket,
                    stored = report.stored,
                    skip_waiting = self.settings.skip_waiting,
                    "Worker installed"
                );
                Ok(report)
            }
            Err(e) => {
                self.set_state(WorkerState::Redundant);
                error!(bucket = %self.cache_name(), error = %e, "Worker install failed");
                Err(e)
            }
        }
    }

    /// Adopt a bucket a previous run already seeded, without touching the
    /// network. Returns `false` and leaves the worker parsed when any manifest
    /// entry is missing from it.
    pub async fn on_restore(&self) -> Result<bool> {
        self.transition(WorkerState::Parsed, WorkerState::Installing, "restore")?;
        match self.bucket_is_complete().await {
            Ok(true) => {
                self.set_state(WorkerState::Installed);
                info!(bucket = %self.cache_name(), "Worker restored from existing bucket");
                Ok(true)
            }
            Ok(false) => {
                self.set_state(WorkerState::Parsed);
                Ok(false)
            }
            Err(e) => {
                self.set_state(WorkerState::Parsed);
                Err(e)
            }
        }
    }

    async fn bucket_is_complete(&self) -> Result<bool> {
        if !self.storage.has(self.cache_name()).await? {
            return Ok(false);
        }
        for request in self.settings.manifest.requests(&self.settings.origin)? {
            if self
                .storage
                .match_in(self.cache_name(), &request)
                .await?
                .is_none()
            {
                debug!(bucket = %self.cache_name(), url = %request.url(), "Bucket missing manifest entry");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Activate hook: drop every other bucket. Claiming clients is up to the host.
    pub async fn on_activate(&self) -> Result<ActivateReport> {
        self.transition(WorkerState::Installed, WorkerState::Activating, "activate")?;
        let report = lifecycle::activate(self.storage.as_ref(), self.cache_name()).await;
        self.set_state(WorkerState::Activated);
        info!(
            bucket = %self.cache_name(),
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            "Worker activated"
        );
        Ok(report)
    }

    /// Intercept hook. Before activation the cache is left alone.
    pub async fn on_intercept(&self, request: CacheRequest) -> Intercepted {
        let state = self.state();
        if !state.can_intercept() {
            debug!(bucket = %self.cache_name(), %state, url = %request.url(), "Worker not active, bypassing cache");
            return interceptor::passthrough(self.fetcher.as_ref(), request).await;
        }
        interceptor::intercept(
            &self.storage,
            self.fetcher.as_ref(),
            self.cache_name(),
            &self.tasks,
            request,
        )
        .await
    }

    /// Wait for pending write-through stores.
    pub async fn settle(&self) -> usize {
        self.tasks.settle().await
    }

    /// Write-through stores started but not yet reaped.
    pub fn pending_tasks(&self) -> usize {
        self.tasks.len()
    }

    pub(crate) fn retire(&self) {
        self.set_state(WorkerState::Redundant);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CachedResponse;
    use crate::storage::MemoryStorage;
    use crate::worker::interceptor::InterceptOutcome;
    use crate::worker::testing::MockFetcher;

    fn origin() -> Url {
        Url::parse("http://localhost:8000").unwrap()
    }

    fn worker(name: &str, storage: Arc<dyn CacheStorage>, fetcher: Arc<MockFetcher>) -> OfflineWorker {
        OfflineWorker::new(WorkerSettings::new(name, origin()), storage, fetcher).unwrap()
    }

    #[tokio::test]
    async fn test_install_then_activate() {
        let storage: Arc<dyn CacheStorage> = Arc::new(MemoryStorage::new());
        let fetcher = Arc::new(MockFetcher::app_shell());
        let worker = worker("research-terminal-v1", storage.clone(), fetcher.clone());
        assert_eq!(worker.state(), WorkerState::Parsed);

        let installed = worker.on_install().await.unwrap();
        assert_eq!(installed.stored, 5);
        assert_eq!(worker.state(), WorkerState::Installed);

        worker.on_activate().await.unwrap();
        assert_eq!(worker.state(), WorkerState::Activated);

        let request = CacheRequest::get("http://localhost:8000/index.html").unwrap();
        let calls_before = fetcher.calls();
        let result = worker.on_intercept(request).await;
        assert_eq!(result.outcome, InterceptOutcome::CacheHit);
        assert_eq!(fetcher.calls(), calls_before);
    }

    #[tokio::test]
    async fn test_failed_install_makes_worker_redundant() {
        let storage: Arc<dyn CacheStorage> = Arc::new(MemoryStorage::new());
        let fetcher = Arc::new(MockFetcher::app_shell());
        fetcher.route("/manifest.json", CachedResponse::new(500, "boom"));
        let worker = worker("research-terminal-v1", storage, fetcher);

        assert!(worker.on_install().await.is_err());
        assert_eq!(worker.state(), WorkerState::Redundant);

        let err = worker.on_activate().await.unwrap_err();
        assert!(matches!(
            err,
            CacheError::InvalidState {
                state: WorkerState::Redundant,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_activate_before_install_is_rejected() {
        let storage: Arc<dyn CacheStorage> = Arc::new(MemoryStorage::new());
        let worker = worker("research-terminal-v1", storage, Arc::new(MockFetcher::new()));
        assert!(worker.on_activate().await.is_err());
        assert_eq!(worker.state(), WorkerState::Parsed);
    }

    #[tokio::test]
    async fn test_install_twice_is_rejected() {
        let storage: Arc<dyn CacheStorage> = Arc::new(MemoryStorage::new());
        let worker = worker("research-terminal-v1", storage, Arc::new(MockFetcher::app_shell()));
        worker.on_install().await.unwrap();
        assert!(worker.on_install().await.is_err());
        assert_eq!(worker.state(), WorkerState::Installed);
    }

    #[tokio::test]
    async fn test_intercept_before_activation_bypasses_cache() {
        let storage: Arc<dyn CacheStorage> = Arc::new(MemoryStorage::new());
        let fetcher = Arc::new(MockFetcher::app_shell());
        let worker = worker("research-terminal-v1", storage.clone(), fetcher);

        let request = CacheRequest::get("http://localhost:8000/script.js").unwrap();
        let result = worker.on_intercept(request).await;
        assert_eq!(result.outcome, InterceptOutcome::Bypassed);
        assert_eq!(worker.settle().await, 0);
        assert!(storage.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restore_reuses_complete_bucket_offline() {
        let storage: Arc<dyn CacheStorage> = Arc::new(MemoryStorage::new());
        let first = worker("research-terminal-v1", storage.clone(), Arc::new(MockFetcher::app_shell()));
        first.on_install().await.unwrap();

        let offline = Arc::new(MockFetcher::app_shell());
        offline.set_offline(true);
        let second = worker("research-terminal-v1", storage, offline.clone());
        assert!(second.on_restore().await.unwrap());
        assert_eq!(second.state(), WorkerState::Installed);
        assert_eq!(offline.calls(), 0);
    }

    #[tokio::test]
    async fn test_restore_rejects_partial_bucket() {
        let storage: Arc<dyn CacheStorage> = Arc::new(MemoryStorage::new());
        storage.open("research-terminal-v1").await.unwrap();
        storage
            .put(
                "research-terminal-v1",
                &CacheRequest::get("http://localhost:8000/index.html").unwrap(),
                &CachedResponse::new(200, "<html>"),
            )
            .await
            .unwrap();

        let worker = worker("research-terminal-v1", storage, Arc::new(MockFetcher::app_shell()));
        assert!(!worker.on_restore().await.unwrap());
        assert_eq!(worker.state(), WorkerState::Parsed);
        // Still free to install normally
        assert_eq!(worker.on_install().await.unwrap().stored, 5);
    }

    #[test]
    fn test_invalid_cache_name_rejected() {
        let storage: Arc<dyn CacheStorage> = Arc::new(MemoryStorage::new());
        let result = OfflineWorker::new(
            WorkerSettings::new("bad/name", origin()),
            storage,
            Arc::new(MockFetcher::new()),
        );
        assert!(result.is_err());
    }
}
