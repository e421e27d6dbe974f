//! The host side: installs workers, decides when they take over, and routes
//! each client's requests to the worker controlling it.

use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use super::clients::{ClientId, ClientRegistry};
use super::interceptor::{self, Intercepted};
use super::lifecycle::ActivateReport;
use super::service::OfflineWorker;
use crate::error::Result;
use crate::models::CacheRequest;
use crate::network::Fetcher;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The worker is active now
    Activated(ActivateReport),
    /// Installed, waiting for the previous worker's clients to close
    Waiting,
}

pub struct Registration {
    fetcher: Arc<dyn Fetcher>,
    active: RwLock<Option<Arc<OfflineWorker>>>,
    waiting: RwLock<Option<Arc<OfflineWorker>>>,
    clients: ClientRegistry,
    // One install/activate at a time
    lifecycle: Mutex<()>,
}

impl Registration {
    /// `fetcher` serves clients that no worker controls.
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            fetcher,
            active: RwLock::new(None),
            waiting: RwLock::new(None),
            clients: ClientRegistry::new(),
            lifecycle: Mutex::new(()),
        }
    }

    pub async fn active(&self) -> Option<Arc<OfflineWorker>> {
        self.active.read().await.clone()
    }

    pub async fn waiting(&self) -> Option<Arc<OfflineWorker>> {
        self.waiting.read().await.clone()
    }

    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    /// Install `worker` and activate it if nothing stands in the way.
    ///
    /// A failed install is returned as an error and leaves the current worker
    /// in place.
    pub async fn update(&self, worker: Arc<OfflineWorker>) -> Result<UpdateOutcome> {
        let _guard = self.lifecycle.lock().await;
        worker.on_install().await?;
        self.take_over(worker).await
    }

    /// Like [`Registration::update`], but a bucket left complete by a previous
    /// run is adopted as-is instead of being refetched.
    pub async fn resume(&self, worker: Arc<OfflineWorker>) -> Result<UpdateOutcome> {
        let _guard = self.lifecycle.lock().await;
        if !worker.on_restore().await? {
            worker.on_install().await?;
        }
        self.take_over(worker).await
    }

    async fn take_over(&self, worker: Arc<OfflineWorker>) -> Result<UpdateOutcome> {
        let has_active = self.active.read().await.is_some();
        if !has_active || worker.settings().skip_waiting || self.clients.is_empty() {
            let report = self.promote(worker).await?;
            return Ok(UpdateOutcome::Activated(report));
        }

        info!(bucket = %worker.cache_name(), clients = self.clients.len(), "Worker waiting for clients to close");
        if let Some(previous) = self.waiting.write().await.replace(worker) {
            previous.retire();
        }
        Ok(UpdateOutcome::Waiting)
    }

    async fn promote(&self, worker: Arc<OfflineWorker>) -> Result<ActivateReport> {
        let previous = self.active.read().await.clone();
        if let Some(ref previous) = previous {
            // Let the outgoing worker finish its writes before its bucket is deleted
            let flushed = previous.settle().await;
            debug!(bucket = %previous.cache_name(), flushed, "Flushed outgoing worker");
        }

        let mut report = worker.on_activate().await?;
        *self.active.write().await = Some(Arc::clone(&worker));

        if let Some(previous) = previous {
            if !Arc::ptr_eq(&previous, &worker) {
                let moved = self
                    .clients
                    .handover(previous.cache_name(), worker.cache_name());
                debug!(from = %previous.cache_name(), to = %worker.cache_name(), moved, "Handed over clients");
                previous.retire();
            }
        }

        if worker.settings().claim_clients {
            report.claimed = self.clients.claim(worker.cache_name());
            info!(bucket = %worker.cache_name(), claimed = report.claimed, "Claimed open clients");
        }
        Ok(report)
    }

    /// A page opened. It is controlled by the active worker, if any.
    pub async fn open_client(&self) -> ClientId {
        let active = self.active.read().await;
        self.clients
            .open(active.as_ref().map(|w| w.cache_name()))
    }

    /// A page closed. When the last one goes, a waiting worker takes over.
    pub async fn close_client(&self, id: ClientId) -> Result<Option<ActivateReport>> {
        self.clients.close(id);
        if !self.clients.is_empty() {
            return Ok(None);
        }

        let _guard = self.lifecycle.lock().await;
        let waiting = self.waiting.write().await.take();
        match waiting {
            Some(worker) => {
                info!(bucket = %worker.cache_name(), "Last client closed, activating waiting worker");
                self.promote(worker).await.map(Some)
            }
            None => Ok(None),
        }
    }

    /// Route a request from `client` to its controller, or straight to the
    /// network when no active worker controls it.
    pub async fn fetch(&self, client: ClientId, request: CacheRequest) -> Intercepted {
        let controller = self.clients.controller(client);
        let active = self.active().await;

        match (controller, active) {
            (Some(name), Some(worker)) if name == worker.cache_name() => {
                worker.on_intercept(request).await
            }
            (controller, _) => {
                debug!(%client, ?controller, url = %request.url(), "Uncontrolled client, bypassing cache");
                interceptor::passthrough(self.fetcher.as_ref(), request).await
            }
        }
    }

    /// Wait for the active worker's pending cache writes.
    pub async fn settle(&self) -> usize {
        match self.active().await {
            Some(worker) => worker.settle().await,
            None => 0,
        }
    }
}
