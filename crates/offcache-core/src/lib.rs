//! offcache core library.
//!
//! An offline cache intermediary that sits between a page and the network:
//! - `storage`: named, versioned cache buckets (in-memory or on disk)
//! - `network`: the live fetcher the intermediary falls back to
//! - `worker`: install/activate lifecycle, request interception and the
//!   registration that routes client requests to the active worker
//! - `config`: persisted settings for the host binary

pub mod config;
pub mod error;
pub mod manifest;
pub mod models;
pub mod network;
pub mod storage;
pub mod worker;

pub use config::Config;
pub use error::{CacheError, Result};
pub use manifest::Manifest;
pub use models::{CacheRequest, CachedResponse, EntryInfo};
pub use network::{Fetcher, HttpFetcher, NetworkError};
pub use storage::{CacheStorage, DiskStorage, MemoryStorage};
pub use worker::{
    ActivateReport, ClientId, InstallReport, InterceptOutcome, Intercepted, OfflineWorker,
    Registration, UpdateOutcome, WorkerSettings, WorkerState,
};

pub use reqwest::Url;
