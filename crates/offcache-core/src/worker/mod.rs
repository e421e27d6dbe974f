//! The offline cache intermediary.
//!
//! This module provides:
//! - `OfflineWorker`: one deployed version, with its `on_install`,
//!   `on_activate` and `on_intercept` hooks
//! - `Registration`: the host side that installs workers, swaps the active
//!   one and routes each client's requests to its controller
//! - `BackgroundTasks`: the awaitable set of write-through cache stores
//!
//! A worker seeds its bucket from the manifest on install, deletes every other
//! bucket on activate, and then serves requests cache-first.

pub mod clients;
pub mod interceptor;
pub mod lifecycle;
pub mod registration;
pub mod service;
pub mod state;
pub mod tasks;

#[cfg(test)]
mod testing;

pub use clients::{ClientId, ClientRegistry};
pub use interceptor::{InterceptOutcome, Intercepted};
pub use lifecycle::{ActivateReport, InstallReport};
pub use registration::{Registration, UpdateOutcome};
pub use service::{OfflineWorker, WorkerSettings};
pub use state::WorkerState;
pub use tasks::BackgroundTasks;
