//! Data types flowing through the intermediary.
//!
//! This module provides:
//! - `CacheRequest`: an outbound request and its cache identity
//! - `CachedResponse`: a fully buffered response that can be duplicated
//! - `EntryInfo`: a summary of a stored entry, with its age

pub mod entry;
pub mod request;
pub mod response;

pub use entry::EntryInfo;
pub use request::CacheRequest;
pub use response::CachedResponse;
