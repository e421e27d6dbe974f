//! The fixed list of resources seeded into a bucket at install time.

use std::collections::HashSet;

use reqwest::Url;

use crate::error::{CacheError, Result};
use crate::models::CacheRequest;

/// Resources the page needs to boot with no network: root document, markup,
/// stylesheet, script and app descriptor.
pub const APP_SHELL: &[&str] = &[
    "/",
    "/index.html",
    "/styles.css",
    "/script.js",
    "/manifest.json",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    paths: Vec<String>,
}

impl Manifest {
    /// Build a manifest, rejecting entries listed twice.
    pub fn new<I, S>(paths: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let paths: Vec<String> = paths.into_iter().map(Into::into).collect();
        let mut seen = HashSet::new();
        for path in &paths {
            if !seen.insert(path.as_str()) {
                return Err(CacheError::DuplicateManifestEntry(path.clone()));
            }
        }
        Ok(Self { paths })
    }

    /// The manifest compiled into this build.
    pub fn app_shell() -> Self {
        Self {
            paths: APP_SHELL.iter().map(|p| p.to_string()).collect(),
        }
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// GET requests for every entry, in manifest order, resolved against `origin`.
    pub fn requests(&self, origin: &Url) -> Result<Vec<CacheRequest>> {
        self.paths
            .iter()
            .map(|path| CacheRequest::for_path("GET", origin, path))
            .collect()
    }
}

impl Default for Manifest {
    fn default() -> Self {
        Self::app_shell()
    }
}
