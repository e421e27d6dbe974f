//! Application configuration management.
//!
//! This module handles loading the configuration: which origin
//! the intermediary fronts, which cache version is deployed, where buckets
//! live and how a new version takes over.
//!
//! Configuration is stored at `~/.config/offcache/config.json`. Environment
//! variables (`OFFCACHE_ORIGIN`, `OFFCACHE_VERSION`, `OFFCACHE_CACHE_DIR`,
//! `OFFCACHE_LISTEN`) override the file.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::manifest::Manifest;
use crate::network::client::REQUEST_TIMEOUT_SECS;
use crate::worker::WorkerSettings;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "offcache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Bucket name prefix; the version is appended
pub const DEFAULT_CACHE_PREFIX: &str = "research-terminal";

pub const DEFAULT_VERSION: &str = "v1";

pub const DEFAULT_ORIGIN: &str = "http://127.0.0.1:8000/";

pub const DEFAULT_LISTEN: &str = "127.0.0.1:8787";

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub cache_prefix: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default)]
    pub listen: Option<String>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default = "default_true")]
    pub skip_waiting: bool,
    #[serde(default = "default_true")]
    pub claim_clients: bool,
    /// Paths seeded at install; the built-in app shell when unset
    #[serde(default)]
    pub manifest: Option<Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            origin: None,
            cache_prefix: None,
            version: None,
            cache_dir: None,
            listen: None,
            request_timeout_secs: None,
            skip_waiting: true,
            claim_clients: true,
            manifest: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Apply `OFFCACHE_*` environment overrides.
    pub fn with_env(mut self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok());
        self
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(origin) = non_empty("OFFCACHE_ORIGIN") {
            self.origin = Some(origin);
        }
        if let Some(version) = non_empty("OFFCACHE_VERSION") {
            self.version = Some(version);
        }
        if let Some(dir) = non_empty("OFFCACHE_CACHE_DIR") {
            self.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(listen) = non_empty("OFFCACHE_LISTEN") {
            self.listen = Some(listen);
        }
    }

    pub fn origin(&self) -> Result<Url> {
        let raw = self.origin.as_deref().unwrap_or(DEFAULT_ORIGIN);
        let url = Url::parse(raw).with_context(|| format!("Invalid origin URL: {}", raw))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("Origin must be an http(s) URL: {}", raw);
        }
        Ok(url)
    }

    pub fn version(&self) -> &str {
        self.version.as_deref().unwrap_or(DEFAULT_VERSION)
    }

    /// Version-tagged bucket name, e.g. `research-terminal-v1`.
    pub fn bucket_name(&self) -> String {
        let prefix = self.cache_prefix.as_deref().unwrap_or(DEFAULT_CACHE_PREFIX);
        format!("{}-{}", prefix, self.version())
    }

    pub fn listen(&self) -> &str {
        self.listen.as_deref().unwrap_or(DEFAULT_LISTEN)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.unwrap_or(REQUEST_TIMEOUT_SECS))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.cache_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn manifest(&self) -> Result<Manifest> {
        match self.manifest {
            Some(ref paths) => Manifest::new(paths.iter().cloned())
                .context("Invalid manifest in config"),
            None => Ok(Manifest::app_shell()),
        }
    }

    pub fn worker_settings(&self) -> Result<WorkerSettings> {
        Ok(WorkerSettings::new(self.bucket_name(), self.origin()?)
            .with_manifest(self.manifest()?)
            .skip_waiting(self.skip_waiting)
            .claim_clients(self.claim_clients))
    }
}
