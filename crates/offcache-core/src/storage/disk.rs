//! Persistent buckets on the local filesystem.
//!
//! Layout under the root directory:
//!
//! ```text
//! buckets.json                     bucket names in creation order
//! buckets/<name>/<sha256>.json     entry metadata (identity, status, headers, timestamp)
//! buckets/<name>/<sha256>.body     entry body
//! ```
//!
//! Entry files are named after the SHA-256 of the request identity. Every file
//! is written to a temporary name and renamed into place, body first, so a
//! reader sees either the previous entry or the complete new one.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{validate_bucket_name, CacheStorage};
use crate::error::{CacheError, Result};
use crate::models::{CacheRequest, CachedResponse, EntryInfo};

/// Registry of bucket names, relative to the root
const REGISTRY_FILE: &str = "buckets.json";

/// Directory holding one sub-directory per bucket
const BUCKETS_DIR: &str = "buckets";

const META_EXT: &str = "json";
const BODY_EXT: &str = "body";

#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    identity: String,
    status: u16,
    status_text: String,
    headers: Vec<(String, String)>,
    cached_at: DateTime<Utc>,
}

pub struct DiskStorage {
    root: PathBuf,
    // Serializes read-modify-write cycles on the registry file
    registry_lock: Mutex<()>,
    tmp_counter: AtomicU64,
}

impl DiskStorage {
    pub fn new(root: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(root.join(BUCKETS_DIR))
            .map_err(|e| CacheError::io(&root, e))?;
        Ok(Self {
            root,
            registry_lock: Mutex::new(()),
            tmp_counter: AtomicU64::new(0),
        })
    }

    fn registry_path(&self) -> PathBuf {
        self.root.join(REGISTRY_FILE)
    }

    fn bucket_dir(&self, name: &str) -> PathBuf {
        self.root.join(BUCKETS_DIR).join(name)
    }

    fn entry_paths(&self, name: &str, identity: &str) -> (PathBuf, PathBuf) {
        let stem = hex::encode(Sha256::digest(identity.as_bytes()));
        let dir = self.bucket_dir(name);
        (
            dir.join(format!("{}.{}", stem, META_EXT)),
            dir.join(format!("{}.{}", stem, BODY_EXT)),
        )
    }

    async fn load_registry(&self) -> Result<Vec<String>> {
        let path = self.registry_path();
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                serde_json::from_str(&contents).map_err(|e| CacheError::Corrupt { path, source: e })
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(CacheError::io(path, e)),
        }
    }

    async fn save_registry(&self, names: &[String]) -> Result<()> {
        let contents = serde_json::to_vec_pretty(names).map_err(|e| CacheError::Corrupt {
            path: self.registry_path(),
            source: e,
        })?;
        self.write_atomic(&self.registry_path(), &contents).await
    }

    async fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<()> {
        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(format!(".tmp{}", n));
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, contents)
            .await
            .map_err(|e| CacheError::io(&tmp, e))?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(CacheError::io(path, e));
        }
        Ok(())
    }

    async fn read_meta(&self, path: &Path) -> Result<Option<EntryMeta>> {
        match tokio::fs::read(path).await {
            Ok(contents) => serde_json::from_slice(&contents)
                .map(Some)
                .map_err(|e| CacheError::Corrupt {
                    path: path.to_path_buf(),
                    source: e,
                }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::io(path, e)),
        }
    }
}

#[async_trait]
impl CacheStorage for DiskStorage {
    async fn open(&self, name: &str) -> Result<()> {
        validate_bucket_name(name)?;
        let _guard = self.registry_lock.lock().await;

        let dir = self.bucket_dir(name);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| CacheError::io(&dir, e))?;

        let mut names = self.load_registry().await?;
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
            self.save_registry(&names).await?;
            debug!(bucket = name, "Created cache bucket");
        }
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(self.load_registry().await?.iter().any(|n| n == name))
    }

    async fn match_in(
        &self,
        name: &str,
        request: &CacheRequest,
    ) -> Result<Option<CachedResponse>> {
        validate_bucket_name(name)?;
        let identity = request.identity();
        let (meta_path, body_path) = self.entry_paths(name, &identity);

        let meta = match self.read_meta(&meta_path).await? {
            Some(meta) if meta.identity == identity => meta,
            Some(meta) => {
                warn!(bucket = name, stored = %meta.identity, requested = %identity, "Cache entry hash collision");
                return Ok(None);
            }
            None => return Ok(None),
        };

        let body = match tokio::fs::read(&body_path).await {
            Ok(body) => Bytes::from(body),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io(body_path, e)),
        };

        Ok(Some(CachedResponse {
            status: meta.status,
            status_text: meta.status_text,
            headers: meta.headers,
            body,
        }))
    }

    async fn put(
        &self,
        name: &str,
        request: &CacheRequest,
        response: &CachedResponse,
    ) -> Result<()> {
        validate_bucket_name(name)?;
        let dir = self.bucket_dir(name);
        if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            return Err(CacheError::BucketNotFound(name.to_string()));
        }

        let identity = request.identity();
        let (meta_path, body_path) = self.entry_paths(name, &identity);
        let meta = EntryMeta {
            identity,
            status: response.status,
            status_text: response.status_text.clone(),
            headers: response.headers.clone(),
            cached_at: Utc::now(),
        };
        let meta_bytes = serde_json::to_vec_pretty(&meta).map_err(|e| CacheError::Corrupt {
            path: meta_path.clone(),
            source: e,
        })?;

        self.write_atomic(&body_path, &response.body).await?;
        self.write_atomic(&meta_path, &meta_bytes).await?;
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        validate_bucket_name(name)?;
        let _guard = self.registry_lock.lock().await;

        let mut names = self.load_registry().await?;
        let registered = names.iter().any(|n| n == name);
        if registered {
            names.retain(|n| n != name);
            self.save_registry(&names).await?;
        }

        let dir = self.bucket_dir(name);
        let removed = match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => return Err(CacheError::io(dir, e)),
        };
        Ok(registered || removed)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        self.load_registry().await
    }

    async fn entries(&self, name: &str) -> Result<Vec<EntryInfo>> {
        validate_bucket_name(name)?;
        let dir = self.bucket_dir(name);
        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CacheError::BucketNotFound(name.to_string()))
            }
            Err(e) => return Err(CacheError::io(dir, e)),
        };

        let mut entries = Vec::new();
        while let Some(item) = read_dir
            .next_entry()
            .await
            .map_err(|e| CacheError::io(&dir, e))?
        {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some(META_EXT) {
                continue;
            }
            match self.read_meta(&path).await {
                Ok(Some(meta)) => entries.push(EntryInfo {
                    identity: meta.identity,
                    status: meta.status,
                    cached_at: meta.cached_at,
                }),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable cache entry"),
            }
        }
        entries.sort_by(|a, b| a.identity.cmp(&b.identity));
        Ok(entries)
    }
}
