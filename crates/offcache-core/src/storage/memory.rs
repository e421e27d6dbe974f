use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{validate_bucket_name, CacheStorage};
use crate::error::{CacheError, Result};
use crate::models::{CacheRequest, CachedResponse, EntryInfo};

struct StoredEntry {
    response: CachedResponse,
    cached_at: DateTime<Utc>,
}

struct Bucket {
    name: String,
    entries: HashMap<String, StoredEntry>,
}

/// Buckets held in process memory. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStorage {
    buckets: RwLock<Vec<Bucket>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, name: &str) -> Result<()> {
        validate_bucket_name(name)?;
        let mut buckets = self.buckets.write().await;
        if !buckets.iter().any(|b| b.name == name) {
            buckets.push(Bucket {
                name: name.to_string(),
                entries: HashMap::new(),
            });
        }
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(self.buckets.read().await.iter().any(|b| b.name == name))
    }

    async fn match_request(&self, request: &CacheRequest) -> Result<Option<CachedResponse>> {
        let identity = request.identity();
        let buckets = self.buckets.read().await;
        Ok(buckets
            .iter()
            .find_map(|b| b.entries.get(&identity))
            .map(|e| e.response.clone()))
    }

    async fn match_in(
        &self,
        name: &str,
        request: &CacheRequest,
    ) -> Result<Option<CachedResponse>> {
        let buckets = self.buckets.read().await;
        Ok(buckets
            .iter()
            .find(|b| b.name == name)
            .and_then(|b| b.entries.get(&request.identity()))
            .map(|e| e.response.clone()))
    }

    async fn put(
        &self,
        name: &str,
        request: &CacheRequest,
        response: &CachedResponse,
    ) -> Result<()> {
        let mut buckets = self.buckets.write().await;
        let bucket = buckets
            .iter_mut()
            .find(|b| b.name == name)
            .ok_or_else(|| CacheError::BucketNotFound(name.to_string()))?;
        bucket.entries.insert(
            request.identity(),
            StoredEntry {
                response: response.clone(),
                cached_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let mut buckets = self.buckets.write().await;
        let before = buckets.len();
        buckets.retain(|b| b.name != name);
        Ok(buckets.len() != before)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self
            .buckets
            .read()
            .await
            .iter()
            .map(|b| b.name.clone())
            .collect())
    }

    async fn entries(&self, name: &str) -> Result<Vec<EntryInfo>> {
        let buckets = self.buckets.read().await;
        let bucket = buckets
            .iter()
            .find(|b| b.name == name)
            .ok_or_else(|| CacheError::BucketNotFound(name.to_string()))?;
        let mut entries: Vec<EntryInfo> = bucket
            .entries
            .iter()
            .map(|(identity, e)| EntryInfo {
                identity: identity.clone(),
                status: e.response.status,
                cached_at: e.cached_at,
            })
            .collect();
        entries.sort_by(|a, b| a.identity.cmp(&b.identity));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(url: &str) -> CacheRequest {
        CacheRequest::get(url).unwrap()
    }

    #[tokio::test]
    async fn test_open_is_idempotent_and_ordered() {
        let storage = MemoryStorage::new();
        storage.open("app-v1").await.unwrap();
        storage.open("app-v2").await.unwrap();
        storage.open("app-v1").await.unwrap();
        assert_eq!(storage.keys().await.unwrap(), vec!["app-v1", "app-v2"]);
    }

    #[tokio::test]
    async fn test_put_and_match() {
        let storage = MemoryStorage::new();
        storage.open("app-v1").await.unwrap();
        let request = req("http://localhost/index.html");
        storage
            .put("app-v1", &request, &CachedResponse::new(200, "<html>"))
            .await
            .unwrap();

        let hit = storage.match_in("app-v1", &request).await.unwrap().unwrap();
        assert_eq!(hit.text(), "<html>");
        assert!(storage.match_in("app-v2", &request).await.unwrap().is_none());
        assert!(storage
            .match_request(&req("http://localhost/other"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_match_request_prefers_oldest_bucket() {
        let storage = MemoryStorage::new();
        storage.open("app-v1").await.unwrap();
        storage.open("app-v2").await.unwrap();
        let request = req("http://localhost/script.js");
        storage
            .put("app-v2", &request, &CachedResponse::new(200, "new"))
            .await
            .unwrap();
        storage
            .put("app-v1", &request, &CachedResponse::new(200, "old"))
            .await
            .unwrap();

        let hit = storage.match_request(&request).await.unwrap().unwrap();
        assert_eq!(hit.text(), "old");
    }

    #[tokio::test]
    async fn test_put_into_missing_bucket_fails() {
        let storage = MemoryStorage::new();
        let err = storage
            .put("nope", &req("http://localhost/"), &CachedResponse::new(200, ""))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::BucketNotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_reports_existence() {
        let storage = MemoryStorage::new();
        storage.open("app-v1").await.unwrap();
        assert!(storage.delete("app-v1").await.unwrap());
        assert!(!storage.delete("app-v1").await.unwrap());
        assert!(!storage.has("app-v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_entries_lists_identities() {
        let storage = MemoryStorage::new();
        storage.open("app-v1").await.unwrap();
        storage
            .put("app-v1", &req("http://localhost/b"), &CachedResponse::new(200, ""))
            .await
            .unwrap();
        storage
            .put("app-v1", &req("http://localhost/a"), &CachedResponse::new(200, ""))
            .await
            .unwrap();

        let entries = storage.entries("app-v1").await.unwrap();
        let ids: Vec<&str> = entries.iter().map(|e| e.identity.as_str()).collect();
        assert_eq!(ids, vec!["GET http://localhost/a", "GET http://localhost/b"]);
    }
}
