//! Named cache buckets mapping requests to stored responses.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::message::{AssetRequest, AssetResponse};

/// Abstraction over the persistent cache storage a worker writes into.
///
/// Buckets are keyed by name and created lazily. Within a bucket responses
/// are keyed by request URL.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Opens a bucket, creating it if absent.
    async fn open(&self, name: &str) -> Result<()>;

    /// Returns true if a bucket with this name exists.
    async fn has(&self, name: &str) -> Result<bool>;

    /// Looks up a stored response for `request`.
    ///
    /// Non-`GET` requests never match. A missing bucket is a miss.
    async fn match_request(&self, name: &str, request: &AssetRequest)
    -> Result<Option<AssetResponse>>;

    /// Stores `entries` keyed by their request URLs as one unit.
    ///
    /// Either every entry is stored or none is. An entry whose URL is already
    /// present replaces the old one; entries not named in `entries` are kept.
    async fn put_all(&self, name: &str, entries: Vec<(AssetRequest, AssetResponse)>) -> Result<()>;

    /// Request URLs stored in a bucket, sorted.
    async fn keys(&self, name: &str) -> Result<Vec<String>>;

    /// Names of all existing buckets, sorted.
    async fn cache_names(&self) -> Result<Vec<String>>;
}

/// In-process cache storage; contents are lost when dropped.
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    buckets: RwLock<HashMap<String, BTreeMap<String, AssetResponse>>>,
}

impl MemoryCacheStorage {
    /// Creates an empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<()> {
        self.buckets
            .write()
            .await
            .entry(name.to_string())
            .or_default();
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(self.buckets.read().await.contains_key(name))
    }

    async fn match_request(
        &self,
        name: &str,
        request: &AssetRequest,
    ) -> Result<Option<AssetResponse>> {
        if !request.is_cacheable() {
            return Ok(None);
        }
        Ok(self
            .buckets
            .read()
            .await
            .get(name)
            .and_then(|bucket| bucket.get(request.cache_key()))
            .cloned())
    }

    async fn put_all(&self, name: &str, entries: Vec<(AssetRequest, AssetResponse)>) -> Result<()> {
        let mut buckets = self.buckets.write().await;
        let bucket = buckets.entry(name.to_string()).or_default();
        for (request, response) in entries {
            bucket.insert(request.cache_key().to_string(), response);
        }
        Ok(())
    }

    async fn keys(&self, name: &str) -> Result<Vec<String>> {
        Ok(self
            .buckets
            .read()
            .await
            .get(name)
            .map(|bucket| bucket.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn cache_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<_> = self.buckets.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
