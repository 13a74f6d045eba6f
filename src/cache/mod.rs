//! Time-bounded memoization of upstream responses.

use crate::comex::{TradeDataSource, TradeQuery};
use crate::config::CacheConfig;
use crate::error::FetchError;
use crate::models::{LastUpdate, NcmCode, TradeRecord};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Key/value store of serialized responses with per-entry expiry.
#[async_trait]
pub trait ResponseCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn put(&self, key: &str, body: String, ttl: Duration);
    async fn clear(&self);
}

#[async_trait]
impl<C: ResponseCache + ?Sized> ResponseCache for Arc<C> {
    async fn get(&self, key: &str) -> Option<String> {
        (**self).get(key).await
    }

    async fn put(&self, key: &str, body: String, ttl: Duration) {
        (**self).put(key, body, ttl).await
    }

    async fn clear(&self) {
        (**self).clear().await
    }
}

// ── In-memory ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Entry {
    body: String,
    expires_at: Instant,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    inner: Arc<RwLock<HashMap<String, Entry>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired entries.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut map = self.inner.write().await;
        let before = map.len();
        map.retain(|_, e| e.expires_at > now);
        before - map.len()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl ResponseCache for MemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        let map = self.inner.read().await;
        map.get(key)
            .filter(|e| Instant::now() < e.expires_at)
            .map(|e| e.body.clone())
    }

    async fn put(&self, key: &str, body: String, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let expires_at = Instant::now() + ttl;
        self.inner.write().await.insert(key.to_string(), Entry { body, expires_at });
    }

    async fn clear(&self) {
        self.inner.write().await.clear();
    }
}

// ── Caching source ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct CacheTtls {
    pub trade: Duration,
    pub description: Duration,
    pub update: Duration,
}

impl From<&CacheConfig> for CacheTtls {
    fn from(cfg: &CacheConfig) -> Self {
        Self {
            trade: cfg.trade_ttl(),
            description: cfg.description_ttl(),
            update: cfg.update_ttl(),
        }
    }
}

/// Wraps a source so that successful responses are served from `cache` until
/// they expire. Failures always reach the source again.
pub struct CachedSource<S, C> {
    source: S,
    cache: C,
    ttls: CacheTtls,
}

impl<S, C> CachedSource<S, C>
where
    S: TradeDataSource,
    C: ResponseCache,
{
    pub fn new(source: S, cache: C, ttls: CacheTtls) -> Self {
        Self { source, cache, ttls }
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &str, ttl: Duration) -> Option<T> {
        if ttl.is_zero() {
            return None;
        }
        let body = self.cache.get(key).await?;
        match serde_json::from_str(&body) {
            Ok(v) => {
                debug!("cache hit {}", key);
                Some(v)
            }
            Err(e) => {
                warn!("discarding unreadable cache entry {}: {}", key, e);
                None
            }
        }
    }

    async fn store<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        match serde_json::to_string(value) {
            Ok(body) => self.cache.put(key, body, ttl).await,
            Err(e) => warn!("could not cache {}: {}", key, e),
        }
    }
}

#[async_trait]
impl<S, C> TradeDataSource for CachedSource<S, C>
where
    S: TradeDataSource,
    C: ResponseCache,
{
    async fn fetch_trade(&self, query: &TradeQuery) -> Result<Vec<TradeRecord>, FetchError> {
        let key = query.cache_key();
        if let Some(hit) = self.lookup(&key, self.ttls.trade).await {
            return Ok(hit);
        }
        let records = self.source.fetch_trade(query).await?;
        self.store(&key, &records, self.ttls.trade).await;
        Ok(records)
    }

    async fn fetch_description(&self, ncm: &NcmCode) -> Result<String, FetchError> {
        let key = format!("ncm:{}", ncm);
        if let Some(hit) = self.lookup(&key, self.ttls.description).await {
            return Ok(hit);
        }
        let text = self.source.fetch_description(ncm).await?;
        self.store(&key, &text, self.ttls.description).await;
        Ok(text)
    }

    async fn fetch_last_update(&self) -> Result<LastUpdate, FetchError> {
        const KEY: &str = "updated";
        if let Some(hit) = self.lookup(KEY, self.ttls.update).await {
            return Ok(hit);
        }
        let update = self.source.fetch_last_update().await?;
        self.store(KEY, &update, self.ttls.update).await;
        Ok(update)
    }
}
