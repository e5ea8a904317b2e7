//! In-memory TTL cache for fetched mount objects.
//!
//! Entries are keyed by `path:key:objectName` and are not scoped to the
//! requesting pod's identity; see DESIGN.md.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::debug;

use super::fetcher::FetchedSecret;
use crate::observability::metrics;

#[derive(Debug, Clone)]
struct CacheEntry {
    secret: FetchedSecret,
    cached_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() >= ttl
    }
}

/// Shared TTL cache. Cloning shares the underlying map.
#[derive(Debug, Clone)]
pub struct SecretCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
    ttl: Duration,
}

impl SecretCache {
    pub fn new(ttl: Duration) -> Self {
        Self { entries: Arc::new(RwLock::new(HashMap::new())), ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up an unexpired entry. An expired entry found here is removed.
    pub async fn get(&self, key: &str) -> Option<FetchedSecret> {
        let expired = {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if !entry.is_expired(self.ttl) => {
                    metrics::record_cache_lookup(true);
                    return Some(entry.secret.clone());
                }
                Some(_) => true,
                None => false,
            }
        };

        if expired {
            let mut entries = self.entries.write().await;
            // Re-check: another mount may have refreshed it in between.
            if entries.get(key).is_some_and(|entry| entry.is_expired(self.ttl)) {
                entries.remove(key);
            }
        }
        metrics::record_cache_lookup(false);
        None
    }

    pub async fn insert(&self, key: impl Into<String>, secret: FetchedSecret) {
        let mut entries = self.entries.write().await;
        entries.insert(key.into(), CacheEntry { secret, cached_at: Instant::now() });
    }

    /// Drop every expired entry, returning how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(self.ttl));
        before - entries.len()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Periodically purge expired entries until the returned handle is aborted.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = cache.purge_expired().await;
                if removed > 0 {
                    debug!(removed, "Purged expired cache entries");
                }
            }
        })
    }
}
