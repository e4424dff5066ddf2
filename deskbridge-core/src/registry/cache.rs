//! Time-bounded endpoint cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::registry::Endpoint;

#[derive(Debug, Clone)]
struct CacheEntry {
    endpoint: Endpoint,
    fetched_at: Instant,
}

/// Hit/miss counters and current size.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub hit_rate: f64,
}

/// Session id → endpoint, valid for `ttl` after the fetch.
///
/// Expired entries are never served; they count as misses and are
/// dropped on the next write.
pub struct EndpointCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EndpointCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// A fresh endpoint for `session_id`, if one is cached.
    pub async fn get(&self, session_id: &str) -> Option<Endpoint> {
        let entries = self.entries.read().await;
        match entries.get(session_id) {
            Some(entry) if entry.fetched_at.elapsed() < self.ttl => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.endpoint.clone())
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or replace the entry for `session_id`.
    pub async fn insert(&self, session_id: &str, endpoint: Endpoint) {
        let entry = CacheEntry {
            endpoint,
            fetched_at: Instant::now(),
        };
        self.entries
            .write()
            .await
            .insert(session_id.to_string(), entry);
    }

    /// Remove every entry whose key contains `pattern`.
    pub async fn invalidate(&self, pattern: &str) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !key.contains(pattern));
        before - entries.len()
    }

    pub async fn purge_expired(&self) -> usize {
        let ttl = self.ttl;
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.fetched_at.elapsed() < ttl);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            entries: self.len().await,
            hit_rate: if total > 0 {
                hits as f64 / total as f64
            } else {
                0.0
            },
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = EndpointCache::new(Duration::from_secs(30));
        cache.insert("abc", Endpoint::new("10.0.0.5", 5900)).await;
        assert!(cache.get("abc").await.is_some());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cache.get("abc").await.is_none());
        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn invalidate_by_substring() {
        let cache = EndpointCache::new(Duration::from_secs(30));
        cache.insert("team-a-1", Endpoint::new("h1", 5900)).await;
        cache.insert("team-a-2", Endpoint::new("h2", 5900)).await;
        cache.insert("team-b-1", Endpoint::new("h3", 5900)).await;

        assert_eq!(cache.invalidate("team-a").await, 2);
        assert!(cache.get("team-a-1").await.is_none());
        assert!(cache.get("team-b-1").await.is_some());
    }

    #[tokio::test]
    async fn stats_track_hits_and_misses() {
        let cache = EndpointCache::new(Duration::from_secs(30));
        assert!(cache.get("abc").await.is_none());
        cache.insert("abc", Endpoint::new("h", 1)).await;
        assert!(cache.get("abc").await.is_some());
        assert!(cache.get("abc").await.is_some());

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
        assert!((stats.hit_rate - 2.0 / 3.0).abs() < 1e-9);
    }
}
