use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

/// Entries older than the window are candidates for eviction once the cache
/// grows past this size (`spec.md` §4.3.4).
const EVICTION_THRESHOLD: usize = 500;

/// In-memory mapping from a dedup key (signal hash, tenant-scoped signal
/// hash, or cancel key) to first-seen time. Thread-safe; strong ordering
/// between check-and-insert is not required because a duplicate that slips
/// through is still caught by the persistence layer-2 check and the
/// execution engine's position-state check (`spec.md` §4.3.4).
#[derive(Debug, Clone)]
pub struct DedupCache {
    entries: Arc<RwLock<HashMap<String, Instant>>>,
}

impl Default for DedupCache {
    fn default() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl DedupCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `key` was seen within `window` and rejects it as a
    /// duplicate; otherwise records `key` as seen now and returns `false`.
    pub async fn check_and_insert(&self, key: &str, window: Duration) -> bool {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            if let Some(seen_at) = entries.get(key) {
                if now.duration_since(*seen_at) < window {
                    return true;
                }
            }
        }
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), now);
        if entries.len() > EVICTION_THRESHOLD {
            entries.retain(|_, seen_at| now.duration_since(*seen_at) < window);
        }
        false
    }

    /// Backfill a key as seen without running the duplicate check — used
    /// when the persistence layer-2 check finds a hit the cache missed.
    pub async fn backfill(&self, key: &str) {
        self.entries.write().await.insert(key.to_string(), Instant::now());
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_identical_key_within_window_is_rejected() {
        let cache = DedupCache::new();
        let window = Duration::from_secs(300);
        assert!(!cache.check_and_insert("k1", window).await);
        assert!(cache.check_and_insert("k1", window).await);
    }

    #[tokio::test]
    async fn key_outside_window_is_accepted_again() {
        let cache = DedupCache::new();
        let window = Duration::from_millis(10);
        assert!(!cache.check_and_insert("k1", window).await);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!cache.check_and_insert("k1", window).await);
    }

    #[tokio::test]
    async fn eviction_drops_stale_entries_past_threshold() {
        let cache = DedupCache::new();
        let window = Duration::from_millis(5);
        for i in 0..EVICTION_THRESHOLD {
            cache
                .check_and_insert(&format!("stale-{i}"), window)
                .await;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.check_and_insert("fresh", window).await;
        assert!(cache.len().await < EVICTION_THRESHOLD);
    }
}
