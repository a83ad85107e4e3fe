use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// Process-wide per-symbol mutual exclusion, shared between the execution
/// engine and the stream reconciler (`spec.md` §3.6, §5). Mirrors the
/// teacher's `ConnectionManager`'s `Arc<RwLock<HashMap<K, V>>>` shape: a
/// read-locked map for the common case of "the lock for this symbol already
/// exists", upgraded to a write lock only the first time a symbol is seen.
#[derive(Debug, Default, Clone)]
pub struct SymbolLockRegistry {
    locks: Arc<RwLock<HashMap<String, Arc<Mutex<()>>>>>,
}

impl SymbolLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lock_for(&self, symbol: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.read().await.get(symbol) {
            return lock.clone();
        }
        let mut locks = self.locks.write().await;
        locks
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquire the lock for `symbol`, blocking until held. Returns an owned
    /// guard (via `tokio::sync::Mutex::lock_owned`) so callers can `.await`
    /// arbitrarily long operations (exchange calls, persistence writes)
    /// while holding it without borrowing the registry itself.
    pub async fn acquire(&self, symbol: &str) -> OwnedMutexGuard<()> {
        let lock = self.lock_for(symbol).await;
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn same_symbol_serializes() {
        let registry = SymbolLockRegistry::new();
        let counter = Arc::new(AtomicU32::new(0));
        let max_concurrent = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let registry = registry.clone();
            let counter = counter.clone();
            let max_concurrent = max_concurrent.clone();
            handles.push(tokio::spawn(async move {
                let _guard = registry.acquire("BTCUSDT").await;
                let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
                max_concurrent.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                counter.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_concurrent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_symbols_run_concurrently() {
        let registry = SymbolLockRegistry::new();
        let start = std::time::Instant::now();
        let a = {
            let registry = registry.clone();
            tokio::spawn(async move {
                let _g = registry.acquire("BTCUSDT").await;
                tokio::time::sleep(Duration::from_millis(30)).await;
            })
        };
        let b = {
            let registry = registry.clone();
            tokio::spawn(async move {
                let _g = registry.acquire("ETHUSDT").await;
                tokio::time::sleep(Duration::from_millis(30)).await;
            })
        };
        a.await.unwrap();
        b.await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(55));
    }
}
