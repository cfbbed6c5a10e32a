//! Keyed Session Cache
//!
//! Concurrency-safe memoization keyed by an arbitrary hashable key. Each key
//! owns its own initialization cell, so concurrent first-time requests for
//! one key run a single construction while requests for other keys proceed
//! independently.

use dashmap::DashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Per-key at-most-once cache of cloneable values
pub struct KeyedCache<K, V> {
    cells: DashMap<K, Arc<OnceCell<V>>>,
}

impl<K, V> KeyedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            cells: DashMap::new(),
        }
    }

    /// Return the cached value for `key`, constructing it with `init` on a miss
    ///
    /// Concurrent callers for the same key wait on the one running `init`.
    /// A failed construction caches nothing; the next caller retries.
    pub async fn get_or_try_init<E, F, Fut>(&self, key: K, init: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        // The shard guard must be dropped before awaiting. A cell whose
        // construction failed stays in the map uninitialized, so waiters and
        // later callers keep sharing it.
        let cell = self.cells.entry(key).or_default().clone();

        cell.get_or_try_init(init).await.cloned()
    }

    /// Cached value for `key`, if constructed
    pub fn get(&self, key: &K) -> Option<V> {
        self.cells
            .get(key)
            .and_then(|cell| cell.get().cloned())
    }

    /// Number of constructed entries
    pub fn len(&self) -> usize {
        self.cells
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.cells.clear();
    }
}

impl<K, V> Default for KeyedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_hit_returns_same_instance() {
        let cache: KeyedCache<String, Arc<String>> = KeyedCache::new();

        let first = cache
            .get_or_try_init("OrgAMSP/User1".to_string(), || async {
                Ok::<_, ()>(Arc::new("session".to_string()))
            })
            .await
            .unwrap();
        let second = cache
            .get_or_try_init("OrgAMSP/User1".to_string(), || async {
                Ok::<_, ()>(Arc::new("other".to_string()))
            })
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_init_is_not_cached() {
        let cache: KeyedCache<&'static str, u32> = KeyedCache::new();

        let err = cache
            .get_or_try_init("k", || async { Err::<u32, _>("handshake failed") })
            .await;
        assert_eq!(err, Err("handshake failed"));
        assert!(cache.is_empty());
        assert!(cache.get(&"k").is_none());

        let value = cache
            .get_or_try_init("k", || async { Ok::<_, &str>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(cache.get(&"k"), Some(7));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_requests_construct_once() {
        let cache: Arc<KeyedCache<(String, String), Arc<usize>>> = Arc::new(KeyedCache::new());
        let constructions = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let cache = cache.clone();
                let constructions = constructions.clone();
                tokio::spawn(async move {
                    cache
                        .get_or_try_init(("OrgAMSP".to_string(), "Admin".to_string()), || async {
                            let n = constructions.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok::<_, ()>(Arc::new(n))
                        })
                        .await
                        .unwrap()
                })
            })
            .collect();

        let sessions: Vec<Arc<usize>> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(constructions.load(Ordering::SeqCst), 1);
        assert!(sessions.iter().all(|s| Arc::ptr_eq(s, &sessions[0])));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_retry_after_failed_init_shares_one_construction() {
        let cache: Arc<KeyedCache<&'static str, Arc<usize>>> = Arc::new(KeyedCache::new());
        let constructions = Arc::new(AtomicUsize::new(0));

        let request = |delay_ms: u64, fail: bool| {
            let cache = cache.clone();
            let constructions = constructions.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                cache
                    .get_or_try_init("OrgAMSP/Admin", || async move {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        if fail {
                            return Err("handshake failed");
                        }
                        Ok(Arc::new(constructions.fetch_add(1, Ordering::SeqCst)))
                    })
                    .await
            })
        };

        // first builder fails; a waiter takes over while a late caller arrives
        let failing = request(0, true);
        let waiter = request(10, false);
        let late = request(70, false);

        assert_eq!(failing.await.unwrap(), Err("handshake failed"));
        let waiter = waiter.await.unwrap().unwrap();
        let late = late.await.unwrap().unwrap();

        assert_eq!(constructions.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&waiter, &late));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unrelated_keys_do_not_wait_on_each_other() {
        let cache: Arc<KeyedCache<u8, u8>> = Arc::new(KeyedCache::new());

        let slow = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_try_init(1, || async {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        Ok::<_, ()>(1)
                    })
                    .await
            })
        };

        let fast = tokio::time::timeout(
            Duration::from_secs(1),
            cache.get_or_try_init(2, || async { Ok::<_, ()>(2) }),
        )
        .await;

        assert_eq!(fast, Ok(Ok(2)));
        slow.abort();
    }
}
