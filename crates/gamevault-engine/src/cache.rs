//! Short-lived key/value cache.
//!
//! Expiry is lazy: an expired entry stays in memory until a `get` for its key
//! finds it stale. There is no capacity bound. Two concurrent misses on the same
//! key may both run their factory; the later `set` wins.

use std::future::Future;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

/// A TTL cache keyed by string.
pub trait Cache<V>: Send + Sync {
    /// The cached value, if present and not expired.
    fn get(&self, key: &str) -> Option<V>;

    /// Store `value` for `ttl`.
    fn set(&self, key: &str, value: V, ttl: Duration);

    /// Remove one key.
    fn invalidate(&self, key: &str);

    /// Remove every key starting with `prefix`.
    fn invalidate_by_prefix(&self, prefix: &str);
}

/// Cache-aside helper available on every [`Cache`].
pub trait CacheExt<V>: Cache<V> {
    /// Return the cached value or compute it with `factory`.
    ///
    /// A failed factory is returned as-is and nothing is cached.
    fn get_or_set<F, Fut, E>(
        &self,
        key: &str,
        ttl: Duration,
        factory: F,
    ) -> impl Future<Output = Result<V, E>> + Send
    where
        V: Clone + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<V, E>> + Send,
        E: Send;
}

impl<V, C> CacheExt<V> for C
where
    C: Cache<V> + ?Sized,
{
    fn get_or_set<F, Fut, E>(
        &self,
        key: &str,
        ttl: Duration,
        factory: F,
    ) -> impl Future<Output = Result<V, E>> + Send
    where
        V: Clone + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<V, E>> + Send,
        E: Send,
    {
        async move {
            if let Some(hit) = self.get(key) {
                return Ok(hit);
            }
            let value = factory().await?;
            self.set(key, value.clone(), ttl);
            Ok(value)
        }
    }
}

/// [`Cache`] backed by a concurrent hash map.
pub struct TtlCache<V> {
    entries: DashMap<String, (V, Instant)>,
}

impl<V> Default for TtlCache<V> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<V> TtlCache<V> {
    /// Empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries currently held, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V> Cache<V> for TtlCache<V>
where
    V: Clone + Send + Sync,
{
    fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if entry.1 > now => return Some(entry.0.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(key, |_, (_, expires_at)| *expires_at <= now);
        }
        None
    }

    fn set(&self, key: &str, value: V, ttl: Duration) {
        self.entries
            .insert(key.to_string(), (value, Instant::now() + ttl));
    }

    fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    fn invalidate_by_prefix(&self, prefix: &str) {
        self.entries.retain(|key, _| !key.starts_with(prefix));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn entries_expire_lazily() {
        let cache = TtlCache::new();
        cache.set("a", 1, Duration::from_secs(5));

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(cache.get("a"), Some(1));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("a"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn prefix_invalidation_leaves_other_keys() {
        let cache = TtlCache::new();
        let ttl = Duration::from_secs(60);
        cache.set("progress:1", 1, ttl);
        cache.set("progress:2", 2, ttl);
        cache.set("config:x", 3, ttl);

        cache.invalidate_by_prefix("progress:");
        assert_eq!(cache.get("progress:1"), None);
        assert_eq!(cache.get("progress:2"), None);
        assert_eq!(cache.get("config:x"), Some(3));
    }

    #[tokio::test]
    async fn get_or_set_runs_factory_once_per_fill() {
        let cache: TtlCache<u32> = TtlCache::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = cache
                .get_or_set("k", Duration::from_secs(60), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(7)
                })
                .await
                .unwrap();
            assert_eq!(value, 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn factory_errors_are_not_cached() {
        let cache: TtlCache<u32> = TtlCache::new();

        let err = cache
            .get_or_set("k", Duration::from_secs(60), || async {
                Err::<u32, _>("boom".to_string())
            })
            .await;
        assert_eq!(err, Err("boom".to_string()));
        assert!(cache.is_empty());

        let ok = cache
            .get_or_set("k", Duration::from_secs(60), || async { Ok::<_, String>(1) })
            .await;
        assert_eq!(ok, Ok(1));
    }
}
