//! Advisory TTL cache.
//!
//! [`CacheStore`] never surfaces backend failures: every operation is bounded
//! by a timeout, and an unavailable or failing backend degrades to "absent"
//! or `false` after a warning is logged.
//!
//! Caller keys are namespaced as `clyrdia:<sha256(key)>` so the cache can
//! share a Redis instance with unrelated data.

mod memory;
#[cfg(feature = "redis")]
mod redis;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clyrdia_core::{Clock, Fingerprint};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};

pub use memory::MemoryBackend;
#[cfg(feature = "redis")]
pub use self::redis::RedisBackend;

/// Namespace prefix on every backend key.
pub const KEY_PREFIX: &str = "clyrdia:";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("cache operation `{0}` timed out")]
    Timeout(&'static str),

    #[error("value at `{0}` is not an integer")]
    NotAnInteger(String),

    #[error("cache value serialisation failed: {0}")]
    Serde(#[from] serde_json::Error),

    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
}

/// Remaining lifetime of a backend key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    Missing,
    /// Present without expiry.
    Persistent,
    Remaining(Duration),
}

/// Raw key/value backend. Keys passed in are already namespaced.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    /// Add `amount` to an integer value, creating it (without expiry) at 0.
    async fn increment(&self, key: &str, amount: i64) -> Result<i64, CacheError>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError>;

    async fn ttl(&self, key: &str) -> Result<Ttl, CacheError>;

    /// Every live key starting with `prefix`.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, CacheError>;

    /// Delete the given keys. Returns how many existed.
    async fn delete_many(&self, keys: &[String]) -> Result<usize, CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;
}

/// Size-bounded, namespaced cache over a [`CacheBackend`].
#[derive(Clone)]
pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
    default_ttl: Duration,
    max_entries: usize,
    op_timeout: Duration,
}

impl CacheStore {
    pub fn new(
        backend: Arc<dyn CacheBackend>,
        default_ttl: Duration,
        max_entries: usize,
        op_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            default_ttl,
            max_entries: max_entries.max(1),
            op_timeout,
        }
    }

    /// In-process cache driven by `clock`.
    pub fn in_memory(clock: Arc<dyn Clock>, default_ttl: Duration, max_entries: usize) -> Self {
        Self::new(
            Arc::new(MemoryBackend::new(clock)),
            default_ttl,
            max_entries,
            Duration::from_millis(250),
        )
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Backend key for a caller key.
    pub fn namespaced(key: &str) -> String {
        format!("{KEY_PREFIX}{}", Fingerprint::of_text(key))
    }

    /// Run one backend operation under the timeout, logging and absorbing failure.
    async fn guarded<T, F>(&self, op: &'static str, fut: F) -> Option<T>
    where
        F: Future<Output = Result<T, CacheError>>,
    {
        match timeout(self.op_timeout, fut).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                warn!(op, backend = self.backend.name(), error = %e, "cache operation failed");
                None
            }
            Err(_) => {
                warn!(op, backend = self.backend.name(), error = %CacheError::Timeout(op), "cache operation failed");
                None
            }
        }
    }

    // ── Operations ──

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self
            .guarded("get", self.backend.get(&Self::namespaced(key)))
            .await??;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "discarding undecodable cache entry");
                None
            }
        }
    }

    /// Store `value` for `ttl` (the default TTL when `None`). Evicts first
    /// when full, unless `key` is already present and only overwritten.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<Duration>) -> bool {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key, error = %e, "cache value not serialisable");
                return false;
            }
        };
        if !self.exists(key).await {
            self.evict_if_full().await;
        }
        let ttl = ttl.unwrap_or(self.default_ttl);
        self.guarded("set", self.backend.set(&Self::namespaced(key), raw, ttl))
            .await
            .is_some()
    }

    pub async fn delete(&self, key: &str) -> bool {
        self.guarded("delete", self.backend.delete(&Self::namespaced(key)))
            .await
            .unwrap_or(false)
    }

    pub async fn exists(&self, key: &str) -> bool {
        self.guarded("exists", self.backend.exists(&Self::namespaced(key)))
            .await
            .unwrap_or(false)
    }

    pub async fn increment(&self, key: &str, amount: i64) -> Option<i64> {
        self.guarded("increment", self.backend.increment(&Self::namespaced(key), amount))
            .await
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> bool {
        self.guarded("expire", self.backend.expire(&Self::namespaced(key), ttl))
            .await
            .unwrap_or(false)
    }

    /// Remove every namespaced entry.
    pub async fn clear_all(&self) -> bool {
        let Some(keys) = self.guarded("keys", self.backend.keys(KEY_PREFIX)).await else {
            return false;
        };
        if keys.is_empty() {
            return true;
        }
        match self.guarded("clear", self.backend.delete_many(&keys)).await {
            Some(count) => {
                info!(count, "cleared cache entries");
                true
            }
            None => false,
        }
    }

    /// Number of live namespaced entries, or `None` when the backend is unreachable.
    pub async fn len(&self) -> Option<usize> {
        self.guarded("keys", self.backend.keys(KEY_PREFIX))
            .await
            .map(|keys| keys.len())
    }

    pub async fn ping(&self) -> bool {
        self.guarded("ping", self.backend.ping()).await.is_some()
    }

    /// Cached value for `key`, or the result of `fetch`, which is then cached.
    pub async fn get_or_fetch<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        fetch: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.get(key).await {
            debug!(key, "cache hit");
            return Ok(hit);
        }
        debug!(key, "cache miss");
        let fresh = fetch().await?;
        self.set(key, &fresh, ttl).await;
        Ok(fresh)
    }

    // ── Eviction ──

    /// When at or over capacity, drop the ~10% of entries closest to expiry.
    /// Keys without a TTL are never candidates.
    async fn evict_if_full(&self) {
        let Some(keys) = self.guarded("keys", self.backend.keys(KEY_PREFIX)).await else {
            return;
        };
        if keys.len() < self.max_entries {
            return;
        }

        let mut candidates = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(Ttl::Remaining(left)) = self.guarded("ttl", self.backend.ttl(&key)).await {
                candidates.push((left, key));
            }
        }
        candidates.sort();

        let to_remove = (candidates.len() / 10).max(1).min(candidates.len());
        let victims: Vec<String> = candidates
            .into_iter()
            .take(to_remove)
            .map(|(_, key)| key)
            .collect();
        if victims.is_empty() {
            return;
        }
        if let Some(count) = self.guarded("evict", self.backend.delete_many(&victims)).await {
            info!(count, "evicted cache entries");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use clyrdia_core::ManualClock;

    use super::*;

    fn store(max: usize) -> (Arc<ManualClock>, CacheStore) {
        let clock = Arc::new(ManualClock::new());
        let cache = CacheStore::in_memory(clock.clone(), Duration::from_secs(3600), max);
        (clock, cache)
    }

    #[tokio::test]
    async fn set_then_get() {
        let (_, cache) = store(10);
        assert!(cache.set("analysis:v1:abc", &vec![1, 2, 3], None).await);
        assert_eq!(cache.get::<Vec<i32>>("analysis:v1:abc").await, Some(vec![1, 2, 3]));
        assert!(cache.exists("analysis:v1:abc").await);
    }

    #[tokio::test]
    async fn entry_expires_after_ttl() {
        let (clock, cache) = store(10);
        cache.set("k", &"v", Some(Duration::from_secs(30))).await;
        clock.advance(Duration::from_secs(29));
        assert_eq!(cache.get::<String>("k").await.as_deref(), Some("v"));
        clock.advance(Duration::from_secs(2));
        assert_eq!(cache.get::<String>("k").await, None);
        assert!(!cache.exists("k").await);
    }

    #[tokio::test]
    async fn eviction_at_capacity_keeps_new_entry() {
        let (clock, cache) = store(20);
        for i in 0..20 {
            // Later keys live longer, so k0 and k1 expire first.
            cache.set(&format!("k{i}"), &i, Some(Duration::from_secs(100 + i))).await;
        }
        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.len().await, Some(20));

        cache.set("new", &"fresh", Some(Duration::from_secs(10))).await;

        assert_eq!(cache.len().await, Some(19));
        assert!(!cache.exists("k0").await);
        assert!(!cache.exists("k1").await);
        assert!(cache.exists("k2").await);
        assert_eq!(cache.get::<String>("new").await.as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn eviction_removes_at_least_one() {
        let (_, cache) = store(3);
        for i in 0..3u64 {
            cache.set(&format!("k{i}"), &i, Some(Duration::from_secs(10 + i))).await;
        }
        cache.set("k3", &3, None).await;
        assert_eq!(cache.len().await, Some(3));
        assert!(!cache.exists("k0").await);
        assert!(cache.exists("k3").await);
    }

    #[tokio::test]
    async fn overwrite_at_capacity_does_not_evict() {
        let (_, cache) = store(5);
        for i in 0..5u64 {
            cache.set(&format!("k{i}"), &i, Some(Duration::from_secs(10 + i))).await;
        }
        assert!(cache.set("k3", &33, Some(Duration::from_secs(60))).await);
        assert_eq!(cache.len().await, Some(5));
        assert!(cache.exists("k0").await);
        assert_eq!(cache.get::<u64>("k3").await, Some(33));

        cache.set("k5", &5, None).await;
        assert_eq!(cache.len().await, Some(5));
        assert!(!cache.exists("k0").await);
    }

    #[tokio::test]
    async fn persistent_keys_never_evicted() {
        let (_, cache) = store(2);
        assert_eq!(cache.increment("counter", 5).await, Some(5));
        cache.set("a", &1, Some(Duration::from_secs(60))).await;
        cache.set("b", &2, Some(Duration::from_secs(60))).await;
        assert!(cache.exists("counter").await);
        assert!(!cache.exists("a").await);
        assert!(cache.exists("b").await);
    }

    #[tokio::test]
    async fn increment_expire_delete() {
        let (clock, cache) = store(10);
        assert_eq!(cache.increment("hits", 1).await, Some(1));
        assert_eq!(cache.increment("hits", 2).await, Some(3));
        assert!(cache.expire("hits", Duration::from_secs(5)).await);
        clock.advance(Duration::from_secs(6));
        assert!(!cache.exists("hits").await);
        assert!(!cache.expire("hits", Duration::from_secs(5)).await);

        cache.set("gone", &true, None).await;
        assert!(cache.delete("gone").await);
        assert!(!cache.delete("gone").await);
    }

    #[tokio::test]
    async fn increment_non_integer_is_absent() {
        let (_, cache) = store(10);
        cache.set("text", &"hello", None).await;
        assert_eq!(cache.increment("text", 1).await, None);
    }

    #[tokio::test]
    async fn clear_all_empties_namespace() {
        let (_, cache) = store(10);
        cache.set("a", &1, None).await;
        cache.set("b", &2, None).await;
        assert!(cache.clear_all().await);
        assert_eq!(cache.len().await, Some(0));
    }

    #[tokio::test]
    async fn keys_are_namespaced_digests() {
        let key = CacheStore::namespaced("templates:technology:None:true");
        assert!(key.starts_with(KEY_PREFIX));
        assert_eq!(key.len(), KEY_PREFIX.len() + 64);
    }

    #[tokio::test]
    async fn get_or_fetch_computes_once() {
        let (_, cache) = store(10);
        let counter = std::sync::atomic::AtomicUsize::new(0);
        let calls = &counter;
        for _ in 0..3 {
            let value: Result<String, std::convert::Infallible> = cache
                .get_or_fetch("expensive", None, || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("computed".to_string())
                })
                .await;
            assert_eq!(value.unwrap(), "computed");
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    // ── Degradation ──

    struct DownBackend {
        hang: AtomicBool,
    }

    #[async_trait]
    impl CacheBackend for DownBackend {
        fn name(&self) -> &'static str {
            "down"
        }
        async fn get(&self, _: &str) -> Result<Option<String>, CacheError> {
            if self.hang.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            Err(CacheError::Unavailable("connection refused".into()))
        }
        async fn set(&self, _: &str, _: String, _: Duration) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
        async fn delete(&self, _: &str) -> Result<bool, CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
        async fn exists(&self, _: &str) -> Result<bool, CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
        async fn increment(&self, _: &str, _: i64) -> Result<i64, CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
        async fn expire(&self, _: &str, _: Duration) -> Result<bool, CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
        async fn ttl(&self, _: &str) -> Result<Ttl, CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
        async fn keys(&self, _: &str) -> Result<Vec<String>, CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
        async fn delete_many(&self, _: &[String]) -> Result<usize, CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
        async fn ping(&self) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
    }

    fn down_store(hang: bool) -> CacheStore {
        CacheStore::new(
            Arc::new(DownBackend {
                hang: AtomicBool::new(hang),
            }),
            Duration::from_secs(60),
            10,
            Duration::from_millis(50),
        )
    }

    #[tokio::test]
    async fn unavailable_backend_degrades() {
        let cache = down_store(false);
        assert_eq!(cache.get::<String>("k").await, None);
        assert!(!cache.set("k", &"v", None).await);
        assert!(!cache.delete("k").await);
        assert!(!cache.exists("k").await);
        assert_eq!(cache.increment("k", 1).await, None);
        assert!(!cache.clear_all().await);
        assert!(!cache.ping().await);
        assert_eq!(cache.len().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_backend_times_out() {
        let cache = down_store(true);
        assert_eq!(cache.get::<String>("k").await, None);
    }

    #[tokio::test]
    async fn get_or_fetch_still_fetches_when_down() {
        let cache = down_store(false);
        let value: Result<u32, String> = cache.get_or_fetch("k", None, || async { Ok(7) }).await;
        assert_eq!(value, Ok(7));
    }
}
