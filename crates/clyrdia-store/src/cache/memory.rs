use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use clyrdia_core::Clock;

use super::{CacheBackend, CacheError, Ttl};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

/// In-process backend. Expired entries are dropped lazily on access.
pub struct MemoryBackend {
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryBackend {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Lock the map after purging everything expired as of now.
    fn live(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, e| e.expires_at.is_none_or(|at| at > now));
        entries
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.live().get(key).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let expires_at = Some(self.clock.now() + ttl);
        self.live()
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.live().remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.live().contains_key(key))
    }

    async fn increment(&self, key: &str, amount: i64) -> Result<i64, CacheError> {
        let mut entries = self.live();
        let entry = entries.entry(key.to_string()).or_insert(Entry {
            value: "0".to_string(),
            expires_at: None,
        });
        let current: i64 = entry
            .value
            .parse()
            .map_err(|_| CacheError::NotAnInteger(key.to_string()))?;
        let next = current + amount;
        entry.value = next.to_string();
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        let now = self.clock.now();
        match self.live().get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> Result<Ttl, CacheError> {
        let now = self.clock.now();
        Ok(match self.live().get(key) {
            None => Ttl::Missing,
            Some(Entry {
                expires_at: None, ..
            }) => Ttl::Persistent,
            Some(Entry {
                expires_at: Some(at),
                ..
            }) => Ttl::Remaining(at.duration_since(now)),
        })
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        Ok(self
            .live()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<usize, CacheError> {
        let mut entries = self.live();
        Ok(keys.iter().filter(|k| entries.remove(*k).is_some()).count())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use clyrdia_core::ManualClock;

    use super::*;

    #[tokio::test]
    async fn ttl_reports_remaining_and_persistent() {
        let clock = Arc::new(ManualClock::new());
        let backend = MemoryBackend::new(clock.clone());
        backend.set("a", "1".into(), Duration::from_secs(10)).await.unwrap();
        backend.increment("b", 1).await.unwrap();
        clock.advance(Duration::from_secs(4));

        assert_eq!(backend.ttl("a").await.unwrap(), Ttl::Remaining(Duration::from_secs(6)));
        assert_eq!(backend.ttl("b").await.unwrap(), Ttl::Persistent);
        assert_eq!(backend.ttl("c").await.unwrap(), Ttl::Missing);
    }

    #[tokio::test]
    async fn keys_filter_by_prefix_and_skip_expired() {
        let clock = Arc::new(ManualClock::new());
        let backend = MemoryBackend::new(clock.clone());
        backend.set("clyrdia:a", "1".into(), Duration::from_secs(5)).await.unwrap();
        backend.set("clyrdia:b", "1".into(), Duration::from_secs(50)).await.unwrap();
        backend.set("other:c", "1".into(), Duration::from_secs(50)).await.unwrap();
        clock.advance(Duration::from_secs(6));

        assert_eq!(backend.keys("clyrdia:").await.unwrap(), vec!["clyrdia:b"]);
    }
}
