use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;

use super::{CacheBackend, CacheError, Ttl};

/// Redis backend. A fresh multiplexed connection is taken per operation so a
/// restarted server is picked up without extra reconnect logic.
#[derive(Clone)]
pub struct RedisBackend {
    client: redis::Client,
}

impl RedisBackend {
    pub fn new(url: &str) -> Result<Self, CacheError> {
        Ok(Self {
            client: redis::Client::open(url)?,
        })
    }

    async fn conn(&self) -> Result<MultiplexedConnection, CacheError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CacheError::Unavailable(e.to_string()))
    }
}

/// Keys requested per SCAN round trip.
const SCAN_BATCH: usize = 500;

fn whole_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

/// Glob pattern matching every key under `prefix`.
fn prefix_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('*');
    pattern
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn().await?;
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn().await?;
        let _: () = conn.set_ex(key, value, whole_secs(ttl)).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn().await?;
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn().await?;
        Ok(conn.exists(key).await?)
    }

    async fn increment(&self, key: &str, amount: i64) -> Result<i64, CacheError> {
        let mut conn = self.conn().await?;
        conn.incr(key, amount).await.map_err(|e| {
            if e.kind() == redis::ErrorKind::ResponseError {
                CacheError::NotAnInteger(key.to_string())
            } else {
                CacheError::Redis(e)
            }
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        let mut conn = self.conn().await?;
        Ok(conn.expire(key, whole_secs(ttl) as i64).await?)
    }

    async fn ttl(&self, key: &str) -> Result<Ttl, CacheError> {
        let mut conn = self.conn().await?;
        let secs: i64 = conn.ttl(key).await?;
        Ok(match secs {
            -2 => Ttl::Missing,
            -1 => Ttl::Persistent,
            s => Ttl::Remaining(Duration::from_secs(s.max(0) as u64)),
        })
    }

    /// Walks the keyspace with SCAN; duplicates across rounds are dropped.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.conn().await?;
        let pattern = prefix_pattern(prefix);
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn delete_many(&self, keys: &[String]) -> Result<usize, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        let removed: i64 = conn.del(keys).await?;
        Ok(removed.max(0) as usize)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
