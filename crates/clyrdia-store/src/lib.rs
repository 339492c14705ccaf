//! Storage layer: analysis records (in-memory or DuckDB) and the TTL cache (in-memory or Redis).

mod error;
pub use error::StoreError;

pub mod cache;
pub use cache::{CacheBackend, CacheError, CacheStore, MemoryBackend, Ttl};
#[cfg(feature = "redis")]
pub use cache::RedisBackend;

mod record;
pub use record::{AnalyticsSummary, MemoryRecordStore, Provenance, RecordStore};

#[cfg(feature = "duckdb")]
mod duck;
#[cfg(feature = "duckdb")]
pub use duck::DuckRecordStore;
