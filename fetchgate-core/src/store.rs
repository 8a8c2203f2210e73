//! Key-value backends shared by the response cache and the rate limiter.

use crate::config::{CacheBackend, CachingSettings};
use crate::error::Result;
use dashmap::DashMap;
use redis::{AsyncCommands, aio::ConnectionManager};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info};

#[derive(Clone)]
pub enum KvStore {
    Memory(MemoryStore),
    Redis(RedisStore),
}

impl KvStore {
    pub fn memory() -> Self {
        KvStore::Memory(MemoryStore::new())
    }

    pub async fn connect(settings: &CachingSettings) -> Result<Self> {
        match settings.backend {
            CacheBackend::Memory => Ok(Self::memory()),
            CacheBackend::Redis => Ok(KvStore::Redis(RedisStore::new(&settings.redis_url).await?)),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            KvStore::Memory(_) => "memory",
            KvStore::Redis(_) => "redis",
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        match self {
            KvStore::Memory(store) => Ok(store.get(key)),
            KvStore::Redis(store) => store.get(key).await,
        }
    }

    pub async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        match self {
            KvStore::Memory(store) => {
                store.set_ex(key, value, ttl);
                Ok(())
            }
            KvStore::Redis(store) => store.set_ex(key, value, ttl).await,
        }
    }

    /// Current value of a counter, zero when absent or expired
    pub async fn get_count(&self, key: &str) -> Result<u64> {
        match self {
            KvStore::Memory(store) => Ok(store.get_count(key)),
            KvStore::Redis(store) => store.get_count(key).await,
        }
    }

    /// Atomically increment a counter and (re)set its expiry
    pub async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<u64> {
        match self {
            KvStore::Memory(store) => Ok(store.incr_with_expiry(key, ttl)),
            KvStore::Redis(store) => store.incr_with_expiry(key, ttl).await,
        }
    }

    pub async fn ping(&self) -> Result<()> {
        match self {
            KvStore::Memory(_) => Ok(()),
            KvStore::Redis(store) => store.ping().await,
        }
    }

    /// Drop expired entries. Redis expires keys itself, so this is a no-op there.
    pub fn purge_expired(&self) -> usize {
        match self {
            KvStore::Memory(store) => store.purge_expired(),
            KvStore::Redis(_) => 0,
        }
    }
}

#[derive(Debug, Clone)]
enum StoredValue {
    Text(String),
    Counter(u64),
}

#[derive(Debug, Clone)]
struct StoredEntry {
    value: StoredValue,
    expires_at: Instant,
}

impl StoredEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// In-process store with lazy TTL eviction
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, StoredEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn live_value(&self, key: &str) -> Option<StoredValue> {
        let now = Instant::now();
        let value = {
            let entry = self.entries.get(key)?;
            if entry.is_expired(now) {
                None
            } else {
                Some(entry.value.clone())
            }
        };

        if value.is_none() {
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        }
        value
    }

    pub fn get(&self, key: &str) -> Option<String> {
        match self.live_value(key)? {
            StoredValue::Text(text) => Some(text),
            StoredValue::Counter(count) => Some(count.to_string()),
        }
    }

    pub fn set_ex(&self, key: &str, value: String, ttl: Duration) {
        self.entries.insert(
            key.to_string(),
            StoredEntry {
                value: StoredValue::Text(value),
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn get_count(&self, key: &str) -> u64 {
        match self.live_value(key) {
            Some(StoredValue::Counter(count)) => count,
            Some(StoredValue::Text(text)) => text.parse().unwrap_or(0),
            None => 0,
        }
    }

    pub fn incr_with_expiry(&self, key: &str, ttl: Duration) -> u64 {
        let now = Instant::now();
        // The shard lock held by `entry` makes read-modify-write atomic per key
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| StoredEntry {
                value: StoredValue::Counter(0),
                expires_at: now + ttl,
            });

        let current = if entry.is_expired(now) {
            0
        } else {
            match &entry.value {
                StoredValue::Counter(count) => *count,
                StoredValue::Text(text) => text.parse().unwrap_or(0),
            }
        };

        let next = current + 1;
        entry.value = StoredValue::Counter(next);
        entry.expires_at = now + ttl;
        next
    }

    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }
}

/// Redis-backed store. `ConnectionManager` reconnects on its own.
#[derive(Clone)]
pub struct RedisStore {
    conn_manager: ConnectionManager,
    redis_url: String,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("redis_url", &self.redis_url)
            .field("conn_manager", &"<ConnectionManager>")
            .finish()
    }
}

impl RedisStore {
    pub async fn new(redis_url: &str) -> Result<Self> {
        info!("Connecting to Redis at {}", redis_url);
        let client = redis::Client::open(redis_url)?;
        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            error!("Failed to create Redis ConnectionManager: {}", e);
            e
        })?;
        info!("Redis cache initialized");

        Ok(Self {
            conn_manager,
            redis_url: redis_url.to_string(),
        })
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn_manager.clone();
        let value = conn.get::<_, Option<String>>(key).await?;
        debug!("Redis GET {} -> {}", key, if value.is_some() { "hit" } else { "miss" });
        Ok(value)
    }

    pub async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    pub async fn get_count(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn_manager.clone();
        let value = conn.get::<_, Option<u64>>(key).await?;
        Ok(value.unwrap_or(0))
    }

    pub async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> Result<u64> {
        let mut conn = self.conn_manager.clone();
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .incr(key, 1u64)
            .expire(key, ttl.as_secs().max(1) as i64)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }

    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }
}
