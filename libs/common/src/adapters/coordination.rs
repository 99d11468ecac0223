//! Coordination key-value store adapter.
//!
//! Circuit breakers, distributed locks, leader election, and the cache layer
//! all coordinate through this interface. The contract mirrors the commands
//! the core actually needs: GET, SETEX, SET NX EX, DEL, SCAN MATCH COUNT,
//! and the two atomic EVAL scripts (check-and-delete, check-and-extend).
//! TTLs honour expiry at second granularity.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;

#[async_trait]
pub trait CoordinationStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// SETEX: unconditional write with expiry.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;

    /// SET NX EX: atomic set-if-absent with expiry. Returns whether the key
    /// was written.
    async fn set_if_absent(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<bool>;

    /// Atomic check-and-delete: delete iff the stored value equals
    /// `expected`. Returns whether a delete happened.
    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool>;

    /// Atomic check-and-extend: refresh the TTL iff the stored value equals
    /// `expected`. Returns whether the TTL was refreshed.
    async fn extend_if_equals(&self, key: &str, expected: &str, ttl_secs: u64) -> Result<bool>;

    /// Cursor-based non-blocking scan of keys under a prefix.
    async fn scan_prefix(&self, prefix: &str, count: usize) -> Result<Vec<String>>;

    async fn delete_many(&self, keys: &[String]) -> Result<u64>;
}

// ---------------------------------------------------------------------------
// Redis implementation
// ---------------------------------------------------------------------------

const CHECK_AND_DELETE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

const CHECK_AND_EXTEND: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("EXPIRE", KEYS[1], ARGV[2])
else
    return 0
end
"#;

#[derive(Clone)]
pub struct RedisCoordination {
    manager: redis::aio::ConnectionManager,
}

impl RedisCoordination {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let manager = redis::aio::ConnectionManager::new(client).await?;
        Ok(Self { manager })
    }

    pub fn from_manager(manager: redis::aio::ConnectionManager) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl CoordinationStore for RedisCoordination {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.manager.clone();
        redis::cmd("SETEX")
            .arg(key)
            .arg(ttl_secs)
            .arg(value)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool> {
        let mut conn = self.manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.manager.clone();
        let removed: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(removed > 0)
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool> {
        let mut conn = self.manager.clone();
        let removed: i64 = redis::Script::new(CHECK_AND_DELETE)
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn extend_if_equals(&self, key: &str, expected: &str, ttl_secs: u64) -> Result<bool> {
        let mut conn = self.manager.clone();
        let extended: i64 = redis::Script::new(CHECK_AND_EXTEND)
            .key(key)
            .arg(expected)
            .arg(ttl_secs)
            .invoke_async(&mut conn)
            .await?;
        Ok(extended > 0)
    }

    async fn scan_prefix(&self, prefix: &str, count: usize) -> Result<Vec<String>> {
        let mut conn = self.manager.clone();
        let pattern = format!("{}*", prefix);
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(count)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(keys)
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.manager.clone();
        let mut cmd = redis::cmd("DEL");
        for key in keys {
            cmd.arg(key);
        }
        let removed: u64 = cmd.query_async(&mut conn).await?;
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation (tests, single-process deployments)
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-process stand-in for the coordination KV with the same expiry
/// semantics. Backs tests and single-node deployments.
#[derive(Clone, Default)]
pub struct MemoryCoordination {
    entries: Arc<RwLock<HashMap<String, MemoryEntry>>>,
}

impl MemoryCoordination {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        let entries = self.entries.read().await;
        entries.values().filter(|e| !e.is_expired()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CoordinationStore for MemoryCoordination {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|e| !e.is_expired())
            .map(|e| e.value.clone()))
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_secs)),
            },
        );
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool> {
        let mut entries = self.entries.write().await;
        let occupied = entries.get(key).is_some_and(|e| !e.is_expired());
        if occupied {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_secs)),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.write().await;
        Ok(entries.remove(key).is_some_and(|e| !e.is_expired()))
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool> {
        let mut entries = self.entries.write().await;
        let matches = entries
            .get(key)
            .is_some_and(|e| !e.is_expired() && e.value == expected);
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }

    async fn extend_if_equals(&self, key: &str, expected: &str, ttl_secs: u64) -> Result<bool> {
        let mut entries = self.entries.write().await;
        match entries.get_mut(key) {
            Some(entry) if !entry.is_expired() && entry.value == expected => {
                entry.expires_at = Some(Instant::now() + Duration::from_secs(ttl_secs));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn scan_prefix(&self, prefix: &str, _count: usize) -> Result<Vec<String>> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && !e.is_expired())
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64> {
        let mut entries = self.entries.write().await;
        let mut removed = 0;
        for key in keys {
            if entries.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
