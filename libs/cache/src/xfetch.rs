//! Probabilistic early-refresh cache (XFetch).
//!
//! An entry is due for proactive refresh when
//! `age > ttl + delta * beta * ln(U(0,1])` — the log term is negative, so
//! refresh probability rises towards 1 as age approaches the ttl, and
//! entries that were expensive to compute (large delta) refresh earlier.
//! The stale value is always served immediately; the refresh runs in the
//! background and concurrent triggers for the same key coalesce through an
//! in-process in-flight set. Stored TTLs carry jitter so keys written
//! together do not expire together.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use vorion_common::adapters::CoordinationStore;
use vorion_common::error::Result;

/// Cache entry with the timing metadata XFetch needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XFetchEntry<T> {
    pub value: T,
    /// Epoch milliseconds of the populating fetch.
    pub fetch_time: i64,
    /// Jittered logical TTL in milliseconds.
    pub ttl_ms: u64,
    /// Measured wall time of the fetcher in milliseconds.
    pub delta_ms: u64,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// XFetch aggressiveness; 1.0 is the published default.
    pub beta: f64,
    /// TTL jitter fraction; stored ttl = base * (1 ± jitter).
    pub ttl_jitter: f64,
    /// Scan batch size for prefix invalidation.
    pub scan_batch: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            beta: 1.0,
            ttl_jitter: 0.10,
            scan_batch: 100,
        }
    }
}

#[derive(Clone)]
pub struct XFetchCache {
    store: Arc<dyn CoordinationStore>,
    config: CacheConfig,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl XFetchCache {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self::with_config(store, CacheConfig::default())
    }

    pub fn with_config(store: Arc<dyn CoordinationStore>, config: CacheConfig) -> Self {
        Self {
            store,
            config,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Read through the cache. A miss populates synchronously; a hit inside
    /// the refresh window returns the stale value and schedules exactly one
    /// background refresh per key.
    pub async fn get_with_xfetch<T, F, Fut>(
        &self,
        key: &str,
        base_ttl_ms: u64,
        fetcher: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if let Some(entry) = self.read_entry::<T>(key).await {
            if self.refresh_due(&entry) {
                self.schedule_refresh(key, base_ttl_ms, fetcher).await;
            }
            return Ok(entry.value);
        }
        self.populate(key, base_ttl_ms, fetcher).await
    }

    /// Direct read without populating. Used by callers that separate reads
    /// from writes.
    pub async fn peek<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.read_entry::<T>(key).await.map(|entry| entry.value)
    }

    /// Write a value as if it had just been fetched in `delta_ms`.
    pub async fn put<T: Serialize>(&self, key: &str, value: &T, base_ttl_ms: u64, delta_ms: u64) {
        let entry = XFetchEntry {
            value,
            fetch_time: Utc::now().timestamp_millis(),
            ttl_ms: self.jittered_ttl(base_ttl_ms),
            delta_ms,
        };
        self.write_entry(key, &entry).await;
    }

    pub async fn invalidate(&self, key: &str) -> Result<bool> {
        self.store.delete(key).await
    }

    /// Cursor-based prefix invalidation in batches; never blocks readers.
    pub async fn invalidate_prefix(&self, prefix: &str) -> Result<u64> {
        let keys = self.store.scan_prefix(prefix, self.config.scan_batch).await?;
        let mut removed = 0;
        for batch in keys.chunks(self.config.scan_batch) {
            removed += self.store.delete_many(batch).await?;
        }
        Ok(removed)
    }

    /// Number of refreshes currently in flight. Drops back to zero once all
    /// scheduled refreshes complete.
    pub async fn in_flight_len(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    fn refresh_due<T>(&self, entry: &XFetchEntry<T>) -> bool {
        let age_ms = (Utc::now().timestamp_millis() - entry.fetch_time).max(0) as f64;
        // U in (0, 1]; ln(U) <= 0.
        let u: f64 = 1.0 - rand::thread_rng().gen::<f64>();
        let threshold = entry.ttl_ms as f64 + entry.delta_ms as f64 * self.config.beta * u.ln();
        age_ms > threshold
    }

    fn jittered_ttl(&self, base_ttl_ms: u64) -> u64 {
        let jitter = self.config.ttl_jitter;
        let factor = 1.0 + rand::thread_rng().gen_range(-jitter..=jitter);
        ((base_ttl_ms as f64) * factor).max(1.0) as u64
    }

    async fn read_entry<T: DeserializeOwned>(&self, key: &str) -> Option<XFetchEntry<T>> {
        match self.store.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!(key, error = %e, "corrupt cache entry; treating as miss");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                // Cache read errors serve a miss rather than failing the
                // request.
                tracing::warn!(key, error = %e, "cache read failed; treating as miss");
                None
            }
        }
    }

    async fn write_entry<T: Serialize>(&self, key: &str, entry: &XFetchEntry<T>) {
        let raw = match serde_json::to_string(entry) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(key, error = %e, "cache entry failed to serialize");
                return;
            }
        };
        // Keep the physical key alive past the logical ttl so stale reads
        // during the refresh window still hit.
        let kv_ttl_secs = ((entry.ttl_ms * 2) / 1000).max(1);
        if let Err(e) = self.store.set_with_ttl(key, &raw, kv_ttl_secs).await {
            tracing::warn!(key, error = %e, "cache write failed");
        }
    }

    async fn populate<T, F, Fut>(&self, key: &str, base_ttl_ms: u64, fetcher: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let value = fetcher().await?;
        let delta_ms = started.elapsed().as_millis() as u64;
        let entry = XFetchEntry {
            value: &value,
            fetch_time: Utc::now().timestamp_millis(),
            ttl_ms: self.jittered_ttl(base_ttl_ms),
            delta_ms,
        };
        self.write_entry(key, &entry).await;
        Ok(value)
    }

    async fn schedule_refresh<T, F, Fut>(&self, key: &str, base_ttl_ms: u64, fetcher: F)
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        {
            let mut in_flight = self.in_flight.lock().await;
            if !in_flight.insert(key.to_string()) {
                // A refresh for this key is already running.
                return;
            }
        }
        let cache = self.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            if let Err(e) = cache.populate(&key, base_ttl_ms, fetcher).await {
                tracing::warn!(key = %key, error = %e, "background cache refresh failed");
            }
            cache.in_flight.lock().await.remove(&key);
        });
    }
}
