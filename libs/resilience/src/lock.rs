//! Distributed locks over the coordination KV.
//!
//! Acquisition is an atomic set-if-absent of a unique token with a TTL,
//! retried with exponential backoff and jitter until the acquire timeout
//! elapses. Release and extension are check-and-delete / check-and-extend
//! scripts keyed on the token, so a holder that lost its lease can never
//! release or extend somebody else's lock.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use uuid::Uuid;
use vorion_common::adapters::CoordinationStore;
use vorion_common::error::{AppError, Result};

const KEY_PREFIX: &str = "vorion:lock:";

#[derive(Debug, Clone)]
pub struct LockConfig {
    pub ttl_secs: u64,
    pub retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub jitter_factor: f64,
    pub acquire_timeout_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 30,
            retry_delay_ms: 50,
            max_retry_delay_ms: 1_000,
            jitter_factor: 0.25,
            acquire_timeout_ms: 5_000,
        }
    }
}

pub struct LockManager {
    store: Arc<dyn CoordinationStore>,
    config: LockConfig,
}

impl LockManager {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self {
            store,
            config: LockConfig::default(),
        }
    }

    pub fn with_config(store: Arc<dyn CoordinationStore>, config: LockConfig) -> Self {
        Self { store, config }
    }

    fn key(resource: &str) -> String {
        format!("{}{}", KEY_PREFIX, resource)
    }

    /// Single acquisition attempt without retries.
    pub async fn try_acquire(&self, resource: &str) -> Result<Option<DistributedLock>> {
        let token = Uuid::new_v4().to_string();
        let key = Self::key(resource);
        let acquired = self
            .store
            .set_if_absent(&key, &token, self.config.ttl_secs)
            .await?;
        if acquired {
            Ok(Some(DistributedLock {
                store: self.store.clone(),
                key,
                token,
            }))
        } else {
            Ok(None)
        }
    }

    /// Acquire with exponential backoff and jitter, up to the configured
    /// acquire timeout.
    pub async fn acquire(&self, resource: &str) -> Result<DistributedLock> {
        let deadline = Instant::now() + Duration::from_millis(self.config.acquire_timeout_ms);
        let mut attempt: u32 = 0;
        loop {
            if let Some(lock) = self.try_acquire(resource).await? {
                return Ok(lock);
            }
            let base = self
                .config
                .retry_delay_ms
                .saturating_mul(1u64 << attempt.min(16))
                .min(self.config.max_retry_delay_ms);
            let jitter = {
                let mut rng = rand::thread_rng();
                rng.gen_range(-self.config.jitter_factor..=self.config.jitter_factor)
            };
            let delay_ms = ((base as f64) * (1.0 + jitter)).max(1.0) as u64;
            if Instant::now() + Duration::from_millis(delay_ms) >= deadline {
                return Err(AppError::Timeout(format!("lock acquisition for {}", resource)));
            }
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            attempt += 1;
        }
    }

    /// Admin operation: drop a lock regardless of holder. Audited.
    pub async fn force_release(&self, resource: &str) -> Result<bool> {
        tracing::warn!(resource, "force-releasing distributed lock");
        self.store.delete(&Self::key(resource)).await
    }
}

/// Held lock carrying its fencing token. Dropping the guard does not release
/// the lock; the TTL bounds a crashed holder instead.
pub struct DistributedLock {
    store: Arc<dyn CoordinationStore>,
    key: String,
    token: String,
}

impl std::fmt::Debug for DistributedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedLock")
            .field("key", &self.key)
            .field("token", &self.token)
            .finish()
    }
}

impl DistributedLock {
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Release iff we still hold the token; returns false otherwise.
    pub async fn release(self) -> Result<bool> {
        self.store.delete_if_equals(&self.key, &self.token).await
    }

    /// Refresh the TTL iff we still hold the token; returns false otherwise.
    pub async fn extend(&self, ttl_secs: u64) -> Result<bool> {
        self.store
            .extend_if_equals(&self.key, &self.token, ttl_secs)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vorion_common::adapters::MemoryCoordination;

    fn manager(store: Arc<MemoryCoordination>) -> LockManager {
        LockManager::with_config(
            store,
            LockConfig {
                ttl_secs: 30,
                retry_delay_ms: 5,
                max_retry_delay_ms: 20,
                jitter_factor: 0.25,
                acquire_timeout_ms: 200,
            },
        )
    }

    #[tokio::test]
    async fn test_acquire_is_exclusive() {
        let store = Arc::new(MemoryCoordination::new());
        let manager = manager(store);

        let lock = manager.acquire("resource").await.unwrap();
        assert!(manager.try_acquire("resource").await.unwrap().is_none());
        assert!(lock.release().await.unwrap());
        assert!(manager.try_acquire("resource").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_acquire_times_out_under_contention() {
        let store = Arc::new(MemoryCoordination::new());
        let manager = manager(store);

        let _held = manager.acquire("busy").await.unwrap();
        let err = manager.acquire("busy").await.unwrap_err();
        assert_eq!(err.code(), "TIMEOUT");
    }

    #[tokio::test]
    async fn test_acquire_waits_for_release() {
        let store = Arc::new(MemoryCoordination::new());
        let manager = Arc::new(manager(store));

        let held = manager.acquire("handoff").await.unwrap();
        let waiter = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.acquire("handoff").await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(held.release().await.unwrap());
        let lock = waiter.await.unwrap().unwrap();
        assert!(lock.release().await.unwrap());
    }

    #[tokio::test]
    async fn test_release_requires_ownership() {
        let store = Arc::new(MemoryCoordination::new());
        let manager = manager(store.clone());

        let lock = manager.acquire("owned").await.unwrap();
        // Another writer stole the key (e.g. after TTL expiry elsewhere).
        store
            .set_with_ttl("vorion:lock:owned", "someone-else", 30)
            .await
            .unwrap();
        assert!(!lock.release().await.unwrap());
        assert_eq!(
            store.get("vorion:lock:owned").await.unwrap().as_deref(),
            Some("someone-else")
        );
    }

    #[tokio::test]
    async fn test_extend_requires_ownership() {
        let store = Arc::new(MemoryCoordination::new());
        let manager = manager(store.clone());

        let lock = manager.acquire("lease").await.unwrap();
        assert!(lock.extend(60).await.unwrap());

        store
            .set_with_ttl("vorion:lock:lease", "usurper", 30)
            .await
            .unwrap();
        assert!(!lock.extend(60).await.unwrap());
    }

    #[tokio::test]
    async fn test_force_release() {
        let store = Arc::new(MemoryCoordination::new());
        let manager = manager(store);

        let _lock = manager.acquire("stuck").await.unwrap();
        assert!(manager.force_release("stuck").await.unwrap());
        assert!(manager.try_acquire("stuck").await.unwrap().is_some());
    }
}
