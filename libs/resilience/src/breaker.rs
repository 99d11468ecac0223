//! Per-service circuit breakers backed by the coordination KV.
//!
//! State lives at `vorion:circuit-breaker:<name>` with a 24-hour hard expiry
//! so stale breakers cannot accumulate. A 1-second in-process read cache
//! keeps hot paths cheap; it is advisory only and every write goes through
//! to the KV. KV read failures fail open (assume CLOSED) to avoid cascading
//! an outage of the coordination store into every guarded call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use vorion_common::adapters::CoordinationStore;
use vorion_common::error::{AppError, Result};

const KEY_PREFIX: &str = "vorion:circuit-breaker:";
const STATE_TTL_SECS: u64 = 24 * 3600;
const LOCAL_CACHE_MS: u128 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_time: Option<i64>,
    pub opened_at: Option<i64>,
    pub half_open_attempts: u32,
    pub window_start_time: Option<i64>,
}

impl Default for CircuitBreakerState {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_time: None,
            opened_at: None,
            half_open_attempts: 0,
            window_start_time: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
    pub half_open_max_attempts: u32,
    pub monitor_window_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 30_000,
            half_open_max_attempts: 2,
            monitor_window_ms: 60_000,
        }
    }
}

/// Shipped defaults for the well-known services. Fully override-able at
/// startup through [`CircuitBreakerRegistry::with_config`].
pub fn default_service_configs() -> HashMap<String, CircuitBreakerConfig> {
    let mut configs = HashMap::new();
    configs.insert(
        "database".to_string(),
        CircuitBreakerConfig {
            failure_threshold: 5,
            reset_timeout_ms: 10_000,
            half_open_max_attempts: 2,
            monitor_window_ms: 30_000,
        },
    );
    configs.insert(
        "redis".to_string(),
        CircuitBreakerConfig {
            failure_threshold: 10,
            reset_timeout_ms: 5_000,
            half_open_max_attempts: 3,
            monitor_window_ms: 30_000,
        },
    );
    configs.insert(
        "webhook".to_string(),
        CircuitBreakerConfig {
            failure_threshold: 3,
            reset_timeout_ms: 60_000,
            half_open_max_attempts: 1,
            monitor_window_ms: 120_000,
        },
    );
    configs.insert(
        "policyEngine".to_string(),
        CircuitBreakerConfig {
            failure_threshold: 5,
            reset_timeout_ms: 15_000,
            half_open_max_attempts: 2,
            monitor_window_ms: 60_000,
        },
    );
    configs.insert(
        "trustEngine".to_string(),
        CircuitBreakerConfig {
            failure_threshold: 5,
            reset_timeout_ms: 15_000,
            half_open_max_attempts: 2,
            monitor_window_ms: 60_000,
        },
    );
    configs.insert(
        "auditService".to_string(),
        CircuitBreakerConfig {
            failure_threshold: 5,
            reset_timeout_ms: 30_000,
            half_open_max_attempts: 2,
            monitor_window_ms: 60_000,
        },
    );
    configs
}

pub type StateChangeCallback = Arc<dyn Fn(&str, CircuitState, CircuitState) + Send + Sync>;

pub struct CircuitBreaker {
    service: String,
    config: CircuitBreakerConfig,
    store: Arc<dyn CoordinationStore>,
    local: RwLock<Option<(CircuitBreakerState, Instant)>>,
    on_state_change: Option<StateChangeCallback>,
}

impl CircuitBreaker {
    pub fn new(
        service: impl Into<String>,
        config: CircuitBreakerConfig,
        store: Arc<dyn CoordinationStore>,
    ) -> Self {
        Self {
            service: service.into(),
            config,
            store,
            local: RwLock::new(None),
            on_state_change: None,
        }
    }

    pub fn with_state_change_callback(mut self, callback: StateChangeCallback) -> Self {
        self.on_state_change = Some(callback);
        self
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    fn key(&self) -> String {
        format!("{}{}", KEY_PREFIX, self.service)
    }

    fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    /// Read state from the KV, or the 1 s local cache when permitted. KV
    /// read errors fail open to CLOSED.
    async fn load(&self, allow_cached: bool) -> CircuitBreakerState {
        if allow_cached {
            let local = self.local.read().await;
            if let Some((state, cached_at)) = local.as_ref() {
                if cached_at.elapsed().as_millis() < LOCAL_CACHE_MS {
                    return state.clone();
                }
            }
        }
        let state = match self.store.get(&self.key()).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(service = %self.service, error = %e, "corrupt breaker state; resetting");
                CircuitBreakerState::default()
            }),
            Ok(None) => CircuitBreakerState::default(),
            Err(e) => {
                tracing::warn!(service = %self.service, error = %e, "breaker state read failed; failing open");
                CircuitBreakerState::default()
            }
        };
        let mut local = self.local.write().await;
        *local = Some((state.clone(), Instant::now()));
        state
    }

    async fn persist(&self, state: &CircuitBreakerState) {
        let raw = serde_json::to_string(state).expect("breaker state serializes");
        if let Err(e) = self.store.set_with_ttl(&self.key(), &raw, STATE_TTL_SECS).await {
            tracing::warn!(service = %self.service, error = %e, "breaker state write failed");
        }
        let mut local = self.local.write().await;
        *local = Some((state.clone(), Instant::now()));
    }

    fn transition(&self, state: &mut CircuitBreakerState, to: CircuitState) {
        let from = state.state;
        if from == to {
            return;
        }
        state.state = to;
        tracing::info!(service = %self.service, ?from, ?to, "circuit breaker transition");
        if let Some(callback) = &self.on_state_change {
            callback(&self.service, from, to);
        }
    }

    /// Current state after applying the OPEN → HALF_OPEN timer.
    pub async fn state(&self) -> CircuitState {
        let mut state = self.load(true).await;
        if state.state == CircuitState::Open {
            let opened_at = state.opened_at.unwrap_or(0);
            if Self::now_ms() - opened_at >= self.config.reset_timeout_ms as i64 {
                self.transition(&mut state, CircuitState::HalfOpen);
                state.half_open_attempts = 0;
                self.persist(&state).await;
            }
        }
        state.state
    }

    /// Fail fast when the breaker is OPEN.
    pub async fn check(&self) -> Result<()> {
        match self.state().await {
            CircuitState::Open => Err(AppError::CircuitBreakerOpen(self.service.clone())),
            _ => Ok(()),
        }
    }

    pub async fn record_success(&self) {
        // Success decisions always consult the authoritative KV.
        let mut state = self.load(false).await;
        match state.state {
            CircuitState::Closed => {
                if state.failure_count != 0 {
                    state.failure_count = 0;
                    state.window_start_time = None;
                    self.persist(&state).await;
                }
            }
            CircuitState::HalfOpen => {
                self.transition(&mut state, CircuitState::Closed);
                state.failure_count = 0;
                state.half_open_attempts = 0;
                state.opened_at = None;
                state.last_failure_time = None;
                state.window_start_time = None;
                self.persist(&state).await;
            }
            CircuitState::Open => {}
        }
    }

    pub async fn record_failure(&self) {
        // The CLOSED → OPEN decision must never rely on the advisory cache.
        let mut state = self.load(false).await;
        let now = Self::now_ms();
        state.last_failure_time = Some(now);
        match state.state {
            CircuitState::Closed => {
                let window_expired = state
                    .window_start_time
                    .map(|start| now - start > self.config.monitor_window_ms as i64)
                    .unwrap_or(true);
                if window_expired {
                    state.window_start_time = Some(now);
                    state.failure_count = 1;
                } else {
                    state.failure_count += 1;
                }
                if state.failure_count >= self.config.failure_threshold {
                    self.transition(&mut state, CircuitState::Open);
                    state.opened_at = Some(now);
                }
            }
            CircuitState::HalfOpen => {
                state.half_open_attempts += 1;
                if state.half_open_attempts >= self.config.half_open_max_attempts {
                    self.transition(&mut state, CircuitState::Open);
                    state.opened_at = Some(now);
                    state.half_open_attempts = 0;
                }
            }
            CircuitState::Open => {}
        }
        self.persist(&state).await;
    }

    /// Guard an operation: short-circuit when OPEN, record the outcome
    /// otherwise.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        self.check().await?;
        match operation().await {
            Ok(value) => {
                self.record_success().await;
                Ok(value)
            }
            Err(err) => {
                self.record_failure().await;
                Err(err)
            }
        }
    }
}

/// Process-wide breaker registry: one breaker per service name, configs
/// resolved from startup overrides falling back to the shipped defaults.
pub struct CircuitBreakerRegistry {
    store: Arc<dyn CoordinationStore>,
    configs: HashMap<String, CircuitBreakerConfig>,
    fallback: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    on_state_change: Option<StateChangeCallback>,
}

impl CircuitBreakerRegistry {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self {
            store,
            configs: default_service_configs(),
            fallback: CircuitBreakerConfig::default(),
            breakers: RwLock::new(HashMap::new()),
            on_state_change: None,
        }
    }

    /// Override (or add) the configuration for one service.
    pub fn with_config(mut self, service: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        self.configs.insert(service.into(), config);
        self
    }

    pub fn with_state_change_callback(mut self, callback: StateChangeCallback) -> Self {
        self.on_state_change = Some(callback);
        self
    }

    pub async fn breaker(&self, service: &str) -> Arc<CircuitBreaker> {
        {
            let breakers = self.breakers.read().await;
            if let Some(breaker) = breakers.get(service) {
                return breaker.clone();
            }
        }
        let mut breakers = self.breakers.write().await;
        if let Some(breaker) = breakers.get(service) {
            return breaker.clone();
        }
        let config = self
            .configs
            .get(service)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone());
        let mut breaker = CircuitBreaker::new(service, config, self.store.clone());
        if let Some(callback) = &self.on_state_change {
            breaker = breaker.with_state_change_callback(callback.clone());
        }
        let breaker = Arc::new(breaker);
        breakers.insert(service.to_string(), breaker.clone());
        breaker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use vorion_common::adapters::MemoryCoordination;

    fn test_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            reset_timeout_ms: 100,
            half_open_max_attempts: 2,
            monitor_window_ms: 10_000,
        }
    }

    fn breaker_with(store: Arc<dyn CoordinationStore>) -> CircuitBreaker {
        CircuitBreaker::new("test-service", test_config(), store)
    }

    #[tokio::test]
    async fn test_opens_after_threshold_failures() {
        let store = Arc::new(MemoryCoordination::new());
        let breaker = breaker_with(store);

        breaker.record_failure().await;
        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);

        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Open);

        let err = breaker.check().await.unwrap_err();
        assert_eq!(err.code(), "CIRCUIT_BREAKER_OPEN");
    }

    #[tokio::test]
    async fn test_open_transitions_to_half_open_then_closes() {
        let store = Arc::new(MemoryCoordination::new());
        let transitions = Arc::new(AtomicU32::new(0));
        let counter = transitions.clone();
        let breaker = breaker_with(store).with_state_change_callback(Arc::new(
            move |_service, _from, to| {
                if to == CircuitState::HalfOpen {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            },
        ));

        for _ in 0..3 {
            breaker.record_failure().await;
        }
        assert_eq!(breaker.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);
        // Re-reads stay HALF_OPEN; the transition fires exactly once.
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);
        assert_eq!(transitions.load(Ordering::SeqCst), 1);

        breaker.record_success().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let store = Arc::new(MemoryCoordination::new());
        let breaker = breaker_with(store);

        for _ in 0..3 {
            breaker.record_failure().await;
        }
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);

        breaker.record_failure().await;
        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_window_expiry_resets_failure_count() {
        let store = Arc::new(MemoryCoordination::new());
        let config = CircuitBreakerConfig {
            failure_threshold: 3,
            reset_timeout_ms: 10_000,
            half_open_max_attempts: 2,
            monitor_window_ms: 50,
        };
        let breaker = CircuitBreaker::new("windowed", config, store);

        breaker.record_failure().await;
        breaker.record_failure().await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        // Window rolled over; this failure starts a fresh count.
        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_success_clears_closed_failures() {
        let store = Arc::new(MemoryCoordination::new());
        let breaker = breaker_with(store);

        breaker.record_failure().await;
        breaker.record_failure().await;
        breaker.record_success().await;
        breaker.record_failure().await;
        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    struct FailingStore;

    #[async_trait::async_trait]
    impl CoordinationStore for FailingStore {
        async fn get(&self, _key: &str) -> vorion_common::error::Result<Option<String>> {
            Err(AppError::external("redis", "connection refused"))
        }
        async fn set_with_ttl(
            &self,
            _key: &str,
            _value: &str,
            _ttl_secs: u64,
        ) -> vorion_common::error::Result<()> {
            Err(AppError::external("redis", "connection refused"))
        }
        async fn set_if_absent(
            &self,
            _key: &str,
            _value: &str,
            _ttl_secs: u64,
        ) -> vorion_common::error::Result<bool> {
            Err(AppError::external("redis", "connection refused"))
        }
        async fn delete(&self, _key: &str) -> vorion_common::error::Result<bool> {
            Err(AppError::external("redis", "connection refused"))
        }
        async fn delete_if_equals(
            &self,
            _key: &str,
            _expected: &str,
        ) -> vorion_common::error::Result<bool> {
            Err(AppError::external("redis", "connection refused"))
        }
        async fn extend_if_equals(
            &self,
            _key: &str,
            _expected: &str,
            _ttl_secs: u64,
        ) -> vorion_common::error::Result<bool> {
            Err(AppError::external("redis", "connection refused"))
        }
        async fn scan_prefix(
            &self,
            _prefix: &str,
            _count: usize,
        ) -> vorion_common::error::Result<Vec<String>> {
            Err(AppError::external("redis", "connection refused"))
        }
        async fn delete_many(&self, _keys: &[String]) -> vorion_common::error::Result<u64> {
            Err(AppError::external("redis", "connection refused"))
        }
    }

    #[tokio::test]
    async fn test_kv_read_failure_fails_open() {
        let breaker = breaker_with(Arc::new(FailingStore));
        assert_eq!(breaker.state().await, CircuitState::Closed);
        assert!(breaker.check().await.is_ok());
    }

    #[tokio::test]
    async fn test_execute_guards_and_records() {
        let store = Arc::new(MemoryCoordination::new());
        let breaker = breaker_with(store);

        let ok: Result<u32> = breaker.execute(|| async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        for _ in 0..3 {
            let _ = breaker
                .execute::<u32, _, _>(|| async {
                    Err(AppError::external("database", "boom"))
                })
                .await;
        }
        let err = breaker.execute(|| async { Ok(7) }).await.unwrap_err();
        assert_eq!(err.code(), "CIRCUIT_BREAKER_OPEN");
    }

    #[tokio::test]
    async fn test_registry_returns_shared_instances() {
        let store: Arc<dyn CoordinationStore> = Arc::new(MemoryCoordination::new());
        let registry = CircuitBreakerRegistry::new(store);
        let a = registry.breaker("database").await;
        let b = registry.breaker("database").await;
        assert!(Arc::ptr_eq(&a, &b));
        // Well-known defaults apply.
        assert_eq!(a.service(), "database");
    }
}
