pub mod breaker;
pub mod leader;
pub mod lock;

pub use breaker::{
    default_service_configs, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry,
    CircuitBreakerState, CircuitState,
};
pub use leader::{LeaderConfig, LeaderElector};
pub use lock::{DistributedLock, LockConfig, LockManager};
