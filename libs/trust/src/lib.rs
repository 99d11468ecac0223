pub mod ceilings;
pub mod decay;
pub mod engine;
pub mod store;

pub use ceilings::{DeploymentContext, ObservabilityClass, TrustContext};
pub use decay::decay_multiplier;
pub use engine::{EffectiveTrust, TrustEngine, TrustEngineConfig};
pub use store::{InMemoryTrustStore, PgTrustStore, TrustStore};
