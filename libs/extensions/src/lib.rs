pub mod hooks;
pub mod pipeline;
pub mod registry;
pub mod timeout;

pub use hooks::{
    ActionHooks, AnomalyAction, AnomalyEvent, AnomalyResponse, BehaviorRecommendation,
    BehaviorVerdict, CapabilityHooks, ComponentHealth, EnvironmentSnapshot, ExtensionProvider,
    FailureDirective, LifecycleHooks, MetricsReport, Modification, MonitoringHooks,
    PolicyContext, PolicyDecision, PolicyHooks, PolicyVerdict, PreActionResult, PreCheckResult,
    TrustAdjustment, TrustHooks,
};
pub use pipeline::{
    AggregatedAnomaly, AggregatedBehavior, AggregatedFailure, AggregatedMetrics,
    AggregatedPreAction, AggregatedPreCheck, ExtensionPipeline, PipelineConfig,
};
pub use registry::ExtensionRegistry;
pub use timeout::{HookKind, TimeoutTable};
