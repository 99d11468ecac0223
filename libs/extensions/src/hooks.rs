//! Extension hook contracts.
//!
//! An extension provider exposes one capability interface per hook family;
//! the pipeline queries `has_*` predicates instead of reflecting on method
//! presence. Every hook method has a neutral default, so an implementation
//! only overrides the hooks it actually provides and opts out of the rest
//! through the predicates.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use vorion_common::error::Result;
use vorion_models::{
    ActionRecord, ActionRequest, AgentIdentity, Attestation, CapabilityGrant, CapabilityRequest,
    Constraint, ExtensionManifest, TrustBand,
};

// ---------------------------------------------------------------------------
// Hook result types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreCheckResult {
    pub allow: bool,
    pub reason: Option<String>,
    pub constraints: Vec<Constraint>,
}

impl PreCheckResult {
    pub fn allow() -> Self {
        Self {
            allow: true,
            reason: None,
            constraints: Vec::new(),
        }
    }

    pub fn allow_with_constraints(constraints: Vec<Constraint>) -> Self {
        Self {
            allow: true,
            reason: None,
            constraints,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allow: false,
            reason: Some(reason.into()),
            constraints: Vec::new(),
        }
    }
}

/// Dotted-path update applied to an action request before execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Modification {
    pub path: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreActionResult {
    pub proceed: bool,
    pub reason: Option<String>,
    pub modifications: Vec<Modification>,
    pub required_approvals: Vec<String>,
}

impl PreActionResult {
    pub fn proceed() -> Self {
        Self {
            proceed: true,
            reason: None,
            modifications: Vec::new(),
            required_approvals: Vec::new(),
        }
    }

    pub fn block(reason: impl Into<String>) -> Self {
        Self {
            proceed: false,
            reason: Some(reason.into()),
            modifications: Vec::new(),
            required_approvals: Vec::new(),
        }
    }

    pub fn needs_approval(reason: impl Into<String>, approvers: Vec<String>) -> Self {
        Self {
            proceed: false,
            reason: Some(reason.into()),
            modifications: Vec::new(),
            required_approvals: approvers,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FailureDirective {
    pub retry: bool,
    pub retry_delay_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub fallback: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorRecommendation {
    Continue,
    Warn,
    Suspend,
    Revoke,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorVerdict {
    pub in_bounds: bool,
    pub drift_score: f64,
    pub drift_categories: Vec<String>,
    pub recommendation: BehaviorRecommendation,
}

impl BehaviorVerdict {
    pub fn nominal() -> Self {
        Self {
            in_bounds: true,
            drift_score: 0.0,
            drift_categories: Vec::new(),
            recommendation: BehaviorRecommendation::Continue,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsReport {
    pub health: ComponentHealth,
    pub metrics: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyEvent {
    pub kind: String,
    pub description: String,
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyAction {
    Ignore,
    Log,
    Alert,
    Suspend,
    Revoke,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyResponse {
    pub action: AnomalyAction,
    pub notified: Vec<String>,
    pub escalated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrustAdjustment {
    pub score: u16,
    pub band: TrustBand,
    pub tier_changed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyVerdict {
    Allow,
    RequireApproval,
    Deny,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub decision: PolicyVerdict,
    pub reasons: Vec<String>,
    pub evidence: Vec<serde_json::Value>,
    pub obligations: Vec<serde_json::Value>,
}

impl PolicyDecision {
    pub fn allow() -> Self {
        Self {
            decision: PolicyVerdict::Allow,
            reasons: Vec::new(),
            evidence: Vec::new(),
            obligations: Vec::new(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            decision: PolicyVerdict::Deny,
            reasons: vec![reason.into()],
            evidence: Vec::new(),
            obligations: Vec::new(),
        }
    }

    pub fn require_approval(reason: impl Into<String>) -> Self {
        Self {
            decision: PolicyVerdict::RequireApproval,
            reasons: vec![reason.into()],
            evidence: Vec::new(),
            obligations: Vec::new(),
        }
    }
}

/// Point-in-time environment facts handed to policy evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    /// `HH:MM` local time.
    pub time_of_day: String,
    /// Weekday name, e.g. `Monday`.
    pub weekday: String,
    pub business_hours: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyContext {
    pub agent: AgentIdentity,
    pub action: Option<ActionRequest>,
    pub capability: Option<CapabilityRequest>,
    pub environment: EnvironmentSnapshot,
}

// ---------------------------------------------------------------------------
// Hook family traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait LifecycleHooks: Send + Sync {
    async fn on_load(&self) -> Result<()> {
        Ok(())
    }

    async fn on_unload(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
pub trait CapabilityHooks: Send + Sync {
    fn has_pre_check(&self) -> bool {
        true
    }

    async fn pre_check(
        &self,
        _agent: &AgentIdentity,
        _request: &CapabilityRequest,
    ) -> Result<PreCheckResult> {
        Ok(PreCheckResult::allow())
    }

    fn has_post_grant(&self) -> bool {
        true
    }

    /// Sequential fold stage: receives the grant as modified by predecessor
    /// extensions.
    async fn post_grant(
        &self,
        _agent: &AgentIdentity,
        grant: CapabilityGrant,
    ) -> Result<CapabilityGrant> {
        Ok(grant)
    }

    fn has_on_expiry(&self) -> bool {
        true
    }

    async fn on_expiry(&self, _agent: &AgentIdentity, _grant: &CapabilityGrant) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
pub trait ActionHooks: Send + Sync {
    fn has_pre_action(&self) -> bool {
        true
    }

    async fn pre_action(
        &self,
        _agent: &AgentIdentity,
        _request: &ActionRequest,
    ) -> Result<PreActionResult> {
        Ok(PreActionResult::proceed())
    }

    fn has_post_action(&self) -> bool {
        true
    }

    async fn post_action(&self, _agent: &AgentIdentity, _record: &ActionRecord) -> Result<()> {
        Ok(())
    }

    fn has_on_failure(&self) -> bool {
        true
    }

    async fn on_failure(
        &self,
        _agent: &AgentIdentity,
        _record: &ActionRecord,
        _error: &str,
    ) -> Result<FailureDirective> {
        Ok(FailureDirective::default())
    }
}

#[async_trait]
pub trait MonitoringHooks: Send + Sync {
    fn has_verify_behavior(&self) -> bool {
        true
    }

    async fn verify_behavior(
        &self,
        _agent: &AgentIdentity,
        _window_secs: u64,
    ) -> Result<BehaviorVerdict> {
        Ok(BehaviorVerdict::nominal())
    }

    fn has_collect_metrics(&self) -> bool {
        true
    }

    async fn collect_metrics(&self, _agent: &AgentIdentity) -> Result<MetricsReport> {
        Ok(MetricsReport {
            health: ComponentHealth::Healthy,
            metrics: serde_json::Value::Null,
        })
    }

    fn has_on_anomaly(&self) -> bool {
        true
    }

    async fn on_anomaly(
        &self,
        _agent: &AgentIdentity,
        _anomaly: &AnomalyEvent,
    ) -> Result<AnomalyResponse> {
        Ok(AnomalyResponse {
            action: AnomalyAction::Log,
            notified: Vec::new(),
            escalated: false,
        })
    }
}

#[async_trait]
pub trait TrustHooks: Send + Sync {
    fn has_on_revocation(&self) -> bool {
        true
    }

    async fn on_revocation(&self, _agent: &AgentIdentity, _reason: &str) -> Result<()> {
        Ok(())
    }

    fn has_adjust_trust(&self) -> bool {
        true
    }

    /// Sequential fold stage: receives the adjustment as produced by
    /// predecessor extensions.
    async fn adjust_trust(
        &self,
        _agent: &AgentIdentity,
        adjustment: TrustAdjustment,
    ) -> Result<TrustAdjustment> {
        Ok(adjustment)
    }

    fn has_verify_attestation(&self) -> bool {
        true
    }

    async fn verify_attestation(&self, _attestation: &Attestation) -> Result<bool> {
        Ok(true)
    }
}

#[async_trait]
pub trait PolicyHooks: Send + Sync {
    fn has_evaluate(&self) -> bool {
        true
    }

    async fn evaluate(&self, _context: &PolicyContext) -> Result<PolicyDecision> {
        Ok(PolicyDecision::allow())
    }

    fn has_load_policy(&self) -> bool {
        true
    }

    async fn load_policy(&self, _source: &str) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Provider contract
// ---------------------------------------------------------------------------

/// A registered extension. Families the extension does not implement return
/// `None`; within a family, individual hooks can be opted out through the
/// `has_*` predicates.
pub trait ExtensionProvider: Send + Sync {
    fn manifest(&self) -> &ExtensionManifest;

    fn lifecycle(&self) -> Option<&dyn LifecycleHooks> {
        None
    }

    fn capability(&self) -> Option<&dyn CapabilityHooks> {
        None
    }

    fn action(&self) -> Option<&dyn ActionHooks> {
        None
    }

    fn monitoring(&self) -> Option<&dyn MonitoringHooks> {
        None
    }

    fn trust(&self) -> Option<&dyn TrustHooks> {
        None
    }

    fn policy(&self) -> Option<&dyn PolicyHooks> {
        None
    }
}

/// Whether the provider implements at least one dispatchable hook.
pub fn has_any_hook(provider: &dyn ExtensionProvider) -> bool {
    if let Some(capability) = provider.capability() {
        if capability.has_pre_check() || capability.has_post_grant() || capability.has_on_expiry() {
            return true;
        }
    }
    if let Some(action) = provider.action() {
        if action.has_pre_action() || action.has_post_action() || action.has_on_failure() {
            return true;
        }
    }
    if let Some(monitoring) = provider.monitoring() {
        if monitoring.has_verify_behavior()
            || monitoring.has_collect_metrics()
            || monitoring.has_on_anomaly()
        {
            return true;
        }
    }
    if let Some(trust) = provider.trust() {
        if trust.has_on_revocation() || trust.has_adjust_trust() || trust.has_verify_attestation() {
            return true;
        }
    }
    if let Some(policy) = provider.policy() {
        if policy.has_evaluate() || policy.has_load_policy() {
            return true;
        }
    }
    false
}
