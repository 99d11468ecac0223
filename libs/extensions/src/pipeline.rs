//! Hook dispatch and aggregation.
//!
//! For each hook call the pipeline iterates the agent's active extensions in
//! order, racing every call against the hook's timeout. A timed-out, failed,
//! or circuit-open call synthesizes the hook's documented failure result
//! (deny, block, pass-through, or skip) instead of surfacing an error; the
//! per-hook aggregation rules below are contractual.

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use vorion_common::error::Result;
use vorion_models::{
    ActionRecord, ActionRequest, AgentIdentity, Attestation, CapabilityGrant, CapabilityRequest,
    Constraint,
};
use vorion_resilience::CircuitBreakerRegistry;

use crate::hooks::{
    AnomalyAction, AnomalyEvent, BehaviorRecommendation, ComponentHealth, ExtensionProvider,
    MetricsReport, Modification, PolicyContext, PolicyDecision, PolicyVerdict, TrustAdjustment,
};
use crate::timeout::{HookKind, TimeoutTable};

#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    /// Short-circuit preCheck / preAction / policy.evaluate on the first
    /// negative result.
    pub fail_fast: bool,
}

pub struct ExtensionPipeline {
    timeouts: TimeoutTable,
    config: PipelineConfig,
    breakers: Option<Arc<CircuitBreakerRegistry>>,
}

enum HookOutcome<T> {
    Value(T),
    Failed(String),
    TimedOut,
    CircuitOpen,
}

impl Default for ExtensionPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtensionPipeline {
    pub fn new() -> Self {
        Self {
            timeouts: TimeoutTable::new(),
            config: PipelineConfig::default(),
            breakers: None,
        }
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutTable) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Guard every extension call with a per-extension circuit breaker.
    pub fn with_breakers(mut self, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        self.breakers = Some(breakers);
        self
    }

    async fn dispatch<T, Fut>(
        &self,
        extension_id: &str,
        kind: HookKind,
        call: Fut,
    ) -> HookOutcome<T>
    where
        Fut: std::future::Future<Output = Result<T>>,
    {
        let breaker = match &self.breakers {
            Some(registry) => {
                let breaker = registry
                    .breaker(&format!("extension:{}", extension_id))
                    .await;
                if breaker.check().await.is_err() {
                    tracing::warn!(extension_id, hook = kind.name(), "extension circuit open; skipping call");
                    return HookOutcome::CircuitOpen;
                }
                Some(breaker)
            }
            None => None,
        };

        match tokio::time::timeout(self.timeouts.timeout(kind), call).await {
            Ok(Ok(value)) => {
                if let Some(breaker) = &breaker {
                    breaker.record_success().await;
                }
                HookOutcome::Value(value)
            }
            Ok(Err(e)) => {
                if let Some(breaker) = &breaker {
                    breaker.record_failure().await;
                }
                tracing::warn!(extension_id, hook = kind.name(), error = %e, "extension hook failed");
                HookOutcome::Failed(e.to_string())
            }
            Err(_) => {
                if let Some(breaker) = &breaker {
                    breaker.record_failure().await;
                }
                tracing::warn!(extension_id, hook = kind.name(), "extension hook timed out");
                HookOutcome::TimedOut
            }
        }
    }

    fn failure_reason<T>(outcome: &HookOutcome<T>, kind: HookKind) -> Option<String> {
        match outcome {
            HookOutcome::Value(_) => None,
            HookOutcome::Failed(message) => Some(format!("Extension error: {}", message)),
            HookOutcome::TimedOut => Some(format!("Extension timeout: {}", kind.name())),
            HookOutcome::CircuitOpen => Some(format!("Extension unavailable: {}", kind.name())),
        }
    }

    // -----------------------------------------------------------------------
    // capability.*
    // -----------------------------------------------------------------------

    /// ALLOW iff every result allows. Constraints concatenate across all
    /// results; the first denial carries the reason and extension id. A
    /// failed or timed-out extension counts as a denial.
    pub async fn run_pre_check(
        &self,
        extensions: &[Arc<dyn ExtensionProvider>],
        agent: &AgentIdentity,
        request: &CapabilityRequest,
    ) -> AggregatedPreCheck {
        let mut aggregated = AggregatedPreCheck {
            allow: true,
            constraints: Vec::new(),
            denied_by: None,
            denial_reason: None,
        };
        for extension in extensions {
            let Some(capability) = extension.capability() else {
                continue;
            };
            if !capability.has_pre_check() {
                continue;
            }
            let id = extension.manifest().extension_id.clone();
            let outcome = self
                .dispatch(&id, HookKind::PreCheck, capability.pre_check(agent, request))
                .await;
            match outcome {
                HookOutcome::Value(result) => {
                    aggregated.constraints.extend(result.constraints);
                    if !result.allow && aggregated.allow {
                        aggregated.allow = false;
                        aggregated.denied_by = Some(id);
                        aggregated.denial_reason =
                            Some(result.reason.unwrap_or_else(|| "denied".to_string()));
                    }
                }
                other => {
                    if aggregated.allow {
                        aggregated.allow = false;
                        aggregated.denied_by = Some(id);
                        aggregated.denial_reason = Self::failure_reason(&other, HookKind::PreCheck);
                    }
                }
            }
            if self.config.fail_fast && !aggregated.allow {
                break;
            }
        }
        aggregated
    }

    /// Sequential fold: each extension receives the grant as modified by its
    /// predecessors; a failed stage leaves the grant unchanged and the fold
    /// continues.
    pub async fn run_post_grant(
        &self,
        extensions: &[Arc<dyn ExtensionProvider>],
        agent: &AgentIdentity,
        mut grant: CapabilityGrant,
    ) -> CapabilityGrant {
        for extension in extensions {
            let Some(capability) = extension.capability() else {
                continue;
            };
            if !capability.has_post_grant() {
                continue;
            }
            let id = extension.manifest().extension_id.clone();
            let outcome = self
                .dispatch(
                    &id,
                    HookKind::PostGrant,
                    capability.post_grant(agent, grant.clone()),
                )
                .await;
            if let HookOutcome::Value(modified) = outcome {
                grant = modified;
            }
        }
        grant
    }

    /// Notify extensions of a grant expiry. Log-only.
    pub async fn run_on_expiry(
        &self,
        extensions: &[Arc<dyn ExtensionProvider>],
        agent: &AgentIdentity,
        grant: &CapabilityGrant,
    ) {
        for extension in extensions {
            let Some(capability) = extension.capability() else {
                continue;
            };
            if !capability.has_on_expiry() {
                continue;
            }
            let id = extension.manifest().extension_id.clone();
            let _ = self
                .dispatch(&id, HookKind::OnExpiry, capability.on_expiry(agent, grant))
                .await;
        }
    }

    // -----------------------------------------------------------------------
    // action.*
    // -----------------------------------------------------------------------

    /// PROCEED iff every result proceeds. Modifications and approval
    /// requirements concatenate; the first block carries reason and
    /// extension id. A failed or timed-out extension counts as a block.
    pub async fn run_pre_action(
        &self,
        extensions: &[Arc<dyn ExtensionProvider>],
        agent: &AgentIdentity,
        request: &ActionRequest,
    ) -> AggregatedPreAction {
        let mut aggregated = AggregatedPreAction {
            proceed: true,
            blocked_by: None,
            block_reason: None,
            modifications: Vec::new(),
            required_approvals: Vec::new(),
        };
        for extension in extensions {
            let Some(action) = extension.action() else {
                continue;
            };
            if !action.has_pre_action() {
                continue;
            }
            let id = extension.manifest().extension_id.clone();
            let outcome = self
                .dispatch(&id, HookKind::PreAction, action.pre_action(agent, request))
                .await;
            match outcome {
                HookOutcome::Value(result) => {
                    aggregated.modifications.extend(result.modifications);
                    for approver in result.required_approvals {
                        if !aggregated.required_approvals.contains(&approver) {
                            aggregated.required_approvals.push(approver);
                        }
                    }
                    if !result.proceed && aggregated.proceed {
                        aggregated.proceed = false;
                        aggregated.blocked_by = Some(id);
                        aggregated.block_reason =
                            Some(result.reason.unwrap_or_else(|| "blocked".to_string()));
                    }
                }
                other => {
                    if aggregated.proceed {
                        aggregated.proceed = false;
                        aggregated.blocked_by = Some(id);
                        aggregated.block_reason = Self::failure_reason(&other, HookKind::PreAction);
                    }
                }
            }
            if self.config.fail_fast && !aggregated.proceed {
                break;
            }
        }
        aggregated
    }

    /// Parallel fire-and-forget fan-out with individual timeouts. Failures
    /// are logged, never propagated to the originating request.
    pub async fn run_post_action(
        &self,
        extensions: &[Arc<dyn ExtensionProvider>],
        agent: &AgentIdentity,
        record: &ActionRecord,
    ) {
        let timeout = self.timeouts.timeout(HookKind::PostAction);
        for extension in extensions {
            let Some(action) = extension.action() else {
                continue;
            };
            if !action.has_post_action() {
                continue;
            }
            let breaker = match &self.breakers {
                Some(registry) => Some(
                    registry
                        .breaker(&format!(
                            "extension:{}",
                            extension.manifest().extension_id
                        ))
                        .await,
                ),
                None => None,
            };
            let extension = extension.clone();
            let agent = agent.clone();
            let record = record.clone();
            tokio::spawn(async move {
                let id = extension.manifest().extension_id.clone();
                if let Some(breaker) = &breaker {
                    if breaker.check().await.is_err() {
                        tracing::warn!(extension_id = %id, "postAction skipped; extension circuit open");
                        return;
                    }
                }
                let Some(action) = extension.action() else {
                    return;
                };
                match tokio::time::timeout(timeout, action.post_action(&agent, &record)).await {
                    Ok(Ok(())) => {
                        if let Some(breaker) = &breaker {
                            breaker.record_success().await;
                        }
                    }
                    Ok(Err(e)) => {
                        if let Some(breaker) = &breaker {
                            breaker.record_failure().await;
                        }
                        tracing::warn!(extension_id = %id, error = %e, "postAction hook failed");
                    }
                    Err(_) => {
                        if let Some(breaker) = &breaker {
                            breaker.record_failure().await;
                        }
                        tracing::warn!(extension_id = %id, "postAction hook timed out");
                    }
                }
            });
        }
    }

    /// Retry iff any extension requests it; retry delay and retry cap take
    /// the minimum of the suggestions; the fallback is the first non-null.
    pub async fn run_on_failure(
        &self,
        extensions: &[Arc<dyn ExtensionProvider>],
        agent: &AgentIdentity,
        record: &ActionRecord,
        error: &str,
    ) -> AggregatedFailure {
        let mut aggregated = AggregatedFailure::default();
        for extension in extensions {
            let Some(action) = extension.action() else {
                continue;
            };
            if !action.has_on_failure() {
                continue;
            }
            let id = extension.manifest().extension_id.clone();
            let outcome = self
                .dispatch(
                    &id,
                    HookKind::OnFailure,
                    action.on_failure(agent, record, error),
                )
                .await;
            if let HookOutcome::Value(directive) = outcome {
                aggregated.retry |= directive.retry;
                aggregated.retry_delay_ms = min_option(aggregated.retry_delay_ms, directive.retry_delay_ms);
                aggregated.max_retries = min_option(aggregated.max_retries, directive.max_retries);
                if aggregated.fallback.is_none() {
                    aggregated.fallback = directive.fallback;
                }
            }
        }
        aggregated
    }

    // -----------------------------------------------------------------------
    // monitoring.*
    // -----------------------------------------------------------------------

    /// In-bounds iff all verdicts are; drift score is the maximum, drift
    /// categories the union, and the recommendation the most severe. A
    /// failed extension is skipped.
    pub async fn run_verify_behavior(
        &self,
        extensions: &[Arc<dyn ExtensionProvider>],
        agent: &AgentIdentity,
        window_secs: u64,
    ) -> AggregatedBehavior {
        let mut aggregated = AggregatedBehavior {
            in_bounds: true,
            drift_score: 0.0,
            drift_categories: Vec::new(),
            recommendation: BehaviorRecommendation::Continue,
        };
        for extension in extensions {
            let Some(monitoring) = extension.monitoring() else {
                continue;
            };
            if !monitoring.has_verify_behavior() {
                continue;
            }
            let id = extension.manifest().extension_id.clone();
            let outcome = self
                .dispatch(
                    &id,
                    HookKind::VerifyBehavior,
                    monitoring.verify_behavior(agent, window_secs),
                )
                .await;
            if let HookOutcome::Value(verdict) = outcome {
                aggregated.in_bounds &= verdict.in_bounds;
                aggregated.drift_score = aggregated.drift_score.max(verdict.drift_score);
                for category in verdict.drift_categories {
                    if !aggregated.drift_categories.contains(&category) {
                        aggregated.drift_categories.push(category);
                    }
                }
                aggregated.recommendation = aggregated.recommendation.max(verdict.recommendation);
            }
        }
        aggregated
    }

    /// Overall health is the worst report; all reports are retained. A
    /// failed extension is skipped.
    pub async fn run_collect_metrics(
        &self,
        extensions: &[Arc<dyn ExtensionProvider>],
        agent: &AgentIdentity,
    ) -> AggregatedMetrics {
        let mut aggregated = AggregatedMetrics {
            overall_health: ComponentHealth::Healthy,
            reports: Vec::new(),
        };
        for extension in extensions {
            let Some(monitoring) = extension.monitoring() else {
                continue;
            };
            if !monitoring.has_collect_metrics() {
                continue;
            }
            let id = extension.manifest().extension_id.clone();
            let outcome = self
                .dispatch(&id, HookKind::CollectMetrics, monitoring.collect_metrics(agent))
                .await;
            if let HookOutcome::Value(report) = outcome {
                aggregated.overall_health = aggregated.overall_health.max(report.health);
                aggregated.reports.push((id, report));
            }
        }
        aggregated
    }

    /// The response action is the most severe; notified parties union;
    /// escalated if any extension escalates. A failed extension is skipped.
    pub async fn run_on_anomaly(
        &self,
        extensions: &[Arc<dyn ExtensionProvider>],
        agent: &AgentIdentity,
        anomaly: &AnomalyEvent,
    ) -> AggregatedAnomaly {
        let mut aggregated = AggregatedAnomaly {
            action: AnomalyAction::Ignore,
            notified: Vec::new(),
            escalated: false,
        };
        for extension in extensions {
            let Some(monitoring) = extension.monitoring() else {
                continue;
            };
            if !monitoring.has_on_anomaly() {
                continue;
            }
            let id = extension.manifest().extension_id.clone();
            let outcome = self
                .dispatch(&id, HookKind::OnAnomaly, monitoring.on_anomaly(agent, anomaly))
                .await;
            if let HookOutcome::Value(response) = outcome {
                aggregated.action = aggregated.action.max(response.action);
                for party in response.notified {
                    if !aggregated.notified.contains(&party) {
                        aggregated.notified.push(party);
                    }
                }
                aggregated.escalated |= response.escalated;
            }
        }
        aggregated
    }

    // -----------------------------------------------------------------------
    // trust.*
    // -----------------------------------------------------------------------

    /// Parallel log-only fan-out.
    pub async fn run_on_revocation(
        &self,
        extensions: &[Arc<dyn ExtensionProvider>],
        agent: &AgentIdentity,
        reason: &str,
    ) {
        let calls = extensions.iter().filter_map(|extension| {
            let trust = extension.trust()?;
            if !trust.has_on_revocation() {
                return None;
            }
            let id = extension.manifest().extension_id.clone();
            Some(async move {
                let _ = self
                    .dispatch(&id, HookKind::OnRevocation, trust.on_revocation(agent, reason))
                    .await;
            })
        });
        join_all(calls).await;
    }

    /// Sequential fold over the adjustment; each extension sees the latest
    /// score and band. `tier_changed` is true if any stage reported a
    /// change. A failed stage is skipped.
    pub async fn run_adjust_trust(
        &self,
        extensions: &[Arc<dyn ExtensionProvider>],
        agent: &AgentIdentity,
        initial: TrustAdjustment,
    ) -> TrustAdjustment {
        let mut current = initial;
        let mut tier_changed = initial.tier_changed;
        for extension in extensions {
            let Some(trust) = extension.trust() else {
                continue;
            };
            if !trust.has_adjust_trust() {
                continue;
            }
            let id = extension.manifest().extension_id.clone();
            let outcome = self
                .dispatch(&id, HookKind::AdjustTrust, trust.adjust_trust(agent, current))
                .await;
            if let HookOutcome::Value(adjusted) = outcome {
                tier_changed |= adjusted.tier_changed || adjusted.band != current.band;
                current = adjusted;
            }
        }
        current.tier_changed = tier_changed;
        current
    }

    /// Valid iff every verifier accepts. A failed extension is skipped.
    pub async fn run_verify_attestation(
        &self,
        extensions: &[Arc<dyn ExtensionProvider>],
        attestation: &Attestation,
    ) -> bool {
        let mut valid = true;
        for extension in extensions {
            let Some(trust) = extension.trust() else {
                continue;
            };
            if !trust.has_verify_attestation() {
                continue;
            }
            let id = extension.manifest().extension_id.clone();
            let outcome = self
                .dispatch(
                    &id,
                    HookKind::VerifyAttestation,
                    trust.verify_attestation(attestation),
                )
                .await;
            if let HookOutcome::Value(accepted) = outcome {
                valid &= accepted;
            }
        }
        valid
    }

    // -----------------------------------------------------------------------
    // policy.*
    // -----------------------------------------------------------------------

    /// Final decision is the max-priority verdict (allow < require_approval
    /// < deny); reasons, evidence, and obligations concatenate in extension
    /// order. A failed extension collapses to deny.
    pub async fn run_policy_evaluate(
        &self,
        extensions: &[Arc<dyn ExtensionProvider>],
        context: &PolicyContext,
    ) -> PolicyDecision {
        let mut aggregated = PolicyDecision::allow();
        for extension in extensions {
            let Some(policy) = extension.policy() else {
                continue;
            };
            if !policy.has_evaluate() {
                continue;
            }
            let id = extension.manifest().extension_id.clone();
            let outcome = self
                .dispatch(&id, HookKind::PolicyEvaluate, policy.evaluate(context))
                .await;
            match outcome {
                HookOutcome::Value(decision) => {
                    aggregated.decision = aggregated.decision.max(decision.decision);
                    aggregated.reasons.extend(decision.reasons);
                    aggregated.evidence.extend(decision.evidence);
                    aggregated.obligations.extend(decision.obligations);
                }
                other => {
                    aggregated.decision = PolicyVerdict::Deny;
                    if let Some(reason) = Self::failure_reason(&other, HookKind::PolicyEvaluate) {
                        aggregated.reasons.push(reason);
                    }
                }
            }
            if self.config.fail_fast && aggregated.decision == PolicyVerdict::Deny {
                break;
            }
        }
        aggregated
    }

    /// Distribute a policy source to every extension that loads policies.
    /// Returns the number of successful loads; failures are logged.
    pub async fn run_load_policy(
        &self,
        extensions: &[Arc<dyn ExtensionProvider>],
        source: &str,
    ) -> usize {
        let mut loaded = 0;
        for extension in extensions {
            let Some(policy) = extension.policy() else {
                continue;
            };
            if !policy.has_load_policy() {
                continue;
            }
            let id = extension.manifest().extension_id.clone();
            let outcome = self
                .dispatch(&id, HookKind::LoadPolicy, policy.load_policy(source))
                .await;
            if matches!(outcome, HookOutcome::Value(())) {
                loaded += 1;
            }
        }
        loaded
    }
}

fn min_option<T: Ord + Copy>(current: Option<T>, candidate: Option<T>) -> Option<T> {
    match (current, candidate) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}

// ---------------------------------------------------------------------------
// Aggregated results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct AggregatedPreCheck {
    pub allow: bool,
    pub constraints: Vec<Constraint>,
    pub denied_by: Option<String>,
    pub denial_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregatedPreAction {
    pub proceed: bool,
    pub blocked_by: Option<String>,
    pub block_reason: Option<String>,
    pub modifications: Vec<Modification>,
    pub required_approvals: Vec<String>,
}

impl AggregatedPreAction {
    /// Blocked-with-approvers surfaces as "requires approval" rather than a
    /// hard block.
    pub fn requires_approval(&self) -> bool {
        !self.proceed && !self.required_approvals.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregatedFailure {
    pub retry: bool,
    pub retry_delay_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub fallback: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregatedBehavior {
    pub in_bounds: bool,
    pub drift_score: f64,
    pub drift_categories: Vec<String>,
    pub recommendation: BehaviorRecommendation,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregatedMetrics {
    pub overall_health: ComponentHealth,
    pub reports: Vec<(String, MetricsReport)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregatedAnomaly {
    pub action: AnomalyAction,
    pub notified: Vec<String>,
    pub escalated: bool,
}
