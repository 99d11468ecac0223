//! Decision orchestrator.
//!
//! Wires the extension pipeline and the trust engine together for the
//! capability-grant and action-execution protocols, and emits a chained
//! proof for every decision. The orchestrator never retries a failed
//! action itself; the aggregated retry directive is returned to the caller,
//! who owns idempotency knowledge.

use std::future::Future;
use std::sync::Arc;

use rand::Rng;
use serde::Serialize;
use uuid::Uuid;
use validator::Validate;
use vorion_common::error::{AppError, Result};
use vorion_common::utils;
use vorion_extensions::{
    AggregatedFailure, ExtensionPipeline, ExtensionRegistry, Modification, PolicyContext,
    PolicyDecision, TrustAdjustment,
};
use vorion_models::{
    ActionRecord, ActionRequest, AgentIdentity, CapabilityGrant, CapabilityRequest, TrustSignal,
};
use vorion_trust::{TrustContext, TrustEngine};

use crate::agents::{identity_from_aci, AgentStore};
use crate::audit::ProofChain;
use crate::policy_env::environment_snapshot;

const DEFAULT_GRANT_TTL_SECS: u64 = 3600;
const GRANT_TTL_JITTER: f64 = 0.10;

#[derive(Debug, Clone, Serialize)]
pub struct CapabilityDecision {
    pub granted: bool,
    pub grant: Option<CapabilityGrant>,
    pub denied_by: Option<String>,
    pub denial_reason: Option<String>,
    pub proof_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    Completed,
    Failed,
    Blocked,
    RequiresApproval,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionDecision {
    pub outcome: ActionOutcome,
    pub record: Option<ActionRecord>,
    pub blocked_by: Option<String>,
    pub block_reason: Option<String>,
    pub required_approvals: Vec<String>,
    /// Aggregated retry directive from `onFailure`; the caller decides
    /// whether to act on it.
    pub failure: Option<AggregatedFailure>,
    pub proof_id: Option<Uuid>,
}

pub struct GovernanceEngine {
    registry: Arc<ExtensionRegistry>,
    pipeline: ExtensionPipeline,
    trust: Arc<TrustEngine>,
    chain: Arc<ProofChain>,
    agents: Option<Arc<dyn AgentStore>>,
    tenant_id: String,
    default_grant_ttl_secs: u64,
}

impl GovernanceEngine {
    pub fn new(
        registry: Arc<ExtensionRegistry>,
        pipeline: ExtensionPipeline,
        trust: Arc<TrustEngine>,
        chain: Arc<ProofChain>,
    ) -> Self {
        Self {
            registry,
            pipeline,
            trust,
            chain,
            agents: None,
            tenant_id: "default".to_string(),
            default_grant_ttl_secs: DEFAULT_GRANT_TTL_SECS,
        }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = tenant_id.into();
        self
    }

    pub fn with_agent_store(mut self, agents: Arc<dyn AgentStore>) -> Self {
        self.agents = Some(agents);
        self
    }

    pub fn with_default_grant_ttl(mut self, ttl_secs: u64) -> Self {
        self.default_grant_ttl_secs = ttl_secs;
        self
    }

    pub fn registry(&self) -> &Arc<ExtensionRegistry> {
        &self.registry
    }

    pub fn trust(&self) -> &Arc<TrustEngine> {
        &self.trust
    }

    pub fn proofs(&self) -> &Arc<ProofChain> {
        &self.chain
    }

    // -----------------------------------------------------------------------
    // Capability protocol
    // -----------------------------------------------------------------------

    pub async fn process_capability_request(
        &self,
        agent: &AgentIdentity,
        request: &CapabilityRequest,
    ) -> Result<CapabilityDecision> {
        request
            .validate()
            .map_err(|e| AppError::Validation(format!("{}", e)))?;

        let extensions = self.registry.resolve_for_aci(&agent.aci).await?;

        if extensions.is_empty() {
            let grant = self.default_grant(agent, request);
            let proof = self
                .emit_capability_proof(agent, request, true, None, None, Some(&grant))
                .await?;
            return Ok(CapabilityDecision {
                granted: true,
                grant: Some(grant),
                denied_by: None,
                denial_reason: None,
                proof_id: Some(proof),
            });
        }

        let pre = self.pipeline.run_pre_check(&extensions, agent, request).await;
        if !pre.allow {
            let proof = self
                .emit_capability_proof(
                    agent,
                    request,
                    false,
                    pre.denied_by.as_deref(),
                    pre.denial_reason.as_deref(),
                    None,
                )
                .await?;
            return Ok(CapabilityDecision {
                granted: false,
                grant: None,
                denied_by: pre.denied_by,
                denial_reason: pre.denial_reason,
                proof_id: Some(proof),
            });
        }

        let mut grant = self.default_grant(agent, request);
        grant.constraints.extend(pre.constraints);
        let grant = self.pipeline.run_post_grant(&extensions, agent, grant).await;

        let proof = self
            .emit_capability_proof(agent, request, true, None, None, Some(&grant))
            .await?;
        Ok(CapabilityDecision {
            granted: true,
            grant: Some(grant),
            denied_by: None,
            denial_reason: None,
            proof_id: Some(proof),
        })
    }

    fn default_grant(&self, agent: &AgentIdentity, request: &CapabilityRequest) -> CapabilityGrant {
        let base_ttl = request.ttl_secs.unwrap_or(self.default_grant_ttl_secs);
        let jitter: f64 = rand::thread_rng().gen_range(-GRANT_TTL_JITTER..=GRANT_TTL_JITTER);
        let ttl_secs = ((base_ttl as f64) * (1.0 + jitter)).max(1.0) as i64;
        let issued_at = utils::current_timestamp();
        CapabilityGrant {
            id: utils::generate_id(),
            aci: request.aci.clone(),
            domain_mask: request.domain_mask,
            level: request.level.min(agent.competence_level),
            issued_at,
            expires_at: issued_at + chrono::Duration::seconds(ttl_secs),
            constraints: Vec::new(),
            token: None,
        }
    }

    // -----------------------------------------------------------------------
    // Action protocol
    // -----------------------------------------------------------------------

    pub async fn process_action<F, Fut>(
        &self,
        agent: &AgentIdentity,
        request: &ActionRequest,
        execute: F,
    ) -> Result<ActionDecision>
    where
        F: FnOnce(ActionRequest) -> Fut,
        Fut: Future<Output = Result<serde_json::Value>>,
    {
        let extensions = self.registry.resolve_for_aci(&agent.aci).await?;

        let pre = self.pipeline.run_pre_action(&extensions, agent, request).await;
        if !pre.proceed {
            let outcome = if pre.requires_approval() {
                ActionOutcome::RequiresApproval
            } else {
                ActionOutcome::Blocked
            };
            let proof = self
                .emit_action_proof(agent, request, outcome, &pre.blocked_by, &pre.required_approvals, None)
                .await?;
            return Ok(ActionDecision {
                outcome,
                record: None,
                blocked_by: pre.blocked_by,
                block_reason: pre.block_reason,
                required_approvals: pre.required_approvals,
                failure: None,
                proof_id: Some(proof),
            });
        }

        let modified = apply_modifications(request, &pre.modifications)?;
        let mut record = ActionRecord::started(modified.clone(), utils::current_timestamp());
        let execution = execute(modified).await;
        record.completed_at = Some(utils::current_timestamp());
        match execution {
            Ok(result) => record.result = Some(result),
            Err(e) => record.error = Some(e.to_string()),
        }

        // Background observers; no back-pressure on this request.
        self.pipeline.run_post_action(&extensions, agent, &record).await;

        let (outcome, failure) = match &record.error {
            None => {
                self.feed_trust_signal(agent, "behavioral.action.completed", 1.0).await;
                (ActionOutcome::Completed, None)
            }
            Some(error) => {
                let directive = self
                    .pipeline
                    .run_on_failure(&extensions, agent, &record, error)
                    .await;
                self.feed_trust_signal(agent, "behavioral.action.failed", 0.0).await;
                (ActionOutcome::Failed, Some(directive))
            }
        };

        let proof = self
            .emit_action_proof(agent, request, outcome, &None, &[], Some(&record))
            .await?;
        Ok(ActionDecision {
            outcome,
            record: Some(record),
            blocked_by: None,
            block_reason: None,
            required_approvals: Vec::new(),
            failure,
            proof_id: Some(proof),
        })
    }

    // -----------------------------------------------------------------------
    // Policy evaluation
    // -----------------------------------------------------------------------

    /// Pre-dispatch gatekeeping above extension preCheck/preAction.
    pub async fn evaluate_policy(
        &self,
        agent: &AgentIdentity,
        action: Option<ActionRequest>,
        capability: Option<CapabilityRequest>,
    ) -> Result<PolicyDecision> {
        let extensions = self.registry.resolve_for_aci(&agent.aci).await?;
        let context = PolicyContext {
            agent: agent.clone(),
            action,
            capability,
            environment: environment_snapshot(utils::current_timestamp()),
        };
        Ok(self.pipeline.run_policy_evaluate(&extensions, &context).await)
    }

    // -----------------------------------------------------------------------
    // Agent lifecycle
    // -----------------------------------------------------------------------

    /// Register a new agent from its ACI. The identity starts at the neutral
    /// trust score; duplicate registration is a conflict.
    pub async fn register_agent(
        &self,
        publisher: impl Into<String>,
        name: impl Into<String>,
        aci: &str,
        metadata: serde_json::Value,
    ) -> Result<AgentIdentity> {
        let store = self.agent_store()?;
        let agent = identity_from_aci(publisher, name, aci, metadata)?;
        store.insert(&agent).await
    }

    /// Rewrite the stored trust projection from the trust engine's composed
    /// view, preserving the band/score invariant at rest.
    pub async fn refresh_agent_trust(
        &self,
        agent_id: &str,
        context: &TrustContext,
    ) -> Result<AgentIdentity> {
        let store = self.agent_store()?;
        let trust = self.trust.get_score(agent_id, context).await?;
        store
            .update_trust(
                agent_id,
                trust.effective_score as i32,
                trust.band.index() as i16,
            )
            .await
    }

    fn agent_store(&self) -> Result<&Arc<dyn AgentStore>> {
        self.agents.as_ref().ok_or_else(|| {
            AppError::Configuration("no agent store configured on this engine".to_string())
        })
    }

    // -----------------------------------------------------------------------
    // Trust and lifecycle fan-outs
    // -----------------------------------------------------------------------

    /// Fold the agent's current score through the trust-adjustment hooks and
    /// return the result; persisting any adjustment stays with the caller.
    pub async fn adjust_trust(&self, agent: &AgentIdentity) -> Result<TrustAdjustment> {
        let extensions = self.registry.resolve_for_aci(&agent.aci).await?;
        let initial = TrustAdjustment {
            score: agent.trust_score.clamp(0, 1000) as u16,
            band: agent.band(),
            tier_changed: false,
        };
        Ok(self.pipeline.run_adjust_trust(&extensions, agent, initial).await)
    }

    /// Revocation fan-out plus the corresponding compliance signal.
    pub async fn revoke_agent(&self, agent: &AgentIdentity, reason: &str) -> Result<()> {
        let extensions = self.registry.resolve_for_aci(&agent.aci).await?;
        self.pipeline.run_on_revocation(&extensions, agent, reason).await;
        self.feed_trust_signal(agent, "compliance.revocation", 0.0).await;
        Ok(())
    }

    /// Expiry sweep entry point for grants that have lapsed.
    pub async fn expire_grant(&self, agent: &AgentIdentity, grant: &CapabilityGrant) -> Result<()> {
        let extensions = self.registry.resolve_for_aci(&agent.aci).await?;
        self.pipeline.run_on_expiry(&extensions, agent, grant).await;
        Ok(())
    }

    pub async fn verify_proof_chain(&self) -> Result<usize> {
        self.chain.verify(&self.tenant_id).await
    }

    async fn feed_trust_signal(&self, agent: &AgentIdentity, signal_type: &str, value: f64) {
        let signal = TrustSignal {
            id: utils::generate_id(),
            entity_id: agent.agent_id.clone(),
            signal_type: signal_type.to_string(),
            value,
            weight: 1.0,
            source: "governance-engine".to_string(),
            timestamp: utils::current_timestamp(),
            metadata: serde_json::Value::Null,
        };
        if let Err(e) = self.trust.record_signal(&signal).await {
            tracing::warn!(agent_id = %agent.agent_id, error = %e, "failed to record trust signal");
        }
    }

    // -----------------------------------------------------------------------
    // Proof emission
    // -----------------------------------------------------------------------

    async fn emit_capability_proof(
        &self,
        agent: &AgentIdentity,
        request: &CapabilityRequest,
        granted: bool,
        denied_by: Option<&str>,
        denial_reason: Option<&str>,
        grant: Option<&CapabilityGrant>,
    ) -> Result<Uuid> {
        let decision = serde_json::json!({
            "type": "capability",
            "agent_id": agent.agent_id,
            "granted": granted,
            "denied_by": denied_by,
            "denial_reason": denial_reason,
        });
        let inputs = to_json(request)?;
        let outputs = match grant {
            Some(grant) => to_json(grant)?,
            None => serde_json::Value::Null,
        };
        let proof = self.chain.append(&self.tenant_id, decision, inputs, outputs).await?;
        Ok(proof.id)
    }

    async fn emit_action_proof(
        &self,
        agent: &AgentIdentity,
        request: &ActionRequest,
        outcome: ActionOutcome,
        blocked_by: &Option<String>,
        required_approvals: &[String],
        record: Option<&ActionRecord>,
    ) -> Result<Uuid> {
        let decision = serde_json::json!({
            "type": "action",
            "agent_id": agent.agent_id,
            "outcome": outcome,
            "blocked_by": blocked_by,
            "required_approvals": required_approvals,
        });
        let inputs = to_json(request)?;
        let outputs = match record {
            Some(record) => serde_json::json!({
                "result": record.result,
                "error": record.error,
                "started_at": record.started_at,
                "completed_at": record.completed_at,
            }),
            None => serde_json::Value::Null,
        };
        let proof = self.chain.append(&self.tenant_id, decision, inputs, outputs).await?;
        Ok(proof.id)
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value)
        .map_err(|e| AppError::Validation(format!("failed to serialize proof payload: {}", e)))
}

/// Apply dotted-path updates to a shallow-cloned request.
fn apply_modifications(
    request: &ActionRequest,
    modifications: &[Modification],
) -> Result<ActionRequest> {
    if modifications.is_empty() {
        return Ok(request.clone());
    }
    let mut value = to_json(request)?;
    for modification in modifications {
        set_dotted_path(&mut value, &modification.path, modification.value.clone());
    }
    serde_json::from_value(value).map_err(|e| {
        AppError::Validation(format!("extension modification produced an invalid request: {}", e))
    })
}

fn set_dotted_path(root: &mut serde_json::Value, path: &str, new_value: serde_json::Value) {
    let segments: Vec<&str> = path.split('.').collect();
    let mut cursor = root;
    for (index, segment) in segments.iter().enumerate() {
        let map = match cursor.as_object_mut() {
            Some(map) => map,
            None => {
                tracing::warn!(path, "modification path traverses a non-object; skipping");
                return;
            }
        };
        if index == segments.len() - 1 {
            map.insert((*segment).to_string(), new_value);
            return;
        }
        cursor = map
            .entry((*segment).to_string())
            .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
    }
}
