use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use semver::Version;
use serde_json::json;

use vorion_cache::XFetchCache;
use vorion_common::adapters::MemoryCoordination;
use vorion_common::crypto::DecisionSigner;
use vorion_common::error::{AppError, Result};
use vorion_engine::{ActionOutcome, GovernanceEngine, InMemoryProofStore, ProofChain};
use vorion_extensions::{
    ActionHooks, CapabilityHooks, ExtensionPipeline, ExtensionProvider, ExtensionRegistry,
    FailureDirective, Modification, PolicyContext, PolicyDecision, PolicyHooks, PolicyVerdict,
    PreActionResult, PreCheckResult,
};
use vorion_models::{
    ActionRecord, ActionRequest, AgentIdentity, CapabilityGrant, CapabilityRequest, Constraint,
    ExtensionManifest,
};
use vorion_resilience::CircuitBreakerRegistry;
use vorion_trust::{InMemoryTrustStore, TrustEngine, TrustStore};

// ---------------------------------------------------------------------------
// Stub extensions
// ---------------------------------------------------------------------------

#[derive(Default)]
struct GovBehavior {
    pre_check: Option<PreCheckResult>,
    pre_action: Option<PreActionResult>,
    policy: Option<PolicyDecision>,
    failure_directive: Option<FailureDirective>,
}

struct GovExtension {
    manifest: ExtensionManifest,
    behavior: GovBehavior,
}

impl GovExtension {
    fn new(behavior: GovBehavior) -> Arc<Self> {
        Arc::new(Self {
            manifest: ExtensionManifest::new(
                "aci-ext-governance-v1",
                "gov",
                Version::new(1, 0, 0),
                "vorion",
            ),
            behavior,
        })
    }
}

#[async_trait]
impl CapabilityHooks for GovExtension {
    fn has_pre_check(&self) -> bool {
        self.behavior.pre_check.is_some()
    }

    async fn pre_check(
        &self,
        _agent: &AgentIdentity,
        _request: &CapabilityRequest,
    ) -> Result<PreCheckResult> {
        Ok(self.behavior.pre_check.clone().unwrap_or_else(PreCheckResult::allow))
    }

    fn has_post_grant(&self) -> bool {
        false
    }

    fn has_on_expiry(&self) -> bool {
        false
    }
}

#[async_trait]
impl ActionHooks for GovExtension {
    fn has_pre_action(&self) -> bool {
        self.behavior.pre_action.is_some()
    }

    async fn pre_action(
        &self,
        _agent: &AgentIdentity,
        _request: &ActionRequest,
    ) -> Result<PreActionResult> {
        Ok(self.behavior.pre_action.clone().unwrap_or_else(PreActionResult::proceed))
    }

    fn has_post_action(&self) -> bool {
        false
    }

    fn has_on_failure(&self) -> bool {
        self.behavior.failure_directive.is_some()
    }

    async fn on_failure(
        &self,
        _agent: &AgentIdentity,
        _record: &ActionRecord,
        _error: &str,
    ) -> Result<FailureDirective> {
        Ok(self.behavior.failure_directive.clone().unwrap_or_default())
    }
}

#[async_trait]
impl PolicyHooks for GovExtension {
    fn has_evaluate(&self) -> bool {
        self.behavior.policy.is_some()
    }

    async fn evaluate(&self, _context: &PolicyContext) -> Result<PolicyDecision> {
        Ok(self.behavior.policy.clone().unwrap_or_else(PolicyDecision::allow))
    }

    fn has_load_policy(&self) -> bool {
        false
    }
}

impl ExtensionProvider for GovExtension {
    fn manifest(&self) -> &ExtensionManifest {
        &self.manifest
    }

    fn capability(&self) -> Option<&dyn CapabilityHooks> {
        Some(self)
    }

    fn action(&self) -> Option<&dyn ActionHooks> {
        Some(self)
    }

    fn policy(&self) -> Option<&dyn PolicyHooks> {
        Some(self)
    }
}

struct AuditExtension {
    manifest: ExtensionManifest,
    policy: Option<PolicyDecision>,
    post_grant_calls: AtomicU32,
    post_action_calls: AtomicU32,
    expiry_calls: AtomicU32,
    revocation_calls: AtomicU32,
}

impl AuditExtension {
    fn new() -> Arc<Self> {
        Self::with_optional_policy(None)
    }

    fn with_policy(policy: PolicyDecision) -> Arc<Self> {
        Self::with_optional_policy(Some(policy))
    }

    fn with_optional_policy(policy: Option<PolicyDecision>) -> Arc<Self> {
        Arc::new(Self {
            manifest: ExtensionManifest::new(
                "aci-ext-audit-v1",
                "audit",
                Version::new(1, 0, 0),
                "vorion",
            ),
            policy,
            post_grant_calls: AtomicU32::new(0),
            post_action_calls: AtomicU32::new(0),
            expiry_calls: AtomicU32::new(0),
            revocation_calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl CapabilityHooks for AuditExtension {
    fn has_pre_check(&self) -> bool {
        false
    }

    async fn post_grant(
        &self,
        _agent: &AgentIdentity,
        mut grant: CapabilityGrant,
    ) -> Result<CapabilityGrant> {
        self.post_grant_calls.fetch_add(1, Ordering::SeqCst);
        grant.constraints.push(Constraint::new(
            "time_window",
            json!({"window": "business_hours"}),
        ));
        Ok(grant)
    }

    async fn on_expiry(
        &self,
        _agent: &AgentIdentity,
        _grant: &CapabilityGrant,
    ) -> Result<()> {
        self.expiry_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl vorion_extensions::TrustHooks for AuditExtension {
    async fn on_revocation(&self, _agent: &AgentIdentity, _reason: &str) -> Result<()> {
        self.revocation_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn has_adjust_trust(&self) -> bool {
        false
    }

    fn has_verify_attestation(&self) -> bool {
        false
    }
}

#[async_trait]
impl ActionHooks for AuditExtension {
    fn has_pre_action(&self) -> bool {
        false
    }

    async fn post_action(&self, _agent: &AgentIdentity, _record: &ActionRecord) -> Result<()> {
        self.post_action_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn has_on_failure(&self) -> bool {
        false
    }
}

#[async_trait]
impl PolicyHooks for AuditExtension {
    fn has_evaluate(&self) -> bool {
        self.policy.is_some()
    }

    async fn evaluate(&self, _context: &PolicyContext) -> Result<PolicyDecision> {
        Ok(self.policy.clone().unwrap_or_else(PolicyDecision::allow))
    }

    fn has_load_policy(&self) -> bool {
        false
    }
}

impl ExtensionProvider for AuditExtension {
    fn manifest(&self) -> &ExtensionManifest {
        &self.manifest
    }

    fn capability(&self) -> Option<&dyn CapabilityHooks> {
        Some(self)
    }

    fn action(&self) -> Option<&dyn ActionHooks> {
        Some(self)
    }

    fn trust(&self) -> Option<&dyn vorion_extensions::TrustHooks> {
        Some(self)
    }

    fn policy(&self) -> Option<&dyn PolicyHooks> {
        Some(self)
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    engine: GovernanceEngine,
    registry: Arc<ExtensionRegistry>,
    trust_store: Arc<InMemoryTrustStore>,
}

fn harness() -> Harness {
    let registry = Arc::new(ExtensionRegistry::new());
    let kv = Arc::new(MemoryCoordination::new());
    let trust_store = Arc::new(InMemoryTrustStore::new());
    let trust = Arc::new(TrustEngine::new(
        trust_store.clone(),
        XFetchCache::new(kv.clone()),
        Arc::new(CircuitBreakerRegistry::new(kv.clone())),
    ));
    let chain = Arc::new(ProofChain::new(
        Arc::new(InMemoryProofStore::new()),
        Arc::new(DecisionSigner::generate_ed25519()),
    ));
    let engine = GovernanceEngine::new(
        registry.clone(),
        ExtensionPipeline::new(),
        trust,
        chain,
    );
    Harness {
        engine,
        registry,
        trust_store,
    }
}

fn agent(aci: &str) -> AgentIdentity {
    let now = Utc::now();
    AgentIdentity {
        agent_id: "agent-1".to_string(),
        publisher: "a3i".to_string(),
        name: "Banquet Advisor".to_string(),
        aci: aci.to_string(),
        competence_level: 3,
        domain_mask: 0b10100100,
        version: "1.2.0".to_string(),
        trust_band: 2,
        trust_score: 650,
        metadata: json!({}),
        created_at: now,
        updated_at: now,
    }
}

fn capability_request(level: i16, ttl_secs: Option<u64>) -> CapabilityRequest {
    CapabilityRequest {
        aci: "a3i.vorion.banquet-advisor:FHC-L3@1.2.0#gov,audit".to_string(),
        domain_mask: 0b100,
        level,
        ttl_secs,
        context: json!({}),
    }
}

fn action_request() -> ActionRequest {
    ActionRequest {
        id: vorion_common::utils::generate_id(),
        agent_id: "agent-1".to_string(),
        action_type: "catering.order".to_string(),
        resource: "menu/428".to_string(),
        parameters: json!({ "guests": 24 }),
    }
}

// ---------------------------------------------------------------------------
// Capability protocol
// ---------------------------------------------------------------------------

#[tokio::test]
async fn denial_by_governance_extension_skips_post_grant() {
    let h = harness();
    let gov = GovExtension::new(GovBehavior {
        pre_check: Some(PreCheckResult::deny("insufficient level")),
        ..Default::default()
    });
    let audit = AuditExtension::new();
    h.registry.register(gov).await.unwrap();
    h.registry.register(audit.clone()).await.unwrap();

    let agent = agent("a3i.vorion.banquet-advisor:FHC-L3@1.2.0#gov,audit");
    let decision = h
        .engine
        .process_capability_request(&agent, &capability_request(3, None))
        .await
        .unwrap();

    assert!(!decision.granted);
    assert_eq!(decision.denied_by.as_deref(), Some("aci-ext-governance-v1"));
    assert_eq!(decision.denial_reason.as_deref(), Some("insufficient level"));
    assert_eq!(audit.post_grant_calls.load(Ordering::SeqCst), 0);
    assert!(decision.proof_id.is_some());
}

#[tokio::test]
async fn grant_folds_constraints_in_order() {
    let h = harness();
    let gov = GovExtension::new(GovBehavior {
        pre_check: Some(PreCheckResult::allow_with_constraints(vec![Constraint::new(
            "rate_limit",
            json!({"rpm": 60}),
        )])),
        ..Default::default()
    });
    let audit = AuditExtension::new();
    h.registry.register(gov).await.unwrap();
    h.registry.register(audit).await.unwrap();

    let agent = agent("a3i.vorion.banquet-advisor:FHC-L3@1.2.0#gov,audit");
    let decision = h
        .engine
        .process_capability_request(&agent, &capability_request(3, None))
        .await
        .unwrap();

    assert!(decision.granted);
    let grant = decision.grant.unwrap();
    assert_eq!(grant.level, 3);
    assert_eq!(grant.constraints.len(), 2);
    assert_eq!(grant.constraints[0].name, "rate_limit");
    assert_eq!(grant.constraints[0].params, json!({"rpm": 60}));
    assert_eq!(grant.constraints[1].name, "time_window");

    // expiresAt - issuedAt = 3600 s within the ±10 % TTL jitter.
    let lifetime = (grant.expires_at - grant.issued_at).num_seconds();
    assert!((3240..=3960).contains(&lifetime), "lifetime {}", lifetime);
}

#[tokio::test]
async fn empty_extension_set_issues_default_grant() {
    let h = harness();
    // No '#' section: no extensions participate.
    let agent = agent("a3i.vorion.banquet-advisor:FHC-L3@1.2.0");
    let decision = h
        .engine
        .process_capability_request(&agent, &capability_request(5, Some(600)))
        .await
        .unwrap();

    assert!(decision.granted);
    let grant = decision.grant.unwrap();
    // level = min(request.level, agent.level)
    assert_eq!(grant.level, 3);
    let lifetime = (grant.expires_at - grant.issued_at).num_seconds();
    assert!((540..=660).contains(&lifetime), "lifetime {}", lifetime);
}

// ---------------------------------------------------------------------------
// Action protocol
// ---------------------------------------------------------------------------

#[tokio::test]
async fn action_completes_and_applies_modifications() {
    let h = harness();
    let gov = GovExtension::new(GovBehavior {
        pre_action: Some(PreActionResult {
            proceed: true,
            reason: None,
            modifications: vec![Modification {
                path: "parameters.guests".to_string(),
                value: json!(20),
            }],
            required_approvals: Vec::new(),
        }),
        ..Default::default()
    });
    let audit = AuditExtension::new();
    h.registry.register(gov).await.unwrap();
    h.registry.register(audit.clone()).await.unwrap();

    let agent = agent("a3i.vorion.banquet-advisor:FHC-L3@1.2.0#gov,audit");
    let decision = h
        .engine
        .process_action(&agent, &action_request(), |request| async move {
            // The execute closure sees the modified request.
            assert_eq!(request.parameters["guests"], 20);
            Ok(json!({"order_id": "ord-77"}))
        })
        .await
        .unwrap();

    assert_eq!(decision.outcome, ActionOutcome::Completed);
    let record = decision.record.unwrap();
    assert_eq!(record.request.parameters["guests"], 20);
    assert_eq!(record.result, Some(json!({"order_id": "ord-77"})));
    assert!(record.completed_at.is_some());

    // postAction fan-out is fire-and-forget.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(audit.post_action_calls.load(Ordering::SeqCst), 1);

    // A successful action feeds the trust engine.
    let signals = h
        .trust_store
        .recent_signals("agent-1", Utc::now() - chrono::Duration::days(1))
        .await
        .unwrap();
    assert!(signals
        .iter()
        .any(|s| s.signal_type == "behavioral.action.completed"));
}

#[tokio::test]
async fn blocked_action_returns_blocked() {
    let h = harness();
    let gov = GovExtension::new(GovBehavior {
        pre_action: Some(PreActionResult::block("embargoed resource")),
        ..Default::default()
    });
    h.registry.register(gov).await.unwrap();

    let agent = agent("a3i.vorion.banquet-advisor:FHC-L3@1.2.0#gov");
    let decision = h
        .engine
        .process_action(&agent, &action_request(), |_| async move {
            panic!("execute must not run for a blocked action")
        })
        .await
        .unwrap();

    assert_eq!(decision.outcome, ActionOutcome::Blocked);
    assert_eq!(decision.blocked_by.as_deref(), Some("aci-ext-governance-v1"));
    assert_eq!(decision.block_reason.as_deref(), Some("embargoed resource"));
}

#[tokio::test]
async fn blocked_with_approvers_surfaces_requires_approval() {
    let h = harness();
    let gov = GovExtension::new(GovBehavior {
        pre_action: Some(PreActionResult::needs_approval(
            "order too large",
            vec!["ops-lead".to_string()],
        )),
        ..Default::default()
    });
    h.registry.register(gov).await.unwrap();

    let agent = agent("a3i.vorion.banquet-advisor:FHC-L3@1.2.0#gov");
    let decision = h
        .engine
        .process_action(&agent, &action_request(), |_| async move {
            panic!("execute must not run without approval")
        })
        .await
        .unwrap();

    assert_eq!(decision.outcome, ActionOutcome::RequiresApproval);
    assert_eq!(decision.required_approvals, vec!["ops-lead".to_string()]);
}

#[tokio::test]
async fn failed_action_returns_retry_directive_without_retrying() {
    let h = harness();
    let gov = GovExtension::new(GovBehavior {
        pre_action: Some(PreActionResult::proceed()),
        failure_directive: Some(FailureDirective {
            retry: true,
            retry_delay_ms: Some(250),
            max_retries: Some(3),
            fallback: Some(json!({"serve": "cached_menu"})),
        }),
        ..Default::default()
    });
    h.registry.register(gov).await.unwrap();

    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let agent = agent("a3i.vorion.banquet-advisor:FHC-L3@1.2.0#gov");
    let decision = h
        .engine
        .process_action(&agent, &action_request(), move |_| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(AppError::external("catering-api", "502 upstream"))
        })
        .await
        .unwrap();

    assert_eq!(decision.outcome, ActionOutcome::Failed);
    // The orchestrator returns the directive; it does not loop.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let failure = decision.failure.unwrap();
    assert!(failure.retry);
    assert_eq!(failure.retry_delay_ms, Some(250));
    assert_eq!(failure.max_retries, Some(3));
    assert_eq!(failure.fallback, Some(json!({"serve": "cached_menu"})));

    let record = decision.record.unwrap();
    assert!(record.error.as_deref().unwrap().contains("502 upstream"));
}

// ---------------------------------------------------------------------------
// Policy evaluation and proofs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn policy_evaluation_aggregates_by_priority() {
    let h = harness();
    let gov = GovExtension::new(GovBehavior {
        policy: Some(PolicyDecision::allow()),
        ..Default::default()
    });
    let audit = AuditExtension::with_policy(PolicyDecision::require_approval("out of hours"));
    h.registry.register(gov).await.unwrap();
    h.registry.register(audit).await.unwrap();

    let agent = agent("a3i.vorion.banquet-advisor:FHC-L3@1.2.0#gov,audit");
    let decision = h
        .engine
        .evaluate_policy(&agent, Some(action_request()), None)
        .await
        .unwrap();
    assert_eq!(decision.decision, PolicyVerdict::RequireApproval);
    assert_eq!(decision.reasons, vec!["out of hours".to_string()]);
}

#[tokio::test]
async fn revocation_fans_out_and_feeds_compliance_signal() {
    let h = harness();
    let audit = AuditExtension::new();
    h.registry.register(audit.clone()).await.unwrap();

    let agent = agent("a3i.vorion.banquet-advisor:FHC-L3@1.2.0#audit");
    h.engine.revoke_agent(&agent, "key compromise").await.unwrap();

    assert_eq!(audit.revocation_calls.load(Ordering::SeqCst), 1);
    let signals = h
        .trust_store
        .recent_signals("agent-1", Utc::now() - chrono::Duration::days(1))
        .await
        .unwrap();
    assert!(signals.iter().any(|s| s.signal_type == "compliance.revocation"));
}

#[tokio::test]
async fn grant_expiry_sweep_notifies_extensions() {
    let h = harness();
    let audit = AuditExtension::new();
    h.registry.register(audit.clone()).await.unwrap();

    let agent = agent("a3i.vorion.banquet-advisor:FHC-L3@1.2.0#audit");
    let decision = h
        .engine
        .process_capability_request(&agent, &capability_request(3, Some(1)))
        .await
        .unwrap();
    let grant = decision.grant.unwrap();

    h.engine.expire_grant(&agent, &grant).await.unwrap();
    assert_eq!(audit.expiry_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn every_decision_extends_a_verifiable_chain() {
    let h = harness();
    let gov = GovExtension::new(GovBehavior {
        pre_check: Some(PreCheckResult::allow()),
        pre_action: Some(PreActionResult::proceed()),
        ..Default::default()
    });
    h.registry.register(gov).await.unwrap();

    let agent = agent("a3i.vorion.banquet-advisor:FHC-L3@1.2.0#gov");
    h.engine
        .process_capability_request(&agent, &capability_request(3, None))
        .await
        .unwrap();
    h.engine
        .process_action(&agent, &action_request(), |_| async move {
            Ok(json!({"ok": true}))
        })
        .await
        .unwrap();
    h.engine
        .process_action(&agent, &action_request(), |_| async move {
            Err(AppError::external("downstream", "boom"))
        })
        .await
        .unwrap();

    // Three decisions, three linked and signed proofs.
    assert_eq!(h.engine.verify_proof_chain().await.unwrap(), 3);
}
