use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use semver::Version;
use serde_json::json;

use vorion_cache::XFetchCache;
use vorion_common::adapters::MemoryCoordination;
use vorion_common::crypto::DecisionSigner;
use vorion_common::error::Result;
use vorion_engine::{
    AgentStore, GovernanceEngine, InMemoryAgentStore, InMemoryProofStore, MonitoringSweep,
    ProofChain,
};
use vorion_extensions::{
    BehaviorRecommendation, BehaviorVerdict, ExtensionPipeline, ExtensionProvider,
    ExtensionRegistry, MonitoringHooks,
};
use vorion_models::{AgentIdentity, ExtensionManifest, TrustBand};
use vorion_resilience::{CircuitBreakerRegistry, LeaderElector};
use vorion_trust::{
    DeploymentContext, InMemoryTrustStore, ObservabilityClass, TrustContext, TrustEngine,
    TrustStore,
};

struct MonitorExtension {
    manifest: ExtensionManifest,
    verdict: BehaviorVerdict,
}

impl MonitorExtension {
    fn new(verdict: BehaviorVerdict) -> Arc<Self> {
        Arc::new(Self {
            manifest: ExtensionManifest::new(
                "aci-ext-monitor-v1",
                "mon",
                Version::new(1, 0, 0),
                "vorion",
            ),
            verdict,
        })
    }
}

#[async_trait]
impl MonitoringHooks for MonitorExtension {
    async fn verify_behavior(
        &self,
        _agent: &AgentIdentity,
        _window_secs: u64,
    ) -> Result<BehaviorVerdict> {
        Ok(self.verdict.clone())
    }

    fn has_collect_metrics(&self) -> bool {
        false
    }

    fn has_on_anomaly(&self) -> bool {
        false
    }
}

impl ExtensionProvider for MonitorExtension {
    fn manifest(&self) -> &ExtensionManifest {
        &self.manifest
    }

    fn monitoring(&self) -> Option<&dyn MonitoringHooks> {
        Some(self)
    }
}

struct SweepHarness {
    sweep: MonitoringSweep,
    elector: Arc<LeaderElector>,
    agents: Arc<InMemoryAgentStore>,
    trust_store: Arc<InMemoryTrustStore>,
    engine: GovernanceEngine,
}

async fn harness(verdict: BehaviorVerdict) -> SweepHarness {
    let registry = Arc::new(ExtensionRegistry::new());
    registry.register(MonitorExtension::new(verdict)).await.unwrap();

    let kv = Arc::new(MemoryCoordination::new());
    let trust_store = Arc::new(InMemoryTrustStore::new());
    let trust = Arc::new(TrustEngine::new(
        trust_store.clone(),
        XFetchCache::new(kv.clone()),
        Arc::new(CircuitBreakerRegistry::new(kv.clone())),
    ));
    let agents = Arc::new(InMemoryAgentStore::new());
    let elector = Arc::new(LeaderElector::new(kv));

    let engine = GovernanceEngine::new(
        registry.clone(),
        ExtensionPipeline::new(),
        trust.clone(),
        Arc::new(ProofChain::new(
            Arc::new(InMemoryProofStore::new()),
            Arc::new(DecisionSigner::generate_ed25519()),
        )),
    )
    .with_agent_store(agents.clone());

    let sweep = MonitoringSweep::new(
        registry,
        ExtensionPipeline::new(),
        agents.clone(),
        trust,
        elector.clone(),
    );
    SweepHarness {
        sweep,
        elector,
        agents,
        trust_store,
        engine,
    }
}

fn drifting_verdict() -> BehaviorVerdict {
    BehaviorVerdict {
        in_bounds: false,
        drift_score: 0.8,
        drift_categories: vec!["scope".to_string()],
        recommendation: BehaviorRecommendation::Warn,
    }
}

#[tokio::test]
async fn agent_registration_round_trip() {
    let h = harness(BehaviorVerdict::nominal()).await;
    let agent = h
        .engine
        .register_agent(
            "a3i",
            "Banquet Advisor",
            "a3i.vorion.banquet-advisor:FHC-L3@1.2.0#mon",
            json!({"team": "events"}),
        )
        .await
        .unwrap();

    assert_eq!(agent.competence_level, 3);
    assert_eq!(agent.band(), TrustBand::T2);
    assert!(h.agents.load(&agent.agent_id).await.unwrap().is_some());
}

#[tokio::test]
async fn refresh_agent_trust_applies_ceilings() {
    let h = harness(BehaviorVerdict::nominal()).await;
    let agent = h
        .engine
        .register_agent("a3i", "Opaque", "a3i.vorion.opaque:F-L2@1.0.0#mon", json!({}))
        .await
        .unwrap();

    // Logs-only observability caps the projection at T2 regardless of the
    // composed score.
    let context = TrustContext::new(ObservabilityClass::LogsOnly, DeploymentContext::Local);
    let updated = h
        .engine
        .refresh_agent_trust(&agent.agent_id, &context)
        .await
        .unwrap();
    assert!(updated.trust_score <= 599);
    assert!(updated.band() <= TrustBand::T2);
}

#[tokio::test]
async fn sweep_only_runs_on_the_leader() {
    let h = harness(drifting_verdict()).await;
    h.engine
        .register_agent("a3i", "Drifter", "a3i.vorion.drifter:F-L2@1.0.0#mon", json!({}))
        .await
        .unwrap();

    // Follower: the sweep is a no-op.
    let report = h.sweep.run_once().await.unwrap();
    assert!(report.aborted);
    assert_eq!(report.scanned, 0);

    // Leader: the sweep scans and flags.
    assert!(h.elector.try_acquire().await.unwrap());
    let report = h.sweep.run_once().await.unwrap();
    assert!(!report.aborted);
    assert_eq!(report.scanned, 1);
    assert_eq!(report.flagged, 1);
}

#[tokio::test]
async fn flagged_agents_receive_drift_signals() {
    let h = harness(drifting_verdict()).await;
    let agent = h
        .engine
        .register_agent("a3i", "Drifter", "a3i.vorion.drifter:F-L2@1.0.0#mon", json!({}))
        .await
        .unwrap();

    assert!(h.elector.try_acquire().await.unwrap());
    h.sweep.run_once().await.unwrap();

    let signals = h
        .trust_store
        .recent_signals(&agent.agent_id, Utc::now() - chrono::Duration::days(1))
        .await
        .unwrap();
    assert!(signals
        .iter()
        .any(|s| s.signal_type == "behavioral.drift.detected"));
}

#[tokio::test]
async fn in_bounds_agents_are_not_flagged() {
    let h = harness(BehaviorVerdict::nominal()).await;
    h.engine
        .register_agent("a3i", "Steady", "a3i.vorion.steady:F-L2@1.0.0#mon", json!({}))
        .await
        .unwrap();

    assert!(h.elector.try_acquire().await.unwrap());
    let report = h.sweep.run_once().await.unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.flagged, 0);
}
