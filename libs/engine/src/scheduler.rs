//! Leader-gated background sweeps.
//!
//! Behavior verification runs cluster-wide exactly once: the sweep only
//! executes on the elected leader, and it re-checks leadership before every
//! agent so an instance that loses its lease mid-sweep aborts voluntarily at
//! the next check-point instead of double-driving hooks from two nodes.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use vorion_common::error::Result;
use vorion_common::utils;
use vorion_extensions::{AnomalyEvent, BehaviorRecommendation, ExtensionPipeline, ExtensionRegistry};
use vorion_models::TrustSignal;
use vorion_resilience::LeaderElector;
use vorion_trust::TrustEngine;

use crate::agents::AgentStore;

#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub scanned: usize,
    pub flagged: usize,
    /// The sweep stopped early because this instance is not (or no longer)
    /// the leader.
    pub aborted: bool,
}

pub struct MonitoringSweep {
    registry: Arc<ExtensionRegistry>,
    pipeline: ExtensionPipeline,
    agents: Arc<dyn AgentStore>,
    trust: Arc<TrustEngine>,
    elector: Arc<LeaderElector>,
    window_secs: u64,
    batch_size: i64,
}

impl MonitoringSweep {
    pub fn new(
        registry: Arc<ExtensionRegistry>,
        pipeline: ExtensionPipeline,
        agents: Arc<dyn AgentStore>,
        trust: Arc<TrustEngine>,
        elector: Arc<LeaderElector>,
    ) -> Self {
        Self {
            registry,
            pipeline,
            agents,
            trust,
            elector,
            window_secs: 3600,
            batch_size: 100,
        }
    }

    pub fn with_window_secs(mut self, window_secs: u64) -> Self {
        self.window_secs = window_secs;
        self
    }

    /// One full pass over the registered agents.
    pub async fn run_once(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        if !self.elector.is_leader() {
            report.aborted = true;
            return Ok(report);
        }

        let mut offset = 0i64;
        loop {
            let batch = self.agents.list(self.batch_size, offset).await?;
            if batch.is_empty() {
                break;
            }
            offset += batch.len() as i64;

            for agent in &batch {
                if !self.elector.is_leader() {
                    report.aborted = true;
                    return Ok(report);
                }

                let extensions = match self.registry.resolve_for_aci(&agent.aci).await {
                    Ok(extensions) => extensions,
                    Err(e) => {
                        tracing::warn!(agent_id = %agent.agent_id, error = %e, "skipping agent with unresolvable ACI");
                        continue;
                    }
                };
                if extensions.is_empty() {
                    continue;
                }

                let verdict = self
                    .pipeline
                    .run_verify_behavior(&extensions, agent, self.window_secs)
                    .await;
                report.scanned += 1;

                if !verdict.in_bounds {
                    report.flagged += 1;
                    self.record_drift(&agent.agent_id, verdict.drift_score).await;

                    if verdict.recommendation >= BehaviorRecommendation::Suspend {
                        let anomaly = AnomalyEvent {
                            kind: "behavior_drift".to_string(),
                            description: format!(
                                "behavior verification recommends {:?}",
                                verdict.recommendation
                            ),
                            details: serde_json::json!({
                                "drift_score": verdict.drift_score,
                                "drift_categories": verdict.drift_categories,
                            }),
                        };
                        let response = self
                            .pipeline
                            .run_on_anomaly(&extensions, agent, &anomaly)
                            .await;
                        tracing::warn!(
                            agent_id = %agent.agent_id,
                            action = ?response.action,
                            escalated = response.escalated,
                            "behavior sweep raised an anomaly"
                        );
                    }
                }
            }
        }
        Ok(report)
    }

    async fn record_drift(&self, agent_id: &str, drift_score: f64) {
        let signal = TrustSignal {
            id: utils::generate_id(),
            entity_id: agent_id.to_string(),
            signal_type: "behavioral.drift.detected".to_string(),
            value: 0.0,
            weight: drift_score.clamp(0.1, 1.0),
            source: "monitoring-sweep".to_string(),
            timestamp: utils::current_timestamp(),
            metadata: serde_json::Value::Null,
        };
        if let Err(e) = self.trust.record_signal(&signal).await {
            tracing::warn!(agent_id, error = %e, "failed to record drift signal");
        }
    }

    /// Periodic driver. Ticks keep firing while follower; each tick is a
    /// no-op until this instance holds the lease.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match self.run_once().await {
                    Ok(report) if report.aborted => {
                        tracing::debug!("behavior sweep skipped; not leader");
                    }
                    Ok(report) => {
                        tracing::info!(
                            scanned = report.scanned,
                            flagged = report.flagged,
                            "behavior sweep completed"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "behavior sweep failed");
                    }
                }
            }
        })
    }
}
