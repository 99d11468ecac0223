//! Observability, deployment-context, and attestation ceilings.
//!
//! These are pure functions consumed by the trust engine; the engine owns
//! the composition, so nothing here reaches back into trust state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vorion_models::{Attestation, TrustBand};

/// Declared visibility the runtime has into an agent's behavior. Less
/// visibility caps trust harder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservabilityClass {
    BlackBox,
    LogsOnly,
    Metrics,
    Traces,
    FullAudit,
}

impl ObservabilityClass {
    pub fn ceiling(self) -> u16 {
        match self {
            ObservabilityClass::BlackBox => TrustBand::T1.max_score(),
            ObservabilityClass::LogsOnly => TrustBand::T2.max_score(),
            ObservabilityClass::Metrics => TrustBand::T3.max_score(),
            ObservabilityClass::Traces => TrustBand::T4.max_score(),
            ObservabilityClass::FullAudit => TrustBand::T5.max_score(),
        }
    }
}

/// Environmental policy envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentContext {
    Local,
    Team,
    Enterprise,
    Regulated,
    Sovereign,
}

impl DeploymentContext {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "local" | "c_local" => Some(DeploymentContext::Local),
            "team" | "c_team" => Some(DeploymentContext::Team),
            "enterprise" | "c_enterprise" => Some(DeploymentContext::Enterprise),
            "regulated" | "c_regulated" => Some(DeploymentContext::Regulated),
            "sovereign" | "c_sovereign" => Some(DeploymentContext::Sovereign),
            _ => None,
        }
    }
}

/// Everything the ceiling calculation needs to know about where and how the
/// agent runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustContext {
    pub observability: ObservabilityClass,
    pub deployment: DeploymentContext,
    /// A human has approved elevated trust for this agent in this context.
    pub human_approval: bool,
    /// The runtime presented a hardware attestation.
    pub hardware_attestation: bool,
}

impl TrustContext {
    pub fn new(observability: ObservabilityClass, deployment: DeploymentContext) -> Self {
        Self {
            observability,
            deployment,
            human_approval: false,
            hardware_attestation: false,
        }
    }

    pub fn with_human_approval(mut self) -> Self {
        self.human_approval = true;
        self
    }

    pub fn with_hardware_attestation(mut self) -> Self {
        self.hardware_attestation = true;
        self
    }

    /// Context ceiling. Local is unconstrained; team and enterprise cap at
    /// T4; regulated caps at T3 unless a human approved going higher;
    /// sovereign caps at T4 but falls to T2 without hardware attestation.
    pub fn context_ceiling(&self) -> u16 {
        match self.deployment {
            DeploymentContext::Local => TrustBand::T5.max_score(),
            DeploymentContext::Team | DeploymentContext::Enterprise => TrustBand::T4.max_score(),
            DeploymentContext::Regulated => {
                if self.human_approval {
                    TrustBand::T4.max_score()
                } else {
                    TrustBand::T3.max_score()
                }
            }
            DeploymentContext::Sovereign => {
                if self.hardware_attestation {
                    TrustBand::T4.max_score()
                } else {
                    TrustBand::T2.max_score()
                }
            }
        }
    }
}

/// Certification floor: the highest band minimum among valid attestations
/// that claim a band.
pub fn certification_floor(attestations: &[Attestation], now: DateTime<Utc>) -> u16 {
    attestations
        .iter()
        .filter(|att| att.is_valid(now))
        .filter_map(|att| att.claimed_band())
        .map(|band| band.min_score())
        .max()
        .unwrap_or(0)
}

/// Attestation ceiling: the tightest `max_band` claim among valid trust
/// attestations; unconstrained when none claim one.
pub fn attestation_ceiling(attestations: &[Attestation], now: DateTime<Utc>) -> u16 {
    attestations
        .iter()
        .filter(|att| att.is_valid(now))
        .filter_map(|att| att.claimed_max_band())
        .map(|band| band.max_score())
        .min()
        .unwrap_or_else(|| TrustBand::T5.max_score())
}

/// `clamp(max(floor, decayed), 0, min(obsCeiling, ctxCeiling, attCeiling))`
pub fn effective_score(decayed: u16, floor: u16, context: &TrustContext, att_ceiling: u16) -> u16 {
    let ceiling = context
        .observability
        .ceiling()
        .min(context.context_ceiling())
        .min(att_ceiling);
    decayed.max(floor).min(ceiling)
}
