use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Discrete trust tier derived from a continuous score.
///
/// The 0-5 table is authoritative. Legacy records written under the old 0-4
/// mapping are translated on read via [`TrustBand::from_legacy_index`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrustBand {
    T0,
    T1,
    T2,
    T3,
    T4,
    T5,
}

impl TrustBand {
    /// Map a score in [0, 1000] to its band. Thresholds are inclusive lower
    /// bounds: 0-199, 200-399, 400-599, 600-799, 800-899, 900-1000.
    pub fn from_score(score: u16) -> Self {
        match score {
            0..=199 => TrustBand::T0,
            200..=399 => TrustBand::T1,
            400..=599 => TrustBand::T2,
            600..=799 => TrustBand::T3,
            800..=899 => TrustBand::T4,
            _ => TrustBand::T5,
        }
    }

    pub fn min_score(self) -> u16 {
        match self {
            TrustBand::T0 => 0,
            TrustBand::T1 => 200,
            TrustBand::T2 => 400,
            TrustBand::T3 => 600,
            TrustBand::T4 => 800,
            TrustBand::T5 => 900,
        }
    }

    pub fn max_score(self) -> u16 {
        match self {
            TrustBand::T0 => 199,
            TrustBand::T1 => 399,
            TrustBand::T2 => 599,
            TrustBand::T3 => 799,
            TrustBand::T4 => 899,
            TrustBand::T5 => 1000,
        }
    }

    pub fn index(self) -> u8 {
        match self {
            TrustBand::T0 => 0,
            TrustBand::T1 => 1,
            TrustBand::T2 => 2,
            TrustBand::T3 => 3,
            TrustBand::T4 => 4,
            TrustBand::T5 => 5,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(TrustBand::T0),
            1 => Some(TrustBand::T1),
            2 => Some(TrustBand::T2),
            3 => Some(TrustBand::T3),
            4 => Some(TrustBand::T4),
            5 => Some(TrustBand::T5),
            _ => None,
        }
    }

    /// Translate a legacy 0-4 band index. The legacy table collapsed the
    /// 400-599 and 600-799 ranges, so legacy bands at or above 2 shift up by
    /// one; below that the indices coincide.
    pub fn from_legacy_index(index: u8) -> Option<Self> {
        match index {
            0 | 1 => Self::from_index(index),
            2..=4 => Self::from_index(index + 1),
            _ => None,
        }
    }
}

/// Durable principal for an autonomous agent.
///
/// Created on first registration, mutated only by the trust engine, never
/// destroyed; revocation is a separate signal.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AgentIdentity {
    pub agent_id: String,
    pub publisher: String,
    pub name: String,
    /// Canonical agent-class identifier with optional extension short-codes.
    pub aci: String,
    pub competence_level: i16,
    pub domain_mask: i64,
    pub version: String,
    pub trust_band: i16,
    pub trust_score: i32,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentIdentity {
    pub fn band(&self) -> TrustBand {
        TrustBand::from_index(self.trust_band as u8).unwrap_or(TrustBand::T0)
    }
}
