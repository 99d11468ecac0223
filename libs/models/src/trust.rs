use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use vorion_common::error::{AppError, Result};

/// Component sub-scores, each in [0, 1]. Missing data defaults to 0.5 at
/// composition time, not here.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrustComponents {
    pub behavioral: f64,
    pub compliance: f64,
    pub identity: f64,
    pub context: f64,
}

impl Default for TrustComponents {
    fn default() -> Self {
        Self {
            behavioral: 0.5,
            compliance: 0.5,
            identity: 0.5,
            context: 0.5,
        }
    }
}

/// Per-entity trust snapshot.
///
/// Decay is computed at read time from `last_activity_at` and never
/// persisted; `score` is always the undecayed raw composition.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TrustRecord {
    pub entity_id: String,
    pub score: i32,
    pub band: i16,
    pub behavioral: f64,
    pub compliance: f64,
    pub identity: f64,
    pub context: f64,
    pub last_calculated_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub signal_count: i64,
}

impl TrustRecord {
    pub fn new(entity_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            entity_id: entity_id.into(),
            score: 500,
            band: 2,
            behavioral: 0.5,
            compliance: 0.5,
            identity: 0.5,
            context: 0.5,
            last_calculated_at: now,
            last_activity_at: now,
            signal_count: 0,
        }
    }

    pub fn components(&self) -> TrustComponents {
        TrustComponents {
            behavioral: self.behavioral,
            compliance: self.compliance,
            identity: self.identity,
            context: self.context,
        }
    }
}

/// Append-only behavioral event feeding trust recalculation.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TrustSignal {
    pub id: Uuid,
    pub entity_id: String,
    /// Dotted namespace, e.g. `behavioral.latency.p99_ok`. The first segment
    /// selects the component the signal contributes to.
    pub signal_type: String,
    pub value: f64,
    pub weight: f64,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

impl TrustSignal {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.value) {
            return Err(AppError::Validation(format!(
                "signal value must be in [0,1], got {}",
                self.value
            )));
        }
        if self.weight <= 0.0 {
            return Err(AppError::Validation(format!(
                "signal weight must be positive, got {}",
                self.weight
            )));
        }
        if !self
            .signal_type
            .split('.')
            .all(|seg| !seg.is_empty() && seg.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
            || !self.signal_type.contains('.')
        {
            return Err(AppError::Validation(format!(
                "signal type must be a dotted namespace, got {:?}",
                self.signal_type
            )));
        }
        Ok(())
    }

    /// Component prefix this signal feeds, if any.
    pub fn component(&self) -> Option<&'static str> {
        let prefix = self.signal_type.split('.').next().unwrap_or_default();
        match prefix {
            "behavioral" => Some("behavioral"),
            "compliance" => Some("compliance"),
            "identity" => Some("identity"),
            "context" => Some("context"),
            _ => None,
        }
    }

    /// Whether this signal counts as activity for decay purposes.
    pub fn is_trust_positive(&self) -> bool {
        self.value >= 0.5
    }
}

/// Audit of score transitions of at least 10 points.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TrustHistoryEntry {
    pub id: Uuid,
    pub entity_id: String,
    pub previous_score: i32,
    pub new_score: i32,
    pub previous_band: i16,
    pub new_band: i16,
    pub reason: String,
    pub signal_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
}
