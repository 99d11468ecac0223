use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::agent::TrustBand;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "attestation_type", rename_all = "snake_case")]
pub enum AttestationType {
    Certification,
    Capability,
    Trust,
    Compliance,
}

/// Portable certification travelling with an agent.
///
/// An expired or revoked attestation contributes no floor and no ceiling.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Attestation {
    pub id: Uuid,
    pub agent_id: String,
    pub issuer: String,
    pub attestation_type: AttestationType,
    pub claims: serde_json::Value,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub signature: String,
    pub algorithm: String,
    pub revoked: bool,
}

impl Attestation {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && self.expires_at > now && self.issued_at <= now
    }

    /// Trust band claimed by this attestation, when present. Recognizes the
    /// `band` claim as either a numeric index or a `"T3"` style string.
    pub fn claimed_band(&self) -> Option<TrustBand> {
        match self.claims.get("band") {
            Some(serde_json::Value::Number(n)) => {
                TrustBand::from_index(u8::try_from(n.as_u64()?).ok()?)
            }
            Some(serde_json::Value::String(s)) => {
                let idx: u8 = s.strip_prefix('T')?.parse().ok()?;
                TrustBand::from_index(idx)
            }
            _ => None,
        }
    }

    /// Upper band bound claimed by a `trust` attestation, when present.
    pub fn claimed_max_band(&self) -> Option<TrustBand> {
        let n = self.claims.get("max_band")?.as_u64()?;
        TrustBand::from_index(u8::try_from(n).ok()?)
    }
}
