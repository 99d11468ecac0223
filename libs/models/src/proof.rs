use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Hash-linked, signed decision record.
///
/// `self_hash = SHA-256(position || previous_hash || canonical(decision)
/// || canonical(inputs) || canonical(outputs))`; `previous_hash` of entry
/// `i` equals `self_hash` of entry `i-1`, forming a total order per tenant.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProofRecord {
    pub id: Uuid,
    pub tenant_id: String,
    pub position: i64,
    pub previous_hash: String,
    pub self_hash: String,
    pub decision: serde_json::Value,
    pub inputs: serde_json::Value,
    pub outputs: serde_json::Value,
    pub signature: String,
    pub algorithm: String,
    pub public_key: String,
    pub timestamp: DateTime<Utc>,
}

/// Hash of the empty chain; the first proof of a tenant links to this.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";
