use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Declarative restriction attached to a grant. Constraints accumulate
/// across preCheck results and postGrant folds; they are only ever
/// tightened, never removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub name: String,
    pub params: serde_json::Value,
}

impl Constraint {
    pub fn new(name: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CapabilityRequest {
    #[validate(length(min = 1))]
    pub aci: String,
    pub domain_mask: i64,
    #[validate(range(min = 0, max = 5))]
    pub level: i16,
    /// Requested grant lifetime; defaults to 3600 s when absent.
    pub ttl_secs: Option<u64>,
    pub context: serde_json::Value,
}

/// Immutable once issued; `postGrant` hooks may only append constraints or
/// shorten the expiry before issuance completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityGrant {
    pub id: Uuid,
    pub aci: String,
    pub domain_mask: i64,
    pub level: i16,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub constraints: Vec<Constraint>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    pub id: Uuid,
    pub agent_id: String,
    pub action_type: String,
    pub resource: String,
    pub parameters: serde_json::Value,
}

/// Execution record extending the request with timing and outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub id: Uuid,
    pub request: ActionRequest,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl ActionRecord {
    pub fn started(request: ActionRequest, started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
            started_at,
            completed_at: None,
            result: None,
            error: None,
        }
    }
}
