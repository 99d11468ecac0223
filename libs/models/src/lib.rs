pub mod aci;
pub mod agent;
pub mod attestation;
pub mod capability;
pub mod extension;
pub mod proof;
pub mod trust;

pub use aci::{build_aci, parse_aci, ParsedAci};
pub use agent::{AgentIdentity, TrustBand};
pub use attestation::{Attestation, AttestationType};
pub use capability::{
    ActionRecord, ActionRequest, CapabilityGrant, CapabilityRequest, Constraint,
};
pub use extension::ExtensionManifest;
pub use proof::ProofRecord;
pub use trust::{TrustComponents, TrustHistoryEntry, TrustRecord, TrustSignal};
