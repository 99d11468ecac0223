pub mod encryption;
pub mod signing;

pub use encryption::EncryptionService;
pub use signing::{verify_signature, DecisionSigner, SignatureAlgorithm};
