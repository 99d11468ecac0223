use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{AppError, Result};

/// Signature scheme used for proof records. Ed25519 is primary; ECDSA
/// P-256/SHA-256 is the fallback for environments without Ed25519 key
/// material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureAlgorithm {
    Ed25519,
    EcdsaP256,
}

enum KeyMaterial {
    Ed25519(ed25519_dalek::SigningKey),
    EcdsaP256(p256::ecdsa::SigningKey),
}

/// Process-scoped signing identity for the proof chain.
pub struct DecisionSigner {
    key: KeyMaterial,
}

impl DecisionSigner {
    /// Load the signing key from configuration, or generate an ephemeral one.
    ///
    /// An Ed25519 seed is 32 hex-encoded bytes; anything else is tried as an
    /// ECDSA P-256 scalar. Missing key material is fatal in production and
    /// staging; elsewhere an ephemeral Ed25519 key is generated with a
    /// warning.
    pub fn from_config(config: &Config) -> Result<Self> {
        match &config.signing_key {
            Some(encoded) => {
                let bytes = hex::decode(encoded).map_err(|e| {
                    AppError::Configuration(format!("signing_key is not valid hex: {}", e))
                })?;
                if bytes.len() == 32 {
                    let seed: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
                        AppError::Configuration("signing_key must be 32 bytes".to_string())
                    })?;
                    return Ok(Self {
                        key: KeyMaterial::Ed25519(ed25519_dalek::SigningKey::from_bytes(&seed)),
                    });
                }
                let key = p256::ecdsa::SigningKey::from_slice(&bytes).map_err(|e| {
                    AppError::Configuration(format!(
                        "signing_key is neither an Ed25519 seed nor a P-256 scalar: {}",
                        e
                    ))
                })?;
                Ok(Self {
                    key: KeyMaterial::EcdsaP256(key),
                })
            }
            None => {
                if config.is_production_like() {
                    return Err(AppError::Configuration(
                        "signing key is required in production and staging".to_string(),
                    ));
                }
                tracing::warn!("no signing key configured; generating an ephemeral Ed25519 key");
                Ok(Self::generate_ed25519())
            }
        }
    }

    pub fn generate_ed25519() -> Self {
        let key = ed25519_dalek::SigningKey::generate(&mut rand::rngs::OsRng);
        Self {
            key: KeyMaterial::Ed25519(key),
        }
    }

    pub fn generate_p256() -> Self {
        let key = p256::ecdsa::SigningKey::random(&mut rand::rngs::OsRng);
        Self {
            key: KeyMaterial::EcdsaP256(key),
        }
    }

    pub fn algorithm(&self) -> SignatureAlgorithm {
        match &self.key {
            KeyMaterial::Ed25519(_) => SignatureAlgorithm::Ed25519,
            KeyMaterial::EcdsaP256(_) => SignatureAlgorithm::EcdsaP256,
        }
    }

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        match &self.key {
            KeyMaterial::Ed25519(key) => {
                use ed25519_dalek::Signer;
                key.sign(message).to_bytes().to_vec()
            }
            KeyMaterial::EcdsaP256(key) => {
                use p256::ecdsa::signature::Signer;
                let signature: p256::ecdsa::Signature = key.sign(message);
                signature.to_bytes().to_vec()
            }
        }
    }

    /// Public key bytes in the scheme's canonical encoding (32-byte Ed25519,
    /// SEC1-compressed P-256).
    pub fn public_key_bytes(&self) -> Vec<u8> {
        match &self.key {
            KeyMaterial::Ed25519(key) => key.verifying_key().to_bytes().to_vec(),
            KeyMaterial::EcdsaP256(key) => key
                .verifying_key()
                .to_encoded_point(true)
                .as_bytes()
                .to_vec(),
        }
    }
}

/// Verify a signature produced by [`DecisionSigner::sign`].
pub fn verify_signature(
    algorithm: SignatureAlgorithm,
    public_key: &[u8],
    message: &[u8],
    signature: &[u8],
) -> Result<bool> {
    match algorithm {
        SignatureAlgorithm::Ed25519 => {
            use ed25519_dalek::Verifier;
            let key_bytes: [u8; 32] = public_key
                .try_into()
                .map_err(|_| AppError::Encryption("invalid Ed25519 public key".to_string()))?;
            let key = ed25519_dalek::VerifyingKey::from_bytes(&key_bytes)
                .map_err(|e| AppError::Encryption(format!("invalid Ed25519 public key: {}", e)))?;
            let sig_bytes: [u8; 64] = signature
                .try_into()
                .map_err(|_| AppError::Encryption("invalid Ed25519 signature".to_string()))?;
            let sig = ed25519_dalek::Signature::from_bytes(&sig_bytes);
            Ok(key.verify(message, &sig).is_ok())
        }
        SignatureAlgorithm::EcdsaP256 => {
            use p256::ecdsa::signature::Verifier;
            let key = p256::ecdsa::VerifyingKey::from_sec1_bytes(public_key)
                .map_err(|e| AppError::Encryption(format!("invalid P-256 public key: {}", e)))?;
            let sig = p256::ecdsa::Signature::from_slice(signature)
                .map_err(|e| AppError::Encryption(format!("invalid P-256 signature: {}", e)))?;
            Ok(key.verify(message, &sig).is_ok())
        }
    }
}
