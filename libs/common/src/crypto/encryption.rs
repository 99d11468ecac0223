use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::config::{Config, KDF_VERSION_LEGACY, KDF_VERSION_PBKDF2};
use crate::error::{AppError, Result};

const NONCE_LEN: usize = 12;

/// At-rest encryption with a versioned key-derivation envelope.
///
/// Ciphertexts are self-describing (`v{n}:<b64 nonce>:<b64 ciphertext>`), so
/// values written under the legacy SHA-256 KDF keep decrypting after the
/// deployment rotates to PBKDF2. Encryption always uses the configured
/// current version.
pub struct EncryptionService {
    secret: String,
    salt: Vec<u8>,
    iterations: u32,
    version: u32,
}

impl EncryptionService {
    pub fn new(secret: impl Into<String>, salt: impl Into<Vec<u8>>, iterations: u32, version: u32) -> Self {
        Self {
            secret: secret.into(),
            salt: salt.into(),
            iterations,
            version,
        }
    }

    /// Build from configuration. Returns `None` when at-rest encryption is
    /// disabled; missing key material with encryption enabled is a
    /// configuration error (also enforced by [`Config::validate`]).
    pub fn from_config(config: &Config) -> Result<Option<Self>> {
        if !config.encryption_enabled {
            return Ok(None);
        }
        let key = config.encryption_key.clone().ok_or_else(|| {
            AppError::Configuration("encryption_key missing with encryption enabled".to_string())
        })?;
        let salt = config.encryption_salt.clone().ok_or_else(|| {
            AppError::Configuration("encryption_salt missing with encryption enabled".to_string())
        })?;
        Ok(Some(Self::new(
            key,
            salt.into_bytes(),
            config.encryption_iterations,
            config.encryption_kdf_version,
        )))
    }

    fn derive_key(&self, version: u32) -> Result<[u8; 32]> {
        let mut key = [0u8; 32];
        match version {
            KDF_VERSION_LEGACY => {
                let mut hasher = Sha256::new();
                hasher.update(self.secret.as_bytes());
                hasher.update(&self.salt);
                key.copy_from_slice(&hasher.finalize());
                Ok(key)
            }
            KDF_VERSION_PBKDF2 => {
                pbkdf2_hmac::<Sha256>(self.secret.as_bytes(), &self.salt, self.iterations, &mut key);
                Ok(key)
            }
            other => Err(AppError::Encryption(format!("unknown KDF version {}", other))),
        }
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        let key = self.derive_key(self.version)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));

        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| AppError::Encryption("encryption failed".to_string()))?;

        Ok(format!(
            "v{}:{}:{}",
            self.version,
            BASE64.encode(nonce),
            BASE64.encode(ciphertext)
        ))
    }

    pub fn decrypt(&self, envelope: &str) -> Result<Vec<u8>> {
        let mut parts = envelope.splitn(3, ':');
        let version_tag = parts
            .next()
            .ok_or_else(|| AppError::Encryption("empty ciphertext envelope".to_string()))?;
        let nonce_b64 = parts
            .next()
            .ok_or_else(|| AppError::Encryption("ciphertext envelope missing nonce".to_string()))?;
        let ct_b64 = parts
            .next()
            .ok_or_else(|| AppError::Encryption("ciphertext envelope missing body".to_string()))?;

        let version: u32 = version_tag
            .strip_prefix('v')
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| {
                AppError::Encryption(format!("malformed envelope version {:?}", version_tag))
            })?;

        let nonce = BASE64
            .decode(nonce_b64)
            .map_err(|_| AppError::Encryption("malformed envelope nonce".to_string()))?;
        if nonce.len() != NONCE_LEN {
            return Err(AppError::Encryption("malformed envelope nonce".to_string()));
        }
        let ciphertext = BASE64
            .decode(ct_b64)
            .map_err(|_| AppError::Encryption("malformed envelope body".to_string()))?;

        let key = self.derive_key(version)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
            .map_err(|_| AppError::Encryption("decryption failed".to_string()))
    }

    pub fn encrypt_str(&self, plaintext: &str) -> Result<String> {
        self.encrypt(plaintext.as_bytes())
    }

    pub fn decrypt_str(&self, envelope: &str) -> Result<String> {
        let bytes = self.decrypt(envelope)?;
        String::from_utf8(bytes)
            .map_err(|_| AppError::Encryption("decrypted value is not UTF-8".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(version: u32) -> EncryptionService {
        EncryptionService::new("unit-test-secret", b"unit-test-salt".to_vec(), 1000, version)
    }

    #[test]
    fn test_round_trip_current_kdf() {
        let svc = service(KDF_VERSION_PBKDF2);
        let envelope = svc.encrypt_str("agent credentials").unwrap();
        assert!(envelope.starts_with("v2:"));
        assert_eq!(svc.decrypt_str(&envelope).unwrap(), "agent credentials");
    }

    #[test]
    fn test_legacy_values_decrypt_after_rotation() {
        // A value written under the legacy SHA-256 KDF must still decrypt
        // once the deployment has rotated to PBKDF2.
        let legacy = service(KDF_VERSION_LEGACY);
        let envelope = legacy.encrypt_str("pre-rotation value").unwrap();
        assert!(envelope.starts_with("v1:"));

        let current = service(KDF_VERSION_PBKDF2);
        assert_eq!(current.decrypt_str(&envelope).unwrap(), "pre-rotation value");
    }

    #[test]
    fn test_tampered_envelope_fails() {
        let svc = service(KDF_VERSION_PBKDF2);
        let envelope = svc.encrypt_str("payload").unwrap();
        let mut tampered = envelope.clone();
        tampered.pop();
        tampered.push('A');
        assert!(svc.decrypt_str(&tampered).is_err());
    }

    #[test]
    fn test_unknown_version_rejected() {
        let svc = service(KDF_VERSION_PBKDF2);
        assert!(svc.decrypt("v9:AAAA:AAAA").is_err());
    }

    #[test]
    fn test_disabled_encryption_yields_none() {
        let config = Config::default();
        assert!(EncryptionService::from_config(&config).unwrap().is_none());
    }
}
