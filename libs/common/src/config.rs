use serde::Deserialize;

use crate::error::{AppError, Result};

/// Documented development default for the JWT secret. Production and staging
/// refuse to start while this value is in effect.
pub const DEV_JWT_SECRET: &str = "vorion-dev-secret-do-not-use";

/// Legacy single-pass SHA-256 key derivation. Decrypt-only; production and
/// staging refuse to start with this as the active version.
pub const KDF_VERSION_LEGACY: u32 = 1;
/// Current PBKDF2-HMAC-SHA256 key derivation.
pub const KDF_VERSION_PBKDF2: u32 = 2;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub environment: String,
    pub deployment_context: String,

    pub database_url: String,
    pub redis_url: String,
    pub db_pool_size: u32,
    pub redis_pool_size: u32,

    pub jwt_secret: String,
    pub jwt_expiration: i64,
    pub refresh_token_expiration: i64,

    pub encryption_enabled: bool,
    pub encryption_key: Option<String>,
    pub encryption_salt: Option<String>,
    pub encryption_iterations: u32,
    pub encryption_kdf_version: u32,

    pub signing_key: Option<String>,

    pub telemetry_endpoint: Option<String>,
    pub health_check_timeout_ms: u64,
    pub rate_limit_default_rpm: u32,

    pub audit_retention_days: u32,
    pub audit_archive_after_days: u32,
}

impl Config {
    pub fn from_env() -> std::result::Result<Self, envy::Error> {
        dotenv::dotenv().ok();
        envy::prefixed("VORION_").from_env::<Self>()
    }

    pub fn is_production_like(&self) -> bool {
        matches!(self.environment.as_str(), "production" | "staging")
    }

    /// Startup validation. The four production/staging refusals are hard
    /// failures; everything else is tolerated with defaults.
    pub fn validate(&self) -> Result<()> {
        if self.is_production_like() {
            if self.jwt_secret == DEV_JWT_SECRET {
                return Err(AppError::Configuration(
                    "jwt_secret is the development default; set VORION_JWT_SECRET".to_string(),
                ));
            }
            if self.encryption_kdf_version == KDF_VERSION_LEGACY {
                return Err(AppError::Configuration(
                    "encryption_kdf_version 1 (legacy SHA-256) is not permitted; rotate to PBKDF2"
                        .to_string(),
                ));
            }
        }
        if self.encryption_enabled
            && (self.encryption_key.is_none() || self.encryption_salt.is_none())
        {
            return Err(AppError::Configuration(
                "at-rest encryption is enabled but encryption_key or encryption_salt is missing"
                    .to_string(),
            ));
        }
        if self.audit_archive_after_days >= self.audit_retention_days {
            return Err(AppError::Configuration(format!(
                "audit_archive_after_days ({}) must be below audit_retention_days ({})",
                self.audit_archive_after_days, self.audit_retention_days
            )));
        }
        if self.encryption_kdf_version != KDF_VERSION_LEGACY
            && self.encryption_kdf_version != KDF_VERSION_PBKDF2
        {
            return Err(AppError::Configuration(format!(
                "unknown encryption_kdf_version {}",
                self.encryption_kdf_version
            )));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            deployment_context: "local".to_string(),
            database_url: String::new(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            db_pool_size: 10,
            redis_pool_size: 10,
            jwt_secret: DEV_JWT_SECRET.to_string(),
            jwt_expiration: 3600,
            refresh_token_expiration: 2592000,
            encryption_enabled: false,
            encryption_key: None,
            encryption_salt: None,
            encryption_iterations: 600_000,
            encryption_kdf_version: KDF_VERSION_PBKDF2,
            signing_key: None,
            telemetry_endpoint: None,
            health_check_timeout_ms: 5_000,
            rate_limit_default_rpm: 600,
            audit_retention_days: 365,
            audit_archive_after_days: 90,
        }
    }
}
