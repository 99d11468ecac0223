use once_cell::sync::Lazy;
use regex::Regex;
use semver::Version;
use serde::{Deserialize, Serialize};
use vorion_common::error::{AppError, Result};

use crate::aci::is_valid_short_code;

static EXTENSION_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^aci-ext-[a-z][a-z0-9-]*-v(\d+)$").expect("extension id regex"));

/// Registered policy/monitoring module descriptor.
///
/// `extension_id` and `short_code` are unique within a registry; the
/// short-code declared in an agent's ACI selects which extensions
/// participate in that agent's pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionManifest {
    /// Shape `aci-ext-{name}-v{major}`.
    pub extension_id: String,
    /// Shape `[a-z]{1,10}`.
    pub short_code: String,
    pub version: Version,
    pub publisher: String,
}

impl ExtensionManifest {
    pub fn new(
        extension_id: impl Into<String>,
        short_code: impl Into<String>,
        version: Version,
        publisher: impl Into<String>,
    ) -> Self {
        Self {
            extension_id: extension_id.into(),
            short_code: short_code.into(),
            version,
            publisher: publisher.into(),
        }
    }

    /// Major version encoded in the extension id, when well-formed.
    pub fn id_major(&self) -> Option<u64> {
        EXTENSION_ID_RE
            .captures(&self.extension_id)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }

    pub fn validate(&self) -> Result<()> {
        if !EXTENSION_ID_RE.is_match(&self.extension_id) {
            return Err(AppError::Validation(format!(
                "extension id must match aci-ext-{{name}}-v{{major}}, got {:?}",
                self.extension_id
            )));
        }
        if !is_valid_short_code(&self.short_code) {
            return Err(AppError::Validation(format!(
                "extension short-code must match [a-z]{{1,10}}, got {:?}",
                self.short_code
            )));
        }
        if self.publisher.trim().is_empty() {
            return Err(AppError::Validation(
                "extension publisher must be non-empty".to_string(),
            ));
        }
        // Id/version major mismatch is tolerated but suspicious.
        if let Some(major) = self.id_major() {
            if major != self.version.major {
                tracing::warn!(
                    extension_id = %self.extension_id,
                    version = %self.version,
                    "extension id major does not match semver major"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(id: &str, code: &str, version: &str) -> ExtensionManifest {
        ExtensionManifest::new(id, code, Version::parse(version).unwrap(), "vorion")
    }

    #[test]
    fn test_valid_manifest() {
        assert!(manifest("aci-ext-governance-v1", "gov", "1.2.0").validate().is_ok());
    }

    #[test]
    fn test_id_grammar() {
        assert!(manifest("governance-v1", "gov", "1.0.0").validate().is_err());
        assert!(manifest("aci-ext-Governance-v1", "gov", "1.0.0").validate().is_err());
        assert!(manifest("aci-ext-governance", "gov", "1.0.0").validate().is_err());
    }

    #[test]
    fn test_short_code_grammar() {
        assert!(manifest("aci-ext-governance-v1", "GOV", "1.0.0").validate().is_err());
        assert!(manifest("aci-ext-governance-v1", "toolongcode1", "1.0.0")
            .validate()
            .is_err());
        assert!(manifest("aci-ext-governance-v1", "", "1.0.0").validate().is_err());
    }

    #[test]
    fn test_id_major_extraction() {
        assert_eq!(manifest("aci-ext-governance-v2", "gov", "2.1.0").id_major(), Some(2));
    }

    #[test]
    fn test_major_mismatch_is_warning_only() {
        // Mismatched majors validate; the registry logs a warning instead.
        assert!(manifest("aci-ext-governance-v1", "gov", "2.0.0").validate().is_ok());
    }
}
