//! Agent Capability Identifier grammar.
//!
//! `<registry>.<organization>.<agent-class>:<domain-mask>-L<level>@<semver>[#<ext1>,<ext2>,...]`
//!
//! The domain mask is a string of distinct uppercase letters, each naming one
//! operational domain bit (`A` = bit 0 ... `Z` = bit 25).

use once_cell::sync::Lazy;
use regex::Regex;
use semver::Version;
use serde::{Deserialize, Serialize};
use vorion_common::error::{AppError, Result};

static SEGMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9_-]*$").expect("segment regex"));
static DOMAIN_MASK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]{1,26}$").expect("mask regex"));
static SHORT_CODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z]{1,10}$").expect("code regex"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedAci {
    pub registry: String,
    pub organization: String,
    pub agent_class: String,
    /// Canonical letter mask, e.g. `FHC`.
    pub domain_mask: String,
    pub level: u8,
    pub version: Version,
    pub extension_shortcodes: Vec<String>,
}

impl ParsedAci {
    /// Operational-domain bitmask derived from the letter mask.
    pub fn domain_bits(&self) -> u32 {
        self.domain_mask
            .bytes()
            .map(|b| 1u32 << (b - b'A'))
            .fold(0, |acc, bit| acc | bit)
    }
}

/// Short-code grammar shared with extension registration.
pub fn is_valid_short_code(code: &str) -> bool {
    SHORT_CODE_RE.is_match(code)
}

pub fn parse_aci(aci: &str) -> Result<ParsedAci> {
    let (class_path, rest) = aci
        .split_once(':')
        .ok_or_else(|| AppError::Validation(format!("ACI missing ':' separator: {}", aci)))?;

    let mut segments = class_path.splitn(3, '.');
    let registry = segments.next().unwrap_or_default();
    let organization = segments.next().unwrap_or_default();
    let agent_class = segments.next().unwrap_or_default();
    for (label, segment) in [
        ("registry", registry),
        ("organization", organization),
        ("agent class", agent_class),
    ] {
        if !SEGMENT_RE.is_match(segment) {
            return Err(AppError::Validation(format!(
                "ACI {} segment is invalid: {:?}",
                label, segment
            )));
        }
    }

    let (mask_level, version_ext) = rest
        .split_once('@')
        .ok_or_else(|| AppError::Validation(format!("ACI missing '@' version: {}", aci)))?;

    let (mask, level_str) = mask_level.rsplit_once("-L").ok_or_else(|| {
        AppError::Validation(format!("ACI missing '-L<level>' suffix: {}", mask_level))
    })?;
    if !DOMAIN_MASK_RE.is_match(mask) {
        return Err(AppError::Validation(format!(
            "ACI domain mask is invalid: {:?}",
            mask
        )));
    }
    let mut seen = [false; 26];
    for b in mask.bytes() {
        let idx = (b - b'A') as usize;
        if seen[idx] {
            return Err(AppError::Validation(format!(
                "ACI domain mask repeats {:?}",
                b as char
            )));
        }
        seen[idx] = true;
    }

    let level: u8 = level_str
        .parse()
        .map_err(|_| AppError::Validation(format!("ACI level is not a number: {:?}", level_str)))?;
    if level > 5 {
        return Err(AppError::Validation(format!(
            "ACI level must be 0-5, got {}",
            level
        )));
    }

    let (version_str, ext_csv) = match version_ext.split_once('#') {
        Some((v, exts)) => (v, Some(exts)),
        None => (version_ext, None),
    };
    let version = Version::parse(version_str)
        .map_err(|e| AppError::Validation(format!("ACI version is not semver: {}", e)))?;

    let mut extension_shortcodes = Vec::new();
    if let Some(csv) = ext_csv {
        for code in csv.split(',').map(str::trim).filter(|c| !c.is_empty()) {
            if is_valid_short_code(code) {
                extension_shortcodes.push(code.to_string());
            } else {
                tracing::warn!(code, "dropping malformed extension short-code from ACI");
            }
        }
    }

    Ok(ParsedAci {
        registry: registry.to_string(),
        organization: organization.to_string(),
        agent_class: agent_class.to_string(),
        domain_mask: mask.to_string(),
        level,
        version,
        extension_shortcodes,
    })
}

/// Serialize a parsed ACI back to its canonical string form.
///
/// With `sort_extensions` the short-codes are emitted sorted, which makes the
/// output stable under reordering; parse-then-build is otherwise an identity.
pub fn build_aci(parsed: &ParsedAci, sort_extensions: bool) -> String {
    let mut out = format!(
        "{}.{}.{}:{}-L{}@{}",
        parsed.registry,
        parsed.organization,
        parsed.agent_class,
        parsed.domain_mask,
        parsed.level,
        parsed.version
    );
    if !parsed.extension_shortcodes.is_empty() {
        let mut codes = parsed.extension_shortcodes.clone();
        if sort_extensions {
            codes.sort();
        }
        out.push('#');
        out.push_str(&codes.join(","));
    }
    out
}
