//! Per-hook timeout table.
//!
//! Each hook type carries a default and a hard maximum; startup overrides
//! are clamped to the maximum.

use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    PreCheck,
    PostGrant,
    OnExpiry,
    PreAction,
    PostAction,
    OnFailure,
    VerifyBehavior,
    CollectMetrics,
    OnAnomaly,
    OnRevocation,
    AdjustTrust,
    VerifyAttestation,
    PolicyEvaluate,
    LoadPolicy,
}

impl HookKind {
    pub fn name(self) -> &'static str {
        match self {
            HookKind::PreCheck => "capability.preCheck",
            HookKind::PostGrant => "capability.postGrant",
            HookKind::OnExpiry => "capability.onExpiry",
            HookKind::PreAction => "action.preAction",
            HookKind::PostAction => "action.postAction",
            HookKind::OnFailure => "action.onFailure",
            HookKind::VerifyBehavior => "monitoring.verifyBehavior",
            HookKind::CollectMetrics => "monitoring.collectMetrics",
            HookKind::OnAnomaly => "monitoring.onAnomaly",
            HookKind::OnRevocation => "trust.onRevocation",
            HookKind::AdjustTrust => "trust.adjustTrust",
            HookKind::VerifyAttestation => "trust.verifyAttestation",
            HookKind::PolicyEvaluate => "policy.evaluate",
            HookKind::LoadPolicy => "policy.loadPolicy",
        }
    }

    pub fn default_timeout_ms(self) -> u64 {
        match self {
            HookKind::PreCheck => 100,
            HookKind::PostGrant => 100,
            HookKind::OnExpiry => 100,
            HookKind::PreAction => 200,
            HookKind::PostAction => 500,
            HookKind::OnFailure => 200,
            HookKind::VerifyBehavior => 5_000,
            HookKind::CollectMetrics => 5_000,
            HookKind::OnAnomaly => 1_000,
            HookKind::OnRevocation => 500,
            HookKind::AdjustTrust => 200,
            HookKind::VerifyAttestation => 500,
            HookKind::PolicyEvaluate => 500,
            HookKind::LoadPolicy => 1_000,
        }
    }

    pub fn max_timeout_ms(self) -> u64 {
        match self {
            HookKind::PreCheck => 500,
            HookKind::PostGrant => 500,
            HookKind::OnExpiry => 500,
            HookKind::PreAction => 1_000,
            HookKind::PostAction => 2_000,
            HookKind::OnFailure => 1_000,
            HookKind::VerifyBehavior => 30_000,
            HookKind::CollectMetrics => 30_000,
            HookKind::OnAnomaly => 5_000,
            HookKind::OnRevocation => 2_000,
            HookKind::AdjustTrust => 1_000,
            HookKind::VerifyAttestation => 2_000,
            HookKind::PolicyEvaluate => 2_000,
            HookKind::LoadPolicy => 5_000,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TimeoutTable {
    overrides: HashMap<HookKind, u64>,
}

impl TimeoutTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override one hook's timeout, clamped to its hard maximum.
    pub fn with_override(mut self, kind: HookKind, timeout_ms: u64) -> Self {
        self.overrides
            .insert(kind, timeout_ms.min(kind.max_timeout_ms()));
        self
    }

    pub fn timeout(&self, kind: HookKind) -> Duration {
        let ms = self
            .overrides
            .get(&kind)
            .copied()
            .unwrap_or_else(|| kind.default_timeout_ms());
        Duration::from_millis(ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let table = TimeoutTable::new();
        assert_eq!(table.timeout(HookKind::PreCheck), Duration::from_millis(100));
        assert_eq!(
            table.timeout(HookKind::VerifyBehavior),
            Duration::from_millis(5_000)
        );
    }

    #[test]
    fn test_overrides_clamp_to_max() {
        let table = TimeoutTable::new()
            .with_override(HookKind::PreCheck, 50)
            .with_override(HookKind::PreAction, 99_999);
        assert_eq!(table.timeout(HookKind::PreCheck), Duration::from_millis(50));
        assert_eq!(
            table.timeout(HookKind::PreAction),
            Duration::from_millis(1_000)
        );
    }

    #[test]
    fn test_hook_names() {
        assert_eq!(HookKind::PreCheck.name(), "capability.preCheck");
        assert_eq!(HookKind::PolicyEvaluate.name(), "policy.evaluate");
    }
}
