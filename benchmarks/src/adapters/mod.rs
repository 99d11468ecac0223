use crate::result::BenchmarkResult;

// Re-export adapters
pub mod aci_parsing;
pub mod audit_chaining;
pub mod decision_signing;
pub mod trust_scoring;

/// Trait representing a benchmarkable target
pub trait BenchTarget {
    /// Returns the unique identifier for this benchmark target
    fn id(&self) -> String;

    /// Executes the benchmark and returns the result
    fn run(&self) -> BenchmarkResult;
}

/// Registry of all available benchmark targets
pub fn all_targets() -> Vec<Box<dyn BenchTarget>> {
    vec![
        Box::new(trust_scoring::TrustScoringBench),
        Box::new(aci_parsing::AciParsingBench),
        Box::new(audit_chaining::AuditChainingBench),
        Box::new(decision_signing::DecisionSigningBench),
    ]
}
