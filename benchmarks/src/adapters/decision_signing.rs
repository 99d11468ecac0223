use std::time::Instant;

use crate::adapters::BenchTarget;
use crate::result::BenchmarkResult;
use vorion_common::crypto::{verify_signature, DecisionSigner};

/// Benchmark adapter for decision signing and verification throughput on
/// the primary Ed25519 scheme.
pub struct DecisionSigningBench;

impl BenchTarget for DecisionSigningBench {
    fn id(&self) -> String {
        "decision_signing".to_string()
    }

    fn run(&self) -> BenchmarkResult {
        let signer = DecisionSigner::generate_ed25519();
        let public_key = signer.public_key_bytes();

        let iterations = 1_000;
        let sign_start = Instant::now();
        let signatures: Vec<Vec<u8>> = (0..iterations)
            .map(|i| signer.sign(format!("decision-hash-{:06}", i).as_bytes()))
            .collect();
        let sign_duration = sign_start.elapsed();

        let verify_start = Instant::now();
        let mut verified = 0usize;
        for (i, signature) in signatures.iter().enumerate() {
            let message = format!("decision-hash-{:06}", i);
            if verify_signature(signer.algorithm(), &public_key, message.as_bytes(), signature)
                .unwrap_or(false)
            {
                verified += 1;
            }
        }
        let verify_duration = verify_start.elapsed();

        BenchmarkResult::new(
            self.id(),
            serde_json::json!({
                "iterations": iterations,
                "sign_duration_ms": sign_duration.as_millis(),
                "verify_duration_ms": verify_duration.as_millis(),
                "verified": verified,
                "sign_ops_per_sec": (iterations as f64 / sign_duration.as_secs_f64()),
                "verify_ops_per_sec": (iterations as f64 / verify_duration.as_secs_f64()),
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_signing_bench() {
        let bench = DecisionSigningBench;
        assert_eq!(bench.id(), "decision_signing");

        let result = bench.run();
        // Every signature produced verifies against the same key.
        assert_eq!(result.metrics["verified"], 1_000);
    }
}
