use std::time::Instant;

use crate::adapters::BenchTarget;
use crate::result::BenchmarkResult;
use vorion_models::{build_aci, parse_aci};

/// Benchmark adapter for ACI string parsing and canonical serialization.
pub struct AciParsingBench;

const SAMPLE_ACIS: [&str; 4] = [
    "a3i.vorion.banquet-advisor:FHC-L3@1.2.0#gov,audit",
    "a3i.vorion.ledger-scribe:F-L1@0.4.2",
    "core.acme.fleet-router:ABQ-L5@3.0.1#gov,acl,audit",
    "edge.acme.sensor-watch:M-L2@2.10.0#mon",
];

impl BenchTarget for AciParsingBench {
    fn id(&self) -> String {
        "aci_parsing".to_string()
    }

    fn run(&self) -> BenchmarkResult {
        let start = Instant::now();

        let iterations = 10_000;
        let mut round_trips = 0usize;
        let mut extension_codes = 0usize;

        for i in 0..iterations {
            let aci = SAMPLE_ACIS[i % SAMPLE_ACIS.len()];
            let parsed = parse_aci(aci).expect("sample ACIs are valid");
            extension_codes += parsed.extension_shortcodes.len();
            if build_aci(&parsed, false) == aci {
                round_trips += 1;
            }
        }

        let duration = start.elapsed();
        let avg_latency_us = duration.as_micros() as f64 / iterations as f64;

        BenchmarkResult::new(
            self.id(),
            serde_json::json!({
                "iterations": iterations,
                "total_duration_ms": duration.as_millis(),
                "avg_latency_us": avg_latency_us,
                "round_trips": round_trips,
                "extension_codes_seen": extension_codes,
                "throughput_ops_per_sec": (iterations as f64 / duration.as_secs_f64()),
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aci_parsing_bench() {
        let bench = AciParsingBench;
        assert_eq!(bench.id(), "aci_parsing");

        let result = bench.run();
        // parse-then-build is an identity on every sample.
        assert_eq!(result.metrics["round_trips"], 10_000);
    }
}
