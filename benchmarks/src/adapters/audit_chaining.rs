use std::time::Instant;

use sha2::{Digest, Sha256};

use crate::adapters::BenchTarget;
use crate::result::BenchmarkResult;
use vorion_engine::audit::canonical_json;

/// Benchmark adapter for proof-chain content hashing: canonical JSON plus
/// SHA-256 linkage over a synthetic decision stream.
pub struct AuditChainingBench;

impl BenchTarget for AuditChainingBench {
    fn id(&self) -> String {
        "audit_chaining".to_string()
    }

    fn run(&self) -> BenchmarkResult {
        let start = Instant::now();

        let iterations = 5_000;
        let mut previous_hash =
            "0000000000000000000000000000000000000000000000000000000000000000".to_string();

        for position in 0..iterations {
            let decision = serde_json::json!({
                "type": "action",
                "outcome": if position % 7 == 0 { "failed" } else { "completed" },
                "agent_id": format!("agent-{}", position % 50),
            });
            let inputs = serde_json::json!({
                "action_type": "catering.order",
                "parameters": { "guests": position % 200, "priority": "normal" },
            });

            let mut hasher = Sha256::new();
            hasher.update((position as i64).to_be_bytes());
            hasher.update(previous_hash.as_bytes());
            hasher.update(canonical_json(&decision).as_bytes());
            hasher.update(canonical_json(&inputs).as_bytes());
            previous_hash = format!("{:x}", hasher.finalize());
        }

        let duration = start.elapsed();
        let avg_latency_us = duration.as_micros() as f64 / iterations as f64;

        BenchmarkResult::new(
            self.id(),
            serde_json::json!({
                "iterations": iterations,
                "total_duration_ms": duration.as_millis(),
                "avg_latency_us": avg_latency_us,
                "final_hash": previous_hash,
                "throughput_ops_per_sec": (iterations as f64 / duration.as_secs_f64()),
            }),
        )
    }
}
