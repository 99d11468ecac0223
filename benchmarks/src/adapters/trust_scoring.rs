use std::time::Instant;

use crate::adapters::BenchTarget;
use crate::result::BenchmarkResult;
use vorion_models::TrustBand;
use vorion_trust::decay_multiplier;

/// Benchmark adapter for the trust scoring hot path: stepped decay plus
/// score-to-band mapping across the full score range.
pub struct TrustScoringBench;

impl BenchTarget for TrustScoringBench {
    fn id(&self) -> String {
        "trust_scoring".to_string()
    }

    fn run(&self) -> BenchmarkResult {
        let start = Instant::now();

        let iterations = 10_000;
        let mut band_histogram = [0u64; 6];
        let mut decay_sum = 0.0;

        for i in 0..iterations {
            let days_inactive = (i % 365) as f64;
            let multiplier = decay_multiplier(days_inactive);
            decay_sum += multiplier;

            let raw_score = (i * 37 % 1001) as u16;
            let decayed = ((raw_score as f64) * multiplier).round() as u16;
            let band = TrustBand::from_score(decayed.min(1000));
            band_histogram[band.index() as usize] += 1;
        }

        let duration = start.elapsed();
        let avg_latency_us = duration.as_micros() as f64 / iterations as f64;

        BenchmarkResult::new(
            self.id(),
            serde_json::json!({
                "iterations": iterations,
                "total_duration_ms": duration.as_millis(),
                "avg_latency_us": avg_latency_us,
                "avg_decay_multiplier": decay_sum / iterations as f64,
                "band_histogram": band_histogram.to_vec(),
                "throughput_ops_per_sec": (iterations as f64 / duration.as_secs_f64()),
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trust_scoring_bench() {
        let bench = TrustScoringBench;
        assert_eq!(bench.id(), "trust_scoring");

        let result = bench.run();
        assert_eq!(result.target_id, "trust_scoring");
        assert!(result.metrics.get("avg_decay_multiplier").is_some());

        // Every iteration lands in exactly one band.
        let histogram: Vec<u64> = result.metrics["band_histogram"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_u64().unwrap())
            .collect();
        assert_eq!(histogram.iter().sum::<u64>(), 10_000);
    }
}
