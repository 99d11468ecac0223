use crate::result::BenchmarkResult;

/// Generate a markdown report from benchmark results
pub fn generate_report(results: &[BenchmarkResult]) -> String {
    let mut report = String::new();

    report.push_str("# Governance Core Benchmark Results\n\n");
    report.push_str(&format!(
        "Generated at: {}\n\n",
        chrono::Utc::now().to_rfc3339()
    ));
    report.push_str(&format!("Total benchmarks: {}\n\n", results.len()));

    report.push_str("## Summary\n\n");
    report.push_str("| Target | Throughput (ops/s) | Ran at |\n");
    report.push_str("|--------|--------------------|--------|\n");
    for result in results {
        let throughput = result
            .metrics
            .get("throughput_ops_per_sec")
            .or_else(|| result.metrics.get("sign_ops_per_sec"))
            .and_then(|v| v.as_f64())
            .map(|v| format!("{:.0}", v))
            .unwrap_or_else(|| "-".to_string());
        report.push_str(&format!(
            "| {} | {} | {} |\n",
            result.target_id,
            throughput,
            result.timestamp.to_rfc3339()
        ));
    }

    report.push_str("\n## Details\n\n");
    for result in results {
        report.push_str(&format!("### {}\n\n", result.target_id));
        report.push_str("```json\n");
        report.push_str(
            &serde_json::to_string_pretty(&result.metrics).unwrap_or_else(|_| "{}".to_string()),
        );
        report.push_str("\n```\n\n");
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_report() {
        let results = vec![BenchmarkResult::new(
            "trust_scoring".to_string(),
            serde_json::json!({"throughput_ops_per_sec": 123456.7}),
        )];

        let report = generate_report(&results);
        assert!(report.contains("# Governance Core Benchmark Results"));
        assert!(report.contains("| trust_scoring | 123457 |"));
        assert!(report.contains("### trust_scoring"));
    }
}
