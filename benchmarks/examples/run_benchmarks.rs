use std::path::Path;

use vorion_benchmarks::{io, markdown, run_all_benchmarks};

fn main() -> std::io::Result<()> {
    let results = run_all_benchmarks();

    let out_dir = Path::new("target/benchmark-results");
    io::write_results_json(&results, &out_dir.join("results.json"))?;

    let report = markdown::generate_report(&results);
    io::write_markdown(&report, &out_dir.join("REPORT.md"))?;

    println!("\n{}", report);
    Ok(())
}
