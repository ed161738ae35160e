//! Human-readable text output

use crate::stats::StatsSnapshot;
use crate::util::time::{format_duration, format_number, format_rate};
use crate::workload::RunReport;
use std::fmt::Write;

const RULE: &str = "═══════════════════════════════════════════════════════════";

/// One-line summary of a snapshot, used for periodic log output
pub fn summary_line(snapshot: &StatsSnapshot) -> String {
    format!(
        "[{}] {:>8.3}s  walks: {}  ops: {} ({}/s)  errors: {}",
        snapshot.phase.as_str(),
        snapshot.elapsed.as_secs_f64(),
        format_number(snapshot.iterations),
        format_number(snapshot.total_count()),
        format_rate(snapshot.ops_per_sec()),
        format_number(snapshot.total_errors()),
    )
}

/// Render the end-of-run report
pub fn format_report(report: &RunReport) -> String {
    let snapshot = &report.snapshot;
    let mut out = String::new();

    // Writing into a String cannot fail
    let _ = writeln!(out, "{}", RULE);
    let _ = writeln!(out, "                    TEST RESULTS");
    let _ = writeln!(out, "{}", RULE);
    let _ = writeln!(out);
    let _ = writeln!(out, "Workload:     {}", report.workload);
    let _ = writeln!(out, "Threads:      {}", report.workers.len());
    let _ = writeln!(out, "Elapsed Time: {:.3}s", report.elapsed.as_secs_f64());
    let _ = writeln!(out);

    let aborted: u64 = report.workers.iter().map(|w| w.aborted_walks).sum();
    let _ = writeln!(out, "Walks:");
    let _ = writeln!(out, "  Completed: {}", format_number(snapshot.iterations));
    if aborted > 0 {
        let _ = writeln!(out, "  Restarted: {}", format_number(aborted));
    }
    let _ = writeln!(
        out,
        "  Total ops: {} - {} ops/s",
        format_number(snapshot.total_count()),
        format_rate(snapshot.ops_per_sec())
    );
    if snapshot.total_errors() > 0 {
        let _ = writeln!(out, "  Errors:    {}", format_number(snapshot.total_errors()));
    }
    let _ = writeln!(out);

    if snapshot.nodes.is_empty() {
        let _ = writeln!(out, "No node executions recorded");
    } else {
        let width = snapshot.nodes.iter().map(|n| n.name.len()).max().unwrap_or(4).max(4);
        let _ = writeln!(
            out,
            "  {:<width$}  {:<9} {:>10} {:>8} {:>10} {:>10} {:>10} {:>10}",
            "Node",
            "Kind",
            "Count",
            "Errors",
            "Mean",
            "p50",
            "p99",
            "Max",
            width = width
        );
        for node in &snapshot.nodes {
            let _ = writeln!(
                out,
                "  {:<width$}  {:<9} {:>10} {:>8} {:>10} {:>10} {:>10} {:>10}",
                node.name,
                node.kind,
                format_number(node.count),
                format_number(node.errors),
                format_duration(node.latency.mean),
                format_duration(node.latency.p50),
                format_duration(node.latency.p99),
                format_duration(node.latency.max),
                width = width
            );
        }
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "Workers:");
    for worker in &report.workers {
        let _ = writeln!(
            out,
            "  #{:<3} {} walks, stopped by {} after {:.3}s",
            worker.id,
            format_number(worker.iterations),
            worker.stop_reason,
            worker.elapsed.as_secs_f64()
        );
    }
    let _ = writeln!(out, "{}", RULE);
    out
}

/// Print the end-of-run report to stdout
pub fn print_results(report: &RunReport) {
    print!("{}", format_report(report));
}
