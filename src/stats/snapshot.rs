//! Immutable statistics snapshots

use super::histogram::LatencySummary;
use super::NodeStats;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Where in the run a snapshot was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplePhase {
    /// Periodic sample while workers are running
    Interval,
    /// Closing sample after every worker terminated
    Final,
}

impl SamplePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SamplePhase::Interval => "interval",
            SamplePhase::Final => "final",
        }
    }
}

/// Aggregate for one node at snapshot time
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSnapshot {
    pub name: String,
    pub kind: &'static str,
    pub count: u64,
    pub errors: u64,
    pub latency: LatencySummary,
}

/// Point-in-time aggregate of a run
///
/// Built once from a copy of the collector's counters and never mutated.
/// Final snapshots hold run totals; periodic interval snapshots hold the
/// counters of their own period.
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub phase: SamplePhase,
    /// Time the counters cover: the whole run, or one period
    pub elapsed: Duration,
    /// Completed top-level walks across all workers
    pub iterations: u64,
    /// Per-node aggregates, sorted by name
    pub nodes: Vec<NodeSnapshot>,
}

impl StatsSnapshot {
    pub(crate) fn from_node_stats(
        phase: SamplePhase,
        elapsed: Duration,
        iterations: u64,
        stats: Vec<(Arc<str>, NodeStats)>,
    ) -> Self {
        let mut nodes: Vec<NodeSnapshot> = stats
            .into_iter()
            .map(|(name, stats)| NodeSnapshot {
                name: name.to_string(),
                kind: stats.kind,
                count: stats.count,
                errors: stats.errors,
                latency: stats.latency.summary(),
            })
            .collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name));

        Self {
            timestamp: Utc::now(),
            phase,
            elapsed,
            iterations,
            nodes,
        }
    }

    pub fn node(&self, name: &str) -> Option<&NodeSnapshot> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn total_count(&self) -> u64 {
        self.nodes.iter().map(|n| n.count).sum()
    }

    pub fn total_errors(&self) -> u64 {
        self.nodes.iter().map(|n| n.errors).sum()
    }

    /// Node executions per second over the elapsed time
    pub fn ops_per_sec(&self) -> f64 {
        crate::util::time::calculate_rate(self.total_count(), self.elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::Outcome;

    fn stats(kind: &'static str, ok: u64, failed: u64) -> NodeStats {
        let mut s = NodeStats::new(kind);
        for _ in 0..ok {
            s.record(&Outcome::Success, Duration::from_micros(10));
        }
        for _ in 0..failed {
            s.record(&Outcome::failure("x"), Duration::from_micros(10));
        }
        s
    }

    #[test]
    fn test_nodes_sorted_and_totals() {
        let snapshot = StatsSnapshot::from_node_stats(
            SamplePhase::Final,
            Duration::from_secs(2),
            7,
            vec![
                (Arc::from("zeta"), stats("find", 3, 1)),
                (Arc::from("alpha"), stats("insert", 5, 0)),
            ],
        );

        assert_eq!(snapshot.nodes[0].name, "alpha");
        assert_eq!(snapshot.nodes[1].name, "zeta");
        assert_eq!(snapshot.total_count(), 9);
        assert_eq!(snapshot.total_errors(), 1);
        assert_eq!(snapshot.iterations, 7);
        assert!((snapshot.ops_per_sec() - 4.5).abs() < 1e-9);
        assert_eq!(snapshot.phase.as_str(), "final");
    }

    #[test]
    fn test_empty_snapshot_rate() {
        let snapshot =
            StatsSnapshot::from_node_stats(SamplePhase::Interval, Duration::ZERO, 0, vec![]);
        assert_eq!(snapshot.ops_per_sec(), 0.0);
        assert!(snapshot.node("missing").is_none());
    }
}
