//! JSON output formatting
//!
//! Snapshots render as self-describing objects: durations carry both a
//! machine value (microseconds) and a human string. With periodic sampling the
//! results file is a JSON array written incrementally by `JsonArrayWriter`;
//! without it a single object is written once the run is over.

use crate::stats::{LatencySummary, SnapshotSink, StatsSnapshot};
use crate::util::time::format_duration;
use crate::Result;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error};

/// Duration with both microseconds and human-readable format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonDuration {
    pub micros: u64,
    pub human: String,
}

impl JsonDuration {
    pub fn from_duration(d: Duration) -> Self {
        Self {
            micros: d.as_micros() as u64,
            human: format_duration(d),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonLatency {
    pub min: JsonDuration,
    pub mean: JsonDuration,
    pub max: JsonDuration,
    pub p50: JsonDuration,
    pub p95: JsonDuration,
    pub p99: JsonDuration,
}

impl From<&LatencySummary> for JsonLatency {
    fn from(summary: &LatencySummary) -> Self {
        Self {
            min: JsonDuration::from_duration(summary.min),
            mean: JsonDuration::from_duration(summary.mean),
            max: JsonDuration::from_duration(summary.max),
            p50: JsonDuration::from_duration(summary.p50),
            p95: JsonDuration::from_duration(summary.p95),
            p99: JsonDuration::from_duration(summary.p99),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonTotals {
    pub count: u64,
    pub errors: u64,
    pub ops_per_sec: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonNodeStats {
    pub name: String,
    pub kind: String,
    pub count: u64,
    pub errors: u64,
    pub latency: JsonLatency,
}

/// One results entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonSnapshot {
    /// RFC 3339, UTC
    pub timestamp: String,
    pub phase: String,
    pub elapsed: JsonDuration,
    pub iterations: u64,
    pub totals: JsonTotals,
    pub nodes: Vec<JsonNodeStats>,
}

impl From<&StatsSnapshot> for JsonSnapshot {
    fn from(snapshot: &StatsSnapshot) -> Self {
        Self {
            timestamp: snapshot.timestamp.to_rfc3339(),
            phase: snapshot.phase.as_str().to_string(),
            elapsed: JsonDuration::from_duration(snapshot.elapsed),
            iterations: snapshot.iterations,
            totals: JsonTotals {
                count: snapshot.total_count(),
                errors: snapshot.total_errors(),
                ops_per_sec: snapshot.ops_per_sec(),
            },
            nodes: snapshot
                .nodes
                .iter()
                .map(|node| JsonNodeStats {
                    name: node.name.clone(),
                    kind: node.kind.to_string(),
                    count: node.count,
                    errors: node.errors,
                    latency: JsonLatency::from(&node.latency),
                })
                .collect(),
        }
    }
}

/// Streams snapshots into a JSON array
///
/// The opening bracket is written on creation, so an interrupted run still
/// leaves a recognisable prefix. After the first write error the writer logs
/// it and drops every further entry; losing results never stops the run.
pub struct JsonArrayWriter<W: Write + Send> {
    out: W,
    entries: usize,
    failed: bool,
}

impl JsonArrayWriter<BufWriter<File>> {
    /// Create (truncate) `path` and write the opening bracket
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create results file {}", path.display()))?;
        Self::new(BufWriter::new(file))
    }
}

impl<W: Write + Send> JsonArrayWriter<W> {
    pub fn new(mut out: W) -> Result<Self> {
        out.write_all(b"[\n")
            .and_then(|_| out.flush())
            .context("Failed to start results array")?;
        Ok(Self {
            out,
            entries: 0,
            failed: false,
        })
    }

    pub fn entries(&self) -> usize {
        self.entries
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_entry(&mut self, snapshot: &StatsSnapshot) -> std::io::Result<()> {
        if self.entries > 0 {
            self.out.write_all(b",\n")?;
        }
        serde_json::to_writer_pretty(&mut self.out, &JsonSnapshot::from(snapshot))?;
        self.out.flush()
    }

    fn fail(&mut self, err: std::io::Error) {
        error!("Failed to write results: {}; further samples are dropped", err);
        self.failed = true;
    }
}

impl<W: Write + Send> SnapshotSink for JsonArrayWriter<W> {
    fn record(&mut self, snapshot: &StatsSnapshot) {
        if self.failed {
            return;
        }
        match self.write_entry(snapshot) {
            Ok(()) => self.entries += 1,
            Err(err) => self.fail(err),
        }
    }

    fn finish(&mut self) {
        if self.failed {
            return;
        }
        match self.out.write_all(b"\n]\n").and_then(|_| self.out.flush()) {
            Ok(()) => debug!(entries = self.entries, "Closed results array"),
            Err(err) => self.fail(err),
        }
    }
}

/// Write a single snapshot object to `path`
pub fn write_snapshot_file(path: &Path, snapshot: &StatsSnapshot) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create results file {}", path.display()))?;
    let mut out = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut out, &JsonSnapshot::from(snapshot))
        .context("Failed to serialize results")?;
    out.write_all(b"\n")
        .and_then(|_| out.flush())
        .with_context(|| format!("Failed to write results file {}", path.display()))?;
    Ok(())
}
