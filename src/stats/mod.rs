//! Statistics collection
//!
//! Two levels of accumulation:
//!
//! - **`LocalStats`**: owned by one worker, no synchronisation. Every node
//!   execution lands here first.
//! - **`StatsCollector`**: the single shared-mutable structure of a run. Workers
//!   fold their local accumulators into it periodically, and the sampler reads
//!   consistent snapshots out of it.
//!
//! The collector keeps two tallies side by side: run totals since the last
//! `reset`, read with `snapshot`, and the current period's tally, read and
//! cleared with `snapshot_and_reset`.
//!
//! The collector lock is only held to merge counters or to clone them; summary
//! statistics (percentiles) are computed on the clone, outside the lock.
//!
//! # Example
//!
//! ```
//! use loadgraph::stats::StatsCollector;
//! use loadgraph::operation::Outcome;
//! use std::time::Duration;
//!
//! let collector = StatsCollector::new();
//! collector.record_sample("insert_one", "insert", &Outcome::Success, Duration::from_micros(120));
//! let failed = Outcome::failure("duplicate key");
//! collector.record_sample("insert_one", "insert", &failed, Duration::from_micros(90));
//!
//! let snapshot = collector.snapshot();
//! assert_eq!(snapshot.total_count(), 2);
//! assert_eq!(snapshot.total_errors(), 1);
//! ```

pub mod histogram;
pub mod sampler;
pub mod snapshot;

pub use histogram::{LatencyHistogram, LatencySummary};
pub use sampler::{SamplerHandle, SnapshotSink, StatsSampler};
pub use snapshot::{NodeSnapshot, SamplePhase, StatsSnapshot};

use crate::operation::Outcome;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::warn;

/// Samples accumulated locally before a worker flushes to the collector
pub const FLUSH_SAMPLE_THRESHOLD: u64 = 256;

/// Longest a worker holds samples locally before flushing
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(100);

/// Cache-line aligned atomic counter to prevent false sharing
///
/// ```text
/// [value: 8 bytes][padding: 56 bytes] = 64 bytes total
/// ```
#[repr(align(64))]
#[derive(Debug)]
pub struct AlignedCounter {
    value: AtomicU64,
    _padding: [u8; 56],
}

impl AlignedCounter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
            _padding: [0; 56],
        }
    }

    #[inline]
    pub fn add(&self, val: u64) {
        self.value.fetch_add(val, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set(&self, val: u64) {
        self.value.store(val, Ordering::Relaxed);
    }

    /// Read and zero in one step
    #[inline]
    pub fn take(&self) -> u64 {
        self.value.swap(0, Ordering::Relaxed)
    }
}

impl Default for AlignedCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters and latency distribution for one node
#[derive(Debug, Clone)]
pub struct NodeStats {
    /// Operation or structural kind label ("insert", "loop", ...)
    pub kind: &'static str,
    /// Executions, successful or not
    pub count: u64,
    /// Executions that ended in `Outcome::Failure`
    pub errors: u64,
    pub latency: LatencyHistogram,
}

impl NodeStats {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            count: 0,
            errors: 0,
            latency: LatencyHistogram::new(),
        }
    }

    #[inline]
    pub fn record(&mut self, outcome: &Outcome, duration: Duration) {
        self.count += 1;
        if outcome.is_failure() {
            self.errors += 1;
        }
        self.latency.record(duration);
    }

    pub fn merge(&mut self, other: &NodeStats) {
        self.count += other.count;
        self.errors += other.errors;
        if let Err(e) = self.latency.merge(&other.latency) {
            warn!("Dropping latency samples during merge: {}", e);
        }
    }

    pub fn reset(&mut self) {
        self.count = 0;
        self.errors = 0;
        self.latency.reset();
    }
}

/// Per-worker accumulator
///
/// Keyed by the node's statistics key. Entries survive a flush (they are reset,
/// not removed) so steady-state recording does not allocate.
#[derive(Debug)]
pub struct LocalStats {
    nodes: HashMap<Arc<str>, NodeStats>,
    pending: u64,
    last_flush: Instant,
    flush_interval: Duration,
}

impl LocalStats {
    pub fn new() -> Self {
        Self::with_flush_interval(FLUSH_INTERVAL)
    }

    /// Accumulator that flushes after `interval` at the latest
    pub fn with_flush_interval(interval: Duration) -> Self {
        Self {
            nodes: HashMap::new(),
            pending: 0,
            last_flush: Instant::now(),
            flush_interval: interval,
        }
    }

    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    #[inline]
    pub fn record(
        &mut self,
        key: &Arc<str>,
        kind: &'static str,
        outcome: &Outcome,
        duration: Duration,
    ) {
        match self.nodes.get_mut(key) {
            Some(stats) => stats.record(outcome, duration),
            None => {
                let mut stats = NodeStats::new(kind);
                stats.record(outcome, duration);
                self.nodes.insert(Arc::clone(key), stats);
            }
        }
        self.pending += 1;
    }

    /// True once enough samples or enough time have accumulated
    #[inline]
    pub fn should_flush(&self) -> bool {
        self.pending >= FLUSH_SAMPLE_THRESHOLD
            || (self.pending > 0 && self.last_flush.elapsed() >= self.flush_interval)
    }

    /// Samples recorded since the last flush
    pub fn pending(&self) -> u64 {
        self.pending
    }

    pub fn is_empty(&self) -> bool {
        self.pending == 0
    }

    fn mark_flushed(&mut self) {
        for stats in self.nodes.values_mut() {
            stats.reset();
        }
        self.pending = 0;
        self.last_flush = Instant::now();
    }
}

impl Default for LocalStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Flush interval for workers sampled every `period`
///
/// Workers flush at least four times per period so an interval sample does not
/// miss work still held locally. A zero period leaves the default.
pub fn flush_interval_for(period: Duration) -> Duration {
    if period.is_zero() {
        FLUSH_INTERVAL
    } else {
        FLUSH_INTERVAL.min(period / 4)
    }
}

#[derive(Debug)]
struct Tallies {
    /// Since the last `reset`
    total: HashMap<Arc<str>, NodeStats>,
    /// Since the last `snapshot_and_reset`
    period: HashMap<Arc<str>, NodeStats>,
    started: Instant,
    period_started: Instant,
}

impl Tallies {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            total: HashMap::new(),
            period: HashMap::new(),
            started: now,
            period_started: now,
        }
    }
}

fn record_into(
    nodes: &mut HashMap<Arc<str>, NodeStats>,
    key: &str,
    kind: &'static str,
    outcome: &Outcome,
    duration: Duration,
) {
    match nodes.get_mut(key) {
        Some(stats) => stats.record(outcome, duration),
        None => {
            let mut stats = NodeStats::new(kind);
            stats.record(outcome, duration);
            nodes.insert(Arc::from(key), stats);
        }
    }
}

fn merge_into(nodes: &mut HashMap<Arc<str>, NodeStats>, key: &Arc<str>, stats: &NodeStats) {
    match nodes.get_mut(key) {
        Some(existing) => existing.merge(stats),
        None => {
            nodes.insert(Arc::clone(key), stats.clone());
        }
    }
}

/// Thread-safe run-wide aggregator
#[derive(Debug)]
pub struct StatsCollector {
    tallies: Mutex<Tallies>,
    iterations: AlignedCounter,
    period_iterations: AlignedCounter,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            tallies: Mutex::new(Tallies::new()),
            iterations: AlignedCounter::new(),
            period_iterations: AlignedCounter::new(),
        }
    }

    /// Record a single sample directly
    ///
    /// Safe to call from any thread. Workers normally go through `LocalStats`
    /// and `merge` instead, which takes the lock once per batch.
    pub fn record_sample(
        &self,
        key: &str,
        kind: &'static str,
        outcome: &Outcome,
        duration: Duration,
    ) {
        let mut tallies = self.tallies.lock().unwrap_or_else(PoisonError::into_inner);
        record_into(&mut tallies.total, key, kind, outcome, duration);
        record_into(&mut tallies.period, key, kind, outcome, duration);
    }

    /// Fold a worker's local accumulator in and reset it
    pub fn merge(&self, local: &mut LocalStats) {
        if local.is_empty() {
            return;
        }
        {
            let mut tallies = self.tallies.lock().unwrap_or_else(PoisonError::into_inner);
            for (key, stats) in local.nodes.iter().filter(|(_, s)| s.count > 0) {
                merge_into(&mut tallies.total, key, stats);
                merge_into(&mut tallies.period, key, stats);
            }
        }
        local.mark_flushed();
    }

    /// Count one completed top-level walk
    #[inline]
    pub fn record_iteration(&self) {
        self.iterations.add(1);
        self.period_iterations.add(1);
    }

    pub fn iterations(&self) -> u64 {
        self.iterations.get()
    }

    /// Clear all counters and restart both clocks
    pub fn reset(&self) {
        *self.tallies.lock().unwrap_or_else(PoisonError::into_inner) = Tallies::new();
        self.iterations.set(0);
        self.period_iterations.set(0);
    }

    /// Run totals, tagged as an interval sample
    pub fn snapshot(&self) -> StatsSnapshot {
        self.snapshot_as(SamplePhase::Interval)
    }

    /// Run totals with an explicit phase tag
    pub fn snapshot_as(&self, phase: SamplePhase) -> StatsSnapshot {
        let (elapsed, copied) = {
            let tallies = self.tallies.lock().unwrap_or_else(PoisonError::into_inner);
            let copied: Vec<(Arc<str>, NodeStats)> = tallies
                .total
                .iter()
                .map(|(k, v)| (Arc::clone(k), v.clone()))
                .collect();
            (tallies.started.elapsed(), copied)
        };
        StatsSnapshot::from_node_stats(phase, elapsed, self.iterations(), copied)
    }

    /// Counters accumulated since the previous call (or `reset`), then start a
    /// new period
    ///
    /// `elapsed` of the result is the length of that period. Nodes seen in
    /// earlier periods are reported with zero counts when idle.
    pub fn snapshot_and_reset(&self, phase: SamplePhase) -> StatsSnapshot {
        let (elapsed, copied, iterations) = {
            let mut tallies = self.tallies.lock().unwrap_or_else(PoisonError::into_inner);
            let now = Instant::now();
            let elapsed = now.duration_since(tallies.period_started);
            tallies.period_started = now;
            let copied: Vec<(Arc<str>, NodeStats)> = tallies
                .period
                .iter_mut()
                .map(|(k, v)| {
                    let copy = (Arc::clone(k), v.clone());
                    v.reset();
                    copy
                })
                .collect();
            (elapsed, copied, self.period_iterations.take())
        };
        StatsSnapshot::from_node_stats(phase, elapsed, iterations, copied)
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}
