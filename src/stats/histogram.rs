//! Latency histogram using HdrHistogram
//!
//! Every node gets one of these in each worker's local accumulator and one in
//! the shared collector, so the histogram is sized for memory rather than for
//! maximum precision: 2 significant digits (values within 1%) over a range of
//! 1ns to 1 hour keeps each instance at a few tens of kilobytes.
//!
//! # Example
//!
//! ```
//! use loadgraph::stats::histogram::LatencyHistogram;
//! use std::time::Duration;
//!
//! let mut hist = LatencyHistogram::new();
//! hist.record(Duration::from_micros(100));
//! hist.record(Duration::from_micros(150));
//!
//! let summary = hist.summary();
//! assert!(summary.max >= summary.min);
//! ```

use crate::Result;
use hdrhistogram::Histogram;
use serde::Serialize;
use std::time::Duration;

/// Largest trackable latency (1 hour in nanoseconds)
const MAX_TRACKABLE_NANOS: u64 = 3_600_000_000_000;

/// Significant digits kept per bucket
const SIGNIFICANT_DIGITS: u8 = 2;

/// Latency histogram wrapper
///
/// Records durations in nanoseconds. Out-of-range values are clamped to the
/// trackable range instead of being dropped.
#[derive(Debug, Clone)]
pub struct LatencyHistogram {
    histogram: Histogram<u64>,
}

impl LatencyHistogram {
    /// Create an empty histogram covering 1ns to 1 hour
    pub fn new() -> Self {
        let histogram = Histogram::new_with_bounds(1, MAX_TRACKABLE_NANOS, SIGNIFICANT_DIGITS)
            .expect("constant histogram bounds are valid");

        Self { histogram }
    }

    /// Record a latency sample
    #[inline]
    pub fn record(&mut self, latency: Duration) {
        let nanos = u64::try_from(latency.as_nanos()).unwrap_or(u64::MAX);
        let value = nanos.clamp(1, MAX_TRACKABLE_NANOS);
        let _ = self.histogram.record(value);
    }

    /// Get the value at a specific percentile (0.0 - 100.0)
    ///
    /// Returns None if the histogram is empty.
    pub fn percentile(&self, percentile: f64) -> Option<Duration> {
        if self.is_empty() {
            return None;
        }
        Some(Duration::from_nanos(self.histogram.value_at_percentile(percentile)))
    }

    pub fn min(&self) -> Option<Duration> {
        if self.is_empty() {
            return None;
        }
        Some(Duration::from_nanos(self.histogram.min()))
    }

    pub fn max(&self) -> Option<Duration> {
        if self.is_empty() {
            return None;
        }
        Some(Duration::from_nanos(self.histogram.max()))
    }

    pub fn mean(&self) -> Option<Duration> {
        if self.is_empty() {
            return None;
        }
        Some(Duration::from_nanos(self.histogram.mean() as u64))
    }

    /// Number of samples recorded
    pub fn len(&self) -> u64 {
        self.histogram.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histogram.len() == 0
    }

    /// Merge another histogram into this one
    ///
    /// Used when a worker flushes its local accumulator into the collector.
    ///
    /// # Errors
    ///
    /// Returns an error if the histograms have incompatible configurations.
    pub fn merge(&mut self, other: &LatencyHistogram) -> Result<()> {
        self.histogram
            .add(&other.histogram)
            .map_err(|e| anyhow::anyhow!("Failed to merge histograms: {}", e))?;
        Ok(())
    }

    /// Clear all recorded samples, keeping the allocation
    pub fn reset(&mut self) {
        self.histogram.reset();
    }

    /// Compute the fixed set of summary statistics reported per node
    ///
    /// An empty histogram summarises to all-zero durations.
    pub fn summary(&self) -> LatencySummary {
        if self.is_empty() {
            return LatencySummary::default();
        }
        LatencySummary {
            min: self.min().unwrap_or_default(),
            mean: self.mean().unwrap_or_default(),
            max: self.max().unwrap_or_default(),
            p50: self.percentile(50.0).unwrap_or_default(),
            p95: self.percentile(95.0).unwrap_or_default(),
            p99: self.percentile(99.0).unwrap_or_default(),
        }
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Latency figures carried in a snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LatencySummary {
    pub min: Duration,
    pub mean: Duration,
    pub max: Duration,
    pub p50: Duration,
    pub p95: Duration,
    pub p99: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_histogram() {
        let hist = LatencyHistogram::new();
        assert_eq!(hist.len(), 0);
        assert!(hist.is_empty());
        assert!(hist.min().is_none());
        assert!(hist.percentile(50.0).is_none());
    }

    #[test]
    fn test_percentile() {
        let mut hist = LatencyHistogram::new();
        for i in 1..=100 {
            hist.record(Duration::from_micros(i * 10));
        }

        let p50 = hist.percentile(50.0).unwrap();
        let p99 = hist.percentile(99.0).unwrap();

        assert!(p50.as_micros() >= 450 && p50.as_micros() <= 550);
        assert!(p99.as_micros() >= 940 && p99.as_micros() <= 1040);
    }

    #[test]
    fn test_min_max_mean() {
        let mut hist = LatencyHistogram::new();
        hist.record(Duration::from_micros(100));
        hist.record(Duration::from_micros(500));
        hist.record(Duration::from_micros(300));

        let min = hist.min().unwrap();
        let max = hist.max().unwrap();
        let mean = hist.mean().unwrap();

        assert!(min.as_micros() >= 98 && min.as_micros() <= 102);
        assert!(max.as_micros() >= 495 && max.as_micros() <= 505);
        assert!(mean.as_micros() >= 290 && mean.as_micros() <= 310);
    }

    #[test]
    fn test_merge() {
        let mut hist1 = LatencyHistogram::new();
        hist1.record(Duration::from_micros(100));
        hist1.record(Duration::from_micros(200));

        let mut hist2 = LatencyHistogram::new();
        hist2.record(Duration::from_micros(300));
        hist2.record(Duration::from_micros(400));

        hist1.merge(&hist2).unwrap();

        assert_eq!(hist1.len(), 4);
        let mean = hist1.mean().unwrap();
        assert!(mean.as_micros() >= 240 && mean.as_micros() <= 260);
    }

    #[test]
    fn test_reset() {
        let mut hist = LatencyHistogram::new();
        hist.record(Duration::from_micros(100));
        hist.reset();

        assert!(hist.is_empty());
    }

    #[test]
    fn test_zero_duration_is_recorded() {
        let mut hist = LatencyHistogram::new();
        hist.record(Duration::ZERO);

        assert_eq!(hist.len(), 1);
        assert_eq!(hist.min().unwrap(), Duration::from_nanos(1));
    }

    #[test]
    fn test_overlong_duration_is_clamped() {
        let mut hist = LatencyHistogram::new();
        hist.record(Duration::from_secs(7200));

        assert_eq!(hist.len(), 1);
        let max = hist.max().unwrap();
        assert!(max.as_secs() >= 3500 && max.as_secs() <= 3700);
    }

    #[test]
    fn test_summary() {
        let mut hist = LatencyHistogram::new();
        assert_eq!(hist.summary(), LatencySummary::default());

        for i in 1..=1000 {
            hist.record(Duration::from_micros(i));
        }
        let summary = hist.summary();
        assert!(summary.min <= summary.p50);
        assert!(summary.p50 <= summary.p95);
        assert!(summary.p95 <= summary.p99);
        assert!(summary.p99 <= summary.max);
        assert!(summary.p95.as_micros() >= 930 && summary.p95.as_micros() <= 970);
    }
}
