//! Periodic statistics sampling
//!
//! The sampler runs on its own thread and wakes on absolute ticks
//! (`start + k * period`) so a slow sink does not make the schedule drift.
//! Stopping is signalled through a channel: dropping or sending on the
//! `SamplerHandle`'s sender wakes the thread immediately, even in the middle of
//! a period.
//!
//! Output for a run of length `T` and period `p`:
//!
//! - one `Interval` sample per completed period,
//! - one `Interval` sample for the partial period the stop landed in,
//! - one `Final` sample,
//!
//! giving `ceil(T / p) + 1` entries. A partial period shorter than
//! `MIN_PARTIAL_INTERVAL` is folded into the final sample instead.
//!
//! Interval samples cover only their own period; the collector's period tally
//! is cleared as each one is taken. The final sample carries the run totals.

use super::{SamplePhase, StatsCollector, StatsSnapshot};
use crate::output::text::summary_line;
use crate::Result;
use anyhow::Context;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Shortest trailing partial period that still gets its own interval sample
pub const MIN_PARTIAL_INTERVAL: Duration = Duration::from_millis(1);

/// Destination for snapshots taken by the sampler
pub trait SnapshotSink: Send {
    fn record(&mut self, snapshot: &StatsSnapshot);

    /// Called once after the final snapshot
    fn finish(&mut self) {}
}

impl<T: SnapshotSink> SnapshotSink for Option<T> {
    fn record(&mut self, snapshot: &StatsSnapshot) {
        if let Some(sink) = self {
            sink.record(snapshot);
        }
    }

    fn finish(&mut self) {
        if let Some(sink) = self {
            sink.finish();
        }
    }
}

impl SnapshotSink for Vec<StatsSnapshot> {
    fn record(&mut self, snapshot: &StatsSnapshot) {
        self.push(snapshot.clone());
    }
}

/// Background sampler configuration
#[derive(Debug, Clone)]
pub struct StatsSampler {
    collector: Arc<StatsCollector>,
    period: Duration,
}

impl StatsSampler {
    /// Create a sampler; a zero period disables periodic work
    pub fn new(collector: Arc<StatsCollector>, period: Duration) -> Self {
        Self { collector, period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Start sampling into `sink`
    ///
    /// With a zero period no thread is started and `stop` hands the sink back
    /// untouched.
    pub fn spawn<S: SnapshotSink + 'static>(self, sink: S) -> Result<SamplerHandle<S>> {
        let (done_tx, done_rx) = channel::bounded::<()>(1);

        if self.period.is_zero() {
            debug!("Periodic stats disabled");
            return Ok(SamplerHandle {
                done_tx,
                thread: None,
                idle_sink: Some(sink),
            });
        }

        let thread = thread::Builder::new()
            .name("stats-sampler".to_string())
            .spawn(move || self.run(done_rx, sink))
            .context("Failed to spawn stats sampler thread")?;

        Ok(SamplerHandle {
            done_tx,
            thread: Some(thread),
            idle_sink: None,
        })
    }

    fn run<S: SnapshotSink>(self, done: Receiver<()>, mut sink: S) -> S {
        let start = Instant::now();
        let mut ticks: u32 = 1;
        let mut next_tick = start + self.period;
        let mut last_sample = start;

        loop {
            match done.recv_deadline(next_tick) {
                Err(RecvTimeoutError::Timeout) => {
                    self.emit(SamplePhase::Interval, &mut sink);
                    last_sample = Instant::now();
                    // Skip ticks that already passed while the sink was busy
                    while next_tick <= last_sample {
                        ticks += 1;
                        next_tick = start + self.period * ticks;
                    }
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    if last_sample.elapsed() >= MIN_PARTIAL_INTERVAL {
                        self.emit(SamplePhase::Interval, &mut sink);
                    }
                    self.emit(SamplePhase::Final, &mut sink);
                    break;
                }
            }
        }

        sink.finish();
        sink
    }

    fn emit<S: SnapshotSink>(&self, phase: SamplePhase, sink: &mut S) {
        let started = Instant::now();
        let snapshot = match phase {
            SamplePhase::Interval => self.collector.snapshot_and_reset(phase),
            SamplePhase::Final => self.collector.snapshot_as(phase),
        };
        info!("{}", summary_line(&snapshot));
        sink.record(&snapshot);
        debug!("Periodic stats collection took {} us", started.elapsed().as_micros());
    }
}

/// Running sampler; `stop` signals it and waits for the closing sample
#[derive(Debug)]
pub struct SamplerHandle<S> {
    done_tx: Sender<()>,
    thread: Option<JoinHandle<S>>,
    idle_sink: Option<S>,
}

impl<S> SamplerHandle<S> {
    /// True when a sampling thread was started
    pub fn is_active(&self) -> bool {
        self.thread.is_some()
    }

    /// Signal the sampler, wait for it to write its final sample and return the sink
    pub fn stop(mut self) -> Result<S> {
        let _ = self.done_tx.try_send(());
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| anyhow::anyhow!("Stats sampler thread panicked")),
            None => self
                .idle_sink
                .take()
                .ok_or_else(|| anyhow::anyhow!("Stats sampler already stopped")),
        }
    }
}
