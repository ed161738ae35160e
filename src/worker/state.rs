//! Per-worker execution context

use crate::backend::{Backend, Namespace};
use crate::config::workload::FailureAction;
use crate::graph::Node;
use crate::operation::{Execution, Outcome, Variables};
use crate::stats::{LocalStats, StatsCollector, FLUSH_INTERVAL};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Worker lifecycle
///
/// `Running` moves to exactly one stopping state, which names why the worker
/// stopped, and then to `Terminated` once local stats are flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    /// The run-length bound elapsed
    StoppingByTime,
    /// The iteration bound was reached
    StoppingByCount,
    /// A walk finished and the walk is not restarted
    StoppingByCompletion,
    /// A node with the `terminate` failure policy failed
    StoppingByFailure,
    Terminated,
}

impl WorkerState {
    pub fn is_stopping(&self) -> bool {
        matches!(
            self,
            WorkerState::StoppingByTime
                | WorkerState::StoppingByCount
                | WorkerState::StoppingByCompletion
                | WorkerState::StoppingByFailure
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Running => "running",
            WorkerState::StoppingByTime => "time bound",
            WorkerState::StoppingByCount => "iteration bound",
            WorkerState::StoppingByCompletion => "walk completed",
            WorkerState::StoppingByFailure => "failure",
            WorkerState::Terminated => "terminated",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run-wide settings and shared resources, read-only for workers
pub struct RunContext {
    backend: Arc<dyn Backend>,
    collector: Arc<StatsCollector>,
    namespace: Namespace,
    deadline: Option<Instant>,
    max_iterations: Option<u64>,
    on_failure: FailureAction,
    restart: bool,
    flush_interval: Duration,
}

impl RunContext {
    /// Unbounded run that does not restart walks
    pub fn new(
        backend: Arc<dyn Backend>,
        collector: Arc<StatsCollector>,
        namespace: Namespace,
    ) -> Self {
        Self {
            backend,
            collector,
            namespace,
            deadline: None,
            max_iterations: None,
            on_failure: FailureAction::default(),
            restart: false,
            flush_interval: FLUSH_INTERVAL,
        }
    }

    /// Stop workers this long from now
    pub fn with_run_length(mut self, run_length: Option<Duration>) -> Self {
        self.deadline = run_length.map(|d| Instant::now() + d);
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: Option<u64>) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Default for nodes without their own policy
    pub fn with_failure_action(mut self, action: FailureAction) -> Self {
        self.on_failure = action;
        self
    }

    pub fn with_restart(mut self, restart: bool) -> Self {
        self.restart = restart;
        self
    }

    /// Longest a worker holds samples before flushing them to the collector
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    pub fn collector(&self) -> &Arc<StatsCollector> {
        &self.collector
    }

    pub fn on_failure(&self) -> FailureAction {
        self.on_failure
    }

    pub fn restarts(&self) -> bool {
        self.restart
    }
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("backend", &self.backend.name())
            .field("namespace", &self.namespace)
            .field("deadline", &self.deadline)
            .field("max_iterations", &self.max_iterations)
            .field("on_failure", &self.on_failure)
            .field("restart", &self.restart)
            .field("flush_interval", &self.flush_interval)
            .finish()
    }
}

/// Mutable context owned by exactly one worker (or one forked branch)
#[derive(Debug)]
pub struct ThreadState {
    id: usize,
    run: Arc<RunContext>,
    rng: Xoshiro256PlusPlus,
    variables: Variables,
    stats: LocalStats,
    state: WorkerState,
    iterations: u64,
    aborted_walks: u64,
}

impl ThreadState {
    pub fn new(
        id: usize,
        run: Arc<RunContext>,
        rng: Xoshiro256PlusPlus,
        initial: &BTreeMap<String, Value>,
    ) -> Self {
        let stats = LocalStats::with_flush_interval(run.flush_interval);
        Self {
            id,
            run,
            rng,
            variables: Variables::from_initial(initial),
            stats,
            state: WorkerState::Running,
            iterations: 0,
            aborted_walks: 0,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == WorkerState::Running
    }

    pub fn is_stopping(&self) -> bool {
        self.state.is_stopping()
    }

    /// Completed top-level walks
    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Top-level walks abandoned by a `restart` failure policy
    pub fn aborted_walks(&self) -> u64 {
        self.aborted_walks
    }

    pub fn run(&self) -> &RunContext {
        &self.run
    }

    pub fn backend(&self) -> &dyn Backend {
        self.run.backend.as_ref()
    }

    /// Namespace for backend calls that do not name their own
    pub fn namespace(&self) -> &Namespace {
        &self.run.namespace
    }

    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    pub fn variables_mut(&mut self) -> &mut Variables {
        &mut self.variables
    }

    pub fn rng(&mut self) -> &mut Xoshiro256PlusPlus {
        &mut self.rng
    }

    /// Split borrow for operations that need both
    pub fn variables_and_rng(&mut self) -> (&mut Variables, &mut Xoshiro256PlusPlus) {
        (&mut self.variables, &mut self.rng)
    }

    /// Run `f` with a fresh variable scope seeded from `initial`
    ///
    /// The caller's variables are restored afterwards; RNG and statistics are
    /// shared with the caller.
    pub fn with_scope<T>(
        &mut self,
        initial: &BTreeMap<String, Value>,
        f: impl FnOnce(&mut Self) -> T,
    ) -> T {
        let saved = std::mem::replace(&mut self.variables, Variables::from_initial(initial));
        let result = f(self);
        self.variables = saved;
        result
    }

    /// Independent state for a fork branch
    ///
    /// Gets its own RNG stream (seeded from this one), a copy of the current
    /// variables and an empty local accumulator.
    pub fn fork(&mut self) -> ThreadState {
        let seed: u64 = self.rng.gen();
        ThreadState {
            id: self.id,
            run: Arc::clone(&self.run),
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
            variables: self.variables.clone(),
            stats: LocalStats::with_flush_interval(self.run.flush_interval),
            state: WorkerState::Running,
            iterations: 0,
            aborted_walks: 0,
        }
    }

    /// Record one node execution
    #[inline]
    pub fn record(&mut self, node: &Node, execution: &Execution) {
        if let Outcome::Failure(reason) = &execution.outcome {
            trace!(worker = self.id, node = node.name(), "Operation failed: {}", reason);
        }
        self.stats
            .record(node.stat_key(), node.kind().label(), &execution.outcome, execution.duration);
        if self.stats.should_flush() {
            self.flush();
        }
    }

    /// Fold local statistics into the shared collector
    pub fn flush(&mut self) {
        self.run.collector.merge(&mut self.stats);
    }

    /// Move from `Running` to a stopping state; the first reason wins
    pub fn request_stop(&mut self, reason: WorkerState) {
        if self.state == WorkerState::Running && reason.is_stopping() {
            debug!(worker = self.id, reason = reason.as_str(), "Worker stopping");
            self.state = reason;
        }
    }

    /// Enter `StoppingByTime` once the run-length bound has elapsed
    #[inline]
    pub fn check_deadline(&mut self) {
        if let Some(deadline) = self.run.deadline {
            if Instant::now() >= deadline {
                self.request_stop(WorkerState::StoppingByTime);
            }
        }
    }

    /// Account for a finished top-level walk and apply the iteration bound
    /// and restart policy
    pub fn complete_walk(&mut self, aborted: bool) {
        self.iterations += 1;
        if aborted {
            self.aborted_walks += 1;
        }
        self.run.collector.record_iteration();

        if let Some(max) = self.run.max_iterations {
            if self.iterations >= max {
                self.request_stop(WorkerState::StoppingByCount);
                return;
            }
        }
        if !self.run.restart {
            self.request_stop(WorkerState::StoppingByCompletion);
        }
    }

    /// Flush and enter `Terminated`
    pub fn terminate(&mut self) {
        self.flush();
        self.state = WorkerState::Terminated;
    }
}
