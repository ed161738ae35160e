//! Workload orchestration
//!
//! A `Workload` owns the immutable graph and the shared statistics collector.
//! `execute` runs it once for a resolved `WorkloadExecutionState`:
//!
//! 1. validate the configuration and connect the backend,
//! 2. open the results file and start the stats sampler,
//! 3. spawn one named thread per worker, each with its own RNG stream,
//! 4. join every worker, stop the sampler (which writes the closing sample)
//!    and assemble a `RunReport`.
//!
//! Nothing is spawned when validation fails. A results file that cannot be
//! written is logged and the run goes on.

use crate::backend::{self, Backend};
use crate::config::validator::validate_execution_state;
use crate::config::WorkloadExecutionState;
use crate::description::DescriptionSet;
use crate::error::ExportError;
use crate::graph::builder::GraphBuilder;
use crate::graph::dot;
use crate::graph::Graph;
use crate::output::json::{write_snapshot_file, JsonArrayWriter};
use crate::stats::{flush_interval_for, SamplePhase, StatsCollector, StatsSampler, StatsSnapshot};
use crate::worker::{RunContext, Worker, WorkerReport, WorkerSeeds};
use crate::Result;
use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Outcome of one `Workload::execute`
#[derive(Debug, Clone)]
pub struct RunReport {
    pub workload: String,
    /// Wall time from the first spawned worker to the closing sample
    pub elapsed: Duration,
    /// Closing snapshot, taken after every worker flushed
    pub snapshot: StatsSnapshot,
    /// One entry per worker that ran to completion, ordered by id
    pub workers: Vec<WorkerReport>,
}

impl RunReport {
    /// Completed top-level walks across all workers
    pub fn total_iterations(&self) -> u64 {
        self.workers.iter().map(|w| w.iterations).sum()
    }
}

/// A runnable workload graph plus its statistics
pub struct Workload {
    graph: Arc<Graph>,
    collector: Arc<StatsCollector>,
    defaults: WorkloadExecutionState,
    backend: Option<Arc<dyn Backend>>,
}

impl Workload {
    /// Build workload `name` from a description set
    ///
    /// Run settings embedded in the description become the defaults of
    /// `new_execution_state`.
    pub fn from_description(set: &DescriptionSet, name: &str) -> Result<Self> {
        let description = set.get(name)?;
        let graph = GraphBuilder::new(set)
            .build(name, description)
            .with_context(|| format!("Invalid workload `{}`", name))?;
        let mut workload = Self::new(graph);
        workload.defaults = WorkloadExecutionState::from_description(description);
        Ok(workload)
    }

    pub fn new(graph: Graph) -> Self {
        Self {
            graph: Arc::new(graph),
            collector: Arc::new(StatsCollector::new()),
            defaults: WorkloadExecutionState::default(),
            backend: None,
        }
    }

    /// Run against `backend` instead of connecting to the configured uri
    pub fn with_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn name(&self) -> &str {
        self.graph.name()
    }

    /// Execution state seeded with this workload's defaults
    pub fn new_execution_state(&self) -> WorkloadExecutionState {
        self.defaults.clone()
    }

    pub fn stats(&self) -> &Arc<StatsCollector> {
        &self.collector
    }

    pub fn generate_graph_description(&self) -> std::result::Result<String, ExportError> {
        dot::generate_graph_description(&self.graph)
    }

    pub fn write_graph_description(&self, path: &Path) -> std::result::Result<(), ExportError> {
        dot::write_graph_description(&self.graph, path)
    }

    /// Run the workload to completion
    pub fn execute(&self, state: &WorkloadExecutionState) -> Result<RunReport> {
        validate_execution_state(state).context("Configuration validation failed")?;
        let backend = match &self.backend {
            Some(backend) => Arc::clone(backend),
            None => backend::connect(&state.uri).context("Failed to connect backend")?,
        };

        info!("Running workload `{}`: {}", self.name(), state);
        self.collector.reset();

        let sink = if state.results.period.is_zero() {
            None
        } else {
            match JsonArrayWriter::create(&state.results.path) {
                Ok(writer) => Some(writer),
                Err(err) => {
                    error!("{:#}; continuing without periodic results", err);
                    None
                }
            }
        };
        let sampler =
            StatsSampler::new(Arc::clone(&self.collector), state.results.period).spawn(sink)?;

        let started = Instant::now();
        let run = Arc::new(
            RunContext::new(backend, Arc::clone(&self.collector), state.namespace())
                .with_run_length(state.run_length)
                .with_max_iterations(state.max_iterations)
                .with_failure_action(state.on_failure)
                .with_restart(state.restarts())
                .with_flush_interval(flush_interval_for(state.results.period)),
        );
        debug!(?run, "Run context ready");

        let mut handles = Vec::with_capacity(state.num_parallel_threads);
        let seeds = WorkerSeeds::new(state.seed);
        for (id, rng) in seeds.take(state.num_parallel_threads).enumerate() {
            let worker = Worker::new(id, Arc::clone(&self.graph), Arc::clone(&run), rng);
            match thread::Builder::new()
                .name(format!("worker-{}", id))
                .spawn(move || worker.run())
            {
                Ok(handle) => handles.push(handle),
                Err(err) => error!(worker = id, "Failed to spawn worker thread: {}", err),
            }
        }
        if handles.len() < state.num_parallel_threads {
            warn!(
                "Only {} of {} workers started",
                handles.len(),
                state.num_parallel_threads
            );
        }

        let mut workers = Vec::with_capacity(handles.len());
        let mut panicked = 0usize;
        for handle in handles {
            match handle.join() {
                Ok(report) => workers.push(report),
                Err(_) => {
                    error!("Worker thread panicked");
                    panicked += 1;
                }
            }
        }

        if let Err(err) = sampler.stop() {
            error!("{:#}", err);
        }
        let snapshot = self.collector.snapshot_as(SamplePhase::Final);
        let elapsed = started.elapsed();

        if state.results.period.is_zero() {
            if let Err(err) = write_snapshot_file(&state.results.path, &snapshot) {
                error!("{:#}", err);
            }
        }

        if panicked > 0 {
            anyhow::bail!("{} worker thread(s) panicked", panicked);
        }
        if workers.is_empty() {
            anyhow::bail!("No worker thread could be started");
        }

        info!(
            walks = snapshot.iterations,
            ops = snapshot.total_count(),
            errors = snapshot.total_errors(),
            "Workload `{}` finished in {:.3}s",
            self.name(),
            elapsed.as_secs_f64()
        );
        Ok(RunReport {
            workload: self.name().to_string(),
            elapsed,
            snapshot,
            workers,
        })
    }
}
