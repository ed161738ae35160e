//! Worker execution loop
//!
//! A worker repeatedly walks the workload graph from its entry node. Each step
//! executes the current node, records the sample in the worker's local
//! accumulator, checks the stop conditions and then moves on:
//!
//! - **operation** nodes select a weighted successor, or apply the failure
//!   policy when the operation failed,
//! - **branch** nodes route on their condition,
//! - **loop**, **fork** and sub-workload operations run nested walks; a nested
//!   walk that is abandoned turns into a failure of the enclosing node,
//! - **finish** nodes (and nodes without usable edges) end the walk.
//!
//! Stop conditions are cooperative: they are evaluated between node executions
//! and never interrupt one. The time bound is also checked inside nested walks;
//! the iteration bound counts top-level walks only.
//!
//! # Example
//!
//! ```
//! use loadgraph::backend::{mock::MockBackend, Namespace};
//! use loadgraph::description::DescriptionSet;
//! use loadgraph::graph::builder::GraphBuilder;
//! use loadgraph::stats::StatsCollector;
//! use loadgraph::worker::{RunContext, Worker, WorkerSeeds, WorkerState};
//! use std::sync::Arc;
//!
//! let set = DescriptionSet::from_yaml("main:\n  nodes:\n    - { name: a, op: { type: noop } }\n")?;
//! let graph = Arc::new(GraphBuilder::new(&set).build("main", set.get("main")?)?);
//! let collector = Arc::new(StatsCollector::new());
//! let run = Arc::new(
//!     RunContext::new(
//!         Arc::new(MockBackend::new()),
//!         collector.clone(),
//!         Namespace::new("test", "test"),
//!     )
//!     .with_max_iterations(Some(10))
//!     .with_restart(true),
//! );
//!
//! let rng = WorkerSeeds::new(Some(1)).next().unwrap();
//! let report = Worker::new(0, graph, run, rng).run();
//! assert_eq!(report.iterations, 10);
//! assert_eq!(report.stop_reason, WorkerState::StoppingByCount);
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod state;

pub use state::{RunContext, ThreadState, WorkerState};

use crate::config::workload::FailureAction;
use crate::graph::{FailureRoute, Graph, Node, NodeId, NodeKind};
use crate::operation::{Execution, Outcome};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde_json::Value;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info_span, warn};

/// How a walk ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkEnd {
    /// Reached a node with nowhere to go
    Completed,
    /// Abandoned by a `restart` failure policy
    Aborted,
    /// The worker entered a stopping state
    Stopped,
}

enum Step {
    Next(NodeId),
    End,
    Abort,
}

/// Walk `graph` from `start` until the walk ends or the worker stops
pub fn walk(graph: &Graph, start: NodeId, state: &mut ThreadState) -> WalkEnd {
    let mut current = start;
    loop {
        let node = graph.node(current);
        let (execution, step) = step(graph, node, state);
        state.record(node, &execution);
        state.check_deadline();
        if state.is_stopping() {
            return WalkEnd::Stopped;
        }
        match step {
            Step::Next(next) => current = next,
            Step::End => return WalkEnd::Completed,
            Step::Abort => return WalkEnd::Aborted,
        }
    }
}

fn step(graph: &Graph, node: &Node, state: &mut ThreadState) -> (Execution, Step) {
    match node.kind() {
        NodeKind::Operation(op) => {
            let execution = op.execute(state);
            let step = if execution.outcome.is_failure() {
                on_failure(node, state, |state| successor(node, state))
            } else {
                successor(node, state)
            };
            (execution, step)
        }
        NodeKind::Branch {
            condition,
            then,
            otherwise,
        } => {
            let mut route = None;
            let execution = Execution::measure(|| match condition.evaluate(state.variables()) {
                Ok(holds) => {
                    route = Some(if holds { *then } else { *otherwise });
                    Outcome::Success
                }
                Err(reason) => Outcome::Failure(reason),
            });
            let step = match route {
                Some(target) => Step::Next(target),
                None => on_failure(node, state, |_| Step::Next(*otherwise)),
            };
            (execution, step)
        }
        NodeKind::Loop { count, body, counter } => {
            let execution =
                Execution::measure(|| run_loop(graph, *count, *body, counter.as_deref(), state));
            finish_structural(node, state, execution)
        }
        NodeKind::Fork { branches } => {
            let execution = Execution::measure(|| run_fork(graph, branches, state));
            finish_structural(node, state, execution)
        }
        NodeKind::Finish => (Execution::measure(|| Outcome::Success), Step::End),
    }
}

fn finish_structural(
    node: &Node,
    state: &mut ThreadState,
    execution: Execution,
) -> (Execution, Step) {
    let step = if execution.outcome.is_failure() {
        on_failure(node, state, |state| successor(node, state))
    } else {
        successor(node, state)
    };
    (execution, step)
}

fn successor(node: &Node, state: &mut ThreadState) -> Step {
    match node.select_next(state.rng()) {
        Some(next) => Step::Next(next),
        None => Step::End,
    }
}

/// Apply the node's failure policy, falling back to the run default
fn on_failure(
    node: &Node,
    state: &mut ThreadState,
    proceed: impl FnOnce(&mut ThreadState) -> Step,
) -> Step {
    let route = node
        .on_failure()
        .unwrap_or_else(|| FailureRoute::Action(state.run().on_failure()));
    match route {
        FailureRoute::Action(FailureAction::Continue) => proceed(state),
        FailureRoute::Action(FailureAction::Restart) => Step::Abort,
        FailureRoute::Action(FailureAction::Terminate) => {
            state.request_stop(WorkerState::StoppingByFailure);
            Step::End
        }
        FailureRoute::Goto(target) => Step::Next(target),
    }
}

fn run_loop(
    graph: &Graph,
    count: u64,
    body: NodeId,
    counter: Option<&str>,
    state: &mut ThreadState,
) -> Outcome {
    for i in 0..count {
        if let Some(name) = counter {
            state.variables_mut().set(name, Value::from(i));
        }
        match walk(graph, body, state) {
            WalkEnd::Completed => {}
            WalkEnd::Aborted => {
                return Outcome::failure(format!("loop body abandoned its walk at pass {}", i))
            }
            WalkEnd::Stopped => break,
        }
    }
    Outcome::Success
}

fn run_fork(graph: &Graph, branches: &[NodeId], state: &mut ThreadState) -> Outcome {
    let children: Vec<ThreadState> = branches.iter().map(|_| state.fork()).collect();

    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = branches
            .iter()
            .zip(children)
            .map(|(&start, mut child)| {
                scope.spawn(move || {
                    let end = walk(graph, start, &mut child);
                    child.flush();
                    (end, child.state())
                })
            })
            .collect();
        handles.into_iter().map(|handle| handle.join()).collect()
    });

    let mut outcome = Outcome::Success;
    for result in results {
        match result {
            Ok((end, child_state)) => {
                if child_state.is_stopping() {
                    state.request_stop(child_state);
                }
                if end == WalkEnd::Aborted {
                    outcome = Outcome::failure("fork branch abandoned its walk");
                }
            }
            Err(_) => {
                warn!(worker = state.id(), "Fork branch panicked");
                outcome = Outcome::failure("fork branch panicked");
            }
        }
    }
    outcome
}

/// Independent RNG streams for workers
///
/// Worker `i` gets the base generator advanced by `i` jumps (2^128 steps
/// each), so streams never overlap. Without a seed the base comes from
/// entropy.
pub struct WorkerSeeds {
    next: Xoshiro256PlusPlus,
}

impl WorkerSeeds {
    pub fn new(seed: Option<u64>) -> Self {
        let next = match seed {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
            None => Xoshiro256PlusPlus::from_entropy(),
        };
        Self { next }
    }
}

impl Iterator for WorkerSeeds {
    type Item = Xoshiro256PlusPlus;

    fn next(&mut self) -> Option<Self::Item> {
        let rng = self.next.clone();
        self.next.jump();
        Some(rng)
    }
}

/// Summary of one worker's run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub id: usize,
    pub iterations: u64,
    pub aborted_walks: u64,
    /// The stopping state the worker passed through before terminating
    pub stop_reason: WorkerState,
    pub final_state: WorkerState,
    pub elapsed: Duration,
}

/// One worker: a graph plus exclusively owned walk state
pub struct Worker {
    graph: Arc<Graph>,
    state: ThreadState,
}

impl Worker {
    pub fn new(
        id: usize,
        graph: Arc<Graph>,
        run: Arc<RunContext>,
        rng: Xoshiro256PlusPlus,
    ) -> Self {
        let state = ThreadState::new(id, run, rng, graph.variables());
        Self { graph, state }
    }

    pub fn id(&self) -> usize {
        self.state.id()
    }

    /// Walk until a stop condition holds, then flush and terminate
    pub fn run(mut self) -> WorkerReport {
        let span = info_span!("worker", id = self.state.id());
        let _enter = span.enter();
        let started = Instant::now();
        let entry = self.graph.entry();
        debug!("Worker starting at node {}", self.graph.node(entry).name());

        while self.state.is_running() {
            match walk(&self.graph, entry, &mut self.state) {
                WalkEnd::Completed => self.state.complete_walk(false),
                WalkEnd::Aborted => self.state.complete_walk(true),
                WalkEnd::Stopped => {}
            }
        }

        let stop_reason = self.state.state();
        self.state.terminate();
        let report = WorkerReport {
            id: self.state.id(),
            iterations: self.state.iterations(),
            aborted_walks: self.state.aborted_walks(),
            stop_reason,
            final_state: self.state.state(),
            elapsed: started.elapsed(),
        };
        debug!(
            iterations = report.iterations,
            aborted = report.aborted_walks,
            "Worker terminated ({})",
            stop_reason
        );
        report
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use crate::backend::{Backend, Namespace};
    use crate::description::DescriptionSet;
    use crate::graph::builder::GraphBuilder;
    use crate::stats::{StatsCollector, StatsSnapshot};
    use serde_json::json;
    use std::collections::BTreeMap;

    pub(crate) fn test_state_with_backend(backend: Arc<dyn Backend>) -> ThreadState {
        let collector = Arc::new(StatsCollector::new());
        let run = RunContext::new(backend, collector, Namespace::new("test", "test"));
        ThreadState::new(0, Arc::new(run), Xoshiro256PlusPlus::seed_from_u64(3), &BTreeMap::new())
    }

    pub(crate) fn test_state() -> ThreadState {
        test_state_with_backend(Arc::new(MockBackend::new()))
    }

    fn graph(yaml: &str) -> Arc<Graph> {
        let set = DescriptionSet::from_yaml(yaml).unwrap();
        Arc::new(GraphBuilder::new(&set).build("main", set.get("main").unwrap()).unwrap())
    }

    struct Harness {
        backend: MockBackend,
        collector: Arc<StatsCollector>,
        run: RunContext,
    }

    impl Harness {
        fn new() -> Self {
            let backend = MockBackend::new();
            let collector = Arc::new(StatsCollector::new());
            let run = RunContext::new(
                Arc::new(backend.clone()),
                Arc::clone(&collector),
                Namespace::new("test", "test"),
            );
            Self { backend, collector, run }
        }

        fn configure(mut self, f: impl FnOnce(RunContext) -> RunContext) -> Self {
            self.run = f(self.run);
            self
        }

        fn run(self, graph: Arc<Graph>) -> (WorkerReport, StatsSnapshot, MockBackend) {
            let rng = Xoshiro256PlusPlus::seed_from_u64(11);
            let report = Worker::new(0, graph, Arc::new(self.run), rng).run();
            (report, self.collector.snapshot(), self.backend)
        }
    }

    fn count(snapshot: &StatsSnapshot, node: &str) -> u64 {
        snapshot.node(node).map_or(0, |n| n.count)
    }

    #[test]
    fn test_flush_interval_follows_run_context() {
        let g = graph("main:\n  nodes:\n    - { name: only, op: { type: noop } }\n");
        let harness =
            Harness::new().configure(|r| r.with_flush_interval(Duration::from_millis(50)));
        let run = Arc::new(harness.run);
        let rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let mut state = ThreadState::new(0, Arc::clone(&run), rng, &BTreeMap::new());
        assert_eq!(state.fork().run().flush_interval(), Duration::from_millis(50));

        walk(&g, g.entry(), &mut state);
        assert_eq!(count(&harness.collector.snapshot(), "only"), 0);

        // Past the short interval the next sample flushes everything held locally
        thread::sleep(Duration::from_millis(60));
        walk(&g, g.entry(), &mut state);
        assert_eq!(count(&harness.collector.snapshot(), "only"), 2);
    }

    #[test]
    fn test_terminal_graph_runs_one_iteration() {
        let g = graph("main:\n  nodes:\n    - { name: only, op: { type: noop } }\n");
        let (report, snapshot, _) = Harness::new().run(g);

        assert_eq!(report.iterations, 1);
        assert_eq!(report.stop_reason, WorkerState::StoppingByCompletion);
        assert_eq!(report.final_state, WorkerState::Terminated);
        assert_eq!(count(&snapshot, "only"), 1);
        assert_eq!(snapshot.iterations, 1);
    }

    #[test]
    fn test_iteration_bound() {
        let g = graph("main:\n  nodes:\n    - { name: a, op: { type: noop }, next: b }\n    - { name: b, op: { type: noop } }\n");
        let (report, snapshot, _) = Harness::new()
            .configure(|r| r.with_max_iterations(Some(250)).with_restart(true))
            .run(g);

        assert_eq!(report.iterations, 250);
        assert_eq!(report.stop_reason, WorkerState::StoppingByCount);
        assert_eq!(count(&snapshot, "a"), 250);
        assert_eq!(count(&snapshot, "b"), 250);
    }

    #[test]
    fn test_weighted_visits_converge() {
        let g = graph(
            r#"
main:
  nodes:
    - { name: start, op: { type: noop }, next: [ { node: light, weight: 1 }, { node: heavy, weight: 3 } ] }
    - { name: light, op: { type: noop } }
    - { name: heavy, op: { type: noop } }
"#,
        );
        let (_, snapshot, _) = Harness::new()
            .configure(|r| r.with_max_iterations(Some(40_000)).with_restart(true))
            .run(g);

        let light = count(&snapshot, "light") as f64;
        let heavy = count(&snapshot, "heavy") as f64;
        assert_eq!(light + heavy, 40_000.0);
        assert!((light / 40_000.0 - 0.25).abs() < 0.01, "light share {}", light / 40_000.0);
    }

    #[test]
    fn test_time_bound() {
        let g = graph("main:\n  nodes:\n    - { name: nap, op: { type: sleep, millis: 2 }, next: nap }\n");
        let run_length = Duration::from_millis(100);
        let (report, _, _) = Harness::new()
            .configure(|r| r.with_run_length(Some(run_length)).with_restart(true))
            .run(g);

        assert_eq!(report.stop_reason, WorkerState::StoppingByTime);
        assert!(report.elapsed >= run_length - Duration::from_millis(2));
        assert!(report.elapsed < run_length + Duration::from_millis(50));
    }

    fn failing_graph(policy: &str) -> Arc<Graph> {
        graph(&format!(
            r#"
main:
  nodes:
    - {{ name: write, op: {{ type: insert, document: {{ a: 1 }} }}, on_failure: {}, next: after }}
    - {{ name: after, op: {{ type: noop }} }}
    - {{ name: handler, op: {{ type: noop }} }}
"#,
            policy
        ))
    }

    #[test]
    fn test_failure_continue_records_and_proceeds() {
        let harness =
            Harness::new().configure(|r| r.with_max_iterations(Some(5)).with_restart(true));
        harness.backend.set_should_fail(true);
        let (report, snapshot, _) = harness.run(failing_graph("continue"));

        assert_eq!(report.iterations, 5);
        assert_eq!(snapshot.node("write").unwrap().errors, 5);
        assert_eq!(count(&snapshot, "after"), 5);
    }

    #[test]
    fn test_failure_restart_abandons_walk() {
        let harness =
            Harness::new().configure(|r| r.with_max_iterations(Some(5)).with_restart(true));
        harness.backend.set_should_fail(true);
        let (report, snapshot, _) = harness.run(failing_graph("restart"));

        assert_eq!(report.iterations, 5);
        assert_eq!(report.aborted_walks, 5);
        assert_eq!(count(&snapshot, "after"), 0);
    }

    #[test]
    fn test_failure_terminate_stops_worker() {
        let harness =
            Harness::new().configure(|r| r.with_max_iterations(Some(5)).with_restart(true));
        harness.backend.set_should_fail(true);
        let (report, snapshot, backend) = harness.run(failing_graph("terminate"));

        assert_eq!(report.stop_reason, WorkerState::StoppingByFailure);
        assert_eq!(report.iterations, 0);
        assert_eq!(backend.submitted_count(), 1);
        assert_eq!(count(&snapshot, "after"), 0);
    }

    #[test]
    fn test_failure_goto() {
        let harness = Harness::new();
        harness.backend.set_should_fail(true);
        let (_, snapshot, _) = harness.run(failing_graph("{ goto: handler }"));

        assert_eq!(count(&snapshot, "handler"), 1);
        assert_eq!(count(&snapshot, "after"), 0);
    }

    #[test]
    fn test_run_default_failure_action() {
        let harness = Harness::new().configure(|r| r.with_failure_action(FailureAction::Terminate));
        harness.backend.set_should_fail(true);
        let g = graph("main:\n  nodes:\n    - { name: w, op: { type: insert, document: { a: 1 } }, next: after }\n    - { name: after, op: { type: noop } }\n");
        let (report, _, _) = harness.run(g);
        assert_eq!(report.stop_reason, WorkerState::StoppingByFailure);
    }

    #[test]
    fn test_branch_and_loop() {
        let g = graph(
            r#"
main:
  variables: { total: 0 }
  nodes:
    - name: repeat
      loop: { count: 4, body: add, counter: i }
      next: check
    - { name: add, op: { type: set, variable: total, value: { increment: 10 } } }
    - name: check
      branch:
        condition: { variable: total, compare: eq, value: 40 }
        then: good
        else: bad
    - { name: good, op: { type: noop } }
    - { name: bad, op: { type: noop } }
"#,
        );
        let (_, snapshot, _) = Harness::new().run(g);

        assert_eq!(count(&snapshot, "add"), 4);
        assert_eq!(count(&snapshot, "repeat"), 1);
        assert_eq!(count(&snapshot, "good"), 1);
        assert_eq!(count(&snapshot, "bad"), 0);
    }

    #[test]
    fn test_loop_counter_variable() {
        let mut state = test_state();
        let g = graph("main:\n  nodes:\n    - { name: l, loop: { count: 3, body: b, counter: i } }\n    - { name: b, op: { type: noop } }\n");
        assert_eq!(walk(&g, g.entry(), &mut state), WalkEnd::Completed);
        assert_eq!(state.variables().get("i"), Some(&json!(2)));
    }

    #[test]
    fn test_fork_runs_every_branch() {
        let g = graph(
            r#"
main:
  nodes:
    - { name: split, fork: [left, right], next: joined }
    - { name: left, op: { type: insert, document: { side: left } } }
    - { name: right, op: { type: insert, collection: other, document: { side: right } } }
    - { name: joined, op: { type: noop } }
"#,
        );
        let (_, snapshot, backend) = Harness::new().run(g);

        assert_eq!(backend.submitted_count(), 2);
        assert_eq!(count(&snapshot, "left"), 1);
        assert_eq!(count(&snapshot, "right"), 1);
        assert_eq!(count(&snapshot, "joined"), 1);
        assert_eq!(snapshot.node("split").unwrap().kind, "fork");
    }

    #[test]
    fn test_nested_abort_fails_enclosing_node() {
        let harness = Harness::new();
        harness.backend.set_should_fail(true);
        let g = graph(
            r#"
main:
  nodes:
    - { name: l, loop: { count: 3, body: w }, next: after }
    - { name: w, op: { type: insert, document: { a: 1 } }, on_failure: restart }
    - { name: after, op: { type: noop } }
"#,
        );
        let (_, snapshot, backend) = harness.run(g);

        assert_eq!(backend.submitted_count(), 1);
        assert_eq!(snapshot.node("l").unwrap().errors, 1);
        assert_eq!(count(&snapshot, "after"), 1);
    }

    #[test]
    fn test_sub_workload_stats_keys() {
        let yaml = r#"
main:
  nodes:
    - { name: call, op: { type: workload, name: helper, iterations: 3 } }
helper:
  variables: { n: 0 }
  nodes:
    - { name: step, op: { type: set, variable: n, value: { increment: 1 } } }
"#;
        let (_, snapshot, _) = Harness::new().run(graph(yaml));
        assert_eq!(count(&snapshot, "call"), 1);
        assert_eq!(count(&snapshot, "helper/step"), 3);
    }

    #[test]
    fn test_worker_seeds_are_distinct_and_reproducible() {
        use rand::Rng;
        let first: Vec<u64> = WorkerSeeds::new(Some(5)).take(4).map(|mut r| r.gen()).collect();
        let again: Vec<u64> = WorkerSeeds::new(Some(5)).take(4).map(|mut r| r.gen()).collect();
        assert_eq!(first, again);
        for i in 0..first.len() {
            for j in i + 1..first.len() {
                assert_ne!(first[i], first[j]);
            }
        }
    }
}
