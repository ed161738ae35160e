//! Operations: the units of work a node performs
//!
//! `Operation` is a closed set of kinds, each carrying parameters that were
//! parsed and validated when the graph was built. Execution has one uniform
//! contract: run once against the worker's `ThreadState`, report `Success` or
//! `Failure(reason)`, and report the wall-clock time it took either way.
//!
//! A failure is a value, not an error. The walk engine records it as an error
//! sample and then applies the node's failure policy.

pub mod condition;
pub mod value;
pub mod variables;

pub use condition::{Comparison, Condition};
pub use value::{ValueExpr, ValueSource};
pub use variables::Variables;

use crate::backend::{Command, Namespace, Request};
use crate::graph::Graph;
use crate::util::time::Timestamp;
use crate::worker::{walk, ThreadState, WalkEnd};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// How a single execution ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure(String),
}

impl Outcome {
    pub fn failure(reason: impl Into<String>) -> Self {
        Outcome::Failure(reason.into())
    }

    #[inline]
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure(_))
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Outcome::Success => None,
            Outcome::Failure(reason) => Some(reason),
        }
    }
}

/// Outcome plus the time the execution took
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    pub outcome: Outcome,
    pub duration: Duration,
}

impl Execution {
    /// Time `f` and wrap its outcome
    pub fn measure(f: impl FnOnce() -> Outcome) -> Self {
        let start = Timestamp::now();
        let outcome = f();
        Self {
            outcome,
            duration: start.elapsed(),
        }
    }
}

/// Call into the backend
#[derive(Debug, Clone, PartialEq)]
pub struct BackendCall {
    pub command: Command,
    /// Overrides the run's database
    pub database: Option<String>,
    /// Overrides the run's collection
    pub collection: Option<String>,
    /// Insert document or update operators, may reference `$variables`
    pub document: Option<Value>,
    pub filter: Option<Value>,
    /// Variable that receives the reply's affected-document count
    pub store: Option<String>,
}

impl BackendCall {
    fn execute(&self, state: &mut ThreadState) -> Outcome {
        let request = match self.request(state) {
            Ok(request) => request,
            Err(reason) => return Outcome::Failure(reason),
        };
        match state.backend().execute(&request) {
            Ok(reply) => {
                if let Some(variable) = &self.store {
                    state.variables_mut().set(variable, Value::from(reply.affected));
                }
                Outcome::Success
            }
            Err(e) => Outcome::failure(format!("{} on {}: {}", self.command, request.namespace, e)),
        }
    }

    fn request(&self, state: &ThreadState) -> Result<Request, String> {
        let defaults = state.namespace();
        let namespace = Namespace::new(
            self.database.as_deref().unwrap_or(&defaults.database),
            self.collection.as_deref().unwrap_or(&defaults.collection),
        );
        let vars = state.variables();
        Ok(Request {
            command: self.command,
            namespace,
            document: self.document.as_ref().map(|d| vars.substitute(d)).transpose()?,
            filter: self.filter.as_ref().map(|f| vars.substitute(f)).transpose()?,
        })
    }
}

/// Invocation of another workload's graph
#[derive(Debug, Clone)]
pub struct SubWorkload {
    pub name: String,
    pub graph: Arc<Graph>,
    /// Walks of the sub-graph per execution
    pub iterations: u64,
}

impl SubWorkload {
    fn execute(&self, state: &mut ThreadState) -> Outcome {
        for _ in 0..self.iterations {
            let end = state.with_scope(self.graph.variables(), |state| {
                walk(&self.graph, self.graph.entry(), state)
            });
            match end {
                WalkEnd::Completed => {}
                WalkEnd::Aborted => {
                    return Outcome::failure(format!(
                        "sub-workload `{}` abandoned its walk",
                        self.name
                    ))
                }
                WalkEnd::Stopped => break,
            }
        }
        Outcome::Success
    }
}

/// Assignment of a computed or literal value to a variable
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub variable: String,
    pub value: ValueSource,
}

#[derive(Debug, Clone)]
pub enum Operation {
    Backend(BackendCall),
    Set(Assignment),
    Sleep(Duration),
    /// Succeeds when the condition holds, fails otherwise
    Conditional(Condition),
    Workload(SubWorkload),
    Noop,
}

impl Operation {
    /// Label used in statistics and graph exports
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Backend(call) => call.command.as_str(),
            Operation::Set(_) => "set",
            Operation::Sleep(_) => "sleep",
            Operation::Conditional(_) => "conditional",
            Operation::Workload(_) => "workload",
            Operation::Noop => "noop",
        }
    }

    /// Run once against the worker's state
    pub fn execute(&self, state: &mut ThreadState) -> Execution {
        Execution::measure(|| match self {
            Operation::Backend(call) => call.execute(state),
            Operation::Set(assignment) => {
                let (variables, rng) = state.variables_and_rng();
                match assignment.value.evaluate(&assignment.variable, variables, rng) {
                    Ok(value) => {
                        variables.set(&assignment.variable, value);
                        Outcome::Success
                    }
                    Err(reason) => Outcome::Failure(reason),
                }
            }
            Operation::Sleep(duration) => {
                thread::sleep(*duration);
                Outcome::Success
            }
            Operation::Conditional(condition) => match condition.evaluate(state.variables()) {
                Ok(true) => Outcome::Success,
                Ok(false) => Outcome::failure(format!("condition `{}` not met", condition)),
                Err(reason) => Outcome::Failure(reason),
            },
            Operation::Workload(call) => call.execute(state),
            Operation::Noop => Outcome::Success,
        })
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Backend(call) => match (&call.database, &call.collection) {
                (Some(db), Some(coll)) => write!(f, "{} {}.{}", call.command, db, coll),
                (None, Some(coll)) => write!(f, "{} {}", call.command, coll),
                _ => write!(f, "{}", call.command),
            },
            Operation::Set(a) => write!(f, "set {}", a.variable),
            Operation::Sleep(d) => write!(f, "sleep {}", crate::util::time::format_duration(*d)),
            Operation::Conditional(c) => write!(f, "conditional {}", c),
            Operation::Workload(w) => write!(f, "workload {} x{}", w.name, w.iterations),
            Operation::Noop => f.write_str("noop"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use crate::worker::tests::{test_state, test_state_with_backend};
    use serde_json::json;

    #[test]
    fn test_outcome_helpers() {
        assert!(!Outcome::Success.is_failure());
        let failure = Outcome::failure("nope");
        assert!(failure.is_failure());
        assert_eq!(failure.reason(), Some("nope"));
    }

    #[test]
    fn test_sleep_duration_is_measured() {
        let mut state = test_state();
        let exec = Operation::Sleep(Duration::from_millis(5)).execute(&mut state);
        assert_eq!(exec.outcome, Outcome::Success);
        assert!(exec.duration >= Duration::from_millis(5));
    }

    #[test]
    fn test_set_and_conditional() {
        let mut state = test_state();
        let set = Operation::Set(Assignment {
            variable: "n".to_string(),
            value: ValueSource::Expr(ValueExpr::Increment(1)),
        });
        set.execute(&mut state);
        set.execute(&mut state);
        assert_eq!(state.variables().get("n"), Some(&json!(2)));

        let check = |compare, value| {
            Operation::Conditional(Condition {
                variable: "n".to_string(),
                compare,
                value,
            })
        };
        assert_eq!(check(Comparison::Eq, json!(2)).execute(&mut state).outcome, Outcome::Success);
        assert!(check(Comparison::Gt, json!(2)).execute(&mut state).outcome.is_failure());
    }

    #[test]
    fn test_backend_call_substitutes_and_namespaces() {
        let mock = MockBackend::new();
        let mut state = test_state_with_backend(Arc::new(mock.clone()));
        state.variables_mut().set("id", json!(7));

        let op = Operation::Backend(BackendCall {
            command: Command::Insert,
            database: None,
            collection: Some("other".to_string()),
            document: Some(json!({ "_id": "$id" })),
            filter: None,
            store: Some("written".to_string()),
        });
        assert_eq!(op.kind(), "insert");
        assert_eq!(op.execute(&mut state).outcome, Outcome::Success);

        let records = mock.submitted_requests();
        assert_eq!(records[0].namespace, Namespace::new("test", "other"));
        assert_eq!(records[0].document, Some(json!({ "_id": 7 })));
        assert_eq!(state.variables().get("written"), Some(&json!(1)));
    }

    #[test]
    fn test_backend_failure_is_outcome() {
        let mock = MockBackend::new();
        mock.set_should_fail(true);
        let mut state = test_state_with_backend(Arc::new(mock.clone()));

        let op = Operation::Backend(BackendCall {
            command: Command::Find,
            database: None,
            collection: None,
            document: None,
            filter: Some(json!({ "k": "$missing" })),
            store: None,
        });
        // Unknown variable fails before reaching the backend
        assert!(op.execute(&mut state).outcome.is_failure());
        assert_eq!(mock.submitted_count(), 0);

        state.variables_mut().set("missing", json!(1));
        let exec = op.execute(&mut state);
        assert_eq!(exec.outcome.reason(), Some("find on test.test: mock backend failure"));
    }
}
