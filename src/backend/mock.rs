//! Mock backend for testing
//!
//! Accepts every request without doing any work, records what it was asked to
//! do, and can be switched to fail or to add latency. Clones share state, so a
//! test can keep a handle while the workload owns another.
//!
//! # Example
//!
//! ```
//! use loadgraph::backend::mock::MockBackend;
//! use loadgraph::backend::{Backend, Command, Namespace, Request};
//!
//! let backend = MockBackend::new();
//! let request = Request {
//!     command: Command::Insert,
//!     namespace: Namespace::new("test", "test"),
//!     document: Some(serde_json::json!({ "a": 1 })),
//!     filter: None,
//! };
//! backend.execute(&request).unwrap();
//!
//! backend.set_should_fail(true);
//! assert!(backend.execute(&request).is_err());
//! assert_eq!(backend.submitted_count(), 2);
//! ```

use super::{Backend, BackendError, Command, Namespace, Reply, Request};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

/// Record of a submitted request for test verification
#[derive(Debug, Clone, PartialEq)]
pub struct RequestRecord {
    pub command: Command,
    pub namespace: Namespace,
    pub document: Option<serde_json::Value>,
}

#[derive(Debug)]
struct MockState {
    should_fail: bool,
    error_message: String,
    latency: Duration,
    submitted: Vec<RequestRecord>,
}

#[derive(Debug, Clone)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    /// Succeeds everything, no added latency
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                should_fail: false,
                error_message: "mock backend failure".to_string(),
                latency: Duration::ZERO,
                submitted: Vec::new(),
            })),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every subsequent request fail
    pub fn set_should_fail(&self, should_fail: bool) {
        self.state().should_fail = should_fail;
    }

    pub fn set_error_message(&self, message: impl Into<String>) {
        self.state().error_message = message.into();
    }

    /// Sleep this long inside every request
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = latency;
    }

    pub fn submitted_requests(&self) -> Vec<RequestRecord> {
        self.state().submitted.clone()
    }

    pub fn submitted_count(&self) -> usize {
        self.state().submitted.len()
    }

    pub fn clear_submitted_requests(&self) {
        self.state().submitted.clear();
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn execute(&self, request: &Request) -> Result<Reply, BackendError> {
        let (latency, failure) = {
            let mut state = self.state();
            state.submitted.push(RequestRecord {
                command: request.command,
                namespace: request.namespace.clone(),
                document: request.document.clone(),
            });
            let failure = state.should_fail.then(|| state.error_message.clone());
            (state.latency, failure)
        };

        // Sleep outside the lock so concurrent workers overlap like real clients
        if !latency.is_zero() {
            thread::sleep(latency);
        }

        match failure {
            Some(message) => Err(BackendError::Rejected(message)),
            None => Ok(Reply { affected: 1 }),
        }
    }
}
