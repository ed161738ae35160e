//! Backend abstraction layer
//!
//! Operations talk to the data store under test through the `Backend` trait.
//! One backend instance is shared by every worker of a run (like a client
//! connection pool), so implementations must be `Send + Sync` and do their own
//! internal locking.
//!
//! # Available Backends
//!
//! - **memory** (`memory://`): in-process document store, the default target
//! - **mock** (`mock://`): accepts everything and records the requests, for tests
//!
//! The backend is chosen by the scheme of the connection string:
//!
//! ```
//! use loadgraph::backend::connect;
//!
//! let backend = connect("memory://").unwrap();
//! assert_eq!(backend.name(), "memory");
//! assert!(connect("postgres://db").is_err());
//! ```

pub mod memory;
pub mod mock;

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Backend command issued by a backend-call operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Insert,
    Find,
    Update,
    Remove,
    Count,
    Drop,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Insert => "insert",
            Command::Find => "find",
            Command::Update => "update",
            Command::Remove => "remove",
            Command::Count => "count",
            Command::Drop => "drop",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Database and collection a request is addressed to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    pub database: String,
    pub collection: String,
}

impl Namespace {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// Fully resolved request (variables already substituted)
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub command: Command,
    pub namespace: Namespace,
    /// Document to insert, or update operators
    pub document: Option<Value>,
    /// Match filter for find/update/remove/count; `None` matches everything
    pub filter: Option<Value>,
}

/// Result of a successful request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Reply {
    /// Documents inserted, matched, modified or removed, depending on the command
    pub affected: u64,
}

/// Reasons a backend rejects a request
///
/// These never escape a walk: the operation turns them into failure samples.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BackendError {
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("{0}")]
    Rejected(String),
}

/// Data store under test
pub trait Backend: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Execute one request, blocking the calling worker until it completes
    fn execute(&self, request: &Request) -> Result<Reply, BackendError>;
}

/// Backend schemes `connect` understands
pub const SUPPORTED_SCHEMES: &[&str] = &["memory", "mock"];

/// Split `<scheme>://<rest>` and return the scheme
pub fn parse_scheme(uri: &str) -> Result<&str, ConfigurationError> {
    let valid = |scheme: &str| {
        !scheme.is_empty()
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
    };
    match uri.split_once("://") {
        Some((scheme, _)) if valid(scheme) => Ok(scheme),
        _ => Err(ConfigurationError::InvalidUri(uri.to_string())),
    }
}

/// Create the backend a connection string names
pub fn connect(uri: &str) -> Result<Arc<dyn Backend>, ConfigurationError> {
    match parse_scheme(uri)? {
        "memory" => Ok(Arc::new(memory::MemoryBackend::new())),
        "mock" => Ok(Arc::new(mock::MockBackend::new())),
        other => Err(ConfigurationError::UnsupportedScheme(other.to_string())),
    }
}
