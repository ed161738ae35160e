//! Error types
//!
//! Construction and configuration errors are fatal and surface once, before any
//! worker starts. Operation failures are not errors at all: they are recorded as
//! `Outcome::Failure` samples and the walk continues according to its failure
//! policy (see `operation::Outcome`).

use std::path::PathBuf;
use thiserror::Error;

/// Malformed workload description
///
/// Every variant names the node, edge or workload that caused it so the operator
/// can find it in the description file.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConstructionError {
    #[error("workload `{0}` has no nodes")]
    Empty(String),

    #[error("duplicate node name `{0}`")]
    DuplicateNode(String),

    #[error("entry node `{0}` does not exist")]
    MissingEntry(String),

    #[error("node `{node}` references unknown node `{target}`")]
    DanglingEdge { node: String, target: String },

    #[error("node `{node}` has negative weight {weight} on edge to `{target}`")]
    NegativeWeight {
        node: String,
        target: String,
        weight: f64,
    },

    #[error("node `{node}` has non-finite weight on edge to `{target}`")]
    NonFiniteWeight { node: String, target: String },

    #[error("node `{0}` must declare exactly one of op, branch, loop, fork or finish")]
    AmbiguousNode(String),

    #[error("node `{node}`: {reason}")]
    InvalidOperation { node: String, reason: String },

    #[error("node `{node}` calls unknown workload `{workload}`")]
    UnknownWorkload { node: String, workload: String },

    #[error("workload `{0}` invokes itself through its sub-workloads")]
    RecursiveWorkload(String),
}

/// Contradictory or out-of-range run configuration
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("number of threads must be at least 1")]
    ZeroThreads,

    #[error("run length must be greater than zero when set")]
    ZeroRunLength,

    #[error("iteration bound must be greater than zero when set")]
    ZeroIterations,

    #[error("{field} name must not be empty")]
    EmptyName { field: &'static str },

    #[error("invalid connection string `{0}`: expected <scheme>://...")]
    InvalidUri(String),

    #[error("no backend available for scheme `{0}` (supported: memory, mock)")]
    UnsupportedScheme(String),

    #[error("invalid log level `{0}` (expected trace, debug, info, warning, error or fatal)")]
    InvalidLogLevel(String),

    #[error("results period must be a non-negative number of seconds, got {0}")]
    InvalidPeriod(f64),
}

/// Graph description export/parse failures
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("node name {0:?} contains characters that cannot be represented in a graph description")]
    UnsafeName(String),

    #[error("failed to write graph description to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },
}

/// Workload description loading failures
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read workload file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse workload description: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("workload `{0}` not found in description")]
    MissingWorkload(String),
}
