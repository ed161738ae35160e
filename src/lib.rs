//! loadgraph - graph-driven synthetic workload generator
//!
//! loadgraph interprets a declarative workload description (a directed graph of
//! operations with weighted edges) and replays it concurrently against a data
//! store, measuring per-node latency and throughput.
//!
//! # Architecture
//!
//! - **Descriptions**: YAML workload definitions, several per file
//! - **Graph**: immutable node arena with weighted, possibly cyclic edges
//! - **Workers**: one thread per worker, each walking the graph with its own
//!   RNG stream, variables and stats accumulator
//! - **Backends**: pluggable data stores behind the `Backend` trait
//! - **Stats**: HDR latency histograms per node, periodic JSON snapshots

pub mod backend;
pub mod config;
pub mod description;
pub mod error;
pub mod graph;
pub mod logging;
pub mod operation;
pub mod output;
pub mod stats;
pub mod util;
pub mod worker;
pub mod workload;

// Re-export commonly used types
pub use config::WorkloadExecutionState;
pub use description::DescriptionSet;
pub use graph::Graph;
pub use workload::{RunReport, Workload};

/// Result type used throughout loadgraph
pub type Result<T> = anyhow::Result<T>;
