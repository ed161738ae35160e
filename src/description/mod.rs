//! Workload description format
//!
//! A description file is a YAML mapping from workload name to workload
//! definition. Definitions are plain serde structures; turning one into a
//! runnable `Graph` (name resolution, weight checks, sub-workload linking) is
//! the job of `graph::builder`.
//!
//! ```yaml
//! main:
//!   threads: 4
//!   run_length_ms: 10000
//!   nodes:
//!     - name: insert_one
//!       op: { type: insert, document: { n: $counter } }
//!       next:
//!         - { node: bump, weight: 3 }
//!         - { node: Finish, weight: 1 }
//!     - name: bump
//!       op: { type: set, variable: counter, value: { increment: 1 } }
//!       next: insert_one
//! ```

use crate::backend::Command;
use crate::config::workload::{FailureAction, FailurePolicy, RestartPolicy};
use crate::error::LoadError;
use crate::operation::{Condition, ValueSource};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Reserved node name for the implicit terminal node
pub const FINISH_NODE: &str = "Finish";

/// All workloads defined in one description file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DescriptionSet {
    pub workloads: BTreeMap<String, WorkloadDescription>,
}

impl DescriptionSet {
    /// Parse a description from YAML text
    pub fn from_yaml(text: &str) -> Result<Self, LoadError> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Read and parse a description file
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let text = fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    pub fn get(&self, name: &str) -> Result<&WorkloadDescription, LoadError> {
        self.workloads
            .get(name)
            .ok_or_else(|| LoadError::MissingWorkload(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.workloads.keys().map(String::as_str)
    }
}

/// One named workload: run defaults plus its node graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkloadDescription {
    #[serde(default)]
    pub threads: Option<usize>,
    #[serde(default)]
    pub run_length_ms: Option<u64>,
    #[serde(default)]
    pub iterations: Option<u64>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub seed: Option<u64>,
    /// Entry node, defaults to the first node
    #[serde(default)]
    pub entry: Option<String>,
    /// Workload-wide default for nodes without their own policy
    #[serde(default)]
    pub on_failure: Option<FailureAction>,
    #[serde(default)]
    pub restart: Option<RestartPolicy>,
    /// Initial values of every worker's variables
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
    #[serde(default)]
    pub nodes: Vec<NodeDescription>,
}

/// One vertex; exactly one of `op`, `branch`, `loop`, `fork`, `finish` is set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeDescription {
    pub name: String,
    #[serde(default)]
    pub op: Option<OperationDescription>,
    #[serde(default)]
    pub branch: Option<BranchDescription>,
    #[serde(default, rename = "loop")]
    pub repeat: Option<LoopDescription>,
    #[serde(default)]
    pub fork: Option<Vec<String>>,
    #[serde(default)]
    pub finish: bool,
    #[serde(default)]
    pub next: Option<NextDescription>,
    #[serde(default)]
    pub on_failure: Option<FailurePolicy>,
}

impl NodeDescription {
    /// Every node name this node refers to
    pub fn references(&self) -> Vec<&str> {
        let mut refs: Vec<&str> = Vec::new();
        if let Some(next) = &self.next {
            refs.extend(next.edges().into_iter().map(|(name, _)| name));
        }
        if let Some(branch) = &self.branch {
            refs.push(&branch.then);
            refs.push(&branch.otherwise);
        }
        if let Some(repeat) = &self.repeat {
            refs.push(&repeat.body);
        }
        if let Some(fork) = &self.fork {
            refs.extend(fork.iter().map(String::as_str));
        }
        if let Some(FailurePolicy::Goto { goto }) = &self.on_failure {
            refs.push(goto);
        }
        refs
    }
}

/// Successors: a bare name (weight 1) or a weighted list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NextDescription {
    Single(String),
    Weighted(Vec<EdgeDescription>),
}

impl NextDescription {
    pub fn edges(&self) -> Vec<(&str, f64)> {
        match self {
            NextDescription::Single(name) => vec![(name.as_str(), 1.0)],
            NextDescription::Weighted(edges) => {
                edges.iter().map(|e| (e.node.as_str(), e.weight)).collect()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeDescription {
    pub node: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchDescription {
    pub condition: Condition,
    pub then: String,
    #[serde(rename = "else")]
    pub otherwise: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopDescription {
    pub count: u64,
    pub body: String,
    /// Variable holding the zero-based iteration index inside the body
    #[serde(default)]
    pub counter: Option<String>,
}

/// Parameters shared by all backend commands
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendDescription {
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub document: Option<Value>,
    #[serde(default)]
    pub filter: Option<Value>,
    #[serde(default)]
    pub update: Option<Value>,
    #[serde(default)]
    pub store: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationDescription {
    Insert(BackendDescription),
    Find(BackendDescription),
    Update(BackendDescription),
    Remove(BackendDescription),
    Count(BackendDescription),
    Drop(BackendDescription),
    Set {
        variable: String,
        value: ValueSource,
    },
    Sleep {
        #[serde(default)]
        millis: u64,
        #[serde(default)]
        micros: u64,
    },
    Conditional(Condition),
    Workload {
        name: String,
        #[serde(default = "default_sub_iterations")]
        iterations: u64,
    },
    Noop,
}

fn default_sub_iterations() -> u64 {
    1
}

impl OperationDescription {
    /// Backend command and parameters, if this is a backend call
    pub fn as_backend(&self) -> Option<(Command, &BackendDescription)> {
        match self {
            OperationDescription::Insert(b) => Some((Command::Insert, b)),
            OperationDescription::Find(b) => Some((Command::Find, b)),
            OperationDescription::Update(b) => Some((Command::Update, b)),
            OperationDescription::Remove(b) => Some((Command::Remove, b)),
            OperationDescription::Count(b) => Some((Command::Count, b)),
            OperationDescription::Drop(b) => Some((Command::Drop, b)),
            _ => None,
        }
    }
}
