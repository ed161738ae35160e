//! Walk policy definitions
//!
//! These enums are shared by the description format, the TOML override file
//! and the command line, so each derives both serde and clap traits.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a worker does after an operation fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FailureAction {
    /// Record the failure and select the next node as if it had succeeded
    #[default]
    Continue,
    /// Abandon the walk; it still counts as an iteration
    Restart,
    /// Stop the worker
    Terminate,
}

/// Failure handling as written on a node
///
/// ```yaml
/// on_failure: restart
/// on_failure: { goto: cleanup }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FailurePolicy {
    Action(FailureAction),
    Goto { goto: String },
}

/// Whether a walk that reaches a terminal node starts over at the entry node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    /// Restart only when a run-length or iteration bound is configured
    #[default]
    Auto,
    Always,
    Never,
}

impl RestartPolicy {
    /// Resolve against the configured bounds
    pub fn restarts(&self, bounded: bool) -> bool {
        match self {
            RestartPolicy::Auto => bounded,
            RestartPolicy::Always => true,
            RestartPolicy::Never => false,
        }
    }
}

impl fmt::Display for FailureAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureAction::Continue => write!(f, "continue"),
            FailureAction::Restart => write!(f, "restart"),
            FailureAction::Terminate => write!(f, "terminate"),
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::Action(action) => write!(f, "{}", action),
            FailurePolicy::Goto { goto } => write!(f, "goto {}", goto),
        }
    }
}

impl fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartPolicy::Auto => write!(f, "auto"),
            RestartPolicy::Always => write!(f, "always"),
            RestartPolicy::Never => write!(f, "never"),
        }
    }
}
