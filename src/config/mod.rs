//! Configuration module
//!
//! A run is configured in layers, lowest precedence first: built-in defaults,
//! the values embedded in the workload description, a TOML override file and
//! the command line. The description layer is applied by
//! `WorkloadExecutionState::from_description`; the other two are
//! `RunOverrides` merged with `merged_with` and applied with `apply`.

pub mod cli;
pub mod toml;
pub mod validator;
pub mod workload;

use crate::backend::Namespace;
use crate::description::WorkloadDescription;
use crate::error::ConfigurationError;
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use workload::{FailureAction, RestartPolicy};

pub const DEFAULT_DATABASE: &str = "test";
pub const DEFAULT_COLLECTION: &str = "test";
pub const DEFAULT_URI: &str = "memory://";
pub const DEFAULT_RESULTS_FILE: &str = "results.json";

/// Where and how often results are written
#[derive(Debug, Clone, PartialEq)]
pub struct ResultsConfig {
    pub path: PathBuf,
    /// Zero disables periodic samples; only the final snapshot is written
    pub period: Duration,
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_RESULTS_FILE),
            period: Duration::ZERO,
        }
    }
}

/// Fully resolved parameters of one run
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadExecutionState {
    pub num_parallel_threads: usize,
    pub run_length: Option<Duration>,
    pub max_iterations: Option<u64>,
    pub database: String,
    pub collection: String,
    pub uri: String,
    /// Base seed; `None` seeds from entropy
    pub seed: Option<u64>,
    pub on_failure: FailureAction,
    pub restart: RestartPolicy,
    pub results: ResultsConfig,
}

impl Default for WorkloadExecutionState {
    fn default() -> Self {
        Self {
            num_parallel_threads: 1,
            run_length: None,
            max_iterations: None,
            database: DEFAULT_DATABASE.to_string(),
            collection: DEFAULT_COLLECTION.to_string(),
            uri: DEFAULT_URI.to_string(),
            seed: None,
            on_failure: FailureAction::default(),
            restart: RestartPolicy::default(),
            results: ResultsConfig::default(),
        }
    }
}

impl WorkloadExecutionState {
    /// Defaults overlaid with the description's embedded run settings
    pub fn from_description(description: &WorkloadDescription) -> Self {
        let mut state = Self::default();
        if let Some(threads) = description.threads {
            state.num_parallel_threads = threads;
        }
        if let Some(ms) = description.run_length_ms {
            state.run_length = Some(Duration::from_millis(ms));
        }
        if let Some(iterations) = description.iterations {
            state.max_iterations = Some(iterations);
        }
        if let Some(database) = &description.database {
            state.database = database.clone();
        }
        if let Some(collection) = &description.collection {
            state.collection = collection.clone();
        }
        if let Some(seed) = description.seed {
            state.seed = Some(seed);
        }
        if let Some(action) = description.on_failure {
            state.on_failure = action;
        }
        if let Some(restart) = description.restart {
            state.restart = restart;
        }
        state
    }

    /// True when a run-length or iteration bound is configured
    pub fn is_bounded(&self) -> bool {
        self.run_length.is_some() || self.max_iterations.is_some()
    }

    /// Whether walks restart at the entry node
    pub fn restarts(&self) -> bool {
        self.restart.restarts(self.is_bounded())
    }

    pub fn namespace(&self) -> Namespace {
        Namespace::new(&self.database, &self.collection)
    }
}

impl fmt::Display for WorkloadExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} thread(s) against {} ({})",
            self.num_parallel_threads,
            self.uri,
            self.namespace()
        )?;
        match (self.run_length, self.max_iterations) {
            (Some(t), Some(n)) => write!(f, ", {}ms or {} walks per worker", t.as_millis(), n)?,
            (Some(t), None) => write!(f, ", {}ms", t.as_millis())?,
            (None, Some(n)) => write!(f, ", {} walks per worker", n)?,
            (None, None) => write!(f, ", unbounded")?,
        }
        write!(f, ", on failure {}, restart {}", self.on_failure, self.restart)
    }
}

/// Results overrides, the `[results]` table of an override file
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResultsOverrides {
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub period_secs: Option<f64>,
}

/// Optional run parameters from an override file or the command line
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunOverrides {
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
    pub uri: Option<String>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub on_failure: Option<FailureAction>,
    #[serde(default)]
    pub restart: Option<RestartPolicy>,
    #[serde(default)]
    pub results: ResultsOverrides,
}

impl RunOverrides {
    /// Combine two layers; values set in `other` win
    pub fn merged_with(self, other: RunOverrides) -> RunOverrides {
        RunOverrides {
            threads: other.threads.or(self.threads),
            run_length_ms: other.run_length_ms.or(self.run_length_ms),
            iterations: other.iterations.or(self.iterations),
            database: other.database.or(self.database),
            collection: other.collection.or(self.collection),
            uri: other.uri.or(self.uri),
            seed: other.seed.or(self.seed),
            on_failure: other.on_failure.or(self.on_failure),
            restart: other.restart.or(self.restart),
            results: ResultsOverrides {
                path: other.results.path.or(self.results.path),
                period_secs: other.results.period_secs.or(self.results.period_secs),
            },
        }
    }

    /// Overwrite every parameter this layer sets
    pub fn apply(&self, state: &mut WorkloadExecutionState) -> Result<(), ConfigurationError> {
        if let Some(threads) = self.threads {
            state.num_parallel_threads = threads;
        }
        if let Some(ms) = self.run_length_ms {
            state.run_length = Some(Duration::from_millis(ms));
        }
        if let Some(iterations) = self.iterations {
            state.max_iterations = Some(iterations);
        }
        if let Some(database) = &self.database {
            state.database = database.clone();
        }
        if let Some(collection) = &self.collection {
            state.collection = collection.clone();
        }
        if let Some(uri) = &self.uri {
            state.uri = uri.clone();
        }
        if let Some(seed) = self.seed {
            state.seed = Some(seed);
        }
        if let Some(action) = self.on_failure {
            state.on_failure = action;
        }
        if let Some(restart) = self.restart {
            state.restart = restart;
        }
        if let Some(path) = &self.results.path {
            state.results.path = path.clone();
        }
        if let Some(secs) = self.results.period_secs {
            state.results.period = Duration::try_from_secs_f64(secs)
                .map_err(|_| ConfigurationError::InvalidPeriod(secs))?;
        }
        Ok(())
    }
}
