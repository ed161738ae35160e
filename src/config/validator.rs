//! Configuration validation

use super::workload::RestartPolicy;
use super::WorkloadExecutionState;
use crate::backend::{parse_scheme, SUPPORTED_SCHEMES};
use crate::error::ConfigurationError;
use std::time::Duration;
use tracing::warn;

/// Validate a resolved execution state before any thread starts
pub fn validate_execution_state(state: &WorkloadExecutionState) -> Result<(), ConfigurationError> {
    if state.num_parallel_threads == 0 {
        return Err(ConfigurationError::ZeroThreads);
    }
    if state.run_length == Some(Duration::ZERO) {
        return Err(ConfigurationError::ZeroRunLength);
    }
    if state.max_iterations == Some(0) {
        return Err(ConfigurationError::ZeroIterations);
    }
    if state.database.is_empty() {
        return Err(ConfigurationError::EmptyName { field: "database" });
    }
    if state.collection.is_empty() {
        return Err(ConfigurationError::EmptyName { field: "collection" });
    }

    let scheme = parse_scheme(&state.uri)?;
    if !SUPPORTED_SCHEMES.contains(&scheme) {
        return Err(ConfigurationError::UnsupportedScheme(scheme.to_string()));
    }

    if state.restart == RestartPolicy::Always && !state.is_bounded() {
        warn!(
            "restart is `always` with no run length or iteration bound; \
             workers stop only on a terminating failure"
        );
    }
    if !state.results.period.is_zero() {
        if let Some(run_length) = state.run_length {
            if state.results.period > run_length {
                warn!(
                    "Results period {:?} exceeds run length {:?}; expect a single interval sample",
                    state.results.period, run_length
                );
            }
        }
    }

    Ok(())
}
