//! TOML run-override files
//!
//! ```toml
//! threads = 4
//! run_length_ms = 30000
//! uri = "memory://"
//! on_failure = "restart"
//!
//! [results]
//! path = "bench.json"
//! period_secs = 5
//! ```

use super::RunOverrides;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Parse an override file
pub fn parse_toml_file(path: &Path) -> Result<RunOverrides> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_toml_string(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse overrides from TOML text
pub fn parse_toml_string(contents: &str) -> Result<RunOverrides> {
    let overrides: RunOverrides =
        ::toml::from_str(contents).context("Failed to parse TOML configuration")?;
    Ok(overrides)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::workload::{FailureAction, RestartPolicy};
    use std::io::Write;
    use std::path::PathBuf;

    #[test]
    fn test_parse_all_keys() {
        let overrides = parse_toml_string(
            r#"
threads = 4
run_length_ms = 30000
iterations = 10
database = "bench"
collection = "items"
uri = "mock://"
seed = 7
on_failure = "restart"
restart = "always"

[results]
path = "bench.json"
period_secs = 2.5
"#,
        )
        .unwrap();

        assert_eq!(overrides.threads, Some(4));
        assert_eq!(overrides.run_length_ms, Some(30000));
        assert_eq!(overrides.iterations, Some(10));
        assert_eq!(overrides.database.as_deref(), Some("bench"));
        assert_eq!(overrides.uri.as_deref(), Some("mock://"));
        assert_eq!(overrides.seed, Some(7));
        assert_eq!(overrides.on_failure, Some(FailureAction::Restart));
        assert_eq!(overrides.restart, Some(RestartPolicy::Always));
        assert_eq!(overrides.results.path, Some(PathBuf::from("bench.json")));
        assert_eq!(overrides.results.period_secs, Some(2.5));
    }

    #[test]
    fn test_empty_file_overrides_nothing() {
        assert_eq!(parse_toml_string("").unwrap(), RunOverrides::default());
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(parse_toml_string("thread = 4\n").is_err());
        assert!(parse_toml_string("on_failure = \"explode\"\n").is_err());
    }

    #[test]
    fn test_parse_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "threads = 2").unwrap();
        assert_eq!(parse_toml_file(file.path()).unwrap().threads, Some(2));

        let err = parse_toml_file(Path::new("/nonexistent/loadgraph.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
