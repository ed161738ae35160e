//! CLI argument parsing using clap

use super::workload::{FailureAction, RestartPolicy};
use super::{ResultsOverrides, RunOverrides};
use clap::Parser;
use std::path::PathBuf;

/// loadgraph - graph-driven synthetic workload generator
///
/// Runs the workload WORKLOAD_NAME from the YAML description WORKLOAD_FILE
/// against a data store. Flags override values from `--config` and from the
/// description itself.
#[derive(Parser, Debug)]
#[command(name = "loadgraph")]
#[command(version, about, long_about = None, disable_version_flag = true)]
pub struct Cli {
    /// Workload description file (YAML)
    #[arg(value_name = "WORKLOAD_FILE")]
    pub workload_file: Option<PathBuf>,

    /// Workload to run from the description file
    #[arg(value_name = "WORKLOAD_NAME", default_value = "main")]
    pub workload_name: String,

    // === Run Options ===
    /// Number of worker threads
    #[arg(long = "num-threads", visible_alias = "numThreads", value_name = "N")]
    pub num_threads: Option<usize>,

    /// Stop workers after this many milliseconds
    #[arg(long = "run-length-ms", visible_alias = "runLengthMS", value_name = "N")]
    pub run_length_ms: Option<u64>,

    /// Stop each worker after this many completed walks
    #[arg(long, value_name = "N")]
    pub iterations: Option<u64>,

    /// Base seed for reproducible edge selection and value generation
    #[arg(long, value_name = "N")]
    pub seed: Option<u64>,

    /// Default failure policy for nodes without their own
    #[arg(long, value_enum)]
    pub on_failure: Option<FailureAction>,

    /// Whether walks restart at the entry node
    #[arg(long, value_enum)]
    pub restart: Option<RestartPolicy>,

    // === Backend Options ===
    /// Connection string of the data store (memory://, mock://)
    #[arg(long, visible_alias = "uri", value_name = "URI")]
    pub host: Option<String>,

    /// Default database for backend operations
    #[arg(long)]
    pub database: Option<String>,

    /// Default collection for backend operations
    #[arg(long)]
    pub collection: Option<String>,

    // === Output Options ===
    /// Results file [default: results.json]
    #[arg(short = 'r', long = "resultsfile", value_name = "FILE")]
    pub results_file: Option<PathBuf>,

    /// Seconds between periodic results samples; 0 writes only the final snapshot [default: 0]
    #[arg(short = 'p', long = "resultsperiod", value_name = "SECS")]
    pub results_period: Option<f64>,

    /// Write the workload graph in DOT format to FILE and exit without running it
    #[arg(short = 'd', long = "dotfile", value_name = "FILE")]
    pub dotfile: Option<PathBuf>,

    /// Log level: trace, debug, info, warning, error or fatal
    #[arg(short = 'l', long = "loglevel", default_value = "info", value_name = "LEVEL")]
    pub log_level: String,

    /// TOML file with run overrides
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Print version
    #[arg(short = 'v', long, action = clap::ArgAction::Version)]
    pub version: Option<bool>,
}

impl Cli {
    /// Run parameters given on the command line
    pub fn overrides(&self) -> RunOverrides {
        RunOverrides {
            threads: self.num_threads,
            run_length_ms: self.run_length_ms,
            iterations: self.iterations,
            database: self.database.clone(),
            collection: self.collection.clone(),
            uri: self.host.clone(),
            seed: self.seed,
            on_failure: self.on_failure,
            restart: self.restart,
            results: ResultsOverrides {
                path: self.results_file.clone(),
                period_secs: self.results_period,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("loadgraph").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_positional_defaults() {
        let cli = parse(&[]);
        assert!(cli.workload_file.is_none());
        assert_eq!(cli.workload_name, "main");
        assert_eq!(cli.log_level, "info");
        assert_eq!(cli.overrides(), RunOverrides::default());

        let cli = parse(&["bench.yml", "inserts"]);
        assert_eq!(cli.workload_file, Some(PathBuf::from("bench.yml")));
        assert_eq!(cli.workload_name, "inserts");
    }

    #[test]
    fn test_run_flags_and_aliases() {
        let cli = parse(&[
            "w.yml",
            "--numThreads",
            "8",
            "--runLengthMS",
            "1500",
            "--uri",
            "mock://",
            "-r",
            "out.json",
            "-p",
            "0.5",
            "--on-failure",
            "terminate",
            "--restart",
            "never",
        ]);
        let overrides = cli.overrides();
        assert_eq!(overrides.threads, Some(8));
        assert_eq!(overrides.run_length_ms, Some(1500));
        assert_eq!(overrides.uri.as_deref(), Some("mock://"));
        assert_eq!(overrides.results.path, Some(PathBuf::from("out.json")));
        assert_eq!(overrides.results.period_secs, Some(0.5));
        assert_eq!(overrides.on_failure, Some(FailureAction::Terminate));
        assert_eq!(overrides.restart, Some(RestartPolicy::Never));
    }

    #[test]
    fn test_dotfile_and_loglevel() {
        let cli = parse(&["w.yml", "-d", "graph.dot", "-l", "debug"]);
        assert_eq!(cli.dotfile, Some(PathBuf::from("graph.dot")));
        assert_eq!(cli.log_level, "debug");
    }

    #[test]
    fn test_version_flag() {
        let err = Cli::try_parse_from(["loadgraph", "-v"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }
}
