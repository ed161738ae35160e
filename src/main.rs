//! loadgraph CLI entry point

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use loadgraph::config::cli::Cli;
use loadgraph::config::toml::parse_toml_file;
use loadgraph::config::RunOverrides;
use loadgraph::logging::init_logging;
use loadgraph::output::text::print_results;
use loadgraph::{DescriptionSet, Workload};
use std::path::Path;
use std::process::ExitCode;
use tracing::{error, info};

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init_logging(&cli.log_level) {
        eprintln!("Error: {}", err);
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let Some(file) = cli.workload_file.as_deref() else {
        Cli::command().print_help().context("Failed to print help")?;
        return Ok(());
    };

    let set = DescriptionSet::load(file)?;
    let workload = Workload::from_description(&set, &cli.workload_name)?;

    if let Some(dotfile) = &cli.dotfile {
        workload
            .write_graph_description(dotfile)
            .context("Graph export failed")?;
        info!("Wrote graph of `{}` to {}", workload.name(), dotfile.display());
        return Ok(());
    }

    let mut state = workload.new_execution_state();
    let file_overrides = match &cli.config {
        Some(path) => load_overrides(path)?,
        None => RunOverrides::default(),
    };
    file_overrides
        .merged_with(cli.overrides())
        .apply(&mut state)
        .context("Invalid run configuration")?;

    println!("loadgraph v{}", env!("CARGO_PKG_VERSION"));
    println!(
        "Workload: {} ({} nodes) from {}",
        workload.name(),
        workload.graph().len(),
        file.display()
    );
    println!("Config:   {}", state);
    println!();

    let report = workload.execute(&state)?;
    print_results(&report);
    Ok(())
}

fn load_overrides(path: &Path) -> Result<RunOverrides> {
    let overrides = parse_toml_file(path)?;
    info!("Loaded run overrides from {}", path.display());
    Ok(overrides)
}
