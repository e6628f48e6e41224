//! `run` subcommand: execute a full incremental migration.

use std::path::Path;
use std::time::Duration;

use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::RunConfig;
use crate::error::Result;

use super::{build_strategies, load_registry};

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Print the table processing order and exit without touching either
    /// store.
    #[arg(long)]
    pub dry_run: bool,
}

/// Execute the `run` subcommand.
///
/// # Errors
///
/// Propagates a run-scoped `MigrationError` from configuration loading,
/// registry parsing, or the migration itself.
pub async fn execute(args: RunArgs, registry_path: &Path) -> Result<()> {
    let registry = load_registry(registry_path)?;

    if args.dry_run {
        println!("would process {} table(s) in this order:", registry.ordered().len());
        for schema in registry.ordered() {
            println!("  [{:>3}] {}", schema.export_order, schema.name);
        }
        return Ok(());
    }

    let config = RunConfig::from_env()?;
    let strategies = build_strategies(&registry);

    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {elapsed_precise} {msg}") {
        spinner.set_style(style);
    }
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner.set_message("running migration");

    let result = crate::runner::run_migration(&config, &registry, &strategies).await;

    match &result {
        Ok(summary) => {
            spinner.finish_with_message("migration complete");
            println!("{}", summary.render());
        }
        Err(error) => spinner.abandon_with_message(format!("migration failed: {error}")),
    }

    result.map(|_| ())
}
