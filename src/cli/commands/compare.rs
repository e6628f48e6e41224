//! `compare` subcommand: audit source/target identifier sets without
//! migrating anything.

use std::path::Path;

use clap::Args;

use crate::compare::{diff_all, render_summary};
use crate::config::RunConfig;
use crate::error::Result;
use crate::source::MongoSourceStore;
use crate::target::PostgresTargetStore;

use super::load_registry;

#[derive(Debug, Args)]
pub struct CompareArgs {
    /// List every missing/extra identifier, not just the per-table
    /// counts.
    #[arg(long)]
    pub verbose: bool,
}

/// Execute the `compare` subcommand.
///
/// # Errors
///
/// Propagates a source or target connection error.
pub async fn execute(args: CompareArgs, registry_path: &Path) -> Result<()> {
    let registry = load_registry(registry_path)?;
    let config = RunConfig::from_env()?;

    let source = MongoSourceStore::connect(&config.source.url, &config.source.database).await?;
    let conninfo = format!(
        "host={} port={} dbname={} user={} password={}",
        config.target.host, config.target.port, config.target.database, config.target.user, config.target.password
    );
    let target =
        PostgresTargetStore::connect(&conninfo, config.direct_import, config.import_by_batch, config.secrets())
            .await?;

    let results = diff_all(&source, &target, &registry).await?;
    println!("{}", render_summary(&results));

    if args.verbose {
        for result in &results {
            if result.is_ok() {
                continue;
            }
            if !result.missing_in_target.is_empty() {
                println!("[{}] missing in target: {:?}", result.table, result.missing_in_target);
            }
            if !result.extra_in_target.is_empty() {
                println!("[{}] extra in target: {:?}", result.table, result.extra_in_target);
            }
        }
    }

    Ok(())
}
