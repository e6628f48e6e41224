//! `apply-sql` subcommand: apply a previously written deferred-mode SQL
//! export file against the target database.

use std::path::PathBuf;

use clap::Args;

use crate::config::RunConfig;
use crate::error::Result;
use crate::target::PostgresTargetStore;

#[derive(Debug, Args)]
pub struct ApplySqlArgs {
    /// Path to a `sql_exports/<table>_import.sql` file.
    pub file: PathBuf,
}

/// Execute the `apply-sql` subcommand.
///
/// # Errors
///
/// Propagates a configuration or target connection error. Individual
/// statement failures within the file are logged and counted, not
/// propagated.
pub async fn execute(args: ApplySqlArgs) -> Result<()> {
    let config = RunConfig::from_env()?;
    let conninfo = format!(
        "host={} port={} dbname={} user={} password={}",
        config.target.host, config.target.port, config.target.database, config.target.user, config.target.password
    );
    let mut target = PostgresTargetStore::connect(&conninfo, true, config.import_by_batch, config.secrets()).await?;

    let applied = target.execute_sql_file(&args.file).await?;
    println!("applied {applied} statement(s) from {}", args.file.display());
    Ok(())
}
