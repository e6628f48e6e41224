//! `mirror-analytics` subcommand: mirror every table declared in an
//! analytics schema file into the target database.

use std::path::PathBuf;

use clap::Args;

use crate::analytics::{PostgresAnalyticsSource, load_schemas, mirror_table};
use crate::config::RunConfig;
use crate::error::{MigrationError, Result};
use crate::target::PostgresTargetStore;

#[derive(Debug, Args)]
pub struct MirrorAnalyticsArgs {
    /// Path to the analytics schema YAML file.
    #[arg(long, env = "RELSYNC_ANALYTICS_SCHEMA", default_value = "analytics_schema.yaml")]
    pub schema: PathBuf,

    /// Connection string for the analytics source (`tokio-postgres`
    /// libpq format).
    #[arg(long, env = "ANALYTICS_SOURCE_CONNINFO")]
    pub source_conninfo: String,

    #[arg(long, default_value_t = 5000)]
    pub batch_size: u64,
}

/// Execute the `mirror-analytics` subcommand.
///
/// # Errors
///
/// Propagates a configuration, source, or target store error.
pub async fn execute(args: MirrorAnalyticsArgs) -> Result<()> {
    let config = RunConfig::from_env()?;
    let conninfo = format!(
        "host={} port={} dbname={} user={} password={}",
        config.target.host, config.target.port, config.target.database, config.target.user, config.target.password
    );
    let mut target =
        PostgresTargetStore::connect(&conninfo, config.direct_import, config.import_by_batch, config.secrets())
            .await?;
    let source = PostgresAnalyticsSource::connect(&args.source_conninfo).await?;

    let yaml = std::fs::read_to_string(&args.schema)
        .map_err(|e| MigrationError::Config(format!("cannot read analytics schema file {}: {e}", args.schema.display())))?;
    let schemas = load_schemas(&yaml)?;

    let mut total = 0u64;
    for schema in &schemas {
        let mirrored = mirror_table(&source, &mut target, schema, args.batch_size).await?;
        println!("[{}] mirrored {mirrored} row(s)", schema.target_table);
        total += mirrored;
    }
    println!("mirrored {total} row(s) across {} table(s)", schemas.len());
    Ok(())
}
