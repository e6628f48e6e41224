//! `plan` subcommand: print the schema reconciliation plan without
//! applying it; a read-only preview of what `run` would ask the
//! operator to confirm.

use std::path::Path;

use clap::Args;

use crate::config::RunConfig;
use crate::error::Result;
use crate::reconcile::{compare_table_schema, current_table_columns, generate_alter_statements};
use crate::target::PostgresTargetStore;

use super::load_registry;

#[derive(Debug, Args)]
pub struct PlanArgs;

/// Execute the `plan` subcommand.
///
/// # Errors
///
/// Propagates a target connection or introspection error.
pub async fn execute(_args: PlanArgs, registry_path: &Path) -> Result<()> {
    let registry = load_registry(registry_path)?;
    let config = RunConfig::from_env()?;
    let conninfo = format!(
        "host={} port={} dbname={} user={} password={}",
        config.target.host, config.target.port, config.target.database, config.target.user, config.target.password
    );
    let target =
        PostgresTargetStore::connect(&conninfo, config.direct_import, config.import_by_batch, config.secrets())
            .await?;

    let mut any_changes = false;
    for schema in registry.ordered() {
        let current = current_table_columns(&target, &schema.name).await?;
        if current.is_empty() {
            println!("[{}] table does not exist, would CREATE TABLE", schema.name);
            any_changes = true;
            continue;
        }

        let diff = compare_table_schema(&target, schema).await?;
        if !diff.needs_update() {
            println!("[{}] up to date", schema.name);
            continue;
        }

        any_changes = true;
        let (statements, errors) = generate_alter_statements(&target, &schema.name, &diff).await?;
        for statement in &statements {
            println!("[{}] {statement}", schema.name);
        }
        for error in &errors {
            println!("[{}] BLOCKED: {}", schema.name, error.message);
        }
    }

    if !any_changes {
        println!("schema is fully up to date, nothing to plan");
    }
    Ok(())
}
