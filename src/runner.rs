//! Runner (C8): acquires handles, reconciles schema, then walks every
//! table in dependency order resolving its watermark, running its
//! strategy, and folding the result into a run-level summary.

use std::collections::HashMap;

use crate::config::RunConfig;
use crate::error::Result;
use crate::registry::Registry;
use crate::source::MongoSourceStore;
use crate::strategy::{ImportConfig, ImportStrategy};
use crate::summary::ImportSummary;
use crate::target::PostgresTargetStore;
use crate::watermark::{apply_global_threshold, last_watermark, truncate_before_import};

/// Run one full migration: reconcile, then process every registered
/// table in `export_order`. Returns the run-level summary regardless of
/// per-table failures (a table-scoped error is logged and the run moves
/// on; only a run-scoped error aborts early).
///
/// # Errors
///
/// Returns a run-scoped `MigrationError` (connection failure, blocked
/// reconciliation, operator interrupt) without attempting any table.
pub async fn run_migration(
    config: &RunConfig,
    registry: &Registry,
    strategies: &HashMap<String, Box<dyn ImportStrategy>>,
) -> Result<ImportSummary> {
    let source = MongoSourceStore::connect(&config.source.url, &config.source.database).await?;
    let mut target = PostgresTargetStore::connect(
        &target_conn_string(config),
        config.direct_import,
        config.import_by_batch,
        config.secrets(),
    )
    .await?;

    crate::reconcile::reconcile_all(&mut target, registry).await?;

    if let Some(threshold) = config.global_date_threshold {
        tracing::info!(%threshold, "global date threshold active");
    }

    let mut run_summary = ImportSummary::new();

    for schema in registry.ordered() {
        tracing::info!(table = %schema.name, "processing table");

        let Some(strategy) = strategies.get(&schema.name) else {
            tracing::warn!(table = %schema.name, "no strategy registered, skipping");
            continue;
        };

        let after_date = if schema.force_reimport {
            tracing::info!(table = %schema.name, "force reimport enabled");
            if schema.truncate_before_import {
                truncate_before_import(&target, &schema.name).await?;
            }
            None
        } else {
            let table_last_date = last_watermark(&target, &schema.name).await?;
            apply_global_threshold(table_last_date, config.global_date_threshold)
        };

        let import_config = ImportConfig {
            table_name: schema.name.clone(),
            source_collection: schema.source_collection.clone(),
            batch_size: 5000,
            after_date,
        };

        let mut table_summary = ImportSummary::new();
        match strategy
            .export_data(&source, &mut target, schema, &import_config, &mut table_summary)
            .await
        {
            Ok(count) => {
                tracing::info!(table = %schema.name, count, "table complete");
            }
            Err(error) if error.is_table_scoped() => {
                tracing::error!(table = %schema.name, %error, "table failed, continuing run");
            }
            Err(error) => return Err(error),
        }

        run_summary.merge(&table_summary);
    }

    tracing::info!("migration completed");
    Ok(run_summary)
}

fn target_conn_string(config: &RunConfig) -> String {
    format!(
        "host={} port={} dbname={} user={} password={}",
        config.target.host, config.target.port, config.target.database, config.target.user, config.target.password
    )
}
