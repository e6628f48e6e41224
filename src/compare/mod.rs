//! Database comparator (C10): cross-store identifier reconciliation
//! outside the migration path itself: a standalone audit of whether
//! every source identifier has a counterpart on the target.
//!
//! Grounded in `check_db_differences.py::DatabaseComparator`: fetch every
//! identifier from both sides, set-difference in both directions, report.
//! Tables compare in `export_order`, matching the original's ordering so
//! a parent table's diff is always printed before the children that
//! depend on it.

use std::collections::BTreeSet;

use crate::error::Result;
use crate::registry::{Registry, TableSchema};
use crate::source::SourceStore;
use crate::target::PostgresTargetStore;

/// Outcome of comparing one table's identifier set against its source
/// collection.
#[derive(Debug, Clone)]
pub struct ComparisonResult {
    pub table: String,
    pub collection: String,
    pub source_count: usize,
    pub target_count: usize,
    pub missing_in_target: BTreeSet<String>,
    pub extra_in_target: BTreeSet<String>,
}

impl ComparisonResult {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.missing_in_target.is_empty() && self.extra_in_target.is_empty()
    }
}

/// All `_id` values in `collection`, stringified to their canonical form.
///
/// # Errors
///
/// Propagates the underlying source store error.
async fn source_ids(source: &dyn SourceStore, collection: &str) -> Result<BTreeSet<String>> {
    let filter = bson::doc! {};
    let projection = bson::doc! { "_id": 1 };
    let documents = source.find(collection, &filter, Some(&projection), None, 0, i64::MAX).await?;
    Ok(documents
        .into_iter()
        .filter_map(|doc| doc.get("_id").and_then(crate::value::Value::as_id_string))
        .collect())
}

/// All `id` values currently in `table`.
///
/// # Errors
///
/// Propagates the underlying Postgres error.
async fn target_ids(target: &PostgresTargetStore, table: &str) -> Result<BTreeSet<String>> {
    let rows = target.client().query(&format!("SELECT id FROM {table}"), &[]).await?;
    Ok(rows.into_iter().map(|row| row.get::<_, String>(0)).collect())
}

/// Compare one table's identifiers against its source collection.
///
/// # Errors
///
/// Propagates the underlying source or target store error.
pub async fn diff_identifiers(
    source: &dyn SourceStore,
    target: &PostgresTargetStore,
    schema: &TableSchema,
) -> Result<ComparisonResult> {
    let source_set = source_ids(source, &schema.source_collection).await?;
    let target_set = target_ids(target, &schema.name).await?;

    let missing_in_target: BTreeSet<String> = source_set.difference(&target_set).cloned().collect();
    let extra_in_target: BTreeSet<String> = target_set.difference(&source_set).cloned().collect();

    Ok(ComparisonResult {
        table: schema.name.clone(),
        collection: schema.source_collection.clone(),
        source_count: source_set.len(),
        target_count: target_set.len(),
        missing_in_target,
        extra_in_target,
    })
}

/// Compare every registered table, in `export_order`.
///
/// # Errors
///
/// Propagates the first comparison's error; later tables are not
/// attempted once one fails.
pub async fn diff_all(
    source: &dyn SourceStore,
    target: &PostgresTargetStore,
    registry: &Registry,
) -> Result<Vec<ComparisonResult>> {
    let mut results = Vec::new();
    for schema in registry.ordered() {
        results.push(diff_identifiers(source, target, schema).await?);
    }
    Ok(results)
}

/// Render a one-line-per-table summary table, `OK` or `DIFF` per row,
/// mirroring `print_summary`'s tabular report.
#[must_use]
pub fn render_summary(results: &[ComparisonResult]) -> String {
    let mut table = comfy_table::Table::new();
    table.set_header(vec!["table", "source", "target", "missing", "extra", "status"]);
    for result in results {
        table.add_row(vec![
            result.table.clone(),
            result.source_count.to_string(),
            result.target_count.to_string(),
            result.missing_in_target.len().to_string(),
            result.extra_in_target.len().to_string(),
            if result.is_ok() { "OK".to_string() } else { "DIFF".to_string() },
        ]);
    }
    table.to_string()
}
