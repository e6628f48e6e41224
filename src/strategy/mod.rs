//! Strategy framework (C4): the per-table glue between reader and writer.
//!
//! Four variants share one trait but not one template method; C and D's
//! control flow (delete-then-insert per batch, or read-diff-then-write
//! per parent) has no common shape with A/B's extract-then-batch-insert
//! loop, so each variant implements `export_data` in full rather than
//! overriding pieces of a shared default.

pub mod array_extraction;
pub mod delete_and_insert;
pub mod direct;
pub mod smart_diff;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::Result;
use crate::registry::TableSchema;
use crate::source::SourceStore;
use crate::summary::ImportSummary;
use crate::target::TargetStore;
use crate::value::{Document, Value};

pub use array_extraction::{ArrayExtractionConfig, ArrayExtractionStrategy};
pub use delete_and_insert::{DeleteAndInsertConfig, DeleteAndInsertStrategy};
pub use direct::DirectTranslationStrategy;
pub use smart_diff::{SmartDiffConfig, SmartDiffStrategy};

/// Which of the four template-method variants a table uses. The tag
/// alone is not enough to build a working strategy (array field names,
/// child collections, discriminators are all table-specific); it
/// selects which concrete type the wiring code constructs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    DirectTranslation,
    ArrayExtraction,
    DeleteAndInsert,
    SmartDiff,
}

/// Per-run configuration a strategy needs beyond its own fixed wiring.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub table_name: String,
    pub source_collection: String,
    pub batch_size: u64,
    pub after_date: Option<DateTime<Utc>>,
}

/// One extracted document's contribution to the target table.
#[derive(Debug, Clone)]
pub enum ExtractOutcome {
    /// The document is filtered out or has nothing to contribute.
    Skip,
    Rows {
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    },
}

#[async_trait]
pub trait ImportStrategy: Send + Sync {
    async fn count_total_documents(&self, source: &dyn SourceStore, config: &ImportConfig) -> Result<u64>;

    async fn get_documents(
        &self,
        source: &dyn SourceStore,
        config: &ImportConfig,
        offset: u64,
    ) -> Result<Vec<Document>>;

    async fn extract_data_for_sql(
        &self,
        source: &dyn SourceStore,
        document: &Document,
        config: &ImportConfig,
        summary: &mut ImportSummary,
    ) -> Result<ExtractOutcome>;

    fn get_use_on_conflict(&self) -> bool;

    fn get_on_conflict_clause(&self, schema: &TableSchema, columns: &[String]) -> String;

    fn get_progress_message(&self, processed: u64, total: u64, table: &str) -> String {
        format!("Processed {processed}/{total} documents for {table}")
    }

    async fn export_data(
        &self,
        source: &dyn SourceStore,
        target: &mut dyn TargetStore,
        schema: &TableSchema,
        config: &ImportConfig,
        summary: &mut ImportSummary,
    ) -> Result<u64>;
}

/// Shared skip/limit iteration, used by variants A and B: their only
/// structural difference is what `extract_data_for_sql` returns per
/// document (one row vs. several), not how batches are walked or
/// flushed.
pub(crate) async fn run_batch_template(
    strategy: &(dyn ImportStrategy),
    source: &dyn SourceStore,
    target: &mut dyn TargetStore,
    schema: &TableSchema,
    config: &ImportConfig,
    summary: &mut ImportSummary,
) -> Result<u64> {
    let total = strategy.count_total_documents(source, config).await?;
    let mut processed = 0u64;
    let mut offset = 0u64;

    loop {
        let documents = strategy.get_documents(source, config, offset).await?;
        if documents.is_empty() {
            break;
        }
        let batch_len = documents.len() as u64;

        let mut columns: Option<Vec<String>> = None;
        let mut batch_rows: Vec<Vec<Value>> = Vec::new();

        for document in &documents {
            match strategy.extract_data_for_sql(source, document, config, summary).await? {
                ExtractOutcome::Skip => {}
                ExtractOutcome::Rows { columns: row_columns, rows } => {
                    if columns.is_none() {
                        columns = Some(row_columns);
                    }
                    batch_rows.extend(rows);
                }
            }
        }

        if let Some(columns) = &columns {
            if !batch_rows.is_empty() {
                let clause = strategy.get_on_conflict_clause(schema, columns);
                let inserted = target
                    .execute_batch(
                        &schema.name,
                        columns,
                        &batch_rows,
                        strategy.get_use_on_conflict(),
                        &clause,
                        summary,
                    )
                    .await?;
                processed += inserted;
            }
        }

        tracing::info!("{}", strategy.get_progress_message(processed, total, &schema.name));

        offset += config.batch_size;
        if batch_len < config.batch_size {
            break;
        }
    }

    Ok(processed)
}
