//! Variant A: 1:1 collection-to-table translation.

use async_trait::async_trait;

use crate::error::Result;
use crate::registry::TableSchema;
use crate::source::{SourceStore, build_date_filter};
use crate::summary::ImportSummary;
use crate::target::TargetStore;
use crate::value::{Document, Value};

use super::{ExtractOutcome, ImportConfig, ImportStrategy, run_batch_template};

/// 1:1 document-to-row translation via `schema.field_mappings`. The
/// default strategy for any table with no array semantics.
pub struct DirectTranslationStrategy {
    schema: TableSchema,
}

impl DirectTranslationStrategy {
    #[must_use]
    pub const fn new(schema: TableSchema) -> Self {
        Self { schema }
    }
}

#[async_trait]
impl ImportStrategy for DirectTranslationStrategy {
    async fn count_total_documents(&self, source: &dyn SourceStore, config: &ImportConfig) -> Result<u64> {
        let filter = build_date_filter(config.after_date);
        source.count(&config.source_collection, &filter).await
    }

    async fn get_documents(
        &self,
        source: &dyn SourceStore,
        config: &ImportConfig,
        offset: u64,
    ) -> Result<Vec<Document>> {
        let filter = build_date_filter(config.after_date);
        source
            .find(&config.source_collection, &filter, None, None, offset, config.batch_size as i64)
            .await
    }

    async fn extract_data_for_sql(
        &self,
        _source: &dyn SourceStore,
        document: &Document,
        _config: &ImportConfig,
        _summary: &mut ImportSummary,
    ) -> Result<ExtractOutcome> {
        let mut columns = Vec::with_capacity(self.schema.field_mappings.len());
        let mut values = Vec::with_capacity(self.schema.field_mappings.len());

        for (source_field, target_column) in &self.schema.field_mappings {
            columns.push(target_column.clone());
            let value = if source_field == "_id" {
                document
                    .get("_id")
                    .and_then(Value::as_id_string)
                    .map_or(Value::Null, Value::Id)
            } else {
                document.get(source_field).cloned().unwrap_or(Value::Null)
            };
            values.push(value);
        }

        Ok(ExtractOutcome::Rows { columns, rows: vec![values] })
    }

    fn get_use_on_conflict(&self) -> bool {
        true
    }

    fn get_on_conflict_clause(&self, schema: &TableSchema, columns: &[String]) -> String {
        schema.get_on_conflict_clause(columns)
    }

    async fn export_data(
        &self,
        source: &dyn SourceStore,
        target: &mut dyn TargetStore,
        schema: &TableSchema,
        config: &ImportConfig,
        summary: &mut ImportSummary,
    ) -> Result<u64> {
        run_batch_template(self, source, target, schema, config, summary).await
    }
}
