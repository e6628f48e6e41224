//! Variant C: relationship tables whose source truth is a mutable array
//! on a parent document, where upserts cannot express element removal.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::registry::TableSchema;
use crate::source::SourceStore;
use crate::summary::ImportSummary;
use crate::target::TargetStore;
use crate::value::{Document, Value};

use super::{ExtractOutcome, ImportConfig, ImportStrategy};

/// Fixed per-table wiring: the parent filter, how to read a parent's id
/// and its full current row set, and which table/column the delete
/// targets.
pub struct DeleteAndInsertConfig {
    pub filter_builder: Box<dyn Fn(Option<DateTime<Utc>>) -> bson::Document + Send + Sync>,
    pub columns: Vec<String>,
    pub parent_id: Box<dyn Fn(&Document) -> String + Send + Sync>,
    pub extract_rows: Box<dyn Fn(&str, &Document) -> Vec<Vec<Value>> + Send + Sync>,
    pub delete_table: String,
    pub delete_column: String,
}

pub struct DeleteAndInsertStrategy {
    config: DeleteAndInsertConfig,
}

impl DeleteAndInsertStrategy {
    #[must_use]
    pub fn new(config: DeleteAndInsertConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ImportStrategy for DeleteAndInsertStrategy {
    async fn count_total_documents(&self, source: &dyn SourceStore, config: &ImportConfig) -> Result<u64> {
        let filter = (self.config.filter_builder)(config.after_date);
        source.count(&config.source_collection, &filter).await
    }

    async fn get_documents(
        &self,
        source: &dyn SourceStore,
        config: &ImportConfig,
        offset: u64,
    ) -> Result<Vec<Document>> {
        let filter = (self.config.filter_builder)(config.after_date);
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
        let parent_id = (self.config.parent_id)(document);
        let rows = (self.config.extract_rows)(&parent_id, document);
        if rows.is_empty() {
            Ok(ExtractOutcome::Skip)
        } else {
            Ok(ExtractOutcome::Rows { columns: self.config.columns.clone(), rows })
        }
    }

    fn get_use_on_conflict(&self) -> bool {
        false
    }

    fn get_on_conflict_clause(&self, _schema: &TableSchema, _columns: &[String]) -> String {
        String::new()
    }

    /// Per batch: fetch parents, transform each to its full current row
    /// set, delete every prior row for the batch's parent ids, insert
    /// the fresh set. The delete and the insert are each their own
    /// top-level transaction rather than one combined transaction; see
    /// the design notes on why a single savepoint-scoped transaction
    /// isn't used here.
    async fn export_data(
        &self,
        source: &dyn SourceStore,
        target: &mut dyn TargetStore,
        schema: &TableSchema,
        config: &ImportConfig,
        summary: &mut ImportSummary,
    ) -> Result<u64> {
        let total = self.count_total_documents(source, config).await?;
        let mut processed = 0u64;
        let mut total_children = 0u64;
        let mut offset = 0u64;

        loop {
            let parents = self.get_documents(source, config, offset).await?;
            if parents.is_empty() {
                break;
            }
            let batch_len = parents.len() as u64;

            let mut parent_ids: Vec<String> = Vec::with_capacity(parents.len());
            let mut batch_rows: Vec<Vec<Value>> = Vec::new();

            for parent in &parents {
                let parent_id = (self.config.parent_id)(parent);
                let rows = (self.config.extract_rows)(&parent_id, parent);
                parent_ids.push(parent_id);
                batch_rows.extend(rows);
            }

            target
                .delete_by_parent_ids(&self.config.delete_table, &self.config.delete_column, &parent_ids)
                .await?;

            if !batch_rows.is_empty() {
                let inserted = target
                    .execute_batch(&self.config.delete_table, &self.config.columns, &batch_rows, false, "", summary)
                    .await?;
                total_children += inserted;
            }

            processed += batch_len;
            tracing::info!(
                "Processed {processed}/{total} {}, {total_children} {}",
                config.source_collection,
                schema.name
            );

            offset += config.batch_size;
            if batch_len < config.batch_size {
                break;
            }
        }

        Ok(total_children)
    }
}
