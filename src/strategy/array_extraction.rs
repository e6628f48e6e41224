//! Variant B: tables derived from a named array field on parent
//! documents, dereferencing into a second collection.

use std::collections::HashMap;

use async_trait::async_trait;
use bson::Bson;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::registry::TableSchema;
use crate::source::{SourceStore, build_date_filter, merge_filters};
use crate::summary::ImportSummary;
use crate::target::TargetStore;
use crate::value::{Document, Value};

use super::{ExtractOutcome, ImportConfig, ImportStrategy, run_batch_template};

/// Fixed per-table wiring: which array field names the children, which
/// collection (if any) they dereference into, the output column names,
/// and how a `(parent_id, child)` pair becomes a row.
pub struct ArrayExtractionConfig {
    pub array_field: String,
    pub child_collection: Option<String>,
    pub sql_columns: Vec<String>,
    pub transformer: Box<dyn Fn(&str, &Document) -> Vec<Value> + Send + Sync>,
}

impl ArrayExtractionConfig {
    /// `[child_id, parent_id, child.creation_date, child.update_date]`:
    /// the shape every array-extraction table uses unless it needs extra
    /// columns.
    #[must_use]
    pub fn default_transform(parent_id: &str, child: &Document) -> Vec<Value> {
        vec![
            child.get("_id").and_then(Value::as_id_string).map_or(Value::Null, Value::Id),
            Value::Id(parent_id.to_string()),
            child.get("creation_date").cloned().unwrap_or(Value::Null),
            child.get("update_date").cloned().unwrap_or(Value::Null),
        ]
    }
}

pub struct ArrayExtractionStrategy {
    config: ArrayExtractionConfig,
}

impl ArrayExtractionStrategy {
    #[must_use]
    pub fn new(config: ArrayExtractionConfig) -> Self {
        Self { config }
    }

    fn parent_filter(&self, after_date: Option<DateTime<Utc>>) -> bson::Document {
        let base = bson::doc! { self.config.array_field.clone(): { "$exists": true, "$ne": [] } };
        merge_filters(base, build_date_filter(after_date))
    }
}

#[async_trait]
impl ImportStrategy for ArrayExtractionStrategy {
    async fn count_total_documents(&self, source: &dyn SourceStore, config: &ImportConfig) -> Result<u64> {
        let filter = self.parent_filter(config.after_date);
        source.count(&config.source_collection, &filter).await
    }

    async fn get_documents(
        &self,
        source: &dyn SourceStore,
        config: &ImportConfig,
        offset: u64,
    ) -> Result<Vec<Document>> {
        let filter = self.parent_filter(config.after_date);
        source
            .find(&config.source_collection, &filter, None, None, offset, config.batch_size as i64)
            .await
    }

    async fn extract_data_for_sql(
        &self,
        source: &dyn SourceStore,
        document: &Document,
        config: &ImportConfig,
        summary: &mut ImportSummary,
    ) -> Result<ExtractOutcome> {
        let parent_id = document.get("_id").and_then(Value::as_id_string).unwrap_or_default();

        let Some(Value::List(children)) = document.get(&self.config.array_field) else {
            return Ok(ExtractOutcome::Skip);
        };
        if children.is_empty() {
            return Ok(ExtractOutcome::Skip);
        }

        let child_ids: Vec<String> = children.iter().filter_map(Value::as_id_string).collect();
        let mut rows = Vec::with_capacity(child_ids.len());

        if let Some(child_collection) = &self.config.child_collection {
            let bson_ids: Vec<Bson> = child_ids
                .iter()
                .map(|id| {
                    bson::oid::ObjectId::parse_str(id)
                        .map_or_else(|_| Bson::String(id.clone()), Bson::ObjectId)
                })
                .collect();
            let fetched = source.find_by_ids(child_collection, &bson_ids, None).await?;
            let by_id: HashMap<String, &Document> = fetched
                .iter()
                .filter_map(|doc| doc.get("_id").and_then(Value::as_id_string).map(|id| (id, doc)))
                .collect();

            for id in &child_ids {
                if let Some(child_doc) = by_id.get(id) {
                    rows.push((self.config.transformer)(&parent_id, child_doc));
                } else {
                    summary.record_error(
                        &config.table_name,
                        "Child document not found",
                        id,
                        &format!("parent_id={parent_id}"),
                    );
                }
            }
        } else {
            // Array elements are embedded identifiers with no second
            // collection to dereference; the transformer runs against a
            // one-field stand-in document.
            for id in &child_ids {
                let mut stand_in = Document::new();
                stand_in.insert("_id".to_string(), Value::Id(id.clone()));
                rows.push((self.config.transformer)(&parent_id, &stand_in));
            }
        }

        if rows.is_empty() {
            Ok(ExtractOutcome::Skip)
        } else {
            Ok(ExtractOutcome::Rows { columns: self.config.sql_columns.clone(), rows })
        }
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
