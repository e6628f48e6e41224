//! In-memory `SourceStore`/`TargetStore` fakes shared by the integration
//! suite, so scenario tests exercise the strategy framework without a live
//! Mongo or Postgres connection.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use bson::{Bson, Document as BsonDocument};

use relsync::error::Result;
use relsync::source::SourceStore;
use relsync::summary::ImportSummary;
use relsync::target::TargetStore;
use relsync::value::{Document, Value, document_from_bson};

/// A document store backed by a plain map of collection name to documents,
/// filtered with a small interpreter covering the operators this crate's
/// strategies actually emit (`$or`, `$exists`, `$ne`, `$gte`).
pub struct FakeSourceStore {
    collections: HashMap<String, Vec<BsonDocument>>,
}

impl FakeSourceStore {
    #[must_use]
    pub fn new() -> Self {
        Self { collections: HashMap::new() }
    }

    #[must_use]
    pub fn with(mut self, collection: &str, docs: Vec<BsonDocument>) -> Self {
        self.collections.insert(collection.to_string(), docs);
        self
    }

    fn matching(&self, collection: &str, filter: &BsonDocument) -> Vec<BsonDocument> {
        self.collections
            .get(collection)
            .map(|docs| docs.iter().filter(|doc| matches_filter(doc, filter)).cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for FakeSourceStore {
    fn default() -> Self {
        Self::new()
    }
}

fn matches_filter(doc: &BsonDocument, filter: &BsonDocument) -> bool {
    filter.iter().all(|(key, criteria)| {
        if key == "$or" {
            let Some(clauses) = criteria.as_array() else { return false };
            return clauses.iter().any(|clause| clause.as_document().is_some_and(|sub| matches_filter(doc, sub)));
        }
        matches_field(doc.get(key), criteria)
    })
}

fn matches_field(field: Option<&Bson>, criteria: &Bson) -> bool {
    let Some(ops) = criteria.as_document() else {
        return field == Some(criteria);
    };
    if !ops.keys().any(|k| k.starts_with('$')) {
        return field == Some(criteria);
    }
    ops.iter().all(|(op, operand)| match op.as_str() {
        "$exists" => field.is_some() == operand.as_bool().unwrap_or(true),
        "$ne" => field.is_none_or(|f| f != operand),
        "$gte" => field.is_some_and(|f| compare_bson(f, operand) != std::cmp::Ordering::Less),
        _ => true,
    })
}

fn compare_bson(a: &Bson, b: &Bson) -> std::cmp::Ordering {
    match (a, b) {
        (Bson::DateTime(x), Bson::DateTime(y)) => x.cmp(y),
        (Bson::Int32(x), Bson::Int32(y)) => x.cmp(y),
        (Bson::Int64(x), Bson::Int64(y)) => x.cmp(y),
        (Bson::Double(x), Bson::Double(y)) => x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal),
        _ => std::cmp::Ordering::Equal,
    }
}

#[async_trait]
impl SourceStore for FakeSourceStore {
    async fn count(&self, collection: &str, filter: &BsonDocument) -> Result<u64> {
        Ok(self.matching(collection, filter).len() as u64)
    }

    async fn find(
        &self,
        collection: &str,
        filter: &BsonDocument,
        _projection: Option<&BsonDocument>,
        _sort: Option<&BsonDocument>,
        skip: u64,
        limit: i64,
    ) -> Result<Vec<Document>> {
        let mut matched = self.matching(collection, filter);
        matched.sort_by_key(|doc| doc.get_datetime("creation_date").ok().copied());

        let skip = skip as usize;
        if skip >= matched.len() {
            return Ok(Vec::new());
        }
        let end = if limit < 0 { matched.len() } else { (skip + limit as usize).min(matched.len()) };
        Ok(matched[skip..end].iter().cloned().map(document_from_bson).collect())
    }

    async fn find_by_ids(
        &self,
        collection: &str,
        ids: &[Bson],
        _projection: Option<&BsonDocument>,
    ) -> Result<Vec<Document>> {
        Ok(self
            .collections
            .get(collection)
            .into_iter()
            .flatten()
            .filter(|doc| doc.get("_id").is_some_and(|id| ids.contains(id)))
            .cloned()
            .map(document_from_bson)
            .collect())
    }
}

struct TableRows {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

/// An in-memory target: one `Vec<Vec<Value>>` per table, plus a set of
/// "poisoned" identifier values that simulate a foreign-key constraint the
/// real database would reject, so row-level failure isolation (S5) can be
/// exercised without Postgres.
pub struct FakeTargetStore {
    tables: HashMap<String, TableRows>,
    poisoned: HashSet<String>,
}

impl FakeTargetStore {
    #[must_use]
    pub fn new() -> Self {
        Self { tables: HashMap::new(), poisoned: HashSet::new() }
    }

    /// Pre-populate `table` with existing rows, as if a prior run had
    /// already written them.
    pub fn seed(&mut self, table: &str, columns: &[String], rows: Vec<Vec<Value>>) {
        self.tables.insert(table.to_string(), TableRows { columns: columns.to_vec(), rows });
    }

    /// Mark an identifier value as violating a foreign-key constraint: any
    /// row carrying it fails the whole-batch attempt and is rejected
    /// individually on retry.
    pub fn poison(&mut self, value: &str) {
        self.poisoned.insert(value.to_string());
    }

    #[must_use]
    pub fn rows(&self, table: &str) -> &[Vec<Value>] {
        self.tables.get(table).map_or(&[], |t| t.rows.as_slice())
    }

    fn row_is_poison(&self, row: &[Value]) -> bool {
        row.iter().any(|v| v.as_id_string().is_some_and(|s| self.poisoned.contains(&s)))
    }

    fn column_index(&self, table: &str, column: &str) -> Option<usize> {
        self.tables.get(table)?.columns.iter().position(|c| c == column)
    }
}

impl Default for FakeTargetStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TargetStore for FakeTargetStore {
    async fn execute_batch(
        &mut self,
        table: &str,
        columns: &[String],
        rows: &[Vec<Value>],
        _use_on_conflict: bool,
        _on_conflict_clause: &str,
        summary: &mut ImportSummary,
    ) -> Result<u64> {
        if rows.is_empty() || columns.is_empty() {
            return Ok(0);
        }
        self.tables.entry(table.to_string()).or_insert_with(|| TableRows {
            columns: columns.to_vec(),
            rows: Vec::new(),
        });

        if !rows.iter().any(|row| self.row_is_poison(row)) {
            let entry = self.tables.get_mut(table).expect("just inserted");
            entry.rows.extend(rows.iter().cloned());
            summary.record_success(table, rows.len() as u64);
            return Ok(rows.len() as u64);
        }

        let mut inserted = 0u64;
        for row in rows {
            if self.row_is_poison(row) {
                let record_id = row.first().and_then(Value::as_id_string).unwrap_or_else(|| "unknown".to_string());
                summary.record_error(table, "Foreign key constraint", &record_id, "simulated foreign key violation");
            } else {
                self.tables.get_mut(table).expect("just inserted").rows.push(row.clone());
                summary.record_success(table, 1);
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn delete_by_parent_ids(&mut self, table: &str, column: &str, ids: &[String]) -> Result<u64> {
        let Some(index) = self.column_index(table, column) else { return Ok(0) };
        let entry = self.tables.get_mut(table).expect("column_index found the table");
        let before = entry.rows.len();
        entry.rows.retain(|row| row.get(index).and_then(Value::as_id_string).is_none_or(|v| !ids.contains(&v)));
        Ok((before - entry.rows.len()) as u64)
    }

    async fn current_relationship_set(
        &self,
        table: &str,
        parent_column: &str,
        parent_id: &str,
        child_column: &str,
        discriminator_column: Option<&str>,
    ) -> Result<HashSet<(String, String)>> {
        let Some(entry) = self.tables.get(table) else { return Ok(HashSet::new()) };
        let Some(parent_idx) = entry.columns.iter().position(|c| c == parent_column) else {
            return Ok(HashSet::new());
        };
        let Some(child_idx) = entry.columns.iter().position(|c| c == child_column) else {
            return Ok(HashSet::new());
        };
        let disc_idx = discriminator_column.and_then(|d| entry.columns.iter().position(|c| c == d));

        Ok(entry
            .rows
            .iter()
            .filter(|row| row.get(parent_idx).and_then(Value::as_id_string).as_deref() == Some(parent_id))
            .map(|row| {
                let child = row.get(child_idx).and_then(Value::as_id_string).unwrap_or_default();
                let discriminator =
                    disc_idx.and_then(|i| row.get(i).and_then(Value::as_id_string)).unwrap_or_default();
                (child, discriminator)
            })
            .collect())
    }

    async fn delete_targeted(
        &mut self,
        table: &str,
        parent_column: &str,
        parent_id: &str,
        child_column: &str,
        discriminator_column: Option<&str>,
        items: &[(String, String)],
    ) -> Result<u64> {
        let Some(entry) = self.tables.get_mut(table) else { return Ok(0) };
        let Some(parent_idx) = entry.columns.iter().position(|c| c == parent_column) else { return Ok(0) };
        let Some(child_idx) = entry.columns.iter().position(|c| c == child_column) else { return Ok(0) };
        let disc_idx = discriminator_column.and_then(|d| entry.columns.iter().position(|c| c == d));

        let before = entry.rows.len();
        entry.rows.retain(|row| {
            if row.get(parent_idx).and_then(Value::as_id_string).as_deref() != Some(parent_id) {
                return true;
            }
            let child = row.get(child_idx).and_then(Value::as_id_string).unwrap_or_default();
            let discriminator = disc_idx.and_then(|i| row.get(i).and_then(Value::as_id_string)).unwrap_or_default();
            !items.contains(&(child, discriminator))
        });
        Ok((before - entry.rows.len()) as u64)
    }
}
