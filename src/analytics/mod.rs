//! Analytics mirror (C9): one-way incremental copy of an external
//! analytics store's tables into the target database, independent of the
//! document→relational migration path.
//!
//! Grounded in `matomo_sync.py`: per-table watermark read from the
//! target, a single paginated `SELECT ... WHERE ts_column > watermark`
//! against the analytics source, batched upsert keyed on the declared
//! primary key when one exists, plain insert otherwise.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

use crate::error::{MigrationError, Result};
use crate::registry::ColumnDefinition;
use crate::target::{PostgresTargetStore, TargetStore};
use crate::value::Value;

/// One mirrored table: enough of a `TableSchema` to generate DDL and an
/// `ON CONFLICT` clause, plus the analytics-side table name and the
/// timestamp column incremental sync watermarks against.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsTableSchema {
    pub target_table: String,
    pub source_table: String,
    pub timestamp_column: String,
    pub columns: Vec<ColumnDefinition>,
}

impl AnalyticsTableSchema {
    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// `CREATE TABLE IF NOT EXISTS`, reusing the registry's column-to-SQL
    /// rendering rather than duplicating it.
    #[must_use]
    pub fn get_create_sql(&self) -> String {
        let mut defs: Vec<String> = Vec::new();
        for col in &self.columns {
            let mut def = format!("{} {}", col.name, col.sql_type);
            if col.primary_key {
                def.push_str(" PRIMARY KEY");
            } else if !col.nullable {
                def.push_str(" NOT NULL");
            }
            defs.push(def);
        }
        format!("CREATE TABLE IF NOT EXISTS {} (\n    {}\n)", self.target_table, defs.join(",\n    "))
    }

    /// `ON CONFLICT (pk) DO UPDATE SET ...` when a primary key is
    /// declared, else empty (plain insert, matching the original's
    /// fallback when a mirrored table has no natural key).
    #[must_use]
    pub fn get_on_conflict_clause(&self) -> String {
        let Some(pk) = self.columns.iter().find(|c| c.primary_key) else {
            return String::new();
        };
        let updates: Vec<String> = self
            .columns
            .iter()
            .filter(|c| !c.primary_key)
            .map(|c| format!("{0} = EXCLUDED.{0}", c.name))
            .collect();
        if updates.is_empty() {
            format!(" ON CONFLICT ({}) DO NOTHING", pk.name)
        } else {
            format!(" ON CONFLICT ({}) DO UPDATE SET {}", pk.name, updates.join(", "))
        }
    }
}

/// Parse a YAML document (a sequence of `AnalyticsTableSchema`) into the
/// list of tables to mirror.
///
/// # Errors
///
/// Returns `MigrationError::Schema` if the document doesn't parse.
pub fn load_schemas(yaml: &str) -> Result<Vec<AnalyticsTableSchema>> {
    serde_yaml::from_str(yaml).map_err(|e| MigrationError::Schema(format!("invalid analytics schema config: {e}")))
}

/// One page of rows from the analytics source, pre-converted to this
/// crate's `Value` currency in the schema's declared column order.
pub type AnalyticsRow = Vec<Value>;

/// An external analytics store: paginated row retrieval after a
/// watermark. Kept separate from `SourceStore` since the analytics
/// source is a row store (likely another relational database), not a
/// document store.
#[async_trait]
pub trait AnalyticsSource: Send + Sync {
    async fn fetch_page(
        &self,
        schema: &AnalyticsTableSchema,
        after: Option<DateTime<Utc>>,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<AnalyticsRow>>;
}

/// Highest `timestamp_column` value currently mirrored, or `None` if the
/// target table doesn't exist yet or is empty (both read as "mirror
/// everything"), mirroring `get_last_sync_timestamp`'s
/// table-existence check before it runs the `MAX` query.
///
/// # Errors
///
/// Propagates the underlying Postgres error.
pub async fn last_sync_timestamp(
    target: &PostgresTargetStore,
    schema: &AnalyticsTableSchema,
) -> Result<Option<DateTime<Utc>>> {
    let exists_row = target
        .client()
        .query_one(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_name = $1)",
            &[&schema.target_table],
        )
        .await?;
    let exists: bool = exists_row.get(0);
    if !exists {
        return Ok(None);
    }

    let sql = format!("SELECT MAX({}) FROM {}", schema.timestamp_column, schema.target_table);
    let row = target.client().query_one(&sql, &[]).await?;
    let ts: Option<chrono::NaiveDateTime> = row.get(0);
    Ok(ts.map(|naive| chrono::Utc.from_utc_datetime(&naive)))
}

/// Mirror one table: ensure it exists, resolve its watermark, then page
/// through the source in `batch_size` chunks until a short page signals
/// completion, upserting each page.
///
/// # Errors
///
/// Propagates a source or target store error.
pub async fn mirror_table(
    source: &dyn AnalyticsSource,
    target: &mut PostgresTargetStore,
    schema: &AnalyticsTableSchema,
    batch_size: u64,
) -> Result<u64> {
    target.execute_raw(&schema.get_create_sql()).await?;

    let watermark = last_sync_timestamp(target, schema).await?;
    let columns = schema.column_names();
    let conflict_clause = schema.get_on_conflict_clause();

    let mut offset = 0u64;
    let mut total = 0u64;
    let mut summary = crate::summary::ImportSummary::new();

    loop {
        let rows = source.fetch_page(schema, watermark, offset, batch_size).await?;
        if rows.is_empty() {
            break;
        }
        let page_len = rows.len() as u64;

        let inserted = target
            .execute_batch(&schema.target_table, &columns, &rows, true, &conflict_clause, &mut summary)
            .await?;
        total += inserted;

        offset += batch_size;
        if page_len < batch_size {
            break;
        }
    }

    tracing::info!(table = %schema.target_table, total, "analytics mirror complete");
    Ok(total)
}

/// A reference `AnalyticsSource` backed by `tokio-postgres`, usable
/// whenever the external analytics store is itself SQL-queryable through
/// that driver. A deployment whose analytics store speaks a different
/// wire protocol supplies its own `AnalyticsSource` implementation;
/// `mirror_table` only depends on the trait.
pub struct PostgresAnalyticsSource {
    client: tokio_postgres::Client,
}

impl PostgresAnalyticsSource {
    /// Connect to the analytics store.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Target` if the connection cannot be
    /// established.
    pub async fn connect(conninfo: &str) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(conninfo, tokio_postgres::NoTls).await?;
        tokio::spawn(async move {
            if let Err(error) = connection.await {
                tracing::error!(%error, "analytics source connection terminated");
            }
        });
        Ok(Self { client })
    }
}

#[async_trait]
impl AnalyticsSource for PostgresAnalyticsSource {
    async fn fetch_page(
        &self,
        schema: &AnalyticsTableSchema,
        after: Option<DateTime<Utc>>,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<AnalyticsRow>> {
        let column_list = schema.column_names().join(", ");
        #[allow(clippy::cast_possible_wrap)]
        let (offset, limit) = (offset as i64, limit as i64);

        let rows = if let Some(after) = after {
            let sql = format!(
                "SELECT {column_list} FROM {} WHERE {} > $1 ORDER BY {} LIMIT $2 OFFSET $3",
                schema.source_table, schema.timestamp_column, schema.timestamp_column
            );
            self.client.query(&sql, &[&after, &limit, &offset]).await?
        } else {
            let sql = format!(
                "SELECT {column_list} FROM {} ORDER BY {} LIMIT $1 OFFSET $2",
                schema.source_table, schema.timestamp_column
            );
            self.client.query(&sql, &[&limit, &offset]).await?
        };

        Ok(rows.iter().map(|row| row_to_values(row, schema)).collect())
    }
}

/// Best-effort, type-introspected conversion of one analytics row into
/// this crate's `Value` currency, in the schema's declared column order.
/// Unrecognized Postgres types fall back to their text representation.
fn row_to_values(row: &tokio_postgres::Row, schema: &AnalyticsTableSchema) -> AnalyticsRow {
    schema
        .columns
        .iter()
        .enumerate()
        .map(|(i, col)| match col.sql_type.to_uppercase().as_str() {
            "BIGINT" | "INT8" => row.try_get::<_, Option<i64>>(i).ok().flatten().map_or(Value::Null, Value::Int),
            "INTEGER" | "INT" | "INT4" => {
                row.try_get::<_, Option<i32>>(i).ok().flatten().map_or(Value::Null, |v| Value::Int(i64::from(v)))
            }
            "BOOLEAN" | "BOOL" => row.try_get::<_, Option<bool>>(i).ok().flatten().map_or(Value::Null, Value::Bool),
            "DOUBLE PRECISION" | "FLOAT8" | "REAL" => {
                row.try_get::<_, Option<f64>>(i).ok().flatten().map_or(Value::Null, Value::Float)
            }
            "TIMESTAMP" | "TIMESTAMPTZ" => row
                .try_get::<_, Option<DateTime<Utc>>>(i)
                .ok()
                .flatten()
                .map_or(Value::Null, Value::Timestamp),
            _ => row.try_get::<_, Option<String>>(i).ok().flatten().map_or(Value::Null, Value::Str),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ColumnDefinition;

    fn schema() -> AnalyticsTableSchema {
        AnalyticsTableSchema {
            target_table: "visits".to_string(),
            source_table: "log_visit".to_string(),
            timestamp_column: "visit_last_action_time".to_string(),
            columns: vec![
                ColumnDefinition {
                    name: "idvisit".to_string(),
                    sql_type: "BIGINT".to_string(),
                    nullable: true,
                    primary_key: true,
                    foreign_key: None,
                },
                ColumnDefinition {
                    name: "visit_last_action_time".to_string(),
                    sql_type: "TIMESTAMP".to_string(),
                    nullable: false,
                    primary_key: false,
                    foreign_key: None,
                },
            ],
        }
    }

    #[test]
    fn conflict_clause_targets_declared_primary_key() {
        let clause = schema().get_on_conflict_clause();
        assert!(clause.starts_with(" ON CONFLICT (idvisit) DO UPDATE SET"));
        assert!(clause.contains("visit_last_action_time = EXCLUDED.visit_last_action_time"));
    }

    #[test]
    fn create_sql_declares_primary_key_inline() {
        let sql = schema().get_create_sql();
        assert!(sql.contains("idvisit BIGINT PRIMARY KEY"));
    }
}
