//! Schema reconciler (C6): introspect, diff against the registry, and
//! apply additive-only changes with an operator confirmation gate.
//!
//! Deliberately narrow, matching the source this is grounded on: only
//! `ADD COLUMN` and deferred `ADD CONSTRAINT FOREIGN KEY` are ever
//! generated. Dropped, renamed, or retyped columns are never detected or
//! touched; that stays a manual operation.

use std::collections::HashSet;

use crate::error::Result;
use crate::registry::{ColumnDefinition, Registry, TableSchema};
use crate::target::PostgresTargetStore;

/// One column as PostgreSQL's `information_schema.columns` currently
/// reports it.
#[derive(Debug, Clone)]
pub struct CurrentColumn {
    pub data_type: String,
    pub character_maximum_length: Option<i32>,
    pub is_nullable: bool,
}

/// One foreign key as `information_schema` currently reports it.
#[derive(Debug, Clone)]
pub struct CurrentForeignKey {
    pub column_name: String,
    pub foreign_table: String,
    pub foreign_column: String,
}

/// Current column set for `table`, keyed by column name.
///
/// # Errors
///
/// Propagates the underlying Postgres error.
pub async fn current_table_columns(
    target: &PostgresTargetStore,
    table: &str,
) -> Result<std::collections::HashMap<String, CurrentColumn>> {
    let rows = target
        .client()
        .query(
            "SELECT column_name, data_type, character_maximum_length, is_nullable \
             FROM information_schema.columns WHERE table_name = $1 ORDER BY ordinal_position",
            &[&table],
        )
        .await?;

    let mut columns = std::collections::HashMap::new();
    for row in rows {
        let name: String = row.get(0);
        let data_type: String = row.get(1);
        let max_length: Option<i32> = row.get(2);
        let is_nullable: String = row.get(3);
        columns.insert(
            name,
            CurrentColumn {
                data_type,
                character_maximum_length: max_length,
                is_nullable: is_nullable == "YES",
            },
        );
    }
    Ok(columns)
}

/// Current foreign keys declared on `table`.
///
/// # Errors
///
/// Propagates the underlying Postgres error.
pub async fn current_foreign_keys(target: &PostgresTargetStore, table: &str) -> Result<Vec<CurrentForeignKey>> {
    let rows = target
        .client()
        .query(
            "SELECT kcu.column_name, ccu.table_name, ccu.column_name \
             FROM information_schema.table_constraints AS tc \
             JOIN information_schema.key_column_usage AS kcu \
               ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema \
             JOIN information_schema.constraint_column_usage AS ccu \
               ON ccu.constraint_name = tc.constraint_name AND ccu.table_schema = tc.table_schema \
             WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_name = $1",
            &[&table],
        )
        .await?;

    Ok(rows
        .into_iter()
        .map(|row| CurrentForeignKey {
            column_name: row.get(0),
            foreign_table: row.get(1),
            foreign_column: row.get(2),
        })
        .collect())
}

/// Map a declared `sql_type` to the canonical form `information_schema`
/// reports it as, so a declared `VARCHAR` compares equal to a reported
/// `character varying`. Unrecognized types pass through lowercased.
#[must_use]
pub fn normalize_sql_type(sql_type: &str) -> String {
    let upper = sql_type.to_uppercase();
    let base = upper.split('(').next().unwrap_or(&upper).trim();
    match base {
        "VARCHAR" => "character varying",
        "TEXT" => "text",
        "INTEGER" | "INT" => "integer",
        "SMALLINT" => "smallint",
        "BIGINT" => "bigint",
        "BOOLEAN" | "BOOL" => "boolean",
        "TIMESTAMP" => "timestamp without time zone",
        "TIMESTAMPTZ" => "timestamp with time zone",
        "DATE" => "date",
        "SERIAL" => "integer",
        "BIGSERIAL" => "bigint",
        other => return other.to_lowercase(),
    }
    .to_string()
}

/// Whether adding a `NOT NULL` constraint to an *existing* column would
/// be safe: no existing row may hold `NULL` there.
///
/// # Errors
///
/// Propagates the underlying Postgres error (other than the column not
/// existing yet, which returns `(true, 0)`: the original column-not-
/// found path, irrelevant once `ADD COLUMN` is in play).
pub async fn validate_not_null_safety(target: &PostgresTargetStore, table: &str, column: &str) -> Result<(bool, i64)> {
    let sql = format!("SELECT COUNT(*) FROM {table} WHERE {column} IS NULL");
    match target.client().query_one(&sql, &[]).await {
        Ok(row) => {
            let null_count: i64 = row.get(0);
            Ok((null_count == 0, null_count))
        }
        Err(_) => Ok((true, 0)),
    }
}

/// Diff outcome for one table: which columns the registry declares that
/// the live schema lacks, and which of those carry a foreign key.
#[derive(Debug, Clone, Default)]
pub struct SchemaDiff {
    pub added_columns: Vec<ColumnDefinition>,
    pub missing_foreign_keys: Vec<ColumnDefinition>,
}

impl SchemaDiff {
    #[must_use]
    pub const fn needs_update(&self) -> bool {
        !self.added_columns.is_empty()
    }
}

/// Compare `schema` against the live table. Only ever reports additions;
/// modified or removed columns and constraints are out of scope.
///
/// # Errors
///
/// Propagates the underlying Postgres error.
pub async fn compare_table_schema(target: &PostgresTargetStore, schema: &TableSchema) -> Result<SchemaDiff> {
    let current = current_table_columns(target, &schema.name).await?;
    let current_names: HashSet<&str> = current.keys().map(String::as_str).collect();

    let mut diff = SchemaDiff::default();
    for column in &schema.columns {
        if !current_names.contains(column.name.as_str()) {
            diff.added_columns.push(column.clone());
            if column.foreign_key.is_some() {
                diff.missing_foreign_keys.push(column.clone());
            }
        }
    }
    Ok(diff)
}

/// One blocking condition preventing an otherwise-generated statement
/// from being applied directly.
#[derive(Debug, Clone)]
pub struct AlterError {
    pub column: String,
    pub message: String,
}

/// Generate `ADD COLUMN` / `ADD CONSTRAINT FOREIGN KEY` statements for
/// `diff`. A `NOT NULL` column is added directly only when the table is
/// currently empty; otherwise it degrades to nullable and the omission
/// is reported as an `AlterError` rather than silently dropped.
///
/// # Errors
///
/// Propagates the underlying Postgres error from the row-count check.
pub async fn generate_alter_statements(
    target: &PostgresTargetStore,
    table: &str,
    diff: &SchemaDiff,
) -> Result<(Vec<String>, Vec<AlterError>)> {
    let mut statements = Vec::new();
    let mut errors = Vec::new();

    for column in &diff.added_columns {
        let mut can_add_not_null = true;
        if !column.nullable {
            let row = target.client().query_one(&format!("SELECT COUNT(*) FROM {table}"), &[]).await?;
            let row_count: i64 = row.get(0);
            if row_count > 0 {
                can_add_not_null = false;
                errors.push(AlterError {
                    column: column.name.clone(),
                    message: format!(
                        "cannot add NOT NULL constraint to {table}.{}: {row_count} existing rows would have NULL values (make it nullable, add a DEFAULT, or populate data first)",
                        column.name
                    ),
                });
            }
        }

        let statement = if can_add_not_null && !column.nullable {
            format!("ALTER TABLE {table} ADD COLUMN {} {} NOT NULL", column.name, column.sql_type)
        } else {
            format!("ALTER TABLE {table} ADD COLUMN {} {}", column.name, column.sql_type)
        };
        statements.push(statement);
    }

    for column in &diff.missing_foreign_keys {
        if let Some(fk) = &column.foreign_key {
            let Some((ref_table, ref_column)) = fk.trim_end_matches(')').split_once('(') else {
                continue;
            };
            let fk_name = format!("fk_{table}_{}", column.name);
            statements.push(format!(
                "ALTER TABLE {table} ADD CONSTRAINT {fk_name} FOREIGN KEY ({}) REFERENCES {ref_table}({ref_column})",
                column.name
            ));
        }
    }

    Ok((statements, errors))
}

/// Plan every table's diff, print it, and, if no blocking errors exist
/// anywhere, ask the operator to confirm before applying. Returns the
/// number of statements applied (0 if the operator declined or nothing
/// needed changing).
///
/// # Errors
///
/// Propagates Postgres errors encountered while planning. A failure
/// while *applying* one statement stops the remaining statements and is
/// logged, not propagated (matches the rollback-and-stop behavior this
/// is grounded on).
pub async fn reconcile_all(target: &mut PostgresTargetStore, registry: &Registry) -> Result<usize> {
    let mut all_statements: Vec<(String, String)> = Vec::new();
    let mut all_errors: Vec<AlterError> = Vec::new();

    for schema in registry.ordered() {
        let current = current_table_columns(target, &schema.name).await?;
        if current.is_empty() {
            target.execute_raw(&schema.get_create_sql()).await?;
            continue;
        }

        let diff = compare_table_schema(target, schema).await?;
        if !diff.needs_update() {
            continue;
        }

        let (statements, errors) = generate_alter_statements(target, &schema.name, &diff).await?;
        for statement in statements {
            all_statements.push((schema.name.clone(), statement));
        }
        all_errors.extend(errors);
    }

    if !all_errors.is_empty() {
        for error in &all_errors {
            tracing::error!(column = %error.column, message = %error.message, "blocking schema error");
        }
        return Err(crate::error::MigrationError::ReconcileBlocked(format!(
            "{} blocking schema error(s); resolve before migrating",
            all_errors.len()
        )));
    }

    if all_statements.is_empty() {
        return Ok(0);
    }

    println!("Found {} schema update statement(s) to apply:", all_statements.len());
    for (table, statement) in &all_statements {
        println!("  [{table}] {statement}");
    }

    let proceed = dialoguer::Confirm::new()
        .with_prompt("Apply these schema updates?")
        .default(false)
        .interact()
        .unwrap_or(false);

    if !proceed {
        tracing::info!("schema updates skipped by operator");
        return Ok(0);
    }

    let mut applied = 0;
    for (table, statement) in &all_statements {
        match target.execute_raw(statement).await {
            Ok(_) => {
                tracing::info!(table = %table, statement = %statement, "applied schema update");
                applied += 1;
            }
            Err(error) => {
                tracing::error!(table = %table, %error, "schema update failed, stopping");
                break;
            }
        }
    }
    Ok(applied)
}
