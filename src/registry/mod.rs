//! Schema registry (C1).
//!
//! Loads a declarative table configuration and exposes `TableSchema`
//! accessors used by the strategy framework and target writer:
//! `get_create_sql()`, `get_on_conflict_clause()`, and field mappings.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::{MigrationError, Result};
use crate::strategy::StrategyKind;

/// One column of a target table.
#[derive(Debug, Clone, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    pub sql_type: String,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
    /// `"table(column)"` reference, if any.
    #[serde(default)]
    pub foreign_key: Option<String>,
}

const fn default_true() -> bool {
    true
}

/// Raw, declarative shape of one table entry as it appears in the registry
/// configuration file. `TableSchema::from_config` derives field mappings
/// and validates invariants from this.
#[derive(Debug, Clone, Deserialize)]
pub struct TableConfig {
    pub name: String,
    #[serde(default)]
    pub source_collection: Option<String>,
    pub columns: Vec<ColumnDefinition>,
    #[serde(default)]
    pub explicit_mappings: BTreeMap<String, String>,
    #[serde(default)]
    pub export_order: i32,
    #[serde(default)]
    pub strategy: StrategyKind,
    #[serde(default)]
    pub unique_constraints: Vec<Vec<String>>,
    #[serde(default)]
    pub force_reimport: bool,
    #[serde(default)]
    pub truncate_before_import: bool,
}

/// The authoritative definition of one target table, derived from a
/// `TableConfig`.
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub name: String,
    pub source_collection: String,
    pub columns: Vec<ColumnDefinition>,
    /// source field path → target column name.
    pub field_mappings: BTreeMap<String, String>,
    pub export_order: i32,
    pub strategy: StrategyKind,
    pub unique_constraints: Vec<Vec<String>>,
    pub force_reimport: bool,
    pub truncate_before_import: bool,
}

impl TableSchema {
    /// Build a `TableSchema` from its declarative configuration, deriving
    /// field mappings (identity map minus `id` minus explicit-mapping
    /// targets, then overlaid with `explicit_mappings`) and validating
    /// invariants 1 and 3 from the data model.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Schema` if neither a primary key nor a
    /// unique constraint is present, or if an explicit mapping targets an
    /// undeclared column.
    pub fn from_config(config: TableConfig) -> Result<Self> {
        let has_pk = config.columns.iter().any(|c| c.primary_key);
        if !has_pk && config.unique_constraints.is_empty() {
            return Err(MigrationError::Schema(format!(
                "table {} has neither a primary key nor a unique constraint",
                config.name
            )));
        }

        let declared: std::collections::HashSet<&str> =
            config.columns.iter().map(|c| c.name.as_str()).collect();
        for target in config.explicit_mappings.values() {
            if !declared.contains(target.as_str()) {
                return Err(MigrationError::Schema(format!(
                    "table {}: explicit mapping targets undeclared column {target}",
                    config.name
                )));
            }
        }

        let excluded: std::collections::HashSet<&str> = std::iter::once("id")
            .chain(config.explicit_mappings.values().map(String::as_str))
            .collect();

        let mut field_mappings: BTreeMap<String, String> = config
            .columns
            .iter()
            .filter(|c| !excluded.contains(c.name.as_str()))
            .map(|c| (c.name.clone(), c.name.clone()))
            .collect();
        field_mappings.extend(config.explicit_mappings.clone());

        let source_collection = config
            .source_collection
            .unwrap_or_else(|| config.name.clone());

        Ok(Self {
            name: config.name,
            source_collection,
            columns: config.columns,
            field_mappings,
            export_order: config.export_order,
            strategy: config.strategy,
            unique_constraints: config.unique_constraints,
            force_reimport: config.force_reimport,
            truncate_before_import: config.truncate_before_import,
        })
    }

    /// `CREATE TABLE IF NOT EXISTS` statement for this schema, including
    /// column definitions, inline foreign keys, and unique constraints.
    #[must_use]
    pub fn get_create_sql(&self) -> String {
        let mut defs: Vec<String> = Vec::new();
        let mut foreign_keys: Vec<String> = Vec::new();

        for col in &self.columns {
            let mut def = format!("{} {}", col.name, col.sql_type);
            if col.primary_key {
                def.push_str(" PRIMARY KEY");
            } else if !col.nullable {
                def.push_str(" NOT NULL");
            }
            defs.push(def);

            if let Some(fk) = &col.foreign_key {
                foreign_keys.push(format!("FOREIGN KEY ({}) REFERENCES {fk}", col.name));
            }
        }

        for constraint in &self.unique_constraints {
            defs.push(format!("UNIQUE ({})", constraint.join(", ")));
        }
        defs.extend(foreign_keys);

        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            self.name,
            defs.join(",\n    ")
        )
    }

    /// The `ON CONFLICT` clause to append to an insert statement touching
    /// `columns`. Policy: primary key first, then first unique constraint,
    /// degrading to `DO NOTHING` when the insert omits every updatable
    /// column, and to empty when neither a primary key nor a unique
    /// constraint exists.
    #[must_use]
    pub fn get_on_conflict_clause(&self, columns: &[String]) -> String {
        let insert_columns: std::collections::HashSet<&str> =
            columns.iter().map(String::as_str).collect();

        if let Some(pk) = self.columns.iter().find(|c| c.primary_key) {
            let update_columns: Vec<String> = self
                .columns
                .iter()
                .filter(|c| !c.primary_key && insert_columns.contains(c.name.as_str()))
                .map(|c| format!("{0} = EXCLUDED.{0}", c.name))
                .collect();

            return if update_columns.is_empty() {
                format!(" ON CONFLICT ({}) DO NOTHING", pk.name)
            } else {
                format!(
                    " ON CONFLICT ({}) DO UPDATE SET {}",
                    pk.name,
                    update_columns.join(", ")
                )
            };
        }

        if let Some(constraint) = self.unique_constraints.first() {
            let constraint_set: std::collections::HashSet<&str> =
                constraint.iter().map(String::as_str).collect();
            let update_columns: Vec<String> = self
                .columns
                .iter()
                .filter(|c| {
                    !constraint_set.contains(c.name.as_str())
                        && !c.primary_key
                        && insert_columns.contains(c.name.as_str())
                })
                .map(|c| format!("{0} = EXCLUDED.{0}", c.name))
                .collect();

            let constraint_cols = constraint.join(", ");
            return if update_columns.is_empty() {
                format!(" ON CONFLICT ({constraint_cols}) DO NOTHING")
            } else {
                format!(
                    " ON CONFLICT ({constraint_cols}) DO UPDATE SET {}",
                    update_columns.join(", ")
                )
            };
        }

        String::new()
    }
}

/// Standard `id` / `created_at` / `updated_at` columns and their `_id` /
/// `creation_date` / `update_date` mappings, carried over from the
/// original's `BaseEntitySchema` convenience (not named in the distilled
/// spec, but present in every concrete table definition it was distilled
/// from).
#[must_use]
pub fn base_entity_columns() -> Vec<ColumnDefinition> {
    vec![
        ColumnDefinition {
            name: "id".to_string(),
            sql_type: "VARCHAR".to_string(),
            nullable: true,
            primary_key: true,
            foreign_key: None,
        },
        ColumnDefinition {
            name: "created_at".to_string(),
            sql_type: "TIMESTAMP".to_string(),
            nullable: false,
            primary_key: false,
            foreign_key: None,
        },
        ColumnDefinition {
            name: "updated_at".to_string(),
            sql_type: "TIMESTAMP".to_string(),
            nullable: false,
            primary_key: false,
            foreign_key: None,
        },
    ]
}

#[must_use]
pub fn base_entity_mappings() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("_id".to_string(), "id".to_string()),
        ("creation_date".to_string(), "created_at".to_string()),
        ("update_date".to_string(), "updated_at".to_string()),
    ])
}

/// The full registry: every table, loaded from a YAML configuration file.
#[derive(Debug, Clone)]
pub struct Registry {
    tables: BTreeMap<String, TableSchema>,
}

impl Registry {
    /// Parse a YAML document (a sequence of `TableConfig`) into a
    /// `Registry`, validating every table's invariants and cross-table
    /// invariant 2 (a table's foreign keys point only at lower-ranked
    /// tables).
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Schema` on invalid YAML or a violated
    /// invariant.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let configs: Vec<TableConfig> = serde_yaml::from_str(yaml)
            .map_err(|e| MigrationError::Schema(format!("invalid registry config: {e}")))?;

        let mut tables = BTreeMap::new();
        for config in configs {
            let schema = TableSchema::from_config(config)?;
            tables.insert(schema.name.clone(), schema);
        }

        let registry = Self { tables };
        registry.validate_export_order()?;
        Ok(registry)
    }

    fn validate_export_order(&self) -> Result<()> {
        for schema in self.tables.values() {
            for col in &schema.columns {
                let Some(fk) = &col.foreign_key else {
                    continue;
                };
                let Some(target_table) = fk.split('(').next() else {
                    continue;
                };
                if let Some(target) = self.tables.get(target_table) {
                    if target.export_order >= schema.export_order {
                        return Err(MigrationError::Schema(format!(
                            "table {} (export_order {}) references {target_table} (export_order {}), which is not strictly lower",
                            schema.name, schema.export_order, target.export_order
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    /// All tables, sorted ascending by `export_order` (the runner's
    /// processing order).
    #[must_use]
    pub fn ordered(&self) -> Vec<&TableSchema> {
        let mut tables: Vec<&TableSchema> = self.tables.values().collect();
        tables.sort_by_key(|t| t.export_order);
        tables
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users_config() -> TableConfig {
        TableConfig {
            name: "users".to_string(),
            source_collection: None,
            columns: {
                let mut cols = base_entity_columns();
                cols.push(ColumnDefinition {
                    name: "name".to_string(),
                    sql_type: "VARCHAR".to_string(),
                    nullable: true,
                    primary_key: false,
                    foreign_key: None,
                });
                cols
            },
            explicit_mappings: base_entity_mappings(),
            export_order: 1,
            strategy: StrategyKind::DirectTranslation,
            unique_constraints: Vec::new(),
            force_reimport: false,
            truncate_before_import: false,
        }
    }

    #[test]
    fn field_mappings_auto_derive_and_exclude_id() {
        let schema = TableSchema::from_config(users_config()).unwrap();
        assert_eq!(schema.field_mappings.get("name"), Some(&"name".to_string()));
        assert_eq!(schema.field_mappings.get("_id"), Some(&"id".to_string()));
        assert!(!schema.field_mappings.contains_key("id"));
    }

    #[test]
    fn missing_pk_and_unique_constraint_is_rejected() {
        let mut config = users_config();
        for col in &mut config.columns {
            col.primary_key = false;
        }
        let err = TableSchema::from_config(config).unwrap_err();
        assert!(matches!(err, MigrationError::Schema(_)));
    }

    #[test]
    fn on_conflict_clause_targets_primary_key() {
        let schema = TableSchema::from_config(users_config()).unwrap();
        let clause = schema.get_on_conflict_clause(&[
            "id".to_string(),
            "name".to_string(),
            "created_at".to_string(),
            "updated_at".to_string(),
        ]);
        assert!(clause.starts_with(" ON CONFLICT (id) DO UPDATE SET"));
        assert!(clause.contains("name = EXCLUDED.name"));
        assert!(!clause.contains("id = EXCLUDED.id"));
    }

    #[test]
    fn on_conflict_clause_degrades_to_do_nothing_when_no_updatable_columns() {
        let schema = TableSchema::from_config(users_config()).unwrap();
        let clause = schema.get_on_conflict_clause(&["id".to_string()]);
        assert_eq!(clause, " ON CONFLICT (id) DO NOTHING");
    }

    #[test]
    fn on_conflict_clause_falls_back_to_unique_constraint() {
        let mut config = users_config();
        for col in &mut config.columns {
            col.primary_key = false;
        }
        config.unique_constraints = vec![vec!["name".to_string()]];
        let schema = TableSchema::from_config(config).unwrap();
        let clause = schema.get_on_conflict_clause(&[
            "id".to_string(),
            "name".to_string(),
            "created_at".to_string(),
        ]);
        assert!(clause.starts_with(" ON CONFLICT (name) DO UPDATE SET"));
        assert!(!clause.contains("name = EXCLUDED.name"));
    }

    #[test]
    fn create_sql_includes_foreign_keys_and_unique_constraints() {
        let mut config = users_config();
        config.columns.push(ColumnDefinition {
            name: "team_id".to_string(),
            sql_type: "VARCHAR".to_string(),
            nullable: true,
            primary_key: false,
            foreign_key: Some("teams(id)".to_string()),
        });
        config.unique_constraints = vec![vec!["name".to_string()]];
        let schema = TableSchema::from_config(config).unwrap();
        let sql = schema.get_create_sql();
        assert!(sql.contains("FOREIGN KEY (team_id) REFERENCES teams(id)"));
        assert!(sql.contains("UNIQUE (name)"));
    }

    #[test]
    fn registry_rejects_export_order_violations() {
        let yaml = r"
- name: children
  export_order: 1
  strategy: direct_translation
  columns:
    - {name: id, sql_type: VARCHAR, primary_key: true}
    - {name: parent_id, sql_type: VARCHAR, foreign_key: 'parents(id)'}
- name: parents
  export_order: 2
  strategy: direct_translation
  columns:
    - {name: id, sql_type: VARCHAR, primary_key: true}
";
        let err = Registry::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, MigrationError::Schema(_)));
    }

    #[test]
    fn registry_orders_tables_by_export_order() {
        let yaml = r"
- name: parents
  export_order: 1
  strategy: direct_translation
  columns:
    - {name: id, sql_type: VARCHAR, primary_key: true}
- name: children
  export_order: 2
  strategy: direct_translation
  columns:
    - {name: id, sql_type: VARCHAR, primary_key: true}
    - {name: parent_id, sql_type: VARCHAR, foreign_key: 'parents(id)'}
";
        let registry = Registry::from_yaml(yaml).unwrap();
        let names: Vec<&str> = registry.ordered().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["parents", "children"]);
    }
}
