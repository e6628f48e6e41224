//! End-to-end scenarios S2-S5 against the in-memory fakes: incremental
//! filtering, array-removal via delete-and-insert, a small relationship
//! change via smart-diff, and row-level foreign-key isolation.

mod common;

use std::collections::{BTreeMap, HashSet};

use chrono::{Duration, TimeZone, Utc};

use common::{FakeSourceStore, FakeTargetStore};
use relsync::registry::{ColumnDefinition, TableConfig, TableSchema};
use relsync::source::{SourceStore, build_date_filter};
use relsync::strategy::{
    DeleteAndInsertConfig, DeleteAndInsertStrategy, DirectTranslationStrategy, ImportConfig, ImportStrategy,
    SmartDiffConfig, SmartDiffStrategy, StrategyKind,
};
use relsync::summary::ImportSummary;
use relsync::value::Value;

fn dummy_schema(name: &str) -> TableSchema {
    TableSchema::from_config(TableConfig {
        name: name.to_string(),
        source_collection: None,
        columns: vec![ColumnDefinition {
            name: "user_id".to_string(),
            sql_type: "VARCHAR".to_string(),
            nullable: true,
            primary_key: true,
            foreign_key: None,
        }],
        explicit_mappings: BTreeMap::new(),
        export_order: 1,
        strategy: StrategyKind::DeleteAndInsert,
        unique_constraints: Vec::new(),
        force_reimport: false,
        truncate_before_import: false,
    })
    .unwrap()
}

/// S2: incremental skip. A watermark strictly past the last-synced
/// document's timestamp selects only the freshly added one.
#[tokio::test]
async fn s2_incremental_filter_selects_only_new_document() {
    let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let t2 = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
    let t3 = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();

    let source = FakeSourceStore::new().with(
        "users",
        vec![
            bson::doc! { "_id": "a", "creation_date": bson::DateTime::from_chrono(t1), "update_date": bson::DateTime::from_chrono(t1) },
            bson::doc! { "_id": "b", "creation_date": bson::DateTime::from_chrono(t2), "update_date": bson::DateTime::from_chrono(t2) },
            bson::doc! { "_id": "c", "creation_date": bson::DateTime::from_chrono(t3), "update_date": bson::DateTime::from_chrono(t3) },
        ],
    );

    let watermark = t2 + Duration::seconds(1);
    let filter = build_date_filter(Some(watermark));

    assert_eq!(source.count("users", &filter).await.unwrap(), 1);
    let docs = source.find("users", &filter, None, None, 0, 10).await.unwrap();
    let ids: Vec<String> = docs.iter().map(|d| d.get("_id").and_then(Value::as_id_string).unwrap()).collect();
    assert_eq!(ids, vec!["c".to_string()]);
}

fn user_events_config() -> DeleteAndInsertConfig {
    DeleteAndInsertConfig {
        filter_builder: Box::new(|_after| bson::doc! { "registered_events": { "$exists": true, "$ne": [] } }),
        columns: vec![
            "user_id".to_string(),
            "event_id".to_string(),
            "created_at".to_string(),
            "updated_at".to_string(),
        ],
        parent_id: Box::new(|doc| doc.get("_id").and_then(Value::as_id_string).unwrap_or_default()),
        extract_rows: Box::new(|parent_id, doc| {
            let Some(Value::List(items)) = doc.get("registered_events") else {
                return Vec::new();
            };
            items
                .iter()
                .filter_map(Value::as_id_string)
                .map(|event_id| vec![Value::Id(parent_id.to_string()), Value::Id(event_id), Value::Null, Value::Null])
                .collect()
        }),
        delete_table: "user_events".to_string(),
        delete_column: "user_id".to_string(),
    }
}

/// S3: array removal via delete-and-insert. `u1` drops `e2`, the final
/// target set holds exactly `{u1,e1}`.
#[tokio::test]
async fn s3_array_removal_leaves_only_surviving_child() {
    let columns = vec![
        "user_id".to_string(),
        "event_id".to_string(),
        "created_at".to_string(),
        "updated_at".to_string(),
    ];
    let mut target = FakeTargetStore::new();
    target.seed(
        "user_events",
        &columns,
        vec![
            vec![Value::Id("u1".to_string()), Value::Id("e1".to_string()), Value::Null, Value::Null],
            vec![Value::Id("u1".to_string()), Value::Id("e2".to_string()), Value::Null, Value::Null],
        ],
    );

    let source = FakeSourceStore::new()
        .with("users", vec![bson::doc! { "_id": "u1", "registered_events": ["e1"] }]);

    let strategy = DeleteAndInsertStrategy::new(user_events_config());
    let schema = dummy_schema("user_events");
    let config = ImportConfig {
        table_name: "user_events".to_string(),
        source_collection: "users".to_string(),
        batch_size: 500,
        after_date: None,
    };
    let mut summary = ImportSummary::new();
    let inserted = strategy.export_data(&source, &mut target, &schema, &config, &mut summary).await.unwrap();

    assert_eq!(inserted, 1);
    let remaining: Vec<(String, String)> = target
        .rows("user_events")
        .iter()
        .map(|row| (row[0].as_id_string().unwrap(), row[1].as_id_string().unwrap()))
        .collect();
    assert_eq!(remaining, vec![("u1".to_string(), "e1".to_string())]);
}

/// S4: smart-diff small change. 50 existing targets plus one new one
/// stays under the default 0.3 threshold, so only the new pair is
/// inserted and nothing is deleted.
#[tokio::test]
async fn s4_smart_diff_adds_single_new_target() {
    let columns = vec!["user_id".to_string(), "target_id".to_string(), "type".to_string()];
    let mut target = FakeTargetStore::new();
    let existing: Vec<Vec<Value>> = (1..=50)
        .map(|i| vec![Value::Id("u2".to_string()), Value::Id(format!("t{i}")), Value::Str("basic".to_string())])
        .collect();
    target.seed("users_targets", &columns, existing);

    let source = FakeSourceStore::new().with(
        "users",
        vec![bson::doc! { "_id": "u2", "targets": (1..=51).map(|i| bson::doc!{"_id": format!("t{i}"), "type": "basic"}).collect::<Vec<_>>() }],
    );

    let config = SmartDiffConfig {
        filter_builder: Box::new(|_| bson::doc! {}),
        parent_id: Box::new(|doc| doc.get("_id").and_then(Value::as_id_string).unwrap_or_default()),
        extract_current_items: Box::new(|doc| {
            let Some(Value::List(items)) = doc.get("targets") else { return HashSet::new() };
            items
                .iter()
                .filter_map(|item| {
                    let Value::Map(m) = item else { return None };
                    let id = m.get("_id").and_then(Value::as_id_string)?;
                    let kind = m.get("type").and_then(Value::as_id_string).unwrap_or_default();
                    Some((id, kind))
                })
                .collect()
        }),
        parent_column: "user_id".to_string(),
        child_column: "target_id".to_string(),
        discriminator_column: Some("type".to_string()),
        delete_table: "users_targets".to_string(),
        threshold: 0.30,
    };

    let strategy = SmartDiffStrategy::new(config);
    let schema = dummy_schema("users_targets");
    let import_config = ImportConfig {
        table_name: "users_targets".to_string(),
        source_collection: "users".to_string(),
        batch_size: 500,
        after_date: None,
    };
    let mut summary = ImportSummary::new();
    let written =
        strategy.export_data(&source, &mut target, &schema, &import_config, &mut summary).await.unwrap();

    assert_eq!(written, 1);
    assert_eq!(target.rows("users_targets").len(), 51);
    let full_set = target
        .current_relationship_set("users_targets", "user_id", "u2", "target_id", Some("type"))
        .await
        .unwrap();
    assert!(full_set.contains(&("t51".to_string(), "basic".to_string())));
    assert_eq!(full_set.len(), 51);
}

/// S5: FK failure row isolation. One poisoned `coaching_id` in a batch
/// of 10 fails only its own row; the other nine commit.
#[tokio::test]
async fn s5_foreign_key_violation_isolates_one_row() {
    let schema = TableSchema::from_config(TableConfig {
        name: "appointments".to_string(),
        source_collection: None,
        columns: vec![
            ColumnDefinition {
                name: "id".to_string(),
                sql_type: "VARCHAR".to_string(),
                nullable: true,
                primary_key: true,
                foreign_key: None,
            },
            ColumnDefinition {
                name: "coaching_id".to_string(),
                sql_type: "VARCHAR".to_string(),
                nullable: true,
                primary_key: false,
                foreign_key: Some("coaching(id)".to_string()),
            },
        ],
        explicit_mappings: BTreeMap::from([("_id".to_string(), "id".to_string())]),
        export_order: 2,
        strategy: StrategyKind::DirectTranslation,
        unique_constraints: Vec::new(),
        force_reimport: false,
        truncate_before_import: false,
    })
    .unwrap();

    let docs: Vec<bson::Document> = (1..=10)
        .map(|i| {
            let coaching_id = if i == 5 { "bad-coach".to_string() } else { format!("coach{i}") };
            bson::doc! { "_id": format!("r{i}"), "coaching_id": coaching_id }
        })
        .collect();
    let source = FakeSourceStore::new().with("appointments", docs);

    let mut target = FakeTargetStore::new();
    target.poison("bad-coach");

    let strategy = DirectTranslationStrategy::new(schema.clone());
    let config = ImportConfig {
        table_name: "appointments".to_string(),
        source_collection: "appointments".to_string(),
        batch_size: 500,
        after_date: None,
    };
    let mut summary = ImportSummary::new();
    let inserted = strategy.export_data(&source, &mut target, &schema, &config, &mut summary).await.unwrap();

    assert_eq!(inserted, 9);
    assert_eq!(summary.good("appointments"), 9);
    assert_eq!(summary.bad_total("appointments"), 1);
    assert_eq!(summary.tried("appointments"), 10);
    assert_eq!(target.rows("appointments").len(), 9);

    let failed = summary.failed_records("appointments");
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].reason, "Foreign key constraint");
    assert_eq!(failed[0].record_id, "r5");
}
