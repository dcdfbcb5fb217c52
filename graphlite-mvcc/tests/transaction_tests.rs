// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Transaction visibility and rollback tests

#[path = "testutils/mod.rs"]
mod testutils;

use graphlite_mvcc::{Database, DatabaseConfig, DatabaseError, LogicalType, Value};
use testutils::test_fixture::{
    create_people, has_table, init_logging, insert_people, person, person_ids,
    person_properties, TestFixture,
};

fn account_properties() -> Vec<(String, LogicalType)> {
    vec![
        ("id".to_string(), LogicalType::Serial),
        ("owner".to_string(), LogicalType::String),
    ]
}

fn insert_accounts(db: &Database, owners: &[&str]) -> Vec<i64> {
    let conn = db.connect();
    let txn = conn.begin_write_transaction().unwrap();
    let rows = owners
        .iter()
        .map(|owner| vec![Value::Null, Value::String(owner.to_string())])
        .collect();
    db.insert_nodes(&txn, "Account", rows).unwrap();
    let ids = account_ids(db, &txn);
    conn.commit().unwrap();
    ids
}

fn account_ids(db: &Database, txn: &graphlite_mvcc::Transaction) -> Vec<i64> {
    let mut ids: Vec<i64> = db
        .scan_nodes(txn, "Account")
        .unwrap()
        .into_iter()
        .filter_map(|(_, row)| match row.first() {
            Some(Value::Int64(id)) => Some(*id),
            _ => None,
        })
        .collect();
    ids.sort();
    ids
}

#[test]
fn test_reader_keeps_its_snapshot() {
    init_logging();
    let db = Database::in_memory(DatabaseConfig::default()).unwrap();
    create_people(&db, 0..3);

    let reader = db.connect();
    let snapshot = reader.begin_read_transaction().unwrap();
    insert_people(&db, 3..6);

    assert_eq!(db.scan_nodes(&snapshot, "Person").unwrap().len(), 3);
    assert!(db
        .lookup_node(&snapshot, "Person", &Value::Int64(4))
        .unwrap()
        .is_none());
    reader.commit().unwrap();

    assert_eq!(person_ids(&db).len(), 6);
}

#[test]
fn test_reader_does_not_see_uncommitted_writes() {
    let db = Database::in_memory(DatabaseConfig::default()).unwrap();
    create_people(&db, 0..2);

    let writer = db.connect();
    let txn = writer.begin_write_transaction().unwrap();
    db.insert_nodes(&txn, "Person", vec![person(10, "pending")])
        .unwrap();
    db.update_node(
        &txn,
        "Person",
        &Value::Int64(0),
        "name",
        Value::String("changed".to_string()),
    )
    .unwrap();

    let reader = db.connect();
    let snapshot = reader.begin_read_transaction().unwrap();
    assert_eq!(db.scan_nodes(&snapshot, "Person").unwrap().len(), 2);
    assert_eq!(
        db.read_node_property(&snapshot, "Person", &Value::Int64(0), "name")
            .unwrap(),
        Some(Value::String("person-0".to_string()))
    );
    // The writer sees its own changes.
    assert_eq!(
        db.read_node_property(&txn, "Person", &Value::Int64(0), "name")
            .unwrap(),
        Some(Value::String("changed".to_string()))
    );
    writer.commit().unwrap();
    reader.commit().unwrap();
}

#[test]
fn test_rollback_discards_rows_and_schema() {
    let fixture = TestFixture::new();
    {
        let db = fixture.open();
        create_people(&db, 0..3);

        let conn = db.connect();
        let txn = conn.begin_write_transaction().unwrap();
        db.insert_nodes(&txn, "Person", vec![person(3, "discarded")])
            .unwrap();
        assert!(db.delete_node(&txn, "Person", &Value::Int64(0)).unwrap());
        db.create_node_table(&txn, "City", person_properties(), "id")
            .unwrap();
        conn.rollback().unwrap();

        assert_eq!(person_ids(&db), vec![0, 1, 2]);
        assert!(!has_table(&db, "City"));

        // The rolled back name can be created again.
        let txn = conn.begin_write_transaction().unwrap();
        db.create_node_table(&txn, "City", person_properties(), "id")
            .unwrap();
        conn.commit().unwrap();
    }
    let db = fixture.open();
    assert_eq!(person_ids(&db), vec![0, 1, 2]);
    assert!(has_table(&db, "City"));
}

#[test]
fn test_dropped_connection_rolls_back() {
    let db = Database::in_memory(DatabaseConfig::default()).unwrap();
    create_people(&db, 0..1);
    {
        let conn = db.connect();
        let txn = conn.begin_write_transaction().unwrap();
        db.insert_nodes(&txn, "Person", vec![person(1, "dropped")])
            .unwrap();
    }
    assert_eq!(person_ids(&db), vec![0]);
    assert_eq!(db.transaction_manager().active_count(), 0);

    // The writer slot is free again.
    insert_people(&db, 1..2);
    assert_eq!(person_ids(&db), vec![0, 1]);
}

#[test]
fn test_single_writer_by_default() {
    let db = Database::in_memory(DatabaseConfig::default()).unwrap();
    let first = db.connect();
    first.begin_write_transaction().unwrap();
    let second = db.connect();
    assert!(matches!(
        second.begin_write_transaction(),
        Err(DatabaseError::Transaction(_))
    ));
    // Readers are never blocked.
    second.begin_read_transaction().unwrap();
}

#[test]
fn test_concurrent_primary_key_insert_conflicts() {
    let config = DatabaseConfig {
        enable_multi_writes: true,
        ..DatabaseConfig::default()
    };
    let db = Database::in_memory(config).unwrap();
    create_people(&db, 0..1);

    let first = db.connect();
    let txn1 = first.begin_write_transaction().unwrap();
    let second = db.connect();
    let txn2 = second.begin_write_transaction().unwrap();

    db.insert_nodes(&txn1, "Person", vec![person(7, "first")])
        .unwrap();
    let err = db
        .insert_nodes(&txn2, "Person", vec![person(7, "second")])
        .unwrap_err();
    assert!(err.is_conflict());
    second.rollback().unwrap();
    first.commit().unwrap();

    // A committed duplicate is a constraint violation, not a conflict.
    let third = db.connect();
    let txn3 = third.begin_write_transaction().unwrap();
    assert!(matches!(
        db.insert_nodes(&txn3, "Person", vec![person(7, "third")]),
        Err(DatabaseError::AlreadyExists(_))
    ));
}

#[test]
fn test_insert_conflicts_with_later_commit() {
    let config = DatabaseConfig {
        enable_multi_writes: true,
        ..DatabaseConfig::default()
    };
    let db = Database::in_memory(config).unwrap();
    create_people(&db, 0..1);

    let late = db.connect();
    let late_txn = late.begin_write_transaction().unwrap();
    insert_people(&db, 5..6);
    assert!(db
        .insert_nodes(&late_txn, "Person", vec![person(5, "late")])
        .unwrap_err()
        .is_conflict());
}

#[test]
fn test_concurrent_table_create_conflicts() {
    let config = DatabaseConfig {
        enable_multi_writes: true,
        ..DatabaseConfig::default()
    };
    let db = Database::in_memory(config).unwrap();
    let first = db.connect();
    let txn1 = first.begin_write_transaction().unwrap();
    let second = db.connect();
    let txn2 = second.begin_write_transaction().unwrap();

    db.create_node_table(&txn1, "Person", person_properties(), "id")
        .unwrap();
    let err = db
        .create_node_table(&txn2, "Person", person_properties(), "id")
        .unwrap_err();
    assert!(err.is_conflict());
}

#[test]
fn test_serial_values_are_returned_on_rollback() {
    let fixture = TestFixture::new();
    {
        let db = fixture.open();
        let conn = db.connect();
        let txn = conn.begin_write_transaction().unwrap();
        db.create_node_table(&txn, "Account", account_properties(), "id")
            .unwrap();
        conn.commit().unwrap();

        let txn = conn.begin_write_transaction().unwrap();
        db.insert_nodes(
            &txn,
            "Account",
            vec![
                vec![Value::Null, Value::String("a".to_string())],
                vec![Value::Null, Value::String("b".to_string())],
            ],
        )
        .unwrap();
        conn.rollback().unwrap();

        assert_eq!(insert_accounts(&db, &["c", "d"]), vec![0, 1]);
    }
    let db = fixture.open();
    assert_eq!(insert_accounts(&db, &["e"]), vec![0, 1, 2]);
}

#[test]
fn test_loaded_extension_is_recovered() {
    let fixture = TestFixture::new();
    {
        let db = fixture.open();
        let conn = db.connect();
        let txn = conn.begin_write_transaction().unwrap();
        db.load_extension(&txn, "json").unwrap();
        conn.commit().unwrap();
    }
    let db = fixture.open();
    assert!(db.extensions().is_loaded("json"));
    assert_eq!(db.extensions().loaded_extensions(), vec!["json"]);
}

#[test]
fn test_read_only_transaction_commit_keeps_timestamp() {
    let db = Database::in_memory(DatabaseConfig::default()).unwrap();
    create_people(&db, 0..1);
    let before = db.transaction_manager().last_timestamp();
    let conn = db.connect();
    conn.begin_read_transaction().unwrap();
    conn.commit().unwrap();
    assert_eq!(db.transaction_manager().last_timestamp(), before);

    insert_people(&db, 1..2);
    assert_eq!(db.transaction_manager().last_timestamp(), before + 1);
}
