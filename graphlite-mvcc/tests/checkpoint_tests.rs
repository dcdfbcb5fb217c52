// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Checkpoint tests
//!
//! Checkpoints fold the WAL into the data file. Everything checkpointed
//! must survive a restart without any WAL left to replay.

#[path = "testutils/mod.rs"]
mod testutils;

use graphlite_mvcc::{
    AlterInfo, AlterKind, DatabaseConfig, DatabaseError, LogicalType, RelDirection, Value,
};
use testutils::test_fixture::{
    create_people, file_size, has_table, insert_people, person, person_ids, TestFixture,
};

#[test]
#[serial_test::serial]
fn test_checkpoint_truncates_wal() {
    let fixture = TestFixture::new();
    {
        let db = fixture.open();
        create_people(&db, 0..50);
        assert!(fixture.wal_size() > 0);
        db.checkpoint().unwrap();
        assert_eq!(fixture.wal_size(), 0);
        assert!(!fixture.shadow_path().exists());
    }
    let db = fixture.open();
    assert_eq!(person_ids(&db), (0..50).collect::<Vec<_>>());
}

#[test]
#[serial_test::serial]
fn test_commits_after_checkpoint_are_replayed() {
    let fixture = TestFixture::new();
    {
        let db = fixture.open();
        create_people(&db, 0..5);
        db.checkpoint().unwrap();
        insert_people(&db, 5..9);
        assert!(fixture.wal_size() > 0);
    }
    let db = fixture.open();
    assert_eq!(person_ids(&db), (0..9).collect::<Vec<_>>());
}

#[test]
#[serial_test::serial]
fn test_auto_checkpoint_past_threshold() {
    let config = DatabaseConfig {
        checkpoint_threshold: 1,
        ..DatabaseConfig::default()
    };
    let fixture = TestFixture::with_config(config);
    {
        let db = fixture.open();
        create_people(&db, 0..10);
        assert_eq!(fixture.wal_size(), 0);
        assert!(file_size(&fixture.data_path()) > 4096);
    }
    let db = fixture.open();
    assert_eq!(person_ids(&db).len(), 10);
}

#[test]
#[serial_test::serial]
fn test_auto_checkpoint_disabled() {
    let config = DatabaseConfig {
        auto_checkpoint: false,
        checkpoint_threshold: 1,
        ..DatabaseConfig::default()
    };
    let fixture = TestFixture::with_config(config);
    let db = fixture.open();
    create_people(&db, 0..10);
    assert!(fixture.wal_size() > 0);
}

#[test]
#[serial_test::serial]
fn test_checkpoint_times_out_with_open_reader() {
    let config = DatabaseConfig {
        checkpoint_wait_timeout_ms: 50,
        ..DatabaseConfig::default()
    };
    let fixture = TestFixture::with_config(config);
    let db = fixture.open();
    create_people(&db, 0..3);

    let reader = db.connect();
    reader.begin_read_transaction().unwrap();
    match db.checkpoint() {
        Err(DatabaseError::Transaction(msg)) => assert!(msg.contains("Timeout")),
        other => panic!("expected a checkpoint timeout, got {:?}", other),
    }
    assert!(fixture.wal_size() > 0);

    reader.commit().unwrap();
    db.checkpoint().unwrap();
    assert_eq!(fixture.wal_size(), 0);
}

#[test]
#[serial_test::serial]
fn test_checkpoint_waits_for_reader_to_finish() {
    let fixture = TestFixture::new();
    let db = std::sync::Arc::new(fixture.open());
    create_people(&db, 0..3);

    let reader = db.connect();
    reader.begin_read_transaction().unwrap();
    let handle = {
        let db = db.clone();
        std::thread::spawn(move || db.checkpoint())
    };
    std::thread::sleep(std::time::Duration::from_millis(30));
    reader.commit().unwrap();
    handle.join().unwrap().unwrap();
    assert_eq!(fixture.wal_size(), 0);
}

#[test]
#[serial_test::serial]
fn test_copy_forces_checkpoint() {
    let fixture = TestFixture::new();
    {
        let db = fixture.open();
        create_people(&db, 0..0);
        let conn = db.connect();
        let txn = conn.begin_write_transaction().unwrap();
        let rows = (0..100).map(|id| person(id, "copied")).collect();
        assert_eq!(db.copy_nodes(&txn, "Person", rows).unwrap(), 100);
        conn.commit().unwrap();
        assert_eq!(fixture.wal_size(), 0);
    }
    let db = fixture.open();
    assert_eq!(person_ids(&db).len(), 100);
}

#[test]
#[serial_test::serial]
fn test_copy_with_open_reader_is_checkpointed_once_reader_leaves() {
    let config = DatabaseConfig {
        checkpoint_wait_timeout_ms: 50,
        ..DatabaseConfig::default()
    };
    let fixture = TestFixture::with_config(config);
    {
        let db = fixture.open();
        create_people(&db, 0..2);
        let reader = db.connect();
        reader.begin_read_transaction().unwrap();

        let conn = db.connect();
        let txn = conn.begin_write_transaction().unwrap();
        db.copy_nodes(&txn, "Person", vec![person(10, "a"), person(11, "b")])
            .unwrap();
        match conn.commit() {
            Err(DatabaseError::Transaction(msg)) => assert!(msg.contains("Timeout")),
            other => panic!("expected a checkpoint timeout, got {:?}", other),
        }
        assert!(db.transaction_manager().has_pending_checkpoint());
        assert_eq!(person_ids(&db), vec![0, 1, 10, 11]);

        // The last transaction to leave runs the deferred checkpoint.
        reader.commit().unwrap();
        assert!(!db.transaction_manager().has_pending_checkpoint());
        assert_eq!(fixture.wal_size(), 0);
    }
    let db = fixture.open();
    assert_eq!(person_ids(&db), vec![0, 1, 10, 11]);
}

#[test]
#[serial_test::serial]
fn test_copy_commit_waits_for_reader() {
    let fixture = TestFixture::new();
    {
        let db = std::sync::Arc::new(fixture.open());
        create_people(&db, 0..2);
        let reader = db.connect();
        reader.begin_read_transaction().unwrap();

        let handle = {
            let db = db.clone();
            std::thread::spawn(move || {
                let conn = db.connect();
                let txn = conn.begin_write_transaction()?;
                db.copy_nodes(&txn, "Person", vec![person(10, "a"), person(11, "b")])?;
                conn.commit()
            })
        };
        std::thread::sleep(std::time::Duration::from_millis(30));
        reader.commit().unwrap();
        handle.join().unwrap().unwrap();
        assert_eq!(fixture.wal_size(), 0);
    }
    let db = fixture.open();
    assert_eq!(person_ids(&db), vec![0, 1, 10, 11]);
}

#[test]
#[serial_test::serial]
fn test_dropped_table_is_reclaimed() {
    let fixture = TestFixture::new();
    let table_id;
    {
        let db = fixture.open();
        create_people(&db, 0..10);
        let conn = db.connect();
        let txn = conn.begin_write_transaction().unwrap();
        table_id = db.catalog().get_table_entry(&txn, "Person").unwrap().oid();
        db.drop_table(&txn, "Person").unwrap();
        conn.commit().unwrap();
        // Storage lives on until the checkpoint.
        assert!(db.storage().contains_table(table_id));
        db.checkpoint().unwrap();
        assert!(!db.storage().contains_table(table_id));
    }
    let db = fixture.open();
    assert!(!has_table(&db, "Person"));
    assert!(!db.storage().contains_table(table_id));
}

#[test]
#[serial_test::serial]
fn test_dropped_table_survives_replay() {
    let fixture = TestFixture::new();
    {
        let db = fixture.open();
        create_people(&db, 0..4);
        let conn = db.connect();
        let txn = conn.begin_write_transaction().unwrap();
        db.drop_table(&txn, "Person").unwrap();
        conn.commit().unwrap();
    }
    let db = fixture.open();
    assert!(!has_table(&db, "Person"));

    // The name is free again.
    create_people(&db, 0..2);
    assert_eq!(person_ids(&db), vec![0, 1]);
}

#[test]
#[serial_test::serial]
fn test_alter_table_survives_restart() {
    let fixture = TestFixture::new();
    {
        let db = fixture.open();
        create_people(&db, 0..3);
        let conn = db.connect();
        let txn = conn.begin_write_transaction().unwrap();
        db.alter_table(
            &txn,
            AlterInfo::new(
                "Person",
                AlterKind::AddProperty {
                    name: "age".to_string(),
                    data_type: LogicalType::Int64,
                    default_value: Value::Int64(30),
                },
            ),
        )
        .unwrap();
        db.update_node(&txn, "Person", &Value::Int64(1), "age", Value::Int64(41))
            .unwrap();
        db.alter_table(
            &txn,
            AlterInfo::new(
                "Person",
                AlterKind::RenameTable {
                    new_name: "Human".to_string(),
                },
            ),
        )
        .unwrap();
        conn.commit().unwrap();
    }

    let check = |db: &graphlite_mvcc::Database| {
        assert!(!has_table(db, "Person"));
        assert!(has_table(db, "Human"));
        let conn = db.connect();
        let txn = conn.begin_read_transaction().unwrap();
        assert_eq!(
            db.read_node_property(&txn, "Human", &Value::Int64(0), "age")
                .unwrap(),
            Some(Value::Int64(30))
        );
        assert_eq!(
            db.read_node_property(&txn, "Human", &Value::Int64(1), "age")
                .unwrap(),
            Some(Value::Int64(41))
        );
        conn.commit().unwrap();
    };

    // Replayed from the WAL, then loaded from the checkpoint image.
    {
        let db = fixture.open();
        check(&db);
        db.checkpoint().unwrap();
    }
    let db = fixture.open();
    check(&db);
}

#[test]
#[serial_test::serial]
fn test_dropped_property_is_gone_after_restart() {
    let fixture = TestFixture::new();
    {
        let db = fixture.open();
        create_people(&db, 0..3);
        let conn = db.connect();
        let txn = conn.begin_write_transaction().unwrap();
        db.alter_table(
            &txn,
            AlterInfo::new(
                "Person",
                AlterKind::DropProperty {
                    name: "name".to_string(),
                },
            ),
        )
        .unwrap();
        conn.commit().unwrap();
        db.checkpoint().unwrap();
    }
    let db = fixture.open();
    let conn = db.connect();
    let txn = conn.begin_read_transaction().unwrap();
    assert!(matches!(
        db.read_node_property(&txn, "Person", &Value::Int64(0), "name"),
        Err(DatabaseError::NotFound(_))
    ));
    let rows = db.scan_nodes(&txn, "Person").unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|(_, values)| values.len() == 1));
}

#[test]
#[serial_test::serial]
fn test_relationships_and_detach_delete_are_recovered() {
    let fixture = TestFixture::new();
    {
        let db = fixture.open();
        create_people(&db, 0..3);
        let conn = db.connect();
        let txn = conn.begin_write_transaction().unwrap();
        db.create_rel_group(
            &txn,
            "Knows",
            vec![("since".to_string(), LogicalType::Int64)],
            &[("Person", "Person")],
        )
        .unwrap();
        let lookup = |pk: i64| {
            db.lookup_node(&txn, "Person", &Value::Int64(pk))
                .unwrap()
                .unwrap()
        };
        let (p0, p1, p2) = (lookup(0), lookup(1), lookup(2));
        db.insert_rels(
            &txn,
            "Knows",
            ("Person", "Person"),
            vec![
                (p0, p1, vec![Value::Int64(2001)]),
                (p1, p2, vec![Value::Int64(2002)]),
                (p2, p0, vec![Value::Int64(2003)]),
            ],
        )
        .unwrap();
        conn.commit().unwrap();

        let txn = conn.begin_write_transaction().unwrap();
        let rel_table = db.rel_table_id(&txn, "Knows", "Person", "Person").unwrap();
        let storage_table = db.storage().get_table(rel_table).unwrap();
        let deleted = storage_table
            .as_rel()
            .unwrap()
            .detach_delete(&txn, p0, RelDirection::Both)
            .unwrap();
        assert_eq!(deleted, 2);
        conn.commit().unwrap();
    }

    let db = fixture.open();
    let conn = db.connect();
    let txn = conn.begin_read_transaction().unwrap();
    let rel_table = db.rel_table_id(&txn, "Knows", "Person", "Person").unwrap();
    let storage_table = db.storage().get_table(rel_table).unwrap();
    let rels = storage_table.as_rel().unwrap().scan(&txn, &[0]);
    assert_eq!(rels.len(), 1);
    assert_eq!(rels[0].properties, vec![Value::Int64(2002)]);
}

#[test]
#[serial_test::serial]
fn test_deleted_and_updated_nodes_are_recovered() {
    let fixture = TestFixture::new();
    {
        let db = fixture.open();
        create_people(&db, 0..5);
        let conn = db.connect();
        let txn = conn.begin_write_transaction().unwrap();
        assert!(db.delete_node(&txn, "Person", &Value::Int64(2)).unwrap());
        assert!(db
            .update_node(
                &txn,
                "Person",
                &Value::Int64(4),
                "name",
                Value::String("renamed".to_string())
            )
            .unwrap());
        conn.commit().unwrap();
    }
    let db = fixture.open();
    assert_eq!(person_ids(&db), vec![0, 1, 3, 4]);
    let conn = db.connect();
    let txn = conn.begin_read_transaction().unwrap();
    assert_eq!(
        db.read_node_property(&txn, "Person", &Value::Int64(4), "name")
            .unwrap(),
        Some(Value::String("renamed".to_string()))
    );
}

#[test]
#[serial_test::serial]
fn test_checkpoint_in_read_only_mode_is_a_no_op() {
    let fixture = TestFixture::new();
    {
        let db = fixture.open();
        create_people(&db, 0..2);
    }
    let wal_len = fixture.wal_size();
    let config = DatabaseConfig {
        read_only: true,
        ..DatabaseConfig::default()
    };
    let db = fixture.try_open(config).unwrap();
    db.checkpoint().unwrap();
    assert_eq!(fixture.wal_size(), wal_len);
}
