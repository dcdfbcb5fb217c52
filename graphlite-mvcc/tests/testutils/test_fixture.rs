// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Test fixture for GraphLite MVCC integration tests
//!
//! Each fixture owns a temporary directory. Dropping a [`Database`] without
//! a checkpoint leaves its WAL behind, which is how the tests simulate a
//! crash.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use graphlite_mvcc::{Database, DatabaseConfig, DatabaseResult, LogicalType, Value};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub struct TestFixture {
    dir: tempfile::TempDir,
    pub config: DatabaseConfig,
}

impl TestFixture {
    pub fn new() -> Self {
        Self::with_config(DatabaseConfig::default())
    }

    pub fn with_config(config: DatabaseConfig) -> Self {
        init_logging();
        Self {
            dir: tempfile::tempdir().expect("Failed to create temp dir"),
            config,
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.dir.path().join("graphlite_test")
    }

    pub fn wal_path(&self) -> PathBuf {
        self.db_path().join("data.db.wal")
    }

    pub fn shadow_path(&self) -> PathBuf {
        self.db_path().join("data.db.shadow")
    }

    pub fn data_path(&self) -> PathBuf {
        self.db_path().join("data.db")
    }

    pub fn open(&self) -> Database {
        self.try_open(self.config.clone())
            .expect("Failed to open database")
    }

    pub fn try_open(&self, config: DatabaseConfig) -> DatabaseResult<Database> {
        Database::open(self.db_path(), config)
    }

    pub fn wal_size(&self) -> u64 {
        file_size(&self.wal_path())
    }
}

pub fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

pub fn person_properties() -> Vec<(String, LogicalType)> {
    vec![
        ("id".to_string(), LogicalType::Int64),
        ("name".to_string(), LogicalType::String),
    ]
}

pub fn person(id: i64, name: &str) -> Vec<Value> {
    vec![Value::Int64(id), Value::String(name.to_string())]
}

/// Create `Person(id, name)` and insert `ids` in one committed transaction
pub fn create_people(db: &Database, ids: std::ops::Range<i64>) {
    let conn = db.connect();
    let txn = conn.begin_write_transaction().unwrap();
    db.create_node_table(&txn, "Person", person_properties(), "id")
        .unwrap();
    let rows = ids.map(|id| person(id, &format!("person-{}", id))).collect();
    db.insert_nodes(&txn, "Person", rows).unwrap();
    conn.commit().unwrap();
}

/// Insert `ids` into an existing `Person` table in one committed transaction
pub fn insert_people(db: &Database, ids: std::ops::Range<i64>) {
    let conn = db.connect();
    let txn = conn.begin_write_transaction().unwrap();
    let rows = ids.map(|id| person(id, &format!("person-{}", id))).collect();
    db.insert_nodes(&txn, "Person", rows).unwrap();
    conn.commit().unwrap();
}

/// Primary keys of the `Person` rows visible to a fresh read transaction
pub fn person_ids(db: &Database) -> Vec<i64> {
    let conn = db.connect();
    let txn = conn.begin_read_transaction().unwrap();
    let mut ids: Vec<i64> = db
        .scan_nodes(&txn, "Person")
        .unwrap()
        .into_iter()
        .filter_map(|(_, row)| match row.first() {
            Some(Value::Int64(id)) => Some(*id),
            _ => None,
        })
        .collect();
    conn.commit().unwrap();
    ids.sort();
    ids
}

pub fn has_table(db: &Database, name: &str) -> bool {
    let conn = db.connect();
    let txn = conn.begin_read_transaction().unwrap();
    db.catalog().contains_table(&txn, name)
}
