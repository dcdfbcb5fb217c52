// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Storage Manager - Owns the tables and the files backing them
//!
//! Tables are keyed by the table id the catalog assigned: the oid of a node
//! table entry, or the connection table id of a relationship group. The
//! manager also owns the shared WAL, the shadow file and the database id.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use log::{debug, info};
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::catalog::alter::{AlterInfo, AlterKind};
use crate::catalog::entry::{CatalogEntry, EntryPayload, TableSchema};
use crate::catalog::Catalog;
use crate::error::{DatabaseError, DatabaseResult};
use crate::storage::serializer::{Deserializer, Reader, Serializer, Writer};
use crate::storage::shadow_file::ShadowFile;
use crate::storage::table::{NodeTable, RelTable, Table};
use crate::storage::value::{ColumnId, TableId, Value};
use crate::storage::wal::Wal;
use crate::storage::StoragePaths;
use crate::txn::Transaction;

fn column_defaults(schema: &TableSchema) -> Vec<(ColumnId, Value)> {
    schema
        .properties
        .iter()
        .map(|p| (p.column_id, p.default_value.clone()))
        .collect()
}

#[derive(Debug)]
pub struct StorageManager {
    paths: Option<StoragePaths>,
    read_only: bool,
    wal: Arc<Wal>,
    shadow_file: ShadowFile,
    database_id: Mutex<Uuid>,
    tables: RwLock<BTreeMap<TableId, Arc<Table>>>,
}

impl StorageManager {
    /// Storage for the database in directory `dir`. Nothing is read until
    /// recovery runs.
    pub fn new(dir: &Path, enable_checksums: bool, read_only: bool) -> Self {
        let paths = StoragePaths::new(dir);
        info!("Opening storage at {}", dir.display());
        Self {
            wal: Arc::new(Wal::new(paths.wal_file.clone(), enable_checksums, read_only)),
            shadow_file: ShadowFile::new(paths.shadow_file.clone()),
            paths: Some(paths),
            read_only,
            database_id: Mutex::new(Uuid::nil()),
            tables: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            paths: None,
            read_only: false,
            wal: Arc::new(Wal::in_memory()),
            shadow_file: ShadowFile::in_memory(),
            database_id: Mutex::new(Uuid::new_v4()),
            tables: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.paths.is_none()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn paths(&self) -> Option<&StoragePaths> {
        self.paths.as_ref()
    }

    pub fn wal(&self) -> &Arc<Wal> {
        &self.wal
    }

    pub fn shadow_file(&self) -> &ShadowFile {
        &self.shadow_file
    }

    pub fn database_id(&self) -> Uuid {
        *self.database_id.lock()
    }

    /// Adopt the id read from the data file; the WAL header carries it too
    pub fn set_database_id(&self, database_id: Uuid) {
        *self.database_id.lock() = database_id;
        self.wal.set_database_id(database_id);
    }

    /// Create storage for a node table or for every connection of a
    /// relationship group, replacing any table with the same id
    pub fn create_table(&self, entry: &CatalogEntry) -> DatabaseResult<()> {
        match entry.payload() {
            EntryPayload::NodeTable(schema) => {
                let pk_column = schema.primary_key_column().ok_or_else(|| {
                    DatabaseError::Catalog(format!(
                        "Table {} has no primary key column.",
                        entry.name()
                    ))
                })?;
                let table = NodeTable::new(entry.oid(), pk_column, &column_defaults(schema));
                self.tables
                    .write()
                    .insert(entry.oid(), Arc::new(Table::Node(table)));
                debug!("Created node table {} ({})", entry.name(), entry.oid());
                Ok(())
            }
            EntryPayload::RelGroup(schema) => {
                for connection in &schema.connections {
                    self.add_rel_table(
                        connection.table_id,
                        connection.from_table_id,
                        connection.to_table_id,
                        &column_defaults(schema),
                    );
                }
                debug!(
                    "Created {} relationship tables for {}",
                    schema.connections.len(),
                    entry.name()
                );
                Ok(())
            }
            _ => Err(DatabaseError::InternalInvariantViolation(format!(
                "Cannot create storage for {} entry {}",
                entry.entry_type(),
                entry.name()
            ))),
        }
    }

    pub fn add_rel_table(
        &self,
        table_id: TableId,
        from_table_id: TableId,
        to_table_id: TableId,
        columns: &[(ColumnId, Value)],
    ) {
        let table = RelTable::new(table_id, from_table_id, to_table_id, columns);
        self.tables.write().insert(table_id, Arc::new(Table::Rel(table)));
    }

    pub fn get_table(&self, table_id: TableId) -> DatabaseResult<Arc<Table>> {
        self.tables.read().get(&table_id).cloned().ok_or_else(|| {
            DatabaseError::NotFound(format!("Table {} does not exist in storage.", table_id))
        })
    }

    pub fn contains_table(&self, table_id: TableId) -> bool {
        self.tables.read().contains_key(&table_id)
    }

    pub fn table_ids(&self) -> Vec<TableId> {
        self.tables.read().keys().copied().collect()
    }

    /// Bring storage in line with an ALTER the catalog already applied.
    /// `entry` is the table entry after the alter.
    pub fn on_table_altered(&self, entry: &CatalogEntry, info: &AlterInfo) -> DatabaseResult<()> {
        let Some(schema) = entry.table_schema() else {
            return Err(DatabaseError::InternalInvariantViolation(format!(
                "{} is not a table entry",
                entry.name()
            )));
        };
        match &info.kind {
            AlterKind::AddProperty { name, .. } => {
                let property = schema.property(name).ok_or_else(|| {
                    DatabaseError::InternalInvariantViolation(format!(
                        "Property {} missing from {} after ALTER",
                        name,
                        entry.name()
                    ))
                })?;
                let table_ids: Vec<TableId> = match entry.payload() {
                    EntryPayload::RelGroup(_) => schema.connections.iter().map(|c| c.table_id).collect(),
                    _ => vec![entry.oid()],
                };
                for table_id in table_ids {
                    self.get_table(table_id)?
                        .add_column(property.column_id, property.default_value.clone());
                }
                Ok(())
            }
            AlterKind::AddFromToConnection {
                from_table_id,
                to_table_id,
                rel_table_id,
            } => {
                self.add_rel_table(
                    *rel_table_id,
                    *from_table_id,
                    *to_table_id,
                    &column_defaults(schema),
                );
                Ok(())
            }
            // Dropped columns and tables are reclaimed at the next checkpoint.
            _ => Ok(()),
        }
    }

    /// Compact every table: drop tables and columns the catalog no longer
    /// references and fold committed versions
    pub fn checkpoint_tables(&self, catalog: &Catalog) {
        let checkpoint = Transaction::checkpoint();
        let live = catalog.storage_tables(&checkpoint);
        let mut tables = self.tables.write();
        tables.retain(|table_id, _| {
            let keep = live.contains_key(table_id);
            if !keep {
                debug!("Dropping storage of table {}", table_id);
            }
            keep
        });
        for (table_id, table) in tables.iter() {
            if let Some(columns) = live.get(table_id) {
                table.checkpoint(columns);
            }
        }
    }

    pub fn serialize<W: Writer>(&self, ser: &mut Serializer<W>) -> DatabaseResult<()> {
        let tables = self.tables.read();
        ser.write_u64(tables.len() as u64)?;
        for table in tables.values() {
            table.serialize(ser)?;
        }
        Ok(())
    }

    /// Replace all tables with a serialized image
    pub fn deserialize<R: Reader>(&self, de: &mut Deserializer<R>) -> DatabaseResult<()> {
        let num_tables = de.read_u64()?;
        let mut restored = BTreeMap::new();
        for _ in 0..num_tables {
            let table = Table::deserialize(de)?;
            restored.insert(table.table_id(), Arc::new(table));
        }
        *self.tables.write() = restored;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::entry::INVALID_OID;
    use crate::storage::serializer::{InMemReader, InMemWriter};
    use crate::storage::value::LogicalType;
    use crate::txn::timestamp::START_TRANSACTION_ID;
    use crate::txn::TransactionKind;

    fn write_txn() -> Transaction {
        Transaction::new(TransactionKind::Write, START_TRANSACTION_ID, 1, true, false)
    }

    fn person() -> CatalogEntry {
        CatalogEntry::new(
            "Person",
            EntryPayload::NodeTable(TableSchema::node(
                vec![
                    ("id".to_string(), LogicalType::Int64),
                    ("name".to_string(), LogicalType::String),
                ],
                "id",
            )),
        )
    }

    #[test]
    fn test_create_and_alter_tables() {
        let catalog = Catalog::new();
        let storage = StorageManager::in_memory();
        let txn = write_txn();
        let person = catalog.create_table_entry(&txn, person(), false).unwrap();
        storage.create_table(&person).unwrap();
        let knows = catalog
            .create_table_entry(
                &txn,
                CatalogEntry::new(
                    "Knows",
                    EntryPayload::RelGroup(TableSchema::rel(vec![], vec![(person.oid(), person.oid())])),
                ),
                false,
            )
            .unwrap();
        storage.create_table(&knows).unwrap();
        assert_eq!(storage.table_ids().len(), 2);

        let info = catalog
            .alter_table_entry(
                &txn,
                &AlterInfo::new(
                    "Person",
                    AlterKind::AddProperty {
                        name: "age".to_string(),
                        data_type: LogicalType::Int64,
                        default_value: Value::Int64(18),
                    },
                ),
            )
            .unwrap();
        let altered = catalog.get_table_entry(&txn, "Person").unwrap();
        storage.on_table_altered(&altered, &info).unwrap();
        let table = storage.get_table(person.oid()).unwrap();
        assert_eq!(table.as_node().unwrap().store().column_ids(), vec![0, 1, 2]);
        assert!(table.as_rel().is_err());
    }

    #[test]
    fn test_checkpoint_drops_orphan_tables() {
        let catalog = Catalog::new();
        let storage = StorageManager::in_memory();
        let txn = write_txn();
        let person = catalog.create_table_entry(&txn, person(), false).unwrap();
        storage.create_table(&person).unwrap();
        storage.add_rel_table(99, person.oid(), person.oid(), &[]);
        txn.undo_buffer().commit(2).unwrap();

        storage.checkpoint_tables(&catalog);
        assert_eq!(storage.table_ids(), vec![person.oid()]);
        assert!(matches!(storage.get_table(99), Err(DatabaseError::NotFound(_))));
    }

    #[test]
    fn test_serialize_round_trip() {
        let storage = StorageManager::in_memory();
        let entry = person().with_oid(3);
        storage.create_table(&entry).unwrap();
        storage.add_rel_table(4, 3, 3, &[(0, Value::Null)]);
        let txn = write_txn();
        storage
            .get_table(3)
            .unwrap()
            .as_node()
            .unwrap()
            .insert(&txn, &[0, 1], vec![vec![Value::Int64(1), Value::String("a".into())]])
            .unwrap();
        txn.undo_buffer().commit(2).unwrap();

        let mut ser = Serializer::new(InMemWriter::new());
        storage.serialize(&mut ser).unwrap();
        let restored = StorageManager::in_memory();
        let mut de = Deserializer::new(InMemReader::new(ser.into_inner().into_inner()));
        restored.deserialize(&mut de).unwrap();
        assert_eq!(restored.table_ids(), vec![3, 4]);
        let reader = Transaction::checkpoint();
        let node = restored.get_table(3).unwrap();
        assert_eq!(
            node.as_node().unwrap().lookup(&reader, &Value::Int64(1)).unwrap(),
            Some(0)
        );
        assert_ne!(restored.get_table(4).unwrap().table_id(), INVALID_OID);
    }
}
