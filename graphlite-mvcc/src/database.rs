// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Database handle
//!
//! Opening a database wires the catalog, storage, transaction manager and
//! extension registry together and runs crash recovery. Connections are
//! [`TransactionContext`]s; the DDL and DML helpers take the transaction
//! they run in.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::info;

use crate::catalog::alter::{AlterInfo, AlterKind};
use crate::catalog::entry::{CatalogEntry, CatalogEntryType, EntryPayload, TableSchema};
use crate::catalog::Catalog;
use crate::config::DatabaseConfig;
use crate::error::{DatabaseError, DatabaseResult};
use crate::extension::ExtensionManager;
use crate::storage::value::{ColumnId, InternalId, LogicalType, TableId, Value};
use crate::storage::wal::WalReplayer;
use crate::storage::StorageManager;
use crate::txn::{Transaction, TransactionContext, TransactionManager};

/// Main database handle
pub struct Database {
    path: Option<PathBuf>,
    config: DatabaseConfig,
    catalog: Arc<Catalog>,
    storage: Arc<StorageManager>,
    extensions: Arc<ExtensionManager>,
    manager: Arc<TransactionManager>,
}

impl Database {
    /// Open or create the database in directory `dir`, recovering from the
    /// WAL if the last session did not shut down cleanly
    pub fn open<P: AsRef<Path>>(dir: P, config: DatabaseConfig) -> DatabaseResult<Self> {
        config.validate()?;
        let dir = dir.as_ref();
        if !config.read_only {
            std::fs::create_dir_all(dir)?;
        } else if !dir.exists() {
            return Err(DatabaseError::NotFound(format!(
                "Cannot open database at {} in read-only mode: the directory does not exist.",
                dir.display()
            )));
        }
        let storage = Arc::new(StorageManager::new(
            dir,
            config.enable_checksums,
            config.read_only,
        ));
        let db = Self::assemble(Some(dir.to_path_buf()), config, storage)?;
        WalReplayer::new(db.manager.clone(), &db.extensions).replay()?;
        info!(
            "Opened database {} at {} ({} tables)",
            db.storage.database_id(),
            dir.display(),
            db.storage.table_ids().len()
        );
        Ok(db)
    }

    /// Database that lives only in memory; nothing is logged or persisted
    pub fn in_memory(config: DatabaseConfig) -> DatabaseResult<Self> {
        config.validate()?;
        Self::assemble(None, config, Arc::new(StorageManager::in_memory()))
    }

    fn assemble(
        path: Option<PathBuf>,
        config: DatabaseConfig,
        storage: Arc<StorageManager>,
    ) -> DatabaseResult<Self> {
        let catalog = Arc::new(Catalog::new());
        catalog.register_builtin_functions()?;
        let manager = Arc::new(TransactionManager::new(
            config.clone(),
            catalog.clone(),
            storage.clone(),
        ));
        Ok(Self {
            path,
            config,
            catalog,
            storage,
            extensions: Arc::new(ExtensionManager::new()),
            manager,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn storage(&self) -> &Arc<StorageManager> {
        &self.storage
    }

    pub fn extensions(&self) -> &Arc<ExtensionManager> {
        &self.extensions
    }

    pub fn transaction_manager(&self) -> &Arc<TransactionManager> {
        &self.manager
    }

    /// New connection with its own transaction slot
    pub fn connect(&self) -> TransactionContext {
        TransactionContext::new(self.manager.clone())
    }

    pub fn checkpoint(&self) -> DatabaseResult<()> {
        self.manager.checkpoint()
    }

    // ---- DDL ----

    pub fn create_node_table(
        &self,
        txn: &Transaction,
        name: &str,
        properties: Vec<(String, LogicalType)>,
        primary_key: &str,
    ) -> DatabaseResult<TableId> {
        txn.ensure_writable()?;
        let entry = CatalogEntry::new(
            name,
            EntryPayload::NodeTable(TableSchema::node(properties, primary_key)),
        );
        let created = self.catalog.create_table_entry(txn, entry, false)?;
        self.storage.create_table(&created)?;
        Ok(created.oid())
    }

    /// Create a relationship group with one FROM/TO connection per
    /// `(from, to)` pair of node table names
    pub fn create_rel_group(
        &self,
        txn: &Transaction,
        name: &str,
        properties: Vec<(String, LogicalType)>,
        endpoints: &[(&str, &str)],
    ) -> DatabaseResult<TableId> {
        txn.ensure_writable()?;
        let mut connections = Vec::with_capacity(endpoints.len());
        for (from, to) in endpoints {
            let from_id = self.catalog.get_table_entry(txn, from)?.oid();
            let to_id = self.catalog.get_table_entry(txn, to)?.oid();
            connections.push((from_id, to_id));
        }
        let entry = CatalogEntry::new(
            name,
            EntryPayload::RelGroup(TableSchema::rel(properties, connections)),
        );
        let created = self.catalog.create_table_entry(txn, entry, false)?;
        self.storage.create_table(&created)?;
        Ok(created.oid())
    }

    /// Drop a table. Its storage is reclaimed at the next checkpoint.
    pub fn drop_table(&self, txn: &Transaction, name: &str) -> DatabaseResult<()> {
        txn.ensure_writable()?;
        self.catalog.drop_table_entry(txn, name)
    }

    pub fn alter_table(&self, txn: &Transaction, info: AlterInfo) -> DatabaseResult<()> {
        txn.ensure_writable()?;
        let resolved = self.catalog.alter_table_entry(txn, &info)?;
        let table_name = match &resolved.kind {
            AlterKind::RenameTable { new_name } => new_name.as_str(),
            _ => resolved.table_name.as_str(),
        };
        let entry = self.catalog.get_table_entry(txn, table_name)?;
        self.storage.on_table_altered(&entry, &resolved)
    }

    pub fn load_extension(&self, txn: &Transaction, path: &str) -> DatabaseResult<()> {
        txn.ensure_writable()?;
        self.extensions.load(path)?;
        if txn.should_log_to_wal() {
            txn.local_wal().log_load_extension(path.trim())?;
        }
        Ok(())
    }

    // ---- DML ----

    fn node_table_entry(&self, txn: &Transaction, table: &str) -> DatabaseResult<(CatalogEntry, TableSchema)> {
        let entry = self.catalog.get_table_entry(txn, table)?;
        if entry.entry_type() != CatalogEntryType::NodeTable {
            return Err(DatabaseError::Catalog(format!("{} is not a node table.", table)));
        }
        let schema = entry
            .table_schema()
            .cloned()
            .ok_or_else(|| DatabaseError::Catalog(format!("{} is not a node table.", table)))?;
        Ok((entry, schema))
    }

    fn property_column(schema: &TableSchema, table: &str, property: &str) -> DatabaseResult<ColumnId> {
        schema.property(property).map(|p| p.column_id).ok_or_else(|| {
            DatabaseError::NotFound(format!(
                "Property {} does not exist in table {}.",
                property, table
            ))
        })
    }

    /// Insert node rows holding one value per property in schema order.
    /// A NULL in a SERIAL column takes the next value of its sequence.
    pub fn insert_nodes(
        &self,
        txn: &Transaction,
        table: &str,
        mut rows: Vec<Vec<Value>>,
    ) -> DatabaseResult<Vec<InternalId>> {
        txn.ensure_writable()?;
        let (entry, schema) = self.node_table_entry(txn, table)?;
        for row in &rows {
            if row.len() != schema.properties.len() {
                return Err(DatabaseError::Catalog(format!(
                    "Table {} has {} properties but a row holds {} values.",
                    table,
                    schema.properties.len(),
                    row.len()
                )));
            }
        }
        for (position, property) in schema.properties.iter().enumerate() {
            if property.data_type != LogicalType::Serial {
                continue;
            }
            let missing: Vec<usize> = rows
                .iter()
                .enumerate()
                .filter(|(_, row)| row[position].is_null())
                .map(|(idx, _)| idx)
                .collect();
            if missing.is_empty() {
                continue;
            }
            // Looked up by oid: the sequence keeps its name across table renames.
            let sequence_oid = property.serial_sequence.ok_or_else(|| {
                DatabaseError::InternalInvariantViolation(format!(
                    "SERIAL property {} of {} has no sequence",
                    property.name, table
                ))
            })?;
            let sequence = self.catalog.get_sequence_entry_by_id(txn, sequence_oid)?;
            let values =
                self.catalog
                    .next_sequence_values(txn, sequence.name(), missing.len() as u64)?;
            for (idx, value) in missing.into_iter().zip(values) {
                rows[idx][position] = Value::Int64(value);
            }
        }
        let column_ids = self.catalog.table_column_ids(txn, entry.oid())?;
        let storage_table = self.storage.get_table(entry.oid())?;
        let offsets = storage_table.as_node()?.insert(txn, &column_ids, rows)?;
        Ok(offsets
            .into_iter()
            .map(|offset| InternalId::new(entry.oid(), offset))
            .collect())
    }

    /// Bulk load node rows. The rows are persisted by the checkpoint that
    /// follows the commit.
    pub fn copy_nodes(
        &self,
        txn: &Transaction,
        table: &str,
        rows: Vec<Vec<Value>>,
    ) -> DatabaseResult<u64> {
        txn.ensure_writable()?;
        let (entry, _) = self.node_table_entry(txn, table)?;
        let column_ids = self.catalog.table_column_ids(txn, entry.oid())?;
        let storage_table = self.storage.get_table(entry.oid())?;
        let offsets = storage_table.as_node()?.copy_rows(txn, &column_ids, rows)?;
        Ok(offsets.len() as u64)
    }

    /// Id of the node of `table` whose primary key is `pk`
    pub fn lookup_node(&self, txn: &Transaction, table: &str, pk: &Value) -> DatabaseResult<Option<InternalId>> {
        let (entry, _) = self.node_table_entry(txn, table)?;
        let storage_table = self.storage.get_table(entry.oid())?;
        Ok(storage_table
            .as_node()?
            .lookup(txn, pk)?
            .map(|offset| InternalId::new(entry.oid(), offset)))
    }

    pub fn read_node_property(
        &self,
        txn: &Transaction,
        table: &str,
        pk: &Value,
        property: &str,
    ) -> DatabaseResult<Option<Value>> {
        let (entry, schema) = self.node_table_entry(txn, table)?;
        let column_id = Self::property_column(&schema, table, property)?;
        let storage_table = self.storage.get_table(entry.oid())?;
        let node_table = storage_table.as_node()?;
        Ok(node_table
            .lookup(txn, pk)?
            .and_then(|offset| node_table.read(txn, offset, column_id)))
    }

    pub fn update_node(
        &self,
        txn: &Transaction,
        table: &str,
        pk: &Value,
        property: &str,
        value: Value,
    ) -> DatabaseResult<bool> {
        txn.ensure_writable()?;
        let (entry, schema) = self.node_table_entry(txn, table)?;
        let column_id = Self::property_column(&schema, table, property)?;
        let storage_table = self.storage.get_table(entry.oid())?;
        let node_table = storage_table.as_node()?;
        match node_table.lookup(txn, pk)? {
            Some(offset) => node_table.update(txn, offset, column_id, value),
            None => Ok(false),
        }
    }

    pub fn delete_node(&self, txn: &Transaction, table: &str, pk: &Value) -> DatabaseResult<bool> {
        txn.ensure_writable()?;
        let (entry, _) = self.node_table_entry(txn, table)?;
        let storage_table = self.storage.get_table(entry.oid())?;
        let node_table = storage_table.as_node()?;
        match node_table.lookup(txn, pk)? {
            Some(offset) => node_table.delete(txn, offset),
            None => Ok(false),
        }
    }

    /// Rows of `table` visible to `txn` as `(offset, values in schema order)`
    pub fn scan_nodes(&self, txn: &Transaction, table: &str) -> DatabaseResult<Vec<(u64, Vec<Value>)>> {
        let (entry, schema) = self.node_table_entry(txn, table)?;
        let storage_table = self.storage.get_table(entry.oid())?;
        Ok(storage_table.as_node()?.scan(txn, &schema.column_ids()))
    }

    /// Storage table id of the `from -> to` connection of a relationship group
    pub fn rel_table_id(&self, txn: &Transaction, group: &str, from: &str, to: &str) -> DatabaseResult<TableId> {
        let entry = self.catalog.get_table_entry(txn, group)?;
        let from_id = self.catalog.get_table_entry(txn, from)?.oid();
        let to_id = self.catalog.get_table_entry(txn, to)?.oid();
        entry
            .table_schema()
            .and_then(|schema| schema.connection(from_id, to_id))
            .map(|connection| connection.table_id)
            .ok_or_else(|| {
                DatabaseError::NotFound(format!(
                    "Relationship {} has no connection from {} to {}.",
                    group, from, to
                ))
            })
    }

    /// Insert relationships of the `from -> to` connection of `group`.
    /// Property values follow the group's schema order.
    pub fn insert_rels(
        &self,
        txn: &Transaction,
        group: &str,
        (from, to): (&str, &str),
        rows: Vec<(InternalId, InternalId, Vec<Value>)>,
    ) -> DatabaseResult<Vec<InternalId>> {
        txn.ensure_writable()?;
        let table_id = self.rel_table_id(txn, group, from, to)?;
        let column_ids = self.catalog.table_column_ids(txn, table_id)?;
        let storage_table = self.storage.get_table(table_id)?;
        storage_table.as_rel()?.insert(txn, &column_ids, rows)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("database_id", &self.storage.database_id())
            .field("read_only", &self.config.read_only)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person_properties() -> Vec<(String, LogicalType)> {
        vec![
            ("id".to_string(), LogicalType::Int64),
            ("name".to_string(), LogicalType::String),
        ]
    }

    #[test]
    fn test_in_memory_database() {
        let db = Database::in_memory(DatabaseConfig::default()).unwrap();
        let conn = db.connect();
        let txn = conn.begin_write_transaction().unwrap();
        db.create_node_table(&txn, "Person", person_properties(), "id")
            .unwrap();
        let ids = db
            .insert_nodes(
                &txn,
                "Person",
                vec![
                    vec![Value::Int64(1), Value::String("Alice".into())],
                    vec![Value::Int64(2), Value::String("Bob".into())],
                ],
            )
            .unwrap();
        db.create_rel_group(&txn, "Knows", vec![], &[("Person", "Person")])
            .unwrap();
        db.insert_rels(&txn, "Knows", ("Person", "Person"), vec![(ids[0], ids[1], vec![])])
            .unwrap();
        conn.commit().unwrap();

        let reader = conn.begin_read_transaction().unwrap();
        assert_eq!(db.scan_nodes(&reader, "Person").unwrap().len(), 2);
        assert_eq!(
            db.read_node_property(&reader, "Person", &Value::Int64(2), "name")
                .unwrap(),
            Some(Value::String("Bob".into()))
        );
        let rel_table = db
            .rel_table_id(&reader, "Knows", "Person", "Person")
            .unwrap();
        let storage_table = db.storage().get_table(rel_table).unwrap();
        assert_eq!(storage_table.as_rel().unwrap().scan(&reader, &[]).len(), 1);
        conn.commit().unwrap();
    }

    #[test]
    fn test_serial_column_filled_from_sequence() {
        let db = Database::in_memory(DatabaseConfig::default()).unwrap();
        let conn = db.connect();
        let txn = conn.begin_write_transaction().unwrap();
        db.create_node_table(
            &txn,
            "Account",
            vec![
                ("id".to_string(), LogicalType::Serial),
                ("owner".to_string(), LogicalType::String),
            ],
            "id",
        )
        .unwrap();
        db.insert_nodes(
            &txn,
            "Account",
            vec![
                vec![Value::Null, Value::String("a".into())],
                vec![Value::Null, Value::String("b".into())],
            ],
        )
        .unwrap();
        assert!(db
            .lookup_node(&txn, "Account", &Value::Int64(1))
            .unwrap()
            .is_some());
        conn.commit().unwrap();
    }

    #[test]
    fn test_read_transaction_rejects_ddl() {
        let db = Database::in_memory(DatabaseConfig::default()).unwrap();
        let conn = db.connect();
        let txn = conn.begin_read_transaction().unwrap();
        assert!(matches!(
            db.create_node_table(&txn, "Person", person_properties(), "id"),
            Err(DatabaseError::Transaction(_))
        ));
    }

    #[test]
    fn test_wrong_row_width_rejected() {
        let db = Database::in_memory(DatabaseConfig::default()).unwrap();
        let conn = db.connect();
        let txn = conn.begin_write_transaction().unwrap();
        db.create_node_table(&txn, "Person", person_properties(), "id")
            .unwrap();
        assert!(db
            .insert_nodes(&txn, "Person", vec![vec![Value::Int64(1)]])
            .is_err());
    }
}
