// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Catalog - the single entry point to every catalog set
//!
//! The catalog groups one [`CatalogSet`] per kind of object and enforces the
//! cross-set rules: SERIAL properties own an implicit sequence, dropping a
//! table drops its indexes and sequences, and relationship groups get one
//! table id per FROM/TO connection.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::debug;

use crate::catalog::alter::AlterInfo;
use crate::catalog::catalog_set::CatalogSet;
use crate::catalog::entry::{
    CatalogEntry, CatalogEntryType, EntryPayload, FunctionKind, IndexDefinition, MacroDefinition,
    Oid, SequenceData, INVALID_OID,
};
use crate::error::{DatabaseError, DatabaseResult};
use crate::storage::serializer::{Deserializer, Reader, Serializer, Writer};
use crate::storage::value::{ColumnId, LogicalType, TableId};
use crate::txn::Transaction;

/// Functions available in every database
const BUILTIN_FUNCTIONS: &[(&str, FunctionKind)] = &[
    ("nextval", FunctionKind::Scalar),
    ("currval", FunctionKind::Scalar),
    ("lower", FunctionKind::Scalar),
    ("upper", FunctionKind::Scalar),
    ("show_tables", FunctionKind::Table),
    ("table_info", FunctionKind::Table),
];

/// Name of the sequence backing SERIAL property `property` of `table`
pub fn serial_sequence_name(table: &str, property: &str) -> String {
    format!("{}_{}_serial", table, property)
}

/// Catalog name of index `index` on `table_id`
pub fn index_entry_name(table_id: TableId, index: &str) -> String {
    format!("{}_{}", table_id, index)
}

#[derive(Debug)]
pub struct Catalog {
    tables: Arc<CatalogSet>,
    internal_tables: Arc<CatalogSet>,
    sequences: Arc<CatalogSet>,
    internal_sequences: Arc<CatalogSet>,
    types: Arc<CatalogSet>,
    indexes: Arc<CatalogSet>,
    macros: Arc<CatalogSet>,
    functions: Arc<CatalogSet>,
    /// Bumped by every commit that changed the catalog; reset by checkpoints
    version: AtomicU64,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(CatalogSet::new(false)),
            internal_tables: Arc::new(CatalogSet::new(true)),
            sequences: Arc::new(CatalogSet::new(false)),
            internal_sequences: Arc::new(CatalogSet::new(true)),
            types: Arc::new(CatalogSet::new(false)),
            indexes: Arc::new(CatalogSet::new(false)),
            macros: Arc::new(CatalogSet::new(false)),
            functions: Arc::new(CatalogSet::new(false)),
            version: AtomicU64::new(0),
        }
    }

    fn table_set(&self, is_internal: bool) -> &Arc<CatalogSet> {
        if is_internal {
            &self.internal_tables
        } else {
            &self.tables
        }
    }

    fn sequence_set(&self, is_internal: bool) -> &Arc<CatalogSet> {
        if is_internal {
            &self.internal_sequences
        } else {
            &self.sequences
        }
    }

    // ---- tables ----

    /// Create a node table or relationship group. Returns the entry as
    /// stored, with its oid, connection table ids and serial sequence oids
    /// filled in.
    pub fn create_table_entry(
        &self,
        txn: &Transaction,
        mut entry: CatalogEntry,
        is_internal: bool,
    ) -> DatabaseResult<CatalogEntry> {
        let set = self.table_set(is_internal).clone();
        let name = entry.name().to_string();
        match entry.payload() {
            EntryPayload::NodeTable(schema) => {
                if schema.primary_key_column().is_none() {
                    return Err(DatabaseError::Catalog(format!(
                        "Primary key {} does not exist in table {}.",
                        schema.primary_key.as_deref().unwrap_or(""),
                        name
                    )));
                }
            }
            EntryPayload::RelGroup(schema) => {
                if schema.connections.is_empty() {
                    return Err(DatabaseError::Catalog(format!(
                        "Relationship group {} needs at least one FROM/TO connection.",
                        name
                    )));
                }
                for connection in &schema.connections {
                    for node_table_id in [connection.from_table_id, connection.to_table_id] {
                        let node_table = self.get_table_entry_by_id(txn, node_table_id)?;
                        if node_table.entry_type() != CatalogEntryType::NodeTable {
                            return Err(DatabaseError::Catalog(format!(
                                "{} is not a node table.",
                                node_table.name()
                            )));
                        }
                    }
                }
            }
            _ => {
                return Err(DatabaseError::Catalog(format!(
                    "{} is not a table entry.",
                    name
                )))
            }
        }
        if set.contains_entry(txn, &name) {
            return Err(DatabaseError::AlreadyExists(format!(
                "{} already exists in catalog.",
                name
            )));
        }

        let serial_set = self.sequence_set(is_internal).clone();
        if let Some(schema) = entry.table_schema_mut() {
            for connection in &mut schema.connections {
                if connection.table_id == INVALID_OID {
                    connection.table_id = set.allocate_oid();
                } else {
                    set.reserve_oid(connection.table_id);
                }
            }
            for property in schema
                .properties
                .iter_mut()
                .filter(|p| p.data_type == LogicalType::Serial)
            {
                let sequence = CatalogEntry::new(
                    serial_sequence_name(&name, &property.name),
                    EntryPayload::Sequence(SequenceData::serial()),
                )
                .with_oid(property.serial_sequence.unwrap_or(INVALID_OID))
                .with_parent();
                property.serial_sequence = Some(serial_set.create_entry(txn, sequence)?);
            }
        }
        set.create_entry(txn, entry)?;
        let created = set.get_entry(txn, &name)?;
        debug!(
            "Created {} {} with oid {}",
            created.entry_type(),
            name,
            created.oid()
        );
        Ok(created)
    }

    /// Drop a table together with its indexes and serial sequences
    pub fn drop_table_entry(&self, txn: &Transaction, name: &str) -> DatabaseResult<()> {
        let entry = self.get_table_entry(txn, name)?;
        for (index_name, index) in self.indexes.get_entries(txn) {
            if let EntryPayload::Index(definition) = index.payload() {
                if definition.table_id == entry.oid() {
                    self.indexes.drop_entry(txn, &index_name, index.oid())?;
                }
            }
        }
        self.drop_table_and_sequences(txn, &entry)
    }

    /// Drop a table by id. Indexes are left alone; their drops are logged
    /// separately.
    pub fn drop_table_entry_by_id(&self, txn: &Transaction, table_id: TableId) -> DatabaseResult<()> {
        let entry = self.get_table_entry_by_id(txn, table_id)?;
        self.drop_table_and_sequences(txn, &entry)
    }

    fn drop_table_and_sequences(&self, txn: &Transaction, entry: &CatalogEntry) -> DatabaseResult<()> {
        let is_internal = !self.tables.contains_entry(txn, entry.name());
        let sequences = self.sequence_set(is_internal);
        if let Some(schema) = entry.table_schema() {
            for sequence_oid in schema.serial_properties().filter_map(|p| p.serial_sequence) {
                if let Some(sequence) = sequences.get_entry_of_oid(txn, sequence_oid) {
                    sequences.drop_entry(txn, sequence.name(), sequence_oid)?;
                }
            }
        }
        self.table_set(is_internal)
            .drop_entry(txn, entry.name(), entry.oid())
    }

    /// Apply an ALTER to a table. Returns the alter as applied, with the
    /// table id of a new FROM/TO connection filled in.
    pub fn alter_table_entry(&self, txn: &Transaction, info: &AlterInfo) -> DatabaseResult<AlterInfo> {
        let set = if self.tables.contains_entry(txn, &info.table_name) {
            &self.tables
        } else if self.internal_tables.contains_entry(txn, &info.table_name) {
            &self.internal_tables
        } else {
            return Err(table_not_found(&info.table_name));
        };
        set.alter_table_entry(txn, info)
    }

    pub fn get_table_entry(&self, txn: &Transaction, name: &str) -> DatabaseResult<CatalogEntry> {
        if let Ok(entry) = self.tables.get_entry(txn, name) {
            return Ok(entry);
        }
        self.internal_tables
            .get_entry(txn, name)
            .map_err(|_| table_not_found(name))
    }

    pub fn get_table_entry_by_id(&self, txn: &Transaction, table_id: TableId) -> DatabaseResult<CatalogEntry> {
        self.tables
            .get_entry_of_oid(txn, table_id)
            .or_else(|| self.internal_tables.get_entry_of_oid(txn, table_id))
            .ok_or_else(|| {
                DatabaseError::NotFound(format!("Table with id {} does not exist.", table_id))
            })
    }

    pub fn contains_table(&self, txn: &Transaction, name: &str) -> bool {
        self.tables.contains_entry(txn, name) || self.internal_tables.contains_entry(txn, name)
    }

    /// User tables visible to `txn`, ordered by name
    pub fn table_entries(&self, txn: &Transaction) -> Vec<CatalogEntry> {
        self.tables.get_entries(txn).into_values().collect()
    }

    fn all_table_entries(&self, txn: &Transaction) -> Vec<CatalogEntry> {
        let mut entries = self.table_entries(txn);
        entries.extend(self.internal_tables.get_entries(txn).into_values());
        entries
    }

    /// Relationship group owning the rel table `rel_table_id`
    pub fn rel_group_of(&self, txn: &Transaction, rel_table_id: TableId) -> Option<CatalogEntry> {
        self.all_table_entries(txn).into_iter().find(|entry| {
            entry.entry_type() == CatalogEntryType::RelGroup
                && entry
                    .table_schema()
                    .map_or(false, |s| s.connections.iter().any(|c| c.table_id == rel_table_id))
        })
    }

    /// Property column ids of a node table or of the rel table of one
    /// FROM/TO connection, in schema order
    pub fn table_column_ids(&self, txn: &Transaction, table_id: TableId) -> DatabaseResult<Vec<ColumnId>> {
        if let Ok(entry) = self.get_table_entry_by_id(txn, table_id) {
            if entry.entry_type() == CatalogEntryType::NodeTable {
                if let Some(schema) = entry.table_schema() {
                    return Ok(schema.column_ids());
                }
            }
        }
        self.rel_group_of(txn, table_id)
            .and_then(|group| group.table_schema().map(|s| s.column_ids()))
            .ok_or_else(|| {
                DatabaseError::NotFound(format!("Table with id {} does not exist.", table_id))
            })
    }

    /// Every storage table the catalog still references, with its live
    /// property columns
    pub fn storage_tables(&self, txn: &Transaction) -> BTreeMap<TableId, Vec<ColumnId>> {
        let mut tables = BTreeMap::new();
        for entry in self.all_table_entries(txn) {
            let Some(schema) = entry.table_schema() else {
                continue;
            };
            match entry.entry_type() {
                CatalogEntryType::NodeTable => {
                    tables.insert(entry.oid(), schema.column_ids());
                }
                _ => {
                    for connection in &schema.connections {
                        tables.insert(connection.table_id, schema.column_ids());
                    }
                }
            }
        }
        tables
    }

    // ---- sequences ----

    pub fn create_sequence(&self, txn: &Transaction, name: &str, data: SequenceData) -> DatabaseResult<Oid> {
        data.validate(name)?;
        self.create_sequence_entry(
            txn,
            CatalogEntry::new(name, EntryPayload::Sequence(data)),
            false,
        )
    }

    pub fn create_sequence_entry(
        &self,
        txn: &Transaction,
        entry: CatalogEntry,
        is_internal: bool,
    ) -> DatabaseResult<Oid> {
        self.sequence_set(is_internal).create_entry(txn, entry)
    }

    pub fn drop_sequence(&self, txn: &Transaction, name: &str) -> DatabaseResult<()> {
        let entry = self.sequences.get_entry(txn, name).map_err(|_| {
            DatabaseError::NotFound(format!("Sequence {} does not exist.", name))
        })?;
        if entry.has_parent() {
            return Err(DatabaseError::Catalog(format!(
                "Cannot drop sequence {} because it belongs to a SERIAL property.",
                name
            )));
        }
        self.sequences.drop_entry(txn, name, entry.oid())
    }

    pub fn drop_sequence_by_id(&self, txn: &Transaction, oid: Oid) -> DatabaseResult<()> {
        let entry = self.get_sequence_entry_by_id(txn, oid)?;
        let set = if self.sequences.contains_entry(txn, entry.name()) {
            &self.sequences
        } else {
            &self.internal_sequences
        };
        set.drop_entry(txn, entry.name(), oid)
    }

    pub fn get_sequence_entry(&self, txn: &Transaction, name: &str) -> DatabaseResult<CatalogEntry> {
        self.sequences
            .get_entry(txn, name)
            .or_else(|_| self.internal_sequences.get_entry(txn, name))
            .map_err(|_| DatabaseError::NotFound(format!("Sequence {} does not exist.", name)))
    }

    pub fn get_sequence_entry_by_id(&self, txn: &Transaction, oid: Oid) -> DatabaseResult<CatalogEntry> {
        self.sequences
            .get_entry_of_oid(txn, oid)
            .or_else(|| self.internal_sequences.get_entry_of_oid(txn, oid))
            .ok_or_else(|| {
                DatabaseError::NotFound(format!("Sequence with id {} does not exist.", oid))
            })
    }

    pub fn contains_sequence(&self, txn: &Transaction, name: &str) -> bool {
        self.sequences.contains_entry(txn, name) || self.internal_sequences.contains_entry(txn, name)
    }

    /// Call `nextval` `count` times on sequence `name`
    pub fn next_sequence_values(&self, txn: &Transaction, name: &str, count: u64) -> DatabaseResult<Vec<i64>> {
        let set = if self.sequences.contains_entry(txn, name) {
            &self.sequences
        } else {
            &self.internal_sequences
        };
        set.next_sequence_values(txn, name, count)
    }

    // ---- types ----

    /// Register a user type name. Registering an existing name is a no-op.
    pub fn create_type(&self, txn: &Transaction, name: &str, logical_type: LogicalType) -> DatabaseResult<()> {
        if self.types.contains_entry(txn, name) {
            return Ok(());
        }
        self.create_type_entry(txn, CatalogEntry::new(name, EntryPayload::Type(logical_type)))?;
        Ok(())
    }

    pub fn create_type_entry(&self, txn: &Transaction, entry: CatalogEntry) -> DatabaseResult<Oid> {
        self.types.create_entry(txn, entry)
    }

    pub fn get_type(&self, txn: &Transaction, name: &str) -> DatabaseResult<LogicalType> {
        match self.types.get_entry(txn, name).map(|e| e.payload().clone()) {
            Ok(EntryPayload::Type(logical_type)) => Ok(logical_type),
            _ => Err(DatabaseError::NotFound(format!("Type {} does not exist.", name))),
        }
    }

    pub fn contains_type(&self, txn: &Transaction, name: &str) -> bool {
        self.types.contains_entry(txn, name)
    }

    // ---- indexes ----

    pub fn create_index(
        &self,
        txn: &Transaction,
        table_id: TableId,
        name: &str,
        definition: IndexDefinition,
    ) -> DatabaseResult<Oid> {
        let table = self.get_table_entry_by_id(txn, table_id)?;
        let entry_name = index_entry_name(table_id, name);
        if self.indexes.contains_entry(txn, &entry_name) {
            return Err(DatabaseError::AlreadyExists(format!(
                "Index {} already exists in table {}.",
                name,
                table.name()
            )));
        }
        self.create_index_entry(
            txn,
            CatalogEntry::new(entry_name, EntryPayload::Index(definition)),
        )
    }

    pub fn create_index_entry(&self, txn: &Transaction, entry: CatalogEntry) -> DatabaseResult<Oid> {
        self.indexes.create_entry(txn, entry)
    }

    pub fn drop_index(&self, txn: &Transaction, table_id: TableId, name: &str) -> DatabaseResult<()> {
        let entry_name = index_entry_name(table_id, name);
        let entry = self.indexes.get_entry(txn, &entry_name).map_err(|_| {
            DatabaseError::NotFound(format!(
                "Index {} does not exist in table {}.",
                name, table_id
            ))
        })?;
        self.indexes.drop_entry(txn, &entry_name, entry.oid())
    }

    pub fn drop_index_by_id(&self, txn: &Transaction, oid: Oid) -> DatabaseResult<()> {
        let entry = self.indexes.get_entry_of_oid(txn, oid).ok_or_else(|| {
            DatabaseError::NotFound(format!("Index with OID {} does not exist.", oid))
        })?;
        self.indexes.drop_entry(txn, entry.name(), oid)
    }

    pub fn contains_index(&self, txn: &Transaction, table_id: TableId, name: &str) -> bool {
        self.indexes
            .contains_entry(txn, &index_entry_name(table_id, name))
    }

    pub fn index_entries(&self, txn: &Transaction) -> Vec<CatalogEntry> {
        self.indexes.get_entries(txn).into_values().collect()
    }

    // ---- macros ----

    pub fn add_scalar_macro(
        &self,
        txn: &Transaction,
        name: &str,
        definition: MacroDefinition,
    ) -> DatabaseResult<Oid> {
        self.add_macro_entry(
            txn,
            CatalogEntry::new(name, EntryPayload::ScalarMacro(definition)),
        )
    }

    pub fn add_macro_entry(&self, txn: &Transaction, entry: CatalogEntry) -> DatabaseResult<Oid> {
        self.macros.create_entry(txn, entry)
    }

    pub fn drop_macro(&self, txn: &Transaction, name: &str) -> DatabaseResult<()> {
        let entry = self
            .macros
            .get_entry(txn, name)
            .map_err(|_| DatabaseError::NotFound(format!("Macro {} doesn't exist.", name)))?;
        self.macros.drop_entry(txn, name, entry.oid())
    }

    pub fn drop_macro_by_id(&self, txn: &Transaction, oid: Oid) -> DatabaseResult<()> {
        let entry = self.macros.get_entry_of_oid(txn, oid).ok_or_else(|| {
            DatabaseError::NotFound(format!("Macro with id {} doesn't exist.", oid))
        })?;
        self.macros.drop_entry(txn, entry.name(), oid)
    }

    pub fn contains_macro(&self, txn: &Transaction, name: &str) -> bool {
        self.macros.contains_entry(txn, name)
    }

    // ---- functions ----

    pub fn add_function(&self, txn: &Transaction, name: &str, kind: FunctionKind) -> DatabaseResult<Oid> {
        if self.functions.contains_entry(txn, name) {
            return Err(DatabaseError::Catalog(format!(
                "function {} already exists.",
                name
            )));
        }
        self.functions
            .create_entry(txn, CatalogEntry::new(name, EntryPayload::Function(kind)))
    }

    pub fn contains_function(&self, txn: &Transaction, name: &str) -> bool {
        self.functions.contains_entry(txn, name)
    }

    /// Register the built-in functions. They are visible to every snapshot
    /// and never logged or persisted.
    pub fn register_builtin_functions(&self) -> DatabaseResult<()> {
        let bootstrap = Transaction::bootstrap();
        for (name, kind) in BUILTIN_FUNCTIONS {
            if !self.functions.contains_entry(&bootstrap, name) {
                self.add_function(&bootstrap, name, *kind)?;
            }
        }
        Ok(())
    }

    // ---- version ----

    pub fn increment_version(&self) {
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn changed_since_last_checkpoint(&self) -> bool {
        self.version() != 0
    }

    pub fn reset_version(&self) {
        self.version.store(0, Ordering::Release);
    }

    // ---- persistence ----

    pub fn serialize<W: Writer>(&self, ser: &mut Serializer<W>) -> DatabaseResult<()> {
        self.tables.serialize(ser)?;
        self.sequences.serialize(ser)?;
        self.types.serialize(ser)?;
        self.indexes.serialize(ser)?;
        self.macros.serialize(ser)?;
        self.internal_tables.serialize(ser)?;
        self.internal_sequences.serialize(ser)
    }

    /// Replace every persistent set with a serialized image
    pub fn deserialize<R: Reader>(&self, de: &mut Deserializer<R>) -> DatabaseResult<()> {
        self.tables.deserialize_into(de)?;
        self.sequences.deserialize_into(de)?;
        self.types.deserialize_into(de)?;
        self.indexes.deserialize_into(de)?;
        self.macros.deserialize_into(de)?;
        self.internal_tables.deserialize_into(de)?;
        self.internal_sequences.deserialize_into(de)
    }
}

fn table_not_found(name: &str) -> DatabaseError {
    DatabaseError::NotFound(format!("Table {} does not exist.", name))
}
