// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Versioned catalog entries
//!
//! Each named object is stored as a stack of versions: the newest version
//! owns the next older one through `prev`. Every version carries a
//! [`VersionId`] that is unique within its catalog set. Undo records use it
//! to find the version they need to stamp or unlink.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::catalog::alter::AlterKind;
use crate::error::{DatabaseError, DatabaseResult};
use crate::storage::serializer::{Deserializer, Reader, Serializer, Writer};
use crate::storage::value::{ColumnId, LogicalType, TableId, Value};
use crate::txn::timestamp::{is_commit_timestamp, is_visible, Timestamp};
use crate::txn::Transaction;

pub type Oid = u64;
pub type VersionId = u64;

pub const INVALID_OID: Oid = u64::MAX;

/// Internal catalog sets allocate from the upper part of the oid space
pub const INTERNAL_CATALOG_SET_START_OID: Oid = 1 << 47;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CatalogEntryType {
    NodeTable = 0,
    RelGroup = 2,
    ScalarMacro = 10,
    ScalarFunction = 21,
    TableFunction = 23,
    Sequence = 40,
    Type = 41,
    Index = 42,
    Dummy = 100,
}

impl CatalogEntryType {
    pub fn from_u8(value: u8) -> DatabaseResult<Self> {
        match value {
            0 => Ok(CatalogEntryType::NodeTable),
            2 => Ok(CatalogEntryType::RelGroup),
            10 => Ok(CatalogEntryType::ScalarMacro),
            21 => Ok(CatalogEntryType::ScalarFunction),
            23 => Ok(CatalogEntryType::TableFunction),
            40 => Ok(CatalogEntryType::Sequence),
            41 => Ok(CatalogEntryType::Type),
            42 => Ok(CatalogEntryType::Index),
            100 => Ok(CatalogEntryType::Dummy),
            other => Err(DatabaseError::Serialization(format!(
                "Unknown catalog entry type {}",
                other
            ))),
        }
    }

    pub fn is_function(&self) -> bool {
        matches!(
            self,
            CatalogEntryType::ScalarFunction | CatalogEntryType::TableFunction
        )
    }
}

impl fmt::Display for CatalogEntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CatalogEntryType::NodeTable => "NODE_TABLE_ENTRY",
            CatalogEntryType::RelGroup => "REL_GROUP_ENTRY",
            CatalogEntryType::ScalarMacro => "SCALAR_MACRO_ENTRY",
            CatalogEntryType::ScalarFunction => "SCALAR_FUNCTION_ENTRY",
            CatalogEntryType::TableFunction => "TABLE_FUNCTION_ENTRY",
            CatalogEntryType::Sequence => "SEQUENCE_ENTRY",
            CatalogEntryType::Type => "TYPE_ENTRY",
            CatalogEntryType::Index => "INDEX_ENTRY",
            CatalogEntryType::Dummy => "DUMMY_ENTRY",
        };
        f.write_str(name)
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TableType {
    Node = 0,
    Rel = 1,
}

impl TableType {
    pub fn from_u8(value: u8) -> DatabaseResult<Self> {
        match value {
            0 => Ok(TableType::Node),
            1 => Ok(TableType::Rel),
            other => Err(DatabaseError::Serialization(format!(
                "Invalid table type {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDefinition {
    pub name: String,
    pub data_type: LogicalType,
    pub column_id: ColumnId,
    pub default_value: Value,
    /// Sequence backing a SERIAL property
    #[serde(default)]
    pub serial_sequence: Option<Oid>,
}

/// One FROM/TO pair of a relationship group and the table storing it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelConnection {
    pub from_table_id: TableId,
    pub to_table_id: TableId,
    pub table_id: TableId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub properties: Vec<PropertyDefinition>,
    pub primary_key: Option<String>,
    pub connections: Vec<RelConnection>,
    pub comment: String,
    pub next_column_id: ColumnId,
}

impl TableSchema {
    /// Node table schema; `primary_key` must name one of the properties
    pub fn node(properties: Vec<(String, LogicalType)>, primary_key: &str) -> Self {
        let mut schema = Self::with_properties(properties);
        schema.primary_key = Some(primary_key.to_string());
        schema
    }

    /// Relationship group schema. Connection table ids are assigned by the catalog.
    pub fn rel(properties: Vec<(String, LogicalType)>, endpoints: Vec<(TableId, TableId)>) -> Self {
        let mut schema = Self::with_properties(properties);
        schema.connections = endpoints
            .into_iter()
            .map(|(from_table_id, to_table_id)| RelConnection {
                from_table_id,
                to_table_id,
                table_id: INVALID_OID,
            })
            .collect();
        schema
    }

    fn with_properties(properties: Vec<(String, LogicalType)>) -> Self {
        let properties: Vec<PropertyDefinition> = properties
            .into_iter()
            .enumerate()
            .map(|(idx, (name, data_type))| PropertyDefinition {
                name,
                data_type,
                column_id: idx as ColumnId,
                default_value: Value::Null,
                serial_sequence: None,
            })
            .collect();
        let next_column_id = properties.len() as ColumnId;
        Self {
            properties,
            primary_key: None,
            connections: Vec::new(),
            comment: String::new(),
            next_column_id,
        }
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDefinition> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn contains_property(&self, name: &str) -> bool {
        self.property(name).is_some()
    }

    pub fn column_ids(&self) -> Vec<ColumnId> {
        self.properties.iter().map(|p| p.column_id).collect()
    }

    pub fn primary_key_column(&self) -> Option<ColumnId> {
        let pk = self.primary_key.as_deref()?;
        self.property(pk).map(|p| p.column_id)
    }

    pub fn connection(&self, from_table_id: TableId, to_table_id: TableId) -> Option<&RelConnection> {
        self.connections
            .iter()
            .find(|c| c.from_table_id == from_table_id && c.to_table_id == to_table_id)
    }

    pub fn serial_properties(&self) -> impl Iterator<Item = &PropertyDefinition> {
        self.properties
            .iter()
            .filter(|p| p.data_type == LogicalType::Serial)
    }

    fn apply_alter(&mut self, table_name: &str, kind: &AlterKind) -> DatabaseResult<()> {
        match kind {
            AlterKind::RenameTable { .. } => {}
            AlterKind::Comment { comment } => self.comment = comment.clone(),
            AlterKind::AddProperty {
                name,
                data_type,
                default_value,
            } => {
                if self.contains_property(name) {
                    return Err(DatabaseError::AlreadyExists(format!(
                        "{} table already has property {}.",
                        table_name, name
                    )));
                }
                if *data_type == LogicalType::Serial {
                    return Err(DatabaseError::Catalog(format!(
                        "Cannot add SERIAL property {} to existing table {}.",
                        name, table_name
                    )));
                }
                self.properties.push(PropertyDefinition {
                    name: name.clone(),
                    data_type: *data_type,
                    column_id: self.next_column_id,
                    default_value: default_value.clone(),
                    serial_sequence: None,
                });
                self.next_column_id += 1;
            }
            AlterKind::DropProperty { name } => {
                if !self.contains_property(name) {
                    return Err(DatabaseError::NotFound(format!(
                        "{} table does not have property {}.",
                        table_name, name
                    )));
                }
                if self.primary_key.as_deref() == Some(name.as_str()) {
                    return Err(DatabaseError::Catalog(format!(
                        "Cannot drop property {} in table {} because it is used as primary key.",
                        name, table_name
                    )));
                }
                self.properties.retain(|p| &p.name != name);
            }
            AlterKind::RenameProperty { old_name, new_name } => {
                if self.contains_property(new_name) {
                    return Err(DatabaseError::AlreadyExists(format!(
                        "{} table already has property {}.",
                        table_name, new_name
                    )));
                }
                let property = self
                    .properties
                    .iter_mut()
                    .find(|p| &p.name == old_name)
                    .ok_or_else(|| {
                        DatabaseError::NotFound(format!(
                            "{} table does not have property {}.",
                            table_name, old_name
                        ))
                    })?;
                property.name = new_name.clone();
                if self.primary_key.as_deref() == Some(old_name.as_str()) {
                    self.primary_key = Some(new_name.clone());
                }
            }
            AlterKind::AddFromToConnection {
                from_table_id,
                to_table_id,
                rel_table_id,
            } => {
                if self.connection(*from_table_id, *to_table_id).is_some() {
                    return Err(DatabaseError::AlreadyExists(format!(
                        "{} already has a connection from {} to {}.",
                        table_name, from_table_id, to_table_id
                    )));
                }
                self.connections.push(RelConnection {
                    from_table_id: *from_table_id,
                    to_table_id: *to_table_id,
                    table_id: *rel_table_id,
                });
            }
            AlterKind::DropFromToConnection {
                from_table_id,
                to_table_id,
            } => {
                if self.connection(*from_table_id, *to_table_id).is_none() {
                    return Err(DatabaseError::NotFound(format!(
                        "{} does not have a connection from {} to {}.",
                        table_name, from_table_id, to_table_id
                    )));
                }
                if self.connections.len() == 1 {
                    return Err(DatabaseError::Catalog(format!(
                        "Cannot drop the last connection of {}.",
                        table_name
                    )));
                }
                self.connections.retain(|c| {
                    !(c.from_table_id == *from_table_id && c.to_table_id == *to_table_id)
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroDefinition {
    pub parameters: Vec<String>,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FunctionKind {
    Scalar,
    Table,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub table_id: TableId,
    pub index_type: String,
    pub property_ids: Vec<ColumnId>,
}

/// Sequence state before a batch of `nextval` calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceRollbackData {
    pub usage_count: u64,
    pub curr_val: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceData {
    pub start_value: i64,
    pub increment: i64,
    pub min_value: i64,
    pub max_value: i64,
    pub cycle: bool,
    pub usage_count: u64,
    pub curr_val: i64,
}

impl SequenceData {
    pub fn new(start_value: i64, increment: i64, min_value: i64, max_value: i64, cycle: bool) -> Self {
        Self {
            start_value,
            increment,
            min_value,
            max_value,
            cycle,
            usage_count: 0,
            curr_val: start_value,
        }
    }

    /// Ascending sequence starting at 0, as used for SERIAL columns
    pub fn serial() -> Self {
        Self::new(0, 1, 0, i64::MAX, false)
    }

    pub fn validate(&self, name: &str) -> DatabaseResult<()> {
        if self.increment == 0 {
            return Err(DatabaseError::Catalog(format!(
                "INCREMENT must be non-zero for sequence {}.",
                name
            )));
        }
        if self.min_value > self.max_value {
            return Err(DatabaseError::Catalog(format!(
                "MINVALUE ({}) must be less than MAXVALUE ({}) for sequence {}.",
                self.min_value, self.max_value, name
            )));
        }
        if self.start_value < self.min_value || self.start_value > self.max_value {
            return Err(DatabaseError::Catalog(format!(
                "START value ({}) must be between MINVALUE ({}) and MAXVALUE ({}) for sequence {}.",
                self.start_value, self.min_value, self.max_value, name
            )));
        }
        Ok(())
    }

    pub fn rollback_data(&self) -> SequenceRollbackData {
        SequenceRollbackData {
            usage_count: self.usage_count,
            curr_val: self.curr_val,
        }
    }

    pub fn restore(&mut self, data: SequenceRollbackData) {
        self.usage_count = data.usage_count;
        self.curr_val = data.curr_val;
    }

    /// Advance the sequence once and return the new current value
    pub fn next_val(&mut self, name: &str) -> DatabaseResult<i64> {
        if self.usage_count == 0 {
            self.usage_count += 1;
            return Ok(self.curr_val);
        }
        let next = match self.curr_val.checked_add(self.increment) {
            Some(next) if next >= self.min_value && next <= self.max_value => next,
            overflowed => {
                let below_min = match overflowed {
                    Some(next) => next < self.min_value,
                    None => self.increment < 0,
                };
                if !self.cycle {
                    let (bound, value) = if below_min {
                        ("minimum", self.min_value)
                    } else {
                        ("maximum", self.max_value)
                    };
                    return Err(DatabaseError::Catalog(format!(
                        "nextval: reached {} value of sequence \"{}\" {}",
                        bound, name, value
                    )));
                }
                if below_min {
                    self.max_value
                } else {
                    self.min_value
                }
            }
        };
        self.curr_val = next;
        self.usage_count += 1;
        Ok(next)
    }
}

/// Typed payload of a catalog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntryPayload {
    NodeTable(TableSchema),
    RelGroup(TableSchema),
    ScalarMacro(MacroDefinition),
    Function(FunctionKind),
    Sequence(SequenceData),
    Type(LogicalType),
    Index(IndexDefinition),
    Dummy,
}

impl EntryPayload {
    pub fn entry_type(&self) -> CatalogEntryType {
        match self {
            EntryPayload::NodeTable(_) => CatalogEntryType::NodeTable,
            EntryPayload::RelGroup(_) => CatalogEntryType::RelGroup,
            EntryPayload::ScalarMacro(_) => CatalogEntryType::ScalarMacro,
            EntryPayload::Function(FunctionKind::Scalar) => CatalogEntryType::ScalarFunction,
            EntryPayload::Function(FunctionKind::Table) => CatalogEntryType::TableFunction,
            EntryPayload::Sequence(_) => CatalogEntryType::Sequence,
            EntryPayload::Type(_) => CatalogEntryType::Type,
            EntryPayload::Index(_) => CatalogEntryType::Index,
            EntryPayload::Dummy => CatalogEntryType::Dummy,
        }
    }
}

/// Lightweight copy of the version a change replaced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySummary {
    pub entry_type: CatalogEntryType,
    pub oid: Oid,
    pub deleted: bool,
    pub has_parent: bool,
}

#[derive(Debug)]
pub struct CatalogEntry {
    name: String,
    oid: Oid,
    timestamp: Timestamp,
    deleted: bool,
    has_parent: bool,
    version: VersionId,
    payload: EntryPayload,
    prev: Option<Box<CatalogEntry>>,
}

impl CatalogEntry {
    pub fn new(name: impl Into<String>, payload: EntryPayload) -> Self {
        let deleted = matches!(payload, EntryPayload::Dummy);
        Self {
            name: name.into(),
            oid: INVALID_OID,
            timestamp: 0,
            deleted,
            has_parent: false,
            version: 0,
            payload,
            prev: None,
        }
    }

    /// Tombstone version marking `name` as absent
    pub fn dummy(name: impl Into<String>, oid: Oid) -> Self {
        let mut entry = Self::new(name, EntryPayload::Dummy);
        entry.oid = oid;
        entry
    }

    pub fn with_oid(mut self, oid: Oid) -> Self {
        self.oid = oid;
        self
    }

    /// Mark as owned by another entry, e.g. the sequence behind a SERIAL column
    pub fn with_parent(mut self) -> Self {
        self.has_parent = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn oid(&self) -> Oid {
        self.oid
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn has_parent(&self) -> bool {
        self.has_parent
    }

    pub fn version(&self) -> VersionId {
        self.version
    }

    pub fn entry_type(&self) -> CatalogEntryType {
        self.payload.entry_type()
    }

    pub fn payload(&self) -> &EntryPayload {
        &self.payload
    }

    pub fn prev(&self) -> Option<&CatalogEntry> {
        self.prev.as_deref()
    }

    pub fn table_schema(&self) -> Option<&TableSchema> {
        match &self.payload {
            EntryPayload::NodeTable(schema) | EntryPayload::RelGroup(schema) => Some(schema),
            _ => None,
        }
    }

    pub(crate) fn table_schema_mut(&mut self) -> Option<&mut TableSchema> {
        match &mut self.payload {
            EntryPayload::NodeTable(schema) | EntryPayload::RelGroup(schema) => Some(schema),
            _ => None,
        }
    }

    pub fn table_type(&self) -> Option<TableType> {
        match &self.payload {
            EntryPayload::NodeTable(_) => Some(TableType::Node),
            EntryPayload::RelGroup(_) => Some(TableType::Rel),
            _ => None,
        }
    }

    pub fn sequence_data(&self) -> Option<&SequenceData> {
        match &self.payload {
            EntryPayload::Sequence(data) => Some(data),
            _ => None,
        }
    }

    pub(crate) fn sequence_data_mut(&mut self) -> Option<&mut SequenceData> {
        match &mut self.payload {
            EntryPayload::Sequence(data) => Some(data),
            _ => None,
        }
    }

    pub(crate) fn set_oid(&mut self, oid: Oid) {
        self.oid = oid;
    }

    pub(crate) fn set_timestamp(&mut self, timestamp: Timestamp) {
        self.timestamp = timestamp;
    }

    pub(crate) fn set_version(&mut self, version: VersionId) {
        self.version = version;
    }

    pub(crate) fn set_prev(&mut self, prev: Option<Box<CatalogEntry>>) {
        self.prev = prev;
    }

    pub(crate) fn take_prev(&mut self) -> Option<Box<CatalogEntry>> {
        self.prev.take()
    }

    pub fn summary(&self) -> EntrySummary {
        EntrySummary {
            entry_type: self.entry_type(),
            oid: self.oid,
            deleted: self.deleted,
            has_parent: self.has_parent,
        }
    }

    /// Copy of this version without its history
    pub fn snapshot(&self) -> CatalogEntry {
        CatalogEntry {
            name: self.name.clone(),
            oid: self.oid,
            timestamp: self.timestamp,
            deleted: self.deleted,
            has_parent: self.has_parent,
            version: self.version,
            payload: self.payload.clone(),
            prev: None,
        }
    }

    /// New version of a table entry with `kind` applied, stamped with `txn_id`
    pub(crate) fn altered(
        &self,
        txn_id: Timestamp,
        table_name: &str,
        kind: &AlterKind,
    ) -> DatabaseResult<CatalogEntry> {
        let mut entry = self.snapshot();
        entry.timestamp = txn_id;
        match &mut entry.payload {
            EntryPayload::NodeTable(schema) => {
                if matches!(
                    kind,
                    AlterKind::AddFromToConnection { .. } | AlterKind::DropFromToConnection { .. }
                ) {
                    return Err(DatabaseError::Catalog(format!(
                        "{} is a node table and has no FROM/TO connections.",
                        table_name
                    )));
                }
                schema.apply_alter(table_name, kind)?;
            }
            EntryPayload::RelGroup(schema) => schema.apply_alter(table_name, kind)?,
            _ => {
                return Err(DatabaseError::Catalog(format!(
                    "{} is not a table and cannot be altered.",
                    table_name
                )))
            }
        }
        if let AlterKind::RenameTable { new_name } = kind {
            entry.name = new_name.clone();
        }
        Ok(entry)
    }

    /// Version visible to `txn`: the newest one written by `txn` itself or
    /// committed before `txn` started
    pub fn visible_version(&self, txn: &Transaction) -> Option<&CatalogEntry> {
        let mut current = Some(self);
        while let Some(entry) = current {
            if is_visible(entry.timestamp, txn.id(), txn.start_ts()) {
                return Some(entry);
            }
            current = entry.prev.as_deref();
        }
        None
    }

    pub(crate) fn visible_version_mut(&mut self, txn: &Transaction) -> Option<&mut CatalogEntry> {
        if is_visible(self.timestamp, txn.id(), txn.start_ts()) {
            return Some(self);
        }
        match self.prev.as_deref_mut() {
            Some(prev) => prev.visible_version_mut(txn),
            None => None,
        }
    }

    /// Newest version carrying a commit timestamp
    pub fn committed_version(&self) -> Option<&CatalogEntry> {
        let mut current = Some(self);
        while let Some(entry) = current {
            if is_commit_timestamp(entry.timestamp) {
                return Some(entry);
            }
            current = entry.prev.as_deref();
        }
        None
    }

    pub(crate) fn find_version_mut(&mut self, version: VersionId) -> Option<&mut CatalogEntry> {
        if self.version == version {
            return Some(self);
        }
        match self.prev.as_deref_mut() {
            Some(prev) => prev.find_version_mut(version),
            None => None,
        }
    }

    /// Unlink the version right below `self` if it is `version`
    pub(crate) fn splice_out(&mut self, version: VersionId) -> bool {
        let matches = self.prev.as_ref().map(|p| p.version) == Some(version);
        if matches {
            let removed = self.prev.take();
            self.prev = removed.and_then(|mut r| r.prev.take());
            return true;
        }
        match self.prev.as_deref_mut() {
            Some(prev) => prev.splice_out(version),
            None => false,
        }
    }

    /// Number of versions in this chain, including `self`
    pub fn chain_len(&self) -> usize {
        let mut len = 0;
        let mut current = Some(self);
        while let Some(entry) = current {
            len += 1;
            current = entry.prev.as_deref();
        }
        len
    }

    /// Creation placeholder with nothing underneath it
    pub(crate) fn is_bare_dummy(&self) -> bool {
        self.deleted && self.prev.is_none() && is_commit_timestamp(self.timestamp)
    }

    pub fn serialize<W: Writer>(&self, ser: &mut Serializer<W>) -> DatabaseResult<()> {
        if self.deleted {
            return Err(DatabaseError::InternalInvariantViolation(format!(
                "Attempted to serialize deleted catalog entry {}",
                self.name
            )));
        }
        ser.write_u8(self.entry_type() as u8)?;
        ser.write_u64(self.oid)?;
        ser.write_string(&self.name)?;
        ser.write_bool(self.has_parent)?;
        let payload = bincode::serialize(&self.payload)?;
        ser.write_bytes(&payload)
    }

    pub fn deserialize<R: Reader>(de: &mut Deserializer<R>) -> DatabaseResult<CatalogEntry> {
        let entry_type = CatalogEntryType::from_u8(de.read_u8()?)?;
        let oid = de.read_u64()?;
        let name = de.read_string()?;
        let has_parent = de.read_bool()?;
        let payload: EntryPayload = bincode::deserialize(&de.read_bytes()?)?;
        if payload.entry_type() != entry_type {
            return Err(DatabaseError::Serialization(format!(
                "Catalog entry {} is tagged {} but carries a {} payload",
                name,
                entry_type,
                payload.entry_type()
            )));
        }
        let mut entry = CatalogEntry::new(name, payload).with_oid(oid);
        entry.has_parent = has_parent;
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::serializer::{InMemReader, InMemWriter};

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
        .with_oid(5)
    }

    #[test]
    fn test_entry_serialize_round_trip() {
        let entry = person();
        let mut ser = Serializer::new(InMemWriter::new());
        entry.serialize(&mut ser).unwrap();
        let mut de = Deserializer::new(InMemReader::new(ser.into_inner().into_inner()));
        let restored = CatalogEntry::deserialize(&mut de).unwrap();
        assert_eq!(restored.name(), "Person");
        assert_eq!(restored.oid(), 5);
        assert_eq!(restored.timestamp(), 0);
        assert_eq!(restored.payload(), entry.payload());
    }

    #[test]
    fn test_dummy_cannot_be_serialized() {
        let mut ser = Serializer::new(InMemWriter::new());
        let result = CatalogEntry::dummy("x", 1).serialize(&mut ser);
        assert!(matches!(
            result,
            Err(DatabaseError::InternalInvariantViolation(_))
        ));
    }

    #[test]
    fn test_alter_add_and_drop_property() {
        let entry = person();
        let added = entry
            .altered(
                7,
                "Person",
                &AlterKind::AddProperty {
                    name: "age".to_string(),
                    data_type: LogicalType::Int64,
                    default_value: Value::Int64(0),
                },
            )
            .unwrap();
        let schema = added.table_schema().unwrap();
        assert_eq!(schema.property("age").unwrap().column_id, 2);
        assert_eq!(added.timestamp(), 7);

        let dropped = added
            .altered(8, "Person", &AlterKind::DropProperty { name: "age".into() })
            .unwrap();
        assert!(!dropped.table_schema().unwrap().contains_property("age"));
        assert_eq!(dropped.table_schema().unwrap().next_column_id, 3);
    }

    #[test]
    fn test_alter_cannot_drop_primary_key() {
        let result = person().altered(1, "Person", &AlterKind::DropProperty { name: "id".into() });
        assert!(matches!(result, Err(DatabaseError::Catalog(_))));
    }

    #[test]
    fn test_sequence_next_val() {
        let mut seq = SequenceData::new(1, 2, 1, 6, false);
        assert_eq!(seq.next_val("s").unwrap(), 1);
        assert_eq!(seq.next_val("s").unwrap(), 3);
        assert_eq!(seq.next_val("s").unwrap(), 5);
        assert!(matches!(seq.next_val("s"), Err(DatabaseError::Catalog(_))));
    }

    #[test]
    fn test_sequence_cycle_and_restore() {
        let mut seq = SequenceData::new(9, 1, 8, 10, true);
        let before = seq.rollback_data();
        assert_eq!(seq.next_val("s").unwrap(), 9);
        assert_eq!(seq.next_val("s").unwrap(), 10);
        assert_eq!(seq.next_val("s").unwrap(), 8);
        seq.restore(before);
        assert_eq!(seq.usage_count, 0);
        assert_eq!(seq.curr_val, 9);
    }

    #[test]
    fn test_sequence_overflow_without_cycle() {
        let mut seq = SequenceData::new(i64::MAX - 1, 1, 0, i64::MAX, false);
        seq.next_val("s").unwrap();
        assert_eq!(seq.next_val("s").unwrap(), i64::MAX);
        assert!(seq.next_val("s").is_err());
    }

    #[test]
    fn test_chain_splice() {
        let mut head = person();
        head.set_version(3);
        let mut middle = person();
        middle.set_version(2);
        let mut bottom = CatalogEntry::dummy("Person", 5);
        bottom.set_version(1);
        middle.set_prev(Some(Box::new(bottom)));
        head.set_prev(Some(Box::new(middle)));
        assert_eq!(head.chain_len(), 3);
        assert!(head.splice_out(2));
        assert_eq!(head.chain_len(), 2);
        assert_eq!(head.prev().unwrap().version(), 1);
        assert!(!head.splice_out(9));
    }
}
