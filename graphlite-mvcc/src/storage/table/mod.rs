// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Node and relationship tables over MVCC row storage

pub mod node_table;
pub mod rel_table;
pub mod row_store;

pub use node_table::NodeTable;
pub use rel_table::{RelRow, RelTable};
pub use row_store::{RowStore, RowVersion, NODE_GROUP_SIZE, VECTOR_CAPACITY};

use crate::catalog::entry::TableType;
use crate::error::{DatabaseError, DatabaseResult};
use crate::storage::serializer::{Deserializer, Reader, Serializer, Writer};
use crate::storage::value::{ColumnId, TableId, Value};

/// Which endpoint of a relationship a detach delete matches on
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelDirection {
    Fwd = 0,
    Bwd = 1,
    Both = 2,
}

impl RelDirection {
    pub fn from_u8(value: u8) -> DatabaseResult<Self> {
        match value {
            0 => Ok(RelDirection::Fwd),
            1 => Ok(RelDirection::Bwd),
            2 => Ok(RelDirection::Both),
            other => Err(DatabaseError::Serialization(format!(
                "Unknown relationship direction {}",
                other
            ))),
        }
    }
}

#[derive(Debug)]
pub enum Table {
    Node(NodeTable),
    Rel(RelTable),
}

impl Table {
    pub fn table_id(&self) -> TableId {
        match self {
            Table::Node(table) => table.table_id(),
            Table::Rel(table) => table.table_id(),
        }
    }

    pub fn table_type(&self) -> TableType {
        match self {
            Table::Node(_) => TableType::Node,
            Table::Rel(_) => TableType::Rel,
        }
    }

    pub fn as_node(&self) -> DatabaseResult<&NodeTable> {
        match self {
            Table::Node(table) => Ok(table),
            Table::Rel(table) => Err(DatabaseError::Catalog(format!(
                "Table {} is not a node table.",
                table.table_id()
            ))),
        }
    }

    pub fn as_rel(&self) -> DatabaseResult<&RelTable> {
        match self {
            Table::Rel(table) => Ok(table),
            Table::Node(table) => Err(DatabaseError::Catalog(format!(
                "Table {} is not a relationship table.",
                table.table_id()
            ))),
        }
    }

    pub fn add_column(&self, column_id: ColumnId, default_value: Value) {
        match self {
            Table::Node(table) => table.store().add_column(column_id, default_value),
            Table::Rel(table) => table.add_column(column_id, default_value),
        }
    }

    pub fn checkpoint(&self, live_columns: &[ColumnId]) {
        match self {
            Table::Node(table) => table.checkpoint(live_columns),
            Table::Rel(table) => table.checkpoint(live_columns),
        }
    }

    pub fn num_live_rows(&self) -> u64 {
        match self {
            Table::Node(table) => table.store().num_live_rows(),
            Table::Rel(table) => table.store().num_live_rows(),
        }
    }

    pub fn serialize<W: Writer>(&self, ser: &mut Serializer<W>) -> DatabaseResult<()> {
        ser.write_u8(self.table_type() as u8)?;
        ser.write_u64(self.table_id())?;
        match self {
            Table::Node(table) => table.serialize(ser),
            Table::Rel(table) => table.serialize(ser),
        }
    }

    pub fn deserialize<R: Reader>(de: &mut Deserializer<R>) -> DatabaseResult<Self> {
        let table_type = TableType::from_u8(de.read_u8()?)?;
        let table_id = de.read_u64()?;
        match table_type {
            TableType::Node => Ok(Table::Node(NodeTable::deserialize(table_id, de)?)),
            TableType::Rel => Ok(Table::Rel(RelTable::deserialize(table_id, de)?)),
        }
    }
}
