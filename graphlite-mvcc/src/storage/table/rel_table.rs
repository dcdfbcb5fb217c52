// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Relationship tables
//!
//! One table stores the relationships of a single FROM/TO connection of a
//! relationship group. Source and destination node ids occupy the first two
//! physical columns; property column `c` is stored at physical column `c + 2`.

use std::sync::Arc;

use crate::catalog::entry::TableType;
use crate::error::{DatabaseError, DatabaseResult};
use crate::storage::serializer::{Deserializer, Reader, Serializer, Writer};
use crate::storage::table::node_table::to_column_major;
use crate::storage::table::row_store::RowStore;
use crate::storage::table::RelDirection;
use crate::storage::value::{ColumnId, InternalId, TableId, Value};
use crate::txn::Transaction;

const SRC_COLUMN: ColumnId = 0;
const DST_COLUMN: ColumnId = 1;
const NUM_ENDPOINT_COLUMNS: ColumnId = 2;

fn physical(column_id: ColumnId) -> ColumnId {
    column_id + NUM_ENDPOINT_COLUMNS
}

/// A relationship as seen by one transaction
#[derive(Debug, Clone, PartialEq)]
pub struct RelRow {
    pub rel_id: InternalId,
    pub src: InternalId,
    pub dst: InternalId,
    pub properties: Vec<Value>,
}

#[derive(Debug)]
pub struct RelTable {
    table_id: TableId,
    from_table_id: TableId,
    to_table_id: TableId,
    store: Arc<RowStore>,
}

impl RelTable {
    pub fn new(
        table_id: TableId,
        from_table_id: TableId,
        to_table_id: TableId,
        columns: &[(ColumnId, Value)],
    ) -> Self {
        let mut physical_columns = vec![(SRC_COLUMN, Value::Null), (DST_COLUMN, Value::Null)];
        physical_columns.extend(
            columns
                .iter()
                .map(|(column_id, default)| (physical(*column_id), default.clone())),
        );
        Self {
            table_id,
            from_table_id,
            to_table_id,
            store: Arc::new(RowStore::new(table_id, &physical_columns)),
        }
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn from_table_id(&self) -> TableId {
        self.from_table_id
    }

    pub fn to_table_id(&self) -> TableId {
        self.to_table_id
    }

    pub fn store(&self) -> &Arc<RowStore> {
        &self.store
    }

    fn check_endpoints(&self, src: &InternalId, dst: &InternalId) -> DatabaseResult<()> {
        if src.table_id != self.from_table_id || dst.table_id != self.to_table_id {
            return Err(DatabaseError::Catalog(format!(
                "Relationship table {} connects {} to {}, got {} -> {}.",
                self.table_id, self.from_table_id, self.to_table_id, src, dst
            )));
        }
        Ok(())
    }

    fn endpoints(&self, txn: &Transaction, offset: u64) -> Option<(InternalId, InternalId)> {
        let src = self.store.read(txn, offset, SRC_COLUMN)?.as_internal_id()?;
        let dst = self.store.read(txn, offset, DST_COLUMN)?.as_internal_id()?;
        Some((src, dst))
    }

    /// Insert `(src, dst, properties)` rows. `column_ids` names the property
    /// columns in the order the property values are given.
    pub fn insert(
        &self,
        txn: &Transaction,
        column_ids: &[ColumnId],
        rows: Vec<(InternalId, InternalId, Vec<Value>)>,
    ) -> DatabaseResult<Vec<InternalId>> {
        txn.ensure_writable()?;
        for (src, dst, _) in &rows {
            self.check_endpoints(src, dst)?;
        }
        let mut physical_ids = vec![SRC_COLUMN, DST_COLUMN];
        physical_ids.extend(column_ids.iter().copied().map(physical));
        let num_rows = rows.len() as u64;
        let physical_rows: Vec<Vec<Value>> = rows
            .into_iter()
            .map(|(src, dst, properties)| {
                let mut row = vec![Value::InternalId(src), Value::InternalId(dst)];
                row.extend(properties);
                row
            })
            .collect();
        let vectors = txn
            .should_log_to_wal()
            .then(|| to_column_major(physical_ids.len(), &physical_rows));
        let start = self.store.append(txn, &physical_ids, physical_rows)?;
        if let Some(vectors) = vectors {
            txn.local_wal()
                .log_table_insertion(self.table_id, TableType::Rel, num_rows, vectors)?;
        }
        Ok((start..start + num_rows)
            .map(|offset| InternalId::new(self.table_id, offset))
            .collect())
    }

    /// Delete one relationship. Returns false if it is not visible to `txn`
    /// or does not connect `src` to `dst`.
    pub fn delete(
        &self,
        txn: &Transaction,
        src: InternalId,
        dst: InternalId,
        rel_id: InternalId,
    ) -> DatabaseResult<bool> {
        txn.ensure_writable()?;
        if rel_id.table_id != self.table_id || self.endpoints(txn, rel_id.offset) != Some((src, dst)) {
            return Ok(false);
        }
        if !self.store.delete(txn, rel_id.offset)? {
            return Ok(false);
        }
        if txn.should_log_to_wal() {
            txn.local_wal()
                .log_rel_deletion(self.table_id, src, dst, rel_id)?;
        }
        Ok(true)
    }

    /// Delete every relationship attached to `node` in `direction`.
    /// Returns the number of relationships deleted.
    pub fn detach_delete(
        &self,
        txn: &Transaction,
        node: InternalId,
        direction: RelDirection,
    ) -> DatabaseResult<u64> {
        txn.ensure_writable()?;
        let mut num_deleted = 0;
        for offset in self.store.visible_offsets(txn) {
            let Some((src, dst)) = self.endpoints(txn, offset) else {
                continue;
            };
            let attached = match direction {
                RelDirection::Fwd => src == node,
                RelDirection::Bwd => dst == node,
                RelDirection::Both => src == node || dst == node,
            };
            if attached && self.store.delete(txn, offset)? {
                num_deleted += 1;
            }
        }
        if num_deleted > 0 && txn.should_log_to_wal() {
            txn.local_wal()
                .log_rel_detach_delete(self.table_id, direction, node)?;
        }
        Ok(num_deleted)
    }

    pub fn update(
        &self,
        txn: &Transaction,
        src: InternalId,
        dst: InternalId,
        rel_id: InternalId,
        column_id: ColumnId,
        value: Value,
    ) -> DatabaseResult<bool> {
        txn.ensure_writable()?;
        if rel_id.table_id != self.table_id || self.endpoints(txn, rel_id.offset) != Some((src, dst)) {
            return Ok(false);
        }
        let logged = txn.should_log_to_wal().then(|| value.clone());
        if !self
            .store
            .update(txn, rel_id.offset, physical(column_id), value)?
        {
            return Ok(false);
        }
        if let Some(value) = logged {
            txn.local_wal()
                .log_rel_update(self.table_id, column_id, src, dst, rel_id, value)?;
        }
        Ok(true)
    }

    /// One property of a relationship, or `None` if it is not visible
    pub fn read(&self, txn: &Transaction, rel_id: InternalId, column_id: ColumnId) -> Option<Value> {
        if rel_id.table_id != self.table_id {
            return None;
        }
        self.store.read(txn, rel_id.offset, physical(column_id))
    }

    pub fn scan(&self, txn: &Transaction, column_ids: &[ColumnId]) -> Vec<RelRow> {
        let mut physical_ids = vec![SRC_COLUMN, DST_COLUMN];
        physical_ids.extend(column_ids.iter().copied().map(physical));
        self.store
            .scan(txn, &physical_ids)
            .into_iter()
            .filter_map(|(offset, mut values)| {
                let properties = values.split_off(2);
                Some(RelRow {
                    rel_id: InternalId::new(self.table_id, offset),
                    src: values[0].as_internal_id()?,
                    dst: values[1].as_internal_id()?,
                    properties,
                })
            })
            .collect()
    }

    pub fn add_column(&self, column_id: ColumnId, default_value: Value) {
        self.store.add_column(physical(column_id), default_value);
    }

    pub fn checkpoint(&self, live_columns: &[ColumnId]) {
        let mut physical_ids = vec![SRC_COLUMN, DST_COLUMN];
        physical_ids.extend(live_columns.iter().copied().map(physical));
        self.store.checkpoint(&physical_ids);
    }

    pub fn serialize<W: Writer>(&self, ser: &mut Serializer<W>) -> DatabaseResult<()> {
        ser.write_u64(self.from_table_id)?;
        ser.write_u64(self.to_table_id)?;
        self.store.serialize(ser)
    }

    pub fn deserialize<R: Reader>(table_id: TableId, de: &mut Deserializer<R>) -> DatabaseResult<Self> {
        let from_table_id = de.read_u64()?;
        let to_table_id = de.read_u64()?;
        let store = RowStore::deserialize(table_id, de)?;
        Ok(Self {
            table_id,
            from_table_id,
            to_table_id,
            store: Arc::new(store),
        })
    }
}
