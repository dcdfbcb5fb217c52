// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Column-major row storage with per-row insert/delete versions
//!
//! Rows are appended in place and stamped with the writing transaction's
//! id. The undo buffer later replaces the id with a commit timestamp, or
//! reverts the change. Column updates live in [`ColumnUpdates`] chains until
//! a checkpoint folds the committed ones into the base columns.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::{DatabaseError, DatabaseResult};
use crate::storage::serializer::{Deserializer, Reader, Serializer, Writer};
use crate::storage::value::{ColumnId, TableId, Value};
use crate::storage::version::{ChunkedGroupOp, UpdateInfo, VersionRecordHandler};
use crate::txn::timestamp::{is_commit_timestamp, is_visible, Timestamp, INVALID_TRANSACTION};
use crate::txn::Transaction;

/// Rows per node group; undo records never span two groups
pub const NODE_GROUP_SIZE: u64 = 8192;

/// Rows per update vector
pub const VECTOR_CAPACITY: u64 = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowVersion {
    pub insert_ts: Timestamp,
    /// `INVALID_TRANSACTION` while the row is live
    pub delete_ts: Timestamp,
}

impl RowVersion {
    fn inserted_by(ts: Timestamp) -> Self {
        Self {
            insert_ts: ts,
            delete_ts: INVALID_TRANSACTION,
        }
    }

    pub fn is_visible(&self, txn: &Transaction) -> bool {
        let inserted = self.insert_ts != INVALID_TRANSACTION
            && is_visible(self.insert_ts, txn.id(), txn.start_ts());
        let deleted = self.delete_ts != INVALID_TRANSACTION
            && is_visible(self.delete_ts, txn.id(), txn.start_ts());
        inserted && !deleted
    }

    /// Inserted by another transaction that has not committed yet
    pub fn is_pending_insert(&self, txn: &Transaction) -> bool {
        self.insert_ts != INVALID_TRANSACTION
            && !is_commit_timestamp(self.insert_ts)
            && self.insert_ts != txn.id()
    }

    fn is_live(&self) -> bool {
        self.insert_ts != INVALID_TRANSACTION && self.delete_ts == INVALID_TRANSACTION
    }
}

/// Uncommitted or not-yet-folded updates of one update vector
#[derive(Debug, Clone)]
pub struct VectorUpdateInfo {
    pub update_id: u64,
    /// Writing transaction id until commit, then the commit timestamp
    pub version: Timestamp,
    /// Row within the vector → new value
    pub values: BTreeMap<u64, Value>,
}

/// Update chains of one column, oldest first per vector
#[derive(Debug)]
pub struct ColumnUpdates {
    column_id: ColumnId,
    vectors: Mutex<BTreeMap<u64, Vec<VectorUpdateInfo>>>,
    next_update_id: AtomicU64,
}

impl ColumnUpdates {
    fn new(column_id: ColumnId) -> Self {
        Self {
            column_id,
            vectors: Mutex::new(BTreeMap::new()),
            next_update_id: AtomicU64::new(0),
        }
    }

    pub fn column_id(&self) -> ColumnId {
        self.column_id
    }

    /// Record `value` for `row`. Returns the vector index and update id when
    /// a new update record was started for `txn`.
    fn update(&self, txn: &Transaction, row: u64, value: Value) -> DatabaseResult<Option<(u64, u64)>> {
        let vector_idx = row / VECTOR_CAPACITY;
        let row_in_vector = row % VECTOR_CAPACITY;
        let mut vectors = self.vectors.lock();
        let chain = vectors.entry(vector_idx).or_default();
        let conflicting = chain.iter().any(|info| {
            info.values.contains_key(&row_in_vector)
                && !is_visible(info.version, txn.id(), txn.start_ts())
        });
        if conflicting {
            return Err(DatabaseError::Conflict(
                "Write-write conflict of updating the same row.".to_string(),
            ));
        }
        if let Some(own) = chain.iter_mut().rev().find(|info| info.version == txn.id()) {
            own.values.insert(row_in_vector, value);
            return Ok(None);
        }
        let update_id = self.next_update_id.fetch_add(1, Ordering::Relaxed);
        let mut values = BTreeMap::new();
        values.insert(row_in_vector, value);
        chain.push(VectorUpdateInfo {
            update_id,
            version: txn.id(),
            values,
        });
        Ok(Some((vector_idx, update_id)))
    }

    /// Newest update of `row` visible to `txn`
    fn read(&self, txn: &Transaction, row: u64) -> Option<Value> {
        let vectors = self.vectors.lock();
        let chain = vectors.get(&(row / VECTOR_CAPACITY))?;
        chain
            .iter()
            .rev()
            .filter(|info| is_visible(info.version, txn.id(), txn.start_ts()))
            .find_map(|info| info.values.get(&(row % VECTOR_CAPACITY)).cloned())
    }

    /// Apply committed updates to `base` and forget them
    fn fold_committed(&self, base: &mut [Value]) {
        let mut vectors = self.vectors.lock();
        for (vector_idx, chain) in vectors.iter_mut() {
            chain.retain(|info| {
                if !is_commit_timestamp(info.version) {
                    return true;
                }
                for (row, value) in &info.values {
                    let offset = (vector_idx * VECTOR_CAPACITY + row) as usize;
                    if let Some(slot) = base.get_mut(offset) {
                        *slot = value.clone();
                    }
                }
                false
            });
        }
        vectors.retain(|_, chain| !chain.is_empty());
    }

    fn truncate(&self, num_rows: u64) {
        let mut vectors = self.vectors.lock();
        for (vector_idx, chain) in vectors.iter_mut() {
            for info in chain.iter_mut() {
                info.values
                    .retain(|row, _| vector_idx * VECTOR_CAPACITY + row < num_rows);
            }
        }
    }

    fn find<T>(
        &self,
        vector_idx: u64,
        update_id: u64,
        f: impl FnOnce(&mut Vec<VectorUpdateInfo>, usize) -> T,
    ) -> DatabaseResult<T> {
        let mut vectors = self.vectors.lock();
        let chain = vectors.get_mut(&vector_idx).ok_or_else(|| {
            DatabaseError::InternalInvariantViolation(format!(
                "Update vector {} of column {} does not exist",
                vector_idx, self.column_id
            ))
        })?;
        let position = chain
            .iter()
            .position(|info| info.update_id == update_id)
            .ok_or_else(|| {
                DatabaseError::InternalInvariantViolation(format!(
                    "Update {} is missing from vector {} of column {}",
                    update_id, vector_idx, self.column_id
                ))
            })?;
        Ok(f(chain, position))
    }
}

impl UpdateInfo for ColumnUpdates {
    fn commit(&self, vector_idx: u64, update_id: u64, commit_ts: Timestamp) -> DatabaseResult<()> {
        self.find(vector_idx, update_id, |chain, position| {
            chain[position].version = commit_ts;
        })
    }

    fn rollback(&self, vector_idx: u64, update_id: u64) -> DatabaseResult<()> {
        self.find(vector_idx, update_id, |chain, position| {
            chain.remove(position);
        })
    }
}

#[derive(Debug, Default)]
struct RowStoreInner {
    versions: Vec<RowVersion>,
    columns: BTreeMap<ColumnId, Vec<Value>>,
}

impl RowStoreInner {
    fn row(&self, table_id: TableId, offset: u64) -> DatabaseResult<&RowVersion> {
        self.versions
            .get(offset as usize)
            .ok_or_else(|| out_of_range(table_id, offset))
    }
}

fn out_of_range(table_id: TableId, offset: u64) -> DatabaseError {
    DatabaseError::NotFound(format!(
        "Row {} does not exist in table {}.",
        offset, table_id
    ))
}

/// Split `[start, start + num_rows)` at node group boundaries
fn node_group_ranges(start: u64, num_rows: u64) -> Vec<(u64, u64, u64)> {
    let mut ranges = Vec::new();
    let mut row = start;
    let end = start + num_rows;
    while row < end {
        let node_group_idx = row / NODE_GROUP_SIZE;
        let start_row = row % NODE_GROUP_SIZE;
        let len = (NODE_GROUP_SIZE - start_row).min(end - row);
        ranges.push((node_group_idx, start_row, len));
        row += len;
    }
    ranges
}

#[derive(Debug)]
pub struct RowStore {
    table_id: TableId,
    inner: RwLock<RowStoreInner>,
    updates: RwLock<BTreeMap<ColumnId, Arc<ColumnUpdates>>>,
}

impl RowStore {
    pub fn new(table_id: TableId, columns: &[(ColumnId, Value)]) -> Self {
        let inner = RowStoreInner {
            versions: Vec::new(),
            columns: columns
                .iter()
                .map(|(column_id, _)| (*column_id, Vec::new()))
                .collect(),
        };
        Self {
            table_id,
            inner: RwLock::new(inner),
            updates: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn num_rows(&self) -> u64 {
        self.inner.read().versions.len() as u64
    }

    pub fn column_ids(&self) -> Vec<ColumnId> {
        self.inner.read().columns.keys().copied().collect()
    }

    pub fn row_version(&self, offset: u64) -> Option<RowVersion> {
        self.inner.read().versions.get(offset as usize).copied()
    }

    /// Stored value of a column ignoring versions and pending updates
    pub fn base_value(&self, offset: u64, column_id: ColumnId) -> Option<Value> {
        self.inner
            .read()
            .columns
            .get(&column_id)
            .and_then(|column| column.get(offset as usize).cloned())
    }

    pub fn is_visible(&self, txn: &Transaction, offset: u64) -> bool {
        self.row_version(offset)
            .map_or(false, |version| version.is_visible(txn))
    }

    /// Append `rows`, each holding one value per entry of `column_ids`.
    /// Columns not listed are filled with NULL. Returns the first offset.
    pub fn append(
        self: &Arc<Self>,
        txn: &Transaction,
        column_ids: &[ColumnId],
        rows: Vec<Vec<Value>>,
    ) -> DatabaseResult<u64> {
        let num_rows = rows.len() as u64;
        let start = {
            let mut inner = self.inner.write();
            for column_id in column_ids {
                if !inner.columns.contains_key(column_id) {
                    return Err(DatabaseError::Catalog(format!(
                        "Column {} does not exist in table {}.",
                        column_id, self.table_id
                    )));
                }
            }
            if let Some(row) = rows.iter().find(|row| row.len() != column_ids.len()) {
                return Err(DatabaseError::Catalog(format!(
                    "Expected {} values per row but got {}.",
                    column_ids.len(),
                    row.len()
                )));
            }
            let start = inner.versions.len() as u64;
            for row in rows {
                inner.versions.push(RowVersion::inserted_by(txn.id()));
                let mut row_values: BTreeMap<ColumnId, Value> =
                    column_ids.iter().copied().zip(row).collect();
                for (column_id, column) in inner.columns.iter_mut() {
                    column.push(row_values.remove(column_id).unwrap_or_default());
                }
            }
            start
        };
        if txn.should_append_to_undo_buffer() {
            for (node_group_idx, start_row, len) in node_group_ranges(start, num_rows) {
                txn.push_insert_info(self.clone(), node_group_idx, start_row, len);
            }
        }
        txn.local_storage().record_insert(self.table_id, start, num_rows);
        Ok(start)
    }

    /// Mark a row deleted by `txn`. Returns false if the row is not visible.
    pub fn delete(self: &Arc<Self>, txn: &Transaction, offset: u64) -> DatabaseResult<bool> {
        {
            let mut inner = self.inner.write();
            let table_id = self.table_id;
            let version = inner
                .versions
                .get_mut(offset as usize)
                .ok_or_else(|| out_of_range(table_id, offset))?;
            if !version.is_visible(txn) {
                return Ok(false);
            }
            if version.delete_ts != INVALID_TRANSACTION {
                return Err(DatabaseError::Conflict(format!(
                    "Write-write conflict on deleting row {} of table {}.",
                    offset, table_id
                )));
            }
            version.delete_ts = txn.id();
        }
        if txn.should_append_to_undo_buffer() {
            txn.push_delete_info(
                self.clone(),
                offset / NODE_GROUP_SIZE,
                offset % NODE_GROUP_SIZE,
                1,
            );
        }
        txn.local_storage().record_delete(self.table_id, 1);
        Ok(true)
    }

    /// Set one value of a visible row. Returns false if the row is not visible.
    pub fn update(
        &self,
        txn: &Transaction,
        offset: u64,
        column_id: ColumnId,
        value: Value,
    ) -> DatabaseResult<bool> {
        {
            let inner = self.inner.read();
            if !inner.row(self.table_id, offset)?.is_visible(txn) {
                return Ok(false);
            }
            if !inner.columns.contains_key(&column_id) {
                return Err(DatabaseError::Catalog(format!(
                    "Column {} does not exist in table {}.",
                    column_id, self.table_id
                )));
            }
        }
        let column_updates = self
            .updates
            .write()
            .entry(column_id)
            .or_insert_with(|| Arc::new(ColumnUpdates::new(column_id)))
            .clone();
        if let Some((vector_idx, update_id)) = column_updates.update(txn, offset, value)? {
            if txn.should_append_to_undo_buffer() {
                txn.push_vector_update_info(column_updates, vector_idx, update_id);
            }
        }
        txn.local_storage().record_update(self.table_id);
        Ok(true)
    }

    /// Value of one column as seen by `txn`, or `None` if the row is not visible
    pub fn read(&self, txn: &Transaction, offset: u64, column_id: ColumnId) -> Option<Value> {
        if !self.is_visible(txn, offset) {
            return None;
        }
        let updated = self
            .updates
            .read()
            .get(&column_id)
            .and_then(|updates| updates.read(txn, offset));
        if updated.is_some() {
            return updated;
        }
        self.base_value(offset, column_id)
    }

    pub fn read_row(&self, txn: &Transaction, offset: u64, column_ids: &[ColumnId]) -> Option<Vec<Value>> {
        if !self.is_visible(txn, offset) {
            return None;
        }
        column_ids
            .iter()
            .map(|column_id| self.read(txn, offset, *column_id))
            .collect()
    }

    /// Offsets of every row visible to `txn`
    pub fn visible_offsets(&self, txn: &Transaction) -> Vec<u64> {
        self.inner
            .read()
            .versions
            .iter()
            .enumerate()
            .filter(|(_, version)| version.is_visible(txn))
            .map(|(offset, _)| offset as u64)
            .collect()
    }

    pub fn scan(&self, txn: &Transaction, column_ids: &[ColumnId]) -> Vec<(u64, Vec<Value>)> {
        self.visible_offsets(txn)
            .into_iter()
            .filter_map(|offset| Some((offset, self.read_row(txn, offset, column_ids)?)))
            .collect()
    }

    /// Add a column filled with `default_value`, replacing any column with the same id
    pub fn add_column(&self, column_id: ColumnId, default_value: Value) {
        let mut inner = self.inner.write();
        let num_rows = inner.versions.len();
        inner
            .columns
            .insert(column_id, vec![default_value; num_rows]);
        self.updates.write().remove(&column_id);
    }

    pub fn drop_column(&self, column_id: ColumnId) {
        self.inner.write().columns.remove(&column_id);
        self.updates.write().remove(&column_id);
    }

    /// Fold committed updates, drop columns outside `live_columns` and
    /// rebase committed versions to timestamp 0 so that they stay visible
    /// once the commit clock restarts
    pub fn checkpoint(&self, live_columns: &[ColumnId]) {
        let dropped: Vec<ColumnId> = self
            .column_ids()
            .into_iter()
            .filter(|column_id| !live_columns.contains(column_id))
            .collect();
        for column_id in dropped {
            self.drop_column(column_id);
        }
        let mut inner = self.inner.write();
        for (column_id, updates) in self.updates.read().iter() {
            if let Some(column) = inner.columns.get_mut(column_id) {
                updates.fold_committed(column);
            }
        }
        for version in inner.versions.iter_mut() {
            if is_commit_timestamp(version.insert_ts) {
                version.insert_ts = 0;
            }
            if is_commit_timestamp(version.delete_ts) {
                version.delete_ts = 0;
            }
        }
    }

    pub fn num_live_rows(&self) -> u64 {
        self.inner
            .read()
            .versions
            .iter()
            .filter(|version| version.is_live())
            .count() as u64
    }

    pub fn serialize<W: Writer>(&self, ser: &mut Serializer<W>) -> DatabaseResult<()> {
        let inner = self.inner.read();
        ser.write_u64(inner.versions.len() as u64)?;
        for version in &inner.versions {
            ser.write_u64(version.insert_ts)?;
            ser.write_u64(version.delete_ts)?;
        }
        ser.write_u64(inner.columns.len() as u64)?;
        for (column_id, values) in &inner.columns {
            ser.write_u32(*column_id)?;
            Value::serialize_vector(values, ser)?;
        }
        Ok(())
    }

    pub fn deserialize<R: Reader>(table_id: TableId, de: &mut Deserializer<R>) -> DatabaseResult<Self> {
        let num_rows = de.read_u64()?;
        let mut versions = Vec::new();
        for _ in 0..num_rows {
            versions.push(RowVersion {
                insert_ts: de.read_u64()?,
                delete_ts: de.read_u64()?,
            });
        }
        let num_columns = de.read_u64()?;
        let mut columns = BTreeMap::new();
        for _ in 0..num_columns {
            let column_id = de.read_u32()?;
            let values = Value::deserialize_vector(de)?;
            if values.len() as u64 != num_rows {
                return Err(DatabaseError::Corruption(format!(
                    "Column {} of table {} has {} values for {} rows",
                    column_id,
                    table_id,
                    values.len(),
                    num_rows
                )));
            }
            columns.insert(column_id, values);
        }
        Ok(Self {
            table_id,
            inner: RwLock::new(RowStoreInner { versions, columns }),
            updates: RwLock::new(BTreeMap::new()),
        })
    }
}

impl VersionRecordHandler for RowStore {
    fn apply_func_to_chunked_groups(
        &self,
        op: ChunkedGroupOp,
        node_group_idx: u64,
        start_row: u64,
        num_rows: u64,
        commit_ts: Timestamp,
    ) -> DatabaseResult<()> {
        let mut inner = self.inner.write();
        let start = node_group_idx * NODE_GROUP_SIZE + start_row;
        for offset in start..start + num_rows {
            let table_id = self.table_id;
            let version = inner
                .versions
                .get_mut(offset as usize)
                .ok_or_else(|| out_of_range(table_id, offset))?;
            match op {
                ChunkedGroupOp::CommitInsert => version.insert_ts = commit_ts,
                ChunkedGroupOp::CommitDelete => version.delete_ts = commit_ts,
                ChunkedGroupOp::RollbackDelete => version.delete_ts = INVALID_TRANSACTION,
            }
        }
        Ok(())
    }

    fn rollback_insert(&self, node_group_idx: u64, start_row: u64, num_rows: u64) -> DatabaseResult<()> {
        let mut inner = self.inner.write();
        let start = node_group_idx * NODE_GROUP_SIZE + start_row;
        let end = start + num_rows;
        if end as usize > inner.versions.len() {
            return Err(out_of_range(self.table_id, end - 1));
        }
        if end as usize == inner.versions.len() {
            // Rows at the tail can be removed outright.
            inner.versions.truncate(start as usize);
            for column in inner.columns.values_mut() {
                column.truncate(start as usize);
            }
            for updates in self.updates.read().values() {
                updates.truncate(start);
            }
        } else {
            for version in &mut inner.versions[start as usize..end as usize] {
                version.insert_ts = INVALID_TRANSACTION;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txn::timestamp::START_TRANSACTION_ID;
    use crate::txn::TransactionKind;

    fn txn(id_offset: u64, start_ts: Timestamp) -> Transaction {
        Transaction::new(
            TransactionKind::Write,
            START_TRANSACTION_ID + id_offset,
            start_ts,
            true,
            false,
        )
    }

    fn store() -> Arc<RowStore> {
        Arc::new(RowStore::new(1, &[(0, Value::Null), (1, Value::Null)]))
    }

    fn row(id: i64, name: &str) -> Vec<Value> {
        vec![Value::Int64(id), Value::String(name.to_string())]
    }

    #[test]
    fn test_insert_visible_after_commit_only() {
        let store = store();
        let writer = txn(0, 1);
        store
            .append(&writer, &[0, 1], vec![row(1, "a"), row(2, "b")])
            .unwrap();
        let reader = txn(1, 1);
        assert_eq!(store.visible_offsets(&writer), vec![0, 1]);
        assert!(store.visible_offsets(&reader).is_empty());

        writer.undo_buffer().commit(2).unwrap();
        assert!(store.visible_offsets(&reader).is_empty());
        let later = txn(2, 2);
        assert_eq!(store.read(&later, 1, 1), Some(Value::String("b".into())));
    }

    #[test]
    fn test_rollback_insert_truncates_tail() {
        let store = store();
        let writer = txn(0, 1);
        store.append(&writer, &[0], vec![vec![Value::Int64(1)]]).unwrap();
        assert_eq!(store.read(&writer, 0, 1), Some(Value::Null));
        writer.undo_buffer().rollback().unwrap();
        assert_eq!(store.num_rows(), 0);
    }

    #[test]
    fn test_delete_conflict_and_rollback() {
        let store = store();
        let writer = txn(0, 1);
        store.append(&writer, &[0, 1], vec![row(1, "a")]).unwrap();
        writer.undo_buffer().commit(2).unwrap();

        let first = txn(1, 2);
        let second = txn(2, 2);
        assert!(store.delete(&first, 0).unwrap());
        assert!(matches!(
            store.delete(&second, 0),
            Err(DatabaseError::Conflict(_))
        ));
        first.undo_buffer().rollback().unwrap();
        assert!(store.delete(&second, 0).unwrap());
    }

    #[test]
    fn test_update_versions() {
        let store = store();
        let writer = txn(0, 1);
        store.append(&writer, &[0, 1], vec![row(1, "a")]).unwrap();
        writer.undo_buffer().commit(2).unwrap();

        let updater = txn(1, 2);
        assert!(store
            .update(&updater, 0, 1, Value::String("b".into()))
            .unwrap());
        assert!(store
            .update(&updater, 0, 1, Value::String("c".into()))
            .unwrap());
        assert_eq!(updater.undo_buffer().num_records(), 1);

        let reader = txn(2, 2);
        assert_eq!(store.read(&reader, 0, 1), Some(Value::String("a".into())));
        assert!(matches!(
            store.update(&reader, 0, 1, Value::Null),
            Err(DatabaseError::Conflict(_))
        ));

        updater.undo_buffer().commit(3).unwrap();
        let later = txn(3, 3);
        assert_eq!(store.read(&later, 0, 1), Some(Value::String("c".into())));
        assert_eq!(store.read(&reader, 0, 1), Some(Value::String("a".into())));

        store.checkpoint(&[0, 1]);
        assert_eq!(store.read(&reader, 0, 1), Some(Value::String("c".into())));
        assert_eq!(store.row_version(0).unwrap().insert_ts, 0);
    }

    #[test]
    fn test_checkpoint_drops_orphan_columns() {
        let store = store();
        store.add_column(7, Value::Int64(3));
        assert_eq!(store.column_ids(), vec![0, 1, 7]);
        store.checkpoint(&[0, 7]);
        assert_eq!(store.column_ids(), vec![0, 7]);
    }

    #[test]
    fn test_node_group_ranges() {
        assert_eq!(node_group_ranges(0, 3), vec![(0, 0, 3)]);
        assert_eq!(
            node_group_ranges(NODE_GROUP_SIZE - 2, 5),
            vec![(0, NODE_GROUP_SIZE - 2, 2), (1, 0, 3)]
        );
    }

    #[test]
    fn test_serialize_round_trip() {
        let store = store();
        let writer = txn(0, 1);
        store.append(&writer, &[0, 1], vec![row(1, "a"), row(2, "b")]).unwrap();
        writer.undo_buffer().commit(2).unwrap();
        store.checkpoint(&[0, 1]);

        let mut ser = Serializer::new(crate::storage::serializer::InMemWriter::new());
        store.serialize(&mut ser).unwrap();
        let mut de = Deserializer::new(crate::storage::serializer::InMemReader::new(
            ser.into_inner().into_inner(),
        ));
        let restored = RowStore::deserialize(1, &mut de).unwrap();
        let reader = txn(1, 1);
        assert_eq!(restored.scan(&reader, &[0, 1]), store.scan(&reader, &[0, 1]));
        assert_eq!(restored.num_live_rows(), 2);
    }
}
