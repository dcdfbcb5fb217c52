// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Node tables with a unique primary key

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::catalog::entry::TableType;
use crate::error::{DatabaseError, DatabaseResult};
use crate::storage::serializer::{Deserializer, Reader, Serializer, Writer};
use crate::storage::table::row_store::RowStore;
use crate::storage::value::{ColumnId, PkKey, TableId, Value};
use crate::txn::timestamp::{is_commit_timestamp, INVALID_TRANSACTION};
use crate::txn::Transaction;

#[derive(Debug)]
pub struct NodeTable {
    table_id: TableId,
    pk_column: ColumnId,
    store: Arc<RowStore>,
    /// Primary key → candidate offsets, newest last. Candidates are checked
    /// against row visibility on every lookup.
    pk_index: RwLock<HashMap<PkKey, Vec<u64>>>,
}

impl NodeTable {
    pub fn new(table_id: TableId, pk_column: ColumnId, columns: &[(ColumnId, Value)]) -> Self {
        Self::with_store(table_id, pk_column, RowStore::new(table_id, columns))
    }

    fn with_store(table_id: TableId, pk_column: ColumnId, store: RowStore) -> Self {
        Self {
            table_id,
            pk_column,
            store: Arc::new(store),
            pk_index: RwLock::new(HashMap::new()),
        }
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn pk_column(&self) -> ColumnId {
        self.pk_column
    }

    pub fn store(&self) -> &Arc<RowStore> {
        &self.store
    }

    fn pk_matches(&self, txn: &Transaction, offset: u64, key: &PkKey) -> bool {
        self.store
            .read(txn, offset, self.pk_column)
            .and_then(|value| PkKey::from_value(&value).ok())
            .map_or(false, |stored| &stored == key)
    }

    fn duplicate_key(value: &Value) -> DatabaseError {
        DatabaseError::AlreadyExists(format!(
            "Found duplicated primary key value {}, which violates the uniqueness constraint of \
             the primary key column.",
            value
        ))
    }

    fn check_unique(
        &self,
        index: &HashMap<PkKey, Vec<u64>>,
        txn: &Transaction,
        key: &PkKey,
        value: &Value,
    ) -> DatabaseResult<()> {
        for offset in index.get(key).into_iter().flatten() {
            if self.pk_matches(txn, *offset, key) {
                return Err(Self::duplicate_key(value));
            }
            // Offsets freed by a rolled back insert may hold another key now.
            let same_key = self
                .store
                .base_value(*offset, self.pk_column)
                .and_then(|stored| PkKey::from_value(&stored).ok())
                .map_or(false, |stored| &stored == key);
            let (true, Some(version)) = (same_key, self.store.row_version(*offset)) else {
                continue;
            };
            let committed_later = is_commit_timestamp(version.insert_ts)
                && version.insert_ts > txn.start_ts()
                && version.delete_ts == INVALID_TRANSACTION;
            if version.is_pending_insert(txn) || committed_later {
                return Err(DatabaseError::Conflict(format!(
                    "Write-write conflict on inserting primary key value {} into table {}.",
                    value, self.table_id
                )));
            }
        }
        Ok(())
    }

    fn append_rows(
        &self,
        txn: &Transaction,
        column_ids: &[ColumnId],
        rows: Vec<Vec<Value>>,
    ) -> DatabaseResult<Vec<u64>> {
        let pk_position = column_ids
            .iter()
            .position(|column_id| *column_id == self.pk_column)
            .ok_or_else(|| {
                DatabaseError::Catalog(format!(
                    "Inserts into table {} must set the primary key column.",
                    self.table_id
                ))
            })?;
        // Held from the uniqueness check until the new offsets are indexed.
        let mut index = self.pk_index.write();
        let mut keys = Vec::with_capacity(rows.len());
        for row in &rows {
            let value = row.get(pk_position).cloned().unwrap_or_default();
            let key = PkKey::from_value(&value)?;
            if keys.contains(&key) {
                return Err(Self::duplicate_key(&value));
            }
            self.check_unique(&index, txn, &key, &value)?;
            keys.push(key);
        }
        let num_rows = keys.len() as u64;
        let start = self.store.append(txn, column_ids, rows)?;
        for (offset, key) in (start..).zip(keys) {
            index.entry(key).or_default().push(offset);
        }
        Ok((start..start + num_rows).collect())
    }

    /// Insert rows and return their offsets. `column_ids` lists every column
    /// of the table in schema order; each row holds one value per column.
    pub fn insert(
        &self,
        txn: &Transaction,
        column_ids: &[ColumnId],
        rows: Vec<Vec<Value>>,
    ) -> DatabaseResult<Vec<u64>> {
        txn.ensure_writable()?;
        let num_rows = rows.len() as u64;
        let vectors = txn
            .should_log_to_wal()
            .then(|| to_column_major(column_ids.len(), &rows));
        let offsets = self.append_rows(txn, column_ids, rows)?;
        if let Some(vectors) = vectors {
            txn.local_wal()
                .log_table_insertion(self.table_id, TableType::Node, num_rows, vectors)?;
        }
        Ok(offsets)
    }

    /// Bulk load. The rows become durable through the checkpoint that
    /// follows the commit rather than through per-row WAL records.
    pub fn copy_rows(
        &self,
        txn: &Transaction,
        column_ids: &[ColumnId],
        rows: Vec<Vec<Value>>,
    ) -> DatabaseResult<Vec<u64>> {
        txn.ensure_writable()?;
        let offsets = self.append_rows(txn, column_ids, rows)?;
        if txn.should_log_to_wal() {
            txn.local_wal().log_copy_table(self.table_id)?;
        }
        txn.set_force_checkpoint();
        Ok(offsets)
    }

    /// Delete the row at `offset`. Returns false if `txn` cannot see it.
    pub fn delete(&self, txn: &Transaction, offset: u64) -> DatabaseResult<bool> {
        txn.ensure_writable()?;
        let Some(pk) = self.store.read(txn, offset, self.pk_column) else {
            return Ok(false);
        };
        if !self.store.delete(txn, offset)? {
            return Ok(false);
        }
        if txn.should_log_to_wal() {
            txn.local_wal().log_node_deletion(self.table_id, offset, pk)?;
        }
        Ok(true)
    }

    pub fn update(
        &self,
        txn: &Transaction,
        offset: u64,
        column_id: ColumnId,
        value: Value,
    ) -> DatabaseResult<bool> {
        txn.ensure_writable()?;
        if column_id == self.pk_column {
            return Err(DatabaseError::Catalog(format!(
                "Cannot update the primary key column of table {}.",
                self.table_id
            )));
        }
        let logged = txn.should_log_to_wal().then(|| value.clone());
        if !self.store.update(txn, offset, column_id, value)? {
            return Ok(false);
        }
        if let Some(value) = logged {
            txn.local_wal()
                .log_node_update(self.table_id, column_id, offset, value)?;
        }
        Ok(true)
    }

    /// Offset of the row with primary key `pk` visible to `txn`
    pub fn lookup(&self, txn: &Transaction, pk: &Value) -> DatabaseResult<Option<u64>> {
        let key = PkKey::from_value(pk)?;
        let index = self.pk_index.read();
        Ok(index.get(&key).and_then(|offsets| {
            offsets
                .iter()
                .rev()
                .copied()
                .find(|offset| self.pk_matches(txn, *offset, &key))
        }))
    }

    pub fn read(&self, txn: &Transaction, offset: u64, column_id: ColumnId) -> Option<Value> {
        self.store.read(txn, offset, column_id)
    }

    pub fn read_row(&self, txn: &Transaction, offset: u64, column_ids: &[ColumnId]) -> Option<Vec<Value>> {
        self.store.read_row(txn, offset, column_ids)
    }

    pub fn scan(&self, txn: &Transaction, column_ids: &[ColumnId]) -> Vec<(u64, Vec<Value>)> {
        self.store.scan(txn, column_ids)
    }

    /// Compact the row store and drop index candidates that can no longer match
    pub fn checkpoint(&self, live_columns: &[ColumnId]) {
        self.store.checkpoint(live_columns);
        self.rebuild_index();
    }

    fn rebuild_index(&self) {
        let mut index = HashMap::<PkKey, Vec<u64>>::new();
        let checkpoint = Transaction::checkpoint();
        for (offset, values) in self.store.scan(&checkpoint, &[self.pk_column]) {
            if let Some(Ok(key)) = values.first().map(PkKey::from_value) {
                index.entry(key).or_default().push(offset);
            }
        }
        *self.pk_index.write() = index;
    }

    pub fn serialize<W: Writer>(&self, ser: &mut Serializer<W>) -> DatabaseResult<()> {
        ser.write_u32(self.pk_column)?;
        self.store.serialize(ser)
    }

    pub fn deserialize<R: Reader>(table_id: TableId, de: &mut Deserializer<R>) -> DatabaseResult<Self> {
        let pk_column = de.read_u32()?;
        let store = RowStore::deserialize(table_id, de)?;
        let table = Self::with_store(table_id, pk_column, store);
        table.rebuild_index();
        Ok(table)
    }
}

/// Transpose row-major values into one vector per column
pub(crate) fn to_column_major(num_columns: usize, rows: &[Vec<Value>]) -> Vec<Vec<Value>> {
    (0..num_columns)
        .map(|column| {
            rows.iter()
                .map(|row| row.get(column).cloned().unwrap_or_default())
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txn::timestamp::START_TRANSACTION_ID;
    use crate::txn::TransactionKind;

    fn txn(id_offset: u64, start_ts: u64) -> Transaction {
        Transaction::new(
            TransactionKind::Write,
            START_TRANSACTION_ID + id_offset,
            start_ts,
            true,
            false,
        )
    }

    fn person_table() -> NodeTable {
        NodeTable::new(0, 0, &[(0, Value::Null), (1, Value::Null)])
    }

    fn person(id: i64, name: &str) -> Vec<Value> {
        vec![Value::Int64(id), Value::String(name.to_string())]
    }

    #[test]
    fn test_duplicate_primary_key() {
        let table = person_table();
        let writer = txn(0, 1);
        table.insert(&writer, &[0, 1], vec![person(1, "Alice")]).unwrap();
        let err = table
            .insert(&writer, &[0, 1], vec![person(1, "Bob")])
            .unwrap_err();
        assert!(err.to_string().contains("duplicated primary key value 1"));
        assert!(table
            .insert(&writer, &[0, 1], vec![person(2, "Bob"), person(2, "Carol")])
            .is_err());
    }

    #[test]
    fn test_concurrent_insert_of_same_key_conflicts() {
        let table = person_table();
        let first = txn(0, 1);
        let second = txn(1, 1);
        table.insert(&first, &[0, 1], vec![person(1, "Alice")]).unwrap();
        assert!(matches!(
            table.insert(&second, &[0, 1], vec![person(1, "Alice")]),
            Err(DatabaseError::Conflict(_))
        ));
        first.rollback().unwrap();
        table.insert(&second, &[0, 1], vec![person(1, "Alice")]).unwrap();
    }

    #[test]
    fn test_racing_inserts_of_same_key_admit_one() {
        let table = person_table();
        let outcomes: Vec<DatabaseResult<Vec<u64>>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let table = &table;
                    scope.spawn(move || {
                        let writer = txn(i, 1);
                        table.insert(&writer, &[0, 1], vec![person(7, "racer")])
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|err| err.is_conflict()));
        assert_eq!(table.store().num_rows(), 1);
    }

    #[test]
    fn test_delete_then_reinsert_and_rollback() {
        let table = person_table();
        let writer = txn(0, 1);
        table.insert(&writer, &[0, 1], vec![person(1, "Alice")]).unwrap();
        writer.undo_buffer().commit(2).unwrap();

        let deleter = txn(1, 2);
        assert!(table.delete(&deleter, 0).unwrap());
        let offsets = table
            .insert(&deleter, &[0, 1], vec![person(1, "Alice2")])
            .unwrap();
        assert_eq!(table.lookup(&deleter, &Value::Int64(1)).unwrap(), Some(offsets[0]));
        deleter.rollback().unwrap();

        let reader = txn(2, 2);
        assert_eq!(table.lookup(&reader, &Value::Int64(1)).unwrap(), Some(0));
        assert_eq!(
            table.read(&reader, 0, 1),
            Some(Value::String("Alice".into()))
        );
    }

    #[test]
    fn test_primary_key_cannot_be_updated() {
        let table = person_table();
        let writer = txn(0, 1);
        table.insert(&writer, &[0, 1], vec![person(1, "Alice")]).unwrap();
        assert!(table.update(&writer, 0, 0, Value::Int64(5)).is_err());
        assert!(table
            .update(&writer, 0, 1, Value::String("Al".into()))
            .unwrap());
        assert_eq!(table.read(&writer, 0, 1), Some(Value::String("Al".into())));
    }

    #[test]
    fn test_copy_rows_forces_checkpoint() {
        let table = person_table();
        let writer = txn(0, 1);
        table
            .copy_rows(&writer, &[0, 1], vec![person(1, "a"), person(2, "b")])
            .unwrap();
        assert!(writer.should_force_checkpoint());
        assert_eq!(table.scan(&writer, &[0]).len(), 2);
    }

    #[test]
    fn test_column_major() {
        let rows = vec![person(1, "a"), person(2, "b")];
        let vectors = to_column_major(2, &rows);
        assert_eq!(vectors[0], vec![Value::Int64(1), Value::Int64(2)]);
        assert_eq!(vectors[1].len(), 2);
    }
}
