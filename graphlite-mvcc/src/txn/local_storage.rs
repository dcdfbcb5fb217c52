// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Per-transaction bookkeeping of table changes
//!
//! Rows are written straight into the shared row stores under the
//! transaction's id, so local storage only tracks what was touched.

use std::collections::BTreeMap;
use std::ops::Range;

use parking_lot::Mutex;

use crate::storage::value::TableId;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalTableStats {
    pub num_inserted: u64,
    pub num_deleted: u64,
    pub num_updated: u64,
    /// Row ranges appended by this transaction
    pub inserted_ranges: Vec<Range<u64>>,
}

impl LocalTableStats {
    /// Lowest offset this transaction appended, if any
    pub fn first_uncommitted_offset(&self) -> Option<u64> {
        self.inserted_ranges.iter().map(|r| r.start).min()
    }
}

#[derive(Debug, Default)]
pub struct LocalStorage {
    tables: Mutex<BTreeMap<TableId, LocalTableStats>>,
}

impl LocalStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_insert(&self, table_id: TableId, start_offset: u64, num_rows: u64) {
        let mut tables = self.tables.lock();
        let stats = tables.entry(table_id).or_default();
        stats.num_inserted += num_rows;
        match stats.inserted_ranges.last_mut() {
            Some(last) if last.end == start_offset => last.end += num_rows,
            _ => stats
                .inserted_ranges
                .push(start_offset..start_offset + num_rows),
        }
    }

    pub fn record_delete(&self, table_id: TableId, num_rows: u64) {
        self.tables.lock().entry(table_id).or_default().num_deleted += num_rows;
    }

    pub fn record_update(&self, table_id: TableId) {
        self.tables.lock().entry(table_id).or_default().num_updated += 1;
    }

    pub fn stats(&self, table_id: TableId) -> Option<LocalTableStats> {
        self.tables.lock().get(&table_id).cloned()
    }

    /// True when `offset` of `table_id` was appended by this transaction
    pub fn is_uncommitted(&self, table_id: TableId, offset: u64) -> bool {
        self.tables
            .lock()
            .get(&table_id)
            .map_or(false, |stats| stats.inserted_ranges.iter().any(|r| r.contains(&offset)))
    }

    pub fn is_empty(&self) -> bool {
        self.tables.lock().is_empty()
    }

    /// Hand the tracked changes over to the shared tables
    pub fn commit(&self) {
        let tables = std::mem::take(&mut *self.tables.lock());
        for (table_id, stats) in &tables {
            log::debug!(
                "Table {}: committed {} inserts, {} deletes, {} updates",
                table_id,
                stats.num_inserted,
                stats.num_deleted,
                stats.num_updated
            );
        }
    }

    pub fn rollback(&self) {
        self.tables.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_ranges_merge() {
        let local = LocalStorage::new();
        local.record_insert(1, 10, 5);
        local.record_insert(1, 15, 2);
        local.record_insert(1, 40, 1);
        let stats = local.stats(1).unwrap();
        assert_eq!(stats.num_inserted, 8);
        assert_eq!(stats.inserted_ranges, vec![10..17, 40..41]);
        assert_eq!(stats.first_uncommitted_offset(), Some(10));
        assert!(local.is_uncommitted(1, 16));
        assert!(!local.is_uncommitted(1, 17));
        assert!(!local.is_uncommitted(2, 10));
    }

    #[test]
    fn test_commit_and_rollback_clear() {
        let local = LocalStorage::new();
        local.record_delete(3, 2);
        local.record_update(3);
        assert_eq!(local.stats(3).unwrap().num_deleted, 2);
        local.commit();
        assert!(local.is_empty());
        local.record_update(3);
        local.rollback();
        assert!(local.is_empty());
    }
}
