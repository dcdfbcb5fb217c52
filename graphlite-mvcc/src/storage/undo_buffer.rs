// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Per-transaction undo log
//!
//! Records are appended to segments whose byte budget starts at
//! [`UNDO_SEGMENT_INITIAL_CAPACITY`] and doubles until the first record of the
//! segment fits. Commit walks records in append order; rollback walks them in
//! reverse so later effects are undone before earlier ones.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::catalog::catalog_set::CatalogSet;
use crate::catalog::entry::{SequenceRollbackData, VersionId};
use crate::error::DatabaseResult;
use crate::storage::version::{ChunkedGroupOp, UpdateInfo, VersionRecordHandler};
use crate::txn::timestamp::Timestamp;

pub const UNDO_SEGMENT_INITIAL_CAPACITY: usize = 4096;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoRecordType {
    CatalogEntry = 0,
    SequenceEntry = 1,
    InsertInfo = 2,
    DeleteInfo = 3,
    UpdateInfo = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UndoRecordHeader {
    pub record_type: UndoRecordType,
    /// Estimated footprint of the record in bytes
    pub size: usize,
}

pub enum UndoRecord {
    /// A catalog version pushed onto `name`'s chain
    CatalogEntry {
        set: Arc<CatalogSet>,
        name: String,
        version: VersionId,
    },
    /// Sequence state before a batch of `nextval` calls
    SequenceEntry {
        set: Arc<CatalogSet>,
        name: String,
        version: VersionId,
        data: SequenceRollbackData,
    },
    InsertInfo {
        handler: Arc<dyn VersionRecordHandler>,
        node_group_idx: u64,
        start_row: u64,
        num_rows: u64,
    },
    DeleteInfo {
        handler: Arc<dyn VersionRecordHandler>,
        node_group_idx: u64,
        start_row: u64,
        num_rows: u64,
    },
    VectorUpdate {
        update_info: Arc<dyn UpdateInfo>,
        vector_idx: u64,
        update_id: u64,
    },
}

impl UndoRecord {
    pub fn record_type(&self) -> UndoRecordType {
        match self {
            UndoRecord::CatalogEntry { .. } => UndoRecordType::CatalogEntry,
            UndoRecord::SequenceEntry { .. } => UndoRecordType::SequenceEntry,
            UndoRecord::InsertInfo { .. } => UndoRecordType::InsertInfo,
            UndoRecord::DeleteInfo { .. } => UndoRecordType::DeleteInfo,
            UndoRecord::VectorUpdate { .. } => UndoRecordType::UpdateInfo,
        }
    }

    fn estimated_size(&self) -> usize {
        let base = std::mem::size_of::<UndoRecordHeader>() + std::mem::size_of::<UndoRecord>();
        match self {
            UndoRecord::CatalogEntry { name, .. } | UndoRecord::SequenceEntry { name, .. } => {
                base + name.len()
            }
            _ => base,
        }
    }

    fn commit(&self, commit_ts: Timestamp) -> DatabaseResult<()> {
        match self {
            UndoRecord::CatalogEntry { set, name, version } => {
                set.commit_version(name, *version, commit_ts)
            }
            // Sequence state is updated in place; nothing to stamp.
            UndoRecord::SequenceEntry { .. } => Ok(()),
            UndoRecord::InsertInfo {
                handler,
                node_group_idx,
                start_row,
                num_rows,
            } => handler.apply_func_to_chunked_groups(
                ChunkedGroupOp::CommitInsert,
                *node_group_idx,
                *start_row,
                *num_rows,
                commit_ts,
            ),
            UndoRecord::DeleteInfo {
                handler,
                node_group_idx,
                start_row,
                num_rows,
            } => handler.apply_func_to_chunked_groups(
                ChunkedGroupOp::CommitDelete,
                *node_group_idx,
                *start_row,
                *num_rows,
                commit_ts,
            ),
            UndoRecord::VectorUpdate {
                update_info,
                vector_idx,
                update_id,
            } => update_info.commit(*vector_idx, *update_id, commit_ts),
        }
    }

    fn rollback(&self) -> DatabaseResult<()> {
        match self {
            UndoRecord::CatalogEntry { set, name, version } => set.rollback_version(name, *version),
            UndoRecord::SequenceEntry {
                set,
                name,
                version,
                data,
            } => set.rollback_sequence(name, *version, *data),
            UndoRecord::InsertInfo {
                handler,
                node_group_idx,
                start_row,
                num_rows,
            } => handler.rollback_insert(*node_group_idx, *start_row, *num_rows),
            UndoRecord::DeleteInfo {
                handler,
                node_group_idx,
                start_row,
                num_rows,
            } => handler.apply_func_to_chunked_groups(
                ChunkedGroupOp::RollbackDelete,
                *node_group_idx,
                *start_row,
                *num_rows,
                0,
            ),
            UndoRecord::VectorUpdate {
                update_info,
                vector_idx,
                update_id,
            } => update_info.rollback(*vector_idx, *update_id),
        }
    }
}

impl fmt::Debug for UndoRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UndoRecord::CatalogEntry { name, version, .. } => f
                .debug_struct("CatalogEntry")
                .field("name", name)
                .field("version", version)
                .finish(),
            UndoRecord::SequenceEntry {
                name, version, data, ..
            } => f
                .debug_struct("SequenceEntry")
                .field("name", name)
                .field("version", version)
                .field("data", data)
                .finish(),
            UndoRecord::InsertInfo {
                node_group_idx,
                start_row,
                num_rows,
                ..
            } => f
                .debug_struct("InsertInfo")
                .field("node_group_idx", node_group_idx)
                .field("start_row", start_row)
                .field("num_rows", num_rows)
                .finish(),
            UndoRecord::DeleteInfo {
                node_group_idx,
                start_row,
                num_rows,
                ..
            } => f
                .debug_struct("DeleteInfo")
                .field("node_group_idx", node_group_idx)
                .field("start_row", start_row)
                .field("num_rows", num_rows)
                .finish(),
            UndoRecord::VectorUpdate {
                vector_idx,
                update_id,
                ..
            } => f
                .debug_struct("VectorUpdate")
                .field("vector_idx", vector_idx)
                .field("update_id", update_id)
                .finish(),
        }
    }
}

#[derive(Debug)]
struct UndoSegment {
    capacity: usize,
    used: usize,
    records: Vec<(UndoRecordHeader, UndoRecord)>,
}

impl UndoSegment {
    fn with_room_for(size: usize) -> Self {
        let mut capacity = UNDO_SEGMENT_INITIAL_CAPACITY;
        while capacity < size {
            capacity *= 2;
        }
        Self {
            capacity,
            used: 0,
            records: Vec::new(),
        }
    }

    fn fits(&self, size: usize) -> bool {
        self.used + size <= self.capacity
    }
}

#[derive(Debug, Default)]
pub struct UndoBuffer {
    segments: Mutex<Vec<UndoSegment>>,
}

impl UndoBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn append(&self, record: UndoRecord) {
        let header = UndoRecordHeader {
            record_type: record.record_type(),
            size: record.estimated_size(),
        };
        let mut segments = self.segments.lock();
        let needs_segment = segments.last().map_or(true, |s| !s.fits(header.size));
        if needs_segment {
            segments.push(UndoSegment::with_room_for(header.size));
        }
        if let Some(segment) = segments.last_mut() {
            segment.used += header.size;
            segment.records.push((header, record));
        }
    }

    pub fn create_catalog_entry(&self, set: Arc<CatalogSet>, name: &str, version: VersionId) {
        self.append(UndoRecord::CatalogEntry {
            set,
            name: name.to_string(),
            version,
        });
    }

    pub fn create_sequence_change(
        &self,
        set: Arc<CatalogSet>,
        name: &str,
        version: VersionId,
        data: SequenceRollbackData,
    ) {
        self.append(UndoRecord::SequenceEntry {
            set,
            name: name.to_string(),
            version,
            data,
        });
    }

    pub fn create_insert_info(
        &self,
        handler: Arc<dyn VersionRecordHandler>,
        node_group_idx: u64,
        start_row: u64,
        num_rows: u64,
    ) {
        self.append(UndoRecord::InsertInfo {
            handler,
            node_group_idx,
            start_row,
            num_rows,
        });
    }

    pub fn create_delete_info(
        &self,
        handler: Arc<dyn VersionRecordHandler>,
        node_group_idx: u64,
        start_row: u64,
        num_rows: u64,
    ) {
        self.append(UndoRecord::DeleteInfo {
            handler,
            node_group_idx,
            start_row,
            num_rows,
        });
    }

    pub fn create_vector_update_info(
        &self,
        update_info: Arc<dyn UpdateInfo>,
        vector_idx: u64,
        update_id: u64,
    ) {
        self.append(UndoRecord::VectorUpdate {
            update_info,
            vector_idx,
            update_id,
        });
    }

    /// Stamp every recorded change with `commit_ts`, oldest first
    pub fn commit(&self, commit_ts: Timestamp) -> DatabaseResult<()> {
        let segments = std::mem::take(&mut *self.segments.lock());
        for segment in &segments {
            for (_, record) in &segment.records {
                record.commit(commit_ts)?;
            }
        }
        Ok(())
    }

    /// Undo every recorded change, newest first. All records are attempted;
    /// the first failure is returned.
    pub fn rollback(&self) -> DatabaseResult<()> {
        let segments = std::mem::take(&mut *self.segments.lock());
        let mut first_error = None;
        for segment in segments.iter().rev() {
            for (_, record) in segment.records.iter().rev() {
                if let Err(err) = record.rollback() {
                    log::warn!("Failed to roll back {:?}: {}", record, err);
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn num_records(&self) -> usize {
        self.segments.lock().iter().map(|s| s.records.len()).sum()
    }

    pub fn num_segments(&self) -> usize {
        self.segments.lock().len()
    }

    /// Bytes reserved by all segments
    pub fn memory_usage(&self) -> usize {
        self.segments.lock().iter().map(|s| s.capacity).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.num_records() == 0
    }
}
