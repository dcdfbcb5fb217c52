// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Transaction-local redo buffer
//!
//! A write transaction serializes its records here and hands the finished
//! bytes to the shared [`Wal`](super::Wal) at commit.

use parking_lot::Mutex;

use crate::catalog::alter::AlterInfo;
use crate::catalog::entry::{CatalogEntry, CatalogEntryType, Oid, TableType};
use crate::error::DatabaseResult;
use crate::storage::serializer::{InMemWriter, Serializer};
use crate::storage::table::RelDirection;
use crate::storage::value::{ColumnId, InternalId, TableId, Value};
use crate::storage::wal::checksum::FramedWriter;
use crate::storage::wal::record::WalRecord;

#[derive(Debug)]
pub struct LocalWal {
    serializer: Mutex<Serializer<FramedWriter<InMemWriter>>>,
}

impl LocalWal {
    pub fn new(enable_checksums: bool) -> Self {
        Self {
            serializer: Mutex::new(Serializer::new(FramedWriter::new(
                InMemWriter::new(),
                enable_checksums,
            ))),
        }
    }

    pub fn log_record(&self, record: &WalRecord) -> DatabaseResult<()> {
        let mut serializer = self.serializer.lock();
        record.serialize(&mut serializer)
    }

    pub fn log_begin_transaction(&self) -> DatabaseResult<()> {
        self.log_record(&WalRecord::BeginTransaction)
    }

    pub fn log_commit(&self) -> DatabaseResult<()> {
        self.log_record(&WalRecord::Commit)
    }

    pub fn log_create_catalog_entry(&self, entry: &CatalogEntry, is_internal: bool) -> DatabaseResult<()> {
        self.log_record(&WalRecord::CreateCatalogEntry {
            entry: entry.snapshot(),
            is_internal,
        })
    }

    pub fn log_drop_catalog_entry(&self, oid: Oid, entry_type: CatalogEntryType) -> DatabaseResult<()> {
        self.log_record(&WalRecord::DropCatalogEntry { oid, entry_type })
    }

    pub fn log_alter_table_entry(&self, info: &AlterInfo) -> DatabaseResult<()> {
        self.log_record(&WalRecord::AlterTableEntry { info: info.clone() })
    }

    pub fn log_update_sequence(&self, sequence_id: Oid, k_count: u64) -> DatabaseResult<()> {
        self.log_record(&WalRecord::UpdateSequence {
            sequence_id,
            k_count,
        })
    }

    pub fn log_table_insertion(
        &self,
        table_id: TableId,
        table_type: TableType,
        num_rows: u64,
        vectors: Vec<Vec<Value>>,
    ) -> DatabaseResult<()> {
        self.log_record(&WalRecord::TableInsertion {
            table_id,
            table_type,
            num_rows,
            vectors,
        })
    }

    pub fn log_node_deletion(&self, table_id: TableId, node_offset: u64, pk: Value) -> DatabaseResult<()> {
        self.log_record(&WalRecord::NodeDeletion {
            table_id,
            node_offset,
            pk,
        })
    }

    pub fn log_node_update(
        &self,
        table_id: TableId,
        column_id: ColumnId,
        node_offset: u64,
        value: Value,
    ) -> DatabaseResult<()> {
        self.log_record(&WalRecord::NodeUpdate {
            table_id,
            column_id,
            node_offset,
            value,
        })
    }

    pub fn log_rel_deletion(
        &self,
        table_id: TableId,
        src: InternalId,
        dst: InternalId,
        rel_id: InternalId,
    ) -> DatabaseResult<()> {
        self.log_record(&WalRecord::RelDeletion {
            table_id,
            src,
            dst,
            rel_id,
        })
    }

    pub fn log_rel_detach_delete(
        &self,
        table_id: TableId,
        direction: RelDirection,
        src: InternalId,
    ) -> DatabaseResult<()> {
        self.log_record(&WalRecord::RelDetachDelete {
            table_id,
            direction,
            src,
        })
    }

    pub fn log_rel_update(
        &self,
        table_id: TableId,
        column_id: ColumnId,
        src: InternalId,
        dst: InternalId,
        rel_id: InternalId,
        value: Value,
    ) -> DatabaseResult<()> {
        self.log_record(&WalRecord::RelUpdate {
            table_id,
            column_id,
            src,
            dst,
            rel_id,
            value,
        })
    }

    pub fn log_copy_table(&self, table_id: TableId) -> DatabaseResult<()> {
        self.log_record(&WalRecord::CopyTable { table_id })
    }

    pub fn log_load_extension(&self, path: &str) -> DatabaseResult<()> {
        self.log_record(&WalRecord::LoadExtension {
            path: path.to_string(),
        })
    }

    pub fn clear(&self) {
        self.serializer.lock().writer_mut().inner_mut().clear();
    }

    pub fn size(&self) -> u64 {
        self.serializer.lock().writer().inner().size()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Copy of the bytes logged so far
    pub fn bytes(&self) -> Vec<u8> {
        self.serializer.lock().writer().inner().data().to_vec()
    }
}
