// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Transaction state and the undo/redo entry points
//!
//! Every mutation enters through a `push_*` method, which appends one undo
//! record and, when the transaction must be durable, one WAL record.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::catalog::alter::AlterInfo;
use crate::catalog::catalog_set::{CatalogChange, CatalogSet};
use crate::catalog::entry::{CatalogEntryType, Oid, SequenceRollbackData, VersionId};
use crate::catalog::Catalog;
use crate::error::{DatabaseError, DatabaseResult};
use crate::storage::undo_buffer::UndoBuffer;
use crate::storage::value::TableId;
use crate::storage::version::{UpdateInfo, VersionRecordHandler};
use crate::storage::wal::{LocalWal, Wal};
use crate::txn::local_storage::LocalStorage;
use crate::txn::timestamp::{
    Timestamp, TransactionId, BOOTSTRAP_START_TIMESTAMP, CHECKPOINT_START_TIMESTAMP,
    INTERNAL_TRANSACTION_ID, INVALID_TRANSACTION,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionKind {
    ReadOnly,
    Write,
    /// Internal snapshot that sees every committed version
    Checkpoint,
    /// Internal context used while setting up a database
    Bootstrap,
    /// Re-applies WAL records during startup
    Recovery,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionKind::ReadOnly => "READ_ONLY",
            TransactionKind::Write => "WRITE",
            TransactionKind::Checkpoint => "CHECKPOINT",
            TransactionKind::Bootstrap => "BOOTSTRAP",
            TransactionKind::Recovery => "RECOVERY",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Active,
    Committed,
    RolledBack,
}

pub struct Transaction {
    kind: TransactionKind,
    id: TransactionId,
    start_ts: Timestamp,
    commit_ts: AtomicU64,
    status: Mutex<TransactionStatus>,
    in_memory: bool,
    force_checkpoint: AtomicBool,
    has_catalog_changes: AtomicBool,
    undo_buffer: UndoBuffer,
    local_wal: LocalWal,
    local_storage: LocalStorage,
}

impl Transaction {
    pub fn new(
        kind: TransactionKind,
        id: TransactionId,
        start_ts: Timestamp,
        in_memory: bool,
        enable_checksums: bool,
    ) -> Self {
        Self {
            kind,
            id,
            start_ts,
            commit_ts: AtomicU64::new(INVALID_TRANSACTION),
            status: Mutex::new(TransactionStatus::Active),
            in_memory,
            force_checkpoint: AtomicBool::new(false),
            has_catalog_changes: AtomicBool::new(false),
            undo_buffer: UndoBuffer::new(),
            local_wal: LocalWal::new(enable_checksums),
            local_storage: LocalStorage::new(),
        }
    }

    /// Context for registering built-in objects; its writes are visible to
    /// every later snapshot and are never logged or undone
    pub fn bootstrap() -> Self {
        Self::new(
            TransactionKind::Bootstrap,
            INTERNAL_TRANSACTION_ID,
            BOOTSTRAP_START_TIMESTAMP,
            true,
            false,
        )
    }

    /// Snapshot that sees every committed version
    pub fn checkpoint() -> Self {
        Self::new(
            TransactionKind::Checkpoint,
            INTERNAL_TRANSACTION_ID,
            CHECKPOINT_START_TIMESTAMP,
            true,
            false,
        )
    }

    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn start_ts(&self) -> Timestamp {
        self.start_ts
    }

    pub fn commit_ts(&self) -> Timestamp {
        self.commit_ts.load(Ordering::Acquire)
    }

    pub fn status(&self) -> TransactionStatus {
        *self.status.lock()
    }

    pub fn is_active(&self) -> bool {
        self.status() == TransactionStatus::Active
    }

    pub fn is_read_only(&self) -> bool {
        self.kind == TransactionKind::ReadOnly
    }

    pub fn is_write(&self) -> bool {
        self.kind == TransactionKind::Write
    }

    pub fn is_recovery(&self) -> bool {
        self.kind == TransactionKind::Recovery
    }

    pub fn is_in_memory(&self) -> bool {
        self.in_memory
    }

    /// Write transactions of a file-backed database are durable
    pub fn should_log_to_wal(&self) -> bool {
        self.kind == TransactionKind::Write && !self.in_memory
    }

    pub fn should_append_to_undo_buffer(&self) -> bool {
        !matches!(
            self.kind,
            TransactionKind::Bootstrap | TransactionKind::Checkpoint
        )
    }

    pub fn should_force_checkpoint(&self) -> bool {
        self.force_checkpoint.load(Ordering::Acquire)
    }

    pub fn set_force_checkpoint(&self) {
        self.force_checkpoint.store(true, Ordering::Release);
    }

    pub fn has_catalog_changes(&self) -> bool {
        self.has_catalog_changes.load(Ordering::Acquire)
    }

    pub fn ensure_writable(&self) -> DatabaseResult<()> {
        if self.is_read_only() {
            return Err(DatabaseError::Transaction(
                "Cannot execute write operations in a read-only transaction.".to_string(),
            ));
        }
        Ok(())
    }

    pub fn undo_buffer(&self) -> &UndoBuffer {
        &self.undo_buffer
    }

    pub fn local_wal(&self) -> &LocalWal {
        &self.local_wal
    }

    pub fn local_storage(&self) -> &LocalStorage {
        &self.local_storage
    }

    /// True when `offset` of `table_id` was appended by this transaction
    pub fn is_uncommitted(&self, table_id: TableId, offset: u64) -> bool {
        self.local_storage.is_uncommitted(table_id, offset)
    }

    /// Record a create or drop on `set`. `skip_logging` is set for the
    /// create half of a rename, which the alter record already covers.
    pub fn push_create_drop(
        &self,
        set: &Arc<CatalogSet>,
        change: &CatalogChange,
        skip_logging: bool,
    ) -> DatabaseResult<()> {
        self.undo_buffer
            .create_catalog_entry(set.clone(), &change.name, change.version);
        self.has_catalog_changes.store(true, Ordering::Release);
        if !self.should_log_to_wal() || skip_logging {
            return Ok(());
        }
        let current = &change.current;
        let previous = &change.previous;
        match current.entry_type() {
            CatalogEntryType::Index | CatalogEntryType::NodeTable | CatalogEntryType::RelGroup => {
                if previous.entry_type != CatalogEntryType::Dummy {
                    return Err(DatabaseError::InternalInvariantViolation(
                        "This shouldn't happen. Alter table is not supported.".to_string(),
                    ));
                }
                self.local_wal
                    .log_create_catalog_entry(current, set.is_internal())
            }
            CatalogEntryType::Sequence => {
                // Sequences owned by a SERIAL column are recreated with their table.
                if current.has_parent() {
                    return Ok(());
                }
                self.local_wal
                    .log_create_catalog_entry(current, set.is_internal())
            }
            CatalogEntryType::ScalarMacro | CatalogEntryType::Type => self
                .local_wal
                .log_create_catalog_entry(current, set.is_internal()),
            CatalogEntryType::Dummy => {
                if previous.has_parent {
                    return Ok(());
                }
                match previous.entry_type {
                    CatalogEntryType::Index
                    | CatalogEntryType::ScalarMacro
                    | CatalogEntryType::NodeTable
                    | CatalogEntryType::RelGroup
                    | CatalogEntryType::Sequence => self
                        .local_wal
                        .log_drop_catalog_entry(previous.oid, previous.entry_type),
                    CatalogEntryType::ScalarFunction | CatalogEntryType::TableFunction => Ok(()),
                    other => Err(DatabaseError::Catalog(format!(
                        "Not supported catalog entry type {} yet.",
                        other
                    ))),
                }
            }
            CatalogEntryType::ScalarFunction | CatalogEntryType::TableFunction => Ok(()),
        }
    }

    pub fn push_alter(
        &self,
        set: &Arc<CatalogSet>,
        change: &CatalogChange,
        info: &AlterInfo,
    ) -> DatabaseResult<()> {
        self.undo_buffer
            .create_catalog_entry(set.clone(), &change.name, change.version);
        self.has_catalog_changes.store(true, Ordering::Release);
        if self.should_log_to_wal() {
            self.local_wal.log_alter_table_entry(info)?;
        }
        Ok(())
    }

    pub fn push_sequence_change(
        &self,
        set: &Arc<CatalogSet>,
        name: &str,
        version: VersionId,
        oid: Oid,
        count: u64,
        data: SequenceRollbackData,
    ) -> DatabaseResult<()> {
        self.undo_buffer
            .create_sequence_change(set.clone(), name, version, data);
        self.has_catalog_changes.store(true, Ordering::Release);
        if self.should_log_to_wal() {
            self.local_wal.log_update_sequence(oid, count)?;
        }
        Ok(())
    }

    pub fn push_insert_info(
        &self,
        handler: Arc<dyn VersionRecordHandler>,
        node_group_idx: u64,
        start_row: u64,
        num_rows: u64,
    ) {
        self.undo_buffer
            .create_insert_info(handler, node_group_idx, start_row, num_rows);
    }

    pub fn push_delete_info(
        &self,
        handler: Arc<dyn VersionRecordHandler>,
        node_group_idx: u64,
        start_row: u64,
        num_rows: u64,
    ) {
        self.undo_buffer
            .create_delete_info(handler, node_group_idx, start_row, num_rows);
    }

    pub fn push_vector_update_info(
        &self,
        update_info: Arc<dyn UpdateInfo>,
        vector_idx: u64,
        update_id: u64,
    ) {
        self.undo_buffer
            .create_vector_update_info(update_info, vector_idx, update_id);
    }

    fn finish(&self, status: TransactionStatus) -> DatabaseResult<()> {
        let mut current = self.status.lock();
        if *current != TransactionStatus::Active {
            return Err(DatabaseError::Transaction(format!(
                "Transaction {} has already finished ({:?}).",
                self.id, *current
            )));
        }
        *current = status;
        Ok(())
    }

    /// Make every change of this transaction visible at `commit_ts` and,
    /// for durable transactions, write the redo log to `wal`
    pub fn commit(&self, commit_ts: Timestamp, wal: &Wal, catalog: &Catalog) -> DatabaseResult<()> {
        self.finish(TransactionStatus::Committed)?;
        self.commit_ts.store(commit_ts, Ordering::Release);
        let num_records = self.undo_buffer.num_records();
        self.local_storage.commit();
        self.undo_buffer.commit(commit_ts)?;
        if self.should_log_to_wal() {
            self.local_wal.log_commit()?;
            wal.log_committed_wal(&self.local_wal)?;
            self.local_wal.clear();
        }
        if self.has_catalog_changes() {
            catalog.increment_version();
        }
        log::debug!(
            "Committed {} transaction {} at {} ({} undo records)",
            self.kind,
            self.id,
            commit_ts,
            num_records
        );
        Ok(())
    }

    pub fn rollback(&self) -> DatabaseResult<()> {
        self.finish(TransactionStatus::RolledBack)?;
        let num_records = self.undo_buffer.num_records();
        let result = self.undo_buffer.rollback();
        self.local_storage.rollback();
        self.local_wal.clear();
        log::debug!(
            "Rolled back {} transaction {} ({} undo records)",
            self.kind,
            self.id,
            num_records
        );
        result
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("start_ts", &self.start_ts)
            .field("status", &self.status())
            .field("in_memory", &self.in_memory)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::entry::{CatalogEntry, EntryPayload, SequenceData, TableSchema};
    use crate::storage::value::LogicalType;
    use crate::storage::wal::record::{WalRecord, WalRecordType};
    use crate::storage::serializer::{Deserializer, InMemReader};
    use crate::storage::wal::checksum::FramedReader;
    use crate::txn::timestamp::START_TRANSACTION_ID;

    fn logged_types(txn: &Transaction) -> Vec<WalRecordType> {
        let mut de = Deserializer::new(FramedReader::new(
            InMemReader::new(txn.local_wal().bytes()),
            false,
        ));
        let mut types = Vec::new();
        while !de.finished() {
            types.push(WalRecord::deserialize(&mut de).unwrap().record_type());
        }
        types
    }

    fn write_txn() -> Transaction {
        Transaction::new(TransactionKind::Write, START_TRANSACTION_ID, 1, false, false)
    }

    fn person() -> CatalogEntry {
        CatalogEntry::new(
            "Person",
            EntryPayload::NodeTable(TableSchema::node(
                vec![("id".to_string(), LogicalType::Int64)],
                "id",
            )),
        )
    }

    #[test]
    fn test_predicates_by_kind() {
        let write = write_txn();
        assert!(write.should_log_to_wal());
        assert!(write.should_append_to_undo_buffer());

        let in_memory = Transaction::new(TransactionKind::Write, START_TRANSACTION_ID, 1, true, false);
        assert!(!in_memory.should_log_to_wal());

        let recovery = Transaction::new(TransactionKind::Recovery, START_TRANSACTION_ID, 1, false, false);
        assert!(!recovery.should_log_to_wal());
        assert!(recovery.should_append_to_undo_buffer());

        assert!(!Transaction::bootstrap().should_append_to_undo_buffer());
        assert!(!Transaction::checkpoint().should_append_to_undo_buffer());
        assert_eq!(Transaction::checkpoint().start_ts(), START_TRANSACTION_ID - 1);

        let read = Transaction::new(TransactionKind::ReadOnly, START_TRANSACTION_ID, 1, false, false);
        assert!(read.ensure_writable().is_err());
    }

    #[test]
    fn test_create_and_drop_are_logged_once() {
        let set = Arc::new(CatalogSet::new(false));
        let txn = write_txn();
        let oid = set.create_entry(&txn, person()).unwrap();
        set.drop_entry(&txn, "Person", oid).unwrap();
        assert_eq!(
            logged_types(&txn),
            vec![
                WalRecordType::CreateCatalogEntry,
                WalRecordType::DropCatalogEntry
            ]
        );
        assert_eq!(txn.undo_buffer().num_records(), 2);
        assert!(txn.has_catalog_changes());
    }

    #[test]
    fn test_serial_sequence_is_not_logged() {
        let set = Arc::new(CatalogSet::new(false));
        let txn = write_txn();
        let entry = CatalogEntry::new(
            "Person_id_serial",
            EntryPayload::Sequence(SequenceData::serial()),
        )
        .with_parent();
        let oid = set.create_entry(&txn, entry).unwrap();
        set.drop_entry(&txn, "Person_id_serial", oid).unwrap();
        assert!(logged_types(&txn).is_empty());
        assert_eq!(txn.undo_buffer().num_records(), 2);
    }

    #[test]
    fn test_commit_twice_fails() {
        let txn = Transaction::new(TransactionKind::Write, START_TRANSACTION_ID, 1, true, false);
        let catalog = Catalog::new();
        let wal = Wal::in_memory();
        txn.commit(2, &wal, &catalog).unwrap();
        assert_eq!(txn.commit_ts(), 2);
        assert!(matches!(
            txn.commit(3, &wal, &catalog),
            Err(DatabaseError::Transaction(_))
        ));
        assert!(txn.rollback().is_err());
    }
}
