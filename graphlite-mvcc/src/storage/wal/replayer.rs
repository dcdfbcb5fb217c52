// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Crash recovery
//!
//! Recovery first dry-runs the WAL to find the end of the last COMMIT (or
//! CHECKPOINT) record. A trailing CHECKPOINT means a checkpoint was cut
//! short after logging, so the shadow file is re-applied. Otherwise every
//! record up to that offset is re-executed through recovery transactions
//! and the torn tail is truncated.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;

use log::{info, warn};

use crate::catalog::entry::{CatalogEntry, CatalogEntryType, EntryPayload, TableType};
use crate::catalog::alter::AlterKind;
use crate::catalog::Catalog;
use crate::config::DatabaseConfig;
use crate::error::{DatabaseError, DatabaseResult};
use crate::extension::ExtensionManager;
use crate::storage::checkpointer::Checkpointer;
use crate::storage::serializer::{Deserializer, FileReader};
use crate::storage::shadow_file::{self, ShadowFile};
use crate::storage::storage_manager::StorageManager;
use crate::storage::value::Value;
use crate::storage::wal::checksum::FramedReader;
use crate::storage::wal::record::{WalRecord, WalRecordType};
use crate::storage::wal::wal::WalHeader;
use crate::txn::{Transaction, TransactionContext, TransactionManager};

type WalDeserializer = Deserializer<FramedReader<FileReader>>;

/// Result of the dry run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WalReplayInfo {
    /// End of the last COMMIT or CHECKPOINT record
    pub offset_deserialized: u64,
    pub is_last_record_checkpoint: bool,
}

pub struct WalReplayer<'a> {
    manager: Arc<TransactionManager>,
    extensions: &'a ExtensionManager,
}

fn open_wal(path: &Path) -> DatabaseResult<WalDeserializer> {
    let framed = WalHeader::is_framed(path)?;
    let file = File::open(path)?;
    Ok(Deserializer::new(FramedReader::new(FileReader::new(file)?, framed)))
}

impl<'a> WalReplayer<'a> {
    pub fn new(manager: Arc<TransactionManager>, extensions: &'a ExtensionManager) -> Self {
        Self {
            manager,
            extensions,
        }
    }

    fn catalog(&self) -> &Catalog {
        self.manager.catalog()
    }

    fn storage(&self) -> &StorageManager {
        self.manager.storage()
    }

    fn config(&self) -> &DatabaseConfig {
        self.manager.config()
    }

    /// Bring the database back to its last committed state
    pub fn replay(&self) -> DatabaseResult<()> {
        let Some(paths) = self.storage().paths().cloned() else {
            return Ok(());
        };
        let read_only = self.config().read_only;
        let checkpointer = Checkpointer::new(self.catalog(), self.storage(), self.config());

        if !paths.wal_file.exists() {
            if !read_only {
                shadow_file::remove_if_exists(&paths.shadow_file)?;
            }
            return checkpointer.read_checkpoint();
        }
        if std::fs::metadata(&paths.wal_file)?.len() == 0 {
            if !read_only {
                shadow_file::remove_if_exists(&paths.wal_file)?;
                shadow_file::remove_if_exists(&paths.shadow_file)?;
            }
            return checkpointer.read_checkpoint();
        }
        if !read_only {
            // Best effort: a previous unclean exit may have left unsynced bytes.
            if let Ok(file) = OpenOptions::new().write(true).open(&paths.wal_file) {
                let _ = file.sync_all();
            }
        }

        let replay_info = self.dry_run(&paths.wal_file)?;
        if replay_info.is_last_record_checkpoint {
            ShadowFile::replay_shadow_page_records(&paths.shadow_file, &paths.data_file, read_only)?;
            shadow_file::remove_if_exists(&paths.wal_file)?;
            shadow_file::remove_if_exists(&paths.shadow_file)?;
            info!("Finished an interrupted checkpoint of {}", paths.data_file.display());
            return checkpointer.read_checkpoint();
        }

        if !read_only {
            shadow_file::remove_if_exists(&paths.shadow_file)?;
        }
        checkpointer.read_checkpoint()?;
        let context = TransactionContext::new(self.manager.clone());
        if let Err(err) = self.replay_records(&context, &paths.wal_file, replay_info.offset_deserialized) {
            if context.has_active_transaction() {
                if let Err(rollback_err) = context.rollback() {
                    warn!("Failed to roll back the replayed transaction: {}", rollback_err);
                }
            }
            return Err(err);
        }

        if !read_only {
            let file = OpenOptions::new().write(true).open(&paths.wal_file)?;
            if file.metadata()?.len() != replay_info.offset_deserialized {
                file.set_len(replay_info.offset_deserialized)?;
                file.sync_all()?;
            }
        }
        Ok(())
    }

    /// Find the end of the last COMMIT or CHECKPOINT record. Any read error,
    /// a header mismatch included, ends the scan unless
    /// `throw_on_wal_replay_failure`.
    pub fn dry_run(&self, path: &Path) -> DatabaseResult<WalReplayInfo> {
        let mut replay_info = WalReplayInfo::default();
        match self.scan(path, &mut replay_info) {
            Ok(()) => {}
            Err(err) if self.config().throw_on_wal_replay_failure => return Err(err),
            Err(err) => warn!(
                "Ignoring the unreadable tail of {} after offset {}: {}",
                path.display(),
                replay_info.offset_deserialized,
                err
            ),
        }
        Ok(replay_info)
    }

    fn scan(&self, path: &Path, replay_info: &mut WalReplayInfo) -> DatabaseResult<()> {
        let mut de = open_wal(path)?;
        let header = WalHeader::deserialize(&mut de)?;
        header.check_checksums(self.config().enable_checksums)?;
        while !de.finished() {
            let record = WalRecord::deserialize(&mut de)?;
            match record.record_type() {
                WalRecordType::Commit => {
                    replay_info.offset_deserialized = de.read_offset();
                }
                WalRecordType::Checkpoint => {
                    replay_info.offset_deserialized = de.read_offset();
                    replay_info.is_last_record_checkpoint = true;
                    break;
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn replay_records(&self, context: &TransactionContext, path: &Path, offset: u64) -> DatabaseResult<()> {
        if offset == 0 {
            return Ok(());
        }
        let mut de = open_wal(path)?;
        let header = WalHeader::deserialize(&mut de)?;
        if header.database_id != self.storage().database_id() {
            return Err(shadow_file::database_id_mismatch(path));
        }
        let mut num_records = 0u64;
        while de.read_offset() < offset {
            let record = WalRecord::deserialize(&mut de)?;
            self.replay_record(context, record)?;
            num_records += 1;
        }
        info!(
            "Replayed {} WAL records ({} bytes) from {}",
            num_records,
            offset,
            path.display()
        );
        Ok(())
    }

    fn replay_record(&self, context: &TransactionContext, record: WalRecord) -> DatabaseResult<()> {
        match record {
            WalRecord::BeginTransaction => {
                context.begin_recovery_transaction()?;
                Ok(())
            }
            WalRecord::Commit => context.commit(),
            WalRecord::Checkpoint => Err(DatabaseError::InternalInvariantViolation(
                "Unexpected CHECKPOINT record while replaying committed transactions".to_string(),
            )),
            record => {
                let txn = context.active_transaction().ok_or_else(|| {
                    DatabaseError::InternalInvariantViolation(format!(
                        "WAL record {:?} outside of a transaction",
                        record.record_type()
                    ))
                })?;
                self.apply(&txn, record)
            }
        }
    }

    fn apply(&self, txn: &Transaction, record: WalRecord) -> DatabaseResult<()> {
        let catalog = self.catalog();
        let storage = self.storage();
        match record {
            WalRecord::CreateCatalogEntry { entry, is_internal } => {
                self.replay_create_catalog_entry(txn, entry, is_internal)
            }
            WalRecord::DropCatalogEntry { oid, entry_type } => match entry_type {
                CatalogEntryType::NodeTable | CatalogEntryType::RelGroup => {
                    catalog.drop_table_entry_by_id(txn, oid)
                }
                CatalogEntryType::Sequence => catalog.drop_sequence_by_id(txn, oid),
                CatalogEntryType::Index => catalog.drop_index_by_id(txn, oid),
                CatalogEntryType::ScalarMacro => catalog.drop_macro_by_id(txn, oid),
                other => Err(DatabaseError::InternalInvariantViolation(format!(
                    "Cannot replay the drop of a {} entry",
                    other
                ))),
            },
            WalRecord::AlterTableEntry { info } => {
                let resolved = catalog.alter_table_entry(txn, &info)?;
                let table_name = match &resolved.kind {
                    AlterKind::RenameTable { new_name } => new_name.as_str(),
                    _ => resolved.table_name.as_str(),
                };
                let entry = catalog.get_table_entry(txn, table_name)?;
                storage.on_table_altered(&entry, &resolved)
            }
            WalRecord::UpdateSequence {
                sequence_id,
                k_count,
            } => {
                let entry = catalog.get_sequence_entry_by_id(txn, sequence_id)?;
                catalog.next_sequence_values(txn, entry.name(), k_count)?;
                Ok(())
            }
            WalRecord::TableInsertion {
                table_id,
                table_type,
                num_rows,
                vectors,
            } => self.replay_table_insertion(txn, table_id, table_type, num_rows, vectors),
            WalRecord::NodeDeletion {
                table_id,
                node_offset,
                pk,
            } => {
                let table = storage.get_table(table_id)?;
                let node_table = table.as_node()?;
                let offset = if pk.is_null() {
                    node_offset
                } else {
                    node_table.lookup(txn, &pk)?.unwrap_or(node_offset)
                };
                node_table.delete(txn, offset)?;
                Ok(())
            }
            WalRecord::NodeUpdate {
                table_id,
                column_id,
                node_offset,
                value,
            } => {
                let table = storage.get_table(table_id)?;
                table.as_node()?.update(txn, node_offset, column_id, value)?;
                Ok(())
            }
            WalRecord::RelDeletion {
                table_id,
                src,
                dst,
                rel_id,
            } => {
                let table = storage.get_table(table_id)?;
                table.as_rel()?.delete(txn, src, dst, rel_id)?;
                Ok(())
            }
            WalRecord::RelDetachDelete {
                table_id,
                direction,
                src,
            } => {
                let table = storage.get_table(table_id)?;
                table.as_rel()?.detach_delete(txn, src, direction)?;
                Ok(())
            }
            WalRecord::RelUpdate {
                table_id,
                column_id,
                src,
                dst,
                rel_id,
                value,
            } => {
                let table = storage.get_table(table_id)?;
                table
                    .as_rel()?
                    .update(txn, src, dst, rel_id, column_id, value)?;
                Ok(())
            }
            // Copied rows were made durable by the checkpoint that followed the commit.
            WalRecord::CopyTable { .. } => Ok(()),
            WalRecord::LoadExtension { path } => self.extensions.load(&path),
            WalRecord::BeginTransaction | WalRecord::Commit | WalRecord::Checkpoint => {
                Err(DatabaseError::InternalInvariantViolation(
                    "Transaction boundary records are handled by the replay loop".to_string(),
                ))
            }
        }
    }

    fn replay_create_catalog_entry(
        &self,
        txn: &Transaction,
        entry: CatalogEntry,
        is_internal: bool,
    ) -> DatabaseResult<()> {
        let catalog = self.catalog();
        match entry.payload() {
            EntryPayload::NodeTable(_) | EntryPayload::RelGroup(_) => {
                let created = catalog.create_table_entry(txn, entry, is_internal)?;
                self.storage().create_table(&created)
            }
            EntryPayload::ScalarMacro(_) => catalog.add_macro_entry(txn, entry).map(|_| ()),
            EntryPayload::Sequence(_) => catalog
                .create_sequence_entry(txn, entry, is_internal)
                .map(|_| ()),
            EntryPayload::Type(_) => catalog.create_type_entry(txn, entry).map(|_| ()),
            EntryPayload::Index(_) => catalog.create_index_entry(txn, entry).map(|_| ()),
            _ => Err(DatabaseError::InternalInvariantViolation(format!(
                "Cannot replay the creation of {} entry {}",
                entry.entry_type(),
                entry.name()
            ))),
        }
    }

    fn replay_table_insertion(
        &self,
        txn: &Transaction,
        table_id: u64,
        table_type: TableType,
        num_rows: u64,
        vectors: Vec<Vec<Value>>,
    ) -> DatabaseResult<()> {
        let table = self.storage().get_table(table_id)?;
        let column_ids = self.catalog().table_column_ids(txn, table_id)?;
        let mut columns = vectors.into_iter();
        match table_type {
            TableType::Node => {
                let columns: Vec<Vec<Value>> = columns.collect();
                if columns.len() != column_ids.len() {
                    return Err(DatabaseError::Corruption(format!(
                        "Insertion into table {} carries {} columns, the table has {}",
                        table_id,
                        columns.len(),
                        column_ids.len()
                    )));
                }
                table
                    .as_node()?
                    .insert(txn, &column_ids, to_rows(columns, num_rows))?;
            }
            TableType::Rel => {
                let (Some(src), Some(dst)) = (columns.next(), columns.next()) else {
                    return Err(DatabaseError::Corruption(format!(
                        "Insertion into relationship table {} is missing its endpoints",
                        table_id
                    )));
                };
                let properties = to_rows(columns.collect(), num_rows);
                let mut rows = Vec::with_capacity(num_rows as usize);
                for ((src, dst), properties) in src.into_iter().zip(dst).zip(properties) {
                    let (Some(src), Some(dst)) = (src.as_internal_id(), dst.as_internal_id()) else {
                        return Err(DatabaseError::Corruption(format!(
                            "Relationship endpoint of table {} is not a node id",
                            table_id
                        )));
                    };
                    rows.push((src, dst, properties));
                }
                table.as_rel()?.insert(txn, &column_ids, rows)?;
            }
        }
        Ok(())
    }
}

/// Transpose column vectors back into rows
fn to_rows(columns: Vec<Vec<Value>>, num_rows: u64) -> Vec<Vec<Value>> {
    let mut rows: Vec<Vec<Value>> = (0..num_rows)
        .map(|_| Vec::with_capacity(columns.len()))
        .collect();
    for column in columns {
        for (row, value) in rows.iter_mut().zip(column) {
            row.push(value);
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_rows_transposes() {
        let rows = to_rows(
            vec![
                vec![Value::Int64(1), Value::Int64(2)],
                vec![Value::String("a".into()), Value::Null],
            ],
            2,
        );
        assert_eq!(
            rows,
            vec![
                vec![Value::Int64(1), Value::String("a".into())],
                vec![Value::Int64(2), Value::Null],
            ]
        );
    }

    #[test]
    fn test_to_rows_without_properties() {
        let rows = to_rows(Vec::new(), 3);
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|row| row.is_empty()));
    }
}
