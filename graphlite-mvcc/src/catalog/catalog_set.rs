// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Versioned name → entry directory with snapshot visibility
//!
//! Chain mutations happen under the set's write lock. Undo and WAL
//! bookkeeping is pushed to the transaction after the lock is released.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::catalog::alter::{AlterInfo, AlterKind};
use crate::catalog::entry::{
    CatalogEntry, EntrySummary, Oid, SequenceRollbackData, VersionId, INTERNAL_CATALOG_SET_START_OID,
    INVALID_OID,
};
use crate::error::{DatabaseError, DatabaseResult};
use crate::storage::serializer::{Deserializer, Reader, Serializer, Writer};
use crate::txn::timestamp::{Timestamp, START_TRANSACTION_ID};
use crate::txn::Transaction;

/// Outcome of one create/drop/alter on a chain
#[derive(Debug)]
pub struct CatalogChange {
    pub name: String,
    /// Version id of the newly pushed head
    pub version: VersionId,
    /// The version the new head covers
    pub previous: EntrySummary,
    /// Copy of the new head
    pub current: CatalogEntry,
}

#[derive(Debug)]
struct CatalogSetInner {
    next_oid: Oid,
    next_version: VersionId,
    entries: HashMap<String, CatalogEntry>,
}

impl CatalogSetInner {
    fn allocate_version(&mut self) -> VersionId {
        let version = self.next_version;
        self.next_version += 1;
        version
    }

    fn contains_visible(&self, txn: &Transaction, name: &str) -> bool {
        self.entries
            .get(name)
            .and_then(|head| head.visible_version(txn))
            .map_or(false, |entry| !entry.is_deleted())
    }

    fn visible(&self, txn: &Transaction, name: &str) -> DatabaseResult<&CatalogEntry> {
        self.entries
            .get(name)
            .and_then(|head| head.visible_version(txn))
            .filter(|entry| !entry.is_deleted())
            .ok_or_else(|| DatabaseError::NotFound(format!("{} does not exist in catalog.", name)))
    }

    fn validate_not_exist(&self, txn: &Transaction, name: &str) -> DatabaseResult<()> {
        if self.contains_visible(txn, name) {
            return Err(DatabaseError::AlreadyExists(format!(
                "{} already exists in catalog.",
                name
            )));
        }
        Ok(())
    }

    /// Put `entry` on top of the chain for its name
    fn emplace(&mut self, mut entry: CatalogEntry) {
        let name = entry.name().to_string();
        if let Some(head) = self.entries.remove(&name) {
            entry.set_prev(Some(Box::new(head)));
        }
        self.entries.insert(name, entry);
    }

    fn head_summary(&self, name: &str) -> DatabaseResult<EntrySummary> {
        self.entries
            .get(name)
            .and_then(|head| head.prev())
            .map(|prev| prev.summary())
            .ok_or_else(|| {
                DatabaseError::InternalInvariantViolation(format!(
                    "Catalog entry {} has no previous version after a change",
                    name
                ))
            })
    }

    fn create(&mut self, txn: &Transaction, mut entry: CatalogEntry) -> DatabaseResult<CatalogChange> {
        let name = entry.name().to_string();
        self.validate_not_exist(txn, &name)?;
        if let Some(existing) = self.entries.get(&name) {
            if has_write_write_conflict(txn, existing.timestamp()) {
                return Err(DatabaseError::Conflict(format!(
                    "Write-write conflict on creating catalog entry with name {}.",
                    name
                )));
            }
            if !existing.is_deleted() {
                return Err(DatabaseError::AlreadyExists(format!(
                    "Catalog entry with name {} already exists.",
                    name
                )));
            }
        } else {
            let mut dummy = CatalogEntry::dummy(name.clone(), entry.oid());
            let version = self.allocate_version();
            dummy.set_version(version);
            self.entries.insert(name.clone(), dummy);
        }
        let version = self.allocate_version();
        entry.set_timestamp(txn.id());
        entry.set_version(version);
        let current = entry.snapshot();
        self.emplace(entry);
        Ok(CatalogChange {
            previous: self.head_summary(&name)?,
            name,
            version,
            current,
        })
    }

    fn drop_version(&mut self, txn: &Transaction, name: &str, oid: Oid) -> DatabaseResult<CatalogChange> {
        self.visible(txn, name)?;
        let mut tombstone = CatalogEntry::dummy(name, oid);
        let version = self.allocate_version();
        tombstone.set_timestamp(txn.id());
        tombstone.set_version(version);
        let current = tombstone.snapshot();
        self.emplace(tombstone);
        Ok(CatalogChange {
            previous: self.head_summary(name)?,
            name: name.to_string(),
            version,
            current,
        })
    }

    fn reserve_oid(&mut self, oid: Oid) -> Oid {
        if oid == INVALID_OID {
            let allocated = self.next_oid;
            self.next_oid += 1;
            allocated
        } else {
            self.next_oid = self.next_oid.max(oid + 1);
            oid
        }
    }
}

/// A version committed after `txn` started, or still owned by another
/// transaction, conflicts with a create by `txn`.
fn has_write_write_conflict(txn: &Transaction, ts: Timestamp) -> bool {
    (ts >= START_TRANSACTION_ID && ts != txn.id())
        || (ts < START_TRANSACTION_ID && ts > txn.start_ts())
}

#[derive(Debug)]
pub struct CatalogSet {
    is_internal: bool,
    inner: RwLock<CatalogSetInner>,
}

impl CatalogSet {
    pub fn new(is_internal: bool) -> Self {
        let next_oid = if is_internal {
            INTERNAL_CATALOG_SET_START_OID
        } else {
            0
        };
        Self {
            is_internal,
            inner: RwLock::new(CatalogSetInner {
                next_oid,
                next_version: 0,
                entries: HashMap::new(),
            }),
        }
    }

    pub fn is_internal(&self) -> bool {
        self.is_internal
    }

    pub fn next_oid(&self) -> Oid {
        self.inner.read().next_oid
    }

    /// Hand out an oid without creating an entry
    pub(crate) fn allocate_oid(&self) -> Oid {
        self.inner.write().reserve_oid(INVALID_OID)
    }

    /// Advance `next_oid` past an oid assigned elsewhere
    pub(crate) fn reserve_oid(&self, oid: Oid) {
        self.inner.write().reserve_oid(oid);
    }

    pub fn contains_entry(&self, txn: &Transaction, name: &str) -> bool {
        self.inner.read().contains_visible(txn, name)
    }

    pub fn get_entry(&self, txn: &Transaction, name: &str) -> DatabaseResult<CatalogEntry> {
        self.inner.read().visible(txn, name).map(CatalogEntry::snapshot)
    }

    /// Every entry visible to `txn`, keyed by name
    pub fn get_entries(&self, txn: &Transaction) -> BTreeMap<String, CatalogEntry> {
        let inner = self.inner.read();
        inner
            .entries
            .iter()
            .filter_map(|(name, head)| {
                let entry = head.visible_version(txn)?;
                (!entry.is_deleted()).then(|| (name.clone(), entry.snapshot()))
            })
            .collect()
    }

    pub fn get_entry_of_oid(&self, txn: &Transaction, oid: Oid) -> Option<CatalogEntry> {
        let inner = self.inner.read();
        inner.entries.values().find_map(|head| {
            let entry = head.visible_version(txn)?;
            (entry.oid() == oid && !entry.is_deleted()).then(|| entry.snapshot())
        })
    }

    /// Create `entry` under `txn` and return its oid. An entry arriving with
    /// a valid oid keeps it.
    pub fn create_entry(self: &Arc<Self>, txn: &Transaction, mut entry: CatalogEntry) -> DatabaseResult<Oid> {
        txn.ensure_writable()?;
        let change = {
            let mut inner = self.inner.write();
            let oid = inner.reserve_oid(entry.oid());
            entry.set_oid(oid);
            inner.create(txn, entry)?
        };
        let oid = change.current.oid();
        if txn.should_append_to_undo_buffer() {
            txn.push_create_drop(self, &change, false)?;
        }
        Ok(oid)
    }

    pub fn drop_entry(self: &Arc<Self>, txn: &Transaction, name: &str, oid: Oid) -> DatabaseResult<()> {
        txn.ensure_writable()?;
        let change = self.inner.write().drop_version(txn, name, oid)?;
        if txn.should_append_to_undo_buffer() {
            txn.push_create_drop(self, &change, false)?;
        }
        Ok(())
    }

    /// Apply `info` to a table entry. Returns the alter as it was applied,
    /// with any table id allocated for a new FROM/TO connection filled in.
    pub fn alter_table_entry(self: &Arc<Self>, txn: &Transaction, info: &AlterInfo) -> DatabaseResult<AlterInfo> {
        txn.ensure_writable()?;
        let mut resolved = info.clone();
        let (alter_change, created) = {
            let mut inner = self.inner.write();
            let entry = inner.visible(txn, &info.table_name)?;
            let oid = entry.oid();
            if let AlterKind::AddFromToConnection { rel_table_id, .. } = &mut resolved.kind {
                *rel_table_id = inner.reserve_oid(*rel_table_id);
            }
            let entry = inner.visible(txn, &info.table_name)?;
            let new_entry = entry.altered(txn.id(), &info.table_name, &resolved.kind)?;
            match &resolved.kind {
                AlterKind::RenameTable { .. } => {
                    // Rename is a drop of the old name plus a create of the new one.
                    let dropped = inner.drop_version(txn, &info.table_name, oid)?;
                    let created = match inner.create(txn, new_entry) {
                        Ok(created) => created,
                        Err(err) => {
                            inner.pop_head(&info.table_name, dropped.version);
                            return Err(err);
                        }
                    };
                    (dropped, Some(created))
                }
                _ => {
                    let version = inner.allocate_version();
                    let mut new_entry = new_entry;
                    new_entry.set_version(version);
                    let current = new_entry.snapshot();
                    inner.emplace(new_entry);
                    let change = CatalogChange {
                        previous: inner.head_summary(&info.table_name)?,
                        name: info.table_name.clone(),
                        version,
                        current,
                    };
                    (change, None)
                }
            }
        };
        if txn.should_append_to_undo_buffer() {
            txn.push_alter(self, &alter_change, &resolved)?;
            if let Some(created) = created {
                txn.push_create_drop(self, &created, true)?;
            }
        }
        Ok(resolved)
    }

    /// Advance a sequence `count` times and return the produced values
    pub fn next_sequence_values(
        self: &Arc<Self>,
        txn: &Transaction,
        name: &str,
        count: u64,
    ) -> DatabaseResult<Vec<i64>> {
        if txn.is_read_only() {
            return Err(DatabaseError::Transaction(
                "Cannot advance a sequence in a read-only transaction.".to_string(),
            ));
        }
        let (values, oid, version, rollback) = {
            let mut inner = self.inner.write();
            let entry = inner
                .entries
                .get_mut(name)
                .and_then(|head| head.visible_version_mut(txn))
                .filter(|entry| !entry.is_deleted())
                .ok_or_else(|| {
                    DatabaseError::NotFound(format!("{} does not exist in catalog.", name))
                })?;
            let oid = entry.oid();
            let version = entry.version();
            let data = entry.sequence_data_mut().ok_or_else(|| {
                DatabaseError::Catalog(format!("{} is not a sequence.", name))
            })?;
            let rollback = data.rollback_data();
            let mut values = Vec::with_capacity(count as usize);
            for _ in 0..count {
                match data.next_val(name) {
                    Ok(value) => values.push(value),
                    Err(err) => {
                        data.restore(rollback);
                        return Err(err);
                    }
                }
            }
            (values, oid, version, rollback)
        };
        if txn.should_append_to_undo_buffer() {
            txn.push_sequence_change(self, name, version, oid, count, rollback)?;
        }
        Ok(values)
    }

    /// Stamp a version with its commit timestamp
    pub(crate) fn commit_version(&self, name: &str, version: VersionId, commit_ts: Timestamp) -> DatabaseResult<()> {
        let mut inner = self.inner.write();
        let entry = inner
            .entries
            .get_mut(name)
            .and_then(|head| head.find_version_mut(version))
            .ok_or_else(|| missing_version(name, version))?;
        entry.set_timestamp(commit_ts);
        Ok(())
    }

    /// Unlink a version pushed by a transaction that is rolling back
    pub(crate) fn rollback_version(&self, name: &str, version: VersionId) -> DatabaseResult<()> {
        let mut inner = self.inner.write();
        let head = inner
            .entries
            .get_mut(name)
            .ok_or_else(|| missing_version(name, version))?;
        if head.version() != version {
            // A newer version sits on top; splice this one out from under it.
            if head.splice_out(version) {
                return Ok(());
            }
            return Err(missing_version(name, version));
        }
        inner.pop_head(name, version);
        Ok(())
    }

    pub(crate) fn rollback_sequence(
        &self,
        name: &str,
        version: VersionId,
        data: SequenceRollbackData,
    ) -> DatabaseResult<()> {
        let mut inner = self.inner.write();
        let entry = inner
            .entries
            .get_mut(name)
            .and_then(|head| head.find_version_mut(version))
            .ok_or_else(|| missing_version(name, version))?;
        let sequence = entry.sequence_data_mut().ok_or_else(|| {
            DatabaseError::InternalInvariantViolation(format!(
                "Sequence rollback targets non-sequence entry {}",
                name
            ))
        })?;
        sequence.restore(data);
        Ok(())
    }

    /// Write the committed, live, non-function entries ordered by oid
    pub fn serialize<W: Writer>(&self, ser: &mut Serializer<W>) -> DatabaseResult<()> {
        let inner = self.inner.read();
        let mut to_serialize: Vec<&CatalogEntry> = inner
            .entries
            .values()
            .filter_map(|head| head.committed_version())
            .filter(|entry| !entry.is_deleted() && !entry.entry_type().is_function())
            .collect();
        to_serialize.sort_by_key(|entry| entry.oid());
        ser.write_u64(inner.next_oid)?;
        ser.write_u64(to_serialize.len() as u64)?;
        for entry in to_serialize {
            entry.serialize(ser)?;
        }
        Ok(())
    }

    /// Replace the contents of this set with a serialized image. Restored
    /// entries are committed at timestamp 0.
    pub fn deserialize_into<R: Reader>(&self, de: &mut Deserializer<R>) -> DatabaseResult<()> {
        let next_oid = de.read_u64()?;
        let num_entries = de.read_u64()?;
        let mut restored = Vec::new();
        for _ in 0..num_entries {
            restored.push(CatalogEntry::deserialize(de)?);
        }
        let mut inner = self.inner.write();
        inner.entries.clear();
        inner.next_oid = next_oid;
        for mut entry in restored {
            let version = inner.allocate_version();
            entry.set_version(version);
            inner.emplace(entry);
        }
        Ok(())
    }

    /// Number of versions stored for `name`, or `None` if the name has no chain
    pub fn chain_len(&self, name: &str) -> Option<usize> {
        self.inner.read().entries.get(name).map(CatalogEntry::chain_len)
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CatalogSetInner {
    /// Remove the head of `name`'s chain, restoring the version under it.
    /// A chain left with only its creation placeholder is removed entirely.
    fn pop_head(&mut self, name: &str, version: VersionId) {
        let Some(mut head) = self.entries.remove(name) else {
            return;
        };
        if head.version() != version {
            self.entries.insert(name.to_string(), head);
            return;
        }
        if let Some(older) = head.take_prev() {
            if !older.is_bare_dummy() {
                self.entries.insert(name.to_string(), *older);
            }
        }
    }
}

fn missing_version(name: &str, version: VersionId) -> DatabaseError {
    DatabaseError::InternalInvariantViolation(format!(
        "Version {} of catalog entry {} is not in its chain",
        version, name
    ))
}
