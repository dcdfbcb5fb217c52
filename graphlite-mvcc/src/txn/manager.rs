// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Transaction manager implementation
//!
//! Hands out transaction ids and start timestamps, serializes commits and
//! decides when to checkpoint. Commit timestamps come from one counter
//! under the manager lock, so commits are totally ordered.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use parking_lot::{Mutex, MutexGuard};

use crate::catalog::Catalog;
use crate::config::DatabaseConfig;
use crate::error::{DatabaseError, DatabaseResult};
use crate::storage::checkpointer::Checkpointer;
use crate::storage::storage_manager::StorageManager;

use super::timestamp::{Timestamp, TransactionId, INITIAL_TIMESTAMP, START_TRANSACTION_ID};
use super::transaction::{Transaction, TransactionKind};

const CHECKPOINT_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug)]
struct ManagerState {
    next_transaction_id: TransactionId,
    last_timestamp: Timestamp,
    active: BTreeMap<TransactionId, TransactionKind>,
    /// A forced checkpoint timed out and runs once no transaction is active
    checkpoint_pending: bool,
}

impl ManagerState {
    fn has_active_writer(&self) -> bool {
        self.active
            .values()
            .any(|kind| matches!(kind, TransactionKind::Write | TransactionKind::Recovery))
    }
}

/// Transaction manager handles the lifecycle of all transactions
pub struct TransactionManager {
    config: DatabaseConfig,
    catalog: Arc<Catalog>,
    storage: Arc<StorageManager>,
    state: Mutex<ManagerState>,
}

impl TransactionManager {
    pub fn new(config: DatabaseConfig, catalog: Arc<Catalog>, storage: Arc<StorageManager>) -> Self {
        Self {
            config,
            catalog,
            storage,
            state: Mutex::new(ManagerState {
                next_transaction_id: START_TRANSACTION_ID,
                last_timestamp: INITIAL_TIMESTAMP,
                active: BTreeMap::new(),
                checkpoint_pending: false,
            }),
        }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().active.len()
    }

    /// Commit timestamp of the most recent commit
    pub fn last_timestamp(&self) -> Timestamp {
        self.state.lock().last_timestamp
    }

    fn checkpointer(&self) -> Checkpointer<'_> {
        Checkpointer::new(&self.catalog, &self.storage, &self.config)
    }

    /// Start a transaction. Its snapshot covers every commit so far.
    pub fn begin(&self, kind: TransactionKind) -> DatabaseResult<Arc<Transaction>> {
        match kind {
            TransactionKind::Checkpoint | TransactionKind::Bootstrap => {
                return Err(DatabaseError::InternalInvariantViolation(format!(
                    "{} transactions are not started through the transaction manager",
                    kind
                )))
            }
            TransactionKind::Write if self.config.read_only => {
                return Err(DatabaseError::Transaction(
                    "Cannot start a write transaction in read-only mode.".to_string(),
                ))
            }
            _ => {}
        }
        let mut state = self.state.lock();
        let is_writer = matches!(kind, TransactionKind::Write | TransactionKind::Recovery);
        if is_writer && !self.config.enable_multi_writes && state.has_active_writer() {
            return Err(DatabaseError::Transaction(
                "Cannot start a new write transaction in the system. Only one write transaction \
                 at a time is allowed in the system."
                    .to_string(),
            ));
        }
        let id = state.next_transaction_id;
        let txn = Arc::new(Transaction::new(
            kind,
            id,
            state.last_timestamp,
            self.storage.is_in_memory(),
            self.config.enable_checksums,
        ));
        if txn.should_log_to_wal() {
            txn.local_wal().log_begin_transaction()?;
        }
        state.next_transaction_id += 1;
        state.active.insert(id, kind);
        debug!(
            "Started {} transaction {} at {}",
            kind,
            id,
            txn.start_ts()
        );
        Ok(txn)
    }

    /// Commit `txn`, then checkpoint if the WAL grew past the threshold or
    /// the transaction asked for one
    pub fn commit(&self, txn: &Transaction) -> DatabaseResult<()> {
        let auto_checkpoint = self.checkpointer().can_auto_checkpoint(txn);
        let force_checkpoint = txn.should_force_checkpoint() && !self.storage.is_in_memory();
        let mut state = self.state.lock();
        state.active.remove(&txn.id());
        let commit_ts = if txn.is_read_only() {
            state.last_timestamp
        } else {
            state.last_timestamp + 1
        };
        let result = txn.commit(commit_ts, self.storage.wal(), &self.catalog);
        // Versions may already carry commit_ts even when the commit failed.
        state.last_timestamp = commit_ts;
        result?;

        if force_checkpoint {
            drop(state);
            return self.force_checkpoint(txn);
        }
        if auto_checkpoint && !state.active.is_empty() {
            warn!(
                "Skipping checkpoint after transaction {}: {} transactions are still active",
                txn.id(),
                state.active.len()
            );
            return self.run_pending_checkpoint(&mut state);
        }
        if auto_checkpoint {
            state.checkpoint_pending = false;
            return self.checkpoint_locked(&state);
        }
        self.run_pending_checkpoint(&mut state)
    }

    pub fn rollback(&self, txn: &Transaction) -> DatabaseResult<()> {
        let mut state = self.state.lock();
        state.active.remove(&txn.id());
        txn.rollback()?;
        self.run_pending_checkpoint(&mut state)
    }

    /// Checkpoint once no transaction is active, waiting up to
    /// `checkpoint_wait_timeout_ms`
    pub fn checkpoint(&self) -> DatabaseResult<()> {
        if self.config.read_only {
            return Ok(());
        }
        self.wait_and_checkpoint()
    }

    /// Rows of a COPY are only durable through a checkpoint. When it times
    /// out, the checkpoint is deferred until the last active transaction
    /// leaves and the commit reports the timeout.
    fn force_checkpoint(&self, txn: &Transaction) -> DatabaseResult<()> {
        let result = self.wait_and_checkpoint();
        if let Err(DatabaseError::Transaction(_)) = &result {
            warn!(
                "Checkpoint forced by transaction {} timed out; deferring it until no transaction is active",
                txn.id()
            );
            let mut state = self.state.lock();
            state.checkpoint_pending = true;
            self.run_pending_checkpoint(&mut state)?;
        }
        result
    }

    fn wait_and_checkpoint(&self) -> DatabaseResult<()> {
        let deadline = Instant::now() + Duration::from_millis(self.config.checkpoint_wait_timeout_ms);
        loop {
            {
                let mut state = self.state.lock();
                if state.active.is_empty() {
                    state.checkpoint_pending = false;
                    return self.checkpoint_locked(&state);
                }
            }
            if Instant::now() >= deadline {
                return Err(DatabaseError::Transaction(
                    "Timeout waiting for active transactions to leave the system before \
                     checkpointing. If you have an open transaction, please close it and try again."
                        .to_string(),
                ));
            }
            std::thread::sleep(CHECKPOINT_POLL_INTERVAL);
        }
    }

    fn run_pending_checkpoint(&self, state: &mut MutexGuard<'_, ManagerState>) -> DatabaseResult<()> {
        if !state.checkpoint_pending || !state.active.is_empty() {
            return Ok(());
        }
        state.checkpoint_pending = false;
        info!("Running deferred checkpoint");
        self.checkpoint_locked(state)
    }

    /// Whether a forced checkpoint is waiting for active transactions
    pub fn has_pending_checkpoint(&self) -> bool {
        self.state.lock().checkpoint_pending
    }

    /// Runs with the manager lock held so no transaction can start
    fn checkpoint_locked(&self, state: &MutexGuard<'_, ManagerState>) -> DatabaseResult<()> {
        let started = Instant::now();
        self.checkpointer().write_checkpoint()?;
        info!(
            "Checkpointed at timestamp {} in {:?}",
            state.last_timestamp,
            started.elapsed()
        );
        Ok(())
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TransactionManager")
            .field("next_transaction_id", &state.next_transaction_id)
            .field("last_timestamp", &state.last_timestamp)
            .field("active", &state.active.len())
            .finish()
    }
}
