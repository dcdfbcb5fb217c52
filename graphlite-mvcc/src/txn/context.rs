// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Per-connection transaction state
//!
//! A connection runs at most one transaction at a time. Dropping a context
//! with an open transaction rolls it back.

use std::sync::Arc;

use log::warn;
use parking_lot::Mutex;

use crate::error::{DatabaseError, DatabaseResult};

use super::manager::TransactionManager;
use super::transaction::{Transaction, TransactionKind};

pub struct TransactionContext {
    manager: Arc<TransactionManager>,
    active: Mutex<Option<Arc<Transaction>>>,
}

impl TransactionContext {
    pub fn new(manager: Arc<TransactionManager>) -> Self {
        Self {
            manager,
            active: Mutex::new(None),
        }
    }

    pub fn manager(&self) -> &Arc<TransactionManager> {
        &self.manager
    }

    fn begin(&self, kind: TransactionKind) -> DatabaseResult<Arc<Transaction>> {
        let mut active = self.active.lock();
        if active.is_some() {
            return Err(DatabaseError::Transaction(
                "Connection already has an active transaction. Cannot start a transaction within \
                 another one."
                    .to_string(),
            ));
        }
        let txn = self.manager.begin(kind)?;
        *active = Some(txn.clone());
        Ok(txn)
    }

    pub fn begin_read_transaction(&self) -> DatabaseResult<Arc<Transaction>> {
        self.begin(TransactionKind::ReadOnly)
    }

    pub fn begin_write_transaction(&self) -> DatabaseResult<Arc<Transaction>> {
        self.begin(TransactionKind::Write)
    }

    pub fn begin_recovery_transaction(&self) -> DatabaseResult<Arc<Transaction>> {
        self.begin(TransactionKind::Recovery)
    }

    pub fn commit(&self) -> DatabaseResult<()> {
        let txn = self.active.lock().take().ok_or_else(|| {
            DatabaseError::Transaction("No active transaction to commit.".to_string())
        })?;
        self.manager.commit(&txn)
    }

    pub fn rollback(&self) -> DatabaseResult<()> {
        let txn = self.active.lock().take().ok_or_else(|| {
            DatabaseError::Transaction("No active transaction to rollback.".to_string())
        })?;
        self.manager.rollback(&txn)
    }

    pub fn active_transaction(&self) -> Option<Arc<Transaction>> {
        self.active.lock().clone()
    }

    pub fn has_active_transaction(&self) -> bool {
        self.active.lock().is_some()
    }
}

impl Drop for TransactionContext {
    fn drop(&mut self) {
        if let Some(txn) = self.active.get_mut().take() {
            if let Err(err) = self.manager.rollback(&txn) {
                warn!("Failed to roll back transaction {} on close: {}", txn.id(), err);
            }
        }
    }
}
