// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Transaction management
//!
//! This module provides:
//! - Logical timestamps and MVCC visibility
//! - Transactions with their undo buffer, local WAL and local storage
//! - The transaction manager that hands out ids and commit timestamps
//! - Per-connection transaction contexts

pub mod context;
pub mod local_storage;
pub mod manager;
pub mod timestamp;
pub mod transaction;

pub use context::TransactionContext;
pub use local_storage::{LocalStorage, LocalTableStats};
pub use manager::TransactionManager;
pub use timestamp::{Timestamp, TransactionId};
pub use transaction::{Transaction, TransactionKind, TransactionStatus};
