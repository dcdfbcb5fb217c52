// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! GraphLite MVCC - transactional core of an embedded property-graph database
//!
//! # Features
//!
//! - **Versioned Catalog**: Every catalog entry keeps a chain of versions, so
//!   each transaction sees the schema as of its start timestamp
//! - **Undo Buffer**: Commits stamp versions with the commit timestamp;
//!   rollbacks unlink them again
//! - **Write-Ahead Log**: Committed transactions are durable once their
//!   records are flushed, optionally framed with CRC32 checksums
//! - **Crash Recovery**: Committed work is replayed on open and a torn WAL
//!   tail is truncated
//! - **Checkpoints**: The WAL is folded into the data file through a shadow
//!   file, so an interrupted checkpoint can be finished on restart
//!
//! # Usage
//!
//! ```no_run
//! use graphlite_mvcc::{Database, DatabaseConfig, LogicalType, Value};
//!
//! let db = Database::open("./mydb", DatabaseConfig::default())?;
//! let conn = db.connect();
//! let txn = conn.begin_write_transaction()?;
//! db.create_node_table(&txn, "Person", vec![("id".into(), LogicalType::Int64)], "id")?;
//! db.insert_nodes(&txn, "Person", vec![vec![Value::Int64(1)]])?;
//! conn.commit()?;
//! # Ok::<(), graphlite_mvcc::DatabaseError>(())
//! ```

pub mod catalog;
pub mod config;
pub mod database;
pub mod error;
pub mod extension;
pub mod storage;
pub mod txn;

pub use catalog::{AlterInfo, AlterKind, Catalog, CatalogEntry, CatalogEntryType, CatalogSet};
pub use config::DatabaseConfig;
pub use database::Database;
pub use error::{DatabaseError, DatabaseResult};
pub use extension::ExtensionManager;
pub use storage::{InternalId, LogicalType, RelDirection, Value};
pub use txn::{Transaction, TransactionContext, TransactionKind, TransactionManager};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
