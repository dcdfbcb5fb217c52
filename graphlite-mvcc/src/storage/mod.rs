// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Storage layer: tables, undo buffer, write-ahead log and checkpoints
//!
//! This module provides:
//! - MVCC row storage for node and relationship tables
//! - The undo buffer that commits or reverts a transaction's changes
//! - The local and shared write-ahead log and its replayer
//! - The data file, shadow file and checkpointer

pub mod checkpointer;
pub mod database_header;
pub mod serializer;
pub mod shadow_file;
pub mod storage_manager;
pub mod table;
pub mod undo_buffer;
pub mod value;
pub mod version;
pub mod wal;

use std::path::{Path, PathBuf};

pub use checkpointer::Checkpointer;
pub use shadow_file::ShadowFile;
pub use storage_manager::StorageManager;
pub use table::{NodeTable, RelDirection, RelTable, Table};
pub use undo_buffer::UndoBuffer;
pub use value::{InternalId, LogicalType, Value};

/// Size of a data file page
pub const PAGE_SIZE: usize = 4096;

/// Files that make up an on-disk database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePaths {
    pub data_file: PathBuf,
    pub wal_file: PathBuf,
    pub shadow_file: PathBuf,
}

impl StoragePaths {
    pub fn new(dir: &Path) -> Self {
        Self {
            data_file: dir.join("data.db"),
            wal_file: dir.join("data.db.wal"),
            shadow_file: dir.join("data.db.shadow"),
        }
    }
}
