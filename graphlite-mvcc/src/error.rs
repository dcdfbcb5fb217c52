// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Error types shared by the catalog, storage and transaction layers

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DatabaseError {
    /// Write-write conflict between two concurrent transactions
    #[error("Conflict exception: {0}")]
    Conflict(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Checksum mismatch or an unreadable on-disk structure
    #[error("Corruption: {0}")]
    Corruption(String),

    /// The WAL or shadow file belongs to a different database
    #[error("Database mismatch: {0}")]
    DatabaseMismatch(String),

    /// The WAL was written with a different checksum setting
    #[error("Schema version error: {0}")]
    SchemaVersion(String),

    #[error("Internal invariant violation: {0}")]
    InternalInvariantViolation(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl DatabaseError {
    /// Errors that a caller is expected to handle by rolling back the statement
    pub fn is_conflict(&self) -> bool {
        matches!(self, DatabaseError::Conflict(_))
    }
}

impl From<std::io::Error> for DatabaseError {
    fn from(err: std::io::Error) -> Self {
        DatabaseError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for DatabaseError {
    fn from(err: serde_json::Error) -> Self {
        DatabaseError::Config(err.to_string())
    }
}

impl From<bincode::Error> for DatabaseError {
    fn from(err: bincode::Error) -> Self {
        DatabaseError::Serialization(err.to_string())
    }
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;
