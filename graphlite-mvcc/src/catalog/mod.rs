// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Versioned catalog
//!
//! Every catalog object lives in a [`CatalogSet`] as a chain of versions,
//! so each transaction sees the catalog as of its snapshot. [`Catalog`]
//! groups the sets and is the interface the rest of the system uses.

pub mod alter;
pub mod catalog_set;
pub mod entry;
pub mod manager;

pub use alter::{AlterInfo, AlterKind, AlterType};
pub use catalog_set::{CatalogChange, CatalogSet};
pub use entry::{
    CatalogEntry, CatalogEntryType, EntryPayload, FunctionKind, IndexDefinition, MacroDefinition,
    Oid, SequenceData, TableSchema, TableType,
};
pub use manager::Catalog;
