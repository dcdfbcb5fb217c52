// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Checkpoints: folding the WAL into the data file
//!
//! The checkpoint image is the serialized catalog followed by the serialized
//! tables. It is written through the shadow file so that a crash at any
//! point leaves either the old image or the new one recoverable.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};

use log::info;
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::config::DatabaseConfig;
use crate::error::{DatabaseError, DatabaseResult};
use crate::storage::database_header::DatabaseHeader;
use crate::storage::serializer::{Deserializer, InMemReader, InMemWriter, Serializer};
use crate::storage::storage_manager::StorageManager;
use crate::storage::PAGE_SIZE;
use crate::txn::Transaction;

pub struct Checkpointer<'a> {
    catalog: &'a Catalog,
    storage: &'a StorageManager,
    config: &'a DatabaseConfig,
}

impl<'a> Checkpointer<'a> {
    pub fn new(catalog: &'a Catalog, storage: &'a StorageManager, config: &'a DatabaseConfig) -> Self {
        Self {
            catalog,
            storage,
            config,
        }
    }

    /// Write a new checkpoint image and truncate the WAL. The caller must
    /// make sure no transaction is active.
    pub fn write_checkpoint(&self) -> DatabaseResult<()> {
        let Some(paths) = self.storage.paths() else {
            self.storage.checkpoint_tables(self.catalog);
            self.catalog.reset_version();
            return Ok(());
        };
        if self.config.read_only {
            return Err(DatabaseError::Transaction(
                "Cannot checkpoint a database opened in read-only mode.".to_string(),
            ));
        }
        self.storage.checkpoint_tables(self.catalog);

        let mut ser = Serializer::new(InMemWriter::new());
        self.catalog.serialize(&mut ser)?;
        self.storage.serialize(&mut ser)?;
        let image = ser.into_inner().into_inner();
        let database_id = self.storage.database_id();
        let header = DatabaseHeader {
            database_id,
            image_size: image.len() as u64,
            image_pages: image.len().div_ceil(PAGE_SIZE) as u64,
            image_checksum: crc32fast::hash(&image),
        };

        let shadow = self.storage.shadow_file();
        shadow.add_page(0, header.to_page())?;
        for (idx, chunk) in image.chunks(PAGE_SIZE).enumerate() {
            shadow.add_page(idx as u32 + 1, chunk.to_vec())?;
        }
        shadow.flush_all(database_id)?;
        self.storage.wal().log_and_flush_checkpoint()?;
        shadow.apply_shadow_pages(&paths.data_file)?;
        let data_file = OpenOptions::new().write(true).open(&paths.data_file)?;
        data_file.set_len((header.image_pages + 1) * PAGE_SIZE as u64)?;
        data_file.sync_all()?;

        self.storage.wal().clear()?;
        shadow.clear()?;
        self.catalog.reset_version();
        info!(
            "Checkpoint wrote {} bytes in {} pages to {}",
            header.image_size,
            header.image_pages,
            paths.data_file.display()
        );
        Ok(())
    }

    /// Load the last checkpoint image, or initialize a new data file
    pub fn read_checkpoint(&self) -> DatabaseResult<()> {
        let Some(paths) = self.storage.paths() else {
            return Ok(());
        };
        let Some(header) = DatabaseHeader::read_from_file(&paths.data_file)? else {
            let database_id = Uuid::new_v4();
            if !self.config.read_only {
                let mut file = OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(true)
                    .open(&paths.data_file)?;
                file.write_all(&DatabaseHeader::new(database_id).to_page())?;
                file.sync_all()?;
            }
            self.storage.set_database_id(database_id);
            info!("Initialized database {} at {}", database_id, paths.data_file.display());
            return Ok(());
        };
        self.storage.set_database_id(header.database_id);
        if header.image_size == 0 {
            return Ok(());
        }

        let mut file = File::open(&paths.data_file)?;
        file.seek(SeekFrom::Start(PAGE_SIZE as u64))?;
        let mut image = vec![0u8; header.image_size as usize];
        file.read_exact(&mut image).map_err(|e| {
            DatabaseError::Corruption(format!(
                "Checkpoint image of {} is truncated: {}",
                paths.data_file.display(),
                e
            ))
        })?;
        if crc32fast::hash(&image) != header.image_checksum {
            return Err(DatabaseError::Corruption(format!(
                "Checkpoint image of {} failed its checksum",
                paths.data_file.display()
            )));
        }
        let mut de = Deserializer::new(InMemReader::new(image));
        self.catalog.deserialize(&mut de)?;
        self.storage.deserialize(&mut de)?;
        info!(
            "Loaded checkpoint of database {} ({} tables)",
            header.database_id,
            self.storage.table_ids().len()
        );
        Ok(())
    }

    /// Whether committing `txn` should trigger an automatic checkpoint
    pub fn can_auto_checkpoint(&self, txn: &Transaction) -> bool {
        if self.storage.is_in_memory() || !self.config.auto_checkpoint || self.config.read_only {
            return false;
        }
        if !txn.should_log_to_wal() {
            return false;
        }
        let wal_size = self.storage.wal().file_size().unwrap_or(0);
        txn.local_wal().size() + wal_size > self.config.checkpoint_threshold
    }
}
