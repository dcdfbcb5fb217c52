// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Shadow pages for crash-safe checkpoints
//!
//! A checkpoint never overwrites the data file directly. New page images are
//! staged here and flushed; only after the WAL holds a CHECKPOINT record are
//! they copied over the data file. A crash between the two steps is repaired
//! on restart by replaying the shadow file.
//!
//! Layout: one header page (`magic`, page count, database id), the staged
//! pages, then the vector of [`ShadowPageRecord`]s.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{DatabaseError, DatabaseResult};
use crate::storage::database_header::DatabaseHeader;
use crate::storage::serializer::{Deserializer, FileReader, FileWriter, Serializer, Writer};
use crate::storage::PAGE_SIZE;

const SHADOW_MAGIC: &[u8; 4] = b"GLSH";

/// Index of the data file among the files a shadow page can target
pub const DATA_FILE_IDX: u32 = 0;

/// Where a staged page belongs, plus the crc32 of its bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowPageRecord {
    pub original_file_idx: u32,
    pub original_page_idx: u32,
    pub checksum: u32,
}

#[derive(Debug, Default)]
struct ShadowState {
    records: Vec<ShadowPageRecord>,
    pages: Vec<Vec<u8>>,
}

#[derive(Debug)]
pub struct ShadowFile {
    path: Option<PathBuf>,
    state: Mutex<ShadowState>,
}

pub(crate) fn database_id_mismatch(path: &Path) -> DatabaseError {
    DatabaseError::DatabaseMismatch(format!(
        "Database ID for temporary file '{}' does not match the current database. This file may \
         have been left behind from a previous database with the same name. If it is safe to do \
         so, please delete this file and restart the database.",
        path.display()
    ))
}

impl ShadowFile {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path: Some(path),
            state: Mutex::new(ShadowState::default()),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(ShadowState::default()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Stage a new image of `page_idx` of the data file. Short pages are
    /// zero padded.
    pub fn add_page(&self, page_idx: u32, mut data: Vec<u8>) -> DatabaseResult<()> {
        if data.len() > PAGE_SIZE {
            return Err(DatabaseError::InternalInvariantViolation(format!(
                "Shadow page {} holds {} bytes, more than a page",
                page_idx,
                data.len()
            )));
        }
        data.resize(PAGE_SIZE, 0);
        let mut state = self.state.lock();
        state.records.push(ShadowPageRecord {
            original_file_idx: DATA_FILE_IDX,
            original_page_idx: page_idx,
            checksum: crc32fast::hash(&data),
        });
        state.pages.push(data);
        Ok(())
    }

    pub fn num_pages(&self) -> usize {
        self.state.lock().records.len()
    }

    fn require_path(&self) -> DatabaseResult<&Path> {
        self.path.as_deref().ok_or_else(|| {
            DatabaseError::InternalInvariantViolation(
                "An in-memory database has no shadow file".to_string(),
            )
        })
    }

    /// Persist the staged pages and their records, then fsync
    pub fn flush_all(&self, database_id: Uuid) -> DatabaseResult<()> {
        let path = self.require_path()?;
        let state = self.state.lock();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        let mut ser = Serializer::new(FileWriter::at_offset(file, 0)?);
        let mut header = Vec::with_capacity(PAGE_SIZE);
        header.extend_from_slice(SHADOW_MAGIC);
        header.extend_from_slice(&(state.records.len() as u64).to_le_bytes());
        header.extend_from_slice(database_id.as_bytes());
        header.resize(PAGE_SIZE, 0);
        ser.write_raw(&header)?;
        for page in &state.pages {
            ser.write_raw(page)?;
        }
        ser.write_u64(state.records.len() as u64)?;
        for record in &state.records {
            ser.write_u32(record.original_file_idx)?;
            ser.write_u32(record.original_page_idx)?;
            ser.write_u32(record.checksum)?;
        }
        ser.writer_mut().sync()?;
        log::debug!(
            "Flushed {} shadow pages to {}",
            state.records.len(),
            path.display()
        );
        Ok(())
    }

    /// Copy the staged pages over the data file and fsync it
    pub fn apply_shadow_pages(&self, data_path: &Path) -> DatabaseResult<()> {
        let state = self.state.lock();
        let mut file = OpenOptions::new().create(true).write(true).open(data_path)?;
        write_pages(&mut file, data_path, state.records.iter().zip(&state.pages))
    }

    /// Drop the staged pages and remove the file
    pub fn clear(&self) -> DatabaseResult<()> {
        *self.state.lock() = ShadowState::default();
        if let Some(path) = self.path.as_ref() {
            remove_if_exists(path)?;
        }
        Ok(())
    }

    /// Re-apply a shadow file left behind by a checkpoint that logged its
    /// CHECKPOINT record but did not finish copying pages
    pub fn replay_shadow_page_records(
        shadow_path: &Path,
        data_path: &Path,
        read_only: bool,
    ) -> DatabaseResult<()> {
        if read_only {
            return Err(DatabaseError::Transaction(
                "Couldn't replay shadow pages under read-only mode. Please re-open the database \
                 with read-write mode to replay shadow pages."
                    .to_string(),
            ));
        }
        if !shadow_path.exists() {
            return Ok(());
        }
        if !data_path.exists() {
            return Err(DatabaseError::NotFound(format!(
                "Found shadow file {} but no corresponding database file. This file may have \
                 been left behind from a previous database with the same name. If it is safe to \
                 do so, please delete this file and restart the database.",
                shadow_path.display()
            )));
        }
        let mut shadow = File::open(shadow_path)?;
        let mut header = vec![0u8; PAGE_SIZE];
        shadow.read_exact(&mut header)?;
        if &header[0..4] != SHADOW_MAGIC {
            return Err(DatabaseError::Corruption(format!(
                "Shadow file {} has an invalid header",
                shadow_path.display()
            )));
        }
        let mut count = [0u8; 8];
        count.copy_from_slice(&header[4..12]);
        let num_pages = u64::from_le_bytes(count);
        let mut id = [0u8; 16];
        id.copy_from_slice(&header[12..28]);
        let shadow_database_id = Uuid::from_bytes(id);

        let data_header = DatabaseHeader::read_from_file(data_path)?.ok_or_else(|| {
            DatabaseError::InternalInvariantViolation(format!(
                "Found a shadow file for database {} but no valid database header. The database \
                 is corrupted, please recreate it.",
                data_path.display()
            ))
        })?;
        if data_header.database_id != shadow_database_id {
            return Err(database_id_mismatch(shadow_path));
        }

        let mut de = Deserializer::new(FileReader::new(File::open(shadow_path)?)?);
        let mut skip = vec![0u8; PAGE_SIZE];
        for _ in 0..=num_pages {
            de.read_raw(&mut skip)?;
        }
        let num_records = de.read_u64()?;
        let mut records = Vec::new();
        for _ in 0..num_records {
            records.push(ShadowPageRecord {
                original_file_idx: de.read_u32()?,
                original_page_idx: de.read_u32()?,
                checksum: de.read_u32()?,
            });
        }
        if num_records != num_pages {
            return Err(DatabaseError::Corruption(format!(
                "Shadow file {} lists {} records for {} pages",
                shadow_path.display(),
                num_records,
                num_pages
            )));
        }

        let mut pages = Vec::with_capacity(records.len());
        shadow.seek(SeekFrom::Start(PAGE_SIZE as u64))?;
        for _ in &records {
            let mut page = vec![0u8; PAGE_SIZE];
            shadow.read_exact(&mut page)?;
            pages.push(page);
        }
        let mut file = OpenOptions::new().write(true).open(data_path)?;
        write_pages(&mut file, data_path, records.iter().zip(&pages))?;
        log::info!(
            "Replayed {} shadow pages from {}",
            records.len(),
            shadow_path.display()
        );
        Ok(())
    }
}

/// Write verified page images to their slots in the data file and fsync
fn write_pages<'a>(
    file: &mut File,
    data_path: &Path,
    pages: impl Iterator<Item = (&'a ShadowPageRecord, &'a Vec<u8>)>,
) -> DatabaseResult<()> {
    for (record, page) in pages {
        if crc32fast::hash(page) != record.checksum {
            return Err(DatabaseError::Corruption(format!(
                "Shadow page for page {} of {} failed its checksum",
                record.original_page_idx,
                data_path.display()
            )));
        }
        file.seek(SeekFrom::Start(record.original_page_idx as u64 * PAGE_SIZE as u64))?;
        file.write_all(page)?;
    }
    file.sync_all()?;
    Ok(())
}

pub(crate) fn remove_if_exists(path: &Path) -> DatabaseResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}
