// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Shared, durable write-ahead log
//!
//! The file starts with a [`WalHeader`] object, written the first time the
//! file is appended to while empty. Committed transactions append their
//! local WAL bytes as one unit under the writer lock, followed by an fsync.

use std::fs::{File, OpenOptions};
use std::io::Read;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{DatabaseError, DatabaseResult};
use crate::storage::serializer::{Deserializer, FileWriter, Reader, Serializer, Writer};
use crate::storage::wal::checksum::FramedWriter;
use crate::storage::wal::local_wal::LocalWal;
use crate::storage::wal::record::WalRecord;

/// Identity of the database a WAL belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalHeader {
    pub database_id: Uuid,
    pub enable_checksums: bool,
}

impl WalHeader {
    /// Serialized size of the header fields, which is also the frame size
    /// recorded in front of a checksummed header
    pub const PAYLOAD_SIZE: u64 = 17;

    pub fn serialize<W: Writer>(&self, ser: &mut Serializer<W>) -> DatabaseResult<()> {
        ser.on_object_begin();
        ser.write_uuid(&self.database_id)?;
        ser.write_bool(self.enable_checksums)?;
        ser.on_object_end()
    }

    pub fn deserialize<R: Reader>(de: &mut Deserializer<R>) -> DatabaseResult<Self> {
        de.on_object_begin()?;
        let database_id = de.read_uuid()?;
        let enable_checksums = de.read_u8()? != 0;
        de.on_object_end()?;
        Ok(Self {
            database_id,
            enable_checksums,
        })
    }

    /// Whether the WAL at `path` starts with a checksum frame. A framed
    /// header begins with its payload size; a plain one with a random uuid.
    pub fn is_framed(path: &Path) -> DatabaseResult<bool> {
        let mut file = File::open(path)?;
        let mut size = [0u8; 8];
        file.read_exact(&mut size)?;
        Ok(u64::from_le_bytes(size) == Self::PAYLOAD_SIZE)
    }

    pub fn check_checksums(&self, enable_checksums: bool) -> DatabaseResult<()> {
        if self.enable_checksums != enable_checksums {
            return Err(DatabaseError::SchemaVersion(format!(
                "The database you are trying to open was serialized with enable_checksums={} but \
                 you are trying to open it with enable_checksums={}. Please open your database \
                 using the correct enable_checksums config. If you wish to change this for your \
                 database, please checkpoint first so the WAL is empty.",
                self.enable_checksums, enable_checksums
            )));
        }
        Ok(())
    }
}

type WalSerializer = Serializer<FramedWriter<FileWriter>>;

#[derive(Debug)]
pub struct Wal {
    path: Option<PathBuf>,
    enable_checksums: bool,
    read_only: bool,
    database_id: Mutex<Uuid>,
    writer: Mutex<Option<WalSerializer>>,
}

impl Wal {
    pub fn new(path: PathBuf, enable_checksums: bool, read_only: bool) -> Self {
        Self {
            path: Some(path),
            enable_checksums,
            read_only,
            database_id: Mutex::new(Uuid::nil()),
            writer: Mutex::new(None),
        }
    }

    /// WAL of an in-memory database; logging to it is an error
    pub fn in_memory() -> Self {
        Self {
            path: None,
            enable_checksums: false,
            read_only: false,
            database_id: Mutex::new(Uuid::nil()),
            writer: Mutex::new(None),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn enable_checksums(&self) -> bool {
        self.enable_checksums
    }

    pub fn database_id(&self) -> Uuid {
        *self.database_id.lock()
    }

    pub fn set_database_id(&self, database_id: Uuid) {
        *self.database_id.lock() = database_id;
    }

    fn open_writer(&self) -> DatabaseResult<WalSerializer> {
        let path = self.path.as_ref().ok_or_else(|| {
            DatabaseError::InternalInvariantViolation(
                "Cannot write to the WAL of an in-memory database".to_string(),
            )
        })?;
        if self.read_only {
            return Err(DatabaseError::Transaction(
                "Cannot write to the WAL of a read-only database.".to_string(),
            ));
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        let mut ser = Serializer::new(FramedWriter::new(
            FileWriter::append(file)?,
            self.enable_checksums,
        ));
        if ser.writer().inner().offset() == 0 {
            WalHeader {
                database_id: self.database_id(),
                enable_checksums: self.enable_checksums,
            }
            .serialize(&mut ser)?;
        }
        Ok(ser)
    }

    fn with_writer<T>(&self, f: impl FnOnce(&mut WalSerializer) -> DatabaseResult<T>) -> DatabaseResult<T> {
        let mut guard = self.writer.lock();
        if guard.is_none() {
            *guard = Some(self.open_writer()?);
        }
        match guard.as_mut() {
            Some(ser) => f(ser),
            None => Err(DatabaseError::InternalInvariantViolation(
                "WAL writer missing after open".to_string(),
            )),
        }
    }

    /// Append the finished records of a committing transaction and fsync
    pub fn log_committed_wal(&self, local_wal: &LocalWal) -> DatabaseResult<()> {
        let bytes = local_wal.bytes();
        self.with_writer(|ser| {
            // Local records are already framed.
            ser.write_raw(&bytes)?;
            ser.writer_mut().sync()
        })?;
        log::debug!("Flushed {} bytes of committed WAL records", bytes.len());
        Ok(())
    }

    pub fn log_and_flush_checkpoint(&self) -> DatabaseResult<()> {
        self.with_writer(|ser| {
            WalRecord::Checkpoint.serialize(ser)?;
            ser.writer_mut().sync()
        })
    }

    /// Truncate the log after a finished checkpoint
    pub fn clear(&self) -> DatabaseResult<()> {
        let mut guard = self.writer.lock();
        *guard = None;
        if let Some(path) = self.path.as_ref() {
            if !self.read_only && path.exists() {
                let file = OpenOptions::new().write(true).open(path)?;
                file.set_len(0)?;
                file.sync_all()?;
            }
        }
        Ok(())
    }

    /// Size of the log file including bytes buffered by the writer
    pub fn file_size(&self) -> DatabaseResult<u64> {
        if let Some(ser) = self.writer.lock().as_ref() {
            return Ok(ser.writer().inner().offset());
        }
        match self.path.as_ref() {
            Some(path) if path.exists() => Ok(std::fs::metadata(path)?.len()),
            _ => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::serializer::FileReader;
    use crate::storage::wal::checksum::FramedReader;
    use crate::storage::wal::record::WalRecordType;
    use tempfile::TempDir;

    fn read_back(path: &Path, checksums: bool) -> (WalHeader, Vec<WalRecordType>) {
        let file = File::open(path).unwrap();
        let mut de = Deserializer::new(FramedReader::new(FileReader::new(file).unwrap(), checksums));
        let header = WalHeader::deserialize(&mut de).unwrap();
        let mut types = Vec::new();
        while !de.finished() {
            types.push(WalRecord::deserialize(&mut de).unwrap().record_type());
        }
        (header, types)
    }

    #[test]
    fn test_header_written_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.db.wal");
        for checksums in [true, false] {
            let wal = Wal::new(path.clone(), checksums, false);
            let id = Uuid::new_v4();
            wal.set_database_id(id);

            let local = LocalWal::new(checksums);
            local.log_begin_transaction().unwrap();
            local.log_commit().unwrap();
            wal.log_committed_wal(&local).unwrap();
            wal.log_committed_wal(&local).unwrap();
            wal.log_and_flush_checkpoint().unwrap();

            assert_eq!(WalHeader::is_framed(&path).unwrap(), checksums);
            let (header, types) = read_back(&path, checksums);
            assert_eq!(header.database_id, id);
            assert_eq!(header.enable_checksums, checksums);
            assert_eq!(types.len(), 5);
            assert_eq!(types.last(), Some(&WalRecordType::Checkpoint));

            wal.clear().unwrap();
            assert_eq!(wal.file_size().unwrap(), 0);
        }
    }

    #[test]
    fn test_in_memory_wal_rejects_writes() {
        let wal = Wal::in_memory();
        let local = LocalWal::new(false);
        assert!(matches!(
            wal.log_committed_wal(&local),
            Err(DatabaseError::InternalInvariantViolation(_))
        ));
        assert_eq!(wal.file_size().unwrap(), 0);
    }

    #[test]
    fn test_checksum_flag_mismatch() {
        let header = WalHeader {
            database_id: Uuid::new_v4(),
            enable_checksums: true,
        };
        assert!(header.check_checksums(true).is_ok());
        assert!(matches!(
            header.check_checksums(false),
            Err(DatabaseError::SchemaVersion(_))
        ));
    }
}
