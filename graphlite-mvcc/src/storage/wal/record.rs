// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! WAL record types
//!
//! Each record is one serialized object: `[type u8][payload]`. Under
//! checksum framing the object becomes one `[size][checksum][bytes]` frame.

use crate::catalog::alter::AlterInfo;
use crate::catalog::entry::{CatalogEntry, CatalogEntryType, Oid, TableType};
use crate::error::{DatabaseError, DatabaseResult};
use crate::storage::serializer::{Deserializer, Reader, Serializer, Writer};
use crate::storage::table::RelDirection;
use crate::storage::value::{ColumnId, InternalId, TableId, Value};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WalRecordType {
    /// Reserved so that zeroed bytes never parse as a record
    Invalid = 0,
    BeginTransaction = 1,
    Commit = 2,
    CopyTable = 13,
    CreateCatalogEntry = 14,
    DropCatalogEntry = 16,
    AlterTableEntry = 17,
    UpdateSequence = 18,
    TableInsertion = 30,
    NodeDeletion = 31,
    NodeUpdate = 32,
    RelDeletion = 33,
    RelDetachDelete = 34,
    RelUpdate = 35,
    LoadExtension = 100,
    Checkpoint = 254,
}

impl WalRecordType {
    pub fn from_u8(value: u8) -> DatabaseResult<Self> {
        let record_type = match value {
            0 => WalRecordType::Invalid,
            1 => WalRecordType::BeginTransaction,
            2 => WalRecordType::Commit,
            13 => WalRecordType::CopyTable,
            14 => WalRecordType::CreateCatalogEntry,
            16 => WalRecordType::DropCatalogEntry,
            17 => WalRecordType::AlterTableEntry,
            18 => WalRecordType::UpdateSequence,
            30 => WalRecordType::TableInsertion,
            31 => WalRecordType::NodeDeletion,
            32 => WalRecordType::NodeUpdate,
            33 => WalRecordType::RelDeletion,
            34 => WalRecordType::RelDetachDelete,
            35 => WalRecordType::RelUpdate,
            100 => WalRecordType::LoadExtension,
            254 => WalRecordType::Checkpoint,
            other => {
                return Err(DatabaseError::Serialization(format!(
                    "Unknown WAL record type {}",
                    other
                )))
            }
        };
        Ok(record_type)
    }
}

#[derive(Debug)]
pub enum WalRecord {
    BeginTransaction,
    Commit,
    Checkpoint,
    CreateCatalogEntry {
        entry: CatalogEntry,
        is_internal: bool,
    },
    DropCatalogEntry {
        oid: Oid,
        entry_type: CatalogEntryType,
    },
    AlterTableEntry {
        info: AlterInfo,
    },
    UpdateSequence {
        sequence_id: Oid,
        k_count: u64,
    },
    /// Column-major rows. Relationship insertions carry the source and
    /// destination node ids as the first two vectors.
    TableInsertion {
        table_id: TableId,
        table_type: TableType,
        num_rows: u64,
        vectors: Vec<Vec<Value>>,
    },
    NodeDeletion {
        table_id: TableId,
        node_offset: u64,
        pk: Value,
    },
    NodeUpdate {
        table_id: TableId,
        column_id: ColumnId,
        node_offset: u64,
        value: Value,
    },
    RelDeletion {
        table_id: TableId,
        src: InternalId,
        dst: InternalId,
        rel_id: InternalId,
    },
    RelDetachDelete {
        table_id: TableId,
        direction: RelDirection,
        src: InternalId,
    },
    RelUpdate {
        table_id: TableId,
        column_id: ColumnId,
        src: InternalId,
        dst: InternalId,
        rel_id: InternalId,
        value: Value,
    },
    CopyTable {
        table_id: TableId,
    },
    LoadExtension {
        path: String,
    },
}

fn write_internal_id<W: Writer>(ser: &mut Serializer<W>, id: &InternalId) -> DatabaseResult<()> {
    ser.write_u64(id.table_id)?;
    ser.write_u64(id.offset)
}

fn read_internal_id<R: Reader>(de: &mut Deserializer<R>) -> DatabaseResult<InternalId> {
    let table_id = de.read_u64()?;
    let offset = de.read_u64()?;
    Ok(InternalId::new(table_id, offset))
}

impl WalRecord {
    pub fn record_type(&self) -> WalRecordType {
        match self {
            WalRecord::BeginTransaction => WalRecordType::BeginTransaction,
            WalRecord::Commit => WalRecordType::Commit,
            WalRecord::Checkpoint => WalRecordType::Checkpoint,
            WalRecord::CreateCatalogEntry { .. } => WalRecordType::CreateCatalogEntry,
            WalRecord::DropCatalogEntry { .. } => WalRecordType::DropCatalogEntry,
            WalRecord::AlterTableEntry { .. } => WalRecordType::AlterTableEntry,
            WalRecord::UpdateSequence { .. } => WalRecordType::UpdateSequence,
            WalRecord::TableInsertion { .. } => WalRecordType::TableInsertion,
            WalRecord::NodeDeletion { .. } => WalRecordType::NodeDeletion,
            WalRecord::NodeUpdate { .. } => WalRecordType::NodeUpdate,
            WalRecord::RelDeletion { .. } => WalRecordType::RelDeletion,
            WalRecord::RelDetachDelete { .. } => WalRecordType::RelDetachDelete,
            WalRecord::RelUpdate { .. } => WalRecordType::RelUpdate,
            WalRecord::CopyTable { .. } => WalRecordType::CopyTable,
            WalRecord::LoadExtension { .. } => WalRecordType::LoadExtension,
        }
    }

    /// Write this record as one framed object
    pub fn serialize<W: Writer>(&self, ser: &mut Serializer<W>) -> DatabaseResult<()> {
        ser.on_object_begin();
        ser.write_u8(self.record_type() as u8)?;
        self.serialize_payload(ser)?;
        ser.on_object_end()
    }

    fn serialize_payload<W: Writer>(&self, ser: &mut Serializer<W>) -> DatabaseResult<()> {
        match self {
            WalRecord::BeginTransaction | WalRecord::Commit | WalRecord::Checkpoint => Ok(()),
            WalRecord::CreateCatalogEntry { entry, is_internal } => {
                entry.serialize(ser)?;
                ser.write_bool(*is_internal)
            }
            WalRecord::DropCatalogEntry { oid, entry_type } => {
                ser.write_u64(*oid)?;
                ser.write_u8(*entry_type as u8)
            }
            WalRecord::AlterTableEntry { info } => info.serialize(ser),
            WalRecord::UpdateSequence {
                sequence_id,
                k_count,
            } => {
                ser.write_u64(*sequence_id)?;
                ser.write_u64(*k_count)
            }
            WalRecord::TableInsertion {
                table_id,
                table_type,
                num_rows,
                vectors,
            } => {
                ser.write_u64(*table_id)?;
                ser.write_u8(*table_type as u8)?;
                ser.write_u64(*num_rows)?;
                ser.write_u64(vectors.len() as u64)?;
                for vector in vectors {
                    Value::serialize_vector(vector, ser)?;
                }
                Ok(())
            }
            WalRecord::NodeDeletion {
                table_id,
                node_offset,
                pk,
            } => {
                ser.write_u64(*table_id)?;
                ser.write_u64(*node_offset)?;
                pk.serialize(ser)
            }
            WalRecord::NodeUpdate {
                table_id,
                column_id,
                node_offset,
                value,
            } => {
                ser.write_u64(*table_id)?;
                ser.write_u32(*column_id)?;
                ser.write_u64(*node_offset)?;
                value.serialize(ser)
            }
            WalRecord::RelDeletion {
                table_id,
                src,
                dst,
                rel_id,
            } => {
                ser.write_u64(*table_id)?;
                write_internal_id(ser, src)?;
                write_internal_id(ser, dst)?;
                write_internal_id(ser, rel_id)
            }
            WalRecord::RelDetachDelete {
                table_id,
                direction,
                src,
            } => {
                ser.write_u64(*table_id)?;
                ser.write_u8(*direction as u8)?;
                write_internal_id(ser, src)
            }
            WalRecord::RelUpdate {
                table_id,
                column_id,
                src,
                dst,
                rel_id,
                value,
            } => {
                ser.write_u64(*table_id)?;
                ser.write_u32(*column_id)?;
                write_internal_id(ser, src)?;
                write_internal_id(ser, dst)?;
                write_internal_id(ser, rel_id)?;
                value.serialize(ser)
            }
            WalRecord::CopyTable { table_id } => ser.write_u64(*table_id),
            WalRecord::LoadExtension { path } => ser.write_string(path),
        }
    }

    /// Read one framed record
    pub fn deserialize<R: Reader>(de: &mut Deserializer<R>) -> DatabaseResult<WalRecord> {
        de.on_object_begin()?;
        let record_type = WalRecordType::from_u8(de.read_u8()?)?;
        let record = Self::deserialize_payload(record_type, de)?;
        de.on_object_end()?;
        Ok(record)
    }

    fn deserialize_payload<R: Reader>(
        record_type: WalRecordType,
        de: &mut Deserializer<R>,
    ) -> DatabaseResult<WalRecord> {
        let record = match record_type {
            WalRecordType::Invalid => {
                return Err(DatabaseError::Serialization(
                    "Encountered an INVALID WAL record; the log contains zeroed bytes".to_string(),
                ))
            }
            WalRecordType::BeginTransaction => WalRecord::BeginTransaction,
            WalRecordType::Commit => WalRecord::Commit,
            WalRecordType::Checkpoint => WalRecord::Checkpoint,
            WalRecordType::CreateCatalogEntry => {
                let entry = CatalogEntry::deserialize(de)?;
                let is_internal = de.read_bool()?;
                WalRecord::CreateCatalogEntry { entry, is_internal }
            }
            WalRecordType::DropCatalogEntry => {
                let oid = de.read_u64()?;
                let entry_type = CatalogEntryType::from_u8(de.read_u8()?)?;
                WalRecord::DropCatalogEntry { oid, entry_type }
            }
            WalRecordType::AlterTableEntry => WalRecord::AlterTableEntry {
                info: AlterInfo::deserialize(de)?,
            },
            WalRecordType::UpdateSequence => WalRecord::UpdateSequence {
                sequence_id: de.read_u64()?,
                k_count: de.read_u64()?,
            },
            WalRecordType::TableInsertion => {
                let table_id = de.read_u64()?;
                let table_type = TableType::from_u8(de.read_u8()?)?;
                let num_rows = de.read_u64()?;
                let num_vectors = de.read_u64()?;
                let mut vectors = Vec::new();
                for _ in 0..num_vectors {
                    let vector = Value::deserialize_vector(de)?;
                    if vector.len() as u64 != num_rows {
                        return Err(DatabaseError::Serialization(format!(
                            "Insertion vector has {} values but the record declares {} rows",
                            vector.len(),
                            num_rows
                        )));
                    }
                    vectors.push(vector);
                }
                WalRecord::TableInsertion {
                    table_id,
                    table_type,
                    num_rows,
                    vectors,
                }
            }
            WalRecordType::NodeDeletion => WalRecord::NodeDeletion {
                table_id: de.read_u64()?,
                node_offset: de.read_u64()?,
                pk: Value::deserialize(de)?,
            },
            WalRecordType::NodeUpdate => WalRecord::NodeUpdate {
                table_id: de.read_u64()?,
                column_id: de.read_u32()?,
                node_offset: de.read_u64()?,
                value: Value::deserialize(de)?,
            },
            WalRecordType::RelDeletion => WalRecord::RelDeletion {
                table_id: de.read_u64()?,
                src: read_internal_id(de)?,
                dst: read_internal_id(de)?,
                rel_id: read_internal_id(de)?,
            },
            WalRecordType::RelDetachDelete => WalRecord::RelDetachDelete {
                table_id: de.read_u64()?,
                direction: RelDirection::from_u8(de.read_u8()?)?,
                src: read_internal_id(de)?,
            },
            WalRecordType::RelUpdate => WalRecord::RelUpdate {
                table_id: de.read_u64()?,
                column_id: de.read_u32()?,
                src: read_internal_id(de)?,
                dst: read_internal_id(de)?,
                rel_id: read_internal_id(de)?,
                value: Value::deserialize(de)?,
            },
            WalRecordType::CopyTable => WalRecord::CopyTable {
                table_id: de.read_u64()?,
            },
            WalRecordType::LoadExtension => WalRecord::LoadExtension {
                path: de.read_string()?,
            },
        };
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::entry::{EntryPayload, SequenceData};
    use crate::storage::serializer::{InMemReader, InMemWriter};
    use crate::storage::wal::checksum::{FramedReader, FramedWriter};

    fn write_all(records: &[WalRecord], checksums: bool) -> Vec<u8> {
        let mut ser = Serializer::new(FramedWriter::new(InMemWriter::new(), checksums));
        for record in records {
            record.serialize(&mut ser).unwrap();
        }
        match ser.into_inner() {
            FramedWriter::Plain(inner) => inner.into_inner(),
            FramedWriter::Checksummed(writer) => writer.into_inner().into_inner(),
        }
    }

    #[test]
    fn test_record_type_tags() {
        assert_eq!(WalRecordType::from_u8(14).unwrap(), WalRecordType::CreateCatalogEntry);
        assert_eq!(WalRecordType::from_u8(254).unwrap(), WalRecordType::Checkpoint);
        assert!(WalRecordType::from_u8(15).is_err());
    }

    #[test]
    fn test_records_read_back_in_order() {
        for checksums in [false, true] {
            let records = vec![
                WalRecord::BeginTransaction,
                WalRecord::CreateCatalogEntry {
                    entry: CatalogEntry::new(
                        "seq",
                        EntryPayload::Sequence(SequenceData::new(1, 1, 1, 100, false)),
                    )
                    .with_oid(3),
                    is_internal: false,
                },
                WalRecord::TableInsertion {
                    table_id: 0,
                    table_type: TableType::Node,
                    num_rows: 2,
                    vectors: vec![
                        vec![Value::Int64(1), Value::Int64(2)],
                        vec![Value::String("a".into()), Value::Null],
                    ],
                },
                WalRecord::RelDetachDelete {
                    table_id: 4,
                    direction: RelDirection::Both,
                    src: InternalId::new(0, 1),
                },
                WalRecord::Commit,
            ];
            let bytes = write_all(&records, checksums);
            let mut de = Deserializer::new(FramedReader::new(InMemReader::new(bytes), checksums));
            let mut types = Vec::new();
            while !de.finished() {
                types.push(WalRecord::deserialize(&mut de).unwrap().record_type());
            }
            let expected: Vec<WalRecordType> = records.iter().map(|r| r.record_type()).collect();
            assert_eq!(types, expected);
        }
    }

    #[test]
    fn test_zeroed_bytes_are_invalid() {
        let mut de = Deserializer::new(FramedReader::new(InMemReader::new(vec![0; 8]), false));
        assert!(WalRecord::deserialize(&mut de).is_err());
    }

    #[test]
    fn test_insertion_row_count_checked() {
        let record = WalRecord::TableInsertion {
            table_id: 0,
            table_type: TableType::Node,
            num_rows: 3,
            vectors: vec![vec![Value::Int64(1)]],
        };
        let bytes = write_all(&[record], false);
        let mut de = Deserializer::new(FramedReader::new(InMemReader::new(bytes), false));
        assert!(WalRecord::deserialize(&mut de).is_err());
    }
}
