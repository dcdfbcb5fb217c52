// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! ALTER TABLE descriptions and their WAL encoding

use crate::error::{DatabaseError, DatabaseResult};
use crate::storage::serializer::{Deserializer, Reader, Serializer, Writer};
use crate::storage::value::{LogicalType, TableId, Value};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlterType {
    RenameTable = 0,
    AddProperty = 1,
    DropProperty = 2,
    RenameProperty = 3,
    Comment = 4,
    AddFromToConnection = 5,
    DropFromToConnection = 6,
}

impl AlterType {
    fn from_u8(value: u8) -> DatabaseResult<Self> {
        match value {
            0 => Ok(AlterType::RenameTable),
            1 => Ok(AlterType::AddProperty),
            2 => Ok(AlterType::DropProperty),
            3 => Ok(AlterType::RenameProperty),
            4 => Ok(AlterType::Comment),
            5 => Ok(AlterType::AddFromToConnection),
            6 => Ok(AlterType::DropFromToConnection),
            other => Err(DatabaseError::Serialization(format!(
                "Unknown alter type {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlterKind {
    RenameTable {
        new_name: String,
    },
    AddProperty {
        name: String,
        data_type: LogicalType,
        default_value: Value,
    },
    DropProperty {
        name: String,
    },
    RenameProperty {
        old_name: String,
        new_name: String,
    },
    Comment {
        comment: String,
    },
    /// `rel_table_id` is left as `INVALID_OID` by callers and filled in
    /// by the catalog when the connection's table id is allocated
    AddFromToConnection {
        from_table_id: TableId,
        to_table_id: TableId,
        rel_table_id: TableId,
    },
    DropFromToConnection {
        from_table_id: TableId,
        to_table_id: TableId,
    },
}

impl AlterKind {
    pub fn alter_type(&self) -> AlterType {
        match self {
            AlterKind::RenameTable { .. } => AlterType::RenameTable,
            AlterKind::AddProperty { .. } => AlterType::AddProperty,
            AlterKind::DropProperty { .. } => AlterType::DropProperty,
            AlterKind::RenameProperty { .. } => AlterType::RenameProperty,
            AlterKind::Comment { .. } => AlterType::Comment,
            AlterKind::AddFromToConnection { .. } => AlterType::AddFromToConnection,
            AlterKind::DropFromToConnection { .. } => AlterType::DropFromToConnection,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlterInfo {
    pub table_name: String,
    pub kind: AlterKind,
}

impl AlterInfo {
    pub fn new(table_name: impl Into<String>, kind: AlterKind) -> Self {
        Self {
            table_name: table_name.into(),
            kind,
        }
    }

    pub fn alter_type(&self) -> AlterType {
        self.kind.alter_type()
    }

    pub fn serialize<W: Writer>(&self, ser: &mut Serializer<W>) -> DatabaseResult<()> {
        ser.write_u8(self.alter_type() as u8)?;
        ser.write_string(&self.table_name)?;
        match &self.kind {
            AlterKind::RenameTable { new_name } => ser.write_string(new_name),
            AlterKind::AddProperty {
                name,
                data_type,
                default_value,
            } => {
                ser.write_string(name)?;
                ser.write_u8(*data_type as u8)?;
                default_value.serialize(ser)
            }
            AlterKind::DropProperty { name } => ser.write_string(name),
            AlterKind::RenameProperty { old_name, new_name } => {
                ser.write_string(new_name)?;
                ser.write_string(old_name)
            }
            AlterKind::Comment { comment } => ser.write_string(comment),
            AlterKind::AddFromToConnection {
                from_table_id,
                to_table_id,
                rel_table_id,
            } => {
                ser.write_u64(*from_table_id)?;
                ser.write_u64(*to_table_id)?;
                ser.write_u64(*rel_table_id)
            }
            AlterKind::DropFromToConnection {
                from_table_id,
                to_table_id,
            } => {
                ser.write_u64(*from_table_id)?;
                ser.write_u64(*to_table_id)
            }
        }
    }

    pub fn deserialize<R: Reader>(de: &mut Deserializer<R>) -> DatabaseResult<Self> {
        let alter_type = AlterType::from_u8(de.read_u8()?)?;
        let table_name = de.read_string()?;
        let kind = match alter_type {
            AlterType::RenameTable => AlterKind::RenameTable {
                new_name: de.read_string()?,
            },
            AlterType::AddProperty => {
                let name = de.read_string()?;
                let data_type = LogicalType::from_u8(de.read_u8()?)?;
                let default_value = Value::deserialize(de)?;
                AlterKind::AddProperty {
                    name,
                    data_type,
                    default_value,
                }
            }
            AlterType::DropProperty => AlterKind::DropProperty {
                name: de.read_string()?,
            },
            AlterType::RenameProperty => {
                let new_name = de.read_string()?;
                let old_name = de.read_string()?;
                AlterKind::RenameProperty { old_name, new_name }
            }
            AlterType::Comment => AlterKind::Comment {
                comment: de.read_string()?,
            },
            AlterType::AddFromToConnection => AlterKind::AddFromToConnection {
                from_table_id: de.read_u64()?,
                to_table_id: de.read_u64()?,
                rel_table_id: de.read_u64()?,
            },
            AlterType::DropFromToConnection => AlterKind::DropFromToConnection {
                from_table_id: de.read_u64()?,
                to_table_id: de.read_u64()?,
            },
        };
        Ok(Self { table_name, kind })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::serializer::{InMemReader, InMemWriter};

    #[test]
    fn test_rename_property_wire_order() {
        let info = AlterInfo::new(
            "Person",
            AlterKind::RenameProperty {
                old_name: "name".into(),
                new_name: "full_name".into(),
            },
        );
        let mut ser = Serializer::new(InMemWriter::new());
        info.serialize(&mut ser).unwrap();
        let bytes = ser.into_inner().into_inner();
        assert_eq!(bytes[0], AlterType::RenameProperty as u8);

        let mut de = Deserializer::new(InMemReader::new(bytes));
        assert_eq!(AlterInfo::deserialize(&mut de).unwrap(), info);
        assert!(de.finished());
    }

    #[test]
    fn test_unknown_alter_type() {
        let mut de = Deserializer::new(InMemReader::new(vec![99]));
        assert!(AlterInfo::deserialize(&mut de).is_err());
    }
}
