// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Property values stored in tables and carried by WAL records

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DatabaseError, DatabaseResult};
use crate::storage::serializer::{Deserializer, Reader, Serializer, Writer};

pub type TableId = u64;
pub type ColumnId = u32;

/// Identity of a row: the table it lives in and its offset within it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InternalId {
    pub table_id: TableId,
    pub offset: u64,
}

impl InternalId {
    pub fn new(table_id: TableId, offset: u64) -> Self {
        Self { table_id, offset }
    }
}

impl fmt::Display for InternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table_id, self.offset)
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicalType {
    Bool = 1,
    Int64 = 2,
    Double = 3,
    String = 4,
    InternalId = 5,
    /// Int64 filled from an implicit sequence
    Serial = 6,
}

impl LogicalType {
    pub fn from_u8(value: u8) -> DatabaseResult<Self> {
        match value {
            1 => Ok(LogicalType::Bool),
            2 => Ok(LogicalType::Int64),
            3 => Ok(LogicalType::Double),
            4 => Ok(LogicalType::String),
            5 => Ok(LogicalType::InternalId),
            6 => Ok(LogicalType::Serial),
            other => Err(DatabaseError::Serialization(format!(
                "Unknown logical type tag {}",
                other
            ))),
        }
    }

    /// Whether `value` can be stored in a column of this type
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (_, Value::Null)
                | (LogicalType::Bool, Value::Bool(_))
                | (LogicalType::Int64, Value::Int64(_))
                | (LogicalType::Serial, Value::Int64(_))
                | (LogicalType::Double, Value::Double(_))
                | (LogicalType::String, Value::String(_))
                | (LogicalType::InternalId, Value::InternalId(_))
        )
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogicalType::Bool => "BOOL",
            LogicalType::Int64 => "INT64",
            LogicalType::Double => "DOUBLE",
            LogicalType::String => "STRING",
            LogicalType::InternalId => "INTERNAL_ID",
            LogicalType::Serial => "SERIAL",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int64(i64),
    Double(f64),
    String(String),
    InternalId(InternalId),
}

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT64: u8 = 2;
const TAG_DOUBLE: u8 = 3;
const TAG_STRING: u8 = 4;
const TAG_INTERNAL_ID: u8 = 5;

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_internal_id(&self) -> Option<InternalId> {
        match self {
            Value::InternalId(id) => Some(*id),
            _ => None,
        }
    }

    pub fn serialize<W: Writer>(&self, ser: &mut Serializer<W>) -> DatabaseResult<()> {
        match self {
            Value::Null => ser.write_u8(TAG_NULL),
            Value::Bool(v) => {
                ser.write_u8(TAG_BOOL)?;
                ser.write_bool(*v)
            }
            Value::Int64(v) => {
                ser.write_u8(TAG_INT64)?;
                ser.write_i64(*v)
            }
            Value::Double(v) => {
                ser.write_u8(TAG_DOUBLE)?;
                ser.write_f64(*v)
            }
            Value::String(v) => {
                ser.write_u8(TAG_STRING)?;
                ser.write_string(v)
            }
            Value::InternalId(id) => {
                ser.write_u8(TAG_INTERNAL_ID)?;
                ser.write_u64(id.table_id)?;
                ser.write_u64(id.offset)
            }
        }
    }

    pub fn deserialize<R: Reader>(de: &mut Deserializer<R>) -> DatabaseResult<Self> {
        match de.read_u8()? {
            TAG_NULL => Ok(Value::Null),
            TAG_BOOL => Ok(Value::Bool(de.read_bool()?)),
            TAG_INT64 => Ok(Value::Int64(de.read_i64()?)),
            TAG_DOUBLE => Ok(Value::Double(de.read_f64()?)),
            TAG_STRING => Ok(Value::String(de.read_string()?)),
            TAG_INTERNAL_ID => {
                let table_id = de.read_u64()?;
                let offset = de.read_u64()?;
                Ok(Value::InternalId(InternalId::new(table_id, offset)))
            }
            other => Err(DatabaseError::Serialization(format!(
                "Unknown value tag {}",
                other
            ))),
        }
    }

    pub fn serialize_vector<W: Writer>(
        values: &[Value],
        ser: &mut Serializer<W>,
    ) -> DatabaseResult<()> {
        ser.write_u64(values.len() as u64)?;
        for value in values {
            value.serialize(ser)?;
        }
        Ok(())
    }

    pub fn deserialize_vector<R: Reader>(de: &mut Deserializer<R>) -> DatabaseResult<Vec<Value>> {
        let len = de.read_u64()?;
        // Every value takes at least its tag byte.
        if let Some(remaining) = de.reader().remaining() {
            if len > remaining {
                return Err(DatabaseError::Serialization(format!(
                    "Vector length {} exceeds the remaining input",
                    len
                )));
            }
        }
        (0..len).map(|_| Value::deserialize(de)).collect()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{}", v),
            Value::InternalId(id) => write!(f, "{}", id),
        }
    }
}

/// Hashable form of a primary key value
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PkKey {
    Bool(bool),
    Int64(i64),
    String(String),
    InternalId(InternalId),
}

impl PkKey {
    pub fn from_value(value: &Value) -> DatabaseResult<Self> {
        match value {
            Value::Bool(v) => Ok(PkKey::Bool(*v)),
            Value::Int64(v) => Ok(PkKey::Int64(*v)),
            Value::String(v) => Ok(PkKey::String(v.clone())),
            Value::InternalId(id) => Ok(PkKey::InternalId(*id)),
            Value::Null => Err(DatabaseError::Catalog(
                "Found NULL, which violates the non-null constraint of the primary key column."
                    .to_string(),
            )),
            Value::Double(_) => Err(DatabaseError::Catalog(
                "DOUBLE values cannot be used as primary keys.".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::serializer::{InMemReader, InMemWriter};

    #[test]
    fn test_value_vector_round_trip() {
        let values = vec![
            Value::Null,
            Value::Bool(true),
            Value::Int64(-12),
            Value::Double(2.5),
            Value::String("Alice".to_string()),
            Value::InternalId(InternalId::new(3, 9)),
        ];
        let mut ser = Serializer::new(InMemWriter::new());
        Value::serialize_vector(&values, &mut ser).unwrap();
        let mut de = Deserializer::new(InMemReader::new(ser.into_inner().into_inner()));
        assert_eq!(Value::deserialize_vector(&mut de).unwrap(), values);
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let mut de = Deserializer::new(InMemReader::new(vec![42]));
        assert!(Value::deserialize(&mut de).is_err());
    }

    #[test]
    fn test_type_accepts() {
        assert!(LogicalType::Serial.accepts(&Value::Int64(1)));
        assert!(LogicalType::String.accepts(&Value::Null));
        assert!(!LogicalType::Int64.accepts(&Value::String("x".into())));
    }

    #[test]
    fn test_pk_key_rejects_null() {
        assert!(PkKey::from_value(&Value::Null).is_err());
        assert_eq!(PkKey::from_value(&Value::Int64(4)).unwrap(), PkKey::Int64(4));
    }
}
