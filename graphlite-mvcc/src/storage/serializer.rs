// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Little-endian binary serialization over pluggable readers and writers
//!
//! Writers and readers see "object" boundaries through `on_object_begin` and
//! `on_object_end`. Plain writers ignore them; the checksum layer uses them
//! to frame each object as one verifiable unit.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};

use uuid::Uuid;

use crate::error::{DatabaseError, DatabaseResult};

pub trait Writer {
    fn write(&mut self, data: &[u8]) -> DatabaseResult<()>;

    fn on_object_begin(&mut self) {}

    fn on_object_end(&mut self) -> DatabaseResult<()> {
        Ok(())
    }

    fn flush(&mut self) -> DatabaseResult<()> {
        Ok(())
    }

    /// Flush and make the written bytes durable
    fn sync(&mut self) -> DatabaseResult<()> {
        self.flush()
    }
}

pub trait Reader {
    /// Fill `buf` completely or fail
    fn read(&mut self, buf: &mut [u8]) -> DatabaseResult<()>;

    fn finished(&self) -> bool;

    /// Offset in the underlying byte stream
    fn read_offset(&self) -> u64;

    /// Bytes left in the underlying stream, if known
    fn remaining(&self) -> Option<u64> {
        None
    }

    fn on_object_begin(&mut self) -> DatabaseResult<()> {
        Ok(())
    }

    fn on_object_end(&mut self) -> DatabaseResult<()> {
        Ok(())
    }
}

fn unexpected_eof(wanted: usize, offset: u64) -> DatabaseError {
    DatabaseError::Io(format!(
        "Unexpected end of input: needed {} bytes at offset {}",
        wanted, offset
    ))
}

/// Growable in-memory buffer
#[derive(Debug, Default)]
pub struct InMemWriter {
    buffer: Vec<u8>,
}

impl InMemWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data(&self) -> &[u8] {
        &self.buffer
    }

    pub fn size(&self) -> u64 {
        self.buffer.len() as u64
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buffer
    }
}

impl Writer for InMemWriter {
    fn write(&mut self, data: &[u8]) -> DatabaseResult<()> {
        self.buffer.extend_from_slice(data);
        Ok(())
    }
}

/// Buffered appender over an open file
#[derive(Debug)]
pub struct FileWriter {
    writer: BufWriter<File>,
    offset: u64,
}

impl FileWriter {
    /// Position the writer at the end of `file`
    pub fn append(mut file: File) -> DatabaseResult<Self> {
        let offset = file.seek(SeekFrom::End(0))?;
        Ok(Self {
            writer: BufWriter::new(file),
            offset,
        })
    }

    /// Position the writer at `offset` within `file`
    pub fn at_offset(mut file: File, offset: u64) -> DatabaseResult<Self> {
        file.seek(SeekFrom::Start(offset))?;
        Ok(Self {
            writer: BufWriter::new(file),
            offset,
        })
    }

    /// Offset one past the last byte written
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl Writer for FileWriter {
    fn write(&mut self, data: &[u8]) -> DatabaseResult<()> {
        self.writer.write_all(data)?;
        self.offset += data.len() as u64;
        Ok(())
    }

    fn flush(&mut self) -> DatabaseResult<()> {
        self.writer.flush()?;
        Ok(())
    }

    fn sync(&mut self) -> DatabaseResult<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }
}

/// Reader over an owned byte buffer
#[derive(Debug, Default)]
pub struct InMemReader {
    data: Vec<u8>,
    offset: usize,
}

impl InMemReader {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, offset: 0 }
    }
}

impl Reader for InMemReader {
    fn read(&mut self, buf: &mut [u8]) -> DatabaseResult<()> {
        let end = self.offset + buf.len();
        if end > self.data.len() {
            return Err(unexpected_eof(buf.len(), self.offset as u64));
        }
        buf.copy_from_slice(&self.data[self.offset..end]);
        self.offset = end;
        Ok(())
    }

    fn finished(&self) -> bool {
        self.offset >= self.data.len()
    }

    fn read_offset(&self) -> u64 {
        self.offset as u64
    }

    fn remaining(&self) -> Option<u64> {
        Some((self.data.len() - self.offset) as u64)
    }
}

/// Buffered reader over a file of known size
#[derive(Debug)]
pub struct FileReader {
    reader: BufReader<File>,
    offset: u64,
    file_size: u64,
}

impl FileReader {
    pub fn new(mut file: File) -> DatabaseResult<Self> {
        let file_size = file.metadata()?.len();
        file.seek(SeekFrom::Start(0))?;
        Ok(Self {
            reader: BufReader::new(file),
            offset: 0,
            file_size,
        })
    }
}

impl Reader for FileReader {
    fn read(&mut self, buf: &mut [u8]) -> DatabaseResult<()> {
        if self.offset + buf.len() as u64 > self.file_size {
            return Err(unexpected_eof(buf.len(), self.offset));
        }
        self.reader.read_exact(buf)?;
        self.offset += buf.len() as u64;
        Ok(())
    }

    fn finished(&self) -> bool {
        self.offset >= self.file_size
    }

    fn read_offset(&self) -> u64 {
        self.offset
    }

    fn remaining(&self) -> Option<u64> {
        Some(self.file_size.saturating_sub(self.offset))
    }
}

#[derive(Debug)]
pub struct Serializer<W: Writer> {
    writer: W,
}

impl<W: Writer> Serializer<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    pub fn writer_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    pub fn on_object_begin(&mut self) {
        self.writer.on_object_begin();
    }

    pub fn on_object_end(&mut self) -> DatabaseResult<()> {
        self.writer.on_object_end()
    }

    pub fn write_u8(&mut self, value: u8) -> DatabaseResult<()> {
        self.writer.write(&[value])
    }

    pub fn write_bool(&mut self, value: bool) -> DatabaseResult<()> {
        self.write_u8(value as u8)
    }

    pub fn write_u32(&mut self, value: u32) -> DatabaseResult<()> {
        self.writer.write(&value.to_le_bytes())
    }

    pub fn write_u64(&mut self, value: u64) -> DatabaseResult<()> {
        self.writer.write(&value.to_le_bytes())
    }

    pub fn write_i64(&mut self, value: i64) -> DatabaseResult<()> {
        self.writer.write(&value.to_le_bytes())
    }

    pub fn write_f64(&mut self, value: f64) -> DatabaseResult<()> {
        self.writer.write(&value.to_le_bytes())
    }

    /// Length-prefixed byte string
    pub fn write_bytes(&mut self, value: &[u8]) -> DatabaseResult<()> {
        self.write_u64(value.len() as u64)?;
        self.writer.write(value)
    }

    pub fn write_string(&mut self, value: &str) -> DatabaseResult<()> {
        self.write_bytes(value.as_bytes())
    }

    pub fn write_uuid(&mut self, value: &Uuid) -> DatabaseResult<()> {
        self.writer.write(value.as_bytes())
    }

    pub fn write_raw(&mut self, data: &[u8]) -> DatabaseResult<()> {
        self.writer.write(data)
    }
}

#[derive(Debug)]
pub struct Deserializer<R: Reader> {
    reader: R,
}

impl<R: Reader> Deserializer<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    pub fn reader_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    pub fn finished(&self) -> bool {
        self.reader.finished()
    }

    pub fn read_offset(&self) -> u64 {
        self.reader.read_offset()
    }

    pub fn on_object_begin(&mut self) -> DatabaseResult<()> {
        self.reader.on_object_begin()
    }

    pub fn on_object_end(&mut self) -> DatabaseResult<()> {
        self.reader.on_object_end()
    }

    fn read_array<const N: usize>(&mut self) -> DatabaseResult<[u8; N]> {
        let mut buf = [0u8; N];
        self.reader.read(&mut buf)?;
        Ok(buf)
    }

    pub fn read_u8(&mut self) -> DatabaseResult<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    /// Any non-zero byte reads as `true`
    pub fn read_bool(&mut self) -> DatabaseResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u32(&mut self) -> DatabaseResult<u32> {
        Ok(u32::from_le_bytes(self.read_array::<4>()?))
    }

    pub fn read_u64(&mut self) -> DatabaseResult<u64> {
        Ok(u64::from_le_bytes(self.read_array::<8>()?))
    }

    pub fn read_i64(&mut self) -> DatabaseResult<i64> {
        Ok(i64::from_le_bytes(self.read_array::<8>()?))
    }

    pub fn read_f64(&mut self) -> DatabaseResult<f64> {
        Ok(f64::from_le_bytes(self.read_array::<8>()?))
    }

    pub fn read_bytes(&mut self) -> DatabaseResult<Vec<u8>> {
        let len = self.read_u64()?;
        if let Some(remaining) = self.reader.remaining() {
            if len > remaining {
                return Err(DatabaseError::Serialization(format!(
                    "Length prefix {} exceeds the {} bytes left in the input",
                    len, remaining
                )));
            }
        }
        let mut buf = vec![0u8; len as usize];
        self.reader.read(&mut buf)?;
        Ok(buf)
    }

    pub fn read_string(&mut self) -> DatabaseResult<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes)
            .map_err(|e| DatabaseError::Serialization(format!("Invalid UTF-8 string: {}", e)))
    }

    pub fn read_uuid(&mut self) -> DatabaseResult<Uuid> {
        Ok(Uuid::from_bytes(self.read_array::<16>()?))
    }

    pub fn read_raw(&mut self, buf: &mut [u8]) -> DatabaseResult<()> {
        self.reader.read(buf)
    }
}
