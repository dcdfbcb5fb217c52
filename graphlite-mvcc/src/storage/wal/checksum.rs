// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Checksum framing for serialized objects
//!
//! Frame layout: `[payload size u64][crc32 as u64][payload]`. Bytes written
//! between `on_object_begin` and `on_object_end` are buffered and emitted as
//! one frame; bytes written outside an object go straight to the inner
//! writer.

use crate::error::{DatabaseError, DatabaseResult};
use crate::storage::serializer::{Reader, Writer};

pub const CHECKSUM_MISMATCH_MESSAGE: &str =
    "Checksum verification failed, the WAL file is corrupted.";

/// Size of the `[size][checksum]` prefix of every frame
pub const FRAME_HEADER_SIZE: u64 = 16;

pub fn compute_checksum(data: &[u8]) -> u64 {
    crc32fast::hash(data) as u64
}

#[derive(Debug)]
pub struct ChecksumWriter<W: Writer> {
    inner: W,
    entry: Option<Vec<u8>>,
}

impl<W: Writer> ChecksumWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, entry: None }
    }

    pub fn inner(&self) -> &W {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Writer> Writer for ChecksumWriter<W> {
    fn write(&mut self, data: &[u8]) -> DatabaseResult<()> {
        match self.entry.as_mut() {
            Some(buffer) => {
                buffer.extend_from_slice(data);
                Ok(())
            }
            None => self.inner.write(data),
        }
    }

    fn on_object_begin(&mut self) {
        if self.entry.is_none() {
            self.entry = Some(Vec::new());
        }
    }

    fn on_object_end(&mut self) -> DatabaseResult<()> {
        let payload = self.entry.take().ok_or_else(|| {
            DatabaseError::InternalInvariantViolation(
                "on_object_end called without a matching on_object_begin".to_string(),
            )
        })?;
        self.inner.write(&(payload.len() as u64).to_le_bytes())?;
        self.inner.write(&compute_checksum(&payload).to_le_bytes())?;
        self.inner.write(&payload)
    }

    fn flush(&mut self) -> DatabaseResult<()> {
        self.inner.flush()
    }

    fn sync(&mut self) -> DatabaseResult<()> {
        self.inner.sync()
    }
}

#[derive(Debug)]
struct FrameBuffer {
    payload: Vec<u8>,
    position: usize,
}

#[derive(Debug)]
pub struct ChecksumReader<R: Reader> {
    inner: R,
    entry: Option<FrameBuffer>,
    mismatch_message: &'static str,
}

impl<R: Reader> ChecksumReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_message(inner, CHECKSUM_MISMATCH_MESSAGE)
    }

    pub fn with_message(inner: R, mismatch_message: &'static str) -> Self {
        Self {
            inner,
            entry: None,
            mismatch_message,
        }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    fn read_inner_u64(&mut self) -> DatabaseResult<u64> {
        let mut buf = [0u8; 8];
        self.inner.read(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }
}

impl<R: Reader> Reader for ChecksumReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> DatabaseResult<()> {
        match self.entry.as_mut() {
            Some(frame) => {
                let end = frame.position + buf.len();
                if end > frame.payload.len() {
                    return Err(DatabaseError::Corruption(format!(
                        "Read of {} bytes overruns a {} byte checksummed record",
                        buf.len(),
                        frame.payload.len()
                    )));
                }
                buf.copy_from_slice(&frame.payload[frame.position..end]);
                frame.position = end;
                Ok(())
            }
            None => self.inner.read(buf),
        }
    }

    fn finished(&self) -> bool {
        let frame_consumed = self
            .entry
            .as_ref()
            .map_or(true, |frame| frame.position >= frame.payload.len());
        frame_consumed && self.inner.finished()
    }

    fn read_offset(&self) -> u64 {
        self.inner.read_offset()
    }

    fn remaining(&self) -> Option<u64> {
        match self.entry.as_ref() {
            Some(frame) => Some((frame.payload.len() - frame.position) as u64),
            None => self.inner.remaining(),
        }
    }

    fn on_object_begin(&mut self) -> DatabaseResult<()> {
        let size = self.read_inner_u64()?;
        let expected = self.read_inner_u64()?;
        if let Some(remaining) = self.inner.remaining() {
            if size > remaining {
                return Err(DatabaseError::Io(format!(
                    "Checksummed record of {} bytes is truncated, {} bytes remain",
                    size, remaining
                )));
            }
        }
        let mut payload = vec![0u8; size as usize];
        self.inner.read(&mut payload)?;
        if compute_checksum(&payload) != expected {
            return Err(DatabaseError::Corruption(self.mismatch_message.to_string()));
        }
        self.entry = Some(FrameBuffer {
            payload,
            position: 0,
        });
        Ok(())
    }

    fn on_object_end(&mut self) -> DatabaseResult<()> {
        match self.entry.take() {
            Some(frame) if frame.position == frame.payload.len() => Ok(()),
            Some(frame) => Err(DatabaseError::Corruption(format!(
                "Checksummed record has {} unread bytes",
                frame.payload.len() - frame.position
            ))),
            None => Err(DatabaseError::InternalInvariantViolation(
                "on_object_end called without a matching on_object_begin".to_string(),
            )),
        }
    }
}

/// Writer that frames objects only when checksums are enabled
#[derive(Debug)]
pub enum FramedWriter<W: Writer> {
    Plain(W),
    Checksummed(ChecksumWriter<W>),
}

impl<W: Writer> FramedWriter<W> {
    pub fn new(inner: W, enable_checksums: bool) -> Self {
        if enable_checksums {
            FramedWriter::Checksummed(ChecksumWriter::new(inner))
        } else {
            FramedWriter::Plain(inner)
        }
    }

    pub fn inner(&self) -> &W {
        match self {
            FramedWriter::Plain(inner) => inner,
            FramedWriter::Checksummed(writer) => writer.inner(),
        }
    }

    pub fn inner_mut(&mut self) -> &mut W {
        match self {
            FramedWriter::Plain(inner) => inner,
            FramedWriter::Checksummed(writer) => writer.inner_mut(),
        }
    }
}

impl<W: Writer> Writer for FramedWriter<W> {
    fn write(&mut self, data: &[u8]) -> DatabaseResult<()> {
        match self {
            FramedWriter::Plain(inner) => inner.write(data),
            FramedWriter::Checksummed(writer) => writer.write(data),
        }
    }

    fn on_object_begin(&mut self) {
        if let FramedWriter::Checksummed(writer) = self {
            writer.on_object_begin();
        }
    }

    fn on_object_end(&mut self) -> DatabaseResult<()> {
        match self {
            FramedWriter::Plain(_) => Ok(()),
            FramedWriter::Checksummed(writer) => writer.on_object_end(),
        }
    }

    fn flush(&mut self) -> DatabaseResult<()> {
        match self {
            FramedWriter::Plain(inner) => inner.flush(),
            FramedWriter::Checksummed(writer) => writer.flush(),
        }
    }

    fn sync(&mut self) -> DatabaseResult<()> {
        match self {
            FramedWriter::Plain(inner) => inner.sync(),
            FramedWriter::Checksummed(writer) => writer.sync(),
        }
    }
}

/// Reader counterpart of [`FramedWriter`]
#[derive(Debug)]
pub enum FramedReader<R: Reader> {
    Plain(R),
    Checksummed(ChecksumReader<R>),
}

impl<R: Reader> FramedReader<R> {
    pub fn new(inner: R, enable_checksums: bool) -> Self {
        if enable_checksums {
            FramedReader::Checksummed(ChecksumReader::new(inner))
        } else {
            FramedReader::Plain(inner)
        }
    }
}

impl<R: Reader> Reader for FramedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> DatabaseResult<()> {
        match self {
            FramedReader::Plain(inner) => inner.read(buf),
            FramedReader::Checksummed(reader) => reader.read(buf),
        }
    }

    fn finished(&self) -> bool {
        match self {
            FramedReader::Plain(inner) => inner.finished(),
            FramedReader::Checksummed(reader) => reader.finished(),
        }
    }

    fn read_offset(&self) -> u64 {
        match self {
            FramedReader::Plain(inner) => inner.read_offset(),
            FramedReader::Checksummed(reader) => reader.read_offset(),
        }
    }

    fn remaining(&self) -> Option<u64> {
        match self {
            FramedReader::Plain(inner) => inner.remaining(),
            FramedReader::Checksummed(reader) => reader.remaining(),
        }
    }

    fn on_object_begin(&mut self) -> DatabaseResult<()> {
        match self {
            FramedReader::Plain(_) => Ok(()),
            FramedReader::Checksummed(reader) => reader.on_object_begin(),
        }
    }

    fn on_object_end(&mut self) -> DatabaseResult<()> {
        match self {
            FramedReader::Plain(_) => Ok(()),
            FramedReader::Checksummed(reader) => reader.on_object_end(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::serializer::{Deserializer, InMemReader, InMemWriter, Serializer};

    fn frame(payloads: &[&[u8]]) -> Vec<u8> {
        let mut ser = Serializer::new(ChecksumWriter::new(InMemWriter::new()));
        for payload in payloads {
            ser.on_object_begin();
            ser.write_raw(payload).unwrap();
            ser.on_object_end().unwrap();
        }
        ser.into_inner().into_inner().into_inner()
    }

    #[test]
    fn test_frame_layout() {
        let bytes = frame(&[b"hello"]);
        assert_eq!(bytes.len(), FRAME_HEADER_SIZE as usize + 5);
        assert_eq!(&bytes[..8], &5u64.to_le_bytes());
        assert_eq!(&bytes[8..16], &compute_checksum(b"hello").to_le_bytes());
        assert_eq!(&bytes[16..], b"hello");
    }

    #[test]
    fn test_frame_round_trip() {
        let payloads: Vec<Vec<u8>> = (0..20)
            .map(|i| (0..i * 7).map(|b| (b % 251) as u8).collect())
            .collect();
        let refs: Vec<&[u8]> = payloads.iter().map(|p| p.as_slice()).collect();
        let bytes = frame(&refs);

        let mut de = Deserializer::new(ChecksumReader::new(InMemReader::new(bytes)));
        for payload in &payloads {
            de.on_object_begin().unwrap();
            let mut buf = vec![0u8; payload.len()];
            de.read_raw(&mut buf).unwrap();
            de.on_object_end().unwrap();
            assert_eq!(&buf, payload);
        }
        assert!(de.finished());
    }

    #[test]
    fn test_flipped_byte_detected() {
        let payload: Vec<u8> = (0..64).collect();
        let clean = frame(&[&payload]);
        for _ in 0..16 {
            let mut bytes = clean.clone();
            let idx = FRAME_HEADER_SIZE as usize + fastrand::usize(..payload.len());
            bytes[idx] ^= 1 << fastrand::u8(..8);
            let mut reader = ChecksumReader::new(InMemReader::new(bytes));
            match reader.on_object_begin() {
                Err(DatabaseError::Corruption(msg)) => {
                    assert!(msg.contains("Checksum verification failed"))
                }
                other => panic!("expected corruption, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_truncated_frame_fails() {
        let bytes = frame(&[b"0123456789"]);
        let torn = bytes[..bytes.len() - 3].to_vec();
        let mut reader = ChecksumReader::new(InMemReader::new(torn));
        assert!(reader.on_object_begin().is_err());
    }

    #[test]
    fn test_unframed_writes_pass_through() {
        let mut writer = ChecksumWriter::new(InMemWriter::new());
        writer.write(b"raw").unwrap();
        assert_eq!(writer.inner().data(), b"raw");
    }

    #[test]
    fn test_plain_framing_is_transparent() {
        let mut ser = Serializer::new(FramedWriter::new(InMemWriter::new(), false));
        ser.on_object_begin();
        ser.write_u64(42).unwrap();
        ser.on_object_end().unwrap();
        assert_eq!(ser.writer().inner().size(), 8);
    }
}
