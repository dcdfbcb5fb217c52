// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Write-ahead logging: record types, checksum framing, the per-transaction
//! buffer, the shared log file and crash recovery

pub mod checksum;
pub mod local_wal;
pub mod record;
pub mod replayer;
#[allow(clippy::module_inception)]
pub mod wal;

pub use checksum::{ChecksumReader, ChecksumWriter, FramedReader, FramedWriter};
pub use local_wal::LocalWal;
pub use record::{WalRecord, WalRecordType};
pub use replayer::WalReplayer;
pub use wal::{Wal, WalHeader};
