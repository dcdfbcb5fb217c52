// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Page 0 of the data file

use std::fs::File;
use std::io::Read;
use std::path::Path;

use uuid::Uuid;

use crate::error::{DatabaseError, DatabaseResult};
use crate::storage::PAGE_SIZE;

pub const MAGIC: &[u8; 4] = b"GLMV";
pub const STORAGE_VERSION: u32 = 1;

/// Identity of a database and the location of its checkpoint image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseHeader {
    pub database_id: Uuid,
    /// Length in bytes of the checkpoint image
    pub image_size: u64,
    /// Pages following the header that hold the image
    pub image_pages: u64,
    pub image_checksum: u32,
}

impl DatabaseHeader {
    pub fn new(database_id: Uuid) -> Self {
        Self {
            database_id,
            image_size: 0,
            image_pages: 0,
            image_checksum: 0,
        }
    }

    pub fn to_page(&self) -> Vec<u8> {
        let mut page = Vec::with_capacity(PAGE_SIZE);
        page.extend_from_slice(MAGIC);
        page.extend_from_slice(&STORAGE_VERSION.to_le_bytes());
        page.extend_from_slice(self.database_id.as_bytes());
        page.extend_from_slice(&self.image_size.to_le_bytes());
        page.extend_from_slice(&self.image_pages.to_le_bytes());
        page.extend_from_slice(&self.image_checksum.to_le_bytes());
        page.resize(PAGE_SIZE, 0);
        page
    }

    pub fn from_page(page: &[u8]) -> DatabaseResult<Self> {
        if page.len() < 44 || &page[0..4] != MAGIC {
            return Err(DatabaseError::Corruption(
                "Data file does not start with a valid database header".to_string(),
            ));
        }
        let version = u32::from_le_bytes(le_bytes(&page[4..8]));
        if version != STORAGE_VERSION {
            return Err(DatabaseError::SchemaVersion(format!(
                "Data file has storage version {} but this build reads version {}.",
                version, STORAGE_VERSION
            )));
        }
        let database_id = Uuid::from_bytes(le_bytes(&page[8..24]));
        Ok(Self {
            database_id,
            image_size: u64::from_le_bytes(le_bytes(&page[24..32])),
            image_pages: u64::from_le_bytes(le_bytes(&page[32..40])),
            image_checksum: u32::from_le_bytes(le_bytes(&page[40..44])),
        })
    }

    /// Header of the data file at `path`, or `None` if the file is missing or empty
    pub fn read_from_file(path: &Path) -> DatabaseResult<Option<Self>> {
        if !path.exists() || std::fs::metadata(path)?.len() == 0 {
            return Ok(None);
        }
        let mut page = vec![0u8; PAGE_SIZE];
        let mut file = File::open(path)?;
        file.read_exact(&mut page)?;
        Self::from_page(&page).map(Some)
    }
}

fn le_bytes<const N: usize>(slice: &[u8]) -> [u8; N] {
    let mut bytes = [0u8; N];
    bytes.copy_from_slice(slice);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_page() {
        let header = DatabaseHeader {
            database_id: Uuid::new_v4(),
            image_size: 5000,
            image_pages: 2,
            image_checksum: 77,
        };
        let page = header.to_page();
        assert_eq!(page.len(), PAGE_SIZE);
        assert_eq!(DatabaseHeader::from_page(&page).unwrap(), header);
    }

    #[test]
    fn test_bad_magic() {
        let mut page = DatabaseHeader::new(Uuid::new_v4()).to_page();
        page[0] = b'X';
        assert!(matches!(
            DatabaseHeader::from_page(&page),
            Err(DatabaseError::Corruption(_))
        ));
    }
}
