// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Registry of loaded extensions
//!
//! Loading is recorded in the WAL so that recovery restores the same set of
//! extensions. Loading the same path twice is a no-op.

use log::info;
use parking_lot::RwLock;

use crate::error::{DatabaseError, DatabaseResult};

#[derive(Debug, Default)]
pub struct ExtensionManager {
    loaded: RwLock<Vec<String>>,
}

impl ExtensionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self, path: &str) -> DatabaseResult<()> {
        let path = path.trim();
        if path.is_empty() {
            return Err(DatabaseError::Config(
                "Extension path cannot be empty".to_string(),
            ));
        }
        let mut loaded = self.loaded.write();
        if loaded.iter().any(|p| p == path) {
            return Ok(());
        }
        loaded.push(path.to_string());
        info!("Loaded extension {}", path);
        Ok(())
    }

    pub fn is_loaded(&self, path: &str) -> bool {
        self.loaded.read().iter().any(|p| p == path.trim())
    }

    /// Loaded extension paths in load order
    pub fn loaded_extensions(&self) -> Vec<String> {
        self.loaded.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_is_idempotent() {
        let extensions = ExtensionManager::new();
        extensions.load("json").unwrap();
        extensions.load(" json ").unwrap();
        extensions.load("fts").unwrap();
        assert_eq!(extensions.loaded_extensions(), vec!["json", "fts"]);
        assert!(extensions.is_loaded("fts"));
        assert!(!extensions.is_loaded("algo"));
    }

    #[test]
    fn test_empty_path_rejected() {
        let extensions = ExtensionManager::new();
        assert!(matches!(extensions.load("  "), Err(DatabaseError::Config(_))));
    }
}
