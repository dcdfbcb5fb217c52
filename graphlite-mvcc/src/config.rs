// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Database configuration
//!
//! Every field has a default, so a JSON document only needs to name the
//! settings it overrides.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DatabaseError, DatabaseResult};

/// Default WAL size that triggers an automatic checkpoint (16MB)
pub const DEFAULT_CHECKPOINT_THRESHOLD: u64 = 16 * 1024 * 1024;

/// Default time an explicit checkpoint waits for active transactions
pub const DEFAULT_CHECKPOINT_WAIT_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Frame every WAL record with its size and a CRC32 checksum
    pub enable_checksums: bool,
    /// Open without creating, truncating, removing or syncing any file
    pub read_only: bool,
    /// Treat an unreadable WAL tail as fatal instead of truncating it
    pub throw_on_wal_replay_failure: bool,
    /// Checkpoint automatically once the WAL grows past the threshold
    pub auto_checkpoint: bool,
    /// WAL size in bytes that triggers an automatic checkpoint
    pub checkpoint_threshold: u64,
    /// Allow more than one write transaction at a time
    pub enable_multi_writes: bool,
    /// How long an explicit checkpoint waits for active transactions
    pub checkpoint_wait_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            enable_checksums: true,
            read_only: false,
            throw_on_wal_replay_failure: true,
            auto_checkpoint: true,
            checkpoint_threshold: DEFAULT_CHECKPOINT_THRESHOLD,
            enable_multi_writes: false,
            checkpoint_wait_timeout_ms: DEFAULT_CHECKPOINT_WAIT_TIMEOUT_MS,
        }
    }
}

impl DatabaseConfig {
    pub fn from_json_str(json: &str) -> DatabaseResult<Self> {
        let config: DatabaseConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> DatabaseResult<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            DatabaseError::Config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_json_str(&content)
    }

    pub fn validate(&self) -> DatabaseResult<()> {
        if self.auto_checkpoint && self.checkpoint_threshold == 0 {
            return Err(DatabaseError::Config(
                "checkpoint_threshold must be greater than zero when auto_checkpoint is enabled"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DatabaseConfig::default();
        assert!(config.enable_checksums);
        assert!(!config.read_only);
        assert!(config.throw_on_wal_replay_failure);
        assert_eq!(config.checkpoint_threshold, DEFAULT_CHECKPOINT_THRESHOLD);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config =
            DatabaseConfig::from_json_str(r#"{"enable_checksums": false, "read_only": true}"#)
                .unwrap();
        assert!(!config.enable_checksums);
        assert!(config.read_only);
        assert!(config.auto_checkpoint);
        assert_eq!(
            config.checkpoint_wait_timeout_ms,
            DEFAULT_CHECKPOINT_WAIT_TIMEOUT_MS
        );
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let result = DatabaseConfig::from_json_str(r#"{"checkpoint_threshold": 0}"#);
        assert!(matches!(result, Err(DatabaseError::Config(_))));
    }

    #[test]
    fn test_config_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"enable_multi_writes": true}"#).unwrap();
        let config = DatabaseConfig::from_json_file(&path).unwrap();
        assert!(config.enable_multi_writes);
    }
}
