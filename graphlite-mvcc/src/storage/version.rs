// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Callbacks the undo buffer uses to finalize or revert row versions

use crate::error::DatabaseResult;
use crate::txn::timestamp::Timestamp;

/// Operation applied to a range of rows inside one node group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkedGroupOp {
    CommitInsert,
    CommitDelete,
    RollbackDelete,
}

/// Implemented by tables whose rows carry insert/delete versions
pub trait VersionRecordHandler: Send + Sync {
    /// Apply `op` to `num_rows` rows starting at `start_row` of a node group.
    /// `commit_ts` is ignored by rollback operations.
    fn apply_func_to_chunked_groups(
        &self,
        op: ChunkedGroupOp,
        node_group_idx: u64,
        start_row: u64,
        num_rows: u64,
        commit_ts: Timestamp,
    ) -> DatabaseResult<()>;

    fn rollback_insert(&self, node_group_idx: u64, start_row: u64, num_rows: u64) -> DatabaseResult<()>;
}

/// Owner of in-place column updates made by uncommitted transactions
pub trait UpdateInfo: Send + Sync {
    fn commit(&self, vector_idx: u64, update_id: u64, commit_ts: Timestamp) -> DatabaseResult<()>;

    fn rollback(&self, vector_idx: u64, update_id: u64) -> DatabaseResult<()>;
}
