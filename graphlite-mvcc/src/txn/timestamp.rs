// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Logical clocks for MVCC visibility
//!
//! Commit timestamps and transaction ids share one `u64` space. Ids of
//! in-flight transactions occupy the upper half, starting at
//! [`START_TRANSACTION_ID`], so an uncommitted version is always "newer"
//! than every snapshot. Committing a version replaces its transaction id
//! with a commit timestamp from the lower half.

pub type Timestamp = u64;
pub type TransactionId = u64;

/// First id handed to a real transaction
pub const START_TRANSACTION_ID: TransactionId = 1 << 63;

/// Marks a version that no snapshot may ever see
pub const INVALID_TRANSACTION: Timestamp = u64::MAX;

/// First value of the commit clock
pub const INITIAL_TIMESTAMP: Timestamp = 1;

/// Id and start timestamp shared by the bootstrap and checkpoint transactions
pub const INTERNAL_TRANSACTION_ID: TransactionId = 0;
pub const BOOTSTRAP_START_TIMESTAMP: Timestamp = 0;
pub const CHECKPOINT_START_TIMESTAMP: Timestamp = START_TRANSACTION_ID - 1;

/// True when `ts` is the id of a transaction that has not committed
pub fn is_transaction_id(ts: Timestamp) -> bool {
    ts >= START_TRANSACTION_ID && ts != INVALID_TRANSACTION
}

/// True when `ts` is a commit timestamp
pub fn is_commit_timestamp(ts: Timestamp) -> bool {
    ts < START_TRANSACTION_ID
}

/// A version stamped `ts` is visible to a snapshot when it was written by
/// the snapshot's own transaction or committed before the snapshot began.
pub fn is_visible(ts: Timestamp, txn_id: TransactionId, start_ts: Timestamp) -> bool {
    ts == txn_id || ts <= start_ts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_ranges() {
        assert!(is_commit_timestamp(INITIAL_TIMESTAMP));
        assert!(is_commit_timestamp(CHECKPOINT_START_TIMESTAMP));
        assert!(is_transaction_id(START_TRANSACTION_ID));
        assert!(!is_transaction_id(INVALID_TRANSACTION));
        assert!(!is_commit_timestamp(INVALID_TRANSACTION));
    }

    #[test]
    fn test_visibility() {
        let own = START_TRANSACTION_ID + 3;
        assert!(is_visible(own, own, 10));
        assert!(is_visible(10, own, 10));
        assert!(!is_visible(11, own, 10));
        assert!(!is_visible(START_TRANSACTION_ID + 4, own, 10));
        assert!(!is_visible(INVALID_TRANSACTION, own, 10));
    }
}
