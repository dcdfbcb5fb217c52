// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Test utilities for GraphLite MVCC integration tests
//!
//! - TestFixture: a database directory that can be opened, closed and
//!   reopened to exercise recovery

pub mod test_fixture;
