// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use async_trait::async_trait;

use shardsync_types::partitioning::PartitionPredicate;
use shardsync_types::time::MicrosSinceEpoch;

use crate::{Row, SourceError};

/// Fully qualified source table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceTable {
    pub dataset: String,
    pub table: String,
}

impl SourceTable {
    pub fn new(dataset: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            table: table.into(),
        }
    }
}

/// Restriction of the timestamp column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    /// `ts > after`, used by regular polls.
    After(MicrosSinceEpoch),
    /// `ts = at`, used to drain all rows sharing the timestamp at a batch boundary.
    At(MicrosSinceEpoch),
    /// `after < ts <= up_to`, used by validation counts.
    Range {
        after: MicrosSinceEpoch,
        up_to: MicrosSinceEpoch,
    },
}

impl Cursor {
    pub fn contains(&self, ts: MicrosSinceEpoch) -> bool {
        match *self {
            Cursor::After(after) => ts > after,
            Cursor::At(at) => ts == at,
            Cursor::Range { after, up_to } => ts > after && ts <= up_to,
        }
    }
}

/// Query over one node's partition of a source table. Rows are returned in ascending timestamp
/// order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceQuery {
    pub table: SourceTable,
    /// Selected columns. Empty selects all columns.
    pub columns: Vec<String>,
    pub timestamp_column: String,
    pub partition: PartitionPredicate,
    pub cursor: Cursor,
    pub limit: Option<usize>,
}

impl SourceQuery {
    /// Whether a row with the given timestamp satisfies the partition and cursor restrictions.
    pub fn selects(&self, ts: MicrosSinceEpoch) -> bool {
        self.partition.contains(ts) && self.cursor.contains(ts)
    }
}

/// Read access to the analytical source.
#[async_trait]
pub trait SourceClient: Send + Sync {
    async fn run_query(&self, query: &SourceQuery) -> Result<Vec<Row>, SourceError>;

    /// Number of rows selected by the query, ignoring its limit.
    async fn count(&self, query: &SourceQuery) -> Result<u64, SourceError>;
}

static_assertions::assert_obj_safe!(SourceClient);
