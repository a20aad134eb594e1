// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::identifiers::{InvalidNodeIdentity, NodeIdentity, TableId};
use crate::retries::RetryPolicy;

/// # Sync options
///
/// Options of the sync engines running on this node.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, derive_builder::Builder)]
#[serde(rename_all = "kebab-case")]
#[builder(default)]
pub struct SyncOptions {
    /// # Cluster size
    ///
    /// Number of nodes sharing the source rows. Every node must be configured with the same
    /// value; changing it requires restarting all nodes.
    pub cluster_size: u32,

    /// # Node index
    ///
    /// Position of this node within the cluster, in `0..cluster-size`.
    pub node_index: u32,

    /// # Batch size
    ///
    /// Maximum number of rows fetched from the source per poll.
    pub batch_size: NonZeroUsize,

    /// # Generation interval
    ///
    /// Pause between polls once the backlog is drained.
    #[serde_as(as = "serde_with::DisplayFromStr")]
    pub generation_interval: humantime::Duration,

    /// # Operation timeout
    ///
    /// Upper bound for a single source query or sink write. Timeouts are retried.
    #[serde_as(as = "serde_with::DisplayFromStr")]
    pub operation_timeout: humantime::Duration,

    /// # Retry policy
    ///
    /// Backoff of failed source queries and sink writes. Once exhausted the engine fails.
    pub retry_policy: RetryPolicy,

    /// # Retention
    ///
    /// Number of days synced records are kept in the sink. `0` disables the cleanup.
    pub retention_days: u32,

    /// # Cleanup interval
    #[serde_as(as = "serde_with::DisplayFromStr")]
    pub cleanup_interval: humantime::Duration,

    /// # Tables
    #[serde(default)]
    pub tables: Vec<TableOptions>,
}

impl SyncOptions {
    pub fn node_identity(&self) -> Result<NodeIdentity, InvalidNodeIdentity> {
        NodeIdentity::new(self.node_index, self.cluster_size)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size.get()
    }

    pub fn retention(&self) -> Option<Duration> {
        (self.retention_days > 0)
            .then(|| Duration::from_secs(u64::from(self.retention_days) * 24 * 60 * 60))
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            cluster_size: 1,
            node_index: 0,
            batch_size: NonZeroUsize::new(1000).unwrap_or(NonZeroUsize::MIN),
            generation_interval: Duration::from_secs(5).into(),
            operation_timeout: Duration::from_secs(60).into(),
            retry_policy: RetryPolicy::exponential(
                Duration::from_millis(500),
                2.0,
                Some(5),
                Some(Duration::from_secs(30)),
            ),
            retention_days: 30,
            cleanup_interval: Duration::from_secs(60 * 60).into(),
            tables: Vec::new(),
        }
    }
}

/// # Table sync options
///
/// Maps one source table to one sink table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, derive_builder::Builder)]
#[serde(rename_all = "kebab-case")]
#[builder(setter(into))]
pub struct TableOptions {
    /// Identifier used in logs, checkpoints and the status endpoint.
    pub id: TableId,
    pub source_dataset: String,
    pub source_table: String,
    /// Column holding the row timestamp that drives partitioning and checkpointing.
    #[builder(default = "\"timestamp\".to_owned()")]
    #[serde(default = "default_timestamp_column")]
    pub timestamp_column: String,
    pub target_table: String,
    /// Source columns to copy. Empty selects all columns.
    #[builder(default)]
    #[serde(default)]
    pub columns: Vec<String>,
    /// Columns forming the natural row identifier. Rows are keyed by a content hash if empty.
    #[builder(default)]
    #[serde(default)]
    pub id_columns: Vec<String>,
}

fn default_timestamp_column() -> String {
    "timestamp".to_owned()
}
