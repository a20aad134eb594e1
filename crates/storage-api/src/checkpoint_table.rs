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

use shardsync_types::checkpoint::Checkpoint;
use shardsync_types::identifiers::{NodeIndex, TableId};
use shardsync_types::time::MicrosSinceEpoch;

use crate::Result;

/// Persistent per (table, node) sync cursors.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Returns the stored checkpoint or [`Checkpoint::initial`] if none was stored yet.
    async fn get(&self, table_id: &TableId, node_index: NodeIndex) -> Result<Checkpoint>;

    /// Persists `max(current, candidate)` and returns the resulting checkpoint. Concurrent
    /// calls for the same key never move the checkpoint backwards and retries are harmless.
    async fn advance(
        &self,
        table_id: &TableId,
        node_index: NodeIndex,
        candidate: MicrosSinceEpoch,
    ) -> Result<Checkpoint>;
}

static_assertions::assert_obj_safe!(CheckpointStore);
