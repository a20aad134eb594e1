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
use tracing::trace;

use shardsync_storage_api::checkpoint_table::CheckpointStore;
use shardsync_storage_api::{Result, SinkError};
use shardsync_types::checkpoint::Checkpoint;
use shardsync_types::identifiers::{NodeIndex, TableId};
use shardsync_types::time::MicrosSinceEpoch;

use crate::keys::{checkpoint_key, CHECKPOINTS_CF};
use crate::{codec_error, storage_error, RocksDbSink};

impl RocksDbSink {
    fn read_checkpoint(&self, table_id: &TableId, node_index: NodeIndex) -> Result<Checkpoint> {
        let cf = self
            .db
            .cf_handle(CHECKPOINTS_CF)
            .ok_or_else(|| SinkError::UnknownTable(CHECKPOINTS_CF.to_owned()))?;
        match self
            .db
            .get_pinned_cf(&cf, checkpoint_key(table_id, node_index))
            .map_err(storage_error)?
        {
            Some(value) => serde_json::from_slice(&value).map_err(codec_error),
            None => Ok(Checkpoint::initial(table_id.clone(), node_index)),
        }
    }
}

#[async_trait]
impl CheckpointStore for RocksDbSink {
    async fn get(&self, table_id: &TableId, node_index: NodeIndex) -> Result<Checkpoint> {
        let table_id = table_id.clone();
        self.run_blocking(move |sink| sink.read_checkpoint(&table_id, node_index))
            .await
    }

    async fn advance(
        &self,
        table_id: &TableId,
        node_index: NodeIndex,
        candidate: MicrosSinceEpoch,
    ) -> Result<Checkpoint> {
        let table_id = table_id.clone();
        self.run_blocking(move |sink| {
            let _guard = sink.checkpoint_lock.lock();
            let current = sink.read_checkpoint(&table_id, node_index)?;
            let Some(advanced) = current.advanced_to(candidate) else {
                return Ok(current);
            };

            let cf = sink
                .db
                .cf_handle(CHECKPOINTS_CF)
                .ok_or_else(|| SinkError::UnknownTable(CHECKPOINTS_CF.to_owned()))?;
            let value = serde_json::to_vec(&advanced).map_err(codec_error)?;
            sink.db
                .put_cf_opt(
                    &cf,
                    checkpoint_key(&table_id, node_index),
                    value,
                    &sink.write_options(),
                )
                .map_err(storage_error)?;
            trace!(%table_id, %node_index, "Checkpoint advanced to {}", candidate.as_i64());
            Ok(advanced)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use googletest::prelude::*;

    use shardsync_types::config::SinkOptions;

    use super::*;

    #[test_log::test(tokio::test)]
    async fn checkpoints_are_monotonic_and_durable() -> googletest::Result<()> {
        let dir = tempfile::tempdir()?;
        let table = TableId::from("positions");
        let node = NodeIndex::new(3);

        {
            let sink = RocksDbSink::open(&SinkOptions::default(), dir.path()).await?;
            assert_that!(
                sink.get(&table, node).await?.last_synced,
                eq(MicrosSinceEpoch::UNIX_EPOCH)
            );

            sink.advance(&table, node, MicrosSinceEpoch::new(500)).await?;
            let regressed = sink.advance(&table, node, MicrosSinceEpoch::new(20)).await?;
            assert_that!(regressed.last_synced, eq(MicrosSinceEpoch::new(500)));

            let other_node = sink.get(&table, NodeIndex::new(4)).await?;
            assert_that!(other_node.last_synced, eq(MicrosSinceEpoch::UNIX_EPOCH));
        }

        let sink = RocksDbSink::open(&SinkOptions::default(), dir.path()).await?;
        let reopened = sink.get(&table, node).await?;
        assert_that!(reopened.last_synced, eq(MicrosSinceEpoch::new(500)));
        assert_that!(reopened.node_index, eq(node));
        Ok(())
    }

    #[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
    async fn concurrent_advances_keep_the_maximum() -> googletest::Result<()> {
        let dir = tempfile::tempdir()?;
        let sink = RocksDbSink::open(&SinkOptions::default(), dir.path()).await?;
        let table = TableId::from("positions");
        let node = NodeIndex::new(0);

        // interleaves high and low candidates
        let candidates = (0..64).map(|i| MicrosSinceEpoch::new((i * 37) % 64));
        let results = futures::future::join_all(
            candidates.map(|candidate| sink.advance(&table, node, candidate)),
        )
        .await;
        for result in results {
            result?;
        }

        assert_that!(
            sink.get(&table, node).await?.last_synced,
            eq(MicrosSinceEpoch::new(63))
        );
        Ok(())
    }
}
