// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::collections::HashSet;
use std::future::Future;

use tracing::{debug, warn};

use shardsync_storage_api::audit::AuditRecord;
use shardsync_storage_api::source::{Cursor, SourceQuery, SourceTable};
use shardsync_storage_api::{Row, SinkRecord};
use shardsync_types::config::TableOptions;
use shardsync_types::errors::MaybeRetryableError;
use shardsync_types::time::MicrosSinceEpoch;

use crate::{EngineContext, EngineError};

/// Result of a single poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOutcome {
    /// Records written to the sink.
    pub rows: usize,
    /// Checkpoint after the cycle.
    pub checkpoint: MicrosSinceEpoch,
    /// Whether the source returned a full batch, i.e. a backlog may remain.
    pub full_batch: bool,
}

/// Runs the poll cycles of one table on this node's partition.
pub(crate) struct Poller {
    table: TableOptions,
    ctx: EngineContext,
}

impl Poller {
    pub(crate) fn new(table: TableOptions, ctx: EngineContext) -> Self {
        Self { table, ctx }
    }

    fn query(&self, cursor: Cursor, limit: Option<usize>) -> SourceQuery {
        SourceQuery {
            table: SourceTable::new(&self.table.source_dataset, &self.table.source_table),
            columns: self.table.columns.clone(),
            timestamp_column: self.table.timestamp_column.clone(),
            partition: self.ctx.partition,
            cursor,
            limit,
        }
    }

    /// Runs `operation` with the configured timeout, retrying retryable failures according to
    /// the retry policy.
    async fn with_retry<T, E, F, Fut>(
        &self,
        operation: &'static str,
        mut f: F,
    ) -> Result<T, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        EngineError: From<E>,
    {
        let timeout = self.ctx.options.operation_timeout;
        let table_id = &self.table.id;
        self.ctx
            .options
            .retry_policy
            .clone()
            .retry_if(
                || {
                    let fut = f();
                    async move {
                        match tokio::time::timeout(timeout, fut).await {
                            Ok(result) => result.map_err(EngineError::from),
                            Err(_) => Err(EngineError::Timeout { operation, timeout }),
                        }
                    }
                },
                |err: &EngineError| {
                    let retryable = err.retryable();
                    if retryable {
                        warn!(%table_id, "Failed to {operation}, retrying: {err}");
                    }
                    retryable
                },
            )
            .await
    }

    /// Fetches the rows after the checkpoint. A full batch is completed with every row sharing
    /// its last timestamp, so the checkpoint never moves past a partially synced timestamp.
    async fn fetch(&self, checkpoint: MicrosSinceEpoch) -> Result<(Vec<Row>, bool), EngineError> {
        let batch_size = self.ctx.options.batch_size;
        let batch_query = self.query(Cursor::After(checkpoint), Some(batch_size));
        let mut rows = self
            .with_retry("fetch rows", || self.ctx.source.run_query(&batch_query))
            .await?;

        let full_batch = rows.len() >= batch_size;
        if full_batch {
            if let Some(boundary) = rows.last().map(|row| row.timestamp) {
                let drain_query = self.query(Cursor::At(boundary), None);
                let boundary_rows = self
                    .with_retry("drain boundary rows", || {
                        self.ctx.source.run_query(&drain_query)
                    })
                    .await?;
                debug!(
                    table_id = %self.table.id,
                    "Drained {} rows at boundary {}",
                    boundary_rows.len(),
                    boundary.as_i64()
                );
                rows.extend(boundary_rows);
            }
        }
        Ok((rows, full_batch))
    }

    fn into_records(&self, rows: Vec<Row>) -> Vec<SinkRecord> {
        let mut seen = HashSet::with_capacity(rows.len());
        rows.into_iter()
            .map(|row| row.into_sink_record(&self.table.id_columns))
            .filter(|record| seen.insert(record.id.clone()))
            .collect()
    }

    /// One poll cycle: read checkpoint, fetch, write, advance, audit.
    pub(crate) async fn poll_once(&self) -> Result<PollOutcome, EngineError> {
        let table_id = &self.table.id;
        let node_index = self.ctx.partition.identity().node_index();

        let checkpoint = self
            .with_retry("read checkpoint", || {
                self.ctx.checkpoints.get(table_id, node_index)
            })
            .await?
            .last_synced;

        let (rows, full_batch) = self.fetch(checkpoint).await?;
        let Some(max_timestamp) = rows.iter().map(|row| row.timestamp).max() else {
            return Ok(PollOutcome {
                rows: 0,
                checkpoint,
                full_batch: false,
            });
        };

        let records = self.into_records(rows);
        let written = records.len();
        let target_table = &self.table.target_table;
        self.with_retry("write records", || {
            self.ctx.sink.put_batch(target_table, records.clone())
        })
        .await?;

        // only after the write is durable
        let checkpoint = self
            .with_retry("advance checkpoint", || {
                self.ctx.checkpoints.advance(table_id, node_index, max_timestamp)
            })
            .await?
            .last_synced;
        debug!(%table_id, "Synced {written} records, checkpoint at {}", checkpoint.as_i64());

        if let Some(audit) = &self.ctx.audit {
            let record = AuditRecord::new(table_id.clone(), node_index, written as u64, checkpoint);
            match tokio::time::timeout(self.ctx.options.operation_timeout, audit.append(record))
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(%table_id, "Failed to write audit record: {err}"),
                Err(_) => warn!(%table_id, "Writing the audit record timed out"),
            }
        }

        Ok(PollOutcome {
            rows: written,
            checkpoint,
            full_batch,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use googletest::prelude::*;
    use serde_json::json;

    use shardsync_storage_api::audit::AuditLog;
    use shardsync_storage_api::checkpoint_table::CheckpointStore;
    use shardsync_storage_api::memory::{InMemoryCheckpointStore, InMemorySink, InMemorySource};
    use shardsync_storage_api::schema::{SchemaProvisioner, TableSpec};
    use shardsync_types::config::{TableOptionsBuilder, AUDIT_TABLE};
    use shardsync_types::identifiers::NodeIndex;
    use shardsync_types::partitioning::PartitionPredicate;
    use shardsync_types::retries::RetryPolicy;

    use super::*;
    use crate::EngineOptions;

    struct Fixture {
        source: Arc<InMemorySource>,
        sink: Arc<InMemorySink>,
        checkpoints: Arc<InMemoryCheckpointStore>,
        poller: Poller,
    }

    async fn fixture(node_index: u32, cluster_size: u32, batch_size: usize) -> Fixture {
        let source = Arc::new(InMemorySource::default());
        let sink = Arc::new(InMemorySink::default());
        let checkpoints = Arc::new(InMemoryCheckpointStore::default());
        sink.ensure_table(&TableSpec::new("positions")).await.unwrap();
        sink.ensure_table(&TableSpec::new(AUDIT_TABLE)).await.unwrap();

        let table = TableOptionsBuilder::default()
            .id("positions")
            .source_dataset("maritime")
            .source_table("positions")
            .target_table("positions")
            .id_columns(vec!["id".to_owned()])
            .build()
            .unwrap();
        let ctx = EngineContext {
            source: source.clone(),
            sink: sink.clone(),
            checkpoints: checkpoints.clone(),
            audit: Some(AuditLog::new(sink.clone())),
            partition: PartitionPredicate::new(node_index, cluster_size).unwrap(),
            options: EngineOptions {
                batch_size,
                generation_interval: Duration::from_secs(5),
                operation_timeout: Duration::from_secs(1),
                retry_policy: RetryPolicy::fixed_delay(Duration::from_millis(1), Some(2)),
            },
        };
        Fixture {
            source,
            sink,
            checkpoints,
            poller: Poller::new(table, ctx),
        }
    }

    fn row(id: &str, ts: i64) -> Row {
        let serde_json::Value::Object(fields) = json!({"id": id, "speed": 3}) else {
            unreachable!()
        };
        Row::new(MicrosSinceEpoch::new(ts), fields)
    }

    fn source_table() -> SourceTable {
        SourceTable::new("maritime", "positions")
    }

    fn synced_ids(sink: &InMemorySink) -> Vec<String> {
        let mut ids: Vec<_> = sink
            .records("positions")
            .into_iter()
            .map(|record| record.id)
            .collect();
        ids.sort();
        ids
    }

    #[test_log::test(tokio::test)]
    async fn syncs_one_batch_of_the_node_partition() -> googletest::Result<()> {
        let fixture = fixture(0, 6, 10).await;
        fixture.source.insert(
            source_table(),
            (1..=100).map(|ts| row(&format!("r{ts:03}"), ts)),
        );

        let outcome = fixture.poller.poll_once().await?;

        // 16 rows of node 0 (multiples of 6), one full batch of 10
        assert_that!(outcome.rows, eq(10));
        assert_that!(outcome.full_batch, eq(true));
        assert_that!(outcome.checkpoint, eq(MicrosSinceEpoch::new(60)));
        assert_eq!(
            synced_ids(&fixture.sink),
            (1..=10).map(|i| format!("r{:03}", i * 6)).collect::<Vec<_>>()
        );
        assert_that!(
            fixture
                .checkpoints
                .get(&"positions".into(), NodeIndex::new(0))
                .await?
                .last_synced,
            eq(MicrosSinceEpoch::new(60))
        );
        assert_that!(fixture.sink.records(AUDIT_TABLE).len(), eq(1));

        let outcome = fixture.poller.poll_once().await?;
        assert_that!(outcome.rows, eq(6));
        assert_that!(outcome.full_batch, eq(false));
        assert_that!(outcome.checkpoint, eq(MicrosSinceEpoch::new(96)));
        assert_that!(fixture.sink.records("positions").len(), eq(16));
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn drains_rows_sharing_the_boundary_timestamp() -> googletest::Result<()> {
        let fixture = fixture(0, 6, 3).await;
        fixture.source.insert(
            source_table(),
            [
                row("a", 6),
                row("b", 12),
                row("c", 12),
                row("d", 12),
                row("e", 18),
            ],
        );

        let outcome = fixture.poller.poll_once().await?;

        assert_that!(outcome.rows, eq(4));
        assert_that!(outcome.checkpoint, eq(MicrosSinceEpoch::new(12)));
        assert_eq!(synced_ids(&fixture.sink), vec!["a", "b", "c", "d"]);

        let queries = fixture.source.queries();
        assert_that!(queries.len(), eq(2));
        assert_that!(queries[1].cursor, eq(Cursor::At(MicrosSinceEpoch::new(12))));
        assert_eq!(queries[1].limit, None);

        let outcome = fixture.poller.poll_once().await?;
        assert_that!(outcome.rows, eq(1));
        assert_that!(outcome.checkpoint, eq(MicrosSinceEpoch::new(18)));
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn empty_poll_keeps_checkpoint() -> googletest::Result<()> {
        let fixture = fixture(1, 6, 10).await;
        fixture.source.insert(source_table(), [row("a", 6)]);

        let outcome = fixture.poller.poll_once().await?;

        assert_that!(
            outcome,
            eq(PollOutcome {
                rows: 0,
                checkpoint: MicrosSinceEpoch::UNIX_EPOCH,
                full_batch: false,
            })
        );
        assert_that!(fixture.sink.records(AUDIT_TABLE).len(), eq(0));
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn retries_transient_source_failures() -> googletest::Result<()> {
        let fixture = fixture(0, 1, 10).await;
        fixture.source.insert(source_table(), [row("a", 1)]);
        fixture.source.fail_next(2);

        let outcome = fixture.poller.poll_once().await?;

        assert_that!(outcome.rows, eq(1));
        assert_that!(fixture.source.queries().len(), eq(3));
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn failed_write_does_not_advance_checkpoint() -> googletest::Result<()> {
        let fixture = fixture(0, 1, 10).await;
        fixture.source.insert(source_table(), [row("a", 1)]);
        fixture.sink.fail_next_writes(3);

        let result = fixture.poller.poll_once().await;

        assert!(matches!(result, Err(EngineError::Sink(_))));
        assert_that!(
            fixture
                .checkpoints
                .get(&"positions".into(), NodeIndex::new(0))
                .await?
                .last_synced,
            eq(MicrosSinceEpoch::UNIX_EPOCH)
        );
        Ok(())
    }
}
