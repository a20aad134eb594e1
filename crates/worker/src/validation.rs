// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Comparison of source and sink row counts up to the checkpoint of every table.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use shardsync_storage_api::search::SearchQuery;
use shardsync_storage_api::source::{Cursor, SourceQuery, SourceTable};
use shardsync_types::config::TableOptions;
use shardsync_types::identifiers::TableId;
use shardsync_types::time::{MicrosSinceEpoch, MillisSinceEpoch};

use crate::EngineContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationOutcome {
    Match,
    Mismatch,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableValidation {
    pub table_id: TableId,
    pub checkpoint: MicrosSinceEpoch,
    pub source_count: u64,
    pub sink_count: u64,
    pub outcome: ValidationOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub validated_at: MillisSinceEpoch,
    pub tables: Vec<TableValidation>,
}

impl ValidationReport {
    pub fn is_consistent(&self) -> bool {
        self.tables
            .iter()
            .all(|table| table.outcome == ValidationOutcome::Match)
    }
}

/// Runs on a `validate` command.
#[async_trait]
pub trait ValidationRunner: Send + Sync {
    async fn run_validation(&self) -> anyhow::Result<ValidationReport>;
}

/// Counts the rows of this node's partition that lie behind the checkpoint, in the source and
/// in the sink. With retention enabled only the retained window is compared.
pub struct PartitionValidator {
    tables: Vec<TableOptions>,
    ctx: EngineContext,
    retention: Option<Duration>,
}

impl PartitionValidator {
    pub fn new(tables: Vec<TableOptions>, ctx: EngineContext, retention: Option<Duration>) -> Self {
        Self {
            tables,
            ctx,
            retention,
        }
    }

    async fn validate_table(&self, table: &TableOptions) -> anyhow::Result<TableValidation> {
        let node_index = self.ctx.partition.identity().node_index();
        let checkpoint = self
            .ctx
            .checkpoints
            .get(&table.id, node_index)
            .await?
            .last_synced;
        let after = self
            .retention
            .map(|retention| MicrosSinceEpoch::now().saturating_sub(retention))
            .unwrap_or(MicrosSinceEpoch::UNIX_EPOCH);

        let source_count = self
            .ctx
            .source
            .count(&SourceQuery {
                table: SourceTable::new(&table.source_dataset, &table.source_table),
                columns: Vec::new(),
                timestamp_column: table.timestamp_column.clone(),
                partition: self.ctx.partition,
                cursor: Cursor::Range {
                    after,
                    up_to: checkpoint,
                },
                limit: None,
            })
            .await?;

        let sink_count = self
            .ctx
            .sink
            .search(&table.target_table, &SearchQuery::time_range(after, checkpoint))
            .await?
            .iter()
            .filter(|record| self.ctx.partition.contains(record.timestamp))
            .count() as u64;

        let outcome = if source_count == sink_count {
            ValidationOutcome::Match
        } else {
            ValidationOutcome::Mismatch
        };
        Ok(TableValidation {
            table_id: table.id.clone(),
            checkpoint,
            source_count,
            sink_count,
            outcome,
        })
    }
}

#[async_trait]
impl ValidationRunner for PartitionValidator {
    async fn run_validation(&self) -> anyhow::Result<ValidationReport> {
        let mut tables = Vec::with_capacity(self.tables.len());
        for table in &self.tables {
            let validation = self.validate_table(table).await?;
            match validation.outcome {
                ValidationOutcome::Match => info!(
                    table_id = %validation.table_id,
                    "Validated {} rows up to {}",
                    validation.sink_count,
                    validation.checkpoint.as_i64()
                ),
                ValidationOutcome::Mismatch => warn!(
                    table_id = %validation.table_id,
                    "Validation mismatch up to {}: source has {} rows, sink has {}",
                    validation.checkpoint.as_i64(),
                    validation.source_count,
                    validation.sink_count
                ),
            }
            tables.push(validation);
        }
        Ok(ValidationReport {
            validated_at: MillisSinceEpoch::now(),
            tables,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use googletest::prelude::*;

    use shardsync_storage_api::checkpoint_table::CheckpointStore;
    use shardsync_storage_api::memory::{InMemoryCheckpointStore, InMemorySink, InMemorySource};
    use shardsync_storage_api::schema::{SchemaProvisioner, TableSpec};
    use shardsync_storage_api::sink::SinkStore;
    use shardsync_storage_api::Row;
    use shardsync_types::config::TableOptionsBuilder;
    use shardsync_types::identifiers::NodeIndex;
    use shardsync_types::partitioning::PartitionPredicate;
    use shardsync_types::retries::RetryPolicy;

    use super::*;
    use crate::EngineOptions;

    fn row(ts: i64) -> Row {
        Row::new(MicrosSinceEpoch::new(ts), Default::default())
    }

    #[test_log::test(tokio::test)]
    async fn compares_counts_behind_the_checkpoint() -> googletest::Result<()> {
        let source = Arc::new(InMemorySource::default());
        let sink = Arc::new(InMemorySink::default());
        let checkpoints = Arc::new(InMemoryCheckpointStore::default());
        sink.ensure_table(&TableSpec::new("positions")).await?;

        // node 0 of 2 owns the even timestamps
        source.insert(
            SourceTable::new("maritime", "positions"),
            (1..=8).map(row),
        );
        sink.put_batch(
            "positions",
            [2, 4, 6, 8]
                .into_iter()
                .map(|ts| row(ts).into_sink_record(&[]))
                .collect(),
        )
        .await?;
        checkpoints
            .advance(&"positions".into(), NodeIndex::new(0), MicrosSinceEpoch::new(6))
            .await?;

        let table = TableOptionsBuilder::default()
            .id("positions")
            .source_dataset("maritime")
            .source_table("positions")
            .target_table("positions")
            .build()?;
        let validator = PartitionValidator::new(
            vec![table],
            EngineContext {
                source: source.clone(),
                sink: sink.clone(),
                checkpoints,
                audit: None,
                partition: PartitionPredicate::new(0, 2)?,
                options: EngineOptions {
                    batch_size: 10,
                    generation_interval: Duration::from_secs(1),
                    operation_timeout: Duration::from_secs(1),
                    retry_policy: RetryPolicy::None,
                },
            },
            None,
        );

        let report = validator.run_validation().await?;
        assert_that!(report.tables.len(), eq(1));
        let table = &report.tables[0];
        assert_that!(table.checkpoint, eq(MicrosSinceEpoch::new(6)));
        assert_that!(table.source_count, eq(3));
        assert_that!(table.sink_count, eq(3));
        assert_that!(table.outcome, eq(ValidationOutcome::Match));
        assert!(report.is_consistent());
        // without retention the window starts at the epoch
        assert_eq!(
            source.queries().last().map(|query| query.cursor),
            Some(Cursor::Range {
                after: MicrosSinceEpoch::UNIX_EPOCH,
                up_to: MicrosSinceEpoch::new(6),
            })
        );

        sink.delete_older_than("positions", MicrosSinceEpoch::new(3))
            .await?;
        let report = validator.run_validation().await?;
        assert_that!(report.tables[0].sink_count, eq(2));
        assert_that!(report.tables[0].outcome, eq(ValidationOutcome::Mismatch));
        assert!(!report.is_consistent());
        Ok(())
    }
}
