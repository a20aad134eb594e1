// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Process local implementations of the storage interfaces, with fault injection for tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use shardsync_types::checkpoint::Checkpoint;
use shardsync_types::identifiers::{NodeIndex, TableId};
use shardsync_types::time::MicrosSinceEpoch;

use crate::checkpoint_table::CheckpointStore;
use crate::schema::{EnsureOutcome, SchemaProvisioner, TableSpec};
use crate::search::SearchQuery;
use crate::sink::SinkStore;
use crate::source::{SourceClient, SourceQuery, SourceTable};
use crate::{Result, Row, SinkError, SinkRecord, SourceError};

#[derive(Debug, thiserror::Error)]
#[error("injected failure")]
pub struct InjectedFailure;

fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[derive(Default)]
pub struct InMemorySource {
    rows: Mutex<HashMap<SourceTable, Vec<Row>>>,
    queries: Mutex<Vec<SourceQuery>>,
    failures: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl InMemorySource {
    pub fn insert(&self, table: SourceTable, rows: impl IntoIterator<Item = Row>) {
        self.rows.lock().entry(table).or_default().extend(rows);
    }

    /// The next `n` calls fail with a retryable error.
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Every call sleeps for `delay` before answering.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    /// Queries received so far, failed ones included.
    pub fn queries(&self) -> Vec<SourceQuery> {
        self.queries.lock().clone()
    }

    async fn prepare(&self, query: &SourceQuery) -> Result<(), SourceError> {
        self.queries.lock().push(query.clone());
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if take_failure(&self.failures) {
            return Err(SourceError::Request(InjectedFailure.into()));
        }
        Ok(())
    }

    fn select(&self, query: &SourceQuery) -> Vec<Row> {
        let mut selected: Vec<Row> = self
            .rows
            .lock()
            .get(&query.table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| query.selects(row.timestamp))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        selected.sort_by_key(|row| row.timestamp);
        selected
    }
}

#[async_trait]
impl SourceClient for InMemorySource {
    async fn run_query(&self, query: &SourceQuery) -> Result<Vec<Row>, SourceError> {
        self.prepare(query).await?;

        let mut rows = self.select(query);
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        if !query.columns.is_empty() {
            for row in &mut rows {
                row.fields.retain(|column, _| query.columns.contains(column));
            }
        }
        Ok(rows)
    }

    async fn count(&self, query: &SourceQuery) -> Result<u64, SourceError> {
        self.prepare(query).await?;
        Ok(self.select(query).len() as u64)
    }
}

#[derive(Default)]
pub struct InMemorySink {
    tables: Mutex<HashMap<String, BTreeMap<String, SinkRecord>>>,
    write_failures: AtomicUsize,
    batches: AtomicUsize,
    records_written: AtomicUsize,
}

impl InMemorySink {
    /// The next `n` writes fail with a retryable error.
    pub fn fail_next_writes(&self, n: usize) {
        self.write_failures.store(n, Ordering::SeqCst);
    }

    /// Number of successfully written batches.
    pub fn batches_written(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    /// Number of records in successfully written batches, counting overwrites.
    pub fn records_written(&self) -> usize {
        self.records_written.load(Ordering::SeqCst)
    }

    pub fn records(&self, table: &str) -> Vec<SinkRecord> {
        self.tables
            .lock()
            .get(table)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.tables.lock().contains_key(table)
    }
}

#[async_trait]
impl SinkStore for InMemorySink {
    async fn get(&self, table: &str, id: &str) -> Result<Option<SinkRecord>> {
        let tables = self.tables.lock();
        let records = tables
            .get(table)
            .ok_or_else(|| SinkError::UnknownTable(table.to_owned()))?;
        Ok(records.get(id).cloned())
    }

    async fn put_batch(&self, table: &str, records: Vec<SinkRecord>) -> Result<()> {
        if take_failure(&self.write_failures) {
            return Err(SinkError::Storage(InjectedFailure.into()));
        }

        let mut tables = self.tables.lock();
        let stored = tables
            .get_mut(table)
            .ok_or_else(|| SinkError::UnknownTable(table.to_owned()))?;
        self.records_written.fetch_add(records.len(), Ordering::SeqCst);
        for record in records {
            stored.insert(record.id.clone(), record);
        }
        self.batches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn search(&self, table: &str, query: &SearchQuery) -> Result<Vec<SinkRecord>> {
        let tables = self.tables.lock();
        let records = tables
            .get(table)
            .ok_or_else(|| SinkError::UnknownTable(table.to_owned()))?;
        Ok(query.evaluate(records.values().cloned()))
    }

    async fn delete_older_than(&self, table: &str, cutoff: MicrosSinceEpoch) -> Result<u64> {
        let mut tables = self.tables.lock();
        let records = tables
            .get_mut(table)
            .ok_or_else(|| SinkError::UnknownTable(table.to_owned()))?;
        let before = records.len();
        records.retain(|_, record| record.timestamp >= cutoff);
        Ok((before - records.len()) as u64)
    }
}

#[async_trait]
impl SchemaProvisioner for InMemorySink {
    async fn ensure_table(&self, spec: &TableSpec) -> Result<EnsureOutcome> {
        let mut tables = self.tables.lock();
        if tables.contains_key(&spec.name) {
            return Ok(EnsureOutcome::Exists);
        }
        tables.insert(spec.name.clone(), BTreeMap::new());
        Ok(EnsureOutcome::Created)
    }
}

#[derive(Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: Mutex<HashMap<(TableId, NodeIndex), Checkpoint>>,
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn get(&self, table_id: &TableId, node_index: NodeIndex) -> Result<Checkpoint> {
        Ok(self
            .checkpoints
            .lock()
            .get(&(table_id.clone(), node_index))
            .cloned()
            .unwrap_or_else(|| Checkpoint::initial(table_id.clone(), node_index)))
    }

    async fn advance(
        &self,
        table_id: &TableId,
        node_index: NodeIndex,
        candidate: MicrosSinceEpoch,
    ) -> Result<Checkpoint> {
        let mut checkpoints = self.checkpoints.lock();
        let current = checkpoints
            .entry((table_id.clone(), node_index))
            .or_insert_with(|| Checkpoint::initial(table_id.clone(), node_index));
        if let Some(advanced) = current.advanced_to(candidate) {
            *current = advanced;
        }
        Ok(current.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use shardsync_types::partitioning::PartitionPredicate;

    use super::*;
    use crate::source::Cursor;

    #[tokio::test]
    async fn checkpoints_never_regress() -> anyhow::Result<()> {
        let store = InMemoryCheckpointStore::default();
        let table = TableId::from("positions");
        let node = NodeIndex::new(0);

        assert_eq!(
            store.get(&table, node).await?.last_synced,
            MicrosSinceEpoch::UNIX_EPOCH
        );

        store.advance(&table, node, MicrosSinceEpoch::new(100)).await?;
        let after_regression = store.advance(&table, node, MicrosSinceEpoch::new(40)).await?;

        assert_eq!(after_regression.last_synced, MicrosSinceEpoch::new(100));
        assert_eq!(
            store.get(&table, node).await?.last_synced,
            MicrosSinceEpoch::new(100)
        );
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_advances_keep_the_maximum() -> anyhow::Result<()> {
        let store = Arc::new(InMemoryCheckpointStore::default());
        let table = TableId::from("positions");
        let node = NodeIndex::new(0);

        let tasks: Vec<_> = (0..64)
            .map(|i| {
                let store = Arc::clone(&store);
                let table = table.clone();
                tokio::spawn(async move {
                    store
                        .advance(&table, node, MicrosSinceEpoch::new((i * 37) % 64))
                        .await
                })
            })
            .collect();
        for result in futures::future::join_all(tasks).await {
            result??;
        }

        assert_eq!(
            store.get(&table, node).await?.last_synced,
            MicrosSinceEpoch::new(63)
        );
        Ok(())
    }

    #[tokio::test]
    async fn source_applies_partition_cursor_and_limit() -> anyhow::Result<()> {
        let source = InMemorySource::default();
        let table = SourceTable::new("ais", "positions");
        source.insert(
            table.clone(),
            (0..20).map(|ts| Row::new(MicrosSinceEpoch::new(ts), Default::default())),
        );

        let query = SourceQuery {
            table,
            columns: vec![],
            timestamp_column: "timestamp".to_owned(),
            partition: PartitionPredicate::new(1, 3)?,
            cursor: Cursor::After(MicrosSinceEpoch::new(4)),
            limit: Some(3),
        };

        let timestamps: Vec<_> = source
            .run_query(&query)
            .await?
            .into_iter()
            .map(|row| row.timestamp.as_i64())
            .collect();
        assert_eq!(timestamps, vec![7, 10, 13]);
        assert_eq!(source.count(&query).await?, 5);
        Ok(())
    }
}
