// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use shardsync_types::config::TableOptions;
use shardsync_types::identifiers::TableId;
use shardsync_types::time::{MicrosSinceEpoch, MillisSinceEpoch};

use crate::poll::Poller;
use crate::{EngineContext, EngineError};

/// Lifecycle phase of a [`SyncEngine`].
///
/// ```text
/// stopped -> starting -> running -> stopping -> stopped
///               |           |
///               +--------> failed -> starting (explicit start)
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SyncPhase {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEngineStatus {
    pub table_id: TableId,
    pub phase: SyncPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Checkpoint observed by the last successful poll of this process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<MicrosSinceEpoch>,
    /// Records written since the process started.
    pub rows_synced: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_poll_at: Option<MillisSinceEpoch>,
}

impl SyncEngineStatus {
    fn new(table_id: TableId) -> Self {
        Self {
            table_id,
            phase: SyncPhase::Stopped,
            last_error: None,
            checkpoint: None,
            rows_synced: 0,
            last_poll_at: None,
        }
    }
}

struct SyncTask {
    cancellation: CancellationToken,
    handle: JoinHandle<()>,
}

/// Keeps one table of this node's partition in sync.
///
/// Lifecycle calls are serialized. [`SyncEngine::start`] returns once the first poll cycle
/// completed, so a failing source or sink surfaces to the caller instead of as a silently
/// stopped engine.
pub struct SyncEngine {
    table_id: TableId,
    poller: Arc<Poller>,
    generation_interval: Duration,
    status: Arc<watch::Sender<SyncEngineStatus>>,
    task: Mutex<Option<SyncTask>>,
}

impl SyncEngine {
    pub fn new(table: TableOptions, ctx: EngineContext) -> Self {
        let table_id = table.id.clone();
        let generation_interval = ctx.options.generation_interval;
        let (status, _) = watch::channel(SyncEngineStatus::new(table_id.clone()));
        Self {
            table_id,
            poller: Arc::new(Poller::new(table, ctx)),
            generation_interval,
            status: Arc::new(status),
            task: Mutex::default(),
        }
    }

    pub fn table_id(&self) -> &TableId {
        &self.table_id
    }

    pub fn status(&self) -> SyncEngineStatus {
        self.status.borrow().clone()
    }

    pub fn phase(&self) -> SyncPhase {
        self.status.borrow().phase
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncEngineStatus> {
        self.status.subscribe()
    }

    /// Starts syncing. A no-op if the engine is already running, a fresh attempt if it failed.
    pub async fn start(&self) -> Result<(), EngineError> {
        let mut task = self.task.lock().await;
        if matches!(self.phase(), SyncPhase::Running | SyncPhase::Starting) {
            debug!(table_id = %self.table_id, "Sync engine already running");
            return Ok(());
        }
        if let Some(previous) = task.take() {
            previous.cancellation.cancel();
            let _ = previous.handle.await;
        }

        self.status.send_modify(|status| {
            status.phase = SyncPhase::Starting;
            status.last_error = None;
        });
        info!(table_id = %self.table_id, "Starting sync engine");

        let cancellation = CancellationToken::new();
        let (first_cycle_tx, first_cycle_rx) = oneshot::channel();
        let handle = tokio::spawn(
            run_sync_loop(
                Arc::clone(&self.poller),
                Arc::clone(&self.status),
                cancellation.clone(),
                self.generation_interval,
                first_cycle_tx,
            )
            .instrument(info_span!("sync-engine", table_id = %self.table_id)),
        );
        *task = Some(SyncTask {
            cancellation,
            handle,
        });

        match first_cycle_rx.await.unwrap_or(Err(EngineError::TaskTerminated)) {
            Ok(()) => {
                info!(table_id = %self.table_id, "Sync engine running");
                Ok(())
            }
            Err(err) => {
                self.status.send_if_modified(|status| {
                    if status.phase == SyncPhase::Failed {
                        return false;
                    }
                    status.phase = SyncPhase::Failed;
                    status.last_error = Some(err.to_string());
                    true
                });
                Err(err)
            }
        }
    }

    /// Stops syncing after the in-flight poll cycle completed. Stopping a failed engine clears
    /// its error.
    pub async fn stop(&self) -> Result<(), EngineError> {
        let mut task = self.task.lock().await;
        if self.phase() == SyncPhase::Stopped {
            return Ok(());
        }

        self.status.send_modify(|status| {
            if status.phase != SyncPhase::Failed {
                status.phase = SyncPhase::Stopping;
            }
        });
        info!(table_id = %self.table_id, "Stopping sync engine");

        let mut result = Ok(());
        if let Some(SyncTask {
            cancellation,
            handle,
        }) = task.take()
        {
            cancellation.cancel();
            if let Err(err) = handle.await {
                warn!(table_id = %self.table_id, "Sync task did not terminate cleanly: {err}");
                result = Err(EngineError::TaskTerminated);
            }
        }

        self.status.send_modify(|status| {
            status.phase = SyncPhase::Stopped;
            status.last_error = None;
        });
        result
    }
}

async fn run_sync_loop(
    poller: Arc<Poller>,
    status: Arc<watch::Sender<SyncEngineStatus>>,
    cancellation: CancellationToken,
    generation_interval: Duration,
    first_cycle: oneshot::Sender<Result<(), EngineError>>,
) {
    let mut first_cycle = Some(first_cycle);
    loop {
        match poller.poll_once().await {
            Ok(outcome) => {
                status.send_modify(|status| {
                    if status.phase == SyncPhase::Starting {
                        status.phase = SyncPhase::Running;
                    }
                    status.checkpoint = Some(outcome.checkpoint);
                    status.rows_synced += outcome.rows as u64;
                    status.last_poll_at = Some(MillisSinceEpoch::now());
                });
                if let Some(tx) = first_cycle.take() {
                    let _ = tx.send(Ok(()));
                }

                if cancellation.is_cancelled() {
                    break;
                }
                if !outcome.full_batch {
                    tokio::select! {
                        _ = cancellation.cancelled() => break,
                        _ = tokio::time::sleep(generation_interval) => {}
                    }
                }
            }
            Err(err) => {
                error!("Sync failed, giving up: {err}");
                status.send_modify(|status| {
                    status.phase = SyncPhase::Failed;
                    status.last_error = Some(err.to_string());
                });
                if let Some(tx) = first_cycle.take() {
                    let _ = tx.send(Err(err));
                }
                return;
            }
        }
    }
    debug!("Sync loop stopped");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use googletest::prelude::*;
    use serde_json::json;

    use shardsync_storage_api::memory::{InMemoryCheckpointStore, InMemorySink, InMemorySource};
    use shardsync_storage_api::schema::{SchemaProvisioner, TableSpec};
    use shardsync_storage_api::source::SourceTable;
    use shardsync_storage_api::Row;
    use shardsync_types::config::TableOptionsBuilder;
    use shardsync_types::partitioning::PartitionPredicate;
    use shardsync_types::retries::RetryPolicy;

    use super::*;
    use crate::EngineOptions;

    async fn engine(source: Arc<InMemorySource>, operation_timeout: Duration) -> SyncEngine {
        let sink = Arc::new(InMemorySink::default());
        sink.ensure_table(&TableSpec::new("positions")).await.unwrap();

        let table = TableOptionsBuilder::default()
            .id("positions")
            .source_dataset("maritime")
            .source_table("positions")
            .target_table("positions")
            .build()
            .unwrap();
        SyncEngine::new(
            table,
            EngineContext {
                source,
                sink,
                checkpoints: Arc::new(InMemoryCheckpointStore::default()),
                audit: None,
                partition: PartitionPredicate::new(0, 1).unwrap(),
                options: EngineOptions {
                    batch_size: 100,
                    generation_interval: Duration::from_secs(5),
                    operation_timeout,
                    retry_policy: RetryPolicy::fixed_delay(Duration::from_millis(10), Some(2)),
                },
            },
        )
    }

    fn source_with_rows(n: i64) -> Arc<InMemorySource> {
        let source = Arc::new(InMemorySource::default());
        source.insert(
            SourceTable::new("maritime", "positions"),
            (1..=n).map(|ts| {
                let serde_json::Value::Object(fields) = json!({"n": ts}) else {
                    unreachable!()
                };
                Row::new(MicrosSinceEpoch::new(ts), fields)
            }),
        );
        source
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn start_completes_first_cycle() -> googletest::Result<()> {
        let engine = engine(source_with_rows(5), Duration::from_secs(1)).await;

        engine.start().await?;
        let status = engine.status();
        assert_that!(status.phase, eq(SyncPhase::Running));
        assert_that!(status.rows_synced, eq(5));
        assert_that!(status.checkpoint, eq(Some(MicrosSinceEpoch::new(5))));

        // already running
        engine.start().await?;
        assert_that!(engine.phase(), eq(SyncPhase::Running));

        engine.stop().await?;
        assert_that!(engine.phase(), eq(SyncPhase::Stopped));
        engine.stop().await?;
        assert_that!(engine.phase(), eq(SyncPhase::Stopped));
        Ok(())
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn failing_first_cycle_fails_engine() -> googletest::Result<()> {
        let source = source_with_rows(5);
        let engine = engine(source.clone(), Duration::from_secs(1)).await;
        // initial attempt plus two retries
        source.fail_next(3);

        let result = engine.start().await;

        assert!(matches!(result, Err(EngineError::Source(_))));
        let status = engine.status();
        assert_that!(status.phase, eq(SyncPhase::Failed));
        assert_that!(
            status.last_error.as_deref(),
            some(contains_substring("injected failure"))
        );

        // explicit start re-attempts
        engine.start().await?;
        assert_that!(engine.phase(), eq(SyncPhase::Running));
        assert_that!(engine.status().last_error, eq(None::<String>));
        engine.stop().await?;
        Ok(())
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn stopping_failed_engine_clears_error() -> googletest::Result<()> {
        let source = source_with_rows(1);
        let engine = engine(source.clone(), Duration::from_secs(1)).await;
        source.fail_next(10);

        assert!(engine.start().await.is_err());
        engine.stop().await?;

        let status = engine.status();
        assert_that!(status.phase, eq(SyncPhase::Stopped));
        assert_that!(status.last_error, eq(None::<String>));
        Ok(())
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn slow_source_times_out() -> googletest::Result<()> {
        let source = source_with_rows(1);
        source.set_delay(Some(Duration::from_secs(3600)));
        let engine = engine(source.clone(), Duration::from_millis(50)).await;

        let result = engine.start().await;

        assert!(matches!(
            result,
            Err(EngineError::Timeout {
                operation: "fetch rows",
                ..
            })
        ));
        assert_that!(engine.phase(), eq(SyncPhase::Failed));
        // every attempt timed out
        assert_that!(source.queries().len(), eq(3));
        Ok(())
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn running_engine_fails_after_exhausted_retries() -> googletest::Result<()> {
        let source = source_with_rows(1);
        let engine = engine(source.clone(), Duration::from_secs(1)).await;
        let mut status = engine.subscribe();

        engine.start().await?;
        source.fail_next(10);

        let failed = status
            .wait_for(|status| status.phase == SyncPhase::Failed)
            .await?
            .clone();
        assert_that!(failed.last_error, some(contains_substring("injected failure")));
        assert_that!(failed.rows_synced, eq(1));
        Ok(())
    }
}
