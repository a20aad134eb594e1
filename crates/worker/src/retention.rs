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

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use shardsync_storage_api::sink::SinkStore;
use shardsync_types::time::MicrosSinceEpoch;

/// Periodically deletes sink records that fell out of the retention window.
pub struct RetentionTask {
    sink: Arc<dyn SinkStore>,
    tables: Vec<String>,
    retention: Duration,
    cleanup_interval: Duration,
}

impl RetentionTask {
    pub fn new(
        sink: Arc<dyn SinkStore>,
        tables: Vec<String>,
        retention: Duration,
        cleanup_interval: Duration,
    ) -> Self {
        Self {
            sink,
            tables,
            retention,
            cleanup_interval,
        }
    }

    pub async fn run(self, cancellation: CancellationToken) -> anyhow::Result<()> {
        debug!(
            "Running retention task for {} tables, retention {:?}",
            self.tables.len(),
            self.retention
        );

        let mut interval = tokio::time::interval(self.cleanup_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.do_cleanup().await;
                },
                _ = cancellation.cancelled() => {
                    break;
                }
            }
        }

        debug!("Stopping retention task");
        Ok(())
    }

    /// Runs one cleanup round. Failures are logged per table and retried next round.
    pub async fn do_cleanup(&self) -> u64 {
        let cutoff = MicrosSinceEpoch::now().saturating_sub(self.retention);
        let mut total = 0;
        for table in &self.tables {
            match self.sink.delete_older_than(table, cutoff).await {
                Ok(0) => {}
                Ok(deleted) => {
                    info!("Deleted {deleted} expired records from '{table}'");
                    total += deleted;
                }
                Err(err) => warn!("Failed to delete expired records from '{table}': {err}"),
            }
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use googletest::prelude::*;

    use shardsync_storage_api::memory::InMemorySink;
    use shardsync_storage_api::schema::{SchemaProvisioner, TableSpec};
    use shardsync_storage_api::SinkRecord;

    use super::*;

    fn record(id: &str, timestamp: MicrosSinceEpoch) -> SinkRecord {
        SinkRecord {
            id: id.to_owned(),
            timestamp,
            fields: Default::default(),
        }
    }

    #[test_log::test(tokio::test)]
    async fn deletes_expired_records_of_all_tables() -> googletest::Result<()> {
        let sink = Arc::new(InMemorySink::default());
        for table in ["positions", "sync_audit"] {
            sink.ensure_table(&TableSpec::new(table)).await?;
        }
        let day = Duration::from_secs(24 * 60 * 60);
        let now = MicrosSinceEpoch::now();
        sink.put_batch(
            "positions",
            vec![
                record("old", now.saturating_sub(day * 3)),
                record("fresh", now.saturating_sub(Duration::from_secs(60))),
            ],
        )
        .await?;
        sink.put("sync_audit", record("old-audit", now.saturating_sub(day * 2)))
            .await?;

        let task = RetentionTask::new(
            sink.clone(),
            vec!["positions".to_owned(), "sync_audit".to_owned(), "missing".to_owned()],
            day,
            Duration::from_secs(60),
        );

        assert_that!(task.do_cleanup().await, eq(2));
        assert_that!(sink.records("positions").len(), eq(1));
        assert_that!(sink.records("sync_audit").len(), eq(0));
        Ok(())
    }
}
