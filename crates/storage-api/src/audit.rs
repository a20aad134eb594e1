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

use serde_json::Value;

use shardsync_types::config::AUDIT_TABLE;
use shardsync_types::identifiers::{NodeIndex, TableId};
use shardsync_types::time::MicrosSinceEpoch;

use crate::search::{Direction, SearchQuery, TIMESTAMP_FIELD};
use crate::sink::{SinkStore, TableRepository};
use crate::{Result, SinkError, SinkRecord};

/// One committed batch of a table sync.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub id: String,
    pub table_id: TableId,
    pub node_index: NodeIndex,
    pub rows: u64,
    /// Checkpoint after the batch was committed.
    pub checkpoint: MicrosSinceEpoch,
    pub recorded_at: MicrosSinceEpoch,
}

impl AuditRecord {
    pub fn new(
        table_id: TableId,
        node_index: NodeIndex,
        rows: u64,
        checkpoint: MicrosSinceEpoch,
    ) -> Self {
        let recorded_at = MicrosSinceEpoch::now();
        Self {
            id: format!("{table_id}:{node_index}:{}", recorded_at.as_i64()),
            table_id,
            node_index,
            rows,
            checkpoint,
            recorded_at,
        }
    }

    fn into_sink_record(self) -> Result<SinkRecord> {
        let id = self.id.clone();
        let recorded_at = self.recorded_at;
        match serde_json::to_value(self).map_err(|err| SinkError::Codec(err.into()))? {
            Value::Object(fields) => Ok(SinkRecord {
                id,
                timestamp: recorded_at,
                fields,
            }),
            _ => Err(SinkError::Codec("audit record is not a json object".into())),
        }
    }

    fn from_sink_record(record: SinkRecord) -> Result<Self> {
        serde_json::from_value(Value::Object(record.fields))
            .map_err(|err| SinkError::Codec(err.into()))
    }
}

/// Repository of the reserved audit table.
#[derive(Clone)]
pub struct AuditLog {
    repository: TableRepository,
}

impl AuditLog {
    pub fn new(sink: Arc<dyn SinkStore>) -> Self {
        Self {
            repository: TableRepository::new(sink, AUDIT_TABLE),
        }
    }

    pub async fn append(&self, record: AuditRecord) -> Result<()> {
        self.repository
            .upsert_batch(vec![record.into_sink_record()?])
            .await
    }

    /// Audit records of the last `window`, newest first.
    pub async fn recent(&self, window: Duration) -> Result<Vec<AuditRecord>> {
        let since = MicrosSinceEpoch::now().saturating_sub(window);
        let query = SearchQuery::time_range(since, MicrosSinceEpoch::MAX)
            .order_by(TIMESTAMP_FIELD, Direction::Desc);

        self.repository
            .search(&query)
            .await?
            .into_iter()
            .map(AuditRecord::from_sink_record)
            .collect()
    }
}
