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

use async_trait::async_trait;

use shardsync_types::time::MicrosSinceEpoch;

use crate::search::SearchQuery;
use crate::{Result, SinkRecord};

/// The operational store synced rows are written to. Tables have to be provisioned through a
/// [`crate::schema::SchemaProvisioner`] before use.
#[async_trait]
pub trait SinkStore: Send + Sync {
    async fn get(&self, table: &str, id: &str) -> Result<Option<SinkRecord>>;

    /// Inserts or replaces the record with the same id.
    async fn put(&self, table: &str, record: SinkRecord) -> Result<()> {
        self.put_batch(table, vec![record]).await
    }

    /// Upserts all records atomically. Once this returns `Ok` the records are durable.
    async fn put_batch(&self, table: &str, records: Vec<SinkRecord>) -> Result<()>;

    async fn search(&self, table: &str, query: &SearchQuery) -> Result<Vec<SinkRecord>>;

    /// Removes records with a timestamp before `cutoff`, returning how many were removed.
    async fn delete_older_than(&self, table: &str, cutoff: MicrosSinceEpoch) -> Result<u64>;
}

static_assertions::assert_obj_safe!(SinkStore);

/// Typed access to a single sink table.
#[derive(Clone)]
pub struct TableRepository {
    sink: Arc<dyn SinkStore>,
    table: String,
}

impl TableRepository {
    pub fn new(sink: Arc<dyn SinkStore>, table: impl Into<String>) -> Self {
        Self {
            sink,
            table: table.into(),
        }
    }

    pub async fn upsert_batch(&self, records: Vec<SinkRecord>) -> Result<()> {
        self.sink.put_batch(&self.table, records).await
    }

    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<SinkRecord>> {
        self.sink.search(&self.table, query).await
    }
}
