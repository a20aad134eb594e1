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
use rocksdb::{BoundColumnFamily, IteratorMode, ReadOptions, WriteBatch};
use tracing::{debug, info};

use shardsync_storage_api::schema::{EnsureOutcome, SchemaProvisioner, TableSpec};
use shardsync_storage_api::search::{Direction, SearchQuery, TIMESTAMP_FIELD};
use shardsync_storage_api::sink::SinkStore;
use shardsync_storage_api::{Result, SinkError, SinkRecord};
use shardsync_types::time::MicrosSinceEpoch;

use crate::keys::{decode_index_key, index_cf, index_key, index_prefix, table_cf};
use crate::{codec_error, cf_options, storage_error, RocksDbSink};

type TableHandles<'a> = (Arc<BoundColumnFamily<'a>>, Arc<BoundColumnFamily<'a>>);

impl RocksDbSink {
    /// Handles of the records and of the timestamp index of a table.
    fn table_handles(&self, table: &str) -> Result<TableHandles<'_>> {
        let unknown = || SinkError::UnknownTable(table.to_owned());
        let records = self.db.cf_handle(&table_cf(table)).ok_or_else(unknown)?;
        let index = self.db.cf_handle(&index_cf(table)).ok_or_else(unknown)?;
        Ok((records, index))
    }

    fn read_record(
        &self,
        records: &Arc<BoundColumnFamily<'_>>,
        id: &str,
    ) -> Result<Option<SinkRecord>> {
        self.db
            .get_pinned_cf(records, id.as_bytes())
            .map_err(storage_error)?
            .map(|value| serde_json::from_slice(&value).map_err(codec_error))
            .transpose()
    }

    /// Visits the records with a timestamp in `[from, to]` in timestamp order (reversed if
    /// `reverse`) until `visit` returns `false`.
    ///
    /// Index entries whose record moved to another timestamp or is gone are skipped.
    fn scan_range(
        &self,
        table: &str,
        from: MicrosSinceEpoch,
        to: MicrosSinceEpoch,
        reverse: bool,
        mut visit: impl FnMut(SinkRecord) -> bool,
    ) -> Result<()> {
        if from > to {
            return Ok(());
        }
        let (records, index) = self.table_handles(table)?;
        let mut read_options = ReadOptions::default();
        read_options.set_iterate_lower_bound(index_prefix(from).to_vec());
        if let Some(upper) = to.as_i64().checked_add(1) {
            let upper = index_prefix(MicrosSinceEpoch::new(upper));
            read_options.set_iterate_upper_bound(upper.to_vec());
        }
        let mode = if reverse {
            IteratorMode::End
        } else {
            IteratorMode::Start
        };

        for entry in self.db.iterator_cf_opt(&index, read_options, mode) {
            let (key, _) = entry.map_err(storage_error)?;
            let Some((timestamp, id)) = decode_index_key(&key) else {
                continue;
            };
            let Some(record) = self.read_record(&records, id)? else {
                continue;
            };
            if record.timestamp != timestamp {
                continue;
            }
            if !visit(record) {
                break;
            }
        }
        Ok(())
    }

    /// Returns whether the column family had to be created.
    fn ensure_cf(&self, name: &str) -> Result<bool> {
        if self.db.cf_handle(name).is_some() {
            return Ok(false);
        }
        match self.db.create_cf(name, &cf_options()) {
            Ok(()) => Ok(true),
            // lost a race against a concurrent ensure_table
            Err(_) if self.db.cf_handle(name).is_some() => Ok(false),
            Err(err) => Err(storage_error(err)),
        }
    }
}

#[async_trait]
impl SinkStore for RocksDbSink {
    async fn get(&self, table: &str, id: &str) -> Result<Option<SinkRecord>> {
        let table = table.to_owned();
        let id = id.to_owned();
        self.run_blocking(move |sink| {
            let (records, _) = sink.table_handles(&table)?;
            sink.read_record(&records, &id)
        })
        .await
    }

    async fn put_batch(&self, table: &str, records: Vec<SinkRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let table = table.to_owned();
        self.run_blocking(move |sink| {
            let _guard = sink.write_lock.lock();
            let (records_handle, index_handle) = sink.table_handles(&table)?;
            let mut batch = WriteBatch::default();
            for record in &records {
                if let Some(previous) = sink.read_record(&records_handle, &record.id)? {
                    if previous.timestamp != record.timestamp {
                        batch.delete_cf(&index_handle, index_key(previous.timestamp, &previous.id));
                    }
                }
                let value = serde_json::to_vec(record).map_err(codec_error)?;
                batch.put_cf(&records_handle, record.id.as_bytes(), value);
                batch.put_cf(&index_handle, index_key(record.timestamp, &record.id), b"");
            }
            sink.db
                .write_opt(batch, &sink.write_options())
                .map_err(storage_error)?;
            debug!("Wrote {} records to '{}'", records.len(), table);
            Ok(())
        })
        .await
    }

    async fn search(&self, table: &str, query: &SearchQuery) -> Result<Vec<SinkRecord>> {
        let table = table.to_owned();
        let query = query.clone();
        self.run_blocking(move |sink| {
            let (from, to) = query.timestamp_bounds();
            // without order or ordered by timestamp, index order is the result order
            let index_order = match &query.order_by {
                None => Some(false),
                Some(order_by) if order_by.field == TIMESTAMP_FIELD => {
                    Some(order_by.direction == Direction::Desc)
                }
                Some(_) => None,
            };

            let mut matching = Vec::new();
            match index_order {
                Some(reverse) => {
                    let limit = query.limit.unwrap_or(usize::MAX);
                    if limit > 0 {
                        sink.scan_range(&table, from, to, reverse, |record| {
                            if query.matches(&record) {
                                matching.push(record);
                            }
                            matching.len() < limit
                        })?;
                    }
                    Ok(matching)
                }
                None => {
                    sink.scan_range(&table, from, to, false, |record| {
                        if query.matches(&record) {
                            matching.push(record);
                        }
                        true
                    })?;
                    Ok(query.evaluate(matching))
                }
            }
        })
        .await
    }

    async fn delete_older_than(&self, table: &str, cutoff: MicrosSinceEpoch) -> Result<u64> {
        let table = table.to_owned();
        self.run_blocking(move |sink| {
            let _guard = sink.write_lock.lock();
            let (records_handle, index_handle) = sink.table_handles(&table)?;
            let mut read_options = ReadOptions::default();
            read_options.set_iterate_upper_bound(index_prefix(cutoff).to_vec());

            let mut batch = WriteBatch::default();
            let mut deleted = 0;
            for entry in sink
                .db
                .iterator_cf_opt(&index_handle, read_options, IteratorMode::Start)
            {
                let (key, _) = entry.map_err(storage_error)?;
                batch.delete_cf(&index_handle, &key);
                let Some((timestamp, id)) = decode_index_key(&key) else {
                    continue;
                };
                // a record that moved to a newer timestamp only loses its stale index entry
                if sink
                    .read_record(&records_handle, id)?
                    .is_some_and(|record| record.timestamp == timestamp)
                {
                    batch.delete_cf(&records_handle, id.as_bytes());
                    deleted += 1;
                }
            }
            if !batch.is_empty() {
                sink.db
                    .write_opt(batch, &sink.write_options())
                    .map_err(storage_error)?;
            }
            Ok(deleted)
        })
        .await
    }
}

#[async_trait]
impl SchemaProvisioner for RocksDbSink {
    async fn ensure_table(&self, spec: &TableSpec) -> Result<EnsureOutcome> {
        let name = spec.name.clone();
        self.run_blocking(move |sink| {
            let created = sink.ensure_cf(&table_cf(&name))?;
            sink.ensure_cf(&index_cf(&name))?;
            if created {
                info!("Created sink table '{}'", name);
                Ok(EnsureOutcome::Created)
            } else {
                Ok(EnsureOutcome::Exists)
            }
        })
        .await
    }
}
