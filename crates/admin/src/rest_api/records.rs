// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use axum::extract::{Path, State};
use axum::Json;
use tracing::debug;

use shardsync_storage_api::search::SearchQuery;
use shardsync_storage_api::SinkRecord;

use super::error::AdminApiError;
use crate::state::AdminServiceState;

/// Get a synced record
pub async fn get_record(
    State(state): State<AdminServiceState>,
    Path((table, id)): Path<(String, String)>,
) -> Result<Json<SinkRecord>, AdminApiError> {
    if !state.is_sink_table(&table) {
        return Err(AdminApiError::TableNotFound(table));
    }

    state
        .node
        .sink
        .get(&table, &id)
        .await?
        .map(Json)
        .ok_or(AdminApiError::RecordNotFound { table, id })
}

/// Search the synced records of a table
pub async fn search_records(
    State(state): State<AdminServiceState>,
    Path(table): Path<String>,
    Json(query): Json<SearchQuery>,
) -> Result<Json<Vec<SinkRecord>>, AdminApiError> {
    if !state.is_sink_table(&table) {
        return Err(AdminApiError::TableNotFound(table));
    }

    let records = state.node.sink.search(&table, &query).await?;
    debug!("Search on '{table}' returned {} records", records.len());
    Ok(Json(records))
}
