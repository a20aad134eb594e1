// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use axum::extract::State;
use axum::Json;

use shardsync_types::checkpoint::Checkpoint;

use super::error::AdminApiError;
use crate::state::AdminServiceState;

/// Checkpoints of this node, one per configured table
pub async fn list_checkpoints(
    State(state): State<AdminServiceState>,
) -> Result<Json<Vec<Checkpoint>>, AdminApiError> {
    let node_index = state.node.identity.node_index();
    let tables = &state.node.configuration.sync.tables;

    let mut checkpoints = Vec::with_capacity(tables.len());
    for table in tables {
        checkpoints.push(state.node.checkpoints.get(&table.id, node_index).await?);
    }
    Ok(Json(checkpoints))
}
