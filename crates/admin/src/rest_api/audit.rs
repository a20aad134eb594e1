// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::time::Duration;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use shardsync_storage_api::audit::AuditRecord;

use super::error::AdminApiError;
use crate::state::AdminServiceState;

const DEFAULT_AUDIT_HOURS: u64 = 24;

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    hours: Option<u64>,
}

/// Audited batches of the last hours, newest first
pub async fn recent_audit_records(
    State(state): State<AdminServiceState>,
    Query(AuditQuery { hours }): Query<AuditQuery>,
) -> Result<Json<Vec<AuditRecord>>, AdminApiError> {
    let hours = hours.unwrap_or(DEFAULT_AUDIT_HOURS);
    let records = state
        .node
        .audit_log()
        .recent(Duration::from_secs(hours.saturating_mul(60 * 60)))
        .await?;
    Ok(Json(records))
}
