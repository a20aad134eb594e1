// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! This module implements the admin API endpoint.

mod audit;
mod checkpoints;
mod error;
mod health;
mod records;
mod sync_control;

use axum::routing::{get, post};

use crate::state::AdminServiceState;

pub fn create_router(state: AdminServiceState) -> axum::Router<()> {
    axum::Router::new()
        .route(
            "/sync-control",
            get(sync_control::get_sync_control).post(sync_control::post_sync_control),
        )
        .route("/sync-audit", get(audit::recent_audit_records))
        .route("/checkpoints", get(checkpoints::list_checkpoints))
        .route("/tables/:table/records/:id", get(records::get_record))
        .route("/tables/:table/search", post(records::search_records))
        .route("/health", get(health::health))
        .with_state(state)
}
