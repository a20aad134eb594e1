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
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use shardsync_types::control::{Command, ControlState, CONTROL_STATE_KEY};
use shardsync_types::identifiers::NodeName;
use shardsync_types::Version;
use shardsync_worker::validation::ValidationReport;
use shardsync_worker::{FailureRecord, SyncEngineStatus};

use super::error::AdminApiError;
use crate::state::AdminServiceState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncControlStatusResponse {
    /// The stored control record, `None` until the cluster was bootstrapped.
    pub global: Option<ControlState>,
    pub worker: WorkerStatusResponse,
    /// Seconds since this node started.
    pub uptime: u64,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatusResponse {
    pub node_id: NodeName,
    pub running: bool,
    pub tables: Vec<SyncEngineStatus>,
    pub failed_engines: Vec<FailureRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_applied_version: Option<Version>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_validation: Option<ValidationReport>,
}

#[derive(Debug, Deserialize)]
pub struct SyncControlRequest {
    pub action: String,
}

#[derive(Debug, Serialize)]
pub struct SyncControlResponse {
    pub message: String,
    pub version: Version,
}

/// Control record and the sync status of this node
pub async fn get_sync_control(
    State(state): State<AdminServiceState>,
) -> Result<Json<SyncControlStatusResponse>, AdminApiError> {
    let global = state
        .node
        .metadata
        .get::<ControlState>(CONTROL_STATE_KEY.clone())
        .await?;

    let worker = match state.manager() {
        Some(manager) => {
            let status = manager.status();
            WorkerStatusResponse {
                node_id: state.node.node_name.clone(),
                running: status.running(),
                tables: status.engines,
                failed_engines: status.failed_engines,
                status: None,
                last_applied_version: status.last_applied_version,
                last_validation: status.last_validation,
            }
        }
        None => {
            warn!("Status requested before the sync control manager was initialized");
            WorkerStatusResponse {
                node_id: state.node.node_name.clone(),
                running: false,
                tables: Vec::new(),
                failed_engines: Vec::new(),
                status: Some("initializing"),
                last_applied_version: None,
                last_validation: None,
            }
        }
    };

    Ok(Json(SyncControlStatusResponse {
        global,
        worker,
        uptime: state.node.started_at.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION"),
    }))
}

/// Issue a command to every node of the cluster
pub async fn post_sync_control(
    State(state): State<AdminServiceState>,
    Json(SyncControlRequest { action }): Json<SyncControlRequest>,
) -> Result<Json<SyncControlResponse>, AdminApiError> {
    let command: Command = action.parse()?;
    if state.manager().is_none() {
        warn!("Sync control manager is not initialized yet; '{command}' is applied once it is");
    }

    let issued_by = state.node.node_name.clone();
    let control_state = state
        .node
        .metadata
        .read_modify_write(CONTROL_STATE_KEY.clone(), |current: Option<ControlState>| {
            Ok::<_, String>(ControlState::successor(
                current.as_ref(),
                command.clone(),
                issued_by.clone(),
            ))
        })
        .await?;

    info!(
        version = %control_state.version,
        "Command '{}' issued to the cluster", control_state.command
    );
    Ok(Json(SyncControlResponse {
        message: format!("{} command issued to cluster", control_state.command),
        version: control_state.version,
    }))
}
