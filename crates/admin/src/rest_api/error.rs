// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::warn;

use shardsync_metadata_store::{ReadError, ReadModifyWriteError};
use shardsync_storage_api::SinkError;
use shardsync_types::control::UnknownAction;

/// This error is used by handlers to propagate API errors,
/// and later converted to a response through the IntoResponse implementation
#[derive(Debug, thiserror::Error)]
pub enum AdminApiError {
    #[error(transparent)]
    UnknownAction(#[from] UnknownAction),
    #[error("The sink table '{0}' is not synced by this node")]
    TableNotFound(String),
    #[error("The record '{id}' does not exist in table '{table}'")]
    RecordNotFound { table: String, id: String },
    #[error("Failed reading the control state: {0}")]
    ControlStateRead(#[from] ReadError),
    #[error("Failed writing the control state: {0}")]
    ControlStateWrite(#[from] ReadModifyWriteError),
    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// # Error description response
///
/// Error details of the response
#[derive(Debug, Serialize)]
struct ErrorDescriptionResponse {
    message: String,
}

impl IntoResponse for AdminApiError {
    fn into_response(self) -> Response {
        let status_code = match &self {
            AdminApiError::UnknownAction(_) => StatusCode::BAD_REQUEST,
            AdminApiError::TableNotFound(_)
            | AdminApiError::RecordNotFound { .. }
            | AdminApiError::Sink(SinkError::UnknownTable(_)) => StatusCode::NOT_FOUND,
            AdminApiError::ControlStateRead(_) | AdminApiError::ControlStateWrite(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AdminApiError::Sink(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status_code.is_server_error() {
            warn!("Admin request failed: {self}");
        }

        let body = Json(ErrorDescriptionResponse {
            message: self.to_string(),
        });
        (status_code, body).into_response()
    }
}
