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

use shardsync_storage_api::{SinkError, SourceError};
use shardsync_types::errors::MaybeRetryableError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
    #[error("sync task terminated unexpectedly")]
    TaskTerminated,
}

impl MaybeRetryableError for EngineError {
    fn retryable(&self) -> bool {
        match self {
            EngineError::Source(err) => err.retryable(),
            EngineError::Sink(err) => err.retryable(),
            EngineError::Timeout { .. } => true,
            EngineError::TaskTerminated => false,
        }
    }
}
