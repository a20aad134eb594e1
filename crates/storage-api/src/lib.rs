// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Interfaces of the systems a node reads from and writes to: the analytical source, the
//! operational sink and the per-node checkpoint storage.

pub mod audit;
pub mod checkpoint_table;
pub mod record;
pub mod schema;
pub mod search;
pub mod sink;
pub mod source;

#[cfg(any(test, feature = "test-util"))]
pub mod memory;

use shardsync_types::errors::{GenericError, MaybeRetryableError};

pub use record::{Row, SinkRecord};

/// Errors returned by a [`source::SourceClient`].
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Transport level failure, worth retrying.
    #[error("source request failed: {0}")]
    Request(GenericError),
    /// The source rejected the query.
    #[error("source rejected query: {0}")]
    Rejected(String),
    #[error("failed to decode source response: {0}")]
    Decode(GenericError),
}

impl MaybeRetryableError for SourceError {
    fn retryable(&self) -> bool {
        matches!(self, SourceError::Request(_))
    }
}

/// Errors returned by a [`sink::SinkStore`] or a [`checkpoint_table::CheckpointStore`].
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("storage error: {0}")]
    Storage(GenericError),
    #[error("table '{0}' does not exist")]
    UnknownTable(String),
    #[error("codec error: {0}")]
    Codec(GenericError),
}

impl MaybeRetryableError for SinkError {
    fn retryable(&self) -> bool {
        matches!(self, SinkError::Storage(_))
    }
}

pub type Result<T, E = SinkError> = std::result::Result<T, E>;
