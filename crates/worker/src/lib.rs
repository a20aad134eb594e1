// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Per table sync engines and the node local jobs around them.

mod context;
mod control_manager;
mod engine;
mod error;
mod poll;
pub mod retention;
pub mod validation;

use std::sync::Arc;
use std::time::Duration;

use shardsync_storage_api::audit::AuditLog;
use shardsync_storage_api::checkpoint_table::CheckpointStore;
use shardsync_storage_api::sink::SinkStore;
use shardsync_storage_api::source::SourceClient;
use shardsync_types::config::SyncOptions;
use shardsync_types::partitioning::PartitionPredicate;
use shardsync_types::retries::RetryPolicy;

pub use context::NodeContext;
pub use control_manager::{ApplyOutcome, FailureRecord, ManagerStatus, SyncControlManager};
pub use engine::{SyncEngine, SyncEngineStatus, SyncPhase};
pub use error::EngineError;
pub use poll::PollOutcome;

/// Tuning of the poll loop shared by all engines of a node.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub batch_size: usize,
    pub generation_interval: Duration,
    pub operation_timeout: Duration,
    pub retry_policy: RetryPolicy,
}

impl From<&SyncOptions> for EngineOptions {
    fn from(options: &SyncOptions) -> Self {
        Self {
            batch_size: options.batch_size(),
            generation_interval: *options.generation_interval,
            operation_timeout: *options.operation_timeout,
            retry_policy: options.retry_policy.clone(),
        }
    }
}

/// Systems and settings every engine of a node works with.
#[derive(Clone)]
pub struct EngineContext {
    pub source: Arc<dyn SourceClient>,
    pub sink: Arc<dyn SinkStore>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    /// Batches are audited if set.
    pub audit: Option<AuditLog>,
    pub partition: PartitionPredicate,
    pub options: EngineOptions,
}
