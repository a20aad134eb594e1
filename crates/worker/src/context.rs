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

use shardsync_metadata_store::MetadataStoreClient;
use shardsync_storage_api::audit::AuditLog;
use shardsync_storage_api::checkpoint_table::CheckpointStore;
use shardsync_storage_api::schema::SchemaProvisioner;
use shardsync_storage_api::sink::SinkStore;
use shardsync_storage_api::source::SourceClient;
use shardsync_types::config::Configuration;
use shardsync_types::identifiers::{NodeIdentity, NodeName};
use shardsync_types::partitioning::PartitionPredicate;
use shardsync_types::time::MillisSinceEpoch;

use crate::validation::PartitionValidator;
use crate::{EngineContext, EngineOptions, SyncEngine};

/// Everything a node's components share. Built once at startup and handed to every component
/// that needs it.
#[derive(Clone)]
pub struct NodeContext {
    pub identity: NodeIdentity,
    pub node_name: NodeName,
    pub configuration: Arc<Configuration>,
    pub metadata: MetadataStoreClient,
    pub source: Arc<dyn SourceClient>,
    pub sink: Arc<dyn SinkStore>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub schema: Arc<dyn SchemaProvisioner>,
    pub started_at: MillisSinceEpoch,
}

impl NodeContext {
    pub fn audit_log(&self) -> AuditLog {
        AuditLog::new(Arc::clone(&self.sink))
    }

    pub fn engine_context(&self) -> EngineContext {
        EngineContext {
            source: Arc::clone(&self.source),
            sink: Arc::clone(&self.sink),
            checkpoints: Arc::clone(&self.checkpoints),
            audit: Some(self.audit_log()),
            partition: PartitionPredicate::for_node(self.identity),
            options: EngineOptions::from(&self.configuration.sync),
        }
    }

    /// One engine per configured table, in configuration order.
    pub fn build_engines(&self) -> Vec<Arc<SyncEngine>> {
        self.configuration
            .sync
            .tables
            .iter()
            .map(|table| Arc::new(SyncEngine::new(table.clone(), self.engine_context())))
            .collect()
    }

    pub fn build_validator(&self) -> PartitionValidator {
        PartitionValidator::new(
            self.configuration.sync.tables.clone(),
            self.engine_context(),
            self.configuration.sync.retention(),
        )
    }
}
