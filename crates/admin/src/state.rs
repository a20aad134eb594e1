// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::sync::{Arc, OnceLock};

use tracing::debug;

use shardsync_types::config::AUDIT_TABLE;
use shardsync_worker::{NodeContext, SyncControlManager};

#[derive(Clone)]
pub struct AdminServiceState {
    pub node: NodeContext,
    manager: Arc<OnceLock<Arc<SyncControlManager>>>,
}

impl AdminServiceState {
    pub fn new(node: NodeContext) -> Self {
        Self {
            node,
            manager: Arc::default(),
        }
    }

    /// Makes the manager visible to the status endpoint. Until then the node reports itself as
    /// initializing.
    pub fn set_manager(&self, manager: Arc<SyncControlManager>) {
        if self.manager.set(manager).is_err() {
            debug!("Sync control manager was already registered");
        }
    }

    pub fn manager(&self) -> Option<&Arc<SyncControlManager>> {
        self.manager.get()
    }

    /// Whether `table` is a sink table written by this node.
    pub fn is_sink_table(&self, table: &str) -> bool {
        table == AUDIT_TABLE
            || self
                .node
                .configuration
                .sync
                .tables
                .iter()
                .any(|options| options.target_table == table)
    }
}
