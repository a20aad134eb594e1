// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Applies the replicated [`ControlState`] to the sync engines of this node.
//!
//! Every node runs its own manager; there is no leader. Each manager watches the control
//! record and applies every version newer than the last one it applied. Commands are
//! idempotent and partitions are disjoint, so nodes applying the same version independently
//! converge without coordination.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use shardsync_metadata_store::MetadataStoreClient;
use shardsync_types::control::{Command, ControlState, CONTROL_STATE_KEY};
use shardsync_types::identifiers::{NodeName, TableId};
use shardsync_types::time::MillisSinceEpoch;
use shardsync_types::Version;

use crate::context::NodeContext;
use crate::validation::{ValidationReport, ValidationRunner};
use crate::{SyncEngine, SyncEngineStatus};

/// An engine whose most recent start attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    pub table_id: TableId,
    pub error_message: String,
    pub observed_at: MillisSinceEpoch,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerStatus {
    pub node_name: NodeName,
    pub current_command: Option<Command>,
    pub last_applied_version: Option<Version>,
    pub is_applying: bool,
    pub engines: Vec<SyncEngineStatus>,
    pub failed_engines: Vec<FailureRecord>,
    pub last_validation: Option<ValidationReport>,
}

impl ManagerStatus {
    /// Whether the last applied command started the engines.
    pub fn running(&self) -> bool {
        self.current_command == Some(Command::Start)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ApplyOutcome {
    Applied,
    /// Another command was being applied.
    Dropped,
    /// Not newer than the last applied version.
    Stale,
    /// The command is not known to this node. The applied version is not advanced.
    Ignored,
}

#[derive(Default)]
struct ManagerState {
    current_command: Option<Command>,
    last_applied_version: Option<Version>,
    failed_engines: Vec<FailureRecord>,
    last_validation: Option<ValidationReport>,
}

impl ManagerState {
    fn supersedes(&self, version: Version) -> bool {
        self.last_applied_version
            .map_or(true, |applied| version > applied)
    }
}

/// Resets the single-flight flag when the apply call completes or is cancelled.
struct ApplyingGuard<'a>(&'a AtomicBool);

impl Drop for ApplyingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SyncControlManager {
    node_name: NodeName,
    metadata: MetadataStoreClient,
    engines: Vec<Arc<SyncEngine>>,
    validator: Option<Arc<dyn ValidationRunner>>,
    resubscribe_delay: Duration,
    is_applying: AtomicBool,
    state: Mutex<ManagerState>,
}

impl SyncControlManager {
    pub fn new(
        node_name: NodeName,
        metadata: MetadataStoreClient,
        engines: Vec<Arc<SyncEngine>>,
        validator: Option<Arc<dyn ValidationRunner>>,
        resubscribe_delay: Duration,
    ) -> Self {
        Self {
            node_name,
            metadata,
            engines,
            validator,
            resubscribe_delay,
            is_applying: AtomicBool::new(false),
            state: Mutex::default(),
        }
    }

    /// Manager over one engine per configured table, validating with a
    /// [`crate::validation::PartitionValidator`].
    pub fn from_context(ctx: &NodeContext) -> Self {
        Self::new(
            ctx.node_name.clone(),
            ctx.metadata.clone(),
            ctx.build_engines(),
            Some(Arc::new(ctx.build_validator())),
            *ctx.configuration.metadata_store.resubscribe_delay,
        )
    }

    pub fn engines(&self) -> &[Arc<SyncEngine>] {
        &self.engines
    }

    /// Snapshot of the manager and its engines. Never waits for an in-flight command.
    pub fn status(&self) -> ManagerStatus {
        let state = self.state.lock();
        ManagerStatus {
            node_name: self.node_name.clone(),
            current_command: state.current_command.clone(),
            last_applied_version: state.last_applied_version,
            is_applying: self.is_applying.load(Ordering::Acquire),
            engines: self.engines.iter().map(|engine| engine.status()).collect(),
            failed_engines: state.failed_engines.clone(),
            last_validation: state.last_validation.clone(),
        }
    }

    /// Follows the control record until cancelled. Whenever the subscription breaks or ends,
    /// the manager waits for the resubscribe delay and initializes again from scratch.
    pub async fn run(self: Arc<Self>, cancellation: CancellationToken) {
        loop {
            tokio::select! {
                result = self.initialize() => match result {
                    Ok(()) => warn!("Control subscription ended"),
                    Err(err) => warn!("Control subscription failed: {err:#}"),
                },
                _ = cancellation.cancelled() => break,
            }

            debug!(
                "Re-initializing control subscription in {:?}",
                self.resubscribe_delay
            );
            tokio::select! {
                _ = tokio::time::sleep(self.resubscribe_delay) => {},
                _ = cancellation.cancelled() => break,
            }
        }
        debug!("Sync control manager stopped");
    }

    /// Reads (or bootstraps) the control record, applies it and follows its updates. Returns
    /// when the subscription ends.
    pub async fn initialize(&self) -> anyhow::Result<()> {
        let current = self
            .metadata
            .get_or_insert(CONTROL_STATE_KEY.clone(), ControlState::bootstrap)
            .await?;
        info!(
            version = %current.version,
            "Control record is '{}'", current.command
        );
        self.observe(current).await?;

        let mut updates = self
            .metadata
            .watch::<ControlState>(CONTROL_STATE_KEY.clone())
            .await?;
        while let Some(update) = updates.next().await {
            self.observe(update?).await?;
        }
        Ok(())
    }

    /// Applies `state` if it is newer than the last applied version. Afterwards the stored
    /// record is read again, so a version that arrived while applying is never lost.
    async fn observe(&self, state: ControlState) -> anyhow::Result<()> {
        let mut next = Some(state);
        while let Some(state) = next.take() {
            if !self.state.lock().supersedes(state.version) {
                debug!(version = %state.version, "Discarding stale control record");
                continue;
            }

            let applied_version = state.version;
            self.apply_command(state).await;

            next = self
                .metadata
                .get::<ControlState>(CONTROL_STATE_KEY.clone())
                .await?
                .filter(|stored| {
                    stored.version > applied_version && self.state.lock().supersedes(stored.version)
                });
        }
        Ok(())
    }

    /// Applies a command to the local engines. At most one command is applied at a time;
    /// a call while another one is in flight is dropped.
    pub async fn apply_command(&self, state: ControlState) -> ApplyOutcome {
        if self
            .is_applying
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(
                version = %state.version,
                "Another command is being applied, dropping '{}'", state.command
            );
            return ApplyOutcome::Dropped;
        }
        let _guard = ApplyingGuard(&self.is_applying);

        if !self.state.lock().supersedes(state.version) {
            return ApplyOutcome::Stale;
        }

        info!(
            version = %state.version,
            commanded_by = ?state.commanded_by,
            "Applying command '{}'", state.command
        );
        match &state.command {
            Command::Start => self.start_engines().await,
            Command::Stop => self.stop_engines().await,
            Command::Validate => self.validate().await,
            Command::Unrecognized(command) => {
                warn!(version = %state.version, "Ignoring unrecognized command '{command}'");
                return ApplyOutcome::Ignored;
            }
        }

        self.state.lock().last_applied_version = Some(state.version);
        ApplyOutcome::Applied
    }

    async fn start_engines(&self) {
        let results = join_all(self.engines.iter().map(|engine| async move {
            (engine.table_id().clone(), engine.start().await)
        }))
        .await;

        let failures: Vec<_> = results
            .into_iter()
            .filter_map(|(table_id, result)| {
                result.err().map(|err| {
                    warn!(%table_id, "Failed to start sync engine: {err}");
                    FailureRecord {
                        table_id,
                        error_message: err.to_string(),
                        observed_at: MillisSinceEpoch::now(),
                    }
                })
            })
            .collect();
        if failures.is_empty() {
            info!("Started {} sync engines", self.engines.len());
        } else {
            warn!(
                "Started {} of {} sync engines",
                self.engines.len() - failures.len(),
                self.engines.len()
            );
        }

        let mut state = self.state.lock();
        state.failed_engines = failures;
        state.current_command = Some(Command::Start);
    }

    async fn stop_engines(&self) {
        let results = join_all(self.engines.iter().map(|engine| async move {
            (engine.table_id().clone(), engine.stop().await)
        }))
        .await;
        for (table_id, result) in results {
            if let Err(err) = result {
                warn!(%table_id, "Failed to stop sync engine cleanly: {err}");
            }
        }

        let mut state = self.state.lock();
        state.failed_engines.clear();
        state.current_command = Some(Command::Stop);
    }

    async fn validate(&self) {
        let Some(validator) = &self.validator else {
            warn!("Validation requested but no validation runner is configured");
            return;
        };
        match validator.run_validation().await {
            Ok(report) => {
                info!(consistent = report.is_consistent(), "Validation finished");
                self.state.lock().last_validation = Some(report);
            }
            Err(err) => warn!("Validation failed: {err:#}"),
        }
    }
}

static_assertions::assert_impl_all!(SyncControlManager: Send, Sync);
