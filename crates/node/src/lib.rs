// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

mod provisioning;

use std::sync::Arc;

use futures::future::join_all;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use shardsync_admin::{AdminService, AdminServiceState};
use shardsync_metadata_store::{EtcdMetadataStore, InMemoryMetadataStore, MetadataStoreClient};
use shardsync_source_bigquery::BigQuerySource;
use shardsync_storage_rocksdb::RocksDbSink;
use shardsync_types::config::{Configuration, InvalidConfigurationError, MetadataStoreKind};
use shardsync_types::time::MillisSinceEpoch;
use shardsync_worker::retention::RetentionTask;
use shardsync_worker::{NodeContext, SyncControlManager};

pub use provisioning::provision_tables;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid configuration: {0}")]
    Configuration(#[from] InvalidConfigurationError),
    #[error("building sink failed: {0}")]
    Sink(#[from] shardsync_storage_rocksdb::BuildError),
    #[error("building source failed: {0}")]
    Source(#[from] shardsync_source_bigquery::BuildError),
    #[error("connecting to the metadata store failed: {0:#}")]
    MetadataStore(anyhow::Error),
}

pub struct Node {
    ctx: NodeContext,
}

impl Node {
    /// Validates the configuration and connects to the metadata store, the source and the sink.
    pub async fn create(configuration: Configuration) -> Result<Self, BuildError> {
        configuration.validate()?;
        let identity = configuration
            .sync
            .node_identity()
            .map_err(InvalidConfigurationError::from)?;
        let node_name = configuration.node_name();

        let metadata_options = &configuration.metadata_store;
        let metadata = match &metadata_options.kind {
            MetadataStoreKind::InMemory => {
                if identity.cluster_size() > 1 {
                    warn!(
                        "Using the in-memory metadata store in a cluster of {} nodes; commands will not reach the other nodes",
                        identity.cluster_size()
                    );
                }
                MetadataStoreClient::new(
                    InMemoryMetadataStore::default(),
                    Some(metadata_options.retry_policy.clone()),
                )
            }
            MetadataStoreKind::Etcd { addresses } => MetadataStoreClient::new(
                EtcdMetadataStore::new(addresses)
                    .await
                    .map_err(BuildError::MetadataStore)?,
                Some(metadata_options.retry_policy.clone()),
            ),
        };

        let sink = Arc::new(
            RocksDbSink::open(&configuration.sink, &configuration.common.base_dir()).await?,
        );
        let source = Arc::new(BigQuerySource::new(configuration.source.clone())?);

        info!(%identity, %node_name, "Created node with {} tables", configuration.sync.tables.len());
        Ok(Self {
            ctx: NodeContext {
                identity,
                node_name,
                configuration: Arc::new(configuration),
                metadata,
                source,
                sink: sink.clone(),
                checkpoints: sink.clone(),
                schema: sink,
                started_at: MillisSinceEpoch::now(),
            },
        })
    }

    pub fn context(&self) -> &NodeContext {
        &self.ctx
    }

    /// Runs the node until `cancellation` fires or one of its components fails. On the way out
    /// all sync engines are stopped.
    pub async fn run(self, cancellation: CancellationToken) -> anyhow::Result<()> {
        provision_tables(&self.ctx).await?;

        let configuration = Arc::clone(&self.ctx.configuration);
        let mut tasks: JoinSet<anyhow::Result<()>> = JoinSet::new();

        let admin_state = AdminServiceState::new(self.ctx.clone());
        tasks.spawn(
            AdminService::new(admin_state.clone())
                .run(configuration.admin.bind_address, cancellation.child_token()),
        );

        let manager = Arc::new(SyncControlManager::from_context(&self.ctx));
        admin_state.set_manager(Arc::clone(&manager));
        tasks.spawn({
            let manager = Arc::clone(&manager);
            let cancellation = cancellation.child_token();
            async move {
                manager.run(cancellation).await;
                Ok(())
            }
        });

        if let Some(retention) = configuration.sync.retention() {
            let tables = configuration
                .sync
                .tables
                .iter()
                .map(|table| table.target_table.clone())
                .chain(std::iter::once(
                    shardsync_types::config::AUDIT_TABLE.to_owned(),
                ))
                .collect();
            tasks.spawn(
                RetentionTask::new(
                    Arc::clone(&self.ctx.sink),
                    tables,
                    retention,
                    *configuration.sync.cleanup_interval,
                )
                .run(cancellation.child_token()),
            );
        }

        info!("Node started");
        let result = tokio::select! {
            _ = cancellation.cancelled() => Ok(()),
            Some(result) = tasks.join_next() => {
                let result = match result {
                    Ok(Ok(())) => Err(anyhow::anyhow!("node component terminated unexpectedly")),
                    Ok(Err(err)) => Err(err),
                    Err(err) => Err(anyhow::Error::new(err).context("node component panicked")),
                };
                if let Err(err) = &result {
                    error!("Shutting down node: {err:#}");
                }
                cancellation.cancel();
                result
            }
        };

        info!("Stopping sync engines");
        for (engine, stopped) in manager
            .engines()
            .iter()
            .zip(join_all(manager.engines().iter().map(|engine| engine.stop())).await)
        {
            if let Err(err) = stopped {
                warn!(table_id = %engine.table_id(), "Failed to stop sync engine cleanly: {err}");
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Ok(Err(err)) = joined {
                warn!("Node component failed during shutdown: {err:#}");
            }
        }
        info!("Node stopped");
        result
    }
}
