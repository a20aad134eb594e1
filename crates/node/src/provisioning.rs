// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use anyhow::Context;
use tracing::{debug, info};

use shardsync_storage_api::schema::{EnsureOutcome, TableSpec};
use shardsync_types::config::AUDIT_TABLE;
use shardsync_worker::NodeContext;

/// Creates the sink tables of every configured table and the audit table. Engines must not start
/// before this succeeded.
pub async fn provision_tables(ctx: &NodeContext) -> anyhow::Result<()> {
    let specs = ctx
        .configuration
        .sync
        .tables
        .iter()
        .map(|table| TableSpec::new(&table.target_table).with_key_fields(table.id_columns.clone()))
        .chain(std::iter::once(TableSpec::new(AUDIT_TABLE)));

    for spec in specs {
        let outcome = ctx
            .schema
            .ensure_table(&spec)
            .await
            .with_context(|| format!("failed to provision sink table '{}'", spec.name))?;
        match outcome {
            EnsureOutcome::Created => info!("Created sink table '{}'", spec.name),
            EnsureOutcome::Exists => debug!("Sink table '{}' exists", spec.name),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use googletest::prelude::*;

    use shardsync_types::config::{
        CommonOptionsBuilder, Configuration, SourceOptionsBuilder, TableOptionsBuilder,
    };

    use crate::Node;

    use super::*;

    fn configuration(base_dir: &std::path::Path) -> Configuration {
        let mut configuration = Configuration {
            common: CommonOptionsBuilder::default()
                .base_dir(Some(base_dir.to_path_buf()))
                .build()
                .unwrap(),
            source: SourceOptionsBuilder::default()
                .project_id("maritime-analytics".to_owned())
                .build()
                .unwrap(),
            ..Configuration::default()
        };
        configuration.sync.tables = vec![TableOptionsBuilder::default()
            .id("positions")
            .source_dataset("ais")
            .source_table("positions")
            .target_table("vessel_positions")
            .id_columns(vec!["mmsi".to_owned(), "timestamp".to_owned()])
            .build()
            .unwrap()];
        configuration
    }

    #[test_log::test(tokio::test)]
    async fn provisions_target_and_audit_tables() -> googletest::Result<()> {
        let base_dir = tempfile::tempdir()?;
        let node = Node::create(configuration(base_dir.path())).await?;
        let ctx = node.context();

        provision_tables(ctx).await?;
        // idempotent
        provision_tables(ctx).await?;

        assert!(ctx.sink.get("vessel_positions", "unknown").await?.is_none());
        assert!(ctx.sink.get(AUDIT_TABLE, "unknown").await?.is_none());
        assert!(ctx.sink.get("positions", "unknown").await.is_err());
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn rejects_invalid_configuration() -> googletest::Result<()> {
        let base_dir = tempfile::tempdir()?;
        let mut configuration = configuration(base_dir.path());
        configuration.sync.node_index = 3;
        configuration.sync.cluster_size = 2;

        assert!(matches!(
            Node::create(configuration).await,
            Err(crate::BuildError::Configuration(_))
        ));
        Ok(())
    }
}
