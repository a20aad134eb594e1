// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

mod admin;
mod common;
mod metadata_store;
mod sink;
mod source;
mod sync;

pub use admin::*;
pub use common::*;
pub use metadata_store::*;
pub use sink::*;
pub use source::*;
pub use sync::*;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::errors::GenericError;
use crate::identifiers::{InvalidNodeIdentity, NodeName, TableId};

/// Sink table holding one audit record per committed batch.
pub const AUDIT_TABLE: &str = "sync_audit";

/// # Shardsync configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize, derive_builder::Builder)]
#[builder(default)]
#[serde(rename_all = "kebab-case")]
pub struct Configuration {
    #[serde(flatten)]
    pub common: CommonOptions,
    pub sync: SyncOptions,
    pub source: SourceOptions,
    pub sink: SinkOptions,
    pub metadata_store: MetadataStoreOptions,
    pub admin: AdminOptions,
}

#[derive(Debug, thiserror::Error)]
pub enum InvalidConfigurationError {
    #[error(transparent)]
    NodeIdentity(#[from] InvalidNodeIdentity),
    #[error("no tables configured; add at least one [[sync.tables]] section")]
    NoTables,
    #[error("table '{0}' is configured more than once")]
    DuplicateTable(TableId),
    #[error("table '{table}' is missing '{field}'")]
    MissingField { table: TableId, field: &'static str },
    #[error("table '{0}' targets the reserved sink table 'sync_audit'")]
    ReservedTargetTable(TableId),
    #[error("etcd metadata store requires at least one address")]
    NoEtcdAddresses,
}

impl Configuration {
    /// Checks everything that can be checked without contacting external systems.
    pub fn validate(&self) -> Result<(), InvalidConfigurationError> {
        self.sync.node_identity()?;

        if self.sync.tables.is_empty() {
            return Err(InvalidConfigurationError::NoTables);
        }

        let mut seen = HashSet::with_capacity(self.sync.tables.len());
        for table in &self.sync.tables {
            if !seen.insert(&table.id) {
                return Err(InvalidConfigurationError::DuplicateTable(table.id.clone()));
            }

            let required = [
                ("source-dataset", &table.source_dataset),
                ("source-table", &table.source_table),
                ("timestamp-column", &table.timestamp_column),
                ("target-table", &table.target_table),
            ];
            if let Some((field, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
                return Err(InvalidConfigurationError::MissingField {
                    table: table.id.clone(),
                    field: *field,
                });
            }

            if table.target_table == AUDIT_TABLE {
                return Err(InvalidConfigurationError::ReservedTargetTable(
                    table.id.clone(),
                ));
            }
        }

        if let MetadataStoreKind::Etcd { addresses } = &self.metadata_store.kind {
            if addresses.is_empty() {
                return Err(InvalidConfigurationError::NoEtcdAddresses);
            }
        }

        Ok(())
    }

    pub fn node_name(&self) -> NodeName {
        NodeName::new(self.common.host_name(), self.sync.node_index.into())
    }

    /// Dumps the configuration to a string
    pub fn dump(&self) -> Result<String, GenericError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Values given on the command line. They take precedence over file and environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub node_index: Option<u32>,
    pub cluster_size: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(id: &str, target: &str) -> TableOptions {
        TableOptionsBuilder::default()
            .id(id)
            .source_dataset("ais")
            .source_table(id)
            .target_table(target)
            .build()
            .unwrap()
    }

    fn config_with(tables: Vec<TableOptions>) -> Configuration {
        let mut config = Configuration::default();
        config.sync.tables = tables;
        config
    }

    #[test]
    fn accepts_distinct_tables() {
        let config = config_with(vec![
            table("positions", "positions"),
            table("voyages", "voyages"),
        ]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_invalid_setups() {
        assert!(matches!(
            config_with(vec![]).validate(),
            Err(InvalidConfigurationError::NoTables)
        ));
        assert!(matches!(
            config_with(vec![table("a", "a"), table("a", "b")]).validate(),
            Err(InvalidConfigurationError::DuplicateTable(_))
        ));
        assert!(matches!(
            config_with(vec![table("a", AUDIT_TABLE)]).validate(),
            Err(InvalidConfigurationError::ReservedTargetTable(_))
        ));

        let mut config = config_with(vec![table("a", "a")]);
        config.sync.node_index = 4;
        config.sync.cluster_size = 4;
        assert!(matches!(
            config.validate(),
            Err(InvalidConfigurationError::NodeIdentity(_))
        ));
    }
}
