// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::path::PathBuf;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;

use crate::config::{ConfigOverrides, Configuration, InvalidConfigurationError};

#[derive(thiserror::Error, Debug)]
pub enum ConfigLoadError {
    #[error("configuration loading error: {0}")]
    Figment(Box<figment::Error>),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(#[from] InvalidConfigurationError),
}

impl From<figment::Error> for ConfigLoadError {
    fn from(value: figment::Error) -> Self {
        Self::Figment(Box::new(value))
    }
}

/// Layers defaults, the TOML file, `SHARDSYNC_` environment variables and command line
/// overrides, in increasing precedence.
#[derive(Debug, Default, derive_builder::Builder)]
#[builder(default)]
pub struct ConfigLoader {
    path: Option<PathBuf>,
    load_env: bool,
    #[builder(setter(strip_option))]
    custom_default: Option<Configuration>,
    overrides: ConfigOverrides,
}

impl ConfigLoader {
    pub fn load_once(&self) -> Result<Configuration, ConfigLoadError> {
        let defaults = self.custom_default.clone().unwrap_or_default();

        let mut figment = Figment::from(Serialized::defaults(defaults));
        if let Some(path) = &self.path {
            figment = figment.merge(Toml::file_exact(path.as_path()));
        }

        if self.load_env {
            figment = Self::merge_with_env(figment);
        }

        if let Some(node_index) = self.overrides.node_index {
            figment = figment.merge(("sync.node-index", node_index));
        }
        if let Some(cluster_size) = self.overrides.cluster_size {
            figment = figment.merge(("sync.cluster-size", cluster_size));
        }

        let config: Configuration = figment.extract()?;
        config.validate()?;

        Ok(config)
    }

    fn merge_with_env(figment: Figment) -> Figment {
        figment
            .merge(
                Env::prefixed("SHARDSYNC_")
                    .split("__")
                    .map(|k| k.as_str().replace('_', "-").into()),
            )
            // RUST_LOG wins over the configured filter
            .merge(Env::raw().only(&["RUST_LOG"]).map(|_| "log-filter".into()))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::time::Duration;

    use super::*;
    use crate::config::MetadataStoreKind;
    use crate::retries::RetryPolicy;

    const CONFIG: &str = r#"
log-format = "json"

[sync]
cluster-size = 6
node-index = 2
batch-size = 500
generation-interval = "10s"
retry-policy = { type = "fixed-delay", interval = "1s", max-attempts = 3 }

[[sync.tables]]
id = "vessel_positions"
source-dataset = "ais"
source-table = "positions"
target-table = "positions"
id-columns = ["mmsi", "timestamp"]

[metadata-store.kind]
type = "etcd"
addresses = ["http://127.0.0.1:2379"]
"#;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_file_on_top_of_defaults() {
        let file = write_config(CONFIG);
        let config = ConfigLoaderBuilder::default()
            .path(Some(file.path().to_path_buf()))
            .build()
            .unwrap()
            .load_once()
            .unwrap();

        assert_eq!(config.sync.cluster_size, 6);
        assert_eq!(config.sync.node_index, 2);
        assert_eq!(config.sync.batch_size(), 500);
        assert_eq!(*config.sync.generation_interval, Duration::from_secs(10));
        assert_eq!(
            config.sync.retry_policy,
            RetryPolicy::fixed_delay(Duration::from_secs(1), Some(3))
        );
        assert_eq!(config.sync.tables[0].timestamp_column, "timestamp");
        assert_eq!(config.sync.tables[0].id_columns, vec!["mmsi", "timestamp"]);
        assert_eq!(
            config.metadata_store.kind,
            MetadataStoreKind::Etcd {
                addresses: vec!["http://127.0.0.1:2379".to_owned()]
            }
        );
        // untouched sections keep their defaults
        assert_eq!(config.sync.retention_days, 30);
    }

    #[test]
    fn command_line_overrides_win() {
        let file = write_config(CONFIG);
        let config = ConfigLoaderBuilder::default()
            .path(Some(file.path().to_path_buf()))
            .overrides(ConfigOverrides {
                node_index: Some(5),
                cluster_size: None,
            })
            .build()
            .unwrap()
            .load_once()
            .unwrap();

        assert_eq!(config.sync.node_index, 5);
        assert_eq!(config.sync.cluster_size, 6);
    }

    #[test]
    fn invalid_identity_fails_fast() {
        let file = write_config(CONFIG);
        let result = ConfigLoaderBuilder::default()
            .path(Some(file.path().to_path_buf()))
            .overrides(ConfigOverrides {
                node_index: Some(6),
                cluster_size: None,
            })
            .build()
            .unwrap()
            .load_once();

        assert!(matches!(
            result,
            Err(ConfigLoadError::InvalidConfiguration(
                InvalidConfigurationError::NodeIdentity(_)
            ))
        ));
    }
}
