// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// # Sink options
///
/// The sink is a RocksDB instance local to the node, with one column family per target table.
#[derive(Debug, Clone, Default, Serialize, Deserialize, derive_builder::Builder)]
#[serde(rename_all = "kebab-case")]
#[builder(default)]
pub struct SinkOptions {
    /// # Data directory
    ///
    /// Defaults to `<base-dir>/sink`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data_dir: Option<PathBuf>,

    /// # Disable WAL
    pub rocksdb_disable_wal: bool,
}

impl SinkOptions {
    pub fn data_dir(&self, base_dir: &Path) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| base_dir.join("sink"))
    }
}
