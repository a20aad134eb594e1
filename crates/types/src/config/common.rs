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
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

static HOSTNAME: LazyLock<String> = LazyLock::new(|| {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_owned())
});

/// # Common options
#[derive(Debug, Clone, Serialize, Deserialize, derive_builder::Builder)]
#[serde(rename_all = "kebab-case")]
#[builder(default)]
pub struct CommonOptions {
    /// # Host name
    ///
    /// Prefix of this node's name as reported by the status endpoint and recorded as issuer of
    /// control commands. Defaults to the machine's hostname.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    host_name: Option<String>,

    /// # Base directory
    ///
    /// Directory holding the node's local state.
    base_dir: Option<PathBuf>,

    /// # Logging Filter
    ///
    /// Log filter configuration. Can be overridden by the `RUST_LOG` environment variable.
    /// Check the [`RUST_LOG` documentation](https://docs.rs/tracing-subscriber/latest/tracing_subscriber/filter/struct.EnvFilter.html) for more details how to configure it.
    pub log_filter: String,

    /// # Logging format
    pub log_format: LogFormat,

    /// # Disable ANSI in log output
    pub log_disable_ansi_codes: bool,
}

impl CommonOptions {
    pub fn host_name(&self) -> &str {
        self.host_name.as_deref().unwrap_or(&HOSTNAME)
    }

    pub fn base_dir(&self) -> PathBuf {
        self.base_dir.clone().unwrap_or_else(|| {
            std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join("shardsync-data")
        })
    }
}

impl Default for CommonOptions {
    fn default() -> Self {
        Self {
            host_name: None,
            base_dir: None,
            log_filter: "warn,shardsync=info".to_owned(),
            log_format: LogFormat::default(),
            log_disable_ansi_codes: false,
        }
    }
}

/// # Log format
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    /// Multi-line human readable output.
    #[default]
    Pretty,
    /// Single line per event.
    Compact,
    /// Newline delimited json, for log collectors.
    Json,
}
