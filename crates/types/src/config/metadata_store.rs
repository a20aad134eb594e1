// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::retries::RetryPolicy;

/// # Metadata store options
///
/// Where the replicated control record lives.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, derive_builder::Builder)]
#[serde(rename_all = "kebab-case")]
#[builder(default)]
pub struct MetadataStoreOptions {
    pub kind: MetadataStoreKind,

    /// # Resubscribe delay
    ///
    /// Fixed pause before a broken control subscription is re-established.
    #[serde_as(as = "serde_with::DisplayFromStr")]
    pub resubscribe_delay: humantime::Duration,

    /// # Client retry policy
    ///
    /// Backoff of retryable metadata store reads and writes.
    pub retry_policy: RetryPolicy,
}

impl Default for MetadataStoreOptions {
    fn default() -> Self {
        Self {
            kind: MetadataStoreKind::default(),
            resubscribe_delay: Duration::from_secs(5).into(),
            retry_policy: RetryPolicy::exponential(
                Duration::from_millis(100),
                2.0,
                Some(10),
                Some(Duration::from_secs(2)),
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "kebab-case"
)]
pub enum MetadataStoreKind {
    /// Process local store. Only meaningful for single node deployments and tests.
    #[default]
    InMemory,
    /// An etcd cluster shared by all nodes.
    Etcd { addresses: Vec<String> },
}
