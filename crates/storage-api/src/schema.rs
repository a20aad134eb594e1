// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use async_trait::async_trait;

use crate::Result;

/// Shape of a sink table as far as provisioning is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub name: String,
    /// Fields forming the record id. Informational for stores keyed by the id itself.
    pub key_fields: Vec<String>,
}

impl TableSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_fields: Vec::new(),
        }
    }

    pub fn with_key_fields(mut self, key_fields: Vec<String>) -> Self {
        self.key_fields = key_fields;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum EnsureOutcome {
    Created,
    Exists,
}

#[async_trait]
pub trait SchemaProvisioner: Send + Sync {
    /// Creates the table if it does not exist. Idempotent.
    async fn ensure_table(&self, spec: &TableSpec) -> Result<EnsureOutcome>;
}
