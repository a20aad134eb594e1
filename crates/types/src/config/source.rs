// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use serde::{Deserialize, Serialize};

/// # Source options
#[derive(Debug, Clone, Serialize, Deserialize, derive_builder::Builder)]
#[serde(rename_all = "kebab-case")]
#[builder(default)]
pub struct SourceOptions {
    /// # Project
    ///
    /// Google Cloud project the queries are billed to.
    pub project_id: String,

    /// # Location
    ///
    /// Processing location of the query jobs, e.g. `EU`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    /// # Endpoint
    ///
    /// Base URL of the BigQuery REST API.
    pub endpoint: String,

    /// # Access token
    ///
    /// OAuth2 bearer token. Falls back to the `GOOGLE_OAUTH_ACCESS_TOKEN` environment variable.
    #[serde(default, skip_serializing)]
    pub access_token: Option<String>,
}

impl SourceOptions {
    pub fn access_token(&self) -> Option<String> {
        self.access_token
            .clone()
            .or_else(|| std::env::var("GOOGLE_OAUTH_ACCESS_TOKEN").ok())
    }
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            location: None,
            endpoint: "https://bigquery.googleapis.com/bigquery/v2".to_owned(),
            access_token: None,
        }
    }
}
