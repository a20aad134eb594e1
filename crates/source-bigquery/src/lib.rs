// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! [`SourceClient`] reading from BigQuery through its REST API.

mod response;
pub mod sql;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use shardsync_storage_api::source::{SourceClient, SourceQuery};
use shardsync_storage_api::{Row, SourceError};
use shardsync_types::config::SourceOptions;

use crate::response::{
    decode_count, decode_rows, FormatOptions, QueryRequest, QueryResponse, TableRow, TableSchema,
};

pub use crate::response::DecodeError;

/// How long a single REST call waits for the query job before returning an incomplete result.
const JOB_WAIT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("source project-id is not configured")]
    MissingProject,
    #[error("failed to build http client: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, thiserror::Error)]
#[error("bigquery responded with {status}: {body}")]
struct HttpStatusError {
    status: StatusCode,
    body: String,
}

pub struct BigQuerySource {
    client: reqwest::Client,
    options: SourceOptions,
}

impl BigQuerySource {
    pub fn new(options: SourceOptions) -> Result<Self, BuildError> {
        if options.project_id.is_empty() {
            return Err(BuildError::MissingProject);
        }
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self { client, options })
    }

    fn queries_url(&self) -> String {
        format!(
            "{}/projects/{}/queries",
            self.options.endpoint.trim_end_matches('/'),
            self.options.project_id
        )
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, SourceError> {
        let request = match self.options.access_token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let response = request
            .send()
            .await
            .map_err(|err| SourceError::Request(err.into()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                return Err(SourceError::Request(HttpStatusError { status, body }.into()));
            }
            return Err(SourceError::Rejected(format!("{status}: {body}")));
        }

        response
            .json()
            .await
            .map_err(|err| SourceError::Decode(err.into()))
    }

    /// Runs the statement, following incomplete jobs and result pages until all rows are in.
    async fn execute(&self, sql: &str) -> Result<(TableSchema, Vec<TableRow>), SourceError> {
        debug!(%sql, "Running source query");
        let request = QueryRequest {
            query: sql,
            use_legacy_sql: false,
            location: self.options.location.as_deref(),
            timeout_ms: JOB_WAIT.as_millis() as u64,
            format_options: FormatOptions {
                use_int64_timestamp: true,
            },
        };
        let mut response: QueryResponse = self
            .send(self.client.post(self.queries_url()).json(&request))
            .await?;

        let mut schema = None;
        let mut rows = Vec::new();
        loop {
            if response.job_complete {
                if schema.is_none() {
                    schema = response.schema.take();
                }
                rows.append(&mut response.rows);
                if response.page_token.is_none() {
                    break;
                }
            }

            let job = response.job_reference.take().ok_or_else(|| {
                SourceError::Decode("incomplete query response without job reference".into())
            })?;
            trace!(job_id = %job.job_id, "Fetching query results");

            let mut params = vec![("timeoutMs", JOB_WAIT.as_millis().to_string())];
            if let Some(location) = job.location.clone().or_else(|| self.options.location.clone())
            {
                params.push(("location", location));
            }
            if let Some(page_token) = response.page_token.take() {
                params.push(("pageToken", page_token));
            }

            let url = format!("{}/{}", self.queries_url(), job.job_id);
            response = self.send(self.client.get(url).query(&params)).await?;
            if response.job_reference.is_none() {
                response.job_reference = Some(job);
            }
        }

        let schema = schema.ok_or_else(|| SourceError::Decode(DecodeError::MissingSchema.into()))?;
        Ok((schema, rows))
    }

    fn render(
        &self,
        render: fn(&str, &SourceQuery) -> Result<String, sql::InvalidIdentifier>,
        query: &SourceQuery,
    ) -> Result<String, SourceError> {
        render(&self.options.project_id, query).map_err(|err| SourceError::Rejected(err.to_string()))
    }
}

#[async_trait]
impl SourceClient for BigQuerySource {
    async fn run_query(&self, query: &SourceQuery) -> Result<Vec<Row>, SourceError> {
        let sql = self.render(sql::select, query)?;
        let (schema, rows) = self.execute(&sql).await?;
        decode_rows(&schema, rows).map_err(|err| SourceError::Decode(err.into()))
    }

    async fn count(&self, query: &SourceQuery) -> Result<u64, SourceError> {
        let sql = self.render(sql::count, query)?;
        let (schema, rows) = self.execute(&sql).await?;
        decode_count(&schema, rows).map_err(|err| SourceError::Decode(err.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_project() {
        assert!(matches!(
            BigQuerySource::new(SourceOptions::default()),
            Err(BuildError::MissingProject)
        ));
    }

    #[test]
    fn builds_queries_url() {
        let options = SourceOptions {
            project_id: "acme".to_owned(),
            endpoint: "http://localhost:9050/bigquery/v2/".to_owned(),
            ..SourceOptions::default()
        };
        let source = BigQuerySource::new(options).unwrap();

        assert_eq!(
            source.queries_url(),
            "http://localhost:9050/bigquery/v2/projects/acme/queries"
        );
    }
}
