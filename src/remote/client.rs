// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use fedquery_core::{FederationError, FederationResult, RowSet, TableMetadata, TableRegistration};

use super::RemoteSource;

/// Per-call budget when none is configured.
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct RemoteQueryRequest<'a> {
    query: &'a str,
}

#[derive(Deserialize)]
struct RemoteQueryResponse {
    #[serde(default)]
    results: Vec<Value>,
    #[serde(default)]
    columns: Vec<String>,
}

/// `RemoteSource` over the containers' JSON HTTP API
/// (`GET /metadata`, `POST /query`).
#[derive(Clone)]
pub struct HttpRemoteClient {
    client: Client,
    timeout: Duration,
}

impl HttpRemoteClient {
    pub fn new(timeout: Duration) -> FederationResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FederationError::internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client, timeout })
    }

    fn describe(&self, err: &reqwest::Error) -> String {
        if err.is_timeout() {
            format!("timed out after {}s", self.timeout.as_secs_f64())
        } else if err.is_connect() {
            format!("connection failed: {err}")
        } else {
            err.to_string()
        }
    }
}

#[async_trait]
impl RemoteSource for HttpRemoteClient {
    async fn get_metadata(&self, table: &TableRegistration) -> FederationResult<TableMetadata> {
        let url = table.endpoint("metadata")?;
        debug!(table = %table.logical_name, %url, "Fetching remote metadata");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FederationError::remote_metadata(&table.logical_name, self.describe(&e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(FederationError::remote_metadata(
                &table.logical_name,
                format!("HTTP {status}: {body}"),
            ));
        }

        response
            .json::<TableMetadata>()
            .await
            .map_err(|e| FederationError::remote_metadata(&table.logical_name, self.describe(&e)))
    }

    async fn execute(&self, table: &TableRegistration, sql: &str) -> FederationResult<RowSet> {
        let url = table.endpoint("query")?;
        debug!(table = %table.logical_name, %url, sql, "Sending remote query");

        let response = self
            .client
            .post(url)
            .json(&RemoteQueryRequest { query: sql })
            .send()
            .await
            .map_err(|e| FederationError::remote_execution(&table.logical_name, self.describe(&e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(FederationError::remote_execution(
                &table.logical_name,
                format!("HTTP {status}: {body}"),
            ));
        }

        let payload: RemoteQueryResponse = response
            .json()
            .await
            .map_err(|e| FederationError::remote_execution(&table.logical_name, self.describe(&e)))?;

        RowSet::from_remote(payload.columns, payload.results).map_err(|e| {
            FederationError::remote_execution(&table.logical_name, format!("Malformed response: {e}"))
        })
    }
}
