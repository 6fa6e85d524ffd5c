// SPDX-License-Identifier: Apache-2.0

//! Federation request orchestrator.
//!
//! Orchestrates one request end-to-end:
//! parse → resolve tables → forward (single table) or plan/fetch/join
//! (multi table) → assemble the result.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, field, info, instrument, warn, Instrument, Span};
use uuid::Uuid;

use fedquery_core::{
    ExecutionStrategy, FederationError, FederationResult, QueryResult, RowSet, TableRegistry,
};
use fedquery_sql::{forward_sql, parse_query, ParsedQuery};

use crate::metrics;
use crate::remote::RemoteSource;

use super::executor;
use super::local_engine::LocalEngine;
use super::types::{FederatorOptions, TempNamer};

/// Entry point of the federation engine. Cheap to clone; clones share the
/// registry, remote client and local engine.
#[derive(Clone)]
pub struct Federator {
    pub(crate) registry: Arc<TableRegistry>,
    pub(crate) remote: Arc<dyn RemoteSource>,
    pub(crate) engine: Arc<dyn LocalEngine>,
    pub(crate) options: FederatorOptions,
}

impl Federator {
    pub fn new(
        registry: Arc<TableRegistry>,
        remote: Arc<dyn RemoteSource>,
        engine: Arc<dyn LocalEngine>,
    ) -> Self {
        Self {
            registry,
            remote,
            engine,
            options: FederatorOptions::default(),
        }
    }

    pub fn with_options(mut self, options: FederatorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn registry(&self) -> &TableRegistry {
        &self.registry
    }

    /// Executes a federated query end-to-end.
    #[instrument(skip(self, query), fields(request_id = field::Empty, query_len = query.len()))]
    pub async fn execute_query(&self, query: &str) -> FederationResult<QueryResult> {
        let start = Instant::now();
        let result = self.execute_inner(query, start).await;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        metrics::record_query(elapsed_ms, result.is_ok());
        match &result {
            Ok(r) => info!(
                strategy = %r.strategy,
                rows = r.rows.len(),
                elapsed_ms,
                "Query completed"
            ),
            Err(e) => warn!(error = %e, elapsed_ms, "Query failed"),
        }

        result
    }

    async fn execute_inner(&self, query: &str, start: Instant) -> FederationResult<QueryResult> {
        let parsed = parse_query(query)?;

        // Unknown tables fail here, before any network call.
        self.registry.resolve_all(parsed.table_names())?;

        let request_id = Uuid::new_v4();
        Span::current().record("request_id", field::display(request_id));
        info!(query, tables = ?parsed.table_names(), "Executing federated query");

        let source_tables: Vec<String> = parsed
            .table_names()
            .into_iter()
            .map(str::to_string)
            .collect();

        // Detached from the caller: a dropped connection must not cancel
        // in-flight fetches or temp table cleanup.
        let this = self.clone();
        let handle = tokio::spawn(
            async move { this.run(&parsed, request_id).await }.instrument(Span::current()),
        );
        let (rows, strategy) = handle
            .await
            .map_err(|e| FederationError::internal(format!("Query task failed: {e}")))??;

        Ok(QueryResult::from_row_set(
            rows,
            source_tables,
            strategy,
            start.elapsed().as_secs_f64() * 1000.0,
        ))
    }

    async fn run(
        &self,
        parsed: &ParsedQuery,
        request_id: Uuid,
    ) -> FederationResult<(RowSet, ExecutionStrategy)> {
        if !parsed.is_single_table() {
            return executor::run_multi_table(self, parsed, &TempNamer::new(request_id)).await;
        }

        let registration = parsed
            .tables
            .first()
            .and_then(|t| self.registry.get(&t.name))
            .ok_or_else(|| FederationError::internal("Single-table query lost its table"))?;

        let sql = forward_sql(parsed, registration);
        debug!(table = %registration.logical_name, sql = %sql, "Forwarding single-table query");
        let rows = self.remote.execute(registration, &sql).await?;
        Ok((rows, ExecutionStrategy::SingleTable))
    }
}
