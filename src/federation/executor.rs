// SPDX-License-Identifier: Apache-2.0

//! Multi-table execution.
//!
//! Runs the plan chosen by [`planner::decide`]: metadata phase, driving
//! fetch, dependent key-restricted fetches, local join. A failure on the
//! optimized path switches once to the fallback path, which fetches every
//! table in full.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::try_join_all;
use tracing::{debug, info, instrument, warn};

use fedquery_core::{
    ExecutionStrategy, FederationError, FederationResult, RowSet, TableMetadata, TableRegistration,
};
use fedquery_sql::{chunk_keys, key_filter_sql, local_join_sql, remote_scan_sql, sql_literal, ParsedQuery};

use crate::metrics;

use super::manager::Federator;
use super::planner;
use super::scope::TempTableScope;
use super::types::{DependentFetch, ExecutionPlan, FallbackReason, PlanDecision, TempNamer};

type Registrations = HashMap<String, TableRegistration>;

/// Failure on the optimized path: either recoverable through the fallback
/// or terminal for the request.
enum OptimizedError {
    Fallback(FallbackReason),
    Fatal(FederationError),
}

/// One remote query whose rows belong to `table`.
struct FetchRequest {
    table: String,
    registration: TableRegistration,
    sql: String,
}

/// Executes a query referencing two or more tables.
#[instrument(skip_all, fields(tables = parsed.tables.len()))]
pub(crate) async fn run_multi_table(
    fed: &Federator,
    parsed: &ParsedQuery,
    namer: &TempNamer,
) -> FederationResult<(RowSet, ExecutionStrategy)> {
    let registrations: Registrations = fed
        .registry
        .resolve_all(parsed.table_names())?
        .into_iter()
        .map(|r| (r.logical_name.clone(), r.clone()))
        .collect();
    let remote_names: HashMap<String, String> = registrations
        .iter()
        .map(|(name, r)| (name.clone(), r.remote_table_name.clone()))
        .collect();

    let metadata = fetch_metadata(fed, parsed, &registrations).await;
    let known_metadata = metadata.as_ref().ok().cloned();

    let reason = match planner::decide(parsed, &remote_names, metadata, namer) {
        PlanDecision::Optimized(plan) => {
            info!(
                driving_table = %plan.driving_table,
                stages = plan.stages.len(),
                detached = plan.detached.len(),
                common_predicates = plan.common_predicates.len(),
                "Executing optimized plan"
            );
            match run_optimized(fed, parsed, &registrations, &plan).await {
                Ok(rows) => return Ok((rows, ExecutionStrategy::Optimized)),
                Err(OptimizedError::Fallback(reason)) => reason,
                Err(OptimizedError::Fatal(e)) => return Err(e),
            }
        }
        PlanDecision::Fallback(reason) => reason,
    };

    warn!(reason = reason.kind(), detail = %reason, "Falling back to full table fetch");
    metrics::record_fallback();

    let rows = run_fallback(
        fed,
        parsed,
        &registrations,
        known_metadata.as_ref(),
        &namer.fallback(),
    )
    .await?;
    Ok((rows, ExecutionStrategy::Fallback))
}

fn registration<'a>(registrations: &'a Registrations, table: &str) -> FederationResult<&'a TableRegistration> {
    registrations
        .get(table)
        .ok_or_else(|| FederationError::internal(format!("Table '{table}' was not resolved")))
}

/// Fetches metadata for every table concurrently; the first failure wins.
async fn fetch_metadata(
    fed: &Federator,
    parsed: &ParsedQuery,
    registrations: &Registrations,
) -> FederationResult<HashMap<String, TableMetadata>> {
    let requests = parsed
        .table_names()
        .into_iter()
        .map(|table| registration(registrations, table))
        .collect::<FederationResult<Vec<_>>>()?;

    let entries = try_join_all(requests.into_iter().map(|reg| async move {
        let meta = fed.remote.get_metadata(reg).await?;
        debug!(table = %reg.logical_name, row_count = meta.row_count, "Fetched metadata");
        Ok::<_, FederationError>((reg.logical_name.clone(), meta))
    }))
    .await?;

    Ok(entries.into_iter().collect())
}

/// Runs remote queries in parallel using tokio::spawn.
///
/// Results come back in request order.
async fn fetch_rows(
    fed: &Federator,
    requests: Vec<FetchRequest>,
) -> FederationResult<Vec<(String, RowSet)>> {
    let mut handles = Vec::with_capacity(requests.len());

    for request in requests {
        let remote = Arc::clone(&fed.remote);
        handles.push(tokio::spawn(async move {
            let rows = remote.execute(&request.registration, &request.sql).await?;
            Ok::<_, FederationError>((request.table, rows))
        }));
    }

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        let fetched = handle
            .await
            .map_err(|e| FederationError::internal(format!("Remote fetch task panicked: {e}")))??;
        results.push(fetched);
    }

    Ok(results)
}

// ─── Optimized path ──────────────────────────────────────────

async fn run_optimized(
    fed: &Federator,
    parsed: &ParsedQuery,
    registrations: &Registrations,
    plan: &ExecutionPlan,
) -> Result<RowSet, OptimizedError> {
    let mut scope = TempTableScope::new(Arc::clone(&fed.engine));
    let result = optimized_steps(fed, parsed, registrations, plan, &mut scope).await;
    scope.release().await;
    result
}

async fn optimized_steps(
    fed: &Federator,
    parsed: &ParsedQuery,
    registrations: &Registrations,
    plan: &ExecutionPlan,
    scope: &mut TempTableScope,
) -> Result<RowSet, OptimizedError> {
    let mut fetched: HashMap<String, Arc<RowSet>> = HashMap::new();

    // Driving table first, together with tables no join condition reaches.
    // No LIMIT on any intermediate fetch.
    let mut first_wave = Vec::with_capacity(plan.detached.len() + 1);
    for table in std::iter::once(&plan.driving_table).chain(&plan.detached) {
        let reg = registration(registrations, table).map_err(OptimizedError::Fatal)?;
        first_wave.push(FetchRequest {
            table: table.clone(),
            registration: reg.clone(),
            sql: remote_scan_sql(&reg.remote_table_name, plan.predicates_for(table)),
        });
    }

    let rows = fetch_rows(fed, first_wave)
        .await
        .map_err(|e| OptimizedError::Fallback(FallbackReason::FetchFailed(e.to_string())))?;
    stage(scope, plan, rows, &mut fetched).await?;

    for wave in &plan.stages {
        let mut requests = Vec::new();
        let mut without_keys = Vec::new();

        for fetch in wave {
            let keys = join_keys(&fetched, fetch)?;
            if keys.is_empty() {
                without_keys.push(fetch.table.clone());
                continue;
            }

            let reg = registration(registrations, &fetch.table).map_err(OptimizedError::Fatal)?;
            let chunks = chunk_keys(&keys, fed.options.key_chunk_size);
            debug!(
                table = %fetch.table,
                keys = keys.len(),
                chunks = chunks.len(),
                "Dependent fetch"
            );
            for chunk in chunks {
                requests.push(FetchRequest {
                    table: fetch.table.clone(),
                    registration: reg.clone(),
                    sql: key_filter_sql(
                        &reg.remote_table_name,
                        &fetch.key_column,
                        chunk,
                        plan.predicates_for(&fetch.table),
                    ),
                });
            }
        }

        let rows = fetch_rows(fed, requests)
            .await
            .map_err(|e| OptimizedError::Fallback(FallbackReason::FetchFailed(e.to_string())))?;
        let mut merged = merge_by_table(rows)?;

        for fetch in wave {
            if let Some((_, rows)) = merged.iter().find(|(t, _)| *t == fetch.table) {
                if !rows.is_empty() && rows.column_index(&fetch.key_column).is_none() {
                    return Err(OptimizedError::Fallback(FallbackReason::JoinKeyMissing {
                        table: fetch.table.clone(),
                        column: fetch.key_column.clone(),
                    }));
                }
            }
        }

        // No join partner can match an empty key set: stage an empty table
        // without asking the container.
        for table in without_keys {
            let columns = plan
                .metadata_for(&table)
                .map(|m| m.columns.iter().map(|c| c.name.clone()).collect())
                .unwrap_or_default();
            merged.push((table, RowSet::empty(columns)));
        }

        stage(scope, plan, merged, &mut fetched).await?;
    }

    let sql = local_join_sql(parsed, &plan.temp_table_names);
    debug!(sql = %sql, "Executing local join");
    scope.execute(sql).await.map_err(OptimizedError::Fatal)
}

/// Registers fetched tables under their temp names and keeps the rows for
/// later key extraction.
async fn stage(
    scope: &mut TempTableScope,
    plan: &ExecutionPlan,
    rows: Vec<(String, RowSet)>,
    fetched: &mut HashMap<String, Arc<RowSet>>,
) -> Result<(), OptimizedError> {
    for (table, rows) in rows {
        let temp_name = plan.temp_table_names.get(&table).cloned().ok_or_else(|| {
            OptimizedError::Fatal(FederationError::internal(format!(
                "No temp table name planned for '{table}'"
            )))
        })?;
        let declared = plan
            .metadata_for(&table)
            .map(|m| m.columns.clone())
            .unwrap_or_default();

        let rows = Arc::new(rows);
        scope
            .register(temp_name, Arc::clone(&rows), declared)
            .await
            .map_err(|e| OptimizedError::Fallback(FallbackReason::StagingFailed(e.to_string())))?;
        fetched.insert(table, rows);
    }
    Ok(())
}

/// Distinct non-NULL join keys of the source side, rendered as literals in
/// first-seen order.
fn join_keys(
    fetched: &HashMap<String, Arc<RowSet>>,
    fetch: &DependentFetch,
) -> Result<Vec<String>, OptimizedError> {
    let source = fetched.get(&fetch.source_table).ok_or_else(|| {
        OptimizedError::Fatal(FederationError::internal(format!(
            "'{}' was not fetched before '{}'",
            fetch.source_table, fetch.table
        )))
    })?;

    if source.is_empty() {
        return Ok(Vec::new());
    }

    let index = source.column_index(&fetch.source_column).ok_or_else(|| {
        OptimizedError::Fallback(FallbackReason::JoinKeyMissing {
            table: fetch.source_table.clone(),
            column: fetch.source_column.clone(),
        })
    })?;

    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    for literal in source.column_values(index).filter_map(sql_literal) {
        if seen.insert(literal.clone()) {
            keys.push(literal);
        }
    }
    Ok(keys)
}

/// Concatenates chunked results of the same table.
fn merge_by_table(rows: Vec<(String, RowSet)>) -> Result<Vec<(String, RowSet)>, OptimizedError> {
    let mut merged: Vec<(String, RowSet)> = Vec::new();
    for (table, block) in rows {
        match merged.iter_mut().find(|(t, _)| *t == table) {
            Some((_, existing)) => existing.extend(block).map_err(|e| {
                OptimizedError::Fallback(FallbackReason::FetchFailed(format!(
                    "inconsistent chunks for '{table}': {e}"
                )))
            })?,
            None => merged.push((table, block)),
        }
    }
    Ok(merged)
}

// ─── Fallback path ───────────────────────────────────────────

async fn run_fallback(
    fed: &Federator,
    parsed: &ParsedQuery,
    registrations: &Registrations,
    metadata: Option<&HashMap<String, TableMetadata>>,
    namer: &TempNamer,
) -> FederationResult<RowSet> {
    let mut scope = TempTableScope::new(Arc::clone(&fed.engine));
    let result = fallback_steps(fed, parsed, registrations, metadata, namer, &mut scope).await;
    scope.release().await;
    result
}

async fn fallback_steps(
    fed: &Federator,
    parsed: &ParsedQuery,
    registrations: &Registrations,
    metadata: Option<&HashMap<String, TableMetadata>>,
    namer: &TempNamer,
    scope: &mut TempTableScope,
) -> FederationResult<RowSet> {
    let tables = parsed.table_names();

    let requests = tables
        .iter()
        .map(|table| {
            let reg = registration(registrations, table)?;
            Ok(FetchRequest {
                table: table.to_string(),
                registration: reg.clone(),
                sql: remote_scan_sql(&reg.remote_table_name, &[]),
            })
        })
        .collect::<FederationResult<Vec<_>>>()?;

    let temp_names: HashMap<String, String> = tables
        .iter()
        .map(|table| (table.to_string(), namer.name(table)))
        .collect();

    for (table, rows) in fetch_rows(fed, requests).await? {
        let declared = metadata
            .and_then(|m| m.get(&table))
            .map(|m| m.columns.clone())
            .unwrap_or_default();
        scope
            .register(namer.name(&table), Arc::new(rows), declared)
            .await?;
    }

    let sql = local_join_sql(parsed, &temp_names);
    debug!(sql = %sql, "Executing local join (fallback)");
    scope.execute(sql).await
}
