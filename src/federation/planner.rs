// SPDX-License-Identifier: Apache-2.0

//! Federation query planner.
//!
//! Pure decision logic: given a parsed query and per-table metadata, choose
//! the driving table, attribute WHERE predicates to tables for push-down and
//! order the dependent fetches. No I/O happens here.

use std::collections::{HashMap, HashSet};

use fedquery_core::{FederationResult, TableMetadata};
use fedquery_sql::{ColumnRef, ParsedQuery, Predicate};

use super::types::{DependentFetch, ExecutionPlan, FallbackReason, PlanDecision, TempNamer};

/// Decides between the optimized plan and the fallback for a multi-table
/// query.
///
/// `remote_names` maps logical to remote table names; `metadata` is the
/// outcome of the metadata phase.
pub fn decide(
    parsed: &ParsedQuery,
    remote_names: &HashMap<String, String>,
    metadata: FederationResult<HashMap<String, TableMetadata>>,
    namer: &TempNamer,
) -> PlanDecision {
    let metadata = match metadata {
        Ok(metadata) => metadata,
        Err(e) => return PlanDecision::Fallback(FallbackReason::MetadataUnavailable(e.to_string())),
    };

    let tables = parsed.table_names();
    let Some(driving_table) = choose_driving_table(&tables, &metadata) else {
        return PlanDecision::Fallback(FallbackReason::MetadataUnavailable(
            "query references no tables".to_string(),
        ));
    };

    let (stages, reached) = match dependent_stages(parsed, driving_table, &metadata) {
        Ok(stages) => stages,
        Err(reason) => return PlanDecision::Fallback(reason),
    };

    let detached = tables
        .iter()
        .filter(|t| !reached.contains(**t))
        .map(|t| t.to_string())
        .collect();

    let (per_table_predicates, common_predicates) =
        partition_predicates(parsed, remote_names, &metadata);

    let temp_table_names = tables
        .iter()
        .map(|t| (t.to_string(), namer.name(t)))
        .collect();

    PlanDecision::Optimized(ExecutionPlan {
        driving_table: driving_table.to_string(),
        per_table_predicates,
        common_predicates,
        temp_table_names,
        stages,
        detached,
        metadata,
    })
}

/// Table with the smallest row count; ties go to the earliest table in the
/// query. Tables without metadata sort last.
pub fn choose_driving_table<'a>(
    tables: &[&'a str],
    metadata: &HashMap<String, TableMetadata>,
) -> Option<&'a str> {
    let mut best: Option<(&'a str, u64)> = None;
    for &table in tables {
        let rows = metadata.get(table).map(|m| m.row_count).unwrap_or(u64::MAX);
        match best {
            Some((_, best_rows)) if best_rows <= rows => {}
            _ => best = Some((table, rows)),
        }
    }
    best.map(|(table, _)| table)
}

/// Breadth-first expansion of the join graph from the driving table.
///
/// Returns the fetch waves and the set of tables reached.
fn dependent_stages<'a>(
    parsed: &'a ParsedQuery,
    driving_table: &'a str,
    metadata: &HashMap<String, TableMetadata>,
) -> Result<(Vec<Vec<DependentFetch>>, HashSet<&'a str>), FallbackReason> {
    let mut reached: HashSet<&str> = HashSet::from([driving_table]);
    let mut stages = Vec::new();

    loop {
        let mut wave: Vec<DependentFetch> = Vec::new();
        let mut in_wave: HashSet<&str> = HashSet::new();

        for join in &parsed.joins {
            for (source, target) in [
                (&join.left_table, &join.right_table),
                (&join.right_table, &join.left_table),
            ] {
                if !reached.contains(source.as_str())
                    || reached.contains(target.as_str())
                    || in_wave.contains(target.as_str())
                {
                    continue;
                }
                let Some((source_column, _, key_column)) = join.from_side(source) else {
                    continue;
                };

                ensure_column(metadata, source, source_column)?;
                ensure_column(metadata, target, key_column)?;

                in_wave.insert(target.as_str());
                wave.push(DependentFetch {
                    table: target.clone(),
                    key_column: key_column.to_string(),
                    source_table: source.clone(),
                    source_column: source_column.to_string(),
                });
            }
        }

        if wave.is_empty() {
            break;
        }
        reached.extend(in_wave);
        stages.push(wave);
    }

    Ok((stages, reached))
}

/// A join column absent from a table's advertised columns makes the key
/// fetch meaningless. Tables advertising no columns are not checked.
fn ensure_column(
    metadata: &HashMap<String, TableMetadata>,
    table: &str,
    column: &str,
) -> Result<(), FallbackReason> {
    match metadata.get(table) {
        Some(meta) if !meta.columns.is_empty() && !meta.has_column(column) => {
            Err(FallbackReason::JoinKeyMissing {
                table: table.to_string(),
                column: column.to_string(),
            })
        }
        _ => Ok(()),
    }
}

/// Splits WHERE predicates into per-table push-down lists and common
/// predicates.
///
/// - qualified `column = literal`: pushed to its own table when that table
///   has the column
/// - unqualified `column = literal`: pushed to every table having the column
/// - anything else: pushed only when every column it references resolves to
///   one and the same table
///
/// The local join re-applies the whole WHERE clause, so pushing is only a
/// row-count reduction.
pub fn partition_predicates(
    parsed: &ParsedQuery,
    remote_names: &HashMap<String, String>,
    metadata: &HashMap<String, TableMetadata>,
) -> (HashMap<String, Vec<String>>, Vec<String>) {
    let tables = parsed.table_names();
    let mut per_table: HashMap<String, Vec<String>> = HashMap::new();
    let mut common = Vec::new();

    for predicate in &parsed.where_predicates {
        let targets = predicate_targets(predicate, &tables, metadata);
        if targets.is_empty() {
            common.push(predicate.sql.clone());
            continue;
        }
        for table in targets {
            let remote = remote_names
                .get(table)
                .map(String::as_str)
                .unwrap_or(table);
            per_table
                .entry(table.to_string())
                .or_default()
                .push(predicate.pushdown_sql(remote));
        }
    }

    (per_table, common)
}

fn predicate_targets<'a>(
    predicate: &Predicate,
    tables: &[&'a str],
    metadata: &HashMap<String, TableMetadata>,
) -> Vec<&'a str> {
    if let Some(column) = &predicate.equality {
        return match &column.table {
            Some(table) => tables
                .iter()
                .copied()
                .filter(|t| *t == table && table_may_have(metadata, t, &column.column))
                .collect(),
            None => tables
                .iter()
                .copied()
                .filter(|t| table_has(metadata, t, &column.column))
                .collect(),
        };
    }

    let mut owner: Option<&'a str> = None;
    for column in &predicate.columns {
        let Some(table) = owning_table(column, tables, metadata) else {
            return Vec::new();
        };
        match owner {
            Some(existing) if existing != table => return Vec::new(),
            _ => owner = Some(table),
        }
    }
    owner.into_iter().collect()
}

fn owning_table<'a>(
    column: &ColumnRef,
    tables: &[&'a str],
    metadata: &HashMap<String, TableMetadata>,
) -> Option<&'a str> {
    match &column.table {
        Some(table) => tables
            .iter()
            .copied()
            .find(|t| t == table && table_may_have(metadata, t, &column.column)),
        None => {
            let mut candidates = tables
                .iter()
                .copied()
                .filter(|t| table_has(metadata, t, &column.column));
            match (candidates.next(), candidates.next()) {
                (Some(only), None) => Some(only),
                _ => None,
            }
        }
    }
}

fn table_has(metadata: &HashMap<String, TableMetadata>, table: &str, column: &str) -> bool {
    metadata
        .get(table)
        .map(|m| m.has_column(column))
        .unwrap_or(false)
}

/// Like `table_has`, but trusts an explicit qualifier when the table
/// advertises no columns.
fn table_may_have(metadata: &HashMap<String, TableMetadata>, table: &str, column: &str) -> bool {
    metadata
        .get(table)
        .map(|m| m.columns.is_empty() || m.has_column(column))
        .unwrap_or(false)
}
