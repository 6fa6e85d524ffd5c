// SPDX-License-Identifier: Apache-2.0

//! SQL text generation for remote fetches and the local join query.

use std::collections::HashMap;

use serde_json::Value;

use fedquery_core::TableRegistration;

use crate::parser::{ParsedQuery, TableRef};

/// Quotes an identifier with double quotes, escaping embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Renders a JSON scalar as a SQL literal. `NULL` has no literal form in an
/// IN list and yields `None`.
pub fn sql_literal(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(if *b { "TRUE" } else { "FALSE" }.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(format!("'{}'", s.replace('\'', "''"))),
        other => Some(format!("'{}'", other.to_string().replace('\'', "''"))),
    }
}

fn where_suffix(predicates: &[String]) -> String {
    if predicates.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", predicates.join(" AND "))
    }
}

/// `SELECT * FROM <remote>` with optional pushed-down predicates.
pub fn remote_scan_sql(remote_table: &str, predicates: &[String]) -> String {
    format!("SELECT * FROM {remote_table}{}", where_suffix(predicates))
}

/// Key-restricted fetch: `SELECT * FROM <remote> WHERE <col> IN (...) AND ...`.
///
/// `keys` must already be rendered literals and non-empty.
pub fn key_filter_sql(
    remote_table: &str,
    key_column: &str,
    keys: &[String],
    predicates: &[String],
) -> String {
    let mut conditions = Vec::with_capacity(predicates.len() + 1);
    conditions.push(format!(
        "{remote_table}.{key_column} IN ({})",
        keys.join(", ")
    ));
    conditions.extend(predicates.iter().cloned());
    format!("SELECT * FROM {remote_table}{}", where_suffix(&conditions))
}

/// Splits distinct join keys into IN-list chunks of at most `chunk_size`.
pub fn chunk_keys(keys: &[String], chunk_size: usize) -> Vec<&[String]> {
    keys.chunks(chunk_size.max(1)).collect()
}

/// Rewrites the query against local temp tables. Each table keeps its
/// binding as alias, so the SELECT list, ON conditions, WHERE and ORDER BY
/// are reused as written.
pub fn local_join_sql(parsed: &ParsedQuery, temp_names: &HashMap<String, String>) -> String {
    let from = |table: &TableRef| -> String {
        let temp = temp_names
            .get(&table.name)
            .map(String::as_str)
            .unwrap_or(table.name.as_str());
        format!("{} AS {}", quote_ident(temp), table.binding)
    };

    let mut sql = String::from("SELECT ");
    if let Some(distinct) = &parsed.distinct {
        sql.push_str(distinct);
        sql.push(' ');
    }
    sql.push_str(&parsed.select_list.join(", "));

    if let Some(first) = parsed.tables.first() {
        sql.push_str(" FROM ");
        sql.push_str(&from(first));
    }

    for join in &parsed.joins {
        if let Some(table) = parsed.table(&join.joined_table) {
            sql.push_str(" JOIN ");
            sql.push_str(&from(table));
            sql.push_str(" ON ");
            sql.push_str(&join.sql);
        }
    }

    if let Some(where_sql) = parsed.where_sql() {
        sql.push_str(" WHERE ");
        sql.push_str(&where_sql);
    }
    if let Some(order_by) = &parsed.order_by {
        sql.push(' ');
        sql.push_str(order_by);
    }
    if let Some(limit) = parsed.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    sql
}

/// Single-table query rewritten for the container: the logical name is
/// replaced by the remote table name; the original name stays as alias when
/// they differ so qualified columns keep resolving.
pub fn forward_sql(parsed: &ParsedQuery, registration: &TableRegistration) -> String {
    let Some(table) = parsed.tables.first() else {
        return parsed.original.clone();
    };

    let remote = &registration.remote_table_name;
    let relation = if table.alias.is_none() && table.binding == *remote {
        remote.clone()
    } else {
        format!("{remote} AS {}", table.binding)
    };

    let mut sql = String::from("SELECT ");
    if let Some(distinct) = &parsed.distinct {
        sql.push_str(distinct);
        sql.push(' ');
    }
    sql.push_str(&parsed.select_list.join(", "));
    sql.push_str(" FROM ");
    sql.push_str(&relation);
    if let Some(where_sql) = parsed.where_sql() {
        sql.push_str(" WHERE ");
        sql.push_str(&where_sql);
    }
    if let Some(order_by) = &parsed.order_by {
        sql.push(' ');
        sql.push_str(order_by);
    }
    if let Some(limit) = parsed.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    sql
}
