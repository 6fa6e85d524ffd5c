// SPDX-License-Identifier: Apache-2.0

//! DuckDB in-memory engine for the local join.
//!
//! One connection is shared by the whole process and guarded by a mutex, so
//! statements from concurrent requests are serialized. Requests keep apart
//! through their unique temp table names.

use std::time::Instant;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, NaiveDate, NaiveTime};
use duckdb::types::Value as DuckValue;
use duckdb::{params_from_iter, Connection};
use parking_lot::Mutex;
use serde_json::{Number, Value};
use tracing::debug;

use fedquery_core::{ColumnMeta, FederationError, FederationResult, RowSet};
use fedquery_sql::quote_ident;

use super::local_engine::LocalEngine;
use super::types::TEMP_TABLE_PREFIX;

/// Batch size for inserting rows into DuckDB temp tables.
const INSERT_BATCH_SIZE: usize = 1000;

/// Days from 0001-01-01 to 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

pub struct DuckDbEngine {
    conn: Mutex<Connection>,
}

impl DuckDbEngine {
    /// Opens a new in-memory DuckDB instance.
    pub fn new() -> FederationResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| FederationError::internal(format!("Failed to open DuckDB: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl LocalEngine for DuckDbEngine {
    fn register(&self, name: &str, rows: &RowSet, declared: &[ColumnMeta]) -> FederationResult<()> {
        let start = Instant::now();

        let columns = if rows.columns.is_empty() {
            declared.iter().map(|c| c.name.clone()).collect()
        } else {
            rows.unique_columns()
        };
        if columns.is_empty() {
            return Err(FederationError::local_execution(format!(
                "Cannot create temp table '{name}': no columns"
            )));
        }

        let types: Vec<&'static str> = columns
            .iter()
            .enumerate()
            .map(|(i, column)| {
                let declared = declared.iter().find(|c| c.name.eq_ignore_ascii_case(column));
                infer_column_type(rows, i, declared)
            })
            .collect();

        let conn = self.conn.lock();
        create_temp_table(&conn, name, &columns, &types)?;
        if !rows.columns.is_empty() {
            insert_batch(&conn, name, &rows.rows, &types)?;
        }

        debug!(
            table = name,
            rows = rows.len(),
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Registered temp table"
        );
        Ok(())
    }

    fn execute(&self, sql: &str) -> FederationResult<RowSet> {
        let start = Instant::now();
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(sql).map_err(|e| {
            FederationError::local_execution(format!("Federation query failed: {e}"))
        })?;
        let mut rows = stmt.query([]).map_err(|e| {
            FederationError::local_execution(format!("Federation query failed: {e}"))
        })?;

        let columns: Vec<String> = rows
            .as_ref()
            .map(|s| s.column_names())
            .unwrap_or_default();
        let width = columns.len();

        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|e| FederationError::local_execution(format!("Row fetch failed: {e}")))?
        {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                let value: DuckValue = row.get(i).map_err(|e| {
                    FederationError::local_execution(format!("Row fetch failed: {e}"))
                })?;
                values.push(duckdb_to_json(value));
            }
            out.push(values);
        }

        debug!(
            rows = out.len(),
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local query finished"
        );
        Ok(RowSet::new(columns, out))
    }

    fn drop_table(&self, name: &str) -> FederationResult<()> {
        let sql = format!("DROP TABLE IF EXISTS {}", quote_ident(name));
        self.conn
            .lock()
            .execute_batch(&sql)
            .map_err(|e| FederationError::cleanup(name, e.to_string()))
    }

    fn registered_tables(&self) -> FederationResult<Vec<String>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT table_name FROM duckdb_tables() WHERE starts_with(table_name, '{TEMP_TABLE_PREFIX}') ORDER BY table_name"
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| FederationError::internal(format!("Failed to list temp tables: {e}")))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| FederationError::internal(format!("Failed to list temp tables: {e}")))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| FederationError::internal(format!("Failed to list temp tables: {e}")))?;
        Ok(names)
    }
}

fn create_temp_table(
    conn: &Connection,
    name: &str,
    columns: &[String],
    types: &[&str],
) -> FederationResult<()> {
    let col_defs: Vec<String> = columns
        .iter()
        .zip(types)
        .map(|(column, ty)| format!("{} {ty}", quote_ident(column)))
        .collect();

    let sql = format!(
        "CREATE TEMP TABLE {} ({})",
        quote_ident(name),
        col_defs.join(", ")
    );

    conn.execute_batch(&sql).map_err(|e| {
        FederationError::local_execution(format!("Failed to create temp table '{name}': {e}"))
    })
}

fn insert_batch(
    conn: &Connection,
    table: &str,
    rows: &[Vec<Value>],
    types: &[&str],
) -> FederationResult<()> {
    if rows.is_empty() {
        return Ok(());
    }

    let placeholders = vec!["?"; types.len()].join(", ");
    let sql = format!("INSERT INTO {} VALUES ({placeholders})", quote_ident(table));

    for chunk in rows.chunks(INSERT_BATCH_SIZE) {
        let tx = conn.unchecked_transaction().map_err(|e| {
            FederationError::local_execution(format!("DuckDB transaction failed: {e}"))
        })?;

        {
            let mut stmt = tx.prepare_cached(&sql).map_err(|e| {
                FederationError::local_execution(format!("DuckDB prepare failed: {e}"))
            })?;

            for row in chunk {
                let values: Vec<DuckValue> = row
                    .iter()
                    .zip(types)
                    .map(|(value, ty)| json_to_duckdb(value, ty))
                    .collect();

                stmt.execute(params_from_iter(values.iter())).map_err(|e| {
                    FederationError::local_execution(format!("DuckDB insert into '{table}' failed: {e}"))
                })?;
            }
        }

        tx.commit().map_err(|e| {
            FederationError::local_execution(format!("DuckDB commit failed: {e}"))
        })?;
    }

    Ok(())
}

/// Chooses the DuckDB type of column `index`.
///
/// A recognized declared type wins whenever every value fits it, so a
/// key-restricted subset is typed like the full table. Otherwise the type
/// is inferred from the values.
fn infer_column_type(rows: &RowSet, index: usize, declared: Option<&ColumnMeta>) -> &'static str {
    let declared = declared.and_then(|c| declared_duckdb_type(&c.data_type));
    if let Some(ty) = declared {
        if rows.column_values(index).all(|v| value_fits(v, ty)) {
            return ty;
        }
    }

    let mut kind: Option<&'static str> = None;
    for value in rows.column_values(index) {
        let this = match value {
            Value::Null => continue,
            Value::Bool(_) => "BOOLEAN",
            Value::Number(n) if n.is_i64() => "BIGINT",
            Value::Number(_) => "DOUBLE",
            _ => "VARCHAR",
        };
        kind = Some(match (kind, this) {
            (None, t) => t,
            (Some(a), b) if a == b => a,
            (Some("BIGINT"), "DOUBLE") | (Some("DOUBLE"), "BIGINT") => "DOUBLE",
            _ => return "VARCHAR",
        });
    }

    kind.or(declared).unwrap_or("VARCHAR")
}

fn value_fits(value: &Value, column_type: &str) -> bool {
    match (value, column_type) {
        (Value::Null, _) | (_, "VARCHAR") => true,
        (Value::Bool(_), "BOOLEAN") => true,
        (Value::Number(n), "BIGINT") => n.is_i64(),
        (Value::Number(_), "DOUBLE") => true,
        _ => false,
    }
}

/// Maps a remote type name to a DuckDB type, `None` when unrecognized.
///
/// Temporal, binary and structured values travel as JSON strings and are
/// staged as VARCHAR.
fn declared_duckdb_type(data_type: &str) -> Option<&'static str> {
    let lower = data_type.to_lowercase();
    let normalized = lower.trim();

    if normalized.ends_with("[]") || normalized.starts_with("array") {
        return Some("VARCHAR");
    }

    let ty = match normalized {
        "boolean" | "bool" => "BOOLEAN",
        "tinyint" | "smallint" | "int2" | "integer" | "int" | "int4" | "bigint" | "int8"
        | "hugeint" | "serial" | "bigserial" => "BIGINT",
        "real" | "float" | "float4" | "double" | "double precision" | "float8" => "DOUBLE",
        "text" | "string" | "uuid" | "json" | "jsonb" | "date" | "time" | "datetime"
        | "interval" | "blob" | "bytea" | "binary" | "varbinary" => "VARCHAR",
        _ if normalized.starts_with("numeric") || normalized.starts_with("decimal") => "DOUBLE",
        _ if normalized.starts_with("varchar")
            || normalized.starts_with("char")
            || normalized.starts_with("character")
            || normalized.starts_with("timestamp") =>
        {
            "VARCHAR"
        }
        _ => return None,
    };
    Some(ty)
}

/// Converts a JSON value to a DuckDB value for a column of type `column_type`.
fn json_to_duckdb(value: &Value, column_type: &str) -> DuckValue {
    match (value, column_type) {
        (Value::Null, _) => DuckValue::Null,
        (Value::Bool(b), "BOOLEAN") => DuckValue::Boolean(*b),
        (Value::Number(n), "BIGINT") => n
            .as_i64()
            .map(DuckValue::BigInt)
            .unwrap_or_else(|| DuckValue::Text(n.to_string())),
        (Value::Number(n), "DOUBLE") => n
            .as_f64()
            .map(DuckValue::Double)
            .unwrap_or_else(|| DuckValue::Text(n.to_string())),
        (Value::String(s), _) => DuckValue::Text(s.clone()),
        (other, _) => DuckValue::Text(other.to_string()),
    }
}

fn float_to_json(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

/// Converts a DuckDB result value to JSON.
fn duckdb_to_json(value: DuckValue) -> Value {
    match value {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(b) => Value::Bool(b),
        DuckValue::TinyInt(i) => Value::from(i),
        DuckValue::SmallInt(i) => Value::from(i),
        DuckValue::Int(i) => Value::from(i),
        DuckValue::BigInt(i) => Value::from(i),
        DuckValue::UTinyInt(i) => Value::from(i),
        DuckValue::USmallInt(i) => Value::from(i),
        DuckValue::UInt(i) => Value::from(i),
        DuckValue::UBigInt(i) => Value::from(i),
        DuckValue::HugeInt(i) => i64::try_from(i)
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(i.to_string())),
        DuckValue::Float(f) => float_to_json(f64::from(f)),
        DuckValue::Double(f) => float_to_json(f),
        DuckValue::Decimal(d) => {
            let text = d.to_string();
            text.parse::<f64>()
                .map(float_to_json)
                .unwrap_or(Value::String(text))
        }
        DuckValue::Text(s) | DuckValue::Enum(s) => Value::String(s),
        DuckValue::Blob(bytes) => Value::String(BASE64.encode(bytes)),
        DuckValue::Date32(days) => NaiveDate::from_num_days_from_ce_opt(days + UNIX_EPOCH_DAYS_FROM_CE)
            .map(|d| Value::String(d.to_string()))
            .unwrap_or(Value::Null),
        DuckValue::Timestamp(unit, v) => DateTime::from_timestamp_micros(unit.to_micros(v))
            .map(|dt| Value::String(dt.naive_utc().to_string()))
            .unwrap_or(Value::Null),
        DuckValue::Time64(unit, v) => {
            let micros = unit.to_micros(v);
            NaiveTime::from_num_seconds_from_midnight_opt(
                (micros / 1_000_000) as u32,
                ((micros % 1_000_000) * 1000) as u32,
            )
            .map(|t| Value::String(t.to_string()))
            .unwrap_or(Value::Null)
        }
        DuckValue::List(items) => Value::Array(items.into_iter().map(duckdb_to_json).collect()),
        other => Value::String(format!("{other:?}")),
    }
}
