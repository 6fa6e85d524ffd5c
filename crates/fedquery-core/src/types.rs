// SPDX-License-Identifier: Apache-2.0

//! Data types shared by the federation engine
//!
//! Rows travel between the remote containers, the local join engine and the
//! HTTP layer as JSON values, so a single positional representation is used
//! everywhere: `RowSet`.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Column as reported by a remote container's `/metadata` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    #[serde(rename = "type", default)]
    pub data_type: String,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// Table statistics used for planning. Fetched per request, never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub row_count: u64,
    #[serde(default)]
    pub columns: Vec<ColumnMeta>,
}

impl TableMetadata {
    /// Case-insensitive column lookup.
    pub fn column(&self, name: &str) -> Option<&ColumnMeta> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }
}

/// A block of rows with positional values, ordered like `columns`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl RowSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    /// A row set with a schema but no rows.
    pub fn empty(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Builds a row set from a remote `{results, columns}` payload.
    ///
    /// Rows may be positional arrays or objects keyed by column name. When
    /// `columns` is empty and rows are objects, the first row's key order
    /// becomes the column order.
    pub fn from_remote(mut columns: Vec<String>, results: Vec<Value>) -> Result<Self, String> {
        if columns.is_empty() {
            if let Some(Value::Object(first)) = results.first() {
                columns = first.keys().cloned().collect();
            }
        }

        let mut rows = Vec::with_capacity(results.len());
        for (i, item) in results.into_iter().enumerate() {
            match item {
                Value::Array(values) => {
                    if values.len() != columns.len() {
                        return Err(format!(
                            "row {i} has {} values but {} columns were declared",
                            values.len(),
                            columns.len()
                        ));
                    }
                    rows.push(values);
                }
                Value::Object(mut record) => {
                    let values = columns
                        .iter()
                        .map(|c| record.remove(c).unwrap_or(Value::Null))
                        .collect();
                    rows.push(values);
                }
                other => {
                    return Err(format!(
                        "row {i} is neither an array nor an object: {other}"
                    ));
                }
            }
        }

        Ok(Self { columns, rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Case-insensitive column position.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Values of one column, in row order.
    pub fn column_values(&self, index: usize) -> impl Iterator<Item = &Value> + '_ {
        self.rows.iter().filter_map(move |row| row.get(index))
    }

    /// Appends the rows of another block with the same schema.
    pub fn extend(&mut self, other: RowSet) -> Result<(), String> {
        if self.columns.is_empty() && self.rows.is_empty() {
            *self = other;
            return Ok(());
        }
        if other.columns.is_empty() && other.rows.is_empty() {
            return Ok(());
        }
        let same_schema = self.columns.len() == other.columns.len()
            && self
                .columns
                .iter()
                .zip(&other.columns)
                .all(|(a, b)| a.eq_ignore_ascii_case(b));
        if !same_schema {
            return Err(format!(
                "cannot merge row sets with different columns: [{}] vs [{}]",
                self.columns.join(", "),
                other.columns.join(", ")
            ));
        }
        self.rows.extend(other.rows);
        Ok(())
    }

    /// Column names made unique so that every value survives conversion to
    /// a JSON object (`id`, `id` becomes `id`, `id_1`).
    pub fn unique_columns(&self) -> Vec<String> {
        let mut seen: HashSet<String> = HashSet::with_capacity(self.columns.len());
        let mut out = Vec::with_capacity(self.columns.len());
        for name in &self.columns {
            let mut candidate = name.clone();
            let mut n = 1;
            while !seen.insert(candidate.clone()) {
                candidate = format!("{name}_{n}");
                n += 1;
            }
            out.push(candidate);
        }
        out
    }

    /// Converts into JSON records plus the (unique) column names used as keys.
    pub fn into_records(self) -> (Vec<String>, Vec<Map<String, Value>>) {
        let columns = self.unique_columns();
        let records = self
            .rows
            .into_iter()
            .map(|row| columns.iter().cloned().zip(row).collect::<Map<_, _>>())
            .collect();
        (columns, records)
    }
}

/// How a request was executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    /// Forwarded verbatim to one container.
    #[default]
    SingleTable,
    /// Driving-table plan with push-down and key-restricted fetches.
    Optimized,
    /// Every table fetched in full.
    Fallback,
}

impl std::fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::SingleTable => "single_table",
            Self::Optimized => "optimized",
            Self::Fallback => "fallback",
        };
        f.write_str(name)
    }
}

/// Final result of a federated query
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    /// Result rows keyed by column name
    pub rows: Vec<Map<String, Value>>,
    /// Column names in output order
    pub columns: Vec<String>,
    /// Wall-clock time of the whole request in milliseconds
    pub execution_time_ms: f64,
    /// Distinct logical tables the query touched, in query order
    pub source_tables: Vec<String>,
    #[serde(skip)]
    pub strategy: ExecutionStrategy,
}

impl QueryResult {
    pub fn from_row_set(
        rows: RowSet,
        source_tables: Vec<String>,
        strategy: ExecutionStrategy,
        execution_time_ms: f64,
    ) -> Self {
        let (columns, rows) = rows.into_records();
        Self {
            rows,
            columns,
            execution_time_ms,
            source_tables,
            strategy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn metadata_deserializes_type_field() {
        let meta: TableMetadata = serde_json::from_value(json!({
            "row_count": 10,
            "columns": [{"name": "id", "type": "INTEGER"}, {"name": "region", "type": "VARCHAR"}]
        }))
        .expect("metadata should parse");

        assert_eq!(meta.row_count, 10);
        assert_eq!(meta.columns[0].data_type, "INTEGER");
        assert!(meta.has_column("REGION"));
        assert!(!meta.has_column("balance"));
    }

    #[test]
    fn remote_positional_rows_are_kept() {
        let rows = RowSet::from_remote(
            vec!["id".into(), "name".into()],
            vec![json!([1, "a"]), json!([2, "b"])],
        )
        .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows.rows[1], vec![json!(2), json!("b")]);
    }

    #[test]
    fn remote_keyed_rows_follow_declared_columns() {
        let rows = RowSet::from_remote(
            vec!["name".into(), "id".into()],
            vec![json!({"id": 1, "name": "a"}), json!({"id": 2})],
        )
        .unwrap();
        assert_eq!(rows.rows[0], vec![json!("a"), json!(1)]);
        assert_eq!(rows.rows[1], vec![Value::Null, json!(2)]);
    }

    #[test]
    fn remote_keyed_rows_without_columns_use_first_row_order() {
        let rows = RowSet::from_remote(vec![], vec![json!({"b": 1, "a": 2})]).unwrap();
        assert_eq!(rows.columns, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn remote_rejects_ragged_rows() {
        let err = RowSet::from_remote(vec!["id".into()], vec![json!([1, 2])]).unwrap_err();
        assert!(err.contains("row 0"));
    }

    #[test]
    fn extend_requires_matching_schema() {
        let mut a = RowSet::new(vec!["id".into()], vec![vec![json!(1)]]);
        a.extend(RowSet::new(vec!["ID".into()], vec![vec![json!(2)]]))
            .unwrap();
        assert_eq!(a.len(), 2);

        let err = a
            .extend(RowSet::new(vec!["other".into()], vec![]))
            .unwrap_err();
        assert!(err.contains("different columns"));
    }

    #[test]
    fn duplicate_columns_become_unique_record_keys() {
        let rows = RowSet::new(
            vec!["id".into(), "id".into(), "id_1".into()],
            vec![vec![json!(1), json!(2), json!(3)]],
        );
        let (columns, records) = rows.into_records();
        assert_eq!(columns, vec!["id", "id_1", "id_1_1"]);
        assert_eq!(records[0]["id_1"], json!(2));
        assert_eq!(records[0]["id_1_1"], json!(3));
    }
}
