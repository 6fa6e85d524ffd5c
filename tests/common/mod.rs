//! In-process data containers for federation tests.
//!
//! Every container is its own in-memory DuckDB holding one table, queried
//! through the `RemoteSource` trait exactly like the HTTP client would.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use fedquery_core::{
    ColumnMeta, FederationError, FederationResult, RowSet, TableEntry, TableMetadata,
    TableRegistration, TableRegistry,
};
use fedquery_lib::federation::{DuckDbEngine, Federator, FederatorOptions, LocalEngine};
use fedquery_lib::remote::RemoteSource;

/// One call received by a fake container. `sql` is `None` for metadata.
#[derive(Debug, Clone)]
pub struct RemoteCall {
    pub table: String,
    pub sql: Option<String>,
}

struct Container {
    engine: DuckDbEngine,
    columns: Vec<ColumnMeta>,
    rows: u64,
}

#[derive(Default)]
pub struct FakeRemote {
    containers: HashMap<String, Container>,
    calls: Mutex<Vec<RemoteCall>>,
    failing_metadata: Mutex<bool>,
    failing_tables: Mutex<HashSet<String>>,
    row_count_overrides: Mutex<HashMap<String, u64>>,
    stripped_columns: Mutex<HashMap<String, String>>,
    numeric_columns: Mutex<HashMap<String, String>>,
    query_delay: Mutex<Option<Duration>>,
}

impl FakeRemote {
    /// Adds a container hosting `remote_name`, registered as `logical`.
    pub fn with_table(
        mut self,
        logical: &str,
        remote_name: &str,
        columns: &[(&str, &str)],
        rows: Vec<Vec<Value>>,
    ) -> Self {
        let engine = DuckDbEngine::new().unwrap();
        let declared: Vec<ColumnMeta> = columns
            .iter()
            .map(|(name, ty)| ColumnMeta::new(*name, *ty))
            .collect();
        let row_set = RowSet::new(declared.iter().map(|c| c.name.clone()).collect(), rows);
        engine.register(remote_name, &row_set, &declared).unwrap();

        self.containers.insert(
            logical.to_string(),
            Container {
                engine,
                columns: declared,
                rows: row_set.len() as u64,
            },
        );
        self
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().clone()
    }

    pub fn queries_for(&self, table: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.table == table)
            .filter_map(|c| c.sql)
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn fail_metadata(&self, fail: bool) {
        *self.failing_metadata.lock() = fail;
    }

    pub fn fail_queries_for(&self, table: &str) {
        self.failing_tables.lock().insert(table.to_string());
    }

    pub fn report_row_count(&self, table: &str, rows: u64) {
        self.row_count_overrides.lock().insert(table.to_string(), rows);
    }

    /// Filtered queries on `table` come back without `column`, like a
    /// container serving a narrower view for WHERE queries.
    pub fn strip_column_when_filtered(&self, table: &str, column: &str) {
        self.stripped_columns
            .lock()
            .insert(table.to_string(), column.to_string());
    }

    /// Integer-looking strings in `column` of `table` come back as JSON
    /// numbers, like a dynamically typed store.
    pub fn return_numbers_for(&self, table: &str, column: &str) {
        self.numeric_columns
            .lock()
            .insert(table.to_string(), column.to_string());
    }

    /// Every query waits `delay` before answering.
    pub fn delay_queries(&self, delay: Duration) {
        *self.query_delay.lock() = Some(delay);
    }

    /// Runs `sql` directly on a container, bypassing the federator.
    pub fn direct(&self, table: &str, sql: &str) -> RowSet {
        self.containers[table].engine.execute(sql).unwrap()
    }

    fn container(&self, table: &TableRegistration) -> FederationResult<&Container> {
        self.containers.get(&table.logical_name).ok_or_else(|| {
            FederationError::remote_execution(&table.logical_name, "connection refused")
        })
    }
}

#[async_trait]
impl RemoteSource for FakeRemote {
    async fn get_metadata(&self, table: &TableRegistration) -> FederationResult<TableMetadata> {
        self.calls.lock().push(RemoteCall {
            table: table.logical_name.clone(),
            sql: None,
        });
        if *self.failing_metadata.lock() {
            return Err(FederationError::remote_metadata(&table.logical_name, "timed out"));
        }

        let container = self.container(table)?;
        let row_count = self
            .row_count_overrides
            .lock()
            .get(&table.logical_name)
            .copied()
            .unwrap_or(container.rows);
        Ok(TableMetadata {
            row_count,
            columns: container.columns.clone(),
        })
    }

    async fn execute(&self, table: &TableRegistration, sql: &str) -> FederationResult<RowSet> {
        self.calls.lock().push(RemoteCall {
            table: table.logical_name.clone(),
            sql: Some(sql.to_string()),
        });
        if self.failing_tables.lock().contains(&table.logical_name) {
            return Err(FederationError::remote_execution(
                &table.logical_name,
                "HTTP 503 Service Unavailable",
            ));
        }

        let delay = *self.query_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let rows = self
            .container(table)?
            .engine
            .execute(sql)
            .map_err(|e| FederationError::remote_execution(&table.logical_name, e.to_string()))?;

        let stripped = self.stripped_columns.lock().get(&table.logical_name).cloned();
        let rows = match stripped {
            Some(column) if sql.contains(" WHERE ") => without_column(rows, &column),
            _ => rows,
        };
        let numeric = self.numeric_columns.lock().get(&table.logical_name).cloned();
        Ok(match numeric {
            Some(column) => with_numbers(rows, &column),
            None => rows,
        })
    }
}

fn without_column(rows: RowSet, column: &str) -> RowSet {
    let Some(index) = rows.column_index(column) else {
        return rows;
    };
    let mut columns = rows.columns;
    columns.remove(index);
    let rows = rows
        .rows
        .into_iter()
        .map(|mut row| {
            row.remove(index);
            row
        })
        .collect();
    RowSet::new(columns, rows)
}

fn with_numbers(mut rows: RowSet, column: &str) -> RowSet {
    if let Some(index) = rows.column_index(column) {
        for row in &mut rows.rows {
            if let Some(n) = row[index].as_str().and_then(|s| s.parse::<i64>().ok()) {
                row[index] = json!(n);
            }
        }
    }
    rows
}

/// Local engine wrapper that can refuse registrations and counts dropped
/// tables.
pub struct TrackingEngine {
    inner: DuckDbEngine,
    refused_registrations: AtomicUsize,
    drops: AtomicUsize,
}

impl TrackingEngine {
    pub fn new() -> Self {
        Self {
            inner: DuckDbEngine::new().unwrap(),
            refused_registrations: AtomicUsize::new(0),
            drops: AtomicUsize::new(0),
        }
    }

    /// The next `count` registrations fail without creating anything.
    pub fn refuse_registrations(&self, count: usize) {
        self.refused_registrations.store(count, Ordering::SeqCst);
    }

    pub fn drops(&self) -> usize {
        self.drops.load(Ordering::SeqCst)
    }
}

impl LocalEngine for TrackingEngine {
    fn register(&self, name: &str, rows: &RowSet, declared: &[ColumnMeta]) -> FederationResult<()> {
        let refused = self
            .refused_registrations
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(FederationError::local_execution(format!(
                "Out of memory while creating '{name}'"
            )));
        }
        self.inner.register(name, rows, declared)
    }

    fn execute(&self, sql: &str) -> FederationResult<RowSet> {
        self.inner.execute(sql)
    }

    fn drop_table(&self, name: &str) -> FederationResult<()> {
        let result = self.inner.drop_table(name);
        self.drops.fetch_add(1, Ordering::SeqCst);
        result
    }

    fn registered_tables(&self) -> FederationResult<Vec<String>> {
        self.inner.registered_tables()
    }
}

pub struct Fixture {
    pub remote: Arc<FakeRemote>,
    pub engine: Arc<dyn LocalEngine>,
    pub federator: Federator,
}

impl Fixture {
    pub fn temp_tables(&self) -> Vec<String> {
        self.engine.registered_tables().unwrap()
    }
}

pub fn registry_for(tables: &[(&str, &str)]) -> TableRegistry {
    TableRegistry::from_entries(tables.iter().map(|(logical, remote)| {
        (
            logical.to_string(),
            TableEntry {
                url: format!("{logical}-container"),
                port: 8000,
                table_name: remote.to_string(),
            },
        )
    }))
    .unwrap()
}

pub fn account_rows() -> Vec<Vec<Value>> {
    (1..=10)
        .map(|id| {
            let region = if id % 2 == 0 { "EU" } else { "US" };
            vec![json!(id), json!(region), json!(format!("acct-{id}"))]
        })
        .collect()
}

/// 40 transactions; `account_id` cycles through 1..=12, so some reference
/// accounts that do not exist.
pub fn transaction_rows() -> Vec<Vec<Value>> {
    (1..=40)
        .map(|id: i64| {
            vec![
                json!(id),
                json!(id % 12 + 1),
                json!(id * 10),
                if id % 7 == 0 { Value::Null } else { json!("card") },
            ]
        })
        .collect()
}

pub fn bank_remote() -> FakeRemote {
    FakeRemote::default()
        .with_table(
            "accounts",
            "accounts",
            &[("id", "INTEGER"), ("region", "VARCHAR"), ("name", "VARCHAR")],
            account_rows(),
        )
        .with_table(
            "transactions",
            "transactions",
            &[
                ("id", "INTEGER"),
                ("account_id", "INTEGER"),
                ("amount", "INTEGER"),
                ("method", "VARCHAR"),
            ],
            transaction_rows(),
        )
}

pub fn bank_fixture_with(options: FederatorOptions) -> Fixture {
    let engine: Arc<dyn LocalEngine> = Arc::new(DuckDbEngine::new().unwrap());
    bank_fixture_on(engine, options)
}

pub fn bank_fixture_on(engine: Arc<dyn LocalEngine>, options: FederatorOptions) -> Fixture {
    let remote = Arc::new(bank_remote());
    let registry = registry_for(&[("accounts", "accounts"), ("transactions", "transactions")]);

    let federator = Federator::new(
        Arc::new(registry),
        Arc::clone(&remote) as Arc<dyn RemoteSource>,
        Arc::clone(&engine),
    )
    .with_options(options);

    Fixture {
        remote,
        engine,
        federator,
    }
}

pub fn bank_fixture() -> Fixture {
    bank_fixture_with(FederatorOptions::default())
}

/// Rows as sorted JSON strings, for set comparison.
pub fn row_set_of(rows: &[serde_json::Map<String, Value>]) -> Vec<String> {
    let mut out: Vec<String> = rows
        .iter()
        .map(|r| serde_json::to_string(r).unwrap())
        .collect();
    out.sort();
    out
}
