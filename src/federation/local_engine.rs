// SPDX-License-Identifier: Apache-2.0

//! Contract of the embedded engine that runs the final join.

use fedquery_core::{ColumnMeta, FederationResult, RowSet};

/// A local SQL engine holding request-scoped temp tables.
///
/// Calls are synchronous and may block; async code reaches the engine
/// through `tokio::task::spawn_blocking` (see [`super::TempTableScope`]).
pub trait LocalEngine: Send + Sync {
    /// Creates temp table `name` and loads `rows` into it. `declared` holds
    /// the remote column types, preferred over the values' own types when
    /// every value fits.
    fn register(&self, name: &str, rows: &RowSet, declared: &[ColumnMeta]) -> FederationResult<()>;

    fn execute(&self, sql: &str) -> FederationResult<RowSet>;

    /// Drops `name`. Dropping a table that does not exist is not an error.
    fn drop_table(&self, name: &str) -> FederationResult<()>;

    /// Names of the temp tables currently registered.
    fn registered_tables(&self) -> FederationResult<Vec<String>>;
}
