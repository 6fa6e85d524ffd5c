// SPDX-License-Identifier: Apache-2.0

//! Request-scoped temp tables.
//!
//! A [`TempTableScope`] records every temp table name before the table is
//! created and drops all of them when released or dropped, so no exit path
//! of a request leaves tables behind in the shared local engine.

use std::mem;
use std::sync::Arc;

use tracing::warn;

use fedquery_core::{ColumnMeta, FederationError, FederationResult, RowSet};

use crate::metrics;

use super::local_engine::LocalEngine;

pub struct TempTableScope {
    engine: Arc<dyn LocalEngine>,
    tables: Vec<String>,
}

impl TempTableScope {
    pub fn new(engine: Arc<dyn LocalEngine>) -> Self {
        Self {
            engine,
            tables: Vec::new(),
        }
    }

    /// Names registered (or attempted) through this scope.
    #[cfg(test)]
    fn tables(&self) -> &[String] {
        &self.tables
    }

    /// Registers `rows` as temp table `name` on a blocking thread.
    pub async fn register(
        &mut self,
        name: String,
        rows: Arc<RowSet>,
        declared: Vec<ColumnMeta>,
    ) -> FederationResult<()> {
        // Recorded first: a failed CREATE may still leave a table behind.
        self.tables.push(name.clone());

        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || engine.register(&name, &rows, &declared))
            .await
            .map_err(|e| FederationError::internal(format!("Staging task failed: {e}")))?
    }

    /// Runs `sql` on the local engine on a blocking thread.
    pub async fn execute(&self, sql: String) -> FederationResult<RowSet> {
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || engine.execute(&sql))
            .await
            .map_err(|e| FederationError::internal(format!("Local query task failed: {e}")))?
    }

    /// Drops every recorded table. Failures are logged and counted, never
    /// returned.
    pub async fn release(mut self) {
        let tables = mem::take(&mut self.tables);
        if tables.is_empty() {
            return;
        }

        let engine = Arc::clone(&self.engine);
        if let Err(e) = tokio::task::spawn_blocking(move || drop_all(engine.as_ref(), &tables)).await {
            warn!(error = %e, "Temp table cleanup task failed");
        }
    }
}

impl Drop for TempTableScope {
    fn drop(&mut self) {
        // Only reached when `release` was skipped (early return or panic).
        if !self.tables.is_empty() {
            let tables = mem::take(&mut self.tables);
            drop_all(self.engine.as_ref(), &tables);
        }
    }
}

fn drop_all(engine: &dyn LocalEngine, tables: &[String]) {
    for table in tables {
        if let Err(e) = engine.drop_table(table) {
            let err = match e {
                cleanup @ FederationError::Cleanup { .. } => cleanup,
                other => FederationError::cleanup(table, other.to_string()),
            };
            warn!(table = %table, error = %err, "Temp table cleanup failed");
            metrics::record_cleanup_failure();
        }
    }
}
