// SPDX-License-Identifier: Apache-2.0

//! Access to the remote data containers.

pub mod client;

use async_trait::async_trait;

use fedquery_core::{FederationResult, RowSet, TableMetadata, TableRegistration};

pub use client::HttpRemoteClient;

// ─── Trait ───────────────────────────────────────────────────

/// A queryable remote table host. Implementations never retry; the
/// federation planner decides what to do with a failure.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Row count and column list of the registered table.
    async fn get_metadata(&self, table: &TableRegistration) -> FederationResult<TableMetadata>;

    /// Runs `sql` on the container hosting `table`.
    async fn execute(&self, table: &TableRegistration, sql: &str) -> FederationResult<RowSet>;
}
