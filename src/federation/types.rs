// SPDX-License-Identifier: Apache-2.0

//! Types for the federation planner and executor.

use std::collections::HashMap;

use thiserror::Error;
use uuid::Uuid;

use fedquery_core::TableMetadata;

/// Prefix of every temp table the engine creates.
pub const TEMP_TABLE_PREFIX: &str = "__fed_";

/// Maximum number of join keys sent in one `IN (...)` list.
pub const DEFAULT_KEY_CHUNK_SIZE: usize = 1000;

/// Tunables of the federation engine.
#[derive(Debug, Clone)]
pub struct FederatorOptions {
    /// Join keys per dependent fetch; larger key sets are split across
    /// several fetches whose rows are concatenated.
    pub key_chunk_size: usize,
}

impl Default for FederatorOptions {
    fn default() -> Self {
        Self {
            key_chunk_size: DEFAULT_KEY_CHUNK_SIZE,
        }
    }
}

/// Produces temp table names unique per request and per attempt
/// (e.g., "__fed_accounts_3f2a..._fb").
#[derive(Debug, Clone)]
pub struct TempNamer {
    request_id: String,
    suffix: &'static str,
}

impl TempNamer {
    pub fn new(request_id: Uuid) -> Self {
        Self {
            request_id: request_id.simple().to_string(),
            suffix: "",
        }
    }

    /// Namer for the fallback attempt of the same request.
    pub fn fallback(&self) -> Self {
        Self {
            request_id: self.request_id.clone(),
            suffix: "_fb",
        }
    }

    pub fn name(&self, table: &str) -> String {
        format!(
            "{TEMP_TABLE_PREFIX}{table}_{}{}",
            self.request_id, self.suffix
        )
    }
}

/// A key-restricted fetch of `table`, driven by the already fetched
/// `source_table`: `table.key_column IN (distinct source_table.source_column)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependentFetch {
    pub table: String,
    pub key_column: String,
    pub source_table: String,
    pub source_column: String,
}

/// The optimized plan for a multi-table query.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    /// Table fetched first (minimum row count)
    pub driving_table: String,
    /// Push-down predicates per table, already qualified with the remote
    /// table name
    pub per_table_predicates: HashMap<String, Vec<String>>,
    /// Predicates only evaluated by the local join
    pub common_predicates: Vec<String>,
    /// Logical table name -> temp table name
    pub temp_table_names: HashMap<String, String>,
    /// Waves of dependent fetches; each wave only depends on earlier ones
    pub stages: Vec<Vec<DependentFetch>>,
    /// Tables not reachable from the driving table through join conditions;
    /// fetched with their push-down predicates only
    pub detached: Vec<String>,
    pub metadata: HashMap<String, TableMetadata>,
}

impl ExecutionPlan {
    pub fn predicates_for(&self, table: &str) -> &[String] {
        self.per_table_predicates
            .get(table)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn metadata_for(&self, table: &str) -> Option<&TableMetadata> {
        self.metadata.get(table)
    }
}

/// Why a multi-table query left the optimized path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FallbackReason {
    #[error("metadata unavailable: {0}")]
    MetadataUnavailable(String),

    #[error("remote fetch failed: {0}")]
    FetchFailed(String),

    #[error("join key column '{column}' missing from '{table}'")]
    JoinKeyMissing { table: String, column: String },

    #[error("staging failed: {0}")]
    StagingFailed(String),
}

impl FallbackReason {
    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MetadataUnavailable(_) => "metadata_unavailable",
            Self::FetchFailed(_) => "fetch_failed",
            Self::JoinKeyMissing { .. } => "join_key_missing",
            Self::StagingFailed(_) => "staging_failed",
        }
    }
}

/// Outcome of planning a multi-table query.
#[derive(Debug, Clone)]
pub enum PlanDecision {
    Optimized(ExecutionPlan),
    Fallback(FallbackReason),
}
