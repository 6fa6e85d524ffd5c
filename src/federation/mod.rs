// SPDX-License-Identifier: Apache-2.0

//! Federation Engine
//!
//! Answers SQL queries whose tables live in different remote containers.
//! Multi-table queries fetch partial results, stage them in an embedded
//! DuckDB as request-scoped temp tables, and run the join locally.

pub mod duckdb_engine;
pub mod executor;
pub mod local_engine;
pub mod manager;
pub mod planner;
pub mod scope;
pub mod types;

pub use duckdb_engine::DuckDbEngine;
pub use local_engine::LocalEngine;
pub use manager::Federator;
pub use scope::TempTableScope;
pub use types::{
    DependentFetch, ExecutionPlan, FallbackReason, FederatorOptions, PlanDecision, TempNamer,
};
