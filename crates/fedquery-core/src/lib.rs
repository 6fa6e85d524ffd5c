// SPDX-License-Identifier: Apache-2.0

//! Core types for the fedquery federation engine: the table registry, the
//! row and metadata model, and the error taxonomy shared by every crate.

pub mod error;
pub mod registry;
pub mod types;

pub use error::{FederationError, FederationResult};
pub use registry::{TableEntry, TableRegistration, TableRegistry};
pub use types::{ColumnMeta, ExecutionStrategy, QueryResult, RowSet, TableMetadata};
