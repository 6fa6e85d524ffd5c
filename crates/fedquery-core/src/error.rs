// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy for the federation engine
//!
//! Every failure inside a request is mapped to one of these variants so the
//! orchestrator can decide whether to fail fast, fall back, or only log.

use serde::Serialize;
use thiserror::Error;

/// Unified error type for federation operations
#[derive(Debug, Clone, Error, Serialize)]
pub enum FederationError {
    /// The query names a logical table that is not registered, or the
    /// registry itself is invalid.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The query uses SQL outside the supported subset.
    #[error("Unsupported query: {message}")]
    UnsupportedQuery { message: String },

    #[error("Metadata fetch failed for '{table}': {message}")]
    RemoteMetadata { table: String, message: String },

    #[error("Remote query failed for '{table}': {message}")]
    RemoteExecution { table: String, message: String },

    #[error("Local join execution failed: {message}")]
    LocalExecution { message: String },

    /// A temp table could not be dropped. Logged, never returned to callers.
    #[error("Failed to drop temp table '{table}': {message}")]
    Cleanup { table: String, message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl FederationError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration { message: msg.into() }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedQuery { message: msg.into() }
    }

    pub fn remote_metadata(table: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::RemoteMetadata {
            table: table.into(),
            message: msg.into(),
        }
    }

    pub fn remote_execution(table: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::RemoteExecution {
            table: table.into(),
            message: msg.into(),
        }
    }

    pub fn local_execution(msg: impl Into<String>) -> Self {
        Self::LocalExecution { message: msg.into() }
    }

    pub fn cleanup(table: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Cleanup {
            table: table.into(),
            message: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal { message: msg.into() }
    }

    /// True for errors caused by the request itself rather than by a
    /// remote container or the local engine.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. } | Self::UnsupportedQuery { .. }
        )
    }

    /// HTTP status code used when the error reaches the API boundary.
    pub fn status_code(&self) -> u16 {
        if self.is_client_error() {
            400
        } else {
            500
        }
    }
}

/// Result type alias for federation operations
pub type FederationResult<T> = Result<T, FederationError>;
