// SPDX-License-Identifier: Apache-2.0

//! Command-line options and table configuration loading.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;

use fedquery_core::{FederationError, FederationResult, TableRegistry};

use crate::observability::LogOptions;

/// Federated SQL over HTTP data containers.
#[derive(Debug, Clone, Parser)]
#[command(name = "fedquery", version, about)]
pub struct Cli {
    /// Table configuration file (JSON)
    #[arg(long, env = "FEDQUERY_CONFIG", default_value = "config.json")]
    pub config: PathBuf,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, default_value_t = 8000)]
    pub port: u16,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Write logs to daily rolling files in this directory instead of stdout
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Timeout for each call to a data container, in seconds
    #[arg(long, default_value_t = 30)]
    pub remote_timeout_secs: u64,
}

impl Cli {
    /// Host and port to listen on. Host names are resolved at bind time.
    pub fn listen_addr(&self) -> (&str, u16) {
        (self.host.as_str(), self.port)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs.max(1))
    }

    pub fn log_options(&self) -> LogOptions {
        LogOptions {
            debug: self.debug,
            log_dir: self.log_dir.clone(),
        }
    }
}

/// Reads and validates the table configuration file.
pub fn load_registry(path: &Path) -> FederationResult<TableRegistry> {
    let json = fs::read_to_string(path).map_err(|e| {
        FederationError::configuration(format!(
            "Failed to read table configuration {}: {e}",
            path.display()
        ))
    })?;
    TableRegistry::from_json(&json)
}
