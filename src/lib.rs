// fedquery - federated SQL over HTTP data containers
// Core library

pub mod config;
pub mod federation;
pub mod metrics;
pub mod observability;
pub mod remote;
pub mod server;

use std::sync::Arc;

use fedquery_core::{FederationResult, TableRegistry};

use config::Cli;
use federation::{DuckDbEngine, Federator};
use remote::HttpRemoteClient;

/// State shared by every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub federator: Federator,
}

impl AppState {
    pub fn new(federator: Federator) -> Self {
        Self { federator }
    }

    /// Production wiring: HTTP remote client and one in-memory DuckDB.
    pub fn from_registry(registry: TableRegistry, cli: &Cli) -> FederationResult<Self> {
        let remote = Arc::new(HttpRemoteClient::new(cli.remote_timeout())?);
        let engine = Arc::new(DuckDbEngine::new()?);
        Ok(Self::new(Federator::new(Arc::new(registry), remote, engine)))
    }
}
