use std::process::ExitCode;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};

use fedquery_lib::config::{load_registry, Cli};
use fedquery_lib::{observability, server, AppState};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    observability::init_tracing(&cli.log_options());

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("fedquery: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let registry = load_registry(&cli.config)?;
    info!(
        config = %cli.config.display(),
        tables = ?registry.names(),
        "Loaded table configuration"
    );

    let state = AppState::from_registry(registry, &cli)?;
    let listener = TcpListener::bind(cli.listen_addr()).await.map_err(|e| {
        format!("Failed to bind {}:{}: {e}", cli.host, cli.port)
    })?;
    server::serve(listener, state).await?;
    Ok(())
}
