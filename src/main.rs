//! radiocast binary: load config, start the server, run until Ctrl+C.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use radiocast::{Config, Server, ServerError};

#[derive(Parser)]
#[command(
    name = "radiocast",
    version,
    about = "Icecast-compatible streaming server with playlist fallback"
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "radiocast.toml")]
    config: PathBuf,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "radiocast=debug,info" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("radiocast: {e}");
            return ExitCode::from(1);
        }
    };
    init_tracing(config.advanced.verbose_logging);
    if !cli.config.exists() {
        tracing::warn!(path = %cli.config.display(), "config file not found, using defaults");
    }
    config.log_warnings();

    let server = match Server::start(config).await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(error = %e, "startup failed");
            let code = match &e {
                ServerError::Config(_) => 1u8,
                ServerError::Bind { .. } => 2u8,
            };
            return ExitCode::from(code);
        }
    };

    tracing::info!("press Ctrl+C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }

    server.shutdown().await;
    ExitCode::SUCCESS
}
