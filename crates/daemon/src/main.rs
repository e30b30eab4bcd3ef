//! Testdeck Daemon
//!
//! Runs the test-suite orchestrator and its HTTP/WebSocket API.

use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use testdeck_common::RunRegistry;
use testdeck_daemon::{config::DaemonConfig, orchestrator::Orchestrator, server};

#[derive(Parser)]
#[command(name = "testdeckd")]
#[command(about = "Testdeck daemon - browser-automation test run orchestration")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "testdeck.toml")]
    config: PathBuf,

    /// Automation suite directory
    #[arg(short, long)]
    suite_dir: Option<PathBuf>,

    /// Store directory
    #[arg(long)]
    store: Option<PathBuf>,

    /// HTTP listen address
    #[arg(short, long)]
    listen: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!("Testdeck daemon v{}", env!("CARGO_PKG_VERSION"));

    let mut config = DaemonConfig::load(&cli.config)?;
    if let Some(suite_dir) = cli.suite_dir {
        config.suite_dir = suite_dir;
    }
    if let Some(store) = cli.store {
        config.store_path = store;
    }
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }

    // Ensure store directory exists
    tokio::fs::create_dir_all(&config.store_path).await?;

    let registry = RunRegistry::open(config.db_path())?;
    let orchestrator = Orchestrator::new(config.clone(), registry);

    let app = server::router(orchestrator);
    let listener = tokio::net::TcpListener::bind(&config.listen).await?;

    info!("Daemon started on http://{}", config.listen);
    info!("Suite directory: {}", config.suite_dir.display());

    let server_handle = tokio::spawn(async move { axum::serve(listener, app).await });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Err(e)) => error!("HTTP server error: {}", e),
                Err(e) => error!("HTTP server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
    }

    info!("Daemon shutdown complete");
    Ok(())
}
