//! Testdeck CLI - Main Entry Point
//!
//! Command-line client for the Testdeck run orchestrator daemon.

use clap::{Parser, Subcommand};

mod client;
mod commands;
mod output;

use commands::{history, run, scripts};
use output::print_error;

/// Testdeck CLI - browser-automation test run control
#[derive(Parser)]
#[command(name = "testdeck")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Daemon address
    #[arg(
        long,
        default_value = "http://127.0.0.1:8980",
        env = "TESTDECK_ADDR",
        global = true
    )]
    addr: String,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a run
    Run(run::RunArgs),

    /// Stop the run in flight
    Stop,

    /// Replay a historical run with its recorded config
    Rerun {
        /// Run ID to replay
        run_id: String,
    },

    /// List run history, newest first
    History,

    /// Show the most recent run
    Latest,

    /// Show one run by id
    Show {
        /// Run ID
        run_id: String,
    },

    /// List runnable scripts for an input selection
    Scripts(scripts::ScriptsArgs),

    /// Show project configuration and input parameters
    Config,

    /// Check daemon status
    Status,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    let client = client::DaemonClient::new(&cli.addr);

    let result = match cli.command {
        Commands::Run(args) => run::run(&client, args).await,
        Commands::Stop => run::stop(&client).await,
        Commands::Rerun { run_id } => run::rerun(&client, &run_id).await,
        Commands::History => history::list(&client, cli.format).await,
        Commands::Latest => history::latest(&client, cli.format).await,
        Commands::Show { run_id } => history::show(&client, &run_id, cli.format).await,
        Commands::Scripts(args) => scripts::list(&client, args, cli.format).await,
        Commands::Config => scripts::config(&client, cli.format).await,
        Commands::Status => show_status(&client).await,
        Commands::Version => {
            println!("testdeck {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    };

    if let Err(e) = result {
        print_error(&e.to_string());
        std::process::exit(1);
    }

    Ok(())
}

async fn show_status(client: &client::DaemonClient) -> anyhow::Result<()> {
    let health = client.health().await?;
    let status = client.status().await?;

    let version = health
        .get("version")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown");
    println!("Daemon: ok (v{})", version);
    println!("Phase: {}", status.phase);
    if let Some(run_id) = &status.active_run_id {
        println!("Active run: {}", run_id);
        println!("Buffered log chunks: {}", status.log_buffer.len());
    }
    Ok(())
}
