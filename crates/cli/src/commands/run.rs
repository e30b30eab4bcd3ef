//! Run control commands

use anyhow::{bail, Result};
use clap::Args;
use std::collections::BTreeMap;
use testdeck_common::RunRequest;

use crate::client::DaemonClient;
use crate::output::print_success;

#[derive(Args)]
pub struct RunArgs {
    /// Script id to execute (repeatable, order preserved)
    #[arg(short, long = "script", required = true)]
    pub scripts: Vec<String>,

    /// Input value as id=value, e.g. --input region=ZA (repeatable)
    #[arg(short, long = "input")]
    pub inputs: Vec<String>,
}

/// Start a run with the selected scripts and inputs.
pub async fn run(client: &DaemonClient, args: RunArgs) -> Result<()> {
    let mut inputs = BTreeMap::new();
    for pair in &args.inputs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("invalid input '{}', expected id=value", pair);
        };
        inputs.insert(key.to_string(), value.to_string());
    }

    let request = RunRequest::new(args.scripts, inputs);
    let started = client.execute(&request).await?;
    print_success(&format!("Run {} {}", started.run_id, started.status));
    Ok(())
}

/// Stop the run currently in flight.
pub async fn stop(client: &DaemonClient) -> Result<()> {
    client.stop().await?;
    print_success("Stop requested");
    Ok(())
}

/// Replay a historical run with its recorded config.
pub async fn rerun(client: &DaemonClient, run_id: &str) -> Result<()> {
    let started = client.rerun(run_id).await?;
    print_success(&format!(
        "Run {} {} (rerun of {})",
        started.run_id, started.status, run_id
    ));
    Ok(())
}
