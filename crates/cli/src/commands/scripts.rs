//! Script discovery and configuration commands

use anyhow::{bail, Result};
use clap::Args;
use std::collections::BTreeMap;

use crate::client::DaemonClient;
use crate::output::OutputFormat;

#[derive(Args)]
pub struct ScriptsArgs {
    /// Input value as id=value narrowing the lookup, e.g. --input region=ZA
    #[arg(short, long = "input")]
    pub inputs: Vec<String>,
}

/// List the runnable scripts for an input selection.
pub async fn list(client: &DaemonClient, args: ScriptsArgs, format: OutputFormat) -> Result<()> {
    let mut selection = BTreeMap::new();
    for pair in &args.inputs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("invalid input '{}', expected id=value", pair);
        };
        selection.insert(key.to_string(), value.to_string());
    }

    let scripts = client.scripts(&selection).await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&scripts)?),
        _ => {
            if scripts.is_empty() {
                println!("No scripts found for this selection.");
            } else {
                for script in scripts {
                    println!("{}", script);
                }
            }
        }
    }
    Ok(())
}

/// Show the project name and recognized input parameters.
pub async fn config(client: &DaemonClient, format: OutputFormat) -> Result<()> {
    let config = client.config().await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&config)?),
        _ => {
            if let Some(name) = config.get("project_name").and_then(|v| v.as_str()) {
                println!("Project: {}", name);
            }
            if let Some(inputs) = config.get("inputs").and_then(|v| v.as_array()) {
                for input in inputs {
                    let id = input.get("id").and_then(|v| v.as_str()).unwrap_or("?");
                    let label = input.get("label").and_then(|v| v.as_str()).unwrap_or("");
                    let options: Vec<&str> = input
                        .get("options")
                        .and_then(|v| v.as_array())
                        .map(|opts| opts.iter().filter_map(|o| o.as_str()).collect())
                        .unwrap_or_default();
                    println!("  {} ({}): {}", id, label, options.join(", "));
                }
            }
        }
    }
    Ok(())
}
