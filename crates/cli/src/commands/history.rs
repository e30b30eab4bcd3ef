//! Run history commands

use anyhow::Result;
use serde::Serialize;
use testdeck_common::RunRecord;

use crate::client::DaemonClient;
use crate::output::{print_item, print_list, OutputFormat, TableDisplay};

/// Row wrapper so history output stays stable even if the record grows.
#[derive(Serialize)]
pub struct RunRow(RunRecord);

impl TableDisplay for RunRow {
    fn headers() -> Vec<&'static str> {
        vec!["RUN ID", "STATUS", "STARTED", "DURATION", "REGION", "SCRIPTS"]
    }

    fn row(&self) -> Vec<String> {
        let record = &self.0;
        vec![
            record.run_id.clone(),
            record.status.to_string(),
            record.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            format_duration(record.duration_ms),
            record.region.clone().unwrap_or_else(|| "-".to_string()),
            record.config.scripts.join(", "),
        ]
    }
}

fn format_duration(ms: u64) -> String {
    if ms >= 60_000 {
        format!("{}m{}s", ms / 60_000, (ms % 60_000) / 1000)
    } else if ms >= 1000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        format!("{}ms", ms)
    }
}

/// List all runs, newest first.
pub async fn list(client: &DaemonClient, format: OutputFormat) -> Result<()> {
    let rows: Vec<RunRow> = client.history().await?.into_iter().map(RunRow).collect();
    print_list(&rows, format);
    Ok(())
}

/// Show the most recent run.
pub async fn latest(client: &DaemonClient, format: OutputFormat) -> Result<()> {
    let record = client.latest().await?;
    print_item(&RunRow(record), format);
    Ok(())
}

/// Show one run by id.
pub async fn show(client: &DaemonClient, run_id: &str, format: OutputFormat) -> Result<()> {
    let record = client.get_run(run_id).await?;
    print_item(&RunRow(record), format);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_are_humanized() {
        assert_eq!(format_duration(250), "250ms");
        assert_eq!(format_duration(1500), "1.5s");
        assert_eq!(format_duration(90_000), "1m30s");
    }
}
