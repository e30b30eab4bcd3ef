//! HTTP client for the daemon API

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use testdeck_common::{RunRecord, RunRequest, RunnerStatus};

/// Response to a start/rerun command.
#[derive(Debug, Deserialize)]
pub struct StartedRun {
    pub run_id: String,
    pub status: String,
}

/// Thin wrapper over the daemon's HTTP API.
pub struct DaemonClient {
    base_url: String,
    http: reqwest::Client,
}

impl DaemonClient {
    pub fn new(addr: &str) -> Self {
        Self {
            base_url: addr.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn health(&self) -> Result<serde_json::Value> {
        let resp = self
            .http
            .get(self.url("/health"))
            .send()
            .await
            .with_context(|| format!("cannot reach daemon at {}", self.base_url))?;
        expect_json(resp).await
    }

    pub async fn config(&self) -> Result<serde_json::Value> {
        let resp = self.http.get(self.url("/api/runner/config")).send().await?;
        expect_json(resp).await
    }

    pub async fn scripts(&self, selection: &BTreeMap<String, String>) -> Result<Vec<String>> {
        #[derive(Deserialize)]
        struct Scripts {
            scripts: Vec<String>,
        }

        let resp = self
            .http
            .get(self.url("/api/runner/scripts"))
            .query(selection)
            .send()
            .await?;
        let scripts: Scripts = expect_json(resp).await?;
        Ok(scripts.scripts)
    }

    pub async fn execute(&self, request: &RunRequest) -> Result<StartedRun> {
        let resp = self
            .http
            .post(self.url("/api/runner/execute"))
            .json(request)
            .send()
            .await?;
        expect_json(resp).await
    }

    pub async fn stop(&self) -> Result<()> {
        let resp = self.http.post(self.url("/api/runner/stop")).send().await?;
        let _: serde_json::Value = expect_json(resp).await?;
        Ok(())
    }

    pub async fn rerun(&self, run_id: &str) -> Result<StartedRun> {
        let resp = self
            .http
            .post(self.url(&format!("/api/runner/runs/{}/rerun", run_id)))
            .send()
            .await?;
        expect_json(resp).await
    }

    pub async fn history(&self) -> Result<Vec<RunRecord>> {
        let resp = self.http.get(self.url("/api/runner/runs")).send().await?;
        expect_json(resp).await
    }

    pub async fn latest(&self) -> Result<RunRecord> {
        let resp = self
            .http
            .get(self.url("/api/runner/runs/latest"))
            .send()
            .await?;
        expect_json(resp).await
    }

    pub async fn get_run(&self, run_id: &str) -> Result<RunRecord> {
        let resp = self
            .http
            .get(self.url(&format!("/api/runner/runs/{}", run_id)))
            .send()
            .await?;
        expect_json(resp).await
    }

    pub async fn status(&self) -> Result<RunnerStatus> {
        let resp = self.http.get(self.url("/api/runner/status")).send().await?;
        expect_json(resp).await
    }
}

/// Decode a success body, or turn the daemon's error payload into a
/// readable failure.
async fn expect_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp.json().await?)
    } else {
        let body: serde_json::Value = resp.json().await.unwrap_or_default();
        let reason = body
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error");
        bail!("{} (HTTP {})", reason, status.as_u16())
    }
}
