//! Core types for Testdeck

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Terminal outcome of a run.
///
/// Serialized capitalized (`"Passed"`, `"Failed"`) since that is the wire
/// format the dashboard history has always used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Passed,
    Failed,
    Aborted,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Passed => write!(f, "Passed"),
            RunStatus::Failed => write!(f, "Failed"),
            RunStatus::Aborted => write!(f, "Aborted"),
        }
    }
}

/// Which stream a log chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    Stdout,
    Stderr,
}

impl std::fmt::Display for LogSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogSource::Stdout => write!(f, "stdout"),
            LogSource::Stderr => write!(f, "stderr"),
        }
    }
}

/// The reproducible portion of a run request: which scripts to execute and
/// the selected value for each input parameter.
///
/// Rerun fidelity is defined over this type: a rerun's persisted config is
/// deep-equal to the original record's config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    pub scripts: Vec<String>,
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
}

/// Parameters for one execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub scripts: Vec<String>,
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
    /// Set when this request replays a historical run. Not part of the
    /// persisted config, so a rerun's config stays equal to the original's.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerun_of: Option<String>,
}

impl RunRequest {
    pub fn new(scripts: Vec<String>, inputs: BTreeMap<String, String>) -> Self {
        Self {
            scripts,
            inputs,
            rerun_of: None,
        }
    }

    /// Rebuild a request from a historical record's config, verbatim.
    pub fn replay(config: RunConfig, of_run_id: impl Into<String>) -> Self {
        Self {
            scripts: config.scripts,
            inputs: config.inputs,
            rerun_of: Some(of_run_id.into()),
        }
    }

    /// The persistable portion of this request.
    pub fn config(&self) -> RunConfig {
        RunConfig {
            scripts: self.scripts.clone(),
            inputs: self.inputs.clone(),
        }
    }
}

/// Durable artifact of one completed execution.
///
/// Records are append-only: a record, once written, is never mutated, and
/// reruns create new records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub status: RunStatus,
    /// Start time of the run.
    pub timestamp: DateTime<Utc>,
    /// Wall-clock milliseconds from start to terminal state.
    pub duration_ms: u64,
    /// Originating request, retained verbatim for rerun fidelity.
    pub config: RunConfig,
    /// Denormalized primary input dimension for fast filtering and display.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

/// One chunk of process output, tagged with its stream source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogChunk {
    pub source: LogSource,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Lifecycle phase of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Running,
    Stopping,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Idle => write!(f, "idle"),
            Phase::Running => write!(f, "running"),
            Phase::Stopping => write!(f, "stopping"),
        }
    }
}

/// Point-in-time snapshot of the orchestrator, taken atomically under its
/// state lock. Lets a reconnecting observer re-hydrate the live console.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerStatus {
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_run_id: Option<String>,
    #[serde(default)]
    pub log_buffer: Vec<LogChunk>,
}

/// Event published to observers over the lifetime of a run.
///
/// For a single observer, events for a run are delivered in publish order:
/// `start`, then each `log` in emission order, then `end` or `stopped`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    Start {
        run_id: String,
        config: RunRequest,
    },
    Log {
        run_id: String,
        #[serde(rename = "type")]
        source: LogSource,
        text: String,
        timestamp: DateTime<Utc>,
    },
    End {
        run_id: String,
        result: RunStatus,
    },
    Stopped {
        run_id: String,
        reason: String,
    },
}

impl RunEvent {
    pub fn run_id(&self) -> &str {
        match self {
            RunEvent::Start { run_id, .. }
            | RunEvent::Log { run_id, .. }
            | RunEvent::End { run_id, .. }
            | RunEvent::Stopped { run_id, .. } => run_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_capitalized() {
        assert_eq!(serde_json::to_string(&RunStatus::Passed).unwrap(), "\"Passed\"");
        assert_eq!(serde_json::to_string(&RunStatus::Failed).unwrap(), "\"Failed\"");
    }

    #[test]
    fn log_source_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&LogSource::Stdout).unwrap(), "\"stdout\"");
    }

    #[test]
    fn replay_preserves_config() {
        let mut inputs = BTreeMap::new();
        inputs.insert("region".to_string(), "ZA".to_string());
        let original = RunRequest::new(vec!["login".to_string()], inputs);
        let config = original.config();

        let replayed = RunRequest::replay(config.clone(), "run-1");
        assert_eq!(replayed.config(), config);
        assert_eq!(replayed.rerun_of.as_deref(), Some("run-1"));
    }

    #[test]
    fn event_wire_format() {
        let event = RunEvent::Log {
            run_id: "r1".to_string(),
            source: LogSource::Stderr,
            text: "boom".to_string(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "log");
        assert_eq!(json["type"], "stderr");
        assert_eq!(json["run_id"], "r1");
    }
}
