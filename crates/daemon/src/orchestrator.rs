//! Run lifecycle orchestration
//!
//! Owns the single-flight run state machine: accepts start/stop/rerun
//! commands, supervises the test process through the execution engine,
//! streams output into the event bus, and persists outcomes in the run
//! registry.

use crate::broadcast::{EventBus, ObserverId};
use crate::config::DaemonConfig;
use crate::engine::{ExecutionEngine, ExitDetails};
use crate::resolver;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use testdeck_common::{
    Error, LogChunk, Phase, Result, RunEvent, RunRecord, RunRegistry, RunRequest, RunStatus,
    RunnerStatus,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const STOP_REASON: &str = "stopped by user request";

/// The run currently in flight. Exists iff phase != Idle.
struct ActiveRun {
    run_id: String,
    request: RunRequest,
    started_at: DateTime<Utc>,
    started: Instant,
    log_buffer: Vec<LogChunk>,
    cancel: CancellationToken,
}

/// Transient execution state. All three fields move together under one
/// lock, so a partially updated state is never observable.
struct ExecutionState {
    phase: Phase,
    active: Option<ActiveRun>,
}

/// The core state machine mediating between run requests, the execution
/// engine, the run registry and the event bus.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    config: DaemonConfig,
    registry: RunRegistry,
    events: EventBus,
    state: Mutex<ExecutionState>,
}

impl Orchestrator {
    pub fn new(config: DaemonConfig, registry: RunRegistry) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                registry,
                events: EventBus::new(),
                state: Mutex::new(ExecutionState {
                    phase: Phase::Idle,
                    active: None,
                }),
            }),
        }
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.inner.config
    }

    /// Register an observer for run events.
    pub fn subscribe(&self) -> (ObserverId, mpsc::UnboundedReceiver<RunEvent>) {
        self.inner.events.subscribe()
    }

    pub fn unsubscribe(&self, id: ObserverId) {
        self.inner.events.unsubscribe(id);
    }

    /// Start executing the requested scripts.
    ///
    /// Rejects the request when a run is already in flight or when no
    /// scripts were selected; both leave state untouched. On success the
    /// `start` event is published and the engine is launched on a
    /// background task; the call returns without waiting for completion.
    pub fn start(&self, request: RunRequest) -> Result<String> {
        if request.scripts.is_empty() {
            return Err(Error::InvalidRequest("no scripts selected".to_string()));
        }

        let run_id = Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();

        {
            let mut state = self.inner.state.lock();
            if state.phase != Phase::Idle {
                let active = state
                    .active
                    .as_ref()
                    .map(|a| a.run_id.clone())
                    .unwrap_or_default();
                return Err(Error::AlreadyRunning { run_id: active });
            }

            state.phase = Phase::Running;
            state.active = Some(ActiveRun {
                run_id: run_id.clone(),
                request: request.clone(),
                started_at: Utc::now(),
                started: Instant::now(),
                log_buffer: Vec::new(),
                cancel: cancel.clone(),
            });

            // Published under the state lock: nothing can slip a log event
            // in front of the start event.
            self.inner.events.publish(RunEvent::Start {
                run_id: run_id.clone(),
                config: request.clone(),
            });
        }

        info!(
            "Run {} started: {} script(s), inputs {:?}",
            run_id,
            request.scripts.len(),
            request.inputs
        );

        let orchestrator = self.clone();
        let id = run_id.clone();
        tokio::spawn(async move {
            orchestrator.supervise(id, request, cancel).await;
        });

        Ok(run_id)
    }

    /// Request cancellation of the in-flight run.
    ///
    /// Moves to Stopping and signals the supervision task; the transition
    /// back to Idle and the `stopped` event follow once the process is
    /// actually dead, which the termination protocol bounds by the grace
    /// period. A stopped run writes no history record.
    pub fn stop(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        if state.phase != Phase::Running {
            return Err(Error::NotRunning);
        }

        state.phase = Phase::Stopping;
        if let Some(active) = &state.active {
            info!("Stop requested for run {}", active.run_id);
            active.cancel.cancel();
        }
        Ok(())
    }

    /// Re-execute a historical run with its recorded config, verbatim.
    pub fn rerun(&self, run_id: &str) -> Result<String> {
        let record = self.get(run_id)?;
        info!("Rerunning {} as a new run", run_id);
        self.start(RunRequest::replay(record.config, run_id))
    }

    /// Most recently completed run, if any.
    pub fn latest(&self) -> Result<Option<RunRecord>> {
        self.inner.registry.latest()
    }

    /// Look up a run record by id.
    pub fn get(&self, run_id: &str) -> Result<RunRecord> {
        self.inner.registry.get(run_id)?.ok_or_else(|| Error::NotFound {
            run_id: run_id.to_string(),
        })
    }

    /// All run records, newest first.
    pub fn history(&self) -> Result<Vec<RunRecord>> {
        self.inner.registry.list()
    }

    /// Atomic snapshot of phase, active run id and the live log buffer.
    pub fn status(&self) -> RunnerStatus {
        let state = self.inner.state.lock();
        RunnerStatus {
            phase: state.phase,
            active_run_id: state.active.as_ref().map(|a| a.run_id.clone()),
            log_buffer: state
                .active
                .as_ref()
                .map(|a| a.log_buffer.clone())
                .unwrap_or_default(),
        }
    }

    /// Supervision task: pump output chunks, then handle whichever comes
    /// first of process exit and cancellation.
    async fn supervise(self, run_id: String, request: RunRequest, cancel: CancellationToken) {
        let grace = Duration::from_secs(self.inner.config.runner.grace_period_secs);
        let invocation = resolver::build_invocation(&self.inner.config, &run_id, &request);

        let engine = ExecutionEngine::new(grace);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut handle = match engine.launch(&invocation, tx) {
            Ok(handle) => handle,
            Err(e) => {
                self.handle_launch_failure(&run_id, e);
                return;
            }
        };

        let mut output_done = false;
        loop {
            tokio::select! {
                chunk = rx.recv(), if !output_done => {
                    match chunk {
                        Some(chunk) => self.record_chunk(&run_id, chunk),
                        None => output_done = true,
                    }
                }
                _ = cancel.cancelled() => {
                    match handle.terminate().await {
                        Ok(exit) => debug!("Run {} terminated ({:?})", run_id, exit),
                        Err(e) => warn!("Run {} termination error: {}", run_id, e),
                    }
                    self.finish_stopped(&run_id, STOP_REASON);
                    return;
                }
                exit = handle.wait() => {
                    if !output_done {
                        // The pipes flush shortly after exit; bound the
                        // drain so a grandchild holding them open cannot
                        // stall completion.
                        let drain = tokio::time::timeout(Duration::from_secs(2), async {
                            while let Some(chunk) = rx.recv().await {
                                self.record_chunk(&run_id, chunk);
                            }
                        });
                        let _ = drain.await;
                    }
                    match exit {
                        Ok(exit) => self.complete(&run_id, exit),
                        Err(e) => {
                            error!("Run {} wait error: {}", run_id, e);
                            self.complete(&run_id, ExitDetails { code: None, signal: None });
                        }
                    }
                    return;
                }
            }
        }
    }

    /// A launch that never produced a process. A missing executable counts
    /// as an execution failure (same as a nonzero exit); anything else is
    /// operational and must not masquerade as a test verdict.
    fn handle_launch_failure(&self, run_id: &str, err: Error) {
        match err {
            Error::Spawn(ref io) if io.kind() == std::io::ErrorKind::NotFound => {
                warn!("Run {} launch failed, executable not found: {}", run_id, io);
                self.complete(
                    run_id,
                    ExitDetails {
                        code: Some(127),
                        signal: None,
                    },
                );
            }
            other => {
                error!("Run {} could not be launched: {}", run_id, other);
                self.finish_stopped(run_id, &format!("launch error: {}", other));
            }
        }
    }

    /// Buffer one output chunk and publish it. Chunks arriving after the
    /// run was torn down are dropped.
    fn record_chunk(&self, run_id: &str, chunk: LogChunk) {
        {
            let mut state = self.inner.state.lock();
            match state.active.as_mut() {
                Some(active) if active.run_id == run_id => active.log_buffer.push(chunk.clone()),
                _ => return,
            }
        }

        self.inner.events.publish(RunEvent::Log {
            run_id: run_id.to_string(),
            source: chunk.source,
            text: chunk.text,
            timestamp: chunk.timestamp,
        });
    }

    /// Process exit: persist the outcome and publish the terminal event.
    ///
    /// When a stop raced the natural exit (phase already Stopping), the run
    /// takes the stopped path instead and no record is written.
    fn complete(&self, run_id: &str, exit: ExitDetails) {
        let (request, started_at, duration_ms, stopping) = {
            let mut state = self.inner.state.lock();
            let Some(active) = state.active.take() else {
                return;
            };
            if active.run_id != run_id {
                state.active = Some(active);
                return;
            }

            let stopping = state.phase == Phase::Stopping;
            state.phase = Phase::Idle;
            (
                active.request,
                active.started_at,
                active.started.elapsed().as_millis() as u64,
                stopping,
            )
        };

        if stopping {
            self.inner.events.publish(RunEvent::Stopped {
                run_id: run_id.to_string(),
                reason: STOP_REASON.to_string(),
            });
            info!("Run {} stopped just as it exited; not recorded", run_id);
            return;
        }

        let status = if exit.success() {
            RunStatus::Passed
        } else {
            RunStatus::Failed
        };

        let record = RunRecord {
            run_id: run_id.to_string(),
            status,
            timestamp: started_at,
            duration_ms,
            config: request.config(),
            region: request
                .inputs
                .get(&self.inner.config.discovery.primary_input)
                .cloned(),
        };

        match self.inner.registry.append(&record) {
            Ok(()) => {
                if let Err(e) = self.inner.registry.prune(self.inner.config.history_limit) {
                    warn!("History prune failed: {}", e);
                }
            }
            // History is the product; a write failure is an operational
            // error, but the run itself still terminates cleanly.
            Err(e) => error!("Failed to persist run {}: {}", run_id, e),
        }

        self.inner.events.publish(RunEvent::End {
            run_id: run_id.to_string(),
            result: status,
        });

        info!(
            "Run {} finished: {} in {} ms (exit {:?}, signal {:?})",
            run_id, status, duration_ms, exit.code, exit.signal
        );
    }

    /// Tear down without a history record and publish `stopped`.
    fn finish_stopped(&self, run_id: &str, reason: &str) {
        {
            let mut state = self.inner.state.lock();
            let Some(active) = state.active.take() else {
                return;
            };
            if active.run_id != run_id {
                state.active = Some(active);
                return;
            }
            state.phase = Phase::Idle;
            // The log buffer is discarded with the active run.
        }

        self.inner.events.publish(RunEvent::Stopped {
            run_id: run_id.to_string(),
            reason: reason.to_string(),
        });

        info!("Run {} stopped: {}", run_id, reason);
    }
}
