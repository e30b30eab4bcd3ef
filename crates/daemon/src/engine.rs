//! Test process execution
//!
//! Spawns the external test-framework process for a run, streams its output,
//! and drives the graceful-then-forced termination protocol.

use chrono::Utc;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use testdeck_common::{Error, LogChunk, LogSource, Result};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Fully resolved process invocation for one run.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: PathBuf,
}

/// How a process left the building.
#[derive(Debug, Clone, Copy)]
pub struct ExitDetails {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitDetails {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for ExitDetails {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

/// Launches and supervises exactly one external test process at a time.
pub struct ExecutionEngine {
    grace_period: Duration,
}

impl ExecutionEngine {
    pub fn new(grace_period: Duration) -> Self {
        Self { grace_period }
    }

    /// Spawn the test process and start streaming its output.
    ///
    /// Every stdout/stderr chunk is forwarded over `output` in arrival
    /// order, tagged with its stream source. The channel closes once both
    /// pipes reach EOF. Returns immediately; completion is observed through
    /// [`RunHandle::wait`].
    pub fn launch(
        &self,
        invocation: &Invocation,
        output: mpsc::UnboundedSender<LogChunk>,
    ) -> Result<RunHandle> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(&invocation.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group, so termination signals reach the whole tree
        // (npx-style launchers fork the actual test framework).
        #[cfg(unix)]
        cmd.process_group(0);

        debug!(
            "Spawning test process: {} {}",
            invocation.program,
            invocation.args.join(" ")
        );

        let mut child = cmd.spawn().map_err(Error::Spawn)?;
        let pid = child.id();

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        if let Some(stdout) = stdout {
            tokio::spawn(forward_stdout(stdout, output.clone()));
        }
        if let Some(stderr) = stderr {
            tokio::spawn(forward_stderr(stderr, output));
        }

        info!("Test process started (pid {:?})", pid);

        Ok(RunHandle {
            child,
            pid: pid.map(|p| p as i32),
            grace_period: self.grace_period,
        })
    }
}

/// Handle to a launched test process.
#[derive(Debug)]
pub struct RunHandle {
    child: Child,
    pid: Option<i32>,
    grace_period: Duration,
}

impl RunHandle {
    pub fn pid(&self) -> Option<i32> {
        self.pid
    }

    /// Wait for the process to exit. Resolves exactly once per launch.
    pub async fn wait(&mut self) -> Result<ExitDetails> {
        let status = self.child.wait().await?;
        Ok(ExitDetails::from(status))
    }

    /// Terminate the process: graceful signal first, forced kill once the
    /// grace period runs out. A no-op when the process already exited.
    pub async fn terminate(&mut self) -> Result<ExitDetails> {
        if let Some(status) = self.child.try_wait()? {
            return Ok(ExitDetails::from(status));
        }

        self.signal_group(GroupSignal::Term);

        match timeout(self.grace_period, self.child.wait()).await {
            Ok(status) => Ok(ExitDetails::from(status?)),
            Err(_) => {
                warn!(
                    "Test process ignored termination signal for {:?}, force killing",
                    self.grace_period
                );
                self.signal_group(GroupSignal::Kill);
                let _ = self.child.start_kill();
                let status = self.child.wait().await?;
                Ok(ExitDetails::from(status))
            }
        }
    }

    #[cfg(unix)]
    fn signal_group(&self, signal: GroupSignal) {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = self.pid {
            let signal = match signal {
                GroupSignal::Term => Signal::SIGTERM,
                GroupSignal::Kill => Signal::SIGKILL,
            };
            let _ = killpg(Pid::from_raw(pid), signal);
        }
    }

    #[cfg(not(unix))]
    fn signal_group(&self, _signal: GroupSignal) {}
}

#[derive(Clone, Copy)]
enum GroupSignal {
    Term,
    Kill,
}

async fn forward_stdout(stream: ChildStdout, tx: mpsc::UnboundedSender<LogChunk>) {
    forward_stream(stream, LogSource::Stdout, tx).await;
}

async fn forward_stderr(stream: ChildStderr, tx: mpsc::UnboundedSender<LogChunk>) {
    forward_stream(stream, LogSource::Stderr, tx).await;
}

/// Forward raw output chunks in arrival order. No re-ordering, no batching
/// beyond what OS pipe buffering already imposes.
async fn forward_stream<R>(mut reader: R, source: LogSource, tx: mpsc::UnboundedSender<LogChunk>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let chunk = LogChunk {
                    source,
                    text: String::from_utf8_lossy(&buf[..n]).into_owned(),
                    timestamp: Utc::now(),
                };
                if tx.send(chunk).is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!("{} pipe closed: {}", source, e);
                break;
            }
        }
    }
}
