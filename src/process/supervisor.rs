// src/process/supervisor.rs

//! Owner of every agent process spawned by this worker.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::errors::{Result, WorkerError};
use crate::process::signal::{self, SignalOutcome};
use crate::process::spawn::{build_args, SpawnConfig};

/// How long to wait for the OS to report the exit after a forced kill.
const FORCE_KILL_WAIT: Duration = Duration::from_secs(2);

/// Identity of one spawned process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
    pub job_id: String,
    pub session_name: String,
    pub started_at: DateTime<Utc>,
    pub correlation_id: String,
}

/// How a process ended, as observed by its waiter task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
    /// Set when waiting on the process itself failed.
    pub error: Option<String>,
}

impl ExitInfo {
    pub fn success(&self) -> bool {
        self.error.is_none() && self.code == Some(0)
    }
}

pub type ExitReceiver = watch::Receiver<Option<ExitInfo>>;

/// Wait until the process has exited and return how.
///
/// If the waiter task is gone without reporting, returns whatever was last
/// observed (possibly `None`).
pub async fn wait_exit(rx: &mut ExitReceiver) -> Option<ExitInfo> {
    if let Ok(info) = rx.wait_for(Option::is_some).await {
        return info.clone();
    }
    rx.borrow().clone()
}

/// A freshly spawned process with the pipes the caller talks through.
#[derive(Debug)]
pub struct SpawnedProcess {
    pub handle: ProcessHandle,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub exit: ExitReceiver,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessMetadata {
    pub job_id: String,
    pub session_name: String,
    pub correlation_id: String,
    pub started_at: DateTime<Utc>,
    pub uptime_ms: u64,
}

/// Point-in-time view of one PID.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessHealth {
    pub pid: u32,
    pub alive: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ProcessMetadata>,
}

#[derive(Debug)]
struct TrackedProcess {
    handle: ProcessHandle,
    exit: ExitReceiver,
    /// Asks the waiter task to kill the child it owns.
    kill_tx: Option<oneshot::Sender<()>>,
}

impl TrackedProcess {
    fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }
}

/// Spawns, tracks and terminates agent processes.
///
/// A PID is in the tracking map while it is believed alive and managed here.
#[derive(Debug)]
pub struct ProcessSupervisor {
    grace_period: Duration,
    processes: Mutex<HashMap<u32, TrackedProcess>>,
}

impl ProcessSupervisor {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            grace_period,
            processes: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u32, TrackedProcess>> {
        self.processes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validate `config` and start the process.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(&self, config: &SpawnConfig) -> Result<SpawnedProcess> {
        config.validate()?;

        let correlation_id = config
            .correlation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut cmd = Command::new(&config.executable);
        cmd.args(build_args(config))
            .envs(config.env.iter().map(|(k, v)| (k, v)))
            .current_dir(&config.working_directory)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            WorkerError::ProcessSpawnFailed(format!(
                "spawning '{}' for job '{}': {e}",
                config.executable, config.job_id
            ))
        })?;

        let Some(pid) = child.id() else {
            return Err(WorkerError::ProcessSpawnFailed(format!(
                "no PID assigned for job '{}'",
                config.job_id
            )));
        };

        let (Some(stdin), Some(stdout), stderr) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(WorkerError::ProcessSpawnFailed(format!(
                "stdio was not piped for job '{}'",
                config.job_id
            )));
        };

        let handle = ProcessHandle {
            pid,
            job_id: config.job_id.clone(),
            session_name: config.session_name.clone(),
            started_at: Utc::now(),
            correlation_id,
        };

        info!(
            pid,
            job_id = %handle.job_id,
            session = %handle.session_name,
            correlation_id = %handle.correlation_id,
            executable = %config.executable,
            "agent process spawned"
        );

        // Always consume stderr so the pipe never fills; it is logged, not parsed.
        if let Some(stderr) = stderr {
            let job_id = handle.job_id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => warn!(pid, job_id = %job_id, "agent stderr: {}", line),
                        Ok(None) => break,
                        Err(e) => {
                            debug!(pid, error = %e, "stderr stream closed with error");
                            break;
                        }
                    }
                }
            });
        }

        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel();
        tokio::spawn(wait_child(child, pid, handle.job_id.clone(), kill_rx, exit_tx));

        self.lock().insert(
            pid,
            TrackedProcess {
                handle: handle.clone(),
                exit: exit_rx.clone(),
                kill_tx: Some(kill_tx),
            },
        );

        Ok(SpawnedProcess {
            handle,
            stdin,
            stdout,
            exit: exit_rx,
        })
    }

    /// Graceful-then-forceful shutdown of a tracked process.
    ///
    /// Unknown or already-removed PIDs are a warning, not an error. The PID
    /// leaves the tracking map whichever path is taken.
    pub async fn terminate(&self, pid: u32) -> Result<()> {
        let Some(mut tracked) = self.lock().remove(&pid) else {
            warn!(pid, "terminate requested for untracked pid; ignoring");
            return Ok(());
        };
        let job_id = tracked.handle.job_id.clone();

        if tracked.has_exited() {
            debug!(pid, job_id = %job_id, "process already exited; nothing to signal");
            return Ok(());
        }

        match signal::send_terminate(pid) {
            Ok(SignalOutcome::Sent) => {
                info!(pid, job_id = %job_id, grace_ms = self.grace_period.as_millis() as u64, "sent SIGTERM");
            }
            Ok(SignalOutcome::NotFound) => return Ok(()),
            Ok(SignalOutcome::Denied) | Ok(SignalOutcome::Unsupported) => {}
            Err(e) => warn!(pid, job_id = %job_id, error = %e, "cooperative signal failed"),
        }

        let graceful = tokio::time::timeout(self.grace_period, wait_exit(&mut tracked.exit))
            .await
            .is_ok_and(|info| info.is_some());
        if graceful {
            info!(pid, job_id = %job_id, "process exited within grace period");
            return Ok(());
        }

        // Re-probe: the process may have exited right as the timer fired.
        if tracked.has_exited() || !self.probe(pid, &tracked) {
            debug!(pid, job_id = %job_id, "process gone after grace period");
            return Ok(());
        }

        warn!(pid, job_id = %job_id, "grace period elapsed; killing process");
        if let Some(kill_tx) = tracked.kill_tx.take() {
            let _ = kill_tx.send(());
        }
        if tokio::time::timeout(FORCE_KILL_WAIT, wait_exit(&mut tracked.exit))
            .await
            .is_err()
        {
            error!(pid, job_id = %job_id, "process did not report exit after kill");
        }

        Ok(())
    }

    /// Whether a live process holds `pid`. Works for untracked PIDs.
    pub fn is_alive(&self, pid: u32) -> bool {
        match signal::probe(pid) {
            Some(alive) => alive,
            None => self.lock().get(&pid).is_some_and(|t| !t.has_exited()),
        }
    }

    fn probe(&self, pid: u32, tracked: &TrackedProcess) -> bool {
        signal::probe(pid).unwrap_or_else(|| !tracked.has_exited())
    }

    pub fn health(&self, pid: u32) -> ProcessHealth {
        let alive = self.is_alive(pid);
        let metadata = self.lock().get(&pid).map(|t| {
            let h = &t.handle;
            let uptime = Utc::now().signed_duration_since(h.started_at);
            ProcessMetadata {
                job_id: h.job_id.clone(),
                session_name: h.session_name.clone(),
                correlation_id: h.correlation_id.clone(),
                started_at: h.started_at,
                uptime_ms: u64::try_from(uptime.num_milliseconds()).unwrap_or(0),
            }
        });
        ProcessHealth {
            pid,
            alive,
            metadata,
        }
    }

    /// Drop tracking for every PID that is no longer alive. Returns the
    /// removed PIDs.
    pub fn reap_orphans(&self) -> Vec<u32> {
        let mut map = self.lock();
        let dead: Vec<u32> = map
            .iter()
            .filter(|(pid, t)| t.has_exited() || !self.probe(**pid, t))
            .map(|(pid, _)| *pid)
            .collect();

        for pid in &dead {
            if let Some(t) = map.remove(pid) {
                info!(pid, job_id = %t.handle.job_id, "reaped orphaned process entry");
            }
        }
        dead
    }

    pub fn handle(&self, pid: u32) -> Option<ProcessHandle> {
        self.lock().get(&pid).map(|t| t.handle.clone())
    }

    pub fn is_tracked(&self, pid: u32) -> bool {
        self.lock().contains_key(&pid)
    }

    pub fn tracked_pids(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = self.lock().keys().copied().collect();
        pids.sort_unstable();
        pids
    }
}

/// Owns the `Child`: reaps it, reports the exit and performs forced kills.
async fn wait_child(
    mut child: Child,
    pid: u32,
    job_id: String,
    mut kill_rx: oneshot::Receiver<()>,
    exit_tx: watch::Sender<Option<ExitInfo>>,
) {
    let status = tokio::select! {
        res = child.wait() => res,
        req = &mut kill_rx => {
            if req.is_ok() {
                if let Err(e) = child.start_kill() {
                    warn!(pid, job_id = %job_id, error = %e, "failed to kill child process");
                }
            }
            child.wait().await
        }
    };

    let info = match status {
        Ok(status) => {
            let info = ExitInfo {
                code: status.code(),
                signal: exit_signal(&status),
                error: None,
            };
            info!(
                pid,
                job_id = %job_id,
                exit_code = ?info.code,
                signal = ?info.signal,
                "agent process exited"
            );
            info
        }
        Err(e) => {
            error!(pid, job_id = %job_id, error = %e, "waiting on agent process failed");
            ExitInfo {
                code: None,
                signal: None,
                error: Some(e.to_string()),
            }
        }
    };

    let _ = exit_tx.send(Some(info));
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}
