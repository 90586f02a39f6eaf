// src/monitor/activity.rs

//! Per-process state tracking, timers and filesystem activity.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::events::{EventSink, WorkerEvent};
use crate::monitor::health::LivenessProbe;
use crate::monitor::state::{self, TransitionCheck};
use crate::monitor::watcher::FsWatcher;
use crate::types::TaskState;

#[derive(Debug, Clone, Copy)]
pub struct MonitorSettings {
    pub inactivity_timeout: Duration,
    pub teardown_delay: Duration,
    pub health_check_interval: Duration,
    pub fs_debounce: Duration,
}

impl MonitorSettings {
    pub fn from_config(cfg: &WorkerConfig) -> Self {
        Self {
            inactivity_timeout: cfg.inactivity_timeout(),
            teardown_delay: cfg.terminal_teardown_delay(),
            health_check_interval: cfg.health_check_interval(),
            fs_debounce: cfg.fs_debounce(),
        }
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self::from_config(&WorkerConfig::default())
    }
}

/// Read-only copy of one monitored process's state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSnapshot {
    pub pid: u32,
    pub task_id: String,
    pub state: TaskState,
    pub last_activity: DateTime<Utc>,
    pub consecutive_failures: u32,
    pub logs_path: Option<PathBuf>,
}

#[derive(Debug)]
struct MonitorEntry {
    task_id: String,
    state: TaskState,
    last_activity: Instant,
    last_activity_at: DateTime<Utc>,
    logs_path: Option<PathBuf>,
    inactivity_timer: Option<JoinHandle<()>>,
    teardown_timer: Option<JoinHandle<()>>,
    consecutive_failures: u32,
}

impl MonitorEntry {
    fn cancel_timers(&mut self) {
        if let Some(t) = self.inactivity_timer.take() {
            t.abort();
        }
        if let Some(t) = self.teardown_timer.take() {
            t.abort();
        }
    }

    fn snapshot(&self, pid: u32) -> MonitorSnapshot {
        MonitorSnapshot {
            pid,
            task_id: self.task_id.clone(),
            state: self.state,
            last_activity: self.last_activity_at,
            consecutive_failures: self.consecutive_failures,
            logs_path: self.logs_path.clone(),
        }
    }
}

#[derive(Debug)]
struct Inner {
    settings: MonitorSettings,
    sink: EventSink,
    entries: Mutex<HashMap<u32, MonitorEntry>>,
    watcher: FsWatcher,
}

/// Tracks RUNNING / ACTIVE / IDLE / terminal state for each monitored PID.
///
/// Cheap to clone; all clones share the same state. Must be used from within
/// a tokio runtime since timers are spawned tasks.
#[derive(Debug, Clone)]
pub struct ActivityMonitor {
    inner: Arc<Inner>,
}

impl ActivityMonitor {
    pub fn new(settings: MonitorSettings, sink: EventSink) -> Self {
        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let weak = weak.clone();
            let watcher = FsWatcher::new(
                settings.fs_debounce,
                Arc::new(move |pid, path| {
                    if let Some(inner) = weak.upgrade() {
                        ActivityMonitor { inner }.record_fs_activity(pid, path);
                    }
                }),
            );
            Inner {
                settings,
                sink,
                entries: Mutex::new(HashMap::new()),
                watcher,
            }
        });
        Self { inner }
    }

    pub fn settings(&self) -> MonitorSettings {
        self.inner.settings
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<u32, MonitorEntry>> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Begin tracking `pid` in RUNNING, optionally watching `logs_path`.
    ///
    /// A watch failure is logged and monitoring continues without it.
    pub fn start_monitoring(&self, task_id: &str, pid: u32, logs_path: Option<&Path>) {
        let watched = logs_path.and_then(|p| match self.inner.watcher.register(pid, p) {
            Ok(canonical) => Some(canonical),
            Err(e) => {
                warn!(pid, task = %task_id, error = %e, "filesystem watch unavailable");
                None
            }
        });

        let previous = {
            let mut entries = self.entries();
            let mut entry = MonitorEntry {
                task_id: task_id.to_string(),
                state: TaskState::Running,
                last_activity: Instant::now(),
                last_activity_at: Utc::now(),
                logs_path: watched,
                inactivity_timer: None,
                teardown_timer: None,
                consecutive_failures: 0,
            };
            entry.inactivity_timer = Some(self.arm_inactivity_timer(pid));
            entries.insert(pid, entry)
        };

        if let Some(mut old) = previous {
            warn!(pid, old_task = %old.task_id, "pid was already monitored; replacing entry");
            old.cancel_timers();
            if let Some(path) = old.logs_path {
                self.inner.watcher.unregister(pid, &path);
            }
        }

        info!(pid, task = %task_id, "monitoring started");
    }

    /// Record activity for `pid`: RUNNING/IDLE become ACTIVE and the
    /// inactivity timer is re-armed.
    pub fn update_activity(&self, pid: u32) {
        let change = {
            let mut entries = self.entries();
            let Some(entry) = entries.get_mut(&pid) else {
                debug!(pid, "activity for unmonitored pid ignored");
                return;
            };
            if entry.state.is_terminal() {
                return;
            }

            entry.last_activity = Instant::now();
            entry.last_activity_at = Utc::now();
            if let Some(t) = entry.inactivity_timer.take() {
                t.abort();
            }
            entry.inactivity_timer = Some(self.arm_inactivity_timer(pid));

            state::on_activity(entry.state).map(|to| {
                let from = entry.state;
                entry.state = to;
                (entry.task_id.clone(), from, to)
            })
        };

        if let Some((task_id, from, to)) = change {
            self.announce(pid, &task_id, from, to, "activity detected");
        }
    }

    /// Explicit transition. Returns whether the state changed.
    ///
    /// Terminal states are final. Reaching one cancels the inactivity timer
    /// and schedules [`stop_monitoring`](Self::stop_monitoring) after the
    /// teardown delay.
    pub fn transition_state(&self, pid: u32, to: TaskState, reason: &str) -> bool {
        let (task_id, from) = {
            let mut entries = self.entries();
            let Some(entry) = entries.get_mut(&pid) else {
                warn!(pid, to = %to, reason, "transition for unmonitored pid ignored");
                return false;
            };

            match state::check_transition(entry.state, to) {
                TransitionCheck::RejectedTerminal => {
                    warn!(
                        pid,
                        task = %entry.task_id,
                        from = %entry.state,
                        to = %to,
                        reason,
                        "transition rejected: state is terminal"
                    );
                    return false;
                }
                TransitionCheck::Unchanged => return false,
                TransitionCheck::Apply => {}
            }

            let from = entry.state;
            entry.state = to;

            if to.is_terminal() {
                if let Some(t) = entry.inactivity_timer.take() {
                    t.abort();
                }
                entry.teardown_timer = Some(self.schedule_teardown(pid));
            } else if to == TaskState::Active {
                if let Some(t) = entry.inactivity_timer.take() {
                    t.abort();
                }
                entry.inactivity_timer = Some(self.arm_inactivity_timer(pid));
            }

            (entry.task_id.clone(), from)
        };

        self.announce(pid, &task_id, from, to, reason);
        true
    }

    /// Stop tracking `pid`: cancel timers, release its watch, drop state.
    /// Idempotent.
    pub fn stop_monitoring(&self, pid: u32) {
        let Some(mut entry) = self.entries().remove(&pid) else {
            return;
        };
        entry.cancel_timers();
        if let Some(path) = entry.logs_path.take() {
            self.inner.watcher.unregister(pid, &path);
        }
        debug!(pid, task = %entry.task_id, state = %entry.state, "monitoring stopped");
    }

    pub fn get_state(&self, pid: u32) -> Option<TaskState> {
        self.entries().get(&pid).map(|e| e.state)
    }

    pub fn snapshot(&self, pid: u32) -> Option<MonitorSnapshot> {
        self.entries().get(&pid).map(|e| e.snapshot(pid))
    }

    pub fn monitored_pids(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = self.entries().keys().copied().collect();
        pids.sort_unstable();
        pids
    }

    /// Probe every monitored PID once. Dead processes that are not yet in a
    /// terminal state are moved to FAILED. Returns the PIDs found dead.
    pub fn run_health_check(&self, probe: &dyn LivenessProbe) -> Vec<u32> {
        let pids = self.monitored_pids();
        let mut dead = Vec::new();

        for pid in pids {
            let alive = probe.is_alive(pid);
            let failed_running = {
                let mut entries = self.entries();
                let Some(entry) = entries.get_mut(&pid) else {
                    continue;
                };
                if alive {
                    entry.consecutive_failures = 0;
                    continue;
                }
                entry.consecutive_failures += 1;
                warn!(
                    pid,
                    task = %entry.task_id,
                    consecutive_failures = entry.consecutive_failures,
                    "health check: process not alive"
                );
                !entry.state.is_terminal()
            };

            dead.push(pid);
            if failed_running {
                self.transition_state(
                    pid,
                    TaskState::Failed,
                    &format!("process {pid} is no longer running"),
                );
            }
        }

        dead
    }

    fn record_fs_activity(&self, pid: u32, path: PathBuf) {
        let task_id = match self.entries().get(&pid) {
            Some(e) => e.task_id.clone(),
            None => return,
        };
        debug!(pid, task = %task_id, path = %path.display(), "filesystem activity");
        self.inner.sink.emit(WorkerEvent::FileSystemActivity {
            pid,
            task_id,
            path,
            at: Utc::now(),
        });
        self.update_activity(pid);
    }

    fn on_inactivity_elapsed(&self, pid: u32) {
        let timeout = self.inner.settings.inactivity_timeout;
        let change = {
            let mut entries = self.entries();
            let Some(entry) = entries.get_mut(&pid) else {
                return;
            };
            // Activity may have landed while this timer was firing.
            if entry.last_activity.elapsed() < timeout {
                return;
            }
            state::on_inactivity(entry.state).map(|to| {
                let from = entry.state;
                entry.state = to;
                (entry.task_id.clone(), from, to)
            })
        };

        if let Some((task_id, from, to)) = change {
            self.announce(pid, &task_id, from, to, "inactivity timeout");
        }
    }

    fn arm_inactivity_timer(&self, pid: u32) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let timeout = self.inner.settings.inactivity_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                ActivityMonitor { inner }.on_inactivity_elapsed(pid);
            }
        })
    }

    fn schedule_teardown(&self, pid: u32) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let delay = self.inner.settings.teardown_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                ActivityMonitor { inner }.stop_monitoring(pid);
            }
        })
    }

    fn announce(&self, pid: u32, task_id: &str, from: TaskState, to: TaskState, reason: &str) {
        info!(pid, task = %task_id, from = %from, to = %to, reason, "state transition");
        self.inner.sink.emit(WorkerEvent::StateTransition {
            pid,
            task_id: task_id.to_string(),
            from,
            to,
            reason: reason.to_string(),
            at: Utc::now(),
        });
    }
}
