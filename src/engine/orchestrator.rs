// src/engine/orchestrator.rs

//! Async shell around one task's lifecycle: admit, spawn, monitor, send the
//! prompt, stream results, resolve exactly once, clean up.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::engine::results::ResultStore;
use crate::engine::stream::{LineAction, LineBuffer, StreamState};
use crate::engine::types::{
    ActiveTaskStatus, CancelReason, TaskExecutionContext, TaskExecutionRequest,
    TaskExecutionResult, TaskStatus,
};
use crate::errors::{Result, WorkerError};
use crate::events::{EventSink, WorkerEvent};
use crate::interpret::outbound::{passthrough_options, timeout_secs, PromptMessage, PromptOptions};
use crate::interpret::{
    extract_error_message, handle_error, is_success, parse_line, ClientError, ErrorCode,
    ParsedResponse,
};
use crate::monitor::{spawn_health_loop, ActivityMonitor, MonitorSettings, MonitorSnapshot};
use crate::process::{
    wait_exit, ExitInfo, ProcessHealth, ProcessSupervisor, SpawnConfig, SpawnedProcess,
};
use crate::types::TaskState;

/// Environment variable telling the agent where its session logs go.
pub const SESSION_LOGS_ENV: &str = "TASKWORKER_SESSION_LOGS";

const READ_CHUNK: usize = 8 * 1024;

const MODEL_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9._:/\[\]-]{0,127}$";

static MODEL_RE: LazyLock<Option<Regex>> = LazyLock::new(|| match Regex::new(MODEL_PATTERN) {
    Ok(re) => Some(re),
    Err(e) => {
        warn!(error = %e, "invalid model pattern; model names are not checked");
        None
    }
});

/// How a running task ended, before it is turned into a result.
#[derive(Debug)]
enum Resolution {
    Line(Box<ParsedResponse>),
    Exited(ExitInfo),
    /// Stdout closed and the exit status could not be observed.
    StreamClosed,
    TimedOut,
    /// Someone else finalized the task and handed over the result.
    Finalized(TaskExecutionResult),
}

/// Aggregate view for an external health endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerHealth {
    pub active_tasks: usize,
    pub max_concurrent_tasks: usize,
    pub stored_results: usize,
    pub processes: Vec<ProcessHealth>,
    pub monitored: Vec<MonitorSnapshot>,
}

/// Top-level coordinator of task execution.
#[derive(Debug)]
pub struct TaskOrchestrator {
    config: WorkerConfig,
    supervisor: Arc<ProcessSupervisor>,
    monitor: ActivityMonitor,
    sink: EventSink,
    active: Mutex<HashMap<String, TaskExecutionContext>>,
    results: Mutex<ResultStore>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskOrchestrator {
    /// Build an orchestrator without background loops.
    pub fn new(config: WorkerConfig, sink: EventSink) -> Self {
        let supervisor = Arc::new(ProcessSupervisor::new(config.grace_period()));
        let monitor = ActivityMonitor::new(MonitorSettings::from_config(&config), sink.clone());
        let results = ResultStore::new(config.retention.max_results, config.result_ttl());
        Self {
            config,
            supervisor,
            monitor,
            sink,
            active: Mutex::new(HashMap::new()),
            results: Mutex::new(results),
            background: Mutex::new(Vec::new()),
        }
    }

    /// Build an orchestrator and start its health-check and maintenance
    /// loops. Must be called from within a tokio runtime.
    pub fn start(config: WorkerConfig, sink: EventSink) -> Arc<Self> {
        let orch = Arc::new(Self::new(config, sink));

        let health = spawn_health_loop(
            orch.monitor.clone(),
            orch.supervisor.clone(),
            orch.config.health_check_interval(),
        );
        let maintenance = spawn_maintenance_loop(
            Arc::downgrade(&orch),
            orch.config.maintenance_interval(),
        );
        orch.background_tasks().extend([health, maintenance]);
        orch
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    pub fn monitor(&self) -> &ActivityMonitor {
        &self.monitor
    }

    fn active_tasks(&self) -> MutexGuard<'_, HashMap<String, TaskExecutionContext>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn results(&self) -> MutexGuard<'_, ResultStore> {
        self.results.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn background_tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.background.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one task to completion.
    ///
    /// Never fails: every outcome, including rejection before spawning, is a
    /// [`TaskExecutionResult`].
    pub async fn execute_task(&self, request: TaskExecutionRequest) -> TaskExecutionResult {
        let correlation_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();

        if let Err(e) = self.validate_request(&request) {
            warn!(task = %request.id, correlation_id = %correlation_id, error = %e, "request rejected");
            return self.reject(&request.id, &correlation_id, started_at, &e);
        }

        let cancel_rx = match self.reserve_slot(&request.id, &correlation_id, started_at) {
            Ok(rx) => rx,
            Err(e) => {
                warn!(task = %request.id, correlation_id = %correlation_id, error = %e, "request not admitted");
                return self.reject(&request.id, &correlation_id, started_at, &e);
            }
        };

        if let Err(e) = validate_options(&request) {
            warn!(task = %request.id, error = %e, "invalid execution options");
            let result = self.reject(&request.id, &correlation_id, started_at, &e);
            return self.finalize_unspawned(&request.id, result, cancel_rx).await;
        }

        let session_name = request
            .session_name
            .clone()
            .unwrap_or_else(|| format!("task-{}", request.id));
        let logs_path = self.prepare_logs_path(&request, &session_name);

        let mut spawn_cfg = SpawnConfig::from_config(
            &self.config,
            request.id.clone(),
            session_name,
            request.working_directory.clone(),
        )
        .with_correlation_id(correlation_id.clone());
        if let Some(path) = &logs_path {
            spawn_cfg = spawn_cfg.with_env(SESSION_LOGS_ENV, path.as_os_str());
        }

        let spawned = match self.supervisor.spawn(&spawn_cfg) {
            Ok(p) => p,
            Err(e) => {
                error!(task = %request.id, correlation_id = %correlation_id, error = %e, "spawn failed");
                let result = self.reject(&request.id, &correlation_id, started_at, &e);
                return self.finalize_unspawned(&request.id, result, cancel_rx).await;
            }
        };

        let pid = spawned.handle.pid;
        let admitted = {
            let mut active = self.active_tasks();
            match active.get_mut(&request.id) {
                Some(ctx) => {
                    ctx.handle = Some(spawned.handle.clone());
                    ctx.logs_path = logs_path.clone();
                    true
                }
                None => false,
            }
        };
        if !admitted {
            // Cancelled while spawning; the canceller owns the result.
            let _ = self.supervisor.terminate(pid).await;
            return await_handover(&request.id, &correlation_id, started_at, cancel_rx).await;
        }

        self.monitor
            .start_monitoring(&request.id, pid, logs_path.as_deref());
        self.sink.emit(WorkerEvent::TaskStarted {
            task_id: request.id.clone(),
            correlation_id: correlation_id.clone(),
            pid,
        });

        let timeout_ms = request
            .timeout_ms
            .unwrap_or(self.config.worker.default_timeout_ms);
        info!(
            task = %request.id,
            pid,
            correlation_id = %correlation_id,
            timeout_ms,
            "task started"
        );

        let resolution = self
            .drive(&request, spawned, timeout_ms, &correlation_id, cancel_rx)
            .await;

        match resolution {
            Resolution::Finalized(result) => result,
            Resolution::TimedOut => {
                let reason = CancelReason::TimedOut {
                    after_ms: timeout_ms,
                };
                warn!(task = %request.id, pid, timeout_ms, "task timed out; cancelling");
                match self.cancel_with(&request.id, reason).await {
                    Some(result) => result,
                    None => self
                        .results()
                        .get(&request.id)
                        .filter(|stored| stored.correlation_id == correlation_id)
                        .cloned()
                        .unwrap_or_else(|| {
                            cancelled_result(&request.id, &correlation_id, started_at, Some(pid), reason, &self.sink)
                        }),
                }
            }
            other => {
                let result = self.build_result(&request.id, &correlation_id, started_at, pid, other);
                self.finalize(&request.id, pid, result).await
            }
        }
    }

    /// Prompt, then consume stdout until something resolves the task.
    async fn drive(
        &self,
        request: &TaskExecutionRequest,
        spawned: SpawnedProcess,
        timeout_ms: u64,
        correlation_id: &str,
        mut cancel_rx: oneshot::Receiver<TaskExecutionResult>,
    ) -> Resolution {
        let SpawnedProcess {
            handle,
            mut stdin,
            mut stdout,
            mut exit,
        } = spawned;
        let pid = handle.pid;

        let deadline = tokio::time::sleep(Duration::from_millis(timeout_ms));
        tokio::pin!(deadline);

        // An agent that never reads stdin must not outlive the task timeout.
        let delivered = tokio::select! {
            sent = send_prompt(&mut stdin, request, timeout_ms) => sent,
            _ = &mut deadline => return Resolution::TimedOut,
        };
        if let Err(e) = delivered {
            warn!(task = %request.id, pid, error = %e, "could not deliver prompt");
            return Resolution::Line(Box::new(communication_failure(
                correlation_id,
                e.to_string(),
            )));
        }
        debug!(task = %request.id, pid, "prompt written");

        let mut lines = LineBuffer::new();
        let mut state = StreamState::new();
        let mut chunk = vec![0u8; READ_CHUNK];
        let mut stdout_open = true;
        let mut handover_open = true;

        loop {
            tokio::select! {
                biased;

                handover = &mut cancel_rx, if handover_open => {
                    match handover {
                        Ok(result) => return Resolution::Finalized(result),
                        Err(_) => handover_open = false,
                    }
                }

                _ = &mut deadline => {
                    state.try_resolve();
                    return Resolution::TimedOut;
                }

                read = stdout.read(&mut chunk), if stdout_open => {
                    match read {
                        Ok(0) => {
                            stdout_open = false;
                            debug!(task = %request.id, pid, "stdout closed");
                            if let Some(line) = lines.finish() {
                                if let Some(res) = self.handle_line(request, pid, correlation_id, &line, &mut state) {
                                    return res;
                                }
                            }
                        }
                        Ok(n) => {
                            for line in lines.push(&chunk[..n]) {
                                if let Some(res) = self.handle_line(request, pid, correlation_id, &line, &mut state) {
                                    return res;
                                }
                            }
                        }
                        Err(e) => {
                            warn!(task = %request.id, pid, error = %e, "stdout read failed");
                            stdout_open = false;
                        }
                    }
                }

                info = wait_exit(&mut exit) => {
                    if let Some(res) = self
                        .drain_after_exit(request, pid, correlation_id, &mut stdout, stdout_open, &mut lines, &mut state)
                        .await
                    {
                        return res;
                    }
                    state.try_resolve();
                    return match info {
                        Some(info) => Resolution::Exited(info),
                        None => Resolution::StreamClosed,
                    };
                }
            }
        }
    }

    /// Read what the process wrote before exiting, for at most the drain
    /// window. Returns a resolution if a terminal line shows up.
    #[allow(clippy::too_many_arguments)]
    async fn drain_after_exit(
        &self,
        request: &TaskExecutionRequest,
        pid: u32,
        correlation_id: &str,
        stdout: &mut ChildStdout,
        stdout_open: bool,
        lines: &mut LineBuffer,
        state: &mut StreamState,
    ) -> Option<Resolution> {
        if !stdout_open {
            return None;
        }
        let drain = tokio::time::sleep(self.config.exit_drain());
        tokio::pin!(drain);
        let mut chunk = vec![0u8; READ_CHUNK];

        loop {
            tokio::select! {
                _ = &mut drain => return None,
                read = stdout.read(&mut chunk) => match read {
                    Ok(0) | Err(_) => {
                        let line = lines.finish()?;
                        return self.handle_line(request, pid, correlation_id, &line, state);
                    }
                    Ok(n) => {
                        for line in lines.push(&chunk[..n]) {
                            if let Some(res) = self.handle_line(request, pid, correlation_id, &line, state) {
                                return Some(res);
                            }
                        }
                    }
                }
            }
        }
    }

    fn handle_line(
        &self,
        request: &TaskExecutionRequest,
        pid: u32,
        correlation_id: &str,
        line: &str,
        state: &mut StreamState,
    ) -> Option<Resolution> {
        if line.trim().is_empty() {
            return None;
        }

        let parsed = parse_line(line, correlation_id);
        match state.offer(parsed) {
            LineAction::Malformed(reason) => {
                warn!(task = %request.id, pid, error = %reason, "skipping malformed stdout line");
                None
            }
            LineAction::Informational(event) => {
                self.monitor.update_activity(pid);
                self.sink.emit(WorkerEvent::StreamEvent {
                    task_id: request.id.clone(),
                    correlation_id: correlation_id.to_string(),
                    event,
                });
                None
            }
            LineAction::Resolve(resp) => {
                if let Some(event) = resp.normalize() {
                    self.sink.emit(WorkerEvent::StreamEvent {
                        task_id: request.id.clone(),
                        correlation_id: correlation_id.to_string(),
                        event,
                    });
                }
                info!(
                    task = %request.id,
                    pid,
                    event = resp.event_name().unwrap_or_default(),
                    status = ?resp.status,
                    "terminal event received"
                );
                Some(Resolution::Line(resp))
            }
            LineAction::Ignored => {
                debug!(task = %request.id, pid, "line after resolution ignored");
                None
            }
        }
    }

    fn build_result(
        &self,
        task_id: &str,
        correlation_id: &str,
        started_at: DateTime<Utc>,
        pid: u32,
        resolution: Resolution,
    ) -> TaskExecutionResult {
        let mut result = TaskExecutionResult {
            task_id: task_id.to_string(),
            success: false,
            state: TaskState::Failed,
            output: None,
            error: None,
            correlation_id: correlation_id.to_string(),
            started_at,
            finished_at: Utc::now(),
            pid: Some(pid),
            outcome: None,
            reason: None,
            tags: Vec::new(),
            message: None,
            return_code: None,
            failure: None,
        };

        match resolution {
            Resolution::Line(resp) => {
                result.success = is_success(&resp);
                result.return_code = resp.return_code;
                if let Some(ev) = resp.normalize() {
                    result.outcome = ev.outcome;
                    result.reason = ev.reason;
                    result.tags = ev.tags;
                    result.message = ev.message;
                }
                if result.success {
                    result.output = success_output(&resp);
                } else {
                    let message = extract_error_message(&resp).unwrap_or_else(|| {
                        format!(
                            "Task failed with status {}",
                            resp.status.map(|s| s.as_str()).unwrap_or("unknown")
                        )
                    });
                    // Set only when the prompt never reached the agent.
                    let code = resp
                        .event
                        .is_none()
                        .then_some(ErrorCode::ProcessCommunicationFailed);
                    result.failure = Some(handle_error(&self.sink, &message, code, correlation_id));
                    result.error = Some(message);
                }
            }
            Resolution::Exited(info) => {
                result.success = info.success();
                result.return_code = info.code.map(i64::from);
                if !result.success {
                    let message = exit_message(&info);
                    result.failure = Some(handle_error(
                        &self.sink,
                        &message,
                        Some(ErrorCode::UnexpectedTermination),
                        correlation_id,
                    ));
                    result.error = Some(message);
                }
            }
            Resolution::StreamClosed => {
                let message = "Process output closed without an exit status".to_string();
                result.failure = Some(handle_error(
                    &self.sink,
                    &message,
                    Some(ErrorCode::UnexpectedTermination),
                    correlation_id,
                ));
                result.error = Some(message);
            }
            Resolution::TimedOut | Resolution::Finalized(_) => {}
        }

        if result.success {
            result.state = TaskState::Completed;
        }
        result
    }

    /// Cleanup for a task this call resolved itself.
    async fn finalize(&self, task_id: &str, pid: u32, result: TaskExecutionResult) -> TaskExecutionResult {
        // Context removal and the canceller's store happen under the same
        // lock, so a missing context means its result is already stored.
        let removed = {
            let mut active = self.active_tasks();
            match active.remove(task_id) {
                Some(ctx) => Ok(ctx),
                None => Err(self
                    .results()
                    .get(task_id)
                    .filter(|stored| stored.correlation_id == result.correlation_id)
                    .cloned()),
            }
        };
        match removed {
            Ok(ctx) => drop(ctx),
            Err(stored) => {
                debug!(task = %task_id, pid, "task was cancelled concurrently");
                return stored.unwrap_or(result);
            }
        }

        if let Err(e) = self.supervisor.terminate(pid).await {
            warn!(task = %task_id, pid, error = %e, "terminate after resolution failed");
        }
        let reason = result
            .error
            .clone()
            .unwrap_or_else(|| "task completed".to_string());
        self.monitor.transition_state(pid, result.state, &reason);
        self.monitor.stop_monitoring(pid);

        self.record(&result);
        result
    }

    /// Cleanup for an admitted task that failed before it had a process.
    async fn finalize_unspawned(
        &self,
        task_id: &str,
        result: TaskExecutionResult,
        cancel_rx: oneshot::Receiver<TaskExecutionResult>,
    ) -> TaskExecutionResult {
        let removed = self.active_tasks().remove(task_id);
        if removed.is_none() {
            return await_handover(task_id, &result.correlation_id, result.started_at, cancel_rx).await;
        }
        self.record(&result);
        result
    }

    fn record(&self, result: &TaskExecutionResult) {
        self.results().insert(result.clone());
        self.announce(result);
    }

    fn announce(&self, result: &TaskExecutionResult) {
        info!(
            task = %result.task_id,
            correlation_id = %result.correlation_id,
            success = result.success,
            state = %result.state,
            "task finished"
        );
        self.sink.emit(WorkerEvent::TaskFinished {
            task_id: result.task_id.clone(),
            correlation_id: result.correlation_id.clone(),
            success: result.success,
            state: result.state,
        });
    }

    /// Cancel an active task. Returns false for unknown or already finished
    /// tasks.
    pub async fn cancel_task(&self, task_id: &str) -> bool {
        self.cancel_with(task_id, CancelReason::Requested).await.is_some()
    }

    async fn cancel_with(&self, task_id: &str, reason: CancelReason) -> Option<TaskExecutionResult> {
        let (mut ctx, result) = {
            let mut active = self.active_tasks();
            let Some(ctx) = active.remove(task_id) else {
                debug!(task = %task_id, "cancel requested for inactive task");
                return None;
            };
            let result = cancelled_result(
                task_id,
                &ctx.correlation_id,
                ctx.started_at,
                ctx.handle.as_ref().map(|h| h.pid),
                reason,
                &self.sink,
            );
            self.results().insert(result.clone());
            (ctx, result)
        };

        let pid = result.pid;
        info!(task = %task_id, pid = ?pid, reason = %reason.describe(), "cancelling task");
        self.announce(&result);

        if let Some(pid) = pid {
            self.monitor
                .transition_state(pid, TaskState::Cancelled, &reason.describe());
        }
        if let Some(tx) = ctx.cancel_tx.take() {
            let _ = tx.send(result.clone());
        }
        if let Some(pid) = pid {
            if let Err(e) = self.supervisor.terminate(pid).await {
                warn!(task = %task_id, pid, error = %e, "terminate during cancel failed");
            }
            self.monitor.stop_monitoring(pid);
        }

        Some(result)
    }

    /// Live status for active tasks, the stored result for finished ones.
    pub fn get_task_status(&self, task_id: &str) -> Option<TaskStatus> {
        if let Some(status) = self.active_status(task_id) {
            return Some(TaskStatus::Active(status));
        }
        self.results()
            .get(task_id)
            .cloned()
            .map(TaskStatus::Finished)
    }

    pub fn get_active_tasks(&self) -> Vec<ActiveTaskStatus> {
        let ids: Vec<String> = self.active_tasks().keys().cloned().collect();
        let mut out: Vec<ActiveTaskStatus> =
            ids.iter().filter_map(|id| self.active_status(id)).collect();
        out.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.task_id.cmp(&b.task_id)));
        out
    }

    fn active_status(&self, task_id: &str) -> Option<ActiveTaskStatus> {
        let (correlation_id, pid, started_at, logs_path) = {
            let active = self.active_tasks();
            let ctx = active.get(task_id)?;
            (
                ctx.correlation_id.clone(),
                ctx.handle.as_ref().map(|h| h.pid),
                ctx.started_at,
                ctx.logs_path.clone(),
            )
        };
        let snapshot = pid.and_then(|pid| self.monitor.snapshot(pid));
        Some(ActiveTaskStatus {
            task_id: task_id.to_string(),
            correlation_id,
            pid,
            state: snapshot.as_ref().map_or(TaskState::Running, |s| s.state),
            started_at,
            last_activity: snapshot.map(|s| s.last_activity),
            logs_path,
        })
    }

    pub fn get_health_status(&self) -> WorkerHealth {
        let processes = self
            .supervisor
            .tracked_pids()
            .into_iter()
            .map(|pid| self.supervisor.health(pid))
            .collect();
        let monitored = self
            .monitor
            .monitored_pids()
            .into_iter()
            .filter_map(|pid| self.monitor.snapshot(pid))
            .collect();
        WorkerHealth {
            active_tasks: self.active_tasks().len(),
            max_concurrent_tasks: self.config.worker.max_concurrent_tasks,
            stored_results: self.results().len(),
            processes,
            monitored,
        }
    }

    /// One maintenance pass: reap orphaned process entries and expired results.
    pub fn run_maintenance(&self) {
        let reaped = self.supervisor.reap_orphans();
        let evicted = self.results().evict_expired();
        if !reaped.is_empty() || evicted > 0 {
            info!(?reaped, evicted, "maintenance pass");
        }
    }

    /// Cancel every active task and stop background loops.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.active_tasks().keys().cloned().collect();
        info!(active = ids.len(), "shutting down task orchestrator");
        for id in ids {
            self.cancel_with(&id, CancelReason::Shutdown).await;
        }
        for handle in self.background_tasks().drain(..) {
            handle.abort();
        }
    }

    fn validate_request(&self, request: &TaskExecutionRequest) -> Result<()> {
        if request.id.trim().is_empty() {
            return Err(WorkerError::Validation("task id must not be empty".into()));
        }
        if request.id.chars().any(char::is_control) {
            return Err(WorkerError::Validation(
                "task id must not contain control characters".into(),
            ));
        }
        if request.id.chars().count() > 256 {
            return Err(WorkerError::Validation(
                "task id must be at most 256 characters".into(),
            ));
        }
        if request.prompt.trim().is_empty() {
            return Err(WorkerError::Validation("prompt must not be empty".into()));
        }
        if let Some(ms) = request.timeout_ms {
            if ms == 0 {
                return Err(WorkerError::Validation("timeoutMs must be >= 1".into()));
            }
            if ms > self.config.worker.max_timeout_ms {
                return Err(WorkerError::Validation(format!(
                    "timeoutMs {ms} exceeds the maximum of {}",
                    self.config.worker.max_timeout_ms
                )));
            }
        }
        if !request.working_directory.is_dir() {
            return Err(WorkerError::Validation(format!(
                "working directory {} does not exist",
                request.working_directory.display()
            )));
        }
        Ok(())
    }

    /// Admit a task: enforce the ceiling and reject ids that are running.
    fn reserve_slot(
        &self,
        task_id: &str,
        correlation_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<oneshot::Receiver<TaskExecutionResult>> {
        let mut active = self.active_tasks();
        let limit = self.config.worker.max_concurrent_tasks;

        if active.contains_key(task_id) {
            return Err(WorkerError::Validation(format!(
                "task {task_id} is already running; duplicate delivery not started"
            )));
        }
        if active.len() >= limit {
            return Err(WorkerError::Other(anyhow::anyhow!(
                "concurrency limit reached ({} of {limit} tasks active)",
                active.len()
            )));
        }

        let (tx, rx) = oneshot::channel();
        active.insert(
            task_id.to_string(),
            TaskExecutionContext {
                task_id: task_id.to_string(),
                correlation_id: correlation_id.to_string(),
                handle: None,
                started_at,
                logs_path: None,
                cancel_tx: Some(tx),
            },
        );
        Ok(rx)
    }

    fn reject(
        &self,
        task_id: &str,
        correlation_id: &str,
        started_at: DateTime<Utc>,
        err: &WorkerError,
    ) -> TaskExecutionResult {
        let failure = ClientError::from_worker_error(err, correlation_id);
        self.sink.emit(WorkerEvent::ClientError(failure.clone()));
        TaskExecutionResult::rejected(task_id, correlation_id, started_at, failure)
    }

    /// `<logs_dir>/<session>/<task>-<timestamp>-<random>`, created on disk.
    /// A relative `logs_dir` is resolved against the task's working directory.
    fn prepare_logs_path(&self, request: &TaskExecutionRequest, session_name: &str) -> Option<PathBuf> {
        let root = &self.config.process.logs_dir;
        let root = if root.is_absolute() {
            root.clone()
        } else {
            request.working_directory.join(root)
        };
        let uid = Uuid::new_v4().simple().to_string();
        let leaf = format!(
            "{}-{}-{}",
            path_component(&request.id),
            Utc::now().format("%Y%m%dT%H%M%S%.3fZ"),
            &uid[..8]
        );
        let path = root.join(path_component(session_name)).join(leaf);

        match std::fs::create_dir_all(&path) {
            Ok(()) => Some(path),
            Err(e) => {
                warn!(task = %request.id, path = %path.display(), error = %e, "could not create session logs dir");
                None
            }
        }
    }
}

fn spawn_maintenance_loop(orch: Weak<TaskOrchestrator>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; nothing to clean yet.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(orch) = orch.upgrade() else {
                debug!("orchestrator dropped; maintenance loop exiting");
                break;
            };
            orch.run_maintenance();
        }
    })
}

async fn send_prompt(
    stdin: &mut ChildStdin,
    request: &TaskExecutionRequest,
    timeout_ms: u64,
) -> Result<()> {
    let opts = &request.options;
    let (extra, dropped) = passthrough_options(&opts.extra);
    if !dropped.is_empty() {
        warn!(task = %request.id, ?dropped, "ignoring options that shadow managed prompt fields");
    }
    let options = PromptOptions {
        cwd: request.working_directory.clone(),
        permission_mode: opts.permission_mode,
        timeout: timeout_secs(timeout_ms),
        model: opts.model.clone(),
        max_turns: opts.max_turns,
        allowed_tools: opts.allowed_tools.clone(),
        extra,
    };
    let mut message = PromptMessage::new(request.prompt.clone(), options);
    if let Some(run_id) = &opts.run_id {
        message = message.with_run_id(run_id.clone());
    }
    let line = message.to_line()?;

    let write = async {
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await
    };
    write.await.map_err(|e| {
        WorkerError::ProcessCommunicationFailed(format!("writing prompt to agent stdin: {e}"))
    })
}

fn validate_options(request: &TaskExecutionRequest) -> Result<()> {
    let opts = &request.options;
    if let Some(model) = &opts.model {
        let ok = match MODEL_RE.as_ref() {
            Some(re) => re.is_match(model),
            None => !model.trim().is_empty(),
        };
        if !ok {
            return Err(WorkerError::ConfigError(format!("invalid model identifier {model:?}")));
        }
    }
    if opts.max_turns == Some(0) {
        return Err(WorkerError::ConfigError("maxTurns must be >= 1".into()));
    }
    if let Some(tools) = &opts.allowed_tools {
        if tools.iter().any(|t| t.trim().is_empty()) {
            return Err(WorkerError::ConfigError(
                "allowedTools must not contain empty names".into(),
            ));
        }
    }
    Ok(())
}

/// Wait for the result handed over by whoever finalized the task.
async fn await_handover(
    task_id: &str,
    correlation_id: &str,
    started_at: DateTime<Utc>,
    cancel_rx: oneshot::Receiver<TaskExecutionResult>,
) -> TaskExecutionResult {
    match cancel_rx.await {
        Ok(result) => result,
        Err(_) => TaskExecutionResult {
            state: TaskState::Cancelled,
            ..TaskExecutionResult::rejected(
                task_id,
                correlation_id,
                started_at,
                ClientError::new(ErrorCode::Unknown, CancelReason::Requested.describe(), correlation_id),
            )
        },
    }
}

fn cancelled_result(
    task_id: &str,
    correlation_id: &str,
    started_at: DateTime<Utc>,
    pid: Option<u32>,
    reason: CancelReason,
    sink: &EventSink,
) -> TaskExecutionResult {
    let message = reason.describe();
    let failure = match reason {
        CancelReason::TimedOut { .. } => Some(handle_error(
            sink,
            &message,
            Some(ErrorCode::ExecutionTimeout),
            correlation_id,
        )),
        CancelReason::Requested | CancelReason::Shutdown => None,
    };
    TaskExecutionResult {
        task_id: task_id.to_string(),
        success: false,
        state: TaskState::Cancelled,
        output: None,
        error: Some(message),
        correlation_id: correlation_id.to_string(),
        started_at,
        finished_at: Utc::now(),
        pid,
        outcome: None,
        reason: None,
        tags: Vec::new(),
        message: None,
        return_code: None,
        failure,
    }
}

fn communication_failure(correlation_id: &str, message: String) -> ParsedResponse {
    ParsedResponse {
        success: false,
        event: None,
        status: None,
        return_code: None,
        outcome: None,
        error: Some(message),
        correlation_id: correlation_id.to_string(),
        raw: String::new(),
    }
}

fn exit_message(info: &ExitInfo) -> String {
    if let Some(err) = &info.error {
        return format!("Process error: {err}");
    }
    match (info.code, info.signal) {
        (Some(code), _) => format!("Process exited with code {code}"),
        (None, Some(sig)) => format!("Process terminated by signal {sig}"),
        (None, None) => "Process exited with unknown status".to_string(),
    }
}

/// Text a successful terminal event carries as the task's output.
fn success_output(resp: &ParsedResponse) -> Option<String> {
    let ev = resp.event.as_ref()?;
    ["result", "output"]
        .iter()
        .find_map(|k| ev.payload_str(k).map(str::to_string))
        .or_else(|| ev.message.clone())
}

/// Reduce arbitrary text to something safe as a single path component.
fn path_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .take(64)
        .collect();
    match cleaned.trim_matches('.') {
        "" => "_".to_string(),
        s => s.to_string(),
    }
}
