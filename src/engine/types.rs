// src/engine/types.rs

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::oneshot;

use crate::interpret::ClientError;
use crate::process::ProcessHandle;
use crate::types::{Outcome, PermissionMode, TaskState};

fn default_working_directory() -> PathBuf {
    PathBuf::from(".")
}

/// A unit of work delivered by the job queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskExecutionRequest {
    pub id: String,
    pub prompt: String,
    #[serde(default)]
    pub session_name: Option<String>,
    #[serde(default = "default_working_directory")]
    pub working_directory: PathBuf,
    #[serde(default)]
    pub options: ExecutionOptions,
    /// Wall-clock limit. Falls back to `[worker].default_timeout_ms`.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl TaskExecutionRequest {
    pub fn new(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            session_name: None,
            working_directory: default_working_directory(),
            options: ExecutionOptions::default(),
            timeout_ms: None,
        }
    }
}

/// Agent options forwarded in the prompt message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOptions {
    #[serde(default)]
    pub permission_mode: PermissionMode,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub max_turns: Option<u32>,
    #[serde(default)]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(default)]
    pub run_id: Option<String>,
    /// Passed through to the agent untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Final record of one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskExecutionResult {
    pub task_id: String,
    pub success: bool,
    pub state: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub correlation_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<ClientError>,
}

impl TaskExecutionResult {
    /// A FAILED result for a task that never got a process.
    pub fn rejected(
        task_id: &str,
        correlation_id: &str,
        started_at: DateTime<Utc>,
        failure: ClientError,
    ) -> Self {
        Self {
            task_id: task_id.to_string(),
            success: false,
            state: TaskState::Failed,
            output: None,
            error: Some(failure.message.clone()),
            correlation_id: correlation_id.to_string(),
            started_at,
            finished_at: Utc::now(),
            pid: None,
            outcome: None,
            reason: None,
            tags: Vec::new(),
            message: None,
            return_code: None,
            failure: Some(failure),
        }
    }
}

/// Why a task was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    Requested,
    TimedOut { after_ms: u64 },
    Shutdown,
}

impl CancelReason {
    pub fn describe(self) -> String {
        match self {
            CancelReason::Requested => "Task cancelled".to_string(),
            CancelReason::TimedOut { after_ms } => format!("Task timed out after {after_ms}ms"),
            CancelReason::Shutdown => "Task cancelled: worker shutting down".to_string(),
        }
    }
}

/// Working state of an admitted task.
#[derive(Debug)]
pub struct TaskExecutionContext {
    pub task_id: String,
    pub correlation_id: String,
    /// `None` until the process has been spawned.
    pub handle: Option<ProcessHandle>,
    pub started_at: DateTime<Utc>,
    pub logs_path: Option<PathBuf>,
    /// Hands the final result to the `execute_task` call when someone else
    /// finalizes the task.
    pub(crate) cancel_tx: Option<oneshot::Sender<TaskExecutionResult>>,
}

/// Live view of an admitted task.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveTaskStatus {
    pub task_id: String,
    pub correlation_id: String,
    pub pid: Option<u32>,
    pub state: TaskState,
    pub started_at: DateTime<Utc>,
    pub last_activity: Option<DateTime<Utc>>,
    pub logs_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TaskStatus {
    Active(ActiveTaskStatus),
    Finished(TaskExecutionResult),
}

impl TaskStatus {
    pub fn state(&self) -> TaskState {
        match self {
            TaskStatus::Active(a) => a.state,
            TaskStatus::Finished(r) => r.state,
        }
    }
}
