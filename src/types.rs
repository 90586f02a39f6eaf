use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a monitored agent process.
///
/// `Running` is the initial state. `Active` and `Idle` alternate with observed
/// activity. `Completed`, `Failed` and `Cancelled` are terminal: once reached,
/// no further transitions are accepted for that PID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskState {
    Running,
    Active,
    Idle,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Running => "RUNNING",
            TaskState::Active => "ACTIVE",
            TaskState::Idle => "IDLE",
            TaskState::Completed => "COMPLETED",
            TaskState::Failed => "FAILED",
            TaskState::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authoritative `outcome` field of the inbound stream protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Completed,
    Failed,
    Timeout,
    Shutdown,
    Terminated,
    Running,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::Failed => "failed",
            Outcome::Timeout => "timeout",
            Outcome::Shutdown => "shutdown",
            Outcome::Terminated => "terminated",
            Outcome::Running => "running",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "completed" => Ok(Outcome::Completed),
            "failed" => Ok(Outcome::Failed),
            "timeout" => Ok(Outcome::Timeout),
            "shutdown" => Ok(Outcome::Shutdown),
            "terminated" => Ok(Outcome::Terminated),
            "running" => Ok(Outcome::Running),
            other => Err(format!("invalid outcome: {other}")),
        }
    }
}

/// Status derived from an inbound event, kept for consumers that predate the
/// `outcome` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegacyStatus {
    Running,
    Idle,
    Completed,
    Failed,
    Error,
    Timeout,
    Shutdown,
    Terminated,
}

impl LegacyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LegacyStatus::Running => "running",
            LegacyStatus::Idle => "idle",
            LegacyStatus::Completed => "completed",
            LegacyStatus::Failed => "failed",
            LegacyStatus::Error => "error",
            LegacyStatus::Timeout => "timeout",
            LegacyStatus::Shutdown => "shutdown",
            LegacyStatus::Terminated => "terminated",
        }
    }

    /// Whether an event carrying this status ends the task.
    pub fn is_terminal(self) -> bool {
        !matches!(self, LegacyStatus::Running | LegacyStatus::Idle)
    }

    /// Whether this status, on its own, indicates a failed run.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            LegacyStatus::Failed
                | LegacyStatus::Error
                | LegacyStatus::Timeout
                | LegacyStatus::Terminated
        )
    }
}

impl fmt::Display for LegacyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LegacyStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "running" => Ok(LegacyStatus::Running),
            "idle" => Ok(LegacyStatus::Idle),
            "completed" => Ok(LegacyStatus::Completed),
            "failed" => Ok(LegacyStatus::Failed),
            "error" => Ok(LegacyStatus::Error),
            "timeout" => Ok(LegacyStatus::Timeout),
            "shutdown" => Ok(LegacyStatus::Shutdown),
            "terminated" => Ok(LegacyStatus::Terminated),
            other => Err(format!("invalid status: {other}")),
        }
    }
}

impl From<Outcome> for LegacyStatus {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Completed => LegacyStatus::Completed,
            Outcome::Failed => LegacyStatus::Failed,
            Outcome::Timeout => LegacyStatus::Timeout,
            Outcome::Shutdown => LegacyStatus::Shutdown,
            Outcome::Terminated => LegacyStatus::Terminated,
            Outcome::Running => LegacyStatus::Running,
        }
    }
}

/// Permission mode forwarded to the agent in the prompt payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum PermissionMode {
    #[default]
    #[serde(rename = "bypassPermissions")]
    #[value(name = "bypassPermissions")]
    BypassPermissions,
    #[serde(rename = "default")]
    #[value(name = "default")]
    Default,
    #[serde(rename = "plan")]
    #[value(name = "plan")]
    Plan,
    #[serde(rename = "acceptEdits")]
    #[value(name = "acceptEdits")]
    AcceptEdits,
}
