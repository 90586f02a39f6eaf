// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

use crate::types::PermissionMode;

/// Command-line arguments for `taskworker`.
///
/// A task is described either by `--request <file>` (a JSON
/// `TaskExecutionRequest`) or by the individual `--task-id` / `--prompt`
/// flags.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "taskworker",
    version,
    about = "Run a coding-agent task under supervision and report its outcome.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Worker.toml` in the current working directory. A missing
    /// default file means built-in defaults.
    #[arg(long, value_name = "PATH", default_value = "Worker.toml")]
    pub config: String,

    /// JSON file holding a full task execution request (`-` for stdin).
    #[arg(long, value_name = "PATH", conflicts_with_all = ["task_id", "prompt"])]
    pub request: Option<String>,

    /// Task identifier.
    #[arg(long, value_name = "ID", required_unless_present = "request")]
    pub task_id: Option<String>,

    /// Prompt sent to the agent.
    #[arg(long, value_name = "TEXT", required_unless_present = "request")]
    pub prompt: Option<String>,

    /// Working directory for the agent process.
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub working_dir: String,

    /// Session name passed to the agent wrapper.
    #[arg(long, value_name = "NAME")]
    pub session_name: Option<String>,

    /// Per-task wall-clock timeout in milliseconds.
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Permission mode forwarded to the agent.
    #[arg(long, value_enum, value_name = "MODE", default_value = "bypassPermissions")]
    pub permission_mode: PermissionMode,

    /// Model identifier forwarded to the agent.
    #[arg(long, value_name = "MODEL")]
    pub model: Option<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `TASKWORKER_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Validate config and request, print them, but don't spawn anything.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_parse() {
        let args = CliArgs::try_parse_from([
            "taskworker",
            "--task-id",
            "t1",
            "--prompt",
            "echo hi",
            "--timeout-ms",
            "5000",
        ])
        .unwrap();
        assert_eq!(args.task_id.as_deref(), Some("t1"));
        assert_eq!(args.timeout_ms, Some(5000));
        assert_eq!(args.config, "Worker.toml");
    }

    #[test]
    fn request_conflicts_with_inline_task() {
        let res = CliArgs::try_parse_from([
            "taskworker",
            "--request",
            "req.json",
            "--task-id",
            "t1",
        ]);
        assert!(res.is_err());
    }

    #[test]
    fn permission_mode_is_checked_by_clap() {
        let args = CliArgs::try_parse_from(["taskworker", "--task-id", "t1", "--prompt", "p"]).unwrap();
        assert_eq!(args.permission_mode, PermissionMode::BypassPermissions);

        let args = CliArgs::try_parse_from([
            "taskworker",
            "--task-id",
            "t1",
            "--prompt",
            "p",
            "--permission-mode",
            "acceptEdits",
        ])
        .unwrap();
        assert_eq!(args.permission_mode, PermissionMode::AcceptEdits);

        let res = CliArgs::try_parse_from([
            "taskworker",
            "--task-id",
            "t1",
            "--prompt",
            "p",
            "--permission-mode",
            "yolo",
        ]);
        assert!(res.is_err());
    }

    #[test]
    fn prompt_required_without_request() {
        let res = CliArgs::try_parse_from(["taskworker", "--task-id", "t1"]);
        assert!(res.is_err());
    }
}
