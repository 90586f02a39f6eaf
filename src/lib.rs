// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod events;
pub mod interpret;
pub mod logging;
pub mod monitor;
pub mod process;
pub mod types;

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::{WorkerConfig, load_or_default};
use crate::engine::{ExecutionOptions, TaskExecutionRequest, TaskExecutionResult, TaskOrchestrator};
use crate::events::{EventSink, WorkerEvent};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the task request (file, stdin or flags)
/// - the orchestrator and its background loops
/// - Ctrl-C handling
///
/// The result is printed to stdout as JSON. A failed task is an error.
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_or_default(&args.config)
        .with_context(|| format!("loading config from {}", args.config))?;
    let request = build_request(&args)?;

    if args.dry_run {
        print_dry_run(&cfg, &request)?;
        return Ok(());
    }

    let (sink, events) = EventSink::channel();
    tokio::spawn(log_events(events));

    let orchestrator = TaskOrchestrator::start(cfg, sink);

    // Ctrl-C → cancel everything; execute_task then returns CANCELLED.
    {
        let orch = orchestrator.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            warn!("Ctrl-C received; shutting down");
            orch.shutdown().await;
        });
    }

    let result = orchestrator.execute_task(request).await;
    orchestrator.shutdown().await;

    print_result(&result)?;
    if !result.success {
        bail!(
            "task {} finished {}: {}",
            result.task_id,
            result.state,
            result.error.as_deref().unwrap_or("no error message")
        );
    }
    Ok(())
}

/// Assemble the task request from `--request` or the inline flags.
pub fn build_request(args: &CliArgs) -> Result<TaskExecutionRequest> {
    if let Some(source) = &args.request {
        let text = if source == "-" {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("reading request from stdin")?;
            buf
        } else {
            std::fs::read_to_string(source)
                .with_context(|| format!("reading request file {source}"))?
        };
        let request: TaskExecutionRequest =
            serde_json::from_str(&text).context("parsing task execution request")?;
        return Ok(request);
    }

    let (Some(id), Some(prompt)) = (&args.task_id, &args.prompt) else {
        bail!("either --request or both --task-id and --prompt are required");
    };
    Ok(TaskExecutionRequest {
        id: id.clone(),
        prompt: prompt.clone(),
        session_name: args.session_name.clone(),
        working_directory: PathBuf::from(&args.working_dir),
        options: ExecutionOptions {
            permission_mode: args.permission_mode,
            model: args.model.clone(),
            ..ExecutionOptions::default()
        },
        timeout_ms: args.timeout_ms,
    })
}

async fn log_events(mut events: mpsc::UnboundedReceiver<WorkerEvent>) {
    while let Some(event) = events.recv().await {
        match serde_json::to_string(&event) {
            Ok(json) => debug!(event = event.name(), %json, "worker event"),
            Err(e) => warn!(event = event.name(), error = %e, "could not serialize worker event"),
        }
    }
}

fn print_result(result: &TaskExecutionResult) -> Result<()> {
    let json = serde_json::to_string_pretty(result)?;
    println!("{json}");
    info!(task = %result.task_id, state = %result.state, "result written to stdout");
    Ok(())
}

/// Simple dry-run output: effective config and the request that would run.
fn print_dry_run(cfg: &WorkerConfig, request: &TaskExecutionRequest) -> Result<()> {
    println!("taskworker dry-run");
    println!("  worker.max_concurrent_tasks = {}", cfg.worker.max_concurrent_tasks);
    println!("  worker.default_timeout_ms = {}", cfg.worker.default_timeout_ms);
    println!("  worker.inactivity_timeout_ms = {}", cfg.worker.inactivity_timeout_ms);
    println!(
        "  process = {} {}{}",
        cfg.process.executable,
        if cfg.process.unbuffered { "-u " } else { "" },
        cfg.process.script.display()
    );
    println!("  process.logs_dir = {}", cfg.process.logs_dir.display());
    println!();
    println!("request:");
    println!("{}", serde_json::to_string_pretty(request)?);

    debug!("dry-run complete (no execution)");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PermissionMode;
    use clap::Parser;

    #[test]
    fn inline_flags_become_a_request() {
        let args = CliArgs::try_parse_from([
            "taskworker",
            "--task-id",
            "t1",
            "--prompt",
            "do it",
            "--permission-mode",
            "plan",
            "--model",
            "sonnet",
            "--timeout-ms",
            "1000",
        ])
        .unwrap();
        let req = build_request(&args).unwrap();
        assert_eq!(req.id, "t1");
        assert_eq!(req.options.permission_mode, PermissionMode::Plan);
        assert_eq!(req.options.model.as_deref(), Some("sonnet"));
        assert_eq!(req.timeout_ms, Some(1000));
    }

    #[test]
    fn request_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("req.json");
        std::fs::write(&path, r#"{"id":"r1","prompt":"p","timeoutMs":50}"#).unwrap();
        let args = CliArgs::try_parse_from([
            "taskworker",
            "--request",
            path.to_str().unwrap(),
        ])
        .unwrap();
        let req = build_request(&args).unwrap();
        assert_eq!(req.id, "r1");
        assert_eq!(req.timeout_ms, Some(50));
    }
}
