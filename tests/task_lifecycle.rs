mod common;
use crate::common::builders::{RequestBuilder, WorkerConfigBuilder};
use crate::common::{echo_agent, init_tracing, with_timeout, write_agent_script};

use taskworker::engine::{TaskOrchestrator, TaskStatus};
use taskworker::events::{EventSink, WorkerEvent};
use taskworker::interpret::ErrorCode;
use taskworker::types::{Outcome, PermissionMode, TaskState};

#[tokio::test]
async fn completed_run_reports_output_and_is_stored() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let script = echo_agent(
        dir.path(),
        &[
            r#"{"event":"run_started","run_id":"r1"}"#,
            r#"{"event":"progress","message":"working"}"#,
            r#"{"event":"run_completed","outcome":"completed","run_id":"r1","tags":["a"],"payload":{"result":"all done"}}"#,
        ],
    );
    let cfg = WorkerConfigBuilder::new(script).build();
    let (sink, mut events) = EventSink::channel();
    let orch = TaskOrchestrator::new(cfg, sink);

    let req = RequestBuilder::new("t-ok", dir.path()).build();
    let result = with_timeout(orch.execute_task(req)).await;

    assert!(result.success, "unexpected failure: {result:?}");
    assert_eq!(result.state, TaskState::Completed);
    assert_eq!(result.output.as_deref(), Some("all done"));
    assert_eq!(result.outcome, Some(Outcome::Completed));
    assert_eq!(result.tags, vec!["a".to_string()]);
    assert_eq!(result.return_code, Some(0));
    assert!(result.pid.is_some());
    assert!(result.failure.is_none());

    match orch.get_task_status("t-ok") {
        Some(TaskStatus::Finished(stored)) => assert_eq!(stored, result),
        other => panic!("expected finished status, got {other:?}"),
    }
    assert!(orch.get_active_tasks().is_empty());
    assert!(orch.supervisor().tracked_pids().is_empty());

    let mut names = Vec::new();
    while let Ok(ev) = events.try_recv() {
        names.push(ev.name());
    }
    assert!(names.contains(&"task.started"));
    assert!(names.contains(&"stream.event"));
    assert!(names.contains(&"task.finished"));
}

#[tokio::test]
async fn malformed_lines_are_skipped() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let script = echo_agent(
        dir.path(),
        &[
            "not json at all",
            r#"{"no_event_field":true}"#,
            "",
            r#"{"event":"run_completed"}"#,
        ],
    );
    let orch = TaskOrchestrator::new(WorkerConfigBuilder::new(script).build(), EventSink::disabled());

    let result = with_timeout(orch.execute_task(RequestBuilder::new("t-mal", dir.path()).build())).await;
    assert!(result.success);
    assert_eq!(result.state, TaskState::Completed);
}

#[tokio::test]
async fn first_terminal_event_wins() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let script = echo_agent(
        dir.path(),
        &[
            r#"{"event":"run_failed","message":"boom"}"#,
            r#"{"event":"run_completed"}"#,
        ],
    );
    let (sink, mut events) = EventSink::channel();
    let orch = TaskOrchestrator::new(WorkerConfigBuilder::new(script).build(), sink);

    let result = with_timeout(orch.execute_task(RequestBuilder::new("t-once", dir.path()).build())).await;
    assert!(!result.success);
    assert_eq!(result.state, TaskState::Failed);
    assert_eq!(result.error.as_deref(), Some("boom"));
    assert!(result.failure.is_some());

    let mut finished = 0;
    while let Ok(ev) = events.try_recv() {
        if matches!(ev, WorkerEvent::TaskFinished { .. }) {
            finished += 1;
        }
    }
    assert_eq!(finished, 1);
}

#[tokio::test]
async fn timeout_reason_on_failure_reports_timeout_outcome() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let script = echo_agent(
        dir.path(),
        &[r#"{"event":"run_failed","reason":"timeout","error":{"message":"agent gave up"}}"#],
    );
    let orch = TaskOrchestrator::new(WorkerConfigBuilder::new(script).build(), EventSink::disabled());

    let result = with_timeout(orch.execute_task(RequestBuilder::new("t-to", dir.path()).build())).await;
    assert_eq!(result.state, TaskState::Failed);
    assert_eq!(result.error.as_deref(), Some("agent gave up"));
    assert_eq!(result.reason.as_deref(), Some("timeout"));
    assert_eq!(result.return_code, Some(1));
}

#[tokio::test]
async fn clean_exit_without_terminal_event_completes() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let script = write_agent_script(dir.path(), "read -r prompt\nexit 0\n");
    let orch = TaskOrchestrator::new(WorkerConfigBuilder::new(script).build(), EventSink::disabled());

    let result = with_timeout(orch.execute_task(RequestBuilder::new("t-exit0", dir.path()).build())).await;
    assert!(result.success);
    assert_eq!(result.state, TaskState::Completed);
    assert_eq!(result.return_code, Some(0));
}

#[tokio::test]
async fn nonzero_exit_fails_with_exit_code() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let script = write_agent_script(
        dir.path(),
        "read -r prompt\nprintf '%s\\n' '{\"event\":\"progress\"}'\nexit 3\n",
    );
    let orch = TaskOrchestrator::new(WorkerConfigBuilder::new(script).build(), EventSink::disabled());

    let result = with_timeout(orch.execute_task(RequestBuilder::new("t-exit3", dir.path()).build())).await;
    assert!(!result.success);
    assert_eq!(result.state, TaskState::Failed);
    assert_eq!(result.error.as_deref(), Some("Process exited with code 3"));
    assert_eq!(result.return_code, Some(3));
    let failure = result.failure.expect("failure details");
    assert_eq!(failure.code, ErrorCode::UnexpectedTermination);
    assert!(failure.recoverable);
}

#[tokio::test]
async fn prompt_reaches_agent_as_one_json_line() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let capture = dir.path().join("prompt.json");
    let body = format!(
        "read -r prompt\nprintf '%s\\n' \"$prompt\" > '{}'\nprintf '%s\\n' '{{\"event\":\"run_completed\"}}'\n",
        capture.display()
    );
    let script = write_agent_script(dir.path(), &body);
    let orch = TaskOrchestrator::new(WorkerConfigBuilder::new(script).build(), EventSink::disabled());

    let req = RequestBuilder::new("t-prompt", dir.path())
        .prompt("line one\nline two")
        .model("sonnet")
        .timeout_ms(4500)
        .build();
    let result = with_timeout(orch.execute_task(req)).await;
    assert!(result.success);

    let written = std::fs::read_to_string(&capture).unwrap();
    let v: serde_json::Value = serde_json::from_str(written.trim()).unwrap();
    assert_eq!(v["action"], "prompt");
    assert_eq!(v["prompt"], "line one\nline two");
    assert_eq!(v["options"]["model"], "sonnet");
    assert_eq!(v["options"]["timeout"], 5);
    assert_eq!(v["options"]["permission_mode"], "bypassPermissions");
}

#[tokio::test]
async fn passthrough_options_cannot_shadow_managed_fields() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let capture = dir.path().join("prompt.json");
    let body = format!(
        "read -r prompt\nprintf '%s\\n' \"$prompt\" > '{}'\nprintf '%s\\n' '{{\"event\":\"run_completed\"}}'\n",
        capture.display()
    );
    let script = write_agent_script(dir.path(), &body);
    let orch = TaskOrchestrator::new(WorkerConfigBuilder::new(script).build(), EventSink::disabled());

    let req = RequestBuilder::new("t-shadow", dir.path())
        .permission_mode(PermissionMode::Plan)
        .timeout_ms(4000)
        .option("cwd", serde_json::json!("/etc"))
        .option("permission_mode", serde_json::json!("bypassPermissions"))
        .option("timeout", serde_json::json!(999999))
        .option("custom", serde_json::json!("kept"))
        .build();
    let result = with_timeout(orch.execute_task(req)).await;
    assert!(result.success, "unexpected failure: {result:?}");

    let written = std::fs::read_to_string(&capture).unwrap();
    assert_eq!(written.matches("\"cwd\"").count(), 1, "{written}");
    assert_eq!(written.matches("\"permission_mode\"").count(), 1, "{written}");
    assert_eq!(written.matches("\"timeout\"").count(), 1, "{written}");

    let v: serde_json::Value = serde_json::from_str(written.trim()).unwrap();
    let cwd = v["options"]["cwd"].as_str().unwrap();
    assert_ne!(cwd, "/etc");
    assert_eq!(v["options"]["permission_mode"], "plan");
    assert_eq!(v["options"]["timeout"], 4);
    assert_eq!(v["options"]["custom"], "kept");
}

#[tokio::test]
async fn closed_stdin_fails_prompt_delivery() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let script = write_agent_script(dir.path(), "exec 0<&-\nsleep 5\n");
    let orch = TaskOrchestrator::new(WorkerConfigBuilder::new(script).build(), EventSink::disabled());

    // Larger than a pipe buffer, so the write blocks until the agent closes
    // its end and then fails instead of landing in the buffer.
    let prompt = "x".repeat(1024 * 1024);
    let req = RequestBuilder::new("t-nostdin", dir.path()).prompt(&prompt).build();
    let result = with_timeout(orch.execute_task(req)).await;

    assert!(!result.success);
    assert_eq!(result.state, TaskState::Failed);
    let failure = result.failure.expect("communication failure details");
    assert_eq!(failure.code, ErrorCode::ProcessCommunicationFailed);
    assert!(failure.recoverable);
    assert!(orch.supervisor().tracked_pids().is_empty());
}
