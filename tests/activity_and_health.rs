mod common;
use crate::common::builders::{RequestBuilder, WorkerConfigBuilder};
use crate::common::{init_tracing, wait_for_pid, with_timeout, write_agent_script};

use std::sync::Arc;
use std::time::Duration;

use taskworker::engine::{SESSION_LOGS_ENV, TaskOrchestrator, TaskStatus};
use taskworker::events::{EventSink, WorkerEvent};
use taskworker::types::TaskState;

#[tokio::test]
async fn writes_under_session_logs_count_as_activity() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let body = format!(
        "read -r prompt\n\
         sleep 0.4\n\
         echo working > \"${SESSION_LOGS_ENV}/trace.log\"\n\
         sleep 0.4\n\
         printf '%s\\n' '{{\"event\":\"run_completed\"}}'\n"
    );
    let script = write_agent_script(dir.path(), &body);
    let (sink, mut events) = EventSink::channel();
    let orch = TaskOrchestrator::new(WorkerConfigBuilder::new(script).build(), sink);

    let result = with_timeout(orch.execute_task(RequestBuilder::new("fs", dir.path()).session("sess").build())).await;
    assert_eq!(result.state, TaskState::Completed);

    let mut saw_fs = false;
    let mut saw_active = false;
    while let Ok(ev) = events.try_recv() {
        match ev {
            WorkerEvent::FileSystemActivity { task_id, path, .. } => {
                assert_eq!(task_id, "fs");
                assert!(path.ends_with("trace.log") || path.to_string_lossy().contains("sess"));
                saw_fs = true;
            }
            WorkerEvent::StateTransition { to, .. } if to == TaskState::Active => saw_active = true,
            _ => {}
        }
    }
    assert!(saw_fs, "no filesystem activity observed");
    assert!(saw_active, "task never became ACTIVE");

    let logs_root = dir.path().join("logs").join("sess");
    let entries: Vec<_> = std::fs::read_dir(&logs_root).unwrap().collect();
    assert_eq!(entries.len(), 1);
}

#[tokio::test]
async fn status_and_health_reflect_running_task() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let script = write_agent_script(
        dir.path(),
        "read -r prompt\nprintf '%s\\n' '{\"event\":\"run_started\"}'\nexec sleep 30\n",
    );
    let orch = TaskOrchestrator::start(WorkerConfigBuilder::new(script).build(), EventSink::disabled());

    let runner = {
        let orch = orch.clone();
        let req = RequestBuilder::new("watched", dir.path()).build();
        tokio::spawn(async move { orch.execute_task(req).await })
    };
    let pid = with_timeout(wait_for_pid(&orch, "watched")).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    match orch.get_task_status("watched") {
        Some(TaskStatus::Active(active)) => {
            assert_eq!(active.pid, Some(pid));
            assert!(matches!(active.state, TaskState::Running | TaskState::Active));
            assert!(active.logs_path.is_some());
            assert!(active.last_activity.is_some());
        }
        other => panic!("expected active status, got {other:?}"),
    }

    let health = orch.get_health_status();
    assert_eq!(health.active_tasks, 1);
    assert_eq!(health.processes.len(), 1);
    assert!(health.processes[0].alive);
    assert_eq!(health.processes[0].pid, pid);
    assert_eq!(health.monitored.len(), 1);

    assert!(orch.supervisor().is_alive(pid));
    assert!(orch.cancel_task("watched").await);
    with_timeout(runner).await.unwrap();
    assert!(!orch.supervisor().is_alive(pid));
    assert_eq!(orch.get_health_status().active_tasks, 0);

    orch.shutdown().await;
}

#[tokio::test]
async fn inactivity_moves_task_to_idle() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let script = write_agent_script(
        dir.path(),
        "read -r prompt\nprintf '%s\\n' '{\"event\":\"progress\"}'\nexec sleep 30\n",
    );
    let cfg = WorkerConfigBuilder::new(script)
        .inactivity_timeout_ms(200)
        .build();
    let orch = Arc::new(TaskOrchestrator::new(cfg, EventSink::disabled()));

    let runner = {
        let orch = orch.clone();
        let req = RequestBuilder::new("idle", dir.path()).build();
        tokio::spawn(async move { orch.execute_task(req).await })
    };
    let pid = with_timeout(wait_for_pid(&orch, "idle")).await;

    with_timeout(async {
        while orch.monitor().get_state(pid) != Some(TaskState::Idle) {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await;

    assert!(orch.cancel_task("idle").await);
    let result = with_timeout(runner).await.unwrap();
    assert_eq!(result.state, TaskState::Cancelled);
}
