#![allow(dead_code)]

pub use taskworker_test_utils::builders;
pub use taskworker_test_utils::{echo_agent, init_tracing, with_timeout, write_agent_script};

use std::sync::Arc;
use std::time::Duration;

use taskworker::engine::TaskOrchestrator;

/// Poll until `task_id` is active with a spawned process; returns its PID.
pub async fn wait_for_pid(orch: &Arc<TaskOrchestrator>, task_id: &str) -> u32 {
    loop {
        let pid = orch
            .get_active_tasks()
            .into_iter()
            .find(|t| t.task_id == task_id)
            .and_then(|t| t.pid);
        if let Some(pid) = pid {
            return pid;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
