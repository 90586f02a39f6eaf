// src/monitor/health.rs

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::monitor::activity::ActivityMonitor;
use crate::process::ProcessSupervisor;

/// Answers "is something alive at this PID?" for the health loop.
///
/// The production implementation is [`ProcessSupervisor`]; tests can plug in
/// their own.
pub trait LivenessProbe: Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;
}

impl LivenessProbe for ProcessSupervisor {
    fn is_alive(&self, pid: u32) -> bool {
        ProcessSupervisor::is_alive(self, pid)
    }
}

/// Probe every monitored PID on a fixed interval.
///
/// Ticks that would overlap a slow check are skipped rather than queued.
pub fn spawn_health_loop(
    monitor: ActivityMonitor,
    probe: Arc<dyn LivenessProbe>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_ms = interval.as_millis() as u64, "health check loop started");

        loop {
            ticker.tick().await;
            let dead = monitor.run_health_check(probe.as_ref());
            if !dead.is_empty() {
                debug!(?dead, "health check found dead processes");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    use crate::events::EventSink;
    use crate::monitor::activity::MonitorSettings;
    use crate::types::TaskState;

    #[derive(Default)]
    struct Toggle {
        dead: Mutex<HashSet<u32>>,
    }

    impl LivenessProbe for Toggle {
        fn is_alive(&self, pid: u32) -> bool {
            !self.dead.lock().unwrap().contains(&pid)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn loop_marks_dead_pid_failed() {
        let settings = MonitorSettings {
            inactivity_timeout: Duration::from_secs(60),
            teardown_delay: Duration::from_secs(60),
            health_check_interval: Duration::from_millis(100),
            fs_debounce: Duration::from_millis(10),
        };
        let monitor = ActivityMonitor::new(settings, EventSink::disabled());
        monitor.start_monitoring("t1", 21, None);
        monitor.start_monitoring("t2", 22, None);

        let probe = Arc::new(Toggle::default());
        let handle = spawn_health_loop(monitor.clone(), probe.clone(), settings.health_check_interval);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(monitor.get_state(21), Some(TaskState::Running));

        probe.dead.lock().unwrap().insert(21);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(monitor.get_state(21), Some(TaskState::Failed));
        assert_eq!(monitor.get_state(22), Some(TaskState::Running));

        handle.abort();
    }
}
