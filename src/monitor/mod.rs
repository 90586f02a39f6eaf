// src/monitor/mod.rs

//! Activity monitoring for running agent processes.
//!
//! - `state.rs`: pure transition rules.
//! - `activity.rs`: per-PID state, inactivity and teardown timers.
//! - `watcher.rs`: refcounted, debounced filesystem watching.
//! - `health.rs`: periodic liveness checks.

pub mod activity;
pub mod health;
pub mod state;
pub mod watcher;

pub use activity::{ActivityMonitor, MonitorSettings, MonitorSnapshot};
pub use health::{spawn_health_loop, LivenessProbe};
pub use watcher::FsWatcher;
