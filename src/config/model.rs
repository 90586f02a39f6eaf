// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// [worker]
/// max_concurrent_tasks = 4
/// inactivity_timeout_ms = 300000
///
/// [process]
/// executable = "python3"
/// script = "agent_wrapper.py"
///
/// [retention]
/// max_results = 1000
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawWorkerConfig {
    #[serde(default)]
    pub worker: WorkerSection,

    #[serde(default)]
    pub process: ProcessSection,

    #[serde(default)]
    pub retention: RetentionSection,
}

/// `[worker]` section: limits and timers of the execution core.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSection {
    /// Concurrency ceiling. Requests beyond it are rejected, not queued.
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,

    /// Timeout applied when a request does not carry `timeoutMs`.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Upper bound accepted for a request's `timeoutMs`.
    #[serde(default = "default_max_timeout_ms")]
    pub max_timeout_ms: u64,

    /// Time without activity after which an ACTIVE process is marked IDLE.
    #[serde(default = "default_inactivity_timeout_ms")]
    pub inactivity_timeout_ms: u64,

    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,

    /// Delay between reaching a terminal state and tearing down monitoring.
    #[serde(default = "default_terminal_teardown_delay_ms")]
    pub terminal_teardown_delay_ms: u64,

    /// Window in which filesystem events collapse into one activity update.
    #[serde(default = "default_fs_debounce_ms")]
    pub fs_debounce_ms: u64,

    /// Interval of the orphan reaping / result eviction loop.
    #[serde(default = "default_maintenance_interval_ms")]
    pub maintenance_interval_ms: u64,
}

fn default_max_concurrent_tasks() -> usize {
    4
}

fn default_timeout_ms() -> u64 {
    30 * 60 * 1000
}

fn default_max_timeout_ms() -> u64 {
    2 * 60 * 60 * 1000
}

fn default_inactivity_timeout_ms() -> u64 {
    5 * 60 * 1000
}

fn default_health_check_interval_ms() -> u64 {
    5_000
}

fn default_terminal_teardown_delay_ms() -> u64 {
    1_000
}

fn default_fs_debounce_ms() -> u64 {
    250
}

fn default_maintenance_interval_ms() -> u64 {
    30_000
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            default_timeout_ms: default_timeout_ms(),
            max_timeout_ms: default_max_timeout_ms(),
            inactivity_timeout_ms: default_inactivity_timeout_ms(),
            health_check_interval_ms: default_health_check_interval_ms(),
            terminal_teardown_delay_ms: default_terminal_teardown_delay_ms(),
            fs_debounce_ms: default_fs_debounce_ms(),
            maintenance_interval_ms: default_maintenance_interval_ms(),
        }
    }
}

/// `[process]` section: how the agent wrapper is launched and stopped.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessSection {
    /// Interpreter or binary to execute (e.g. `python3`).
    #[serde(default = "default_executable")]
    pub executable: String,

    /// Script handed to the executable as its first positional argument.
    #[serde(default = "default_script")]
    pub script: PathBuf,

    /// Pass `-u` so the wrapper does not buffer its stdout.
    #[serde(default = "default_unbuffered")]
    pub unbuffered: bool,

    /// Grace period between the cooperative and the forceful signal.
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,

    /// How long to keep reading stdout after the process has exited.
    #[serde(default = "default_exit_drain_ms")]
    pub exit_drain_ms: u64,

    /// Root under which per-task session log directories are created.
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,
}

fn default_executable() -> String {
    "python3".to_string()
}

fn default_script() -> PathBuf {
    PathBuf::from("agent_wrapper.py")
}

fn default_unbuffered() -> bool {
    true
}

fn default_grace_period_ms() -> u64 {
    5_000
}

fn default_exit_drain_ms() -> u64 {
    500
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from(".taskworker/sessions")
}

impl Default for ProcessSection {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            script: default_script(),
            unbuffered: default_unbuffered(),
            grace_period_ms: default_grace_period_ms(),
            exit_drain_ms: default_exit_drain_ms(),
            logs_dir: default_logs_dir(),
        }
    }
}

/// `[retention]` section: bounds on the finished-results store.
#[derive(Debug, Clone, Deserialize)]
pub struct RetentionSection {
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_max_results() -> usize {
    1_000
}

fn default_ttl_secs() -> u64 {
    60 * 60
}

impl Default for RetentionSection {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            ttl_secs: default_ttl_secs(),
        }
    }
}

/// Validated configuration.
///
/// Only constructible through `TryFrom<RawWorkerConfig>` (see
/// [`crate::config::validate`]) or [`WorkerConfig::default`].
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker: WorkerSection,
    pub process: ProcessSection,
    pub retention: RetentionSection,
}

impl WorkerConfig {
    pub(crate) fn new_unchecked(
        worker: WorkerSection,
        process: ProcessSection,
        retention: RetentionSection,
    ) -> Self {
        Self {
            worker,
            process,
            retention,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.worker.default_timeout_ms)
    }

    pub fn max_timeout(&self) -> Duration {
        Duration::from_millis(self.worker.max_timeout_ms)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_millis(self.worker.inactivity_timeout_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.worker.health_check_interval_ms)
    }

    pub fn terminal_teardown_delay(&self) -> Duration {
        Duration::from_millis(self.worker.terminal_teardown_delay_ms)
    }

    pub fn fs_debounce(&self) -> Duration {
        Duration::from_millis(self.worker.fs_debounce_ms)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.worker.maintenance_interval_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.process.grace_period_ms)
    }

    pub fn exit_drain(&self) -> Duration {
        Duration::from_millis(self.process.exit_drain_ms)
    }

    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.retention.ttl_secs)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::new_unchecked(
            WorkerSection::default(),
            ProcessSection::default(),
            RetentionSection::default(),
        )
    }
}
