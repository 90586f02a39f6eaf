#![allow(dead_code)]

use std::path::{Path, PathBuf};

use taskworker::config::{RawWorkerConfig, WorkerConfig};
use taskworker::engine::TaskExecutionRequest;
use taskworker::types::PermissionMode;

/// Builder for `WorkerConfig` with fast timers suitable for tests.
///
/// Defaults to running scripts with `/bin/sh` and keeping session logs under
/// `logs` relative to the task's working directory.
pub struct WorkerConfigBuilder {
    config: RawWorkerConfig,
}

impl WorkerConfigBuilder {
    pub fn new(script: impl Into<PathBuf>) -> Self {
        let mut config = RawWorkerConfig::default();
        config.process.executable = "/bin/sh".into();
        config.process.script = script.into();
        config.process.unbuffered = false;
        config.process.grace_period_ms = 500;
        config.process.exit_drain_ms = 200;
        config.process.logs_dir = PathBuf::from("logs");
        config.worker.health_check_interval_ms = 100;
        config.worker.terminal_teardown_delay_ms = 50;
        config.worker.fs_debounce_ms = 20;
        Self { config }
    }

    pub fn max_concurrent(mut self, n: usize) -> Self {
        self.config.worker.max_concurrent_tasks = n;
        self
    }

    pub fn default_timeout_ms(mut self, ms: u64) -> Self {
        self.config.worker.default_timeout_ms = ms;
        self
    }

    pub fn inactivity_timeout_ms(mut self, ms: u64) -> Self {
        self.config.worker.inactivity_timeout_ms = ms;
        self
    }

    pub fn logs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.process.logs_dir = dir.into();
        self
    }

    pub fn max_results(mut self, n: usize) -> Self {
        self.config.retention.max_results = n;
        self
    }

    pub fn build(self) -> WorkerConfig {
        WorkerConfig::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

/// Builder for `TaskExecutionRequest`.
pub struct RequestBuilder {
    request: TaskExecutionRequest,
}

impl RequestBuilder {
    pub fn new(id: &str, working_directory: &Path) -> Self {
        let mut request = TaskExecutionRequest::new(id, "do the thing");
        request.working_directory = working_directory.to_path_buf();
        Self { request }
    }

    pub fn prompt(mut self, prompt: &str) -> Self {
        self.request.prompt = prompt.to_string();
        self
    }

    pub fn session(mut self, name: &str) -> Self {
        self.request.session_name = Some(name.to_string());
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.request.timeout_ms = Some(ms);
        self
    }

    pub fn model(mut self, model: &str) -> Self {
        self.request.options.model = Some(model.to_string());
        self
    }

    pub fn permission_mode(mut self, mode: PermissionMode) -> Self {
        self.request.options.permission_mode = mode;
        self
    }

    /// Pass-through option forwarded in the prompt's `options` object.
    pub fn option(mut self, key: &str, value: serde_json::Value) -> Self {
        self.request.options.extra.insert(key.to_string(), value);
        self
    }

    pub fn build(self) -> TaskExecutionRequest {
        self.request
    }
}
