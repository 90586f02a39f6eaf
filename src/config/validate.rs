use crate::config::model::{RawWorkerConfig, WorkerConfig};
use crate::errors::{Result, WorkerError};

impl TryFrom<RawWorkerConfig> for WorkerConfig {
    type Error = crate::errors::WorkerError;

    fn try_from(raw: RawWorkerConfig) -> std::result::Result<Self, Self::Error> {
        validate_config(&raw)?;
        Ok(WorkerConfig::new_unchecked(raw.worker, raw.process, raw.retention))
    }
}

/// Check the semantic invariants that serde defaults cannot express.
pub fn validate_config(cfg: &RawWorkerConfig) -> Result<()> {
    validate_worker_section(cfg)?;
    validate_process_section(cfg)?;
    validate_retention_section(cfg)?;
    Ok(())
}

fn validate_worker_section(cfg: &RawWorkerConfig) -> Result<()> {
    let w = &cfg.worker;

    if w.max_concurrent_tasks == 0 {
        return Err(WorkerError::ConfigError(
            "[worker].max_concurrent_tasks must be >= 1 (got 0)".to_string(),
        ));
    }

    let non_zero = [
        ("default_timeout_ms", w.default_timeout_ms),
        ("max_timeout_ms", w.max_timeout_ms),
        ("inactivity_timeout_ms", w.inactivity_timeout_ms),
        ("health_check_interval_ms", w.health_check_interval_ms),
        ("maintenance_interval_ms", w.maintenance_interval_ms),
    ];
    for (name, value) in non_zero {
        if value == 0 {
            return Err(WorkerError::ConfigError(format!(
                "[worker].{name} must be >= 1 (got 0)"
            )));
        }
    }

    if w.default_timeout_ms > w.max_timeout_ms {
        return Err(WorkerError::ConfigError(format!(
            "[worker].default_timeout_ms ({}) exceeds max_timeout_ms ({})",
            w.default_timeout_ms, w.max_timeout_ms
        )));
    }

    Ok(())
}

fn validate_process_section(cfg: &RawWorkerConfig) -> Result<()> {
    let p = &cfg.process;

    if p.executable.trim().is_empty() {
        return Err(WorkerError::ConfigError(
            "[process].executable must not be empty".to_string(),
        ));
    }

    if p.script.as_os_str().is_empty() {
        return Err(WorkerError::ConfigError(
            "[process].script must not be empty".to_string(),
        ));
    }

    if p.logs_dir.as_os_str().is_empty() {
        return Err(WorkerError::ConfigError(
            "[process].logs_dir must not be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_retention_section(cfg: &RawWorkerConfig) -> Result<()> {
    if cfg.retention.max_results == 0 {
        return Err(WorkerError::ConfigError(
            "[retention].max_results must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.retention.ttl_secs == 0 {
        return Err(WorkerError::ConfigError(
            "[retention].ttl_secs must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(WorkerConfig::try_from(RawWorkerConfig::default()).is_ok());
    }

    #[test]
    fn zero_ceiling_rejected() {
        let mut raw = RawWorkerConfig::default();
        raw.worker.max_concurrent_tasks = 0;
        let err = WorkerConfig::try_from(raw).unwrap_err();
        assert!(err.to_string().contains("max_concurrent_tasks"));
    }

    #[test]
    fn inverted_timeouts_rejected() {
        let mut raw = RawWorkerConfig::default();
        raw.worker.default_timeout_ms = 10_000;
        raw.worker.max_timeout_ms = 5_000;
        assert!(WorkerConfig::try_from(raw).is_err());
    }

    #[test]
    fn empty_executable_rejected() {
        let mut raw = RawWorkerConfig::default();
        raw.process.executable = "  ".to_string();
        assert!(matches!(
            WorkerConfig::try_from(raw),
            Err(WorkerError::ConfigError(_))
        ));
    }

    #[test]
    fn zero_retention_rejected() {
        let mut raw = RawWorkerConfig::default();
        raw.retention.max_results = 0;
        assert!(WorkerConfig::try_from(raw).is_err());
    }
}
