// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{RawWorkerConfig, WorkerConfig};
use crate::errors::Result;

/// Load a configuration file from a given path and return the raw
/// `RawWorkerConfig`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawWorkerConfig> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawWorkerConfig = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a configuration file from path and validate it.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<WorkerConfig> {
    let raw_config = load_from_path(&path)?;
    let config = WorkerConfig::try_from(raw_config)?;
    Ok(config)
}

/// Like [`load_and_validate`], but a missing file yields the built-in
/// defaults instead of an error.
///
/// Used for the default config path, which users are not required to create.
pub fn load_or_default(path: impl AsRef<Path>) -> Result<WorkerConfig> {
    let path = path.as_ref();
    if !path.exists() {
        debug!(?path, "config file not found; using defaults");
        return Ok(WorkerConfig::default());
    }
    load_and_validate(path)
}

/// Default config path: `Worker.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Worker.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_file_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Worker.toml");
        fs::write(
            &path,
            r#"
[worker]
max_concurrent_tasks = 2

[process]
executable = "/bin/sh"
script = "agent.sh"
unbuffered = false
"#,
        )
        .unwrap();

        let cfg = load_and_validate(&path).unwrap();
        assert_eq!(cfg.worker.max_concurrent_tasks, 2);
        assert_eq!(cfg.process.executable, "/bin/sh");
        assert!(!cfg.process.unbuffered);
        assert_eq!(cfg.retention.max_results, 1_000);
    }

    #[test]
    fn invalid_values_fail_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Worker.toml");
        fs::write(&path, "[worker]\nmax_concurrent_tasks = 0\n").unwrap();
        assert!(load_and_validate(&path).is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.worker.max_concurrent_tasks, 4);
    }
}
