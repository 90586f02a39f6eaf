// src/process/spawn.rs

//! Launch parameters for one agent process and their validation.

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use crate::config::WorkerConfig;
use crate::errors::{Result, WorkerError};

/// Printable text only: control characters (including NUL and newlines) are
/// refused, shell metacharacters are not.
const SESSION_NAME_PATTERN: &str = r"^[^\x00-\x1f\x7f]{1,256}$";

static SESSION_NAME_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| match Regex::new(SESSION_NAME_PATTERN) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(error = %e, "invalid session name pattern; using length check only");
            None
        }
    });

fn session_name_ok(name: &str) -> bool {
    match SESSION_NAME_RE.as_ref() {
        Some(re) => re.is_match(name),
        None => !name.is_empty() && name.chars().count() <= 256,
    }
}

#[derive(Debug, Clone)]
pub struct SpawnConfig {
    pub job_id: String,
    pub session_name: String,
    pub working_directory: PathBuf,
    pub executable: String,
    pub script: PathBuf,
    pub unbuffered: bool,
    /// Tracing token carried by the handle. Generated when absent.
    pub correlation_id: Option<String>,
    /// Extra environment for the child, on top of the inherited one.
    pub env: Vec<(String, OsString)>,
}

impl SpawnConfig {
    /// Launch parameters for a task, taking executable and script from the
    /// `[process]` section.
    pub fn from_config(
        cfg: &WorkerConfig,
        job_id: impl Into<String>,
        session_name: impl Into<String>,
        working_directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            session_name: session_name.into(),
            working_directory: working_directory.into(),
            executable: cfg.process.executable.clone(),
            script: cfg.process.script.clone(),
            unbuffered: cfg.process.unbuffered,
            correlation_id: None,
            env: Vec::new(),
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.job_id.trim().is_empty() {
            return Err(WorkerError::Validation("job id must not be empty".into()));
        }
        if self.job_id.contains('\0') {
            return Err(WorkerError::Validation("job id contains a NUL byte".into()));
        }
        if !session_name_ok(&self.session_name) {
            return Err(WorkerError::Validation(format!(
                "session name must be 1-256 printable characters (got {:?})",
                self.session_name
            )));
        }
        if let Some((key, _)) = self
            .env
            .iter()
            .find(|(k, _)| k.is_empty() || k.contains(['=', '\0']))
        {
            return Err(WorkerError::Validation(format!(
                "invalid environment variable name {key:?}"
            )));
        }
        if self.executable.trim().is_empty() {
            return Err(WorkerError::Validation("executable must not be empty".into()));
        }
        if self.script.as_os_str().is_empty() {
            return Err(WorkerError::Validation("script path must not be empty".into()));
        }
        if !self.working_directory.is_dir() {
            return Err(WorkerError::Validation(format!(
                "working directory {} does not exist or is not a directory",
                self.working_directory.display()
            )));
        }
        Ok(())
    }
}

/// Argument vector handed to the executable.
///
/// Every value is its own element; nothing is ever joined into a string for
/// a shell to split.
pub fn build_args(config: &SpawnConfig) -> Vec<OsString> {
    let mut args = Vec::with_capacity(6);
    if config.unbuffered {
        args.push(OsString::from("-u"));
    }
    args.push(config.script.clone().into_os_string());
    args.push(OsString::from("--job-id"));
    args.push(OsString::from(&config.job_id));
    args.push(OsString::from("--session-name"));
    args.push(OsString::from(&config.session_name));
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(dir: &std::path::Path) -> SpawnConfig {
        SpawnConfig {
            job_id: "job-1".into(),
            session_name: "session".into(),
            working_directory: dir.to_path_buf(),
            executable: "python3".into(),
            script: PathBuf::from("agent_wrapper.py"),
            unbuffered: true,
            correlation_id: None,
            env: Vec::new(),
        }
    }

    #[test]
    fn args_layout() {
        let dir = tempfile::tempdir().unwrap();
        let args = build_args(&cfg(dir.path()));
        let args: Vec<_> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            [
                "-u",
                "agent_wrapper.py",
                "--job-id",
                "job-1",
                "--session-name",
                "session"
            ]
        );
    }

    #[test]
    fn metacharacters_pass_validation_and_stay_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = cfg(dir.path());
        c.job_id = "x; rm -rf / && echo $(whoami)".into();
        c.session_name = "`id` | cat > /tmp/p".into();
        c.validate().unwrap();

        let args = build_args(&c);
        assert!(args.contains(&OsString::from(&c.job_id)));
        assert!(args.contains(&OsString::from(&c.session_name)));
    }

    #[test]
    fn rejects_bad_input() {
        let dir = tempfile::tempdir().unwrap();

        let mut c = cfg(dir.path());
        c.job_id = " ".into();
        assert!(matches!(c.validate(), Err(WorkerError::Validation(_))));

        let mut c = cfg(dir.path());
        c.session_name = "line\nbreak".into();
        assert!(c.validate().is_err());

        let mut c = cfg(dir.path());
        c.session_name = String::new();
        assert!(c.validate().is_err());

        let mut c = cfg(dir.path());
        c.working_directory = dir.path().join("missing");
        assert!(c.validate().is_err());
    }
}
