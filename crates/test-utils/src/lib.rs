pub mod builders;

use std::path::{Path, PathBuf};
use std::sync::Once;
use tracing_subscriber::{fmt, EnvFilter};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer() // print only for failing tests unless --nocapture
            .with_target(true)
            .init();
    });
}

/// Run a future with a 10-second timeout.
#[allow(dead_code)]
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(std::time::Duration::from_secs(10), f)
        .await
        .expect("Test timed out after 10 seconds")
}

/// Write a `/bin/sh` script standing in for the agent wrapper.
///
/// The script is run as `/bin/sh <script> --job-id <id> --session-name <name>`
/// and receives the prompt line on stdin.
pub fn write_agent_script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("agent.sh");
    std::fs::write(&path, body).expect("write agent script");
    path
}

/// Agent that reads the prompt, then prints `lines` to stdout and exits 0.
pub fn echo_agent(dir: &Path, lines: &[&str]) -> PathBuf {
    let mut body = String::from("read -r prompt\n");
    for line in lines {
        body.push_str(&format!("printf '%s\\n' '{}'\n", line.replace('\'', r"'\''")));
    }
    write_agent_script(dir, &body)
}
