// src/process/signal.rs

//! OS-level liveness probe and cooperative termination signal.
//!
//! On unix this uses `nix`; elsewhere both operations report
//! [`SignalOutcome::Unsupported`] / `None` and the supervisor falls back to
//! its own tracking and to killing through the child handle.

/// Result of sending a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    Sent,
    /// ESRCH: nothing holds that PID.
    NotFound,
    /// EPERM: the process exists but belongs to someone else.
    Denied,
    Unsupported,
}

/// False for PIDs that address a process group or init when signalled.
#[cfg_attr(not(unix), allow(dead_code))]
fn is_addressable(pid: u32) -> bool {
    pid > 1 && i32::try_from(pid).is_ok()
}

#[cfg(unix)]
mod imp {
    use nix::errno::Errno;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;
    use tracing::{debug, warn};

    use super::{is_addressable, SignalOutcome};
    use crate::errors::{Result, WorkerError};

    fn to_pid(pid: u32) -> Option<Pid> {
        if !is_addressable(pid) {
            return None;
        }
        i32::try_from(pid).ok().map(Pid::from_raw)
    }

    /// Zero-signal probe. EPERM still means a live process holds the PID.
    pub fn probe(pid: u32) -> Option<bool> {
        let Some(target) = to_pid(pid) else {
            return Some(false);
        };
        match signal::kill(target, None) {
            Ok(()) => Some(true),
            Err(Errno::EPERM) => Some(true),
            Err(_) => Some(false),
        }
    }

    pub fn send_terminate(pid: u32) -> Result<SignalOutcome> {
        let Some(target) = to_pid(pid) else {
            return Err(WorkerError::Validation(format!(
                "refusing to signal PID {pid}"
            )));
        };
        match signal::kill(target, Signal::SIGTERM) {
            Ok(()) => {
                debug!(pid, signal = "SIGTERM", "signal sent");
                Ok(SignalOutcome::Sent)
            }
            Err(Errno::ESRCH) => {
                debug!(pid, "process already gone (ESRCH)");
                Ok(SignalOutcome::NotFound)
            }
            Err(Errno::EPERM) => {
                warn!(pid, "permission denied (EPERM) sending SIGTERM");
                Ok(SignalOutcome::Denied)
            }
            Err(e) => Err(WorkerError::ProcessCommunicationFailed(format!(
                "failed to send SIGTERM to PID {pid}: {e}"
            ))),
        }
    }
}

#[cfg(not(unix))]
mod imp {
    use super::SignalOutcome;
    use crate::errors::Result;

    pub fn probe(_pid: u32) -> Option<bool> {
        None
    }

    pub fn send_terminate(_pid: u32) -> Result<SignalOutcome> {
        Ok(SignalOutcome::Unsupported)
    }
}

pub use imp::{probe, send_terminate};
