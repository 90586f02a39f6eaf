// src/process/mod.rs

//! Agent process lifecycle: spawn with array-form arguments, graceful then
//! forced termination, liveness probing and orphan reaping.

pub mod signal;
pub mod spawn;
pub mod supervisor;

pub use spawn::{build_args, SpawnConfig};
pub use supervisor::{
    wait_exit, ExitInfo, ExitReceiver, ProcessHandle, ProcessHealth, ProcessMetadata,
    ProcessSupervisor, SpawnedProcess,
};
