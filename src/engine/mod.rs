// src/engine/mod.rs

//! Task orchestration for taskworker.
//!
//! This module ties together:
//! - admission (validation, concurrency ceiling, duplicate ids)
//! - the agent process and its activity monitor
//! - the stdout stream, interpreted line by line
//! - resolution of each task exactly once, and result retention
//!
//! Pure pieces live in [`stream`] and [`results`]; the async/IO shell is
//! [`orchestrator`].

pub mod orchestrator;
pub mod results;
pub mod stream;
pub mod types;

pub use orchestrator::{SESSION_LOGS_ENV, TaskOrchestrator, WorkerHealth};
pub use results::ResultStore;
pub use stream::{LineAction, LineBuffer, StreamState};
pub use types::{
    ActiveTaskStatus, CancelReason, ExecutionOptions, TaskExecutionContext, TaskExecutionRequest,
    TaskExecutionResult, TaskStatus,
};
