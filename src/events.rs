// src/events.rs

//! Lifecycle notifications published by the execution core.
//!
//! Components receive an [`EventSink`] explicitly instead of reaching for a
//! process-wide emitter. Emission is fire-and-forget: a missing or closed
//! receiver never affects how a task resolves.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::trace;

use crate::interpret::errors::ClientError;
use crate::interpret::NormalizedEvent;
use crate::types::TaskState;

/// Events emitted onto the sink.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerEvent {
    /// `process.stateTransition`
    #[serde(rename_all = "camelCase")]
    StateTransition {
        pid: u32,
        task_id: String,
        from: TaskState,
        to: TaskState,
        reason: String,
        at: DateTime<Utc>,
    },

    /// `fileSystem.activity`
    #[serde(rename_all = "camelCase")]
    FileSystemActivity {
        pid: u32,
        task_id: String,
        path: PathBuf,
        at: DateTime<Utc>,
    },

    /// One interpreted line of agent stdout.
    #[serde(rename_all = "camelCase")]
    StreamEvent {
        task_id: String,
        correlation_id: String,
        event: NormalizedEvent,
    },

    ClientError(ClientError),

    #[serde(rename_all = "camelCase")]
    TaskStarted {
        task_id: String,
        correlation_id: String,
        pid: u32,
    },

    #[serde(rename_all = "camelCase")]
    TaskFinished {
        task_id: String,
        correlation_id: String,
        success: bool,
        state: TaskState,
    },
}

impl WorkerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            WorkerEvent::StateTransition { .. } => "process.stateTransition",
            WorkerEvent::FileSystemActivity { .. } => "fileSystem.activity",
            WorkerEvent::StreamEvent { .. } => "stream.event",
            WorkerEvent::ClientError(_) => "client.error",
            WorkerEvent::TaskStarted { .. } => "task.started",
            WorkerEvent::TaskFinished { .. } => "task.finished",
        }
    }
}

/// Cloneable handle used to publish [`WorkerEvent`]s.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<WorkerEvent>>,
}

impl EventSink {
    /// Create a sink together with the receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<WorkerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that drops everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: WorkerEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        let name = event.name();
        if tx.send(event).is_err() {
            trace!(event = name, "event receiver dropped; discarding");
        }
    }
}
