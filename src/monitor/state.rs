// src/monitor/state.rs

//! Pure transition rules for a monitored process. No IO, no timers.

use crate::types::TaskState;

/// What to do with a requested explicit transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionCheck {
    Apply,
    /// Already in the requested state.
    Unchanged,
    /// The current state is terminal; nothing may follow it.
    RejectedTerminal,
}

pub fn check_transition(from: TaskState, to: TaskState) -> TransitionCheck {
    if from.is_terminal() {
        TransitionCheck::RejectedTerminal
    } else if from == to {
        TransitionCheck::Unchanged
    } else {
        TransitionCheck::Apply
    }
}

/// State to move to when activity is observed, if any.
pub fn on_activity(current: TaskState) -> Option<TaskState> {
    match current {
        TaskState::Running | TaskState::Idle => Some(TaskState::Active),
        _ => None,
    }
}

/// State to move to when the inactivity timer fires, if any.
pub fn on_inactivity(current: TaskState) -> Option<TaskState> {
    (current == TaskState::Active).then_some(TaskState::Idle)
}
