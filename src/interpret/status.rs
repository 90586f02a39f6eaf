// src/interpret/status.rs

//! Status derivation from the several, sometimes conflicting, signals an
//! event can carry.
//!
//! Strategies are tried in order and the first `Some` wins:
//!
//! 1. `outcome`
//! 2. event name table (with the `run_failed` + `reason: timeout` override)
//! 3. `state`
//! 4. `status` / `payload.status`
//! 5. `reason == "timeout"`

use serde_json::Value;

use crate::interpret::event::{InboundEvent, ParsedResponse};
use crate::types::{LegacyStatus, Outcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DerivedStatus {
    pub status: LegacyStatus,
    pub return_code: Option<i64>,
}

impl DerivedStatus {
    fn new(status: LegacyStatus) -> Self {
        Self {
            status,
            return_code: default_return_code(status),
        }
    }
}

type Strategy = fn(&InboundEvent) -> Option<DerivedStatus>;

const STRATEGIES: &[(&str, Strategy)] = &[
    ("outcome", from_outcome),
    ("event", from_event_name),
    ("state", from_state),
    ("status", from_status_field),
    ("reason", from_timeout_reason),
];

/// Run the strategy chain. `None` means the event is informational.
pub fn derive_status(ev: &InboundEvent) -> Option<DerivedStatus> {
    STRATEGIES.iter().find_map(|(_, strategy)| strategy(ev))
}

/// Name of the strategy that decided the status, for diagnostics.
pub fn deciding_strategy(ev: &InboundEvent) -> Option<&'static str> {
    STRATEGIES
        .iter()
        .find(|(_, strategy)| strategy(ev).is_some())
        .map(|(name, _)| *name)
}

fn default_return_code(status: LegacyStatus) -> Option<i64> {
    match status {
        LegacyStatus::Completed => Some(0),
        LegacyStatus::Failed | LegacyStatus::Timeout | LegacyStatus::Terminated => Some(1),
        _ => None,
    }
}

fn from_outcome(ev: &InboundEvent) -> Option<DerivedStatus> {
    ev.parsed_outcome()
        .map(|o| DerivedStatus::new(LegacyStatus::from(o)))
}

fn from_event_name(ev: &InboundEvent) -> Option<DerivedStatus> {
    let status = match ev.event.as_str() {
        "run_completed" => LegacyStatus::Completed,
        "run_failed" | "run_cancelled" => LegacyStatus::Failed,
        "error" => LegacyStatus::Error,
        "run_timeout" => LegacyStatus::Timeout,
        "shutdown" => LegacyStatus::Shutdown,
        _ => return None,
    };

    if status == LegacyStatus::Failed && ev.effective_reason() == Some("timeout") {
        return Some(DerivedStatus::new(LegacyStatus::Timeout));
    }
    Some(DerivedStatus::new(status))
}

fn from_state(ev: &InboundEvent) -> Option<DerivedStatus> {
    let state = ev.state.as_deref()?;
    let status = match state {
        "idle" => LegacyStatus::Idle,
        "completed" => LegacyStatus::Completed,
        "failed" => LegacyStatus::Failed,
        "timeout" => LegacyStatus::Timeout,
        "shutdown" => LegacyStatus::Shutdown,
        _ => LegacyStatus::Running,
    };
    Some(DerivedStatus::new(status))
}

fn from_status_field(ev: &InboundEvent) -> Option<DerivedStatus> {
    let raw = ev
        .status
        .as_deref()
        .or_else(|| ev.payload_str("status"))?;
    raw.parse::<LegacyStatus>().ok().map(DerivedStatus::new)
}

fn from_timeout_reason(ev: &InboundEvent) -> Option<DerivedStatus> {
    (ev.effective_reason() == Some("timeout")).then(|| DerivedStatus::new(LegacyStatus::Timeout))
}

/// A parsed line that reports a successful end of the run.
pub fn is_success(resp: &ParsedResponse) -> bool {
    if !resp.success {
        return false;
    }
    let finished_ok = matches!(
        resp.status,
        Some(LegacyStatus::Completed | LegacyStatus::Shutdown)
    ) || matches!(resp.outcome, Some(Outcome::Completed | Outcome::Shutdown));

    finished_ok && resp.return_code.is_none_or(|rc| rc == 0)
}

/// A parsed line that reports a failed run, or a line that could not be
/// parsed at all.
///
/// Informational events (running, idle, no status) are neither a success nor
/// a failure.
pub fn is_failure(resp: &ParsedResponse) -> bool {
    if !resp.success {
        return true;
    }
    if resp.status.is_some_and(LegacyStatus::is_failure) {
        return true;
    }
    if matches!(
        resp.outcome,
        Some(Outcome::Failed | Outcome::Timeout | Outcome::Terminated)
    ) {
        return true;
    }
    resp.return_code.is_some_and(|rc| rc != 0)
}

/// Best human-readable error text carried by a response.
pub fn extract_error_message(resp: &ParsedResponse) -> Option<String> {
    let Some(ev) = resp.event.as_ref() else {
        return resp.error.clone();
    };

    let top_level = [
        ev.error.as_ref().and_then(error_value_text),
        ev.error_output.clone(),
        ev.message.clone(),
        ev.reason.clone(),
    ];
    if let Some(msg) = top_level.into_iter().flatten().find(|s| !s.trim().is_empty()) {
        return Some(msg);
    }

    let payload = ev.payload.as_ref()?;
    for key in ["error", "message", "description"] {
        if let Some(msg) = payload.get(key).and_then(error_value_text) {
            if !msg.trim().is_empty() {
                return Some(msg);
            }
        }
    }

    let content = payload.get("content")?.as_array()?;
    let text: String = content
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.as_str()),
            other => other.get("text").and_then(Value::as_str),
        })
        .collect();
    (!text.trim().is_empty()).then_some(text)
}

fn error_value_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => obj
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpret::parse_line;

    fn ev(json: &str) -> InboundEvent {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn outcome_beats_status() {
        let d = derive_status(&ev(r#"{"event":"x","outcome":"completed","status":"failed"}"#))
            .unwrap();
        assert_eq!(d.status, LegacyStatus::Completed);
        assert_eq!(d.return_code, Some(0));
    }

    #[test]
    fn run_failed_with_timeout_reason_is_timeout() {
        let d = derive_status(&ev(r#"{"event":"run_failed","reason":"timeout"}"#)).unwrap();
        assert_eq!(d.status, LegacyStatus::Timeout);

        let d = derive_status(&ev(r#"{"event":"run_failed","payload":{"reason":"timeout"}}"#))
            .unwrap();
        assert_eq!(d.status, LegacyStatus::Timeout);
    }

    #[test]
    fn event_table() {
        let cases = [
            ("run_completed", LegacyStatus::Completed, Some(0)),
            ("run_failed", LegacyStatus::Failed, Some(1)),
            ("run_cancelled", LegacyStatus::Failed, Some(1)),
            ("error", LegacyStatus::Error, None),
            ("run_timeout", LegacyStatus::Timeout, Some(1)),
            ("shutdown", LegacyStatus::Shutdown, None),
        ];
        for (name, status, rc) in cases {
            let d = derive_status(&ev(&format!(r#"{{"event":"{name}"}}"#))).unwrap();
            assert_eq!(d.status, status, "event {name}");
            assert_eq!(d.return_code, rc, "event {name}");
        }
    }

    #[test]
    fn unknown_state_defaults_to_running() {
        let d = derive_status(&ev(r#"{"event":"progress","state":"thinking"}"#)).unwrap();
        assert_eq!(d.status, LegacyStatus::Running);
        assert_eq!(deciding_strategy(&ev(r#"{"event":"progress","state":"idle"}"#)), Some("state"));
    }

    #[test]
    fn nested_payload_status_and_invalid_values() {
        let d = derive_status(&ev(r#"{"event":"x","payload":{"status":"completed"}}"#)).unwrap();
        assert_eq!(d.status, LegacyStatus::Completed);

        assert_eq!(derive_status(&ev(r#"{"event":"x","status":"bogus"}"#)), None);
        assert_eq!(derive_status(&ev(r#"{"event":"log"}"#)), None);
    }

    #[test]
    fn timeout_reason_fallback() {
        let d = derive_status(&ev(r#"{"event":"x","reason":"timeout"}"#)).unwrap();
        assert_eq!(d.status, LegacyStatus::Timeout);
    }

    #[test]
    fn success_and_failure_checks() {
        let ok = parse_line(r#"{"event":"run_completed","outcome":"completed"}"#, "c");
        assert!(is_success(&ok));
        assert!(!is_failure(&ok));

        let nonzero = parse_line(r#"{"event":"run_completed","return_code":2}"#, "c");
        assert!(!is_success(&nonzero));
        assert!(is_failure(&nonzero));

        let shutdown = parse_line(r#"{"event":"shutdown"}"#, "c");
        assert!(is_success(&shutdown));

        let info = parse_line(r#"{"event":"progress","state":"working"}"#, "c");
        assert!(!is_success(&info));
        assert!(!is_failure(&info));

        let garbage = parse_line("not json", "c");
        assert!(is_failure(&garbage));
    }

    #[test]
    fn error_message_search_order() {
        let r = parse_line(r#"{"event":"error","error":"boom","message":"later"}"#, "c");
        assert_eq!(extract_error_message(&r).as_deref(), Some("boom"));

        let r = parse_line(r#"{"event":"error","error":{"message":"nested"}}"#, "c");
        assert_eq!(extract_error_message(&r).as_deref(), Some("nested"));

        let r = parse_line(r#"{"event":"error","payload":{"description":"desc"}}"#, "c");
        assert_eq!(extract_error_message(&r).as_deref(), Some("desc"));

        let r = parse_line(
            r#"{"event":"error","payload":{"content":[{"type":"text","text":"a"},"b",{"x":1}]}}"#,
            "c",
        );
        assert_eq!(extract_error_message(&r).as_deref(), Some("ab"));

        let r = parse_line(r#"{"event":"error"}"#, "c");
        assert_eq!(extract_error_message(&r), None);
    }
}
