use proptest::prelude::*;
use serde_json::json;
use taskworker::interpret::{is_success, parse_line};
use taskworker::types::{LegacyStatus, Outcome};

const OUTCOMES: &[&str] = &["completed", "failed", "timeout", "shutdown", "terminated", "running"];
const EVENTS: &[&str] = &["run_completed", "run_failed", "run_cancelled", "error", "progress", "shutdown"];
const STATES: &[&str] = &["idle", "completed", "failed", "busy"];
const STATUSES: &[&str] = &["completed", "failed", "error", "running"];

fn line_strategy() -> impl Strategy<Value = serde_json::Value> {
    (
        prop::option::of(prop::sample::select(OUTCOMES)),
        prop::sample::select(EVENTS),
        prop::option::of(prop::sample::select(STATES)),
        prop::option::of(prop::sample::select(STATUSES)),
        prop::option::of(Just("timeout")),
    )
        .prop_map(|(outcome, event, state, status, reason)| {
            let mut v = json!({ "event": event });
            if let Some(o) = outcome {
                v["outcome"] = json!(o);
            }
            if let Some(s) = state {
                v["state"] = json!(s);
            }
            if let Some(s) = status {
                v["status"] = json!(s);
            }
            if let Some(r) = reason {
                v["reason"] = json!(r);
            }
            v
        })
}

proptest! {
    // A valid outcome decides the status no matter what else the line says.
    #[test]
    fn outcome_always_wins(v in line_strategy()) {
        let resp = parse_line(&v.to_string(), "c");
        prop_assert!(resp.success);
        if let Some(o) = v.get("outcome").and_then(|o| o.as_str()) {
            let outcome: Outcome = o.parse().unwrap();
            prop_assert_eq!(resp.status, Some(LegacyStatus::from(outcome)));
            prop_assert_eq!(resp.outcome, Some(outcome));
        }
    }

    // Success requires a completed-like status and a zero (or absent) return code.
    #[test]
    fn success_implies_completed_status(v in line_strategy(), rc in prop::option::of(-2i64..3)) {
        let mut v = v;
        if let Some(rc) = rc {
            v["return_code"] = json!(rc);
        }
        let resp = parse_line(&v.to_string(), "c");
        if is_success(&resp) {
            prop_assert!(matches!(
                resp.status,
                Some(LegacyStatus::Completed) | Some(LegacyStatus::Shutdown)
            ));
            prop_assert!(resp.return_code.is_none_or(|rc| rc == 0));
        }
    }
}

#[test]
fn run_failed_with_timeout_reason_is_timeout() {
    let resp = parse_line(r#"{"event":"run_failed","reason":"timeout"}"#, "c");
    assert_eq!(resp.status, Some(LegacyStatus::Timeout));
    assert_eq!(resp.return_code, Some(1));
    assert!(resp.is_terminal());
}
