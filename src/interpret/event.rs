// src/interpret/event.rs

//! Wire model of one line of agent stdout and its parsed/normalized forms.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{LegacyStatus, Outcome};

/// One JSON object emitted by the agent wrapper on stdout.
///
/// Only `event` is required. Keys this struct does not name are kept in
/// `extra` instead of being rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub event: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_output: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,

    #[serde(default, alias = "returnCode", skip_serializing_if = "Option::is_none")]
    pub return_code: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout_length: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr_length: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl InboundEvent {
    /// Look up a string field inside `payload`, if the payload is an object.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload
            .as_ref()
            .and_then(|p| p.get(key))
            .and_then(Value::as_str)
    }

    /// `reason`, falling back to `payload.reason`.
    pub fn effective_reason(&self) -> Option<&str> {
        self.reason.as_deref().or_else(|| self.payload_str("reason"))
    }

    /// `outcome` if it names a known value.
    pub fn parsed_outcome(&self) -> Option<Outcome> {
        self.outcome.as_deref().and_then(|s| s.parse().ok())
    }

    /// `timestamp` if it is an RFC 3339 string or epoch milliseconds.
    pub fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        match self.timestamp.as_ref()? {
            Value::String(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            Value::Number(n) => n.as_i64().and_then(DateTime::<Utc>::from_timestamp_millis),
            _ => None,
        }
    }
}

/// Result of interpreting a single stdout line.
///
/// `success` only says whether the line was a well-formed protocol event.
/// Whether the *task* succeeded is answered by
/// [`is_success`](crate::interpret::is_success) /
/// [`is_failure`](crate::interpret::is_failure).
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    pub success: bool,
    pub event: Option<InboundEvent>,
    pub status: Option<LegacyStatus>,
    pub return_code: Option<i64>,
    pub outcome: Option<Outcome>,
    pub error: Option<String>,
    pub correlation_id: String,
    pub raw: String,
}

impl ParsedResponse {
    pub(crate) fn failure(raw: &str, correlation_id: &str, error: String) -> Self {
        Self {
            success: false,
            event: None,
            status: Some(LegacyStatus::Error),
            return_code: None,
            outcome: None,
            error: Some(error),
            correlation_id: correlation_id.to_string(),
            raw: raw.to_string(),
        }
    }

    pub fn event_name(&self) -> Option<&str> {
        self.event.as_ref().map(|e| e.event.as_str())
    }

    pub fn run_id(&self) -> Option<&str> {
        self.event.as_ref().and_then(|e| e.run_id.as_deref())
    }

    /// Whether this line ends the task (any status other than running/idle).
    pub fn is_terminal(&self) -> bool {
        self.success && self.status.is_some_and(LegacyStatus::is_terminal)
    }

    /// Canonical view for external consumers. `None` for unparseable lines.
    pub fn normalize(&self) -> Option<NormalizedEvent> {
        let ev = self.event.as_ref()?;
        Some(NormalizedEvent {
            event: ev.event.clone(),
            run_id: ev.run_id.clone(),
            timestamp: ev.parsed_timestamp().unwrap_or_else(Utc::now),
            outcome: self.outcome,
            reason: ev.effective_reason().map(str::to_string),
            tags: ev.tags.clone().unwrap_or_default(),
            message: ev.message.clone(),
            status: self.status,
            return_code: self.return_code,
        })
    }
}

/// Canonical representation of one interpreted line.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedEvent {
    pub event: String,
    pub run_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub outcome: Option<Outcome>,
    pub reason: Option<String>,
    pub tags: Vec<String>,
    pub message: Option<String>,
    pub status: Option<LegacyStatus>,
    pub return_code: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_keys_are_preserved() {
        let ev: InboundEvent =
            serde_json::from_str(r#"{"event":"x","custom":{"a":1},"other":true}"#).unwrap();
        assert_eq!(ev.extra.get("other"), Some(&Value::Bool(true)));
        assert!(ev.extra.contains_key("custom"));
    }

    #[test]
    fn camel_case_return_code_accepted() {
        let ev: InboundEvent = serde_json::from_str(r#"{"event":"x","returnCode":3}"#).unwrap();
        assert_eq!(ev.return_code, Some(3));
    }

    #[test]
    fn timestamp_forms() {
        let ev: InboundEvent =
            serde_json::from_str(r#"{"event":"x","timestamp":"2024-01-02T03:04:05Z"}"#).unwrap();
        assert_eq!(
            ev.parsed_timestamp().map(|t| t.to_rfc3339()),
            Some("2024-01-02T03:04:05+00:00".to_string())
        );

        let ev: InboundEvent =
            serde_json::from_str(r#"{"event":"x","timestamp":1700000000000}"#).unwrap();
        assert!(ev.parsed_timestamp().is_some());
    }

    #[test]
    fn reason_falls_back_to_payload() {
        let ev: InboundEvent =
            serde_json::from_str(r#"{"event":"x","payload":{"reason":"timeout"}}"#).unwrap();
        assert_eq!(ev.effective_reason(), Some("timeout"));
    }
}
