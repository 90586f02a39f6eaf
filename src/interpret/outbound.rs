// src/interpret/outbound.rs

//! Messages written to the agent wrapper's stdin.

use std::path::PathBuf;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::Result;
use crate::types::PermissionMode;

/// `{"action":"prompt", ...}` request, one per line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptMessage {
    pub action: &'static str,
    pub prompt: String,
    pub options: PromptOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptOptions {
    pub cwd: PathBuf,
    pub permission_mode: PermissionMode,
    /// Whole seconds.
    pub timeout: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Keys [`PromptOptions`] writes itself. Pass-through options never
/// shadow them.
pub const RESERVED_OPTION_KEYS: &[&str] = &[
    "cwd",
    "permission_mode",
    "timeout",
    "model",
    "max_turns",
    "allowed_tools",
];

/// Split caller-supplied options into the ones safe to forward and the
/// names of those dropped for colliding with a reserved key.
pub fn passthrough_options(extra: &Map<String, Value>) -> (Map<String, Value>, Vec<String>) {
    let mut kept = Map::new();
    let mut dropped = Vec::new();
    for (key, value) in extra {
        if RESERVED_OPTION_KEYS.contains(&key.as_str()) {
            dropped.push(key.clone());
        } else {
            kept.insert(key.clone(), value.clone());
        }
    }
    (kept, dropped)
}

impl PromptMessage {
    pub fn new(prompt: impl Into<String>, options: PromptOptions) -> Self {
        Self {
            action: "prompt",
            prompt: prompt.into(),
            options,
            run_id: None,
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Serialize to a single newline-terminated JSON line.
    pub fn to_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Convert a millisecond timeout into the whole seconds the wire expects,
/// rounding up so short timeouts never become zero.
pub fn timeout_secs(timeout_ms: u64) -> u64 {
    timeout_ms.div_ceil(1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> PromptOptions {
        PromptOptions {
            cwd: PathBuf::from("/work"),
            permission_mode: PermissionMode::BypassPermissions,
            timeout: 5,
            model: None,
            max_turns: None,
            allowed_tools: None,
            extra: Map::new(),
        }
    }

    #[test]
    fn prompt_line_shape() {
        let line = PromptMessage::new("echo hi", options())
            .with_run_id("r1")
            .to_line()
            .unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);

        let v: Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(v["action"], "prompt");
        assert_eq!(v["prompt"], "echo hi");
        assert_eq!(v["options"]["cwd"], "/work");
        assert_eq!(v["options"]["permission_mode"], "bypassPermissions");
        assert_eq!(v["options"]["timeout"], 5);
        assert_eq!(v["run_id"], "r1");
        assert!(v["options"].get("model").is_none());
    }

    #[test]
    fn multiline_prompt_stays_on_one_line() {
        let line = PromptMessage::new("a\nb", options()).to_line().unwrap();
        assert_eq!(line.matches('\n').count(), 1);
    }

    #[test]
    fn reserved_keys_are_not_forwarded() {
        let extra: Map<String, Value> = serde_json::from_str(
            r#"{"cwd":"/etc","permission_mode":"bypassPermissions","timeout":999999,"custom":1}"#,
        )
        .unwrap();
        let (kept, mut dropped) = passthrough_options(&extra);
        dropped.sort();
        assert_eq!(dropped, vec!["cwd", "permission_mode", "timeout"]);

        let mut opts = options();
        opts.extra = kept;
        let line = PromptMessage::new("p", opts).to_line().unwrap();
        assert_eq!(line.matches("\"cwd\"").count(), 1);
        assert_eq!(line.matches("\"timeout\"").count(), 1);
        let v: Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(v["options"]["cwd"], "/work");
        assert_eq!(v["options"]["custom"], 1);
    }

    #[test]
    fn timeout_rounds_up() {
        assert_eq!(timeout_secs(100), 1);
        assert_eq!(timeout_secs(5000), 5);
        assert_eq!(timeout_secs(5001), 6);
    }
}
