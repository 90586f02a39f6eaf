// src/engine/stream.rs

//! Pure stdout handling: splitting chunks into lines and the resolve-once
//! guard. No IO happens here.

use tracing::warn;

use crate::interpret::{NormalizedEvent, ParsedResponse};

/// Longest stdout line kept, in bytes. Longer lines are dropped whole.
pub const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Accumulates raw stdout chunks and yields complete lines.
#[derive(Debug)]
pub struct LineBuffer {
    pending: Vec<u8>,
    /// Prefix of `pending` already known to hold no newline.
    scanned: usize,
    max_line: usize,
    /// Skipping the rest of an oversized line.
    discarding: bool,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            pending: Vec::new(),
            scanned: 0,
            max_line,
            discarding: false,
        }
    }

    /// Append a chunk and return every line it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        let mut start = 0;
        let mut from = self.scanned;

        while let Some(offset) = self.pending[from..].iter().position(|b| *b == b'\n') {
            let end = from + offset;
            let len = end - start;
            if std::mem::take(&mut self.discarding) {
                // Tail of a line already reported as oversized.
            } else if len > self.max_line {
                warn!(bytes = len, limit = self.max_line, "dropping oversized stdout line");
            } else {
                lines.push(decode(&self.pending[start..end]));
            }
            start = end + 1;
            from = start;
        }

        self.pending.drain(..start);
        self.scanned = self.pending.len();

        if self.discarding || self.pending.len() > self.max_line {
            if !self.discarding {
                warn!(
                    bytes = self.pending.len(),
                    limit = self.max_line,
                    "dropping oversized stdout line"
                );
            }
            self.pending.clear();
            self.scanned = 0;
            self.discarding = true;
        }
        lines
    }

    /// Whatever is left once the stream has closed.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        self.scanned = 0;
        if std::mem::take(&mut self.discarding) || rest.is_empty() {
            return None;
        }
        Some(decode(&rest))
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

fn decode(line: &[u8]) -> String {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

/// What to do with one interpreted line.
#[derive(Debug, Clone, PartialEq)]
pub enum LineAction {
    /// Not a protocol event; log and move on.
    Malformed(String),
    /// Valid, non-terminal event.
    Informational(NormalizedEvent),
    /// First terminal event: resolve the task with it.
    Resolve(Box<ParsedResponse>),
    /// Arrived after the task was already resolved.
    Ignored,
}

/// Per-task resolve-once guard, whatever triggers the resolution.
#[derive(Debug, Default)]
pub struct StreamState {
    resolved: bool,
}

impl StreamState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offer(&mut self, resp: ParsedResponse) -> LineAction {
        if self.resolved {
            return LineAction::Ignored;
        }
        if !resp.success {
            return LineAction::Malformed(
                resp.error.unwrap_or_else(|| "unparseable line".to_string()),
            );
        }

        if resp.is_terminal() {
            self.resolved = true;
            return LineAction::Resolve(Box::new(resp));
        }

        match resp.normalize() {
            Some(ev) => LineAction::Informational(ev),
            None => LineAction::Malformed("event missing".to_string()),
        }
    }

    /// Claim resolution for a non-line signal (exit, timeout, cancel).
    /// Returns false if the task was already resolved.
    pub fn try_resolve(&mut self) -> bool {
        !std::mem::replace(&mut self.resolved, true)
    }
}
