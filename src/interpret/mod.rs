// src/interpret/mod.rs

//! Stateless interpretation of the agent's line-delimited JSON protocol.
//!
//! - `event.rs`: inbound wire model, parsed and normalized forms.
//! - `status.rs`: ordered status derivation and success/failure checks.
//! - `errors.rs`: structured client errors.
//! - `outbound.rs`: prompt messages written to the agent.

pub mod errors;
pub mod event;
pub mod outbound;
pub mod status;

pub use errors::{categorize_error, handle_error, ClientError, ErrorCode, ErrorType};
pub use event::{InboundEvent, NormalizedEvent, ParsedResponse};
pub use outbound::{PromptMessage, PromptOptions};
pub use status::{derive_status, extract_error_message, is_failure, is_success, DerivedStatus};

use tracing::trace;

/// Interpret one line of agent stdout.
///
/// Never fails: empty input, invalid JSON and schema mismatches all come
/// back as `success: false` with a descriptive `error`.
pub fn parse_line(raw: &str, correlation_id: &str) -> ParsedResponse {
    let line = raw.trim();
    if line.is_empty() {
        return ParsedResponse::failure(line, correlation_id, "Empty response line".to_string());
    }

    let event: InboundEvent = match serde_json::from_str(line) {
        Ok(ev) => ev,
        Err(err) => {
            return ParsedResponse::failure(
                line,
                correlation_id,
                format!("Failed to parse response line: {err}"),
            );
        }
    };

    let derived = derive_status(&event);
    let return_code = event.return_code.or(derived.and_then(|d| d.return_code));

    trace!(
        correlation_id,
        event = %event.event,
        status = ?derived.map(|d| d.status),
        return_code,
        "parsed response line"
    );

    ParsedResponse {
        success: true,
        status: derived.map(|d| d.status),
        return_code,
        outcome: event.parsed_outcome(),
        error: None,
        correlation_id: correlation_id.to_string(),
        raw: line.to_string(),
        event: Some(event),
    }
}
