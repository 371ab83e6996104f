//! Error types for the runtime core.
//!
//! Scheduler contention (insufficient credits, exhausted lane budget) is not
//! an error: a session that cannot be admitted this pass is simply retried on
//! the next one. The enums here cover the conditions callers can act on.

use thiserror::Error;

/// Errors raised by the scheduler and session registry.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A session with this id already exists. Creation never overwrites.
    #[error("session already exists: {0}")]
    SessionExists(String),

    /// No session with this id is registered.
    #[error("unknown session: {0}")]
    UnknownSession(String),
}

/// Errors raised while validating events at the wire boundary.
#[derive(Debug, Error)]
pub enum EventError {
    /// The event type string is not part of the closed event set.
    #[error("unknown event type: {0}")]
    UnknownType(String),

    /// The payload did not match the schema for its event type.
    #[error("invalid payload for {event_type}: {reason}")]
    InvalidPayload { event_type: String, reason: String },
}

/// Errors that terminate a turn.
///
/// These never escape the turn executor: its boundary converts them into a
/// single `session.turn.error` publish.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("context assembly failed: {0}")]
    ContextAssembly(#[source] anyhow::Error),

    #[error("LLM call failed: {0}")]
    Llm(#[source] anyhow::Error),

    #[error("memory store failed: {0}")]
    Memory(#[source] anyhow::Error),

    #[error("tool definitions unavailable: {0}")]
    ToolDefinitions(#[source] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SchedulerError::SessionExists("s1".to_string());
        assert_eq!(err.to_string(), "session already exists: s1");

        let err = EventError::InvalidPayload {
            event_type: "system.tick".to_string(),
            reason: "missing field".to_string(),
        };
        assert!(err.to_string().contains("system.tick"));
    }
}
