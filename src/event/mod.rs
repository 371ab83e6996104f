//! Events flowing through the runtime.
//!
//! The inbound surface accepts loosely-typed wire events (a type string plus a
//! JSON payload) and validates them into a closed [`EventKind`] union before
//! anything else touches them. Everything past the routing boundary works with
//! typed payloads.

mod bus;

pub use bus::{BusEvent, EventBus, EventHandler, InMemoryEventBus, SubscriptionHandle, handler};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EventError;
use crate::session::PriorityClass;

/// Bus topics the runtime publishes and subscribes to.
pub mod topics {
    pub const TURN_STARTED: &str = "session.turn.started";
    pub const TURN_COMPLETED: &str = "session.turn.completed";
    pub const TURN_ERROR: &str = "session.turn.error";
    pub const TOOL_RESULT: &str = "session.tool.result";
    pub const PROACTIVE_TOOL_RESULT: &str = "proactive.tool.result";
    pub const PROACTIVE_TOOL_ERROR: &str = "proactive.tool.error";
}

/// A chat message arriving from some channel integration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePayload {
    pub channel_id: String,
    pub author_id: String,
    #[serde(default)]
    pub author_is_bot: bool,
    pub content: String,
}

/// A periodic wake-up for an otherwise idle session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickPayload {
    pub interval_ms: u64,
    pub tick_number: u64,
    /// Prompt injected into the turn so the model has something to act on.
    #[serde(default)]
    pub prompt: Option<String>,
}

/// An operator command, broadcast to every session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminCommandPayload {
    pub command: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// Synthetic content injected by the proactive loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProactivePayload {
    pub channel_id: String,
    pub content: String,
    pub author_id: String,
    #[serde(default)]
    pub author_is_bot: bool,
}

/// The closed set of event kinds the runtime understands.
///
/// Wire form is `{ "type": "...", "payload": { ... } }`; anything outside this
/// set is rejected at the routing boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum EventKind {
    #[serde(rename = "channel.message.created")]
    MessageCreated(MessagePayload),
    #[serde(rename = "system.tick")]
    Tick(TickPayload),
    #[serde(rename = "admin.command")]
    AdminCommand(AdminCommandPayload),
    #[serde(rename = "system.proactive")]
    Proactive(ProactivePayload),
}

impl EventKind {
    /// The dot-namespaced type string.
    pub fn event_type(&self) -> &'static str {
        match self {
            EventKind::MessageCreated(_) => "channel.message.created",
            EventKind::Tick(_) => "system.tick",
            EventKind::AdminCommand(_) => "admin.command",
            EventKind::Proactive(_) => "system.proactive",
        }
    }

    /// Which lane an event lands in when no explicit target or subscription
    /// filter decides. Admin commands broadcast and never consult this.
    pub fn default_lane(&self) -> PriorityClass {
        match self {
            EventKind::MessageCreated(_) => PriorityClass::Interactive,
            _ => PriorityClass::Operational,
        }
    }
}

/// One event addressed to the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvent {
    pub id: String,
    #[serde(flatten)]
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    /// Explicit target session; routing falls back to class/filter matching
    /// when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl AgentEvent {
    /// Create an event with a fresh id and the current time.
    pub fn new(kind: EventKind) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            timestamp: Utc::now(),
            session_id: None,
        }
    }

    /// Address the event to a specific session.
    pub fn for_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// The dot-namespaced type string.
    pub fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }
}

/// The untyped shape events arrive in from outside the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub session_id: Option<String>,
    pub payload: serde_json::Value,
}

impl WireEvent {
    /// Validate into a typed event. This is the only place loose payloads are
    /// accepted; unknown types and malformed payloads are rejected here.
    pub fn validate(self) -> Result<AgentEvent, EventError> {
        let kind = match self.event_type.as_str() {
            "channel.message.created" => {
                EventKind::MessageCreated(parse_payload(&self.event_type, self.payload)?)
            }
            "system.tick" => EventKind::Tick(parse_payload(&self.event_type, self.payload)?),
            "admin.command" => {
                EventKind::AdminCommand(parse_payload(&self.event_type, self.payload)?)
            }
            "system.proactive" => {
                EventKind::Proactive(parse_payload(&self.event_type, self.payload)?)
            }
            other => return Err(EventError::UnknownType(other.to_string())),
        };

        Ok(AgentEvent {
            id: self.id,
            kind,
            timestamp: self.timestamp,
            session_id: self.session_id,
        })
    }
}

fn parse_payload<T: serde::de::DeserializeOwned>(
    event_type: &str,
    payload: serde_json::Value,
) -> Result<T, EventError> {
    serde_json::from_value(payload).map_err(|e| EventError::InvalidPayload {
        event_type: event_type.to_string(),
        reason: e.to_string(),
    })
}
