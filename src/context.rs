//! Context assembly seam.
//!
//! Builds the message list a turn starts from. The runtime hands over the
//! session snapshot and the triggering event; prompt strategy, retrieval and
//! token budgeting are the implementation's business.

use async_trait::async_trait;

use crate::event::AgentEvent;
use crate::llm::ChatMessage;
use crate::session::Session;

/// Produces the initial conversation for a turn.
#[async_trait]
pub trait ContextAssembler: Send + Sync {
    /// Assemble the messages for a turn triggered by `event`. The session is
    /// a snapshot: persona, focus and recent turn summaries are available,
    /// but mutations do not propagate back.
    async fn assemble(
        &self,
        session: &Session,
        event: &AgentEvent,
    ) -> anyhow::Result<Vec<ChatMessage>>;
}
