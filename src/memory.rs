//! Conversation memory seam.
//!
//! The runtime records what happened in a turn; retrieval and storage layout
//! belong to the implementation.

use async_trait::async_trait;

use crate::llm::ToolCall;
use crate::tools::ToolOutcome;

/// Durable record of a session's conversation.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Record the inbound content that triggered a turn.
    async fn record_inbound(&self, session_id: &str, content: &str) -> anyhow::Result<()>;

    /// Record one tool call and its outcome.
    async fn record_tool_exchange(
        &self,
        session_id: &str,
        call: &ToolCall,
        outcome: &ToolOutcome,
    ) -> anyhow::Result<()>;

    /// Record the assistant's final response for a turn.
    async fn record_response(&self, session_id: &str, content: &str) -> anyhow::Result<()>;
}
