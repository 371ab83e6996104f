//! Tool execution seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::llm::ToolDefinition;

/// One tool call to execute, as requested by the model or a proactive task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Call id from the model, or a synthetic id for proactive invocations.
    pub call_id: String,
    pub name: String,
    pub arguments: serde_json::Value,
    pub session_id: String,
}

/// Result of executing one tool call.
///
/// Tool failure is data, not an error: a failed call is reported back to the
/// model as a tool message and the turn continues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub success: bool,
    #[serde(default)]
    pub result: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolOutcome {
    pub fn ok(result: serde_json::Value) -> Self {
        Self {
            success: true,
            result,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: serde_json::Value::Null,
            error: Some(error.into()),
        }
    }

    /// Render for a tool-role chat message.
    pub fn as_message_content(&self) -> String {
        if self.success {
            self.result.to_string()
        } else {
            format!(
                "tool error: {}",
                self.error.as_deref().unwrap_or("unknown failure")
            )
        }
    }
}

/// Tool registry and executor.
///
/// `execute` returns `Err` only for infrastructure faults (the executor
/// itself broke); a tool that ran and failed returns `Ok` with
/// `success = false`.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Tools available to the given session. The executor may already apply
    /// its own policy; the turn loop additionally filters by the session's
    /// permission list.
    async fn definitions(&self, session_id: &str) -> anyhow::Result<Vec<ToolDefinition>>;

    async fn execute(&self, invocation: ToolInvocation) -> anyhow::Result<ToolOutcome>;
}
