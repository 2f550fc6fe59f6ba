//! Provider-agnostic chat interface.
//!
//! The client is stateless and retry-free: failures surface to callers,
//! who decide whether to retry (the Manager's task retry loop) or report
//! (the Coder's error event).

use kestrel_domain::chat::{ChatMessage, ToolCall, ToolDefinition};
use kestrel_domain::error::Result;

/// Response to a tool-enabled chat call.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

#[async_trait::async_trait]
pub trait ChatProvider: Send + Sync {
    /// Plain chat completion — planner and summarizer use.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        model_override: Option<&str>,
        response_format: Option<&serde_json::Value>,
    ) -> Result<String>;

    /// Chat with structured tool calling — Coder use.
    async fn chat_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        model_override: Option<&str>,
    ) -> Result<ChatResponse>;

    /// Whether `tool`-role messages can be appended to history. When false,
    /// callers serialize tool results into `system` messages instead.
    fn supports_tool_call_messages(&self) -> bool;
}
