//! Scripted providers for driving the agent loops deterministically.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use kestrel_domain::chat::{ChatMessage, ToolDefinition};
use kestrel_domain::error::{Error, Result};
use kestrel_providers::{ChatProvider, ChatResponse};

/// Pops one canned response per call; errors once the script runs dry.
pub struct ScriptedProvider {
    chat_script: Mutex<VecDeque<String>>,
    tool_script: Mutex<VecDeque<ChatResponse>>,
    pub chat_calls: AtomicUsize,
    pub tool_calls: AtomicUsize,
    supports_tool_messages: bool,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            chat_script: Mutex::new(VecDeque::new()),
            tool_script: Mutex::new(VecDeque::new()),
            chat_calls: AtomicUsize::new(0),
            tool_calls: AtomicUsize::new(0),
            supports_tool_messages: true,
        }
    }

    pub fn with_chat(responses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let provider = Self::new();
        provider
            .chat_script
            .lock()
            .extend(responses.into_iter().map(Into::into));
        provider
    }

    pub fn with_tool_responses(responses: impl IntoIterator<Item = ChatResponse>) -> Self {
        let provider = Self::new();
        provider.tool_script.lock().extend(responses);
        provider
    }

    pub fn push_tool_response(&self, response: ChatResponse) {
        self.tool_script.lock().push_back(response);
    }

    /// Plain-text response (no tool calls).
    pub fn text_response(content: &str) -> ChatResponse {
        ChatResponse {
            content: content.to_string(),
            tool_calls: Vec::new(),
        }
    }
}

#[async_trait::async_trait]
impl ChatProvider for ScriptedProvider {
    async fn chat(
        &self,
        _messages: &[ChatMessage],
        _model_override: Option<&str>,
        _response_format: Option<&serde_json::Value>,
    ) -> Result<String> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        self.chat_script
            .lock()
            .pop_front()
            .ok_or_else(|| Error::Http("scripted chat exhausted".into()))
    }

    async fn chat_with_tools(
        &self,
        _messages: &[ChatMessage],
        _tools: &[ToolDefinition],
        _model_override: Option<&str>,
    ) -> Result<ChatResponse> {
        self.tool_calls.fetch_add(1, Ordering::SeqCst);
        self.tool_script
            .lock()
            .pop_front()
            .ok_or_else(|| Error::Http("scripted tool chat exhausted".into()))
    }

    fn supports_tool_call_messages(&self) -> bool {
        self.supports_tool_messages
    }
}

/// Drain a receiver into a vec (the producer must have finished).
pub async fn drain(mut rx: tokio::sync::mpsc::Receiver<crate::AgentEvent>) -> Vec<crate::AgentEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}
