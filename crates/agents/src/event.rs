//! The event stream the agents produce.
//!
//! Coder and Manager write `AgentEvent`s into a bounded channel; the
//! orchestrator reads them, records them, and forwards them to the
//! transport. Metadata is typed but fully optional — only set fields
//! serialize, so wire frames stay small.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Planning,
    Assistant,
    ToolCall,
    ToolResult,
    Result,
    System,
    Error,
    Manager,
    Clarify,
    Plan,
    TaskStart,
    TaskComplete,
    TaskFailed,
    Summary,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Planning => "planning",
            EventKind::Assistant => "assistant",
            EventKind::ToolCall => "tool_call",
            EventKind::ToolResult => "tool_result",
            EventKind::Result => "result",
            EventKind::System => "system",
            EventKind::Error => "error",
            EventKind::Manager => "manager",
            EventKind::Clarify => "clarify",
            EventKind::Plan => "plan",
            EventKind::TaskStart => "task_start",
            EventKind::TaskComplete => "task_complete",
            EventKind::TaskFailed => "task_failed",
            EventKind::Summary => "summary",
        }
    }
}

/// Type-specific event metadata. Every field is optional; helpers set
/// only what the event kind calls for.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EventMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_changed: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tested: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
}

impl EventMeta {
    /// Metadata as a JSON object (for transcript records and wire frames).
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({}))
    }
}

/// One event produced by an agent.
#[derive(Debug, Clone, Serialize)]
pub struct AgentEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub role: String,
    pub source: String,
    pub content: String,
    pub metadata: EventMeta,
}

impl AgentEvent {
    pub fn new(
        kind: EventKind,
        role: impl Into<String>,
        source: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            role: role.into(),
            source: source.into(),
            content: content.into(),
            metadata: EventMeta::default(),
        }
    }

    pub fn with_task(mut self, task_id: &str) -> Self {
        self.metadata.task_id = Some(task_id.to_string());
        self
    }
}
