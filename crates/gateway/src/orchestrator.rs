//! Per-connection orchestrator.
//!
//! Routes each inbound user message down one of four paths: detail-fetch
//! (`read file X` streams the file back without any LLM call),
//! clarification-resume (a pending question absorbs the next utterance),
//! replace (designated phrases clear pending state and start over), or a
//! normal Manager request. Manager/Coder events are translated into wire
//! frames and recorded through the session store's typed helpers so
//! structured metadata survives replay.
//!
//! The orchestrator never writes after its session disappears from the
//! registry: every event dispatch re-checks membership and exits cleanly.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use kestrel_agents::{AgentEvent, EventKind};
use kestrel_sessions::transcript::now_ts;
use kestrel_tools::resolve_path;

use crate::state::AppState;

const DETAIL_CHUNK_SIZE: usize = 1_200;

fn re(cell: &'static OnceLock<Regex>, pattern: &'static str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static pattern"))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire frames
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One outbound JSON frame.
#[derive(Debug, Clone, Serialize)]
pub struct WireEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub role: String,
    pub content: String,
    pub timestamp: String,
    pub metadata: Value,
    pub source: String,
}

impl WireEvent {
    pub fn new(
        event_type: &str,
        role: &str,
        content: impl Into<String>,
        metadata: Value,
        source: &str,
    ) -> Self {
        Self {
            event_type: event_type.to_string(),
            role: role.to_string(),
            content: content.into(),
            timestamp: now_ts(),
            metadata,
            source: source.to_string(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message classification
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const REPLACE_PHRASES: &[&str] = &[
    "stop and",
    "stop this",
    "cancel this",
    "cancel that",
    "start over",
    "new plan",
    "change direction",
    "change the plan",
    "ignore previous",
    "replace plan",
    "drop the plan",
];

/// A replace request cancels pending clarification and restarts.
pub fn is_replace_request(text: &str) -> bool {
    let normalized = text.trim().to_lowercase();
    REPLACE_PHRASES.iter().any(|p| normalized.contains(p))
}

/// Match `read [the] file|script <path>` or `read <path-with-dot>`.
pub fn detail_request_path(text: &str) -> Option<String> {
    static EXPLICIT: OnceLock<Regex> = OnceLock::new();
    static BARE: OnceLock<Regex> = OnceLock::new();

    if let Some(caps) =
        re(&EXPLICIT, r"(?i)^\s*read\s+(?:the\s+)?(?:file|script)\s+(.+)$").captures(text)
    {
        return Some(caps[1].trim().to_string());
    }
    if let Some(caps) = re(&BARE, r"(?i)^\s*read\s+([\w./-]+)\s*$").captures(text) {
        let path = caps[1].trim();
        if path.contains('.') {
            return Some(path.to_string());
        }
    }
    None
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Orchestrator {
    state: AppState,
    session_id: String,
}

impl Orchestrator {
    pub fn new(state: AppState, session_id: String) -> Self {
        Self { state, session_id }
    }

    fn session_alive(&self) -> bool {
        self.state.sessions.get(&self.session_id).is_some()
    }

    /// Record a wire event into the transcript (ignoring a vanished
    /// session) and forward it to the transport.
    async fn record_and_send(&self, event: WireEvent, out: &mpsc::Sender<WireEvent>) {
        let _ = self.state.sessions.record_event(
            &self.session_id,
            &event.event_type,
            &event.role,
            Some(event.source.as_str()),
            &event.content,
            event.metadata.clone(),
        );
        let _ = out.send(event).await;
    }

    /// One-time welcome pair plus the `session_created` system event.
    pub async fn send_welcome(&self, out: &mpsc::Sender<WireEvent>) {
        let Some(entry) = self.state.sessions.get(&self.session_id) else {
            return;
        };
        if entry.welcome_sent() {
            return;
        }

        let _ = self.state.sessions.record_system_event(
            &self.session_id,
            "Session started",
            "session_created",
            "info",
        );
        self.record_and_send(
            WireEvent::new(
                "system",
                "system",
                "Hello, I'm Kestrel. What are we working on today?",
                serde_json::json!({}),
                "system",
            ),
            out,
        )
        .await;
        self.record_and_send(
            WireEvent::new(
                "system",
                "system",
                format!("Working directory: {}", entry.cwd.display()),
                serde_json::json!({}),
                "system",
            ),
            out,
        )
        .await;
        entry.mark_welcome_sent();
    }

    /// Route one inbound user message.
    pub async fn handle_user_message(&self, text: &str, out: &mpsc::Sender<WireEvent>) {
        let Some(entry) = self.state.sessions.get(&self.session_id) else {
            return;
        };

        self.record_and_send(
            WireEvent::new("user", "user", text, serde_json::json!({}), "user"),
            out,
        )
        .await;

        // Detail-on-demand: stream a file back, no LLM involved.
        if let Some(path_hint) = detail_request_path(text) {
            self.send_detail(&path_hint, out).await;
            return;
        }

        if is_replace_request(text) {
            entry.clear_pending_clarify();
        }

        // A pending clarification absorbs this message and restarts the
        // original request with the answer appended.
        if let Some(original) = entry.take_pending_clarify() {
            let clarified = format!("{original}\n\nUser clarification: {text}");
            self.run_manager(&clarified, out).await;
            return;
        }

        self.run_manager(text, out).await;
    }

    // ── Detail-on-demand ───────────────────────────────────────────

    async fn send_detail_message(&self, content: String, out: &mpsc::Sender<WireEvent>) {
        self.record_and_send(
            WireEvent::new("detail", "controller", content, serde_json::json!({}), "detail"),
            out,
        )
        .await;
    }

    async fn send_detail(&self, path_hint: &str, out: &mpsc::Sender<WireEvent>) {
        let Some(entry) = self.state.sessions.get(&self.session_id) else {
            return;
        };

        let resolved = match resolve_path(&entry.cwd, path_hint) {
            Ok(resolved) => resolved,
            Err(_) => {
                self.send_detail_message(
                    "Sorry, I can only read files within the session directory.".into(),
                    out,
                )
                .await;
                return;
            }
        };
        if !resolved.is_file() {
            self.send_detail_message(
                format!("I couldn't find {path_hint} in this session."),
                out,
            )
            .await;
            return;
        }
        let content = match std::fs::read(&resolved) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(_) => {
                self.send_detail_message(format!("I couldn't read {path_hint}."), out)
                    .await;
                return;
            }
        };

        self.send_detail_message(format!("Reading {path_hint}."), out).await;

        let chars: Vec<char> = content.chars().collect();
        for chunk in chars.chunks(DETAIL_CHUNK_SIZE) {
            self.send_detail_message(chunk.iter().collect(), out).await;
        }
    }

    // ── Manager lifecycle ──────────────────────────────────────────

    async fn run_manager(&self, user_text: &str, out: &mpsc::Sender<WireEvent>) {
        let Some(entry) = self.state.sessions.get(&self.session_id) else {
            return;
        };
        let context = entry.context_seed.clone();
        let cancel = self.state.cancel_map.register(&self.session_id);

        let mut rx = self.state.manager.process_request(
            entry.session.clone(),
            user_text.to_string(),
            context,
            cancel,
        );

        while let Some(event) = rx.recv().await {
            if !self.session_alive() {
                // Session was killed mid-turn; exit without further writes.
                tracing::debug!(session_id = %self.session_id, "session gone, dropping event stream");
                break;
            }
            self.dispatch_event(event, user_text, out).await;
        }

        self.state.cancel_map.remove(&self.session_id);
    }

    /// Translate one agent event into wire frames + typed records.
    async fn dispatch_event(&self, event: AgentEvent, user_text: &str, out: &mpsc::Sender<WireEvent>) {
        let metadata = event.metadata.to_value();
        match event.kind {
            EventKind::Clarify => {
                self.record_and_send(
                    WireEvent::new(
                        "assistant",
                        "controller",
                        format!("I need clarification: {}", event.content),
                        serde_json::json!({ "controller_action": "clarify" }),
                        "controller",
                    ),
                    out,
                )
                .await;
                if let Some(entry) = self.state.sessions.get(&self.session_id) {
                    entry.set_pending_clarify(user_text.to_string());
                }
            }

            EventKind::Plan => {
                self.record_and_send(
                    WireEvent::new("assistant", "controller", event.content, metadata, "controller"),
                    out,
                )
                .await;
            }

            EventKind::TaskStart | EventKind::TaskComplete | EventKind::TaskFailed => {
                self.record_and_send(
                    WireEvent::new(
                        event.kind.as_str(),
                        &event.role,
                        event.content,
                        metadata,
                        &event.source,
                    ),
                    out,
                )
                .await;
            }

            EventKind::ToolCall => {
                let meta = &event.metadata;
                let tool_name = meta.tool_name.as_deref().unwrap_or("unknown");
                let call_id = meta.call_id.as_deref().unwrap_or("unknown");
                let _ = self.state.sessions.record_tool_call(
                    &self.session_id,
                    tool_name,
                    &event.content,
                    call_id,
                    &event.source,
                    meta.task_id.as_deref(),
                );
                let frame = WireEvent::new(
                    "tool",
                    "system",
                    format!("Tool request: {tool_name}\n```json\n{}\n```", event.content),
                    metadata,
                    "tool",
                );
                let _ = out.send(frame).await;
            }

            EventKind::ToolResult => {
                let meta = &event.metadata;
                let tool_name = meta.tool_name.as_deref().unwrap_or("unknown");
                let call_id = meta.call_id.as_deref().unwrap_or("unknown");
                let success = meta.success.unwrap_or(true);
                let _ = self.state.sessions.record_tool_result(
                    &self.session_id,
                    tool_name,
                    &event.content,
                    call_id,
                    success,
                    meta.duration_ms,
                );
                let status = if success { "✓" } else { "✗" };
                let frame = WireEvent::new(
                    "tool",
                    "system",
                    format!("Tool response {status}: {tool_name}\n```json\n{}\n```", event.content),
                    metadata,
                    "tool",
                );
                let _ = out.send(frame).await;
            }

            EventKind::Summary => {
                let meta = &event.metadata;
                let files = meta.files_changed.clone().unwrap_or_default();
                let _ = self.state.sessions.record_summary(
                    &self.session_id,
                    &event.content,
                    meta.task_id.as_deref(),
                    &files,
                );
                let frame = WireEvent::new("summary", "system", event.content, metadata, "summary");
                let _ = out.send(frame).await;
            }

            // Everything else is forwarded and recorded as-is.
            _ => {
                self.record_and_send(
                    WireEvent::new(
                        event.kind.as_str(),
                        &event.role,
                        event.content,
                        metadata,
                        &event.source,
                    ),
                    out,
                )
                .await;
            }
        }
    }
}
