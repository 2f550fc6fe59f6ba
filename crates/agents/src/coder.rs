//! Coder agent — executes one task with a bounded tool-use loop.
//!
//! Each iteration asks the LLM for the next step, runs any requested
//! tools, and feeds the results back into message history. Models that
//! cannot emit structured tool calls are still supported through two
//! fallback encodings parsed out of the text: `<tool_call>{json}</tool_call>`
//! and `<function=NAME><parameter=K>V</parameter></function>` (bare text
//! inside `<tool_call>` is treated as a shell command).
//!
//! Invariants: every emitted `tool_call` gets a matching `tool_result`;
//! every event carries the task id; session history is only mutated here
//! (assistant and tool-result turns) and by the orchestrator (user turns).

use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Instant;

use regex::Regex;
use serde_json::Value;
use tokio::sync::mpsc;

use kestrel_domain::chat::{ChatMessage, ToolCall};
use kestrel_domain::session::AgentSession;
use kestrel_domain::task::parse_result_xml;
use kestrel_providers::ChatProvider;
use kestrel_tools::{dispatch_tool, result_success, tool_definitions};

use crate::cancel::CancelToken;
use crate::event::{AgentEvent, EventKind};
use crate::prompts::CODER_SYSTEM_PROMPT;

const EVENT_CHANNEL_CAPACITY: usize = 64;
pub const DEFAULT_MAX_STEPS: usize = 30;

fn re(cell: &'static OnceLock<Regex>, pattern: &'static str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static pattern"))
}

#[derive(Clone)]
pub struct CoderAgent {
    provider: Arc<dyn ChatProvider>,
    max_steps: usize,
}

impl CoderAgent {
    pub fn new(provider: Arc<dyn ChatProvider>, max_steps: usize) -> Self {
        Self { provider, max_steps }
    }

    /// Run one task. Returns the receiving end of the event stream; the
    /// loop itself runs as a spawned task and stops when the receiver is
    /// dropped or the cancel token fires.
    pub fn run(
        &self,
        session: Arc<AgentSession>,
        user_text: String,
        task_id: Option<String>,
        cancel: CancelToken,
    ) -> mpsc::Receiver<AgentEvent> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let agent = self.clone();
        tokio::spawn(async move {
            agent.run_inner(session, user_text, task_id, cancel, tx).await;
        });
        rx
    }

    async fn run_inner(
        &self,
        session: Arc<AgentSession>,
        user_text: String,
        task_id: Option<String>,
        cancel: CancelToken,
        tx: mpsc::Sender<AgentEvent>,
    ) {
        let task_id = task_id.unwrap_or_else(|| {
            let hex = uuid::Uuid::new_v4().simple().to_string();
            format!("task_{}", &hex[..12])
        });
        let mut call_counter: u32 = 0;
        let tool_defs = tool_definitions();

        session.push_history(ChatMessage::user(user_text.as_str()));
        let mut messages: Vec<ChatMessage> = Vec::new();
        messages.push(ChatMessage::system(CODER_SYSTEM_PROMPT));
        messages.extend(session.history_snapshot());

        let mut steps_remaining = self.max_steps;

        while steps_remaining > 0 {
            if cancel.is_cancelled() {
                tracing::debug!(task_id = %task_id, "coder cancelled");
                return;
            }

            let response = match self
                .provider
                .chat_with_tools(&messages, &tool_defs, None)
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    let mut event = AgentEvent::new(
                        EventKind::Error,
                        "system",
                        "system",
                        format!("LLM call failed: {e}"),
                    )
                    .with_task(&task_id);
                    event.metadata.severity = Some("error".into());
                    let _ = tx.send(event).await;
                    return;
                }
            };

            let mut content = response.content.trim().to_string();
            let mut tool_calls = response.tool_calls;

            // Fallback: parse tagged tool calls out of plain text.
            if tool_calls.is_empty()
                && (content.contains("<tool_call>") || content.contains("<function="))
            {
                tool_calls = parse_tool_tags(&content);
                content = strip_tool_tags(&content);
            }

            // Surface the think block as a planning event, then drop it.
            if let Some(think) = extract_think(&content) {
                let _ = tx
                    .send(
                        AgentEvent::new(EventKind::Planning, "coder", "coder", think)
                            .with_task(&task_id),
                    )
                    .await;
                content = remove_think(&content);
            }

            if !content.is_empty() || !tool_calls.is_empty() {
                let assistant =
                    if !tool_calls.is_empty() && self.provider.supports_tool_call_messages() {
                        ChatMessage::assistant_with_tools(content.as_str(), tool_calls.clone())
                    } else {
                        ChatMessage::assistant(content.as_str())
                    };
                messages.push(assistant);
            }

            if !content.is_empty() {
                session.push_history(ChatMessage::assistant(content.as_str()));
                let _ = tx
                    .send(
                        AgentEvent::new(EventKind::Assistant, "coder", "coder", content.as_str())
                            .with_task(&task_id),
                    )
                    .await;

                if tool_calls.is_empty() {
                    // Final response — surface the structured result if present.
                    if let Some(result) = parse_result_xml(&content) {
                        let mut event =
                            AgentEvent::new(EventKind::Result, "coder", "coder", result.summary.as_str())
                                .with_task(&task_id);
                        event.metadata.status = Some(result.status.as_str().to_string());
                        event.metadata.files_changed = Some(result.files_changed);
                        event.metadata.tested = Some(result.tested);
                        event.metadata.errors = Some(result.errors);
                        let _ = tx.send(event).await;
                    }
                    return;
                }
            }

            if tool_calls.is_empty() {
                let mut event = AgentEvent::new(
                    EventKind::System,
                    "system",
                    "system",
                    "Coder returned no tool calls or final response. Stopping.",
                )
                .with_task(&task_id);
                event.metadata.severity = Some("warn".into());
                let _ = tx.send(event).await;
                return;
            }

            for call in &tool_calls {
                if cancel.is_cancelled() {
                    tracing::debug!(task_id = %task_id, "coder cancelled during tool dispatch");
                    return;
                }

                call_counter += 1;
                let call_id = format!("{task_id}_call_{call_counter}");
                let cwd_str = session.cwd().display().to_string();

                let request_body = serde_json::json!({
                    "name": call.tool_name,
                    "arguments": call.arguments,
                });
                let request_text = serde_json::to_string_pretty(&request_body)
                    .unwrap_or_else(|_| request_body.to_string());

                let mut event = AgentEvent::new(
                    EventKind::ToolCall,
                    "system",
                    "coder",
                    request_text.as_str(),
                )
                .with_task(&task_id);
                event.metadata.tool_name = Some(call.tool_name.clone());
                event.metadata.call_id = Some(call_id.clone());
                event.metadata.cwd = Some(cwd_str.clone());
                let _ = tx.send(event).await;

                let start = Instant::now();
                let outcome = dispatch_tool(session.cwd(), &call.tool_name, &call.arguments).await;
                let duration_ms = start.elapsed().as_millis() as u64;

                match outcome {
                    Ok(result) => {
                        let success = result_success(&result);
                        let result_text = serde_json::to_string_pretty(&result)
                            .unwrap_or_else(|_| result.to_string());

                        let mut event = AgentEvent::new(
                            EventKind::ToolResult,
                            "system",
                            "tool_runner",
                            result_text.as_str(),
                        )
                        .with_task(&task_id);
                        event.metadata.tool_name = Some(call.tool_name.clone());
                        event.metadata.call_id = Some(call_id.clone());
                        event.metadata.success = Some(success);
                        event.metadata.duration_ms = Some(duration_ms);
                        event.metadata.cwd = Some(cwd_str);
                        let _ = tx.send(event).await;

                        let history_line = format!("Tool result ({}): {result_text}", call.tool_name);
                        if self.provider.supports_tool_call_messages() {
                            messages.push(ChatMessage::tool_result(
                                call.call_id.as_str(),
                                result_text.as_str(),
                            ));
                        } else {
                            messages.push(ChatMessage::system(history_line.as_str()));
                        }
                        session.push_history(ChatMessage::system(history_line));
                    }
                    Err(error) => {
                        let error_text = format!("Tool error ({}): {error}", call.tool_name);
                        let mut event = AgentEvent::new(
                            EventKind::ToolResult,
                            "system",
                            "tool_runner",
                            error_text.as_str(),
                        )
                        .with_task(&task_id);
                        event.metadata.tool_name = Some(call.tool_name.clone());
                        event.metadata.call_id = Some(call_id.clone());
                        event.metadata.success = Some(false);
                        event.metadata.duration_ms = Some(duration_ms);
                        let _ = tx.send(event).await;

                        messages.push(ChatMessage::system(error_text));
                    }
                }
            }

            steps_remaining -= 1;
        }

        let mut event = AgentEvent::new(
            EventKind::Error,
            "system",
            "system",
            "Coder stopped after too many steps without completing the task.",
        )
        .with_task(&task_id);
        event.metadata.severity = Some("error".into());
        let _ = tx.send(event).await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Think-block handling
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn extract_think(content: &str) -> Option<String> {
    static THINK: OnceLock<Regex> = OnceLock::new();
    re(&THINK, r"<think>([\s\S]*?)</think>")
        .captures(content)
        .map(|caps| caps[1].trim().to_string())
}

fn remove_think(content: &str) -> String {
    static THINK: OnceLock<Regex> = OnceLock::new();
    re(&THINK, r"<think>[\s\S]*?</think>")
        .replace_all(content, "")
        .trim()
        .to_string()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tagged tool-call parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Remove tool-call XML tags from content.
fn strip_tool_tags(content: &str) -> String {
    static TOOL_CALL: OnceLock<Regex> = OnceLock::new();
    static FUNC: OnceLock<Regex> = OnceLock::new();
    static PARAM: OnceLock<Regex> = OnceLock::new();

    let cleaned = re(&TOOL_CALL, r"<tool_call>[\s\S]*?</tool_call>").replace_all(content, "");
    let cleaned = re(&FUNC, r"</?function[^>]*>").replace_all(&cleaned, "");
    let cleaned = re(&PARAM, r"</?parameter[^>]*>").replace_all(&cleaned, "");
    cleaned.trim().to_string()
}

/// Parse `<tool_call>` / `<function=...>` blocks into tool calls.
fn parse_tool_tags(content: &str) -> Vec<ToolCall> {
    static TOOL_CALL: OnceLock<Regex> = OnceLock::new();
    static FUNC_BLOCK: OnceLock<Regex> = OnceLock::new();

    let tool_blocks: Vec<&str> = re(&TOOL_CALL, r"<tool_call>([\s\S]*?)</tool_call>")
        .captures_iter(content)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect();

    let mut calls: Vec<ToolCall> = Vec::new();

    if !tool_blocks.is_empty() {
        for block in tool_blocks {
            let text = block.trim();
            if text.is_empty() {
                continue;
            }

            if text.starts_with('{') && text.ends_with('}') {
                if let Ok(payload) = serde_json::from_str::<Value>(text) {
                    if let Some(call) = tool_call_from_payload(&payload, calls.len()) {
                        calls.push(call);
                        continue;
                    }
                }
            }

            if text.contains("<function=") {
                if let Some(call) = parse_function_block(text, calls.len()) {
                    calls.push(call);
                }
                continue;
            }

            // Bare text inside <tool_call> is a shell command.
            calls.push(ToolCall {
                call_id: format!("tag_{}", calls.len()),
                tool_name: "shell".into(),
                arguments: serde_json::json!({ "command": text }),
            });
        }
        return calls;
    }

    for m in re(&FUNC_BLOCK, r"<function=[^>]+>[\s\S]*?</function>").find_iter(content) {
        if let Some(call) = parse_function_block(m.as_str(), calls.len()) {
            calls.push(call);
        }
    }
    calls
}

/// Convert a JSON payload (`{"name": ..., "arguments": ...}` or nested
/// under `"function"`) into a tool call.
fn tool_call_from_payload(payload: &Value, index: usize) -> Option<ToolCall> {
    let (name, args) = match payload.get("function") {
        Some(Value::Object(function)) => (
            function.get("name").and_then(Value::as_str)?,
            function.get("arguments").cloned().unwrap_or_else(|| serde_json::json!({})),
        ),
        _ => (
            payload.get("name").and_then(Value::as_str)?,
            payload.get("arguments").cloned().unwrap_or_else(|| serde_json::json!({})),
        ),
    };

    let arguments = match args {
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(Value::Object(map)) => Value::Object(map),
            _ if name == "shell" => serde_json::json!({ "command": s }),
            _ => serde_json::json!({ "value": s }),
        },
        Value::Object(map) => Value::Object(map),
        _ => serde_json::json!({}),
    };

    Some(ToolCall {
        call_id: format!("tag_{index}"),
        tool_name: name.to_string(),
        arguments,
    })
}

/// Parse one `<function=NAME>` block with `<parameter=K>V</parameter>`
/// children.
fn parse_function_block(text: &str, index: usize) -> Option<ToolCall> {
    static FUNC_NAME: OnceLock<Regex> = OnceLock::new();
    static PARAM: OnceLock<Regex> = OnceLock::new();
    static TAGS: OnceLock<Regex> = OnceLock::new();

    let name = re(&FUNC_NAME, r"<function=([^>]+)>")
        .captures(text)?
        .get(1)?
        .as_str()
        .trim()
        .to_string();

    let mut args = serde_json::Map::new();
    for caps in re(&PARAM, r"<parameter=([^>]+)>([\s\S]*?)</parameter>").captures_iter(text) {
        args.insert(
            caps[1].trim().to_string(),
            Value::String(caps[2].trim().to_string()),
        );
    }

    if args.is_empty() {
        let body = re(&TAGS, r"</?(?:function|parameter)[^>]*>")
            .replace_all(text, "")
            .trim()
            .to_string();
        if name == "shell" && !body.is_empty() {
            args.insert("command".into(), Value::String(body));
        } else if name == "list_dir" {
            let path = if body.is_empty() { ".".to_string() } else { body };
            args.insert("path".into(), Value::String(path));
        }
    }

    Some(ToolCall {
        call_id: format!("tag_{index}"),
        tool_name: name,
        arguments: Value::Object(args),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{drain, ScriptedProvider};
    use kestrel_providers::ChatResponse;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    // ── Parser tests ───────────────────────────────────────────────

    #[test]
    fn parse_json_tool_call_block() {
        let content = r#"<tool_call>{"name": "list_dir", "arguments": {"path": "src"}}</tool_call>"#;
        let calls = parse_tool_tags(content);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool_name, "list_dir");
        assert_eq!(calls[0].arguments["path"], "src");
    }

    #[test]
    fn parse_nested_function_payload() {
        let content = r#"<tool_call>{"function": {"name": "shell", "arguments": "{\"command\": \"ls\"}"}}</tool_call>"#;
        let calls = parse_tool_tags(content);
        assert_eq!(calls[0].tool_name, "shell");
        assert_eq!(calls[0].arguments["command"], "ls");
    }

    #[test]
    fn bare_text_in_tool_call_is_shell() {
        let calls = parse_tool_tags("<tool_call>cat Cargo.toml</tool_call>");
        assert_eq!(calls[0].tool_name, "shell");
        assert_eq!(calls[0].arguments["command"], "cat Cargo.toml");
    }

    #[test]
    fn string_arguments_for_shell_become_command() {
        let content = r#"<tool_call>{"name": "shell", "arguments": "echo hi"}</tool_call>"#;
        let calls = parse_tool_tags(content);
        assert_eq!(calls[0].arguments["command"], "echo hi");
    }

    #[test]
    fn parse_function_parameter_blocks() {
        let content = "<function=write_file><parameter=path>a.txt</parameter><parameter=content>hello</parameter></function>";
        let calls = parse_tool_tags(content);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool_name, "write_file");
        assert_eq!(calls[0].arguments["path"], "a.txt");
        assert_eq!(calls[0].arguments["content"], "hello");
    }

    #[test]
    fn function_block_without_params_defaults() {
        let calls = parse_tool_tags("<function=list_dir></function>");
        assert_eq!(calls[0].arguments["path"], ".");

        let calls = parse_tool_tags("<function=shell>echo hi</function>");
        assert_eq!(calls[0].arguments["command"], "echo hi");
    }

    #[test]
    fn strip_removes_all_tags() {
        let content = "before <tool_call>{\"name\":\"x\"}</tool_call> after";
        assert_eq!(strip_tool_tags(content), "before  after");
    }

    #[test]
    fn think_extraction_and_removal() {
        let content = "<think>step 1\nstep 2</think>Doing it now.";
        assert_eq!(extract_think(content).unwrap(), "step 1\nstep 2");
        assert_eq!(remove_think(content), "Doing it now.");
    }

    // ── Loop tests ─────────────────────────────────────────────────

    fn tool_call(name: &str, args: Value) -> ToolCall {
        ToolCall {
            call_id: "prov_1".into(),
            tool_name: name.into(),
            arguments: args,
        }
    }

    #[tokio::test]
    async fn tool_roundtrip_event_order() {
        let ws = TempDir::new().unwrap();
        std::fs::write(ws.path().join("seen.txt"), "").unwrap();

        let provider = Arc::new(ScriptedProvider::with_tool_responses([
            ChatResponse {
                content: "<think>list first</think>Listing the directory.".into(),
                tool_calls: vec![tool_call("list_dir", serde_json::json!({ "path": "." }))],
            },
            ScriptedProvider::text_response(
                "<result><status>success</status><summary>Listed files</summary></result>",
            ),
        ]));
        let coder = CoderAgent::new(provider, DEFAULT_MAX_STEPS);
        let session = Arc::new(AgentSession::new(ws.path()));

        let events = drain(coder.run(
            session,
            "list the files".into(),
            Some("7".into()),
            CancelToken::new(),
        ))
        .await;

        let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::Planning,
                EventKind::Assistant,
                EventKind::ToolCall,
                EventKind::ToolResult,
                EventKind::Assistant,
                EventKind::Result,
            ]
        );

        // Call-id pairing and task-id stamping.
        let call = &events[2];
        let result = &events[3];
        assert_eq!(call.metadata.call_id.as_deref(), Some("7_call_1"));
        assert_eq!(result.metadata.call_id.as_deref(), Some("7_call_1"));
        assert_eq!(result.metadata.success, Some(true));
        assert!(result.metadata.duration_ms.is_some());
        for event in &events {
            assert_eq!(event.metadata.task_id.as_deref(), Some("7"));
        }

        let final_result = &events[5];
        assert_eq!(final_result.metadata.status.as_deref(), Some("completed"));
    }

    #[tokio::test]
    async fn failed_tool_still_gets_result_event() {
        let ws = TempDir::new().unwrap();
        let provider = Arc::new(ScriptedProvider::with_tool_responses([
            ChatResponse {
                content: String::new(),
                tool_calls: vec![tool_call("read_file", serde_json::json!({ "path": "missing.txt" }))],
            },
            ScriptedProvider::text_response("<result><status>failed</status><summary>no file</summary></result>"),
        ]));
        let coder = CoderAgent::new(provider, DEFAULT_MAX_STEPS);
        let session = Arc::new(AgentSession::new(ws.path()));

        let events = drain(coder.run(session, "read it".into(), Some("1".into()), CancelToken::new())).await;
        let result = events
            .iter()
            .find(|e| e.kind == EventKind::ToolResult)
            .unwrap();
        assert_eq!(result.metadata.success, Some(false));
        assert!(result.content.contains("Tool error"));
    }

    #[tokio::test]
    async fn tagged_fallback_calls_are_executed() {
        let ws = TempDir::new().unwrap();
        let provider = Arc::new(ScriptedProvider::with_tool_responses([
            ScriptedProvider::text_response(
                "<tool_call>{\"name\": \"write_file\", \"arguments\": {\"path\": \"out.txt\", \"content\": \"done\"}}</tool_call>",
            ),
            ScriptedProvider::text_response("<result><status>success</status><summary>wrote</summary></result>"),
        ]));
        let coder = CoderAgent::new(provider, DEFAULT_MAX_STEPS);
        let session = Arc::new(AgentSession::new(ws.path()));

        let events = drain(coder.run(session, "write".into(), None, CancelToken::new())).await;
        assert!(events.iter().any(|e| e.kind == EventKind::ToolCall));
        assert_eq!(std::fs::read_to_string(ws.path().join("out.txt")).unwrap(), "done");
    }

    #[tokio::test]
    async fn no_calls_and_no_content_warns_and_stops() {
        let ws = TempDir::new().unwrap();
        let provider = Arc::new(ScriptedProvider::with_tool_responses([
            ScriptedProvider::text_response(""),
        ]));
        let coder = CoderAgent::new(provider.clone(), DEFAULT_MAX_STEPS);
        let session = Arc::new(AgentSession::new(ws.path()));

        let events = drain(coder.run(session, "hm".into(), None, CancelToken::new())).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::System);
        assert_eq!(events[0].metadata.severity.as_deref(), Some("warn"));
        assert_eq!(provider.tool_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn step_exhaustion_emits_error() {
        let ws = TempDir::new().unwrap();
        let provider = Arc::new(ScriptedProvider::with_tool_responses([
            ChatResponse {
                content: String::new(),
                tool_calls: vec![tool_call("list_dir", serde_json::json!({ "path": "." }))],
            },
            ChatResponse {
                content: String::new(),
                tool_calls: vec![tool_call("list_dir", serde_json::json!({ "path": "." }))],
            },
        ]));
        let coder = CoderAgent::new(provider, 2);
        let session = Arc::new(AgentSession::new(ws.path()));

        let events = drain(coder.run(session, "loop".into(), None, CancelToken::new())).await;
        let last = events.last().unwrap();
        assert_eq!(last.kind, EventKind::Error);
        assert!(last.content.contains("too many steps"));
    }

    #[tokio::test]
    async fn llm_failure_emits_error_event() {
        let ws = TempDir::new().unwrap();
        let provider = Arc::new(ScriptedProvider::new());
        let coder = CoderAgent::new(provider, DEFAULT_MAX_STEPS);
        let session = Arc::new(AgentSession::new(ws.path()));

        let events = drain(coder.run(session, "go".into(), None, CancelToken::new())).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Error);
        assert!(events[0].content.contains("LLM call failed"));
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_llm_call() {
        let ws = TempDir::new().unwrap();
        let provider = Arc::new(ScriptedProvider::new());
        let coder = CoderAgent::new(provider.clone(), DEFAULT_MAX_STEPS);
        let session = Arc::new(AgentSession::new(ws.path()));

        let cancel = CancelToken::new();
        cancel.cancel();
        let events = drain(coder.run(session, "go".into(), None, cancel)).await;
        assert!(events.is_empty());
        assert_eq!(provider.tool_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn history_gains_user_assistant_and_tool_turns() {
        let ws = TempDir::new().unwrap();
        let provider = Arc::new(ScriptedProvider::with_tool_responses([
            ChatResponse {
                content: "Checking.".into(),
                tool_calls: vec![tool_call("list_dir", serde_json::json!({ "path": "." }))],
            },
            ScriptedProvider::text_response("All done."),
        ]));
        let coder = CoderAgent::new(provider, DEFAULT_MAX_STEPS);
        let session = Arc::new(AgentSession::new(ws.path()));

        drain(coder.run(session.clone(), "check".into(), None, CancelToken::new())).await;

        let history = session.history_snapshot();
        // user, assistant ("Checking."), system tool result, assistant ("All done.")
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].content, "check");
        assert!(history[2].content.starts_with("Tool result (list_dir):"));
    }
}
