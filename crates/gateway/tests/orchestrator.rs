//! Connection-level tests: the orchestrator driven end to end with a
//! scripted LLM, without a live socket.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::mpsc;

use kestrel_domain::chat::{ChatMessage, Role, ToolDefinition};
use kestrel_domain::config::Config;
use kestrel_domain::error::{Error, Result};
use kestrel_gateway::orchestrator::{Orchestrator, WireEvent};
use kestrel_gateway::state::AppState;
use kestrel_providers::{ChatProvider, ChatResponse};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ScriptedProvider {
    chat_script: Mutex<VecDeque<String>>,
    tool_script: Mutex<VecDeque<String>>,
    chat_calls: AtomicUsize,
    tool_calls: AtomicUsize,
    /// Last user-message content handed to `chat`.
    chat_prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    fn new(
        chat: impl IntoIterator<Item = &'static str>,
        tools: impl IntoIterator<Item = &'static str>,
    ) -> Arc<Self> {
        Arc::new(Self {
            chat_script: Mutex::new(chat.into_iter().map(str::to_string).collect()),
            tool_script: Mutex::new(tools.into_iter().map(str::to_string).collect()),
            chat_calls: AtomicUsize::new(0),
            tool_calls: AtomicUsize::new(0),
            chat_prompts: Mutex::new(Vec::new()),
        })
    }

    fn total_llm_calls(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst) + self.tool_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ChatProvider for ScriptedProvider {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        _model_override: Option<&str>,
        _response_format: Option<&serde_json::Value>,
    ) -> Result<String> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(user) = messages.iter().rev().find(|m| m.role == Role::User) {
            self.chat_prompts.lock().push(user.content.clone());
        }
        self.chat_script
            .lock()
            .pop_front()
            .ok_or_else(|| Error::Http("chat script exhausted".into()))
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
            .map(|content| ChatResponse {
                content,
                tool_calls: Vec::new(),
            })
            .ok_or_else(|| Error::Http("tool script exhausted".into()))
    }

    fn supports_tool_call_messages(&self) -> bool {
        true
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const SINGLE_TASK_PLAN: &str = "<plan><intent>say hello</intent><confidence>0.9</confidence>\
    <task id=\"1\"><description>respond</description><criteria>response sent</criteria></task></plan>";
const CLARIFY_PLAN: &str =
    "<plan><intent>build api</intent><confidence>0.2</confidence><clarify>Which framework?</clarify></plan>";
const SUCCESS_RESULT: &str = "<result><status>success</status>\
    <summary>Hello! I can hear you loud and clear, ready to work.</summary></result>";

struct Harness {
    _root: TempDir,
    state: AppState,
    provider: Arc<ScriptedProvider>,
    session_id: String,
    session_cwd: std::path::PathBuf,
}

impl Harness {
    async fn new(provider: Arc<ScriptedProvider>) -> Self {
        let root = TempDir::new().unwrap();
        let root_str = root.path().display().to_string();
        let config = Arc::new(Config::from_vars(move |key| {
            (key == "KESTREL_WORKDIR").then(|| root_str.clone())
        }));

        let state = AppState::new(config, provider.clone(), None).unwrap();

        let cwd = root.path().join("proj").join("main");
        std::fs::create_dir_all(&cwd).unwrap();
        let entry = state.sessions.create_session(Some(cwd.as_path()), None).await.unwrap();
        let session_id = entry.id.clone();

        Self {
            _root: root,
            state,
            provider,
            session_id,
            session_cwd: cwd,
        }
    }

    /// Send one user message and collect every resulting wire frame.
    async fn send(&self, text: &str) -> Vec<WireEvent> {
        let orchestrator = Orchestrator::new(self.state.clone(), self.session_id.clone());
        let (tx, mut rx) = mpsc::channel(64);
        orchestrator.handle_user_message(text, &tx).await;
        drop(tx);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    fn transcript_types(&self) -> Vec<String> {
        self.state
            .sessions
            .get(&self.session_id)
            .unwrap()
            .transcript
            .read_raw()
            .iter()
            .map(|r| r.event_type.clone())
            .collect()
    }
}

fn events_of_type<'a>(events: &'a [WireEvent], ty: &str) -> Vec<&'a WireEvent> {
    events.iter().filter(|e| e.event_type == ty).collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenarios
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn plain_text_roundtrip_reaches_summary_without_error() {
    let provider = ScriptedProvider::new([SINGLE_TASK_PLAN], [SUCCESS_RESULT]);
    let harness = Harness::new(provider).await;

    let events = harness.send("Hello, can you hear me?").await;

    let assistants = events_of_type(&events, "assistant");
    assert!(
        assistants.iter().any(|e| e.content.len() > 20),
        "expected a substantive assistant event"
    );

    let summary_pos = events.iter().position(|e| e.event_type == "summary");
    let error_pos = events.iter().position(|e| e.event_type == "error");
    assert!(summary_pos.is_some(), "no summary event");
    if let Some(error_pos) = error_pos {
        assert!(summary_pos.unwrap() < error_pos, "error before summary");
    }

    // Summary is recorded via the typed helper.
    assert!(harness.transcript_types().contains(&"summary".to_string()));
}

#[tokio::test]
async fn detail_on_demand_streams_file_without_llm() {
    let provider = ScriptedProvider::new([], []);
    let harness = Harness::new(provider.clone()).await;
    std::fs::write(
        harness.session_cwd.join("detail_test.txt"),
        "line one\nline two\n",
    )
    .unwrap();

    let events = harness.send("read file detail_test.txt").await;

    let details = events_of_type(&events, "detail");
    assert!(!details.is_empty());
    let joined: String = details.iter().map(|e| e.content.as_str()).collect::<Vec<_>>().join("\n");
    assert!(joined.contains("line one"));
    assert!(joined.contains("line two"));

    assert_eq!(harness.provider.total_llm_calls(), 0, "detail path must not call the LLM");
}

#[tokio::test]
async fn detail_request_outside_cwd_is_refused() {
    let provider = ScriptedProvider::new([], []);
    let harness = Harness::new(provider.clone()).await;

    let events = harness.send("read file ../../../etc/passwd").await;
    let details = events_of_type(&events, "detail");
    assert_eq!(details.len(), 1);
    assert!(details[0].content.contains("only read files within"));
    assert_eq!(harness.provider.total_llm_calls(), 0);
}

#[tokio::test]
async fn large_files_are_chunked() {
    let provider = ScriptedProvider::new([], []);
    let harness = Harness::new(provider).await;
    let body = "x".repeat(3_000);
    std::fs::write(harness.session_cwd.join("big.txt"), &body).unwrap();

    let events = harness.send("read file big.txt").await;
    let details = events_of_type(&events, "detail");
    // Header + ceil(3000 / 1200) chunks.
    assert_eq!(details.len(), 1 + 3);
    for chunk in &details[1..] {
        assert!(chunk.content.len() <= 1_200);
    }
}

#[tokio::test]
async fn clarification_pauses_then_resumes_with_answer() {
    let provider = ScriptedProvider::new([CLARIFY_PLAN, SINGLE_TASK_PLAN], [SUCCESS_RESULT]);
    let harness = Harness::new(provider.clone()).await;

    // First utterance: the Manager asks for clarification.
    let events = harness.send("build me an api").await;
    let clarify: Vec<&WireEvent> = events
        .iter()
        .filter(|e| e.content.starts_with("I need clarification:"))
        .collect();
    assert_eq!(clarify.len(), 1);
    assert_eq!(clarify[0].role, "controller");
    assert!(
        !events.iter().any(|e| e.event_type == "task_start"),
        "no task may run before clarification"
    );
    assert_eq!(harness.provider.tool_calls.load(Ordering::SeqCst), 0);

    // Second utterance is absorbed as the answer.
    let events = harness.send("Use FastAPI").await;
    assert!(
        !events.iter().any(|e| e.content.starts_with("I need clarification:")),
        "no second clarification expected"
    );
    assert!(events.iter().any(|e| e.event_type == "summary"));

    let prompts = harness.provider.chat_prompts.lock().clone();
    let resumed = prompts.last().unwrap();
    assert!(resumed.contains("build me an api"));
    assert!(resumed.contains("User clarification: Use FastAPI"));
}

#[tokio::test]
async fn replace_request_clears_pending_clarification() {
    let provider = ScriptedProvider::new([CLARIFY_PLAN, SINGLE_TASK_PLAN], [SUCCESS_RESULT]);
    let harness = Harness::new(provider.clone()).await;

    harness.send("build me an api").await;
    harness.send("start over, just say hi").await;

    let prompts = harness.provider.chat_prompts.lock().clone();
    let last = prompts.last().unwrap();
    assert!(
        !last.contains("User clarification"),
        "replace request must not resume the pending clarification"
    );
    assert!(last.contains("start over, just say hi"));
}

#[tokio::test]
async fn tool_events_are_recorded_with_structured_metadata() {
    let provider = ScriptedProvider::new(
        [SINGLE_TASK_PLAN],
        [
            // One tagged tool call, then the structured result.
            "<tool_call>{\"name\": \"list_dir\", \"arguments\": {\"path\": \".\"}}</tool_call>",
            SUCCESS_RESULT,
        ],
    );
    let harness = Harness::new(provider).await;

    let events = harness.send("look around").await;

    // Wire frames use the UI-facing "tool" type.
    let tool_frames = events_of_type(&events, "tool");
    assert_eq!(tool_frames.len(), 2);
    assert!(tool_frames[0].content.starts_with("Tool request: list_dir"));
    assert!(tool_frames[1].content.starts_with("Tool response ✓: list_dir"));

    // The transcript keeps the typed records with correlated call ids.
    let entry = harness.state.sessions.get(&harness.session_id).unwrap();
    let raw = entry.transcript.read_raw();
    let call = raw.iter().find(|r| r.event_type == "tool_call").unwrap();
    let result = raw.iter().find(|r| r.event_type == "tool_result").unwrap();
    assert_eq!(call.metadata["tool_name"], "list_dir");
    assert_eq!(call.metadata["call_id"], result.metadata["call_id"]);
    assert_eq!(result.metadata["success"], true);
    assert!(result.metadata["duration_ms"].is_u64());
}

#[tokio::test]
async fn welcome_pair_is_sent_once() {
    let provider = ScriptedProvider::new([], []);
    let harness = Harness::new(provider).await;

    let orchestrator = Orchestrator::new(harness.state.clone(), harness.session_id.clone());
    let (tx, mut rx) = mpsc::channel(64);
    orchestrator.send_welcome(&tx).await;
    orchestrator.send_welcome(&tx).await;
    drop(tx);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }

    // Hello + cwd, exactly once.
    assert_eq!(events.len(), 2);
    assert!(events[0].content.contains("Kestrel"));
    assert!(events[1].content.contains("Working directory:"));

    // session_created system record precedes the welcome pair.
    let types = harness.transcript_types();
    assert_eq!(types, vec!["system", "system", "system"]);
    let entry = harness.state.sessions.get(&harness.session_id).unwrap();
    let raw = entry.transcript.read_raw();
    assert_eq!(raw[0].metadata["event"], "session_created");
}

#[tokio::test]
async fn killed_session_ignores_further_messages() {
    let provider = ScriptedProvider::new([], []);
    let harness = Harness::new(provider.clone()).await;

    harness.state.sessions.kill(&harness.session_id);
    let events = harness.send("hello?").await;
    assert!(events.is_empty());
    assert_eq!(harness.provider.total_llm_calls(), 0);
}

#[tokio::test]
async fn plan_frame_is_recorded_as_controller_assistant(
) {
    let provider = ScriptedProvider::new([SINGLE_TASK_PLAN], [SUCCESS_RESULT]);
    let harness = Harness::new(provider).await;

    let events = harness.send("do the thing").await;
    let plan_frame = events
        .iter()
        .find(|e| e.content.starts_with("Proposed plan"))
        .expect("plan frame");
    assert_eq!(plan_frame.event_type, "assistant");
    assert_eq!(plan_frame.role, "controller");
    assert_eq!(plan_frame.source, "controller");

    // Recorded form feeds the context-seed scan after restart.
    let entry = harness.state.sessions.get(&harness.session_id).unwrap();
    let recorded = entry
        .transcript
        .read_raw()
        .into_iter()
        .find(|r| r.decode_body().starts_with("Proposed plan"))
        .expect("recorded plan");
    assert_eq!(recorded.source, "controller");
}
