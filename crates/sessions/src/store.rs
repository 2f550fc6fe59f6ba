//! Session registry and typed event recording.
//!
//! The store owns every `SessionEntry` and its transcript log. Creation
//! has three modes: new project (generated name + `git init`), clone from
//! an existing branch, or attach to an explicit directory. On creation
//! against a non-empty transcript the session rehydrates: last user
//! request + last proposed plan become the context seed, and up to six
//! trailing user/assistant turns seed the conversation history.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;

use kestrel_domain::error::{Error, Result};
use kestrel_domain::session::AgentSession;

use crate::notes::{self, NoteSection, ToolCallNote};
use crate::transcript::{
    extract_context_seed, extract_history_seed, DecodedEvent, EventRecord, TranscriptLog,
};
use crate::workspace::Workspace;

const HISTORY_SEED_MAX: usize = 6;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session entry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SessionEntry {
    pub id: String,
    name: Mutex<String>,
    pub cwd: PathBuf,
    pub project_root: Option<PathBuf>,
    pub branch_name: Option<String>,
    pub session: Arc<AgentSession>,
    pub transcript: TranscriptLog,
    pub context_seed: Option<String>,
    welcome_sent: AtomicBool,
    pending_clarify: Mutex<Option<String>>,
}

impl SessionEntry {
    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    pub fn set_name(&self, name: &str) {
        *self.name.lock() = name.to_string();
    }

    pub fn welcome_sent(&self) -> bool {
        self.welcome_sent.load(Ordering::Acquire)
    }

    pub fn mark_welcome_sent(&self) {
        self.welcome_sent.store(true, Ordering::Release);
    }

    /// Store the original request awaiting a clarification answer.
    pub fn set_pending_clarify(&self, original_request: String) {
        *self.pending_clarify.lock() = Some(original_request);
    }

    /// Take (and clear) the pending clarification, if any.
    pub fn take_pending_clarify(&self) -> Option<String> {
        self.pending_clarify.lock().take()
    }

    pub fn clear_pending_clarify(&self) {
        *self.pending_clarify.lock() = None;
    }
}

/// Listing shape for `GET /sessions`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub alive: bool,
    pub name: String,
    pub cwd: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SessionStore {
    workspace: Workspace,
    sessions_dir: PathBuf,
    sessions: RwLock<HashMap<String, Arc<SessionEntry>>>,
}

impl SessionStore {
    pub fn new(workdir_root: impl Into<PathBuf>) -> Result<Self> {
        let root: PathBuf = workdir_root.into();
        let sessions_dir = root.join("sessions");
        std::fs::create_dir_all(&sessions_dir).map_err(Error::Io)?;

        tracing::info!(root = %root.display(), "session store ready");
        Ok(Self {
            workspace: Workspace::new(root),
            sessions_dir,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    // ── Creation ───────────────────────────────────────────────────

    /// Create a session: attach to `cwd`, clone from `copy_from`, or start
    /// a fresh project.
    pub async fn create_session(
        &self,
        cwd: Option<&Path>,
        copy_from: Option<&Path>,
    ) -> Result<Arc<SessionEntry>> {
        let id = uuid::Uuid::new_v4().to_string();
        let root = self.workspace.root().to_path_buf();

        let (final_cwd, name) = if let Some(cwd) = cwd {
            // Attach to an explicit directory; derive project/branch name
            // from the path when it sits inside the workspace tree.
            let name = match cwd.parent() {
                Some(parent) if parent.parent() == Some(root.as_path()) => format!(
                    "{}/{}",
                    parent.file_name().unwrap_or_default().to_string_lossy(),
                    cwd.file_name().unwrap_or_default().to_string_lossy(),
                ),
                _ => cwd
                    .file_name()
                    .unwrap_or_default()
                    .to_string_lossy()
                    .into_owned(),
            };
            (cwd.to_path_buf(), name)
        } else if let Some(source) = copy_from {
            let (branch, dir) = self.workspace.clone_into_branch(source).await?;
            let project = source
                .parent()
                .and_then(|p| p.file_name())
                .unwrap_or_default()
                .to_string_lossy()
                .into_owned();
            (dir, format!("{project}/{branch}"))
        } else {
            let (project, dir) = self.workspace.init_project().await?;
            (dir, format!("{project}/main"))
        };

        if !final_cwd.exists() {
            std::fs::create_dir_all(&final_cwd).map_err(Error::Io)?;
        }

        let project_root = self.resolve_project_root(&final_cwd);
        let branch_name = match &project_root {
            Some(project_root) if final_cwd.starts_with(project_root) => final_cwd
                .file_name()
                .map(|n| n.to_string_lossy().into_owned()),
            _ => None,
        };

        let transcript_path = self.transcript_path(&id, project_root.as_deref(), branch_name.as_deref());
        let session = Arc::new(AgentSession::new(&final_cwd));

        let mut context_seed = None;
        let mut welcome_sent = false;
        if transcript_path.exists() {
            let seed = extract_context_seed(&transcript_path);
            if !seed.is_empty() {
                context_seed = Some(seed);
            }
            session.extend_history(extract_history_seed(&transcript_path, HISTORY_SEED_MAX));
            welcome_sent = transcript_path
                .metadata()
                .map(|m| m.len() > 0)
                .unwrap_or(false);
        }

        let entry = Arc::new(SessionEntry {
            id: id.clone(),
            name: Mutex::new(name.clone()),
            cwd: final_cwd.clone(),
            project_root,
            branch_name,
            session,
            transcript: TranscriptLog::new(transcript_path),
            context_seed,
            welcome_sent: AtomicBool::new(welcome_sent),
            pending_clarify: Mutex::new(None),
        });

        self.sessions.write().insert(id.clone(), entry.clone());
        tracing::info!(session_id = %id, name = %name, cwd = %final_cwd.display(), "created session");
        Ok(entry)
    }

    fn resolve_project_root(&self, cwd: &Path) -> Option<PathBuf> {
        let rel = cwd.strip_prefix(self.workspace.root()).ok()?;
        let mut components = rel.components();
        let project = components.next()?;
        // Needs at least project/branch below the root.
        components.next()?;
        Some(self.workspace.root().join(project))
    }

    fn transcript_path(
        &self,
        session_id: &str,
        project_root: Option<&Path>,
        branch_name: Option<&str>,
    ) -> PathBuf {
        match project_root {
            Some(project_root) => {
                let dir = project_root.join(".kestrel");
                let file = match branch_name {
                    Some(branch) => format!("{branch}.jsonl"),
                    None => format!("{session_id}.jsonl"),
                };
                dir.join(file)
            }
            None => self.sessions_dir.join(format!("{session_id}.jsonl")),
        }
    }

    // ── Registry ───────────────────────────────────────────────────

    pub fn get(&self, session_id: &str) -> Option<Arc<SessionEntry>> {
        self.sessions.read().get(session_id).cloned()
    }

    fn require(&self, session_id: &str) -> Result<Arc<SessionEntry>> {
        self.get(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        self.sessions
            .read()
            .values()
            .map(|entry| SessionInfo {
                id: entry.id.clone(),
                alive: true,
                name: entry.name(),
                cwd: entry.cwd.display().to_string(),
            })
            .collect()
    }

    pub fn rename(&self, session_id: &str, new_name: &str) -> bool {
        match self.get(session_id) {
            Some(entry) => {
                entry.set_name(new_name);
                tracing::info!(session_id, new_name, "renamed session");
                true
            }
            None => false,
        }
    }

    /// Remove a session from the registry. In-flight work bound to it is
    /// cancelled by the caller (the gateway's cancel map).
    pub fn kill(&self, session_id: &str) -> bool {
        let removed = self.sessions.write().remove(session_id).is_some();
        if removed {
            tracing::info!(session_id, "killed session");
        }
        removed
    }

    /// Kill every session whose cwd lives under `dir` (project/branch
    /// deletion). Returns the killed ids.
    pub fn kill_sessions_under(&self, dir: &Path) -> Vec<String> {
        let doomed: Vec<String> = self
            .sessions
            .read()
            .values()
            .filter(|entry| entry.cwd.starts_with(dir))
            .map(|entry| entry.id.clone())
            .collect();
        for id in &doomed {
            self.kill(id);
        }
        doomed
    }

    pub fn shutdown_all(&self) {
        let ids: Vec<String> = self.sessions.read().keys().cloned().collect();
        for id in ids {
            self.kill(&id);
        }
    }

    // ── Event recording ────────────────────────────────────────────

    /// The single append path every helper funnels through.
    pub fn record_event(
        &self,
        session_id: &str,
        event_type: &str,
        role: &str,
        source: Option<&str>,
        content: &str,
        metadata: Value,
    ) -> Result<()> {
        let entry = self.require(session_id)?;
        entry
            .transcript
            .append(EventRecord::new(event_type, role, source, content, metadata))
    }

    /// Raw speech-to-text transcript.
    #[allow(clippy::too_many_arguments)]
    pub fn record_stt_raw(
        &self,
        session_id: &str,
        transcript: &str,
        source: &str,
        audio_duration_ms: Option<u64>,
        model: Option<&str>,
        language: Option<&str>,
        confidence: Option<f64>,
    ) -> Result<()> {
        let mut metadata = serde_json::Map::new();
        if let Some(ms) = audio_duration_ms {
            metadata.insert("audio_duration_ms".into(), ms.into());
        }
        if let Some(model) = model {
            metadata.insert("model".into(), model.into());
        }
        if let Some(language) = language {
            metadata.insert("language".into(), language.into());
        }
        if let Some(confidence) = confidence {
            metadata.insert("confidence".into(), confidence.into());
        }
        self.record_event(
            session_id,
            "stt_raw",
            "user",
            Some(source),
            transcript,
            Value::Object(metadata),
        )
    }

    /// The interpreted user request that actually drives a turn.
    pub fn record_user_intent(&self, session_id: &str, text: &str) -> Result<()> {
        self.record_event(
            session_id,
            "user_intent",
            "user",
            Some("controller"),
            text,
            serde_json::json!({}),
        )
    }

    /// Free-form agent output chunks.
    pub fn record_agent_stream(
        &self,
        session_id: &str,
        role: &str,
        source: &str,
        content: &str,
        task_id: Option<&str>,
    ) -> Result<()> {
        let metadata = match task_id {
            Some(task_id) => serde_json::json!({ "task_id": task_id }),
            None => serde_json::json!({}),
        };
        self.record_event(session_id, "agent_stream", role, Some(source), content, metadata)
    }

    /// A tool invocation request. `arguments` is the rendered JSON body.
    pub fn record_tool_call(
        &self,
        session_id: &str,
        tool_name: &str,
        arguments: &str,
        call_id: &str,
        source: &str,
        task_id: Option<&str>,
    ) -> Result<()> {
        let mut metadata = serde_json::json!({
            "tool_name": tool_name,
            "call_id": call_id,
        });
        if let Some(task_id) = task_id {
            metadata["task_id"] = task_id.into();
        }
        self.record_event(session_id, "tool_call", "system", Some(source), arguments, metadata)
    }

    /// A tool result, correlated to its call by `call_id`.
    pub fn record_tool_result(
        &self,
        session_id: &str,
        tool_name: &str,
        result: &str,
        call_id: &str,
        success: bool,
        duration_ms: Option<u64>,
    ) -> Result<()> {
        let mut metadata = serde_json::json!({
            "tool_name": tool_name,
            "call_id": call_id,
            "success": success,
        });
        if let Some(ms) = duration_ms {
            metadata["duration_ms"] = ms.into();
        }
        self.record_event(
            session_id,
            "tool_result",
            "system",
            Some("tool_runner"),
            result,
            metadata,
        )
    }

    /// End-of-request summary. Also appends a section to the branch's
    /// daily markdown notes.
    pub fn record_summary(
        &self,
        session_id: &str,
        summary: &str,
        task_id: Option<&str>,
        files_changed: &[String],
    ) -> Result<()> {
        let entry = self.require(session_id)?;

        let mut metadata = serde_json::json!({ "files_changed": files_changed });
        if let Some(task_id) = task_id {
            metadata["task_id"] = task_id.into();
        }
        entry.transcript.append(EventRecord::new(
            "summary",
            "assistant",
            Some("summarizer"),
            summary,
            metadata,
        ))?;

        if let (Some(project_root), Some(branch)) = (&entry.project_root, &entry.branch_name) {
            let section = build_note_section(&entry, summary, files_changed);
            let notes_dir = project_root.join(".kestrel").join("notes").join(branch);
            if let Err(e) = notes::append_summary_note(&notes_dir, &section) {
                tracing::warn!(session_id = %session_id, error = %e, "failed to append daily note");
            }
        }
        Ok(())
    }

    /// Operational system event (`session_created`, skips, warnings).
    pub fn record_system_event(
        &self,
        session_id: &str,
        content: &str,
        event: &str,
        severity: &str,
    ) -> Result<()> {
        self.record_event(
            session_id,
            "system",
            "system",
            Some("system"),
            content,
            serde_json::json!({ "event": event, "severity": severity }),
        )
    }

    /// Decoded, aggregated transcript for a session.
    pub fn get_transcript(&self, session_id: &str) -> Result<Vec<DecodedEvent>> {
        Ok(self.require(session_id)?.transcript.read_aggregated())
    }
}

/// Gather the note material for the current interaction: everything since
/// the most recent user event in the transcript ring.
fn build_note_section(entry: &SessionEntry, summary: &str, files_changed: &[String]) -> NoteSection {
    let recent = entry.transcript.recent(256);
    let user_idx = recent
        .iter()
        .rposition(|r| r.role == "user")
        .unwrap_or(0);

    let user_request = recent[user_idx..]
        .iter()
        .find(|r| r.role == "user")
        .map(|r| r.decode_body());

    let planning = recent[user_idx..]
        .iter()
        .filter(|r| r.event_type == "planning")
        .last()
        .map(|r| r.decode_body());

    let tool_calls = recent[user_idx..]
        .iter()
        .filter(|r| r.event_type == "tool_result")
        .map(|r| ToolCallNote {
            tool_name: r.metadata["tool_name"].as_str().unwrap_or("unknown").to_string(),
            success: r.metadata["success"].as_bool().unwrap_or(true),
            duration_ms: r.metadata["duration_ms"].as_u64(),
        })
        .collect();

    NoteSection {
        user_request,
        planning,
        tool_calls,
        summary: summary.to_string(),
        files_changed: files_changed.to_vec(),
    }
}
