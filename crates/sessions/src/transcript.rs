//! Append-only JSONL transcripts.
//!
//! Each event is one JSON line: `ts`, `type`, `role`, `source`, `metadata`,
//! and a base64-encoded body (`body_b64`) so arbitrary UTF-8 — newlines
//! included — stays single-line safe. Readers tolerate missing optional
//! fields and skip malformed lines.

use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};

use base64::Engine;
use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use kestrel_domain::chat::ChatMessage;
use kestrel_domain::error::{Error, Result};

/// How many recent events the in-memory ring mirrors for fast read-back.
const RING_CAPACITY: usize = 512;

fn b64() -> &'static base64::engine::GeneralPurpose {
    &base64::engine::general_purpose::STANDARD
}

/// Current UTC timestamp, RFC 3339 with millisecond precision.
pub fn now_ts() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One transcript line as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(default = "now_ts")]
    pub ts: String,
    #[serde(rename = "type", default)]
    pub event_type: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub body_b64: String,
}

impl EventRecord {
    /// Build a record from plain content, stamping the timestamp and
    /// encoding the body. `source` falls back to role, then type.
    pub fn new(
        event_type: &str,
        role: &str,
        source: Option<&str>,
        content: &str,
        metadata: serde_json::Value,
    ) -> Self {
        let source = source
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .or_else(|| (!role.is_empty()).then(|| role.to_string()))
            .or_else(|| (!event_type.is_empty()).then(|| event_type.to_string()))
            .unwrap_or_else(|| "unknown".to_string());

        Self {
            ts: now_ts(),
            event_type: event_type.to_string(),
            role: role.to_string(),
            source,
            metadata,
            body_b64: b64().encode(content.as_bytes()),
        }
    }

    /// Decode the body back to UTF-8. Undecodable bodies come back empty.
    pub fn decode_body(&self) -> String {
        b64()
            .decode(self.body_b64.as_bytes())
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default()
    }
}

/// A decoded event, as served to clients.
#[derive(Debug, Clone, Serialize)]
pub struct DecodedEvent {
    pub ts: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub role: String,
    pub source: String,
    pub metadata: serde_json::Value,
    pub content: String,
}

impl From<&EventRecord> for DecodedEvent {
    fn from(record: &EventRecord) -> Self {
        Self {
            ts: record.ts.clone(),
            event_type: record.event_type.clone(),
            role: record.role.clone(),
            source: record.source.clone(),
            metadata: record.metadata.clone(),
            content: record.decode_body(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transcript log
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The durable event log of one session.
///
/// Appends are serialized through an internal mutex held across the file
/// write, so per-session event order is total. A bounded ring mirrors the
/// most recent events for read paths that should not reparse the file.
pub struct TranscriptLog {
    path: PathBuf,
    ring: Mutex<VecDeque<EventRecord>>,
}

impl TranscriptLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ring: Mutex::new(VecDeque::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record: a single JSON line, then mirror into the ring.
    pub fn append(&self, record: EventRecord) -> Result<()> {
        let line = serde_json::to_string(&record)?;

        let mut ring = self.ring.lock();
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(Error::Io)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(Error::Io)?;
        file.write_all(line.as_bytes()).map_err(Error::Io)?;
        file.write_all(b"\n").map_err(Error::Io)?;

        if ring.len() == RING_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(record);
        Ok(())
    }

    /// Most recent events from the in-memory ring (newest last).
    pub fn recent(&self, max: usize) -> Vec<EventRecord> {
        let ring = self.ring.lock();
        ring.iter().rev().take(max).rev().cloned().collect()
    }

    /// Read all records from disk, falling back to the ring when the file
    /// is missing or unreadable.
    pub fn read_raw(&self) -> Vec<EventRecord> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => parse_jsonl(&raw),
            Err(_) => self.ring.lock().iter().cloned().collect(),
        }
    }

    /// Decoded, aggregated transcript as served over HTTP.
    pub fn read_aggregated(&self) -> Vec<DecodedEvent> {
        let decoded: Vec<DecodedEvent> = self.read_raw().iter().map(DecodedEvent::from).collect();
        aggregate(decoded)
    }
}

fn parse_jsonl(raw: &str) -> Vec<EventRecord> {
    let mut records = Vec::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<EventRecord>(line) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed transcript line");
            }
        }
    }
    records
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Aggregation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Event types whose consecutive runs are merged on read-back.
fn mergeable(event_type: &str) -> bool {
    matches!(event_type, "assistant" | "detail" | "system")
}

/// Join two content chunks without doubling whitespace across sentence
/// punctuation.
fn merge_text(prev: &str, next: &str) -> String {
    if prev.is_empty() {
        return next.to_string();
    }
    if next.is_empty() {
        return prev.to_string();
    }
    if prev.ends_with('\n') || prev.ends_with(' ') {
        return format!("{prev}{next}");
    }
    let joins_tight = next
        .chars()
        .next()
        .map(|c| " \n\t'.,!?:;)]}%".contains(c))
        .unwrap_or(false);
    if joins_tight {
        format!("{prev}{next}")
    } else {
        format!("{prev} {next}")
    }
}

/// Merge consecutive events sharing `(type, role, source)` when the type
/// is mergeable; empty-content events are dropped. All other events pass
/// through unchanged, preserving boundary order.
pub fn aggregate(events: Vec<DecodedEvent>) -> Vec<DecodedEvent> {
    let mut aggregated: Vec<DecodedEvent> = Vec::new();
    let mut buffer: Option<DecodedEvent> = None;

    for event in events {
        if event.content.is_empty() {
            continue;
        }

        if let Some(buf) = &mut buffer {
            let same_key = buf.event_type == event.event_type
                && buf.role == event.role
                && buf.source == event.source;
            if same_key && mergeable(&event.event_type) {
                buf.content = merge_text(&buf.content, &event.content);
                buf.ts = event.ts;
                continue;
            }
        }

        if let Some(buf) = buffer.take() {
            aggregated.push(buf);
        }
        buffer = Some(event);
    }

    if let Some(buf) = buffer {
        aggregated.push(buf);
    }
    aggregated
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context-seed reconstruction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Scan a transcript for the last user request and the last proposed plan.
pub fn extract_context_seed(path: &Path) -> String {
    let Ok(raw) = std::fs::read_to_string(path) else {
        return String::new();
    };

    let mut last_user: Option<String> = None;
    let mut last_plan: Option<String> = None;
    for record in parse_jsonl(&raw) {
        let content = record.decode_body();
        if content.is_empty() {
            continue;
        }
        if record.role == "user" {
            last_user = Some(content.clone());
        }
        if record.source == "controller" && content.contains("Proposed plan") {
            last_plan = Some(content);
        }
    }

    let mut parts = Vec::new();
    if let Some(user) = last_user {
        parts.push(format!("Last user request: {user}"));
    }
    if let Some(plan) = last_plan {
        parts.push(format!("Last plan:\n{plan}"));
    }
    parts.join("\n").trim().to_string()
}

/// Extract up to `max_events` trailing user/assistant turns, in original
/// order, to seed a rehydrated session's conversation history.
pub fn extract_history_seed(path: &Path, max_events: usize) -> Vec<ChatMessage> {
    let Ok(raw) = std::fs::read_to_string(path) else {
        return Vec::new();
    };

    let mut seeded: Vec<ChatMessage> = Vec::new();
    for record in parse_jsonl(&raw).iter().rev() {
        if seeded.len() >= max_events {
            break;
        }
        let content = record.decode_body();
        if content.is_empty() {
            continue;
        }
        match record.role.as_str() {
            "user" => seeded.push(ChatMessage::user(content)),
            "assistant" => seeded.push(ChatMessage::assistant(content)),
            _ => {}
        }
    }
    seeded.reverse();
    seeded
}
