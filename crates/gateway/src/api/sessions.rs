//! Session management endpoints.

use std::path::Path;
use std::time::Instant;

use axum::extract::{Multipart, Path as UrlPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use crate::api::api_error;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /session/create
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub copy_from_path: Option<String>,
}

pub async fn create_session(
    State(state): State<AppState>,
    Json(config): Json<SessionConfig>,
) -> impl IntoResponse {
    // "." means "give me a fresh project", same as omitting cwd.
    let cwd = config.cwd.filter(|c| c != ".");
    if let Some(cwd) = &cwd {
        if !Path::new(cwd).exists() {
            return api_error(
                StatusCode::BAD_REQUEST,
                format!("Directory {cwd} does not exist"),
            );
        }
    }

    let result = state
        .sessions
        .create_session(
            cwd.as_deref().map(Path::new),
            config.copy_from_path.as_deref().map(Path::new),
        )
        .await;

    match result {
        Ok(entry) => Json(serde_json::json!({
            "session_id": entry.id,
            "cwd": entry.cwd.display().to_string(),
        }))
        .into_response(),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.sessions.list())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /session/:id/rename
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct RenameConfig {
    pub name: String,
}

pub async fn rename_session(
    State(state): State<AppState>,
    UrlPath(session_id): UrlPath<String>,
    Json(config): Json<RenameConfig>,
) -> impl IntoResponse {
    if state.sessions.rename(&session_id, &config.name) {
        Json(serde_json::json!({
            "status": "renamed",
            "session_id": session_id,
            "new_name": config.name,
        }))
        .into_response()
    } else {
        api_error(StatusCode::NOT_FOUND, "Session not found")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DELETE /session/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn kill_session(
    State(state): State<AppState>,
    UrlPath(session_id): UrlPath<String>,
) -> impl IntoResponse {
    // Cancel any in-flight Manager/Coder work before removing the entry.
    state.cancel_map.cancel(&session_id);
    state.cancel_map.remove(&session_id);

    if state.sessions.kill(&session_id) {
        Json(serde_json::json!({
            "status": "terminated",
            "session_id": session_id,
        }))
        .into_response()
    } else {
        api_error(StatusCode::NOT_FOUND, "Session not found")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /session/:id/transcript (+ /download)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn get_transcript(
    State(state): State<AppState>,
    UrlPath(session_id): UrlPath<String>,
) -> impl IntoResponse {
    match state.sessions.get_transcript(&session_id) {
        Ok(events) => Json(events).into_response(),
        Err(_) => api_error(StatusCode::NOT_FOUND, "Session not found"),
    }
}

pub async fn download_transcript(
    State(state): State<AppState>,
    UrlPath(session_id): UrlPath<String>,
) -> impl IntoResponse {
    let events = match state.sessions.get_transcript(&session_id) {
        Ok(events) => events,
        Err(_) => return api_error(StatusCode::NOT_FOUND, "Session not found"),
    };

    let mut lines = Vec::new();
    for event in events {
        let content = event.content.trim_end();
        if content.is_empty() {
            continue;
        }
        lines.push(format!("[{}/{}] {content}", event.source, event.role));
    }
    lines.join("\n\n").into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /session/:id/event
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ClientEventRequest {
    #[serde(rename = "type")]
    pub event_type: String,
    pub role: String,
    pub source: String,
    pub content: String,
}

/// Record an externally-generated event (browser STT, UI actions).
pub async fn record_client_event(
    State(state): State<AppState>,
    UrlPath(session_id): UrlPath<String>,
    Json(request): Json<ClientEventRequest>,
) -> impl IntoResponse {
    let recorded = state.sessions.record_event(
        &session_id,
        &request.event_type,
        &request.role,
        Some(request.source.as_str()),
        &request.content,
        serde_json::json!({}),
    );
    match recorded {
        Ok(()) => Json(serde_json::json!({ "status": "recorded" })).into_response(),
        Err(_) => api_error(StatusCode::NOT_FOUND, "Session not found"),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /session/:id/audio
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const ALLOWED_AUDIO_TYPES: &[&str] = &[
    "audio/wav",
    "audio/x-wav",
    "audio/wave",
    "audio/mpeg",
    "audio/mp3",
    "audio/webm",
    "audio/ogg",
    "audio/flac",
    "audio/x-m4a",
    "audio/mp4",
];
const ALLOWED_AUDIO_EXTS: &[&str] = &[".wav", ".mp3", ".webm", ".ogg", ".flac", ".m4a"];

/// Upload audio, transcribe it, and record the `stt_raw` event.
pub async fn transcribe_audio(
    State(state): State<AppState>,
    UrlPath(session_id): UrlPath<String>,
    mut multipart: Multipart,
) -> impl IntoResponse {
    if state.sessions.get(&session_id).is_none() {
        return api_error(StatusCode::NOT_FOUND, "Session not found");
    }
    let Some(transcriber) = state.transcriber.clone() else {
        return api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "STT not available: no transcriber configured",
        );
    };

    // Pull the audio part out of the form.
    let mut audio: Option<(Vec<u8>, Option<String>, Option<String>)> = None;
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() == Some("audio") {
            let content_type = field.content_type().map(str::to_string);
            let file_name = field.file_name().map(str::to_string);
            match field.bytes().await {
                Ok(bytes) => audio = Some((bytes.to_vec(), content_type, file_name)),
                Err(e) => {
                    return api_error(StatusCode::BAD_REQUEST, format!("Invalid upload: {e}"))
                }
            }
            break;
        }
    }
    let Some((bytes, content_type, file_name)) = audio else {
        return api_error(StatusCode::BAD_REQUEST, "Missing 'audio' form field");
    };

    // Validate by content type, falling back to the file extension.
    let type_ok = content_type
        .as_deref()
        .map(|ct| ALLOWED_AUDIO_TYPES.contains(&ct))
        .unwrap_or(false);
    let ext_ok = file_name
        .as_deref()
        .map(|name| {
            let lowered = name.to_lowercase();
            ALLOWED_AUDIO_EXTS.iter().any(|ext| lowered.ends_with(ext))
        })
        .unwrap_or(false);
    if !type_ok && !ext_ok {
        return api_error(
            StatusCode::BAD_REQUEST,
            format!(
                "Unsupported audio type: {}. Use wav, mp3, webm, ogg, flac, or m4a.",
                content_type.as_deref().unwrap_or("unknown")
            ),
        );
    }

    let start = Instant::now();
    let transcription = match transcriber.transcribe(&bytes).await {
        Ok(transcription) => transcription,
        Err(e) => {
            return api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Transcription failed: {e}"),
            )
        }
    };
    let transcribe_time_ms = start.elapsed().as_millis() as u64;

    let model = state.config.whisper_model.clone();
    if let Err(e) = state.sessions.record_stt_raw(
        &session_id,
        &transcription.text,
        "whisper",
        transcription.audio_duration_ms,
        Some(model.as_str()),
        transcription.language.as_deref(),
        transcription.confidence,
    ) {
        tracing::warn!(session_id = %session_id, error = %e, "failed to record stt_raw event");
    }

    Json(serde_json::json!({
        "transcript": transcription.text,
        "duration_ms": transcription.audio_duration_ms,
        "transcribe_time_ms": transcribe_time_ms,
        "model": model,
    }))
    .into_response()
}
