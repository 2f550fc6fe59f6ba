//! One-shot summarization endpoint.

use axum::extract::State;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SummarizeRequest {
    pub text: String,
}

/// POST /summarize — voice-safe "I did / I learned / Next?" recap.
///
/// The summarizer normalizes internally and falls back deterministically,
/// so this endpoint cannot fail on bad LLM output.
pub async fn summarize_text(
    State(state): State<AppState>,
    Json(request): Json<SummarizeRequest>,
) -> impl IntoResponse {
    let summary = state.summarizer.summarize(&request.text).await;
    Json(serde_json::json!({ "summary": summary }))
}
