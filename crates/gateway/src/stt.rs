//! Speech-to-text interface.
//!
//! The engine itself is an external collaborator; the gateway only needs
//! `audio bytes → transcript + metadata`. Deployments inject an
//! implementation into [`crate::state::AppState`]; without one the audio
//! endpoint reports 503.

use kestrel_domain::error::Result;

#[derive(Debug, Clone)]
pub struct Transcription {
    pub text: String,
    /// Duration of the decoded audio, if the engine reports it.
    pub audio_duration_ms: Option<u64>,
    pub language: Option<String>,
    pub confidence: Option<f64>,
}

#[async_trait::async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &[u8]) -> Result<Transcription>;
}
