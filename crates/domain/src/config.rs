//! Environment-driven configuration.
//!
//! Every knob has a documented default so a bare `kestrel serve` works
//! against a local OpenAI-compatible endpoint.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

/// Per-invocation timeout for `shell`.
pub const SHELL_TIMEOUT: Duration = Duration::from_secs(60);
/// Per-invocation timeout for `run_tests`.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(120);
/// Timeout for a single LLM chat call.
pub const LLM_TIMEOUT: Duration = Duration::from_secs(300);
/// Timeout for the summarizer's LLM call.
pub const SUMMARIZER_TIMEOUT: Duration = Duration::from_secs(30);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Connection settings for the OpenAI-compatible chat endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct LlmConfig {
    /// Base URL, no trailing slash (e.g. `http://localhost:8080`).
    pub base_url: String,
    /// Bearer token, if the endpoint requires one.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Default model for the Coder.
    pub model: String,
    /// Model used by the Manager for intent decomposition.
    pub manager_model: String,
    /// Model used by the Summarizer.
    pub summarizer_model: String,
    /// Whether the endpoint accepts `tool`-role messages in history.
    /// When false, tool results are serialized into `system` messages.
    pub supports_tool_call_messages: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub llm: LlmConfig,
    /// Root of the project/branch workspace tree.
    pub workdir_root: PathBuf,
    /// HTTP/WebSocket listen address.
    pub bind_addr: String,
    /// STT model label, recorded in `stt_raw` event metadata.
    pub whisper_model: String,
}

const DEFAULT_MODEL: &str = "qwen3-coder:30b";

impl Config {
    /// Build from process environment.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup (testable without touching
    /// the process environment).
    pub fn from_vars(get: impl Fn(&str) -> Option<String>) -> Self {
        let base_url = get("LLM_API_URL")
            .unwrap_or_else(|| "http://localhost:8080".into())
            .trim_end_matches('/')
            .to_string();

        let model = get("LLM_MODEL").unwrap_or_else(|| DEFAULT_MODEL.into());
        let manager_model = get("LLM_MANAGER_MODEL").unwrap_or_else(|| model.clone());
        let summarizer_model = get("LLM_SUMMARIZER_MODEL").unwrap_or_else(|| model.clone());

        // llama.cpp servers reject `tool`-role history messages; everything
        // else speaks the standard contract unless explicitly overridden.
        let supports_tool_call_messages = match get("LLM_TOOL_CALL_MESSAGES") {
            Some(raw) => !matches!(raw.trim().to_lowercase().as_str(), "0" | "false" | "no"),
            None => !base_url.contains("llama-cpp"),
        };

        let workdir_root = get("KESTREL_WORKDIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

        Self {
            llm: LlmConfig {
                base_url,
                api_key: get("LLM_API_KEY"),
                model,
                manager_model,
                summarizer_model,
                supports_tool_call_messages,
            },
            workdir_root,
            bind_addr: get("KESTREL_BIND").unwrap_or_else(|| "0.0.0.0:8000".into()),
            whisper_model: get("WHISPER_MODEL").unwrap_or_else(|| "base.en".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn none(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = Config::from_vars(none);
        assert_eq!(cfg.llm.base_url, "http://localhost:8080");
        assert_eq!(cfg.llm.model, DEFAULT_MODEL);
        assert_eq!(cfg.llm.manager_model, cfg.llm.model);
        assert_eq!(cfg.llm.summarizer_model, cfg.llm.model);
        assert!(cfg.llm.supports_tool_call_messages);
        assert_eq!(cfg.bind_addr, "0.0.0.0:8000");
        assert_eq!(cfg.whisper_model, "base.en");
    }

    #[test]
    fn trailing_slash_stripped_from_base_url() {
        let cfg = Config::from_vars(|k| {
            (k == "LLM_API_URL").then(|| "http://host:1234/".to_string())
        });
        assert_eq!(cfg.llm.base_url, "http://host:1234");
    }

    #[test]
    fn llama_cpp_url_disables_tool_messages() {
        let cfg = Config::from_vars(|k| {
            (k == "LLM_API_URL").then(|| "http://llama-cpp:8080".to_string())
        });
        assert!(!cfg.llm.supports_tool_call_messages);
    }

    #[test]
    fn explicit_tool_message_override_wins() {
        let cfg = Config::from_vars(|k| match k {
            "LLM_API_URL" => Some("http://llama-cpp:8080".into()),
            "LLM_TOOL_CALL_MESSAGES" => Some("true".into()),
            _ => None,
        });
        assert!(cfg.llm.supports_tool_call_messages);

        let cfg = Config::from_vars(|k| {
            (k == "LLM_TOOL_CALL_MESSAGES").then(|| "no".to_string())
        });
        assert!(!cfg.llm.supports_tool_call_messages);
    }

    #[test]
    fn model_fallback_chain() {
        let cfg = Config::from_vars(|k| match k {
            "LLM_MODEL" => Some("base-model".into()),
            "LLM_MANAGER_MODEL" => Some("planner-model".into()),
            _ => None,
        });
        assert_eq!(cfg.llm.model, "base-model");
        assert_eq!(cfg.llm.manager_model, "planner-model");
        assert_eq!(cfg.llm.summarizer_model, "base-model");
    }
}
