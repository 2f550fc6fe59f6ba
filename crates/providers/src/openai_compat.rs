//! OpenAI-compatible adapter.
//!
//! Works with any endpoint that follows the OpenAI chat completions
//! contract (vLLM, llama.cpp server, LM Studio, Ollama's compat layer).

use serde_json::Value;

use kestrel_domain::chat::{ChatMessage, Role, ToolCall, ToolDefinition};
use kestrel_domain::config::{LlmConfig, LLM_TIMEOUT};
use kestrel_domain::error::{Error, Result};

use crate::traits::{ChatProvider, ChatResponse};

pub struct OpenAiCompatClient {
    base_url: String,
    api_key: Option<String>,
    default_model: String,
    supports_tool_call_messages: bool,
    client: reqwest::Client,
}

impl OpenAiCompatClient {
    pub fn new(cfg: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(LLM_TIMEOUT)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            default_model: cfg.model.clone(),
            supports_tool_call_messages: cfg.supports_tool_call_messages,
            client,
        })
    }

    fn post_chat(&self, body: &Value) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }
        builder
    }

    async fn send(&self, body: &Value) -> Result<Value> {
        let response = self
            .post_chat(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("LLM call exceeded {}s", LLM_TIMEOUT.as_secs()))
                } else {
                    Error::Http(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Http(format!("LLM endpoint returned {status}: {text}")));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| Error::Http(format!("invalid LLM response body: {e}")))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire conversion
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// Convert one internal message to the OpenAI wire shape.
fn msg_to_wire(msg: &ChatMessage) -> Value {
    let mut wire = serde_json::json!({
        "role": role_str(msg.role),
        "content": msg.content,
    });
    if let Some(calls) = &msg.tool_calls {
        wire["tool_calls"] = Value::Array(
            calls
                .iter()
                .map(|tc| {
                    serde_json::json!({
                        "id": tc.call_id,
                        "type": "function",
                        "function": {
                            "name": tc.tool_name,
                            "arguments": tc.arguments.to_string(),
                        },
                    })
                })
                .collect(),
        );
    }
    if let Some(id) = &msg.tool_call_id {
        wire["tool_call_id"] = Value::String(id.clone());
    }
    wire
}

fn tool_to_wire(def: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": def.name,
            "description": def.description,
            "parameters": def.parameters,
        },
    })
}

/// Extract `(content, tool_calls)` from a chat completions response.
///
/// Providers disagree on argument encoding: some send a JSON string, some
/// an already-parsed object. Unparseable arguments default to an empty
/// object rather than failing the whole response.
fn parse_chat_response(data: &Value) -> ChatResponse {
    let message = &data["choices"][0]["message"];
    let content = message["content"].as_str().unwrap_or("").trim().to_string();

    let mut tool_calls = Vec::new();
    if let Some(raw_calls) = message["tool_calls"].as_array() {
        for (idx, raw) in raw_calls.iter().enumerate() {
            let function = &raw["function"];
            let Some(name) = function["name"].as_str() else {
                continue;
            };
            let arguments = match &function["arguments"] {
                Value::String(s) if !s.trim().is_empty() => {
                    serde_json::from_str(s).unwrap_or_else(|e| {
                        tracing::warn!(tool = name, error = %e, "tool arguments are not valid JSON; defaulting to empty object");
                        Value::Object(Default::default())
                    })
                }
                Value::Object(map) => Value::Object(map.clone()),
                _ => Value::Object(Default::default()),
            };
            let call_id = raw["id"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| format!("call_{idx}"));
            tool_calls.push(ToolCall {
                call_id,
                tool_name: name.to_string(),
                arguments,
            });
        }
    }

    ChatResponse { content, tool_calls }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ChatProvider impl
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl ChatProvider for OpenAiCompatClient {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        model_override: Option<&str>,
        response_format: Option<&Value>,
    ) -> Result<String> {
        let mut body = serde_json::json!({
            "model": model_override.unwrap_or(&self.default_model),
            "messages": messages.iter().map(msg_to_wire).collect::<Vec<_>>(),
        });
        if let Some(format) = response_format {
            body["response_format"] = format.clone();
        }

        let data = self.send(&body).await?;
        Ok(data["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .trim()
            .to_string())
    }

    async fn chat_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        model_override: Option<&str>,
    ) -> Result<ChatResponse> {
        let body = serde_json::json!({
            "model": model_override.unwrap_or(&self.default_model),
            "messages": messages.iter().map(msg_to_wire).collect::<Vec<_>>(),
            "tools": tools.iter().map(tool_to_wire).collect::<Vec<_>>(),
        });

        let data = self.send(&body).await?;
        Ok(parse_chat_response(&data))
    }

    fn supports_tool_call_messages(&self) -> bool {
        self.supports_tool_call_messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_wire_shape_for_tool_result() {
        let wire = msg_to_wire(&ChatMessage::tool_result("c1", "{\"ok\":true}"));
        assert_eq!(wire["role"], "tool");
        assert_eq!(wire["tool_call_id"], "c1");
    }

    #[test]
    fn assistant_tool_calls_serialize_arguments_as_string() {
        let msg = ChatMessage::assistant_with_tools(
            "",
            vec![ToolCall {
                call_id: "c1".into(),
                tool_name: "list_dir".into(),
                arguments: serde_json::json!({ "path": "." }),
            }],
        );
        let wire = msg_to_wire(&msg);
        let args = wire["tool_calls"][0]["function"]["arguments"].as_str().unwrap();
        assert_eq!(serde_json::from_str::<Value>(args).unwrap()["path"], ".");
    }

    #[test]
    fn parse_response_with_string_arguments() {
        let data = serde_json::json!({
            "choices": [{
                "message": {
                    "content": "working on it",
                    "tool_calls": [{
                        "id": "abc",
                        "type": "function",
                        "function": { "name": "shell", "arguments": "{\"command\": \"ls\"}" },
                    }],
                },
            }],
        });
        let parsed = parse_chat_response(&data);
        assert_eq!(parsed.content, "working on it");
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.tool_calls[0].tool_name, "shell");
        assert_eq!(parsed.tool_calls[0].arguments["command"], "ls");
    }

    #[test]
    fn parse_response_with_object_arguments() {
        let data = serde_json::json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "x",
                        "function": { "name": "read_file", "arguments": { "path": "a.txt" } },
                    }],
                },
            }],
        });
        let parsed = parse_chat_response(&data);
        assert_eq!(parsed.content, "");
        assert_eq!(parsed.tool_calls[0].arguments["path"], "a.txt");
    }

    #[test]
    fn parse_response_with_garbage_arguments_defaults_empty() {
        let data = serde_json::json!({
            "choices": [{
                "message": {
                    "content": "",
                    "tool_calls": [{
                        "id": "x",
                        "function": { "name": "shell", "arguments": "not json" },
                    }],
                },
            }],
        });
        let parsed = parse_chat_response(&data);
        assert!(parsed.tool_calls[0].arguments.as_object().unwrap().is_empty());
    }

    #[test]
    fn parse_empty_choices_is_empty_response() {
        let parsed = parse_chat_response(&serde_json::json!({ "choices": [] }));
        assert!(parsed.content.is_empty());
        assert!(parsed.tool_calls.is_empty());
    }
}
