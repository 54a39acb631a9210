//! Chat-protocol client for the primary conversational model.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use opsdesk_core::config::LlmConfig;
use opsdesk_core::domain::conversation::{ConversationTurn, ToolCall};
use opsdesk_core::errors::TransportError;

/// One model reply: free text plus zero or more requested tool calls.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

/// The conversation-driving model. One call per round; no streaming.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat(
        &self,
        turns: &[ConversationTurn],
        tools: &[Value],
    ) -> Result<ChatResponse, TransportError>;
}

/// Client for an Ollama-compatible `/api/chat` endpoint.
pub struct OllamaChatClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    timeout_secs: u64,
    max_retries: u32,
}

impl OllamaChatClient {
    pub fn new(config: &LlmConfig) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|err| TransportError::Model(err.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
        })
    }

    fn request_body(&self, turns: &[ConversationTurn], tools: &[Value]) -> Value {
        let messages: Vec<Value> = turns
            .iter()
            .map(|turn| {
                let mut message = json!({
                    "role": turn.role.as_str(),
                    "content": turn.content,
                });
                if !turn.tool_calls.is_empty() {
                    let calls: Vec<Value> = turn
                        .tool_calls
                        .iter()
                        .map(|call| {
                            json!({"function": {"name": call.name, "arguments": call.arguments}})
                        })
                        .collect();
                    message["tool_calls"] = Value::Array(calls);
                }
                message
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.to_vec());
        }
        body
    }
}

#[async_trait]
impl ChatModel for OllamaChatClient {
    async fn chat(
        &self,
        turns: &[ConversationTurn],
        tools: &[Value],
    ) -> Result<ChatResponse, TransportError> {
        let body = self.request_body(turns, tools);
        let url = format!("{}/api/chat", self.base_url);

        let mut last_error = TransportError::Model("no attempt made".to_string());
        for attempt in 0..=self.max_retries {
            debug!(event_name = "llm.chat_request", attempt, model = %self.model);

            let sent = self.http.post(&url).json(&body).send().await;
            let response = match sent {
                Ok(response) => response,
                Err(err) if err.is_timeout() => {
                    last_error = TransportError::ModelTimeout { seconds: self.timeout_secs };
                    continue;
                }
                Err(err) => {
                    last_error = TransportError::Model(err.to_string());
                    continue;
                }
            };

            if !response.status().is_success() {
                last_error =
                    TransportError::Model(format!("chat endpoint returned {}", response.status()));
                continue;
            }

            // A syntactically broken payload is not retried: the endpoint is
            // reachable, resending the same request will not fix it.
            let wire: WireResponse = response
                .json()
                .await
                .map_err(|err| TransportError::MalformedResponse(err.to_string()))?;
            return Ok(wire.into_response());
        }

        Err(last_error)
    }
}

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    message: WireMessage,
}

#[derive(Default, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct WireToolCall {
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

impl WireResponse {
    fn into_response(self) -> ChatResponse {
        let tool_calls = self
            .message
            .tool_calls
            .into_iter()
            .map(|call| ToolCall::from_raw_arguments(call.function.name, call.function.arguments))
            .collect();
        ChatResponse { content: self.message.content, tool_calls }
    }
}
