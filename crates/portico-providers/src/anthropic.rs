//! Anthropic Messages API provider implementation.
//!
//! Anthropic models think in signed blocks. The signature returned with a
//! `thinking` block must be replayed verbatim on the next turn or the API
//! rejects the conversation, so the adapter stores it in the message's
//! opaque `provider_state` and reconstructs `thinking` /
//! `redacted_thinking` blocks from it when mapping history back out.
//!
//! Streaming responses are translated event-by-event into the
//! OpenAI-compatible chunk schema the orchestrator consumes.

use crate::retry::{backoff_delay, is_retryable_status, max_retries, timeout};
use crate::sse::data_lines;
use async_trait::async_trait;
use futures::StreamExt;
use portico_abstraction::{
    ChatChoice, ChatCompletion, ChatMessage, ChatProvider, ChatRequest, ChatStream, ProviderError,
    ProviderKind, StreamChoice, StreamChunk, StreamDelta, ToolCall, ToolCallDelta,
    ToolCallFunction, ToolCallFunctionDelta, Usage,
};
use reqwest::Client;
use serde_json::{Value, json};
use std::env;
use std::time::Duration;
use tracing::{debug, error};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;
/// Anthropic rejects thinking budgets below this floor.
const MIN_THINKING_BUDGET: i64 = 1024;
/// System prompts longer than this get a cache_control marker.
const CACHE_THRESHOLD_CHARS: usize = 1024;

/// Anthropic provider implementation.
#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    /// The API key for authentication.
    api_key: String,
    /// The base URL for the Anthropic API.
    base_url: String,
    /// Whether to attach prompt-caching markers.
    enable_prompt_caching: bool,
    /// Bounded retry count for transient failures.
    max_retries: u32,
    /// Provider identity reported to the orchestrator.
    kind: ProviderKind,
    /// HTTP client for making requests.
    client: Client,
}

impl AnthropicProvider {
    /// Creates a provider from the environment.
    ///
    /// # Errors
    /// Returns an error if `ANTHROPIC_API_KEY` is not set.
    pub fn new() -> Result<Self, ProviderError> {
        let api_key = env::var("ANTHROPIC_API_KEY").map_err(|_| {
            ProviderError::MissingApiKey("ANTHROPIC_API_KEY environment variable is required".to_string())
        })?;
        let base_url =
            env::var("ANTHROPIC_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Ok(Self::with_settings(api_key, base_url, true))
    }

    /// Creates a provider with explicit settings. Used directly by tests
    /// and by the MiniMax adapter, which points this client at MiniMax's
    /// Anthropic-compatible endpoint with prompt caching off.
    #[must_use]
    pub fn with_settings(api_key: String, base_url: String, enable_prompt_caching: bool) -> Self {
        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            enable_prompt_caching,
            max_retries: max_retries("ANTHROPIC"),
            kind: ProviderKind::Anthropic,
            client: Client::builder()
                .timeout(timeout("ANTHROPIC"))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    pub(crate) fn reporting_as(mut self, kind: ProviderKind) -> Self {
        self.kind = kind;
        self
    }

    fn apply_headers(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("Content-Type", "application/json")
    }

    /// Rebuilds an assistant turn in block form, re-injecting the thinking
    /// block from its saved signature.
    fn reconstruct_assistant_message(msg: &ChatMessage) -> Value {
        let mut blocks: Vec<Value> = Vec::new();

        if let Some(signature) = msg
            .provider_state
            .as_ref()
            .and_then(|ps| ps.get("thought_signature"))
            .and_then(Value::as_str)
        {
            let is_redacted = msg
                .provider_state
                .as_ref()
                .and_then(|ps| ps.get("is_redacted"))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            let reasoning = msg.reasoning_content.clone().unwrap_or_default();
            if is_redacted || reasoning == "[Redacted Thinking]" {
                blocks.push(json!({"type": "redacted_thinking", "data": signature}));
            } else {
                blocks.push(json!({
                    "type": "thinking",
                    "thinking": reasoning,
                    "signature": signature,
                }));
            }
        }

        if let Some(ref content) = msg.content {
            if !content.is_empty() {
                blocks.push(json!({"type": "text", "text": content}));
            }
        }

        for call in msg.tool_calls.iter().flatten() {
            let input: Value =
                serde_json::from_str(&call.function.arguments).unwrap_or_else(|_| json!({}));
            blocks.push(json!({
                "type": "tool_use",
                "id": call.id,
                "name": call.function.name,
                "input": input,
            }));
        }

        json!({"role": "assistant", "content": blocks})
    }

    /// Splits history into the system prompt array and the block-format
    /// message list. Tool results fold into the preceding user turn.
    fn map_messages(&self, messages: &[ChatMessage]) -> (Option<Value>, Vec<Value>) {
        let mut system_blocks: Vec<Value> = Vec::new();
        let mut formatted: Vec<Value> = Vec::new();

        for msg in messages {
            match msg.role.as_str() {
                "system" => {
                    let text = msg.content.clone().unwrap_or_default();
                    let mut block = json!({"type": "text", "text": text});
                    if self.enable_prompt_caching && text.len() > CACHE_THRESHOLD_CHARS {
                        block["cache_control"] = json!({"type": "ephemeral"});
                    }
                    system_blocks.push(block);
                }
                "assistant" => formatted.push(Self::reconstruct_assistant_message(msg)),
                "tool" => {
                    let block = json!({
                        "type": "tool_result",
                        "tool_use_id": msg.tool_call_id.clone().unwrap_or_default(),
                        "content": msg.content.clone().unwrap_or_default(),
                        "is_error": false,
                    });
                    let folded = formatted
                        .last_mut()
                        .filter(|m| m["role"] == "user")
                        .and_then(|m| m["content"].as_array_mut())
                        .map(|content| content.push(block.clone()));
                    if folded.is_none() {
                        formatted.push(json!({"role": "user", "content": [block]}));
                    }
                }
                _ => {
                    let text = msg.content.clone().unwrap_or_default();
                    formatted.push(json!({
                        "role": "user",
                        "content": [{"type": "text", "text": text}],
                    }));
                }
            }
        }

        let system = if system_blocks.is_empty() { None } else { Some(Value::Array(system_blocks)) };
        (system, formatted)
    }

    fn build_payload(&self, request: &ChatRequest, stream: bool) -> Value {
        let (system, messages) = self.map_messages(&request.messages);
        let mut payload = json!({
            "model": request.model,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        });
        if let Some(system) = system {
            payload["system"] = system;
        }
        if stream {
            payload["stream"] = json!(true);
        }
        if let Some(temperature) = request.temperature {
            payload["temperature"] = json!(temperature);
        }
        if let Some(tools) = request.tools.as_ref().filter(|t| !t.is_empty()) {
            payload["tools"] = Value::Array(
                tools
                    .iter()
                    .map(|t| {
                        json!({
                            "name": t.function.name,
                            "description": t.function.description.clone().unwrap_or_default(),
                            "input_schema": t.function.parameters,
                        })
                    })
                    .collect(),
            );
        }
        if let Some(budget) = request.reasoning.as_ref().and_then(|r| r.budget_tokens) {
            if budget > 0 {
                payload["thinking"] = json!({
                    "type": "enabled",
                    "budget_tokens": budget.max(MIN_THINKING_BUDGET),
                });
            }
        }
        payload
    }

    /// Maps an Anthropic response body to the OpenAI-compatible shape.
    fn extract_completion(body: &Value, model: &str) -> ChatCompletion {
        let mut text = String::new();
        let mut reasoning = String::new();
        let mut signature: Option<String> = None;
        let mut is_redacted = false;
        let mut tool_calls: Vec<ToolCall> = Vec::new();

        for block in body["content"].as_array().into_iter().flatten() {
            match block["type"].as_str().unwrap_or_default() {
                "text" => text.push_str(block["text"].as_str().unwrap_or_default()),
                "thinking" => {
                    reasoning.push_str(block["thinking"].as_str().unwrap_or_default());
                    if let Some(sig) = block["signature"].as_str() {
                        signature = Some(sig.to_string());
                    }
                }
                "redacted_thinking" => {
                    reasoning.push_str("[Redacted Thinking]");
                    is_redacted = true;
                    if let Some(data) = block["data"].as_str() {
                        signature = Some(data.to_string());
                    }
                }
                "tool_use" => tool_calls.push(ToolCall {
                    id: block["id"].as_str().unwrap_or_default().to_string(),
                    call_type: "function".to_string(),
                    function: ToolCallFunction {
                        name: block["name"].as_str().unwrap_or_default().to_string(),
                        arguments: block["input"].to_string(),
                    },
                }),
                _ => {}
            }
        }

        let mut message = ChatMessage {
            role: "assistant".to_string(),
            content: Some(text),
            ..Default::default()
        };
        if !reasoning.is_empty() {
            message.reasoning_content = Some(reasoning);
        }
        if let Some(signature) = signature {
            message.provider_state =
                Some(json!({"thought_signature": signature, "is_redacted": is_redacted}));
        }
        if !tool_calls.is_empty() {
            message.tool_calls = Some(tool_calls);
        }

        let finish_reason = match body["stop_reason"].as_str() {
            Some("tool_use") => "tool_calls",
            Some("max_tokens") => "length",
            _ => "stop",
        };

        let usage = body.get("usage").map(|u| Usage {
            prompt_tokens: u["input_tokens"].as_u64().unwrap_or(0) as u32,
            completion_tokens: u["output_tokens"].as_u64().unwrap_or(0) as u32,
            total_tokens: (u["input_tokens"].as_u64().unwrap_or(0)
                + u["output_tokens"].as_u64().unwrap_or(0)) as u32,
        });

        ChatCompletion {
            id: body["id"].as_str().unwrap_or_default().to_string(),
            model: model.to_string(),
            choices: vec![ChatChoice {
                index: 0,
                message,
                finish_reason: Some(finish_reason.to_string()),
            }],
            usage,
        }
    }

    async fn post_with_retries(
        &self,
        payload: &Value,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let mut network_retried = false;
        let mut attempt = 0;
        loop {
            debug!(url = %url, attempt, "Anthropic request");
            let result = self.apply_headers(self.client.post(&url)).json(payload).send().await;
            match result {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if response.status().is_success() {
                        return Ok(response);
                    }
                    if is_retryable_status(status) && attempt < self.max_retries {
                        tokio::time::sleep(backoff_delay(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    let body = response.text().await.unwrap_or_default();
                    error!(status, "Anthropic API error: {}", body);
                    if status == 429 {
                        return Err(ProviderError::RateLimited {
                            provider: self.kind.as_str().to_string(),
                            message: Some(body),
                        });
                    }
                    return Err(ProviderError::Api { status, body });
                }
                Err(e) => {
                    if !network_retried {
                        network_retried = true;
                        tokio::time::sleep(Duration::from_millis(250)).await;
                        continue;
                    }
                    return Err(ProviderError::Request(format!("Network error: {}", e)));
                }
            }
        }
    }
}

/// Accumulating state while translating an Anthropic event stream.
#[derive(Default)]
struct StreamState {
    id: String,
    /// Index of the current tool_use block, if one is open.
    open_tool_index: Option<u32>,
    tool_count: u32,
    signature: String,
    finished: bool,
}

fn translate_event(state: &mut StreamState, event: &Value, model: &str) -> Option<StreamChunk> {
    let chunk = |state: &StreamState, delta: StreamDelta, finish: Option<&str>| StreamChunk {
        id: state.id.clone(),
        model: model.to_string(),
        choices: vec![StreamChoice {
            index: 0,
            delta,
            finish_reason: finish.map(String::from),
        }],
        usage: None,
    };

    match event["type"].as_str().unwrap_or_default() {
        "message_start" => {
            state.id = event["message"]["id"].as_str().unwrap_or_default().to_string();
            Some(chunk(
                state,
                StreamDelta { role: Some("assistant".to_string()), ..Default::default() },
                None,
            ))
        }
        "content_block_start" => {
            let block = &event["content_block"];
            if block["type"] == "tool_use" {
                let index = state.tool_count;
                state.tool_count += 1;
                state.open_tool_index = Some(index);
                Some(chunk(
                    state,
                    StreamDelta {
                        tool_calls: Some(vec![ToolCallDelta {
                            index,
                            id: block["id"].as_str().map(String::from),
                            call_type: Some("function".to_string()),
                            function: Some(ToolCallFunctionDelta {
                                name: block["name"].as_str().map(String::from),
                                arguments: Some(String::new()),
                            }),
                        }]),
                        ..Default::default()
                    },
                    None,
                ))
            } else {
                None
            }
        }
        "content_block_delta" => {
            let delta = &event["delta"];
            match delta["type"].as_str().unwrap_or_default() {
                "text_delta" => Some(chunk(
                    state,
                    StreamDelta {
                        content: delta["text"].as_str().map(String::from),
                        ..Default::default()
                    },
                    None,
                )),
                "thinking_delta" => Some(chunk(
                    state,
                    StreamDelta {
                        reasoning_content: delta["thinking"].as_str().map(String::from),
                        ..Default::default()
                    },
                    None,
                )),
                "signature_delta" => {
                    state.signature.push_str(delta["signature"].as_str().unwrap_or_default());
                    None
                }
                "input_json_delta" => state.open_tool_index.map(|index| {
                    chunk(
                        state,
                        StreamDelta {
                            tool_calls: Some(vec![ToolCallDelta {
                                index,
                                id: None,
                                call_type: None,
                                function: Some(ToolCallFunctionDelta {
                                    name: None,
                                    arguments: delta["partial_json"].as_str().map(String::from),
                                }),
                            }]),
                            ..Default::default()
                        },
                        None,
                    )
                }),
                _ => None,
            }
        }
        "content_block_stop" => {
            state.open_tool_index = None;
            None
        }
        "message_delta" => {
            let finish = match event["delta"]["stop_reason"].as_str() {
                Some("tool_use") => "tool_calls",
                Some("max_tokens") => "length",
                _ => "stop",
            };
            state.finished = true;
            let provider_state = (!state.signature.is_empty())
                .then(|| json!({"thought_signature": state.signature, "is_redacted": false}));
            Some(chunk(
                state,
                StreamDelta { provider_state, ..Default::default() },
                Some(finish),
            ))
        }
        _ => None,
    }
}

#[async_trait]
impl ChatProvider for AnthropicProvider {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, ProviderError> {
        let payload = self.build_payload(request, false);
        let response = self.post_with_retries(&payload).await?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Serialization(format!("invalid response body: {}", e)))?;
        Ok(Self::extract_completion(&body, &request.model))
    }

    async fn stream(&self, request: &ChatRequest) -> Result<ChatStream, ProviderError> {
        let payload = self.build_payload(request, true);
        let response = self.post_with_retries(&payload).await?;
        let model = request.model.clone();
        let tail_model = model.clone();

        let mut state = StreamState::default();
        let chunks = data_lines(response.bytes_stream()).filter_map(move |payload| {
            let model = model.clone();
            let result = payload.and_then(|payload| {
                serde_json::from_str::<Value>(&payload)
                    .map_err(|e| ProviderError::Serialization(format!("invalid event: {}", e)))
            });
            let item = match result {
                Ok(event) => translate_event(&mut state, &event, &model).map(Ok),
                Err(e) => Some(Err(e)),
            };
            async move { item }
        });
        Ok(Box::pin(crate::openrouter::with_synthetic_finish(chunks, tail_model)))
    }

    fn kind(&self) -> ProviderKind {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portico_abstraction::ReasoningOptions;

    fn provider() -> AnthropicProvider {
        AnthropicProvider::with_settings("k".to_string(), DEFAULT_BASE_URL.to_string(), true)
    }

    fn request(messages: Vec<ChatMessage>) -> ChatRequest {
        ChatRequest::new("claude-sonnet-4-20250514", messages)
    }

    #[test]
    fn test_thinking_block_reconstructed_from_signature() {
        let mut msg = ChatMessage::assistant("answer");
        msg.reasoning_content = Some("earlier thoughts".to_string());
        msg.provider_state = Some(json!({"thought_signature": "sig-1", "is_redacted": false}));
        let rebuilt = AnthropicProvider::reconstruct_assistant_message(&msg);
        let blocks = rebuilt["content"].as_array().unwrap();
        assert_eq!(blocks[0]["type"], "thinking");
        assert_eq!(blocks[0]["signature"], "sig-1");
        assert_eq!(blocks[0]["thinking"], "earlier thoughts");
        assert_eq!(blocks[1]["type"], "text");
    }

    #[test]
    fn test_redacted_thinking_reconstruction() {
        let mut msg = ChatMessage::assistant("answer");
        msg.reasoning_content = Some("[Redacted Thinking]".to_string());
        msg.provider_state = Some(json!({"thought_signature": "blob", "is_redacted": true}));
        let rebuilt = AnthropicProvider::reconstruct_assistant_message(&msg);
        let blocks = rebuilt["content"].as_array().unwrap();
        assert_eq!(blocks[0]["type"], "redacted_thinking");
        assert_eq!(blocks[0]["data"], "blob");
    }

    #[test]
    fn test_tool_results_fold_into_user_turn() {
        let mut assistant = ChatMessage { role: "assistant".to_string(), ..Default::default() };
        assistant.tool_calls = Some(vec![ToolCall {
            id: "toolu_1".to_string(),
            call_type: "function".to_string(),
            function: ToolCallFunction {
                name: "get_time".to_string(),
                arguments: "{}".to_string(),
            },
        }]);
        let messages = vec![
            ChatMessage::user("what time is it"),
            assistant,
            ChatMessage::tool("toolu_1", "get_time", "12:00"),
            ChatMessage::tool("toolu_1", "get_time", "12:01"),
        ];
        let (_, formatted) = provider().map_messages(&messages);
        assert_eq!(formatted.len(), 3);
        // Both tool results land in one user turn.
        let results = formatted[2]["content"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["type"], "tool_result");
        assert_eq!(results[0]["tool_use_id"], "toolu_1");
    }

    #[test]
    fn test_long_system_prompt_gets_cache_marker() {
        let long = "x".repeat(2000);
        let (system, _) = provider().map_messages(&[ChatMessage::system(long)]);
        let blocks = system.unwrap();
        assert_eq!(blocks[0]["cache_control"]["type"], "ephemeral");
    }

    #[test]
    fn test_caching_disabled_omits_marker() {
        let no_cache =
            AnthropicProvider::with_settings("k".to_string(), DEFAULT_BASE_URL.to_string(), false);
        let long = "x".repeat(2000);
        let (system, _) = no_cache.map_messages(&[ChatMessage::system(long)]);
        assert!(system.unwrap()[0].get("cache_control").is_none());
    }

    #[test]
    fn test_thinking_budget_clamped_to_floor() {
        let mut req = request(vec![ChatMessage::user("hi")]);
        req.reasoning =
            Some(ReasoningOptions { budget_tokens: Some(100), ..Default::default() });
        let payload = provider().build_payload(&req, false);
        assert_eq!(payload["thinking"]["budget_tokens"], MIN_THINKING_BUDGET);
    }

    #[test]
    fn test_payload_has_required_max_tokens() {
        let payload = provider().build_payload(&request(vec![ChatMessage::user("hi")]), false);
        assert_eq!(payload["max_tokens"], DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn test_tools_map_to_input_schema() {
        let mut req = request(vec![ChatMessage::user("hi")]);
        req.tools = Some(vec![portico_abstraction::ToolDef::function(
            portico_abstraction::ToolFunction {
                name: "get_time".to_string(),
                description: Some("time lookup".to_string()),
                parameters: json!({"type": "object", "properties": {}}),
            },
        )]);
        let payload = provider().build_payload(&req, false);
        assert_eq!(payload["tools"][0]["name"], "get_time");
        assert!(payload["tools"][0]["input_schema"].is_object());
    }

    #[test]
    fn test_extract_completion_separates_thinking() {
        let body = json!({
            "id": "msg_1",
            "stop_reason": "end_turn",
            "content": [
                {"type": "thinking", "thinking": "let me think", "signature": "sig-9"},
                {"type": "text", "text": "the answer"},
            ],
            "usage": {"input_tokens": 10, "output_tokens": 5},
        });
        let completion = AnthropicProvider::extract_completion(&body, "claude-sonnet-4");
        let message = completion.message().unwrap();
        assert_eq!(message.content.as_deref(), Some("the answer"));
        assert_eq!(message.reasoning_content.as_deref(), Some("let me think"));
        assert_eq!(message.provider_state.as_ref().unwrap()["thought_signature"], "sig-9");
        assert_eq!(completion.usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn test_extract_completion_tool_use() {
        let body = json!({
            "id": "msg_2",
            "stop_reason": "tool_use",
            "content": [
                {"type": "tool_use", "id": "toolu_9", "name": "search", "input": {"q": "rust"}},
            ],
        });
        let completion = AnthropicProvider::extract_completion(&body, "claude-sonnet-4");
        let message = completion.message().unwrap();
        let calls = message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "toolu_9");
        assert_eq!(calls[0].function.arguments, "{\"q\":\"rust\"}");
        assert_eq!(
            completion.choices[0].finish_reason.as_deref(),
            Some("tool_calls")
        );
    }

    #[test]
    fn test_stream_translation_full_turn() {
        let mut state = StreamState::default();
        let model = "claude-sonnet-4";
        let start = translate_event(
            &mut state,
            &json!({"type": "message_start", "message": {"id": "msg_3"}}),
            model,
        )
        .unwrap();
        assert_eq!(start.delta().unwrap().role.as_deref(), Some("assistant"));
        assert_eq!(start.id, "msg_3");

        let thinking = translate_event(
            &mut state,
            &json!({"type": "content_block_delta", "delta": {"type": "thinking_delta", "thinking": "hm"}}),
            model,
        )
        .unwrap();
        assert_eq!(thinking.delta().unwrap().reasoning_content.as_deref(), Some("hm"));

        assert!(translate_event(
            &mut state,
            &json!({"type": "content_block_delta", "delta": {"type": "signature_delta", "signature": "si"}}),
            model,
        )
        .is_none());

        let text = translate_event(
            &mut state,
            &json!({"type": "content_block_delta", "delta": {"type": "text_delta", "text": "hi"}}),
            model,
        )
        .unwrap();
        assert_eq!(text.delta().unwrap().content.as_deref(), Some("hi"));

        let finish = translate_event(
            &mut state,
            &json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}}),
            model,
        )
        .unwrap();
        assert_eq!(finish.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(
            finish.delta().unwrap().provider_state.as_ref().unwrap()["thought_signature"],
            "si"
        );
    }

    #[test]
    fn test_stream_translation_tool_call() {
        let mut state = StreamState::default();
        let model = "claude-sonnet-4";
        translate_event(&mut state, &json!({"type": "message_start", "message": {"id": "m"}}), model);
        let start = translate_event(
            &mut state,
            &json!({"type": "content_block_start", "content_block": {"type": "tool_use", "id": "toolu_5", "name": "search"}}),
            model,
        )
        .unwrap();
        let calls = start.delta().unwrap().tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id.as_deref(), Some("toolu_5"));
        assert_eq!(calls[0].function.as_ref().unwrap().name.as_deref(), Some("search"));

        let args = translate_event(
            &mut state,
            &json!({"type": "content_block_delta", "delta": {"type": "input_json_delta", "partial_json": "{\"q\":"}}),
            model,
        )
        .unwrap();
        let calls = args.delta().unwrap().tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.as_ref().unwrap().arguments.as_deref(), Some("{\"q\":"));

        assert!(translate_event(&mut state, &json!({"type": "content_block_stop"}), model).is_none());
        let finish = translate_event(
            &mut state,
            &json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}}),
            model,
        )
        .unwrap();
        assert_eq!(finish.choices[0].finish_reason.as_deref(), Some("tool_calls"));
    }

    #[tokio::test]
    async fn test_complete_against_mock_server() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/messages")
            .match_header("x-api-key", "k")
            .match_header("anthropic-version", API_VERSION)
            .with_status(200)
            .with_body(
                r#"{"id":"msg_7","stop_reason":"end_turn","content":[{"type":"text","text":"hello"}],"usage":{"input_tokens":3,"output_tokens":2}}"#,
            )
            .create_async()
            .await;

        let provider = AnthropicProvider::with_settings("k".to_string(), server.url(), true);
        let completion =
            provider.complete(&request(vec![ChatMessage::user("hi")])).await.unwrap();
        assert_eq!(completion.message().unwrap().content.as_deref(), Some("hello"));
        mock.assert_async().await;
    }
}
