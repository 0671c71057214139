//! OpenAI provider implementation.
//!
//! Standard models go through Chat Completions. Reasoning models
//! (o1-pro, o3, o4, gpt-5.x, codex) route through the Responses API,
//! which carries reasoning effort and optional summaries; its response
//! and event shapes are translated back into the common
//! chat-completion schema.

use crate::retry::{backoff_delay, is_retryable_status, max_retries, timeout};
use crate::sse::data_lines;
use crate::wire::{parse_chunk, parse_completion, to_wire_messages, to_wire_tools};
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

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// True for models that take `reasoning_effort` and
/// `max_completion_tokens` instead of temperature.
pub fn is_reasoning_model(model: &str) -> bool {
    let m = model.to_lowercase();
    m.starts_with("o1") || m.starts_with("o3") || m.starts_with("o4") || m.contains("gpt-5")
        || m.starts_with("codex")
}

/// True for models served by the Responses API. o1-mini and o1-preview
/// stay on Chat Completions; o1-pro moved over.
pub fn supports_responses_api(model: &str) -> bool {
    let m = model.to_lowercase();
    m.contains("o1-pro") || m.contains("o3") || m.contains("o4") || m.contains("gpt-5")
        || m.starts_with("codex")
}

/// OpenAI provider implementation.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    /// The API key for authentication.
    api_key: String,
    /// The base URL for the OpenAI API.
    base_url: String,
    /// Whether eligible models use the Responses API.
    use_responses_api: bool,
    /// Bounded retry count for transient failures.
    max_retries: u32,
    /// HTTP client for making requests.
    client: Client,
}

impl OpenAiProvider {
    /// Creates a provider from the environment.
    ///
    /// # Errors
    /// Returns an error if neither `OPEN_AI_API_KEY` nor `OPENAI_API_KEY`
    /// is set.
    pub fn new() -> Result<Self, ProviderError> {
        let api_key = env::var("OPEN_AI_API_KEY")
            .or_else(|_| env::var("OPENAI_API_KEY"))
            .map_err(|_| {
                ProviderError::MissingApiKey(
                    "OPEN_AI_API_KEY or OPENAI_API_KEY environment variable is required".to_string(),
                )
            })?;
        let use_responses_api = env::var("OPEN_AI_USE_RESPONSES_API")
            .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(true);
        Ok(Self::with_api_key(api_key, use_responses_api))
    }

    /// Creates a provider with an explicit API key.
    #[must_use]
    pub fn with_api_key(api_key: String, use_responses_api: bool) -> Self {
        Self {
            api_key,
            base_url: env::var("OPEN_AI_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            use_responses_api,
            max_retries: max_retries("OPEN_AI"),
            client: Client::builder()
                .timeout(timeout("OPEN_AI"))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    /// Overrides the base URL, for tests.
    #[must_use]
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn should_use_responses_api(&self, model: &str) -> bool {
        self.use_responses_api && supports_responses_api(model)
    }

    fn build_chat_payload(request: &ChatRequest, stream: bool) -> Value {
        let mut payload = json!({
            "model": request.model,
            "messages": to_wire_messages(&request.messages),
        });
        if stream {
            payload["stream"] = json!(true);
        }
        if let Some(tools) = to_wire_tools(request.tools.as_ref()) {
            payload["tools"] = tools;
        }
        if is_reasoning_model(&request.model) {
            if let Some(max_tokens) = request.max_tokens {
                payload["max_completion_tokens"] = json!(max_tokens);
            }
            if let Some(effort) = request.reasoning.as_ref().and_then(|r| r.effort.as_deref()) {
                payload["reasoning_effort"] = json!(effort);
            }
        } else {
            if let Some(temperature) = request.temperature {
                payload["temperature"] = json!(temperature);
            }
            if let Some(max_tokens) = request.max_tokens {
                payload["max_tokens"] = json!(max_tokens);
            }
        }
        payload
    }

    /// Builds a Responses API payload: history flattens into typed input
    /// items.
    fn build_responses_payload(request: &ChatRequest, stream: bool) -> Value {
        let mut input: Vec<Value> = Vec::new();
        let mut instructions: Option<String> = None;
        for msg in &request.messages {
            match msg.role.as_str() {
                "system" => instructions = msg.content.clone(),
                "tool" => input.push(json!({
                    "type": "function_call_output",
                    "call_id": msg.tool_call_id.clone().unwrap_or_default(),
                    "output": msg.content.clone().unwrap_or_default(),
                })),
                "assistant" => {
                    if let Some(ref content) = msg.content {
                        if !content.is_empty() {
                            input.push(json!({"role": "assistant", "content": content}));
                        }
                    }
                    for call in msg.tool_calls.iter().flatten() {
                        input.push(json!({
                            "type": "function_call",
                            "call_id": call.id,
                            "name": call.function.name,
                            "arguments": call.function.arguments,
                        }));
                    }
                }
                _ => input.push(json!({
                    "role": "user",
                    "content": msg.content.clone().unwrap_or_default(),
                })),
            }
        }

        let mut payload = json!({"model": request.model, "input": input});
        if stream {
            payload["stream"] = json!(true);
        }
        if let Some(instructions) = instructions {
            payload["instructions"] = json!(instructions);
        }
        if let Some(max_tokens) = request.max_tokens {
            payload["max_output_tokens"] = json!(max_tokens);
        }
        if let Some(tools) = request.tools.as_ref().filter(|t| !t.is_empty()) {
            payload["tools"] = Value::Array(
                tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "name": t.function.name,
                            "description": t.function.description.clone().unwrap_or_default(),
                            "parameters": t.function.parameters,
                        })
                    })
                    .collect(),
            );
        }
        let mut reasoning = serde_json::Map::new();
        if let Some(opts) = request.reasoning.as_ref() {
            if let Some(ref effort) = opts.effort {
                reasoning.insert("effort".to_string(), json!(effort));
            }
            if let Some(ref summary) = opts.summary {
                reasoning.insert("summary".to_string(), json!(summary));
            }
        }
        if !reasoning.is_empty() {
            payload["reasoning"] = Value::Object(reasoning);
        }
        payload
    }

    /// Translates a Responses API body into a chat completion.
    fn extract_responses_completion(body: &Value, model: &str) -> ChatCompletion {
        let mut text = String::new();
        let mut reasoning = String::new();
        let mut tool_calls: Vec<ToolCall> = Vec::new();

        for item in body["output"].as_array().into_iter().flatten() {
            match item["type"].as_str().unwrap_or_default() {
                "message" => {
                    for part in item["content"].as_array().into_iter().flatten() {
                        if part["type"] == "output_text" {
                            text.push_str(part["text"].as_str().unwrap_or_default());
                        }
                    }
                }
                "reasoning" => {
                    for part in item["summary"].as_array().into_iter().flatten() {
                        reasoning.push_str(part["text"].as_str().unwrap_or_default());
                    }
                }
                "function_call" => tool_calls.push(ToolCall {
                    id: item["call_id"].as_str().unwrap_or_default().to_string(),
                    call_type: "function".to_string(),
                    function: ToolCallFunction {
                        name: item["name"].as_str().unwrap_or_default().to_string(),
                        arguments: item["arguments"].as_str().unwrap_or("{}").to_string(),
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
        let has_tool_calls = !tool_calls.is_empty();
        if has_tool_calls {
            message.tool_calls = Some(tool_calls);
        }

        let usage = body.get("usage").map(|u| Usage {
            prompt_tokens: u["input_tokens"].as_u64().unwrap_or(0) as u32,
            completion_tokens: u["output_tokens"].as_u64().unwrap_or(0) as u32,
            total_tokens: u["total_tokens"].as_u64().unwrap_or(0) as u32,
        });

        ChatCompletion {
            id: body["id"].as_str().unwrap_or_default().to_string(),
            model: model.to_string(),
            choices: vec![ChatChoice {
                index: 0,
                message,
                finish_reason: Some(
                    if has_tool_calls { "tool_calls" } else { "stop" }.to_string(),
                ),
            }],
            usage,
        }
    }

    /// Translates one Responses API stream event into a chunk.
    fn translate_responses_event(
        event: &Value,
        model: &str,
        tool_seen: &mut u32,
    ) -> Option<StreamChunk> {
        let id = event["response"]["id"]
            .as_str()
            .or_else(|| event["item_id"].as_str())
            .unwrap_or("resp")
            .to_string();
        let chunk = |delta: StreamDelta, finish: Option<&str>| StreamChunk {
            id: id.clone(),
            model: model.to_string(),
            choices: vec![StreamChoice {
                index: 0,
                delta,
                finish_reason: finish.map(String::from),
            }],
            usage: None,
        };

        match event["type"].as_str().unwrap_or_default() {
            "response.output_text.delta" => Some(chunk(
                StreamDelta {
                    content: event["delta"].as_str().map(String::from),
                    ..Default::default()
                },
                None,
            )),
            "response.reasoning_summary_text.delta" => Some(chunk(
                StreamDelta {
                    reasoning_content: event["delta"].as_str().map(String::from),
                    ..Default::default()
                },
                None,
            )),
            "response.output_item.added" if event["item"]["type"] == "function_call" => {
                let index = *tool_seen;
                *tool_seen += 1;
                Some(chunk(
                    StreamDelta {
                        tool_calls: Some(vec![ToolCallDelta {
                            index,
                            id: event["item"]["call_id"].as_str().map(String::from),
                            call_type: Some("function".to_string()),
                            function: Some(ToolCallFunctionDelta {
                                name: event["item"]["name"].as_str().map(String::from),
                                arguments: Some(String::new()),
                            }),
                        }]),
                        ..Default::default()
                    },
                    None,
                ))
            }
            "response.function_call_arguments.delta" => {
                let index = tool_seen.saturating_sub(1);
                Some(chunk(
                    StreamDelta {
                        tool_calls: Some(vec![ToolCallDelta {
                            index,
                            id: None,
                            call_type: None,
                            function: Some(ToolCallFunctionDelta {
                                name: None,
                                arguments: event["delta"].as_str().map(String::from),
                            }),
                        }]),
                        ..Default::default()
                    },
                    None,
                ))
            }
            "response.completed" => Some(chunk(
                StreamDelta::default(),
                Some(if *tool_seen > 0 { "tool_calls" } else { "stop" }),
            )),
            _ => None,
        }
    }

    async fn post_with_retries(
        &self,
        url: &str,
        payload: &Value,
    ) -> Result<reqwest::Response, ProviderError> {
        let mut network_retried = false;
        let mut attempt = 0;
        loop {
            debug!(url = %url, attempt, "OpenAI request");
            let result = self
                .client
                .post(url)
                .bearer_auth(&self.api_key)
                .header("Content-Type", "application/json")
                .json(payload)
                .send()
                .await;
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
                    error!(status, "OpenAI API error: {}", body);
                    if status == 429 {
                        return Err(ProviderError::RateLimited {
                            provider: "openai".to_string(),
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

#[async_trait]
impl ChatProvider for OpenAiProvider {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, ProviderError> {
        if self.should_use_responses_api(&request.model) {
            let url = format!("{}/responses", self.base_url);
            let payload = Self::build_responses_payload(request, false);
            let response = self.post_with_retries(&url, &payload).await?;
            let body: Value = response.json().await.map_err(|e| {
                ProviderError::Serialization(format!("invalid response body: {}", e))
            })?;
            return Ok(Self::extract_responses_completion(&body, &request.model));
        }
        let url = format!("{}/chat/completions", self.base_url);
        let payload = Self::build_chat_payload(request, false);
        let response = self.post_with_retries(&url, &payload).await?;
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Request(format!("Failed to read body: {}", e)))?;
        parse_completion(&body, &request.model)
    }

    async fn stream(&self, request: &ChatRequest) -> Result<ChatStream, ProviderError> {
        let model = request.model.clone();
        let tail_model = model.clone();
        if self.should_use_responses_api(&request.model) {
            let url = format!("{}/responses", self.base_url);
            let payload = Self::build_responses_payload(request, true);
            let response = self.post_with_retries(&url, &payload).await?;
            let mut tool_seen: u32 = 0;
            let chunks = data_lines(response.bytes_stream()).filter_map(move |payload| {
                let model = model.clone();
                let item = match payload.and_then(|p| {
                    serde_json::from_str::<Value>(&p)
                        .map_err(|e| ProviderError::Serialization(format!("invalid event: {}", e)))
                }) {
                    Ok(event) => {
                        Self::translate_responses_event(&event, &model, &mut tool_seen).map(Ok)
                    }
                    Err(e) => Some(Err(e)),
                };
                async move { item }
            });
            return Ok(Box::pin(crate::openrouter::with_synthetic_finish(chunks, tail_model)));
        }

        let url = format!("{}/chat/completions", self.base_url);
        let payload = Self::build_chat_payload(request, true);
        let response = self.post_with_retries(&url, &payload).await?;
        let chunks = data_lines(response.bytes_stream()).filter_map(move |payload| {
            let model = model.clone();
            async move {
                match payload {
                    Ok(payload) => match parse_chunk(&payload, &model) {
                        Ok(chunk) => Some(Ok(chunk)),
                        Err(e) => {
                            debug!("Skipping unparseable chunk: {}", e);
                            None
                        }
                    },
                    Err(e) => Some(Err(e)),
                }
            }
        });
        Ok(Box::pin(crate::openrouter::with_synthetic_finish(chunks, tail_model)))
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }
}
