//! Provider abstraction layer for Portico.
//!
//! This crate defines the unified contract over chat-completion providers:
//! the message model shared by the orchestrator and every adapter, the
//! streaming chunk schema, and the reasoning-preservation helpers that keep
//! provider thinking traces round-trip stable across turns.

use async_trait::async_trait;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;
use thiserror::Error;

/// Represents an error that can occur when interacting with a chat provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// An error occurred during the API request (network issues, invalid request).
    #[error("Request Error: {0}")]
    Request(String),

    /// The provider returned a non-success status.
    #[error("Provider API error ({status}): {body}")]
    Api {
        /// HTTP status code returned by the provider.
        status: u16,
        /// Raw error body, truncated by the adapter when oversized.
        body: String,
    },

    /// Rate limit or quota exhaustion, after retries were spent.
    #[error("Provider '{provider}' rate limited{}", message.as_ref().map(|m| format!(": {}", m)).unwrap_or_default())]
    RateLimited {
        /// The provider name (e.g., "openrouter", "anthropic").
        provider: String,
        /// Optional error message from the provider.
        message: Option<String>,
    },

    /// An error occurred during serialization or deserialization.
    #[error("Serialization Error: {0}")]
    Serialization(String),

    /// No adapter is configured for the requested model.
    #[error("Unsupported model: {0}")]
    UnsupportedModel(String),

    /// The provider API key is missing from the environment.
    #[error("Missing API key: {0}")]
    MissingApiKey(String),

    /// Other unexpected errors.
    #[error("Provider error: {0}")]
    Other(String),
}

/// Discriminator for the configured provider adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenRouter aggregation endpoint.
    OpenRouter,
    /// OpenAI Chat Completions / Responses API.
    OpenAi,
    /// Anthropic Messages API.
    Anthropic,
    /// Google Gemini generateContent API.
    Gemini,
    /// MiniMax, served through its Anthropic-compatible endpoint.
    MiniMax,
}

impl ProviderKind {
    /// Stable lowercase identifier used in state keys and model catalogs.
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::OpenRouter => "openrouter",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Gemini => "google",
            ProviderKind::MiniMax => "minimax",
        }
    }
}

/// A single structured thinking-trace entry.
///
/// Entries are merged across streaming chunks and conversation turns by
/// `(id | index)` identity so interleaved thinking survives being echoed back
/// to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ReasoningDetail {
    /// Detail type (e.g., "reasoning.text", "reasoning.encrypted").
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub detail_type: Option<String>,
    /// Provider-assigned identity, stable across chunks of the same block.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Wire format hint (e.g., "anthropic-claude-v1").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// Positional identity when the provider assigns no id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    /// Accumulated reasoning text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Opaque signature required to replay the block (e.g., Anthropic).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl ReasoningDetail {
    fn matches(&self, other: &ReasoningDetail) -> bool {
        if self.id.is_some() && self.id == other.id {
            return true;
        }
        self.id.is_none() && other.id.is_none() && self.index.is_some() && self.index == other.index
    }
}

/// Merges incoming reasoning details into an existing list.
///
/// Entries that share an `id` (or, lacking ids, an `index`) have their text
/// concatenated onto the existing entry; everything else is appended in
/// arrival order. Merging the same batch twice is idempotent for entries
/// whose text already ends with the incoming fragment.
pub fn merge_reasoning_details(
    existing: &mut Vec<ReasoningDetail>,
    incoming: &[ReasoningDetail],
) {
    for detail in incoming {
        if let Some(slot) = existing.iter_mut().find(|d| d.matches(detail)) {
            if let Some(ref fragment) = detail.text {
                match slot.text {
                    Some(ref mut text) if !text.ends_with(fragment.as_str()) => {
                        text.push_str(fragment);
                    }
                    Some(_) => {}
                    None => slot.text = Some(fragment.clone()),
                }
            }
            if slot.signature.is_none() {
                slot.signature = detail.signature.clone();
            }
            if slot.format.is_none() {
                slot.format = detail.format.clone();
            }
        } else {
            existing.push(detail.clone());
        }
    }
}

/// The function payload of a tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallFunction {
    /// Catalog function name.
    pub name: String,
    /// JSON-encoded argument object. Always a string on the wire.
    pub arguments: String,
}

/// A tool invocation requested by the assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call id, echoed back in the tool result message.
    pub id: String,
    /// Always "function" for the providers we bridge.
    #[serde(rename = "type", default = "default_tool_call_type")]
    pub call_type: String,
    /// The function name and arguments.
    pub function: ToolCallFunction,
}

fn default_tool_call_type() -> String {
    "function".to_string()
}

/// A function definition advertised to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolFunction {
    /// Catalog function name (sanitized, unique).
    pub name: String,
    /// Human-readable description shown to the model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema of the argument object.
    pub parameters: Value,
}

/// A tool definition in the OpenAI function-calling shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDef {
    /// Always "function".
    #[serde(rename = "type", default = "default_tool_call_type")]
    pub def_type: String,
    /// The function definition.
    pub function: ToolFunction,
}

impl ToolDef {
    /// Wraps a function definition in the wire envelope.
    pub fn function(function: ToolFunction) -> Self {
        Self { def_type: "function".to_string(), function }
    }
}

/// Represents a message in a conversation, in any of the four roles.
///
/// Assistant messages may carry tool calls and reasoning state; tool messages
/// carry the `tool_call_id` they respond to. Provider-specific opaque state
/// (e.g., Gemini thought signatures) rides in `provider_state` and is never
/// interpreted outside the owning adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ChatMessage {
    /// One of "system", "user", "assistant", "tool".
    pub role: String,
    /// Message text. Absent for assistant messages that only call tools.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Tool invocations requested by an assistant message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// For tool-role messages: the id of the call this result answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// For tool-role messages: the function name that produced the result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Flat reasoning text, as surfaced by OpenRouter-style providers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    /// Structured reasoning entries, merged across chunks by (id | index).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_details: Option<Vec<ReasoningDetail>>,
    /// Opaque provider continuation state (thought signatures, block maps).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_state: Option<Value>,
}

impl ChatMessage {
    /// Creates a system message.
    pub fn system<S: Into<String>>(content: S) -> Self {
        Self { role: "system".to_string(), content: Some(content.into()), ..Default::default() }
    }

    /// Creates a user message.
    pub fn user<S: Into<String>>(content: S) -> Self {
        Self { role: "user".to_string(), content: Some(content.into()), ..Default::default() }
    }

    /// Creates a plain assistant message.
    pub fn assistant<S: Into<String>>(content: S) -> Self {
        Self { role: "assistant".to_string(), content: Some(content.into()), ..Default::default() }
    }

    /// Creates a tool-result message answering `tool_call_id`.
    pub fn tool<S: Into<String>>(tool_call_id: S, name: S, content: S) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(content.into()),
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// True when this assistant message requests at least one tool call.
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|calls| !calls.is_empty())
    }

    /// Content with inline `<think>` ranges removed, for display surfaces.
    ///
    /// History keeps the raw content so the tags round-trip to the provider.
    pub fn display_content(&self) -> Option<String> {
        self.content.as_deref().map(strip_think_tags)
    }
}

/// Ensures a tool-call arguments value is a valid JSON string.
///
/// Strings that already parse as JSON pass through untouched; structured
/// values are re-encoded; anything unparseable is wrapped as
/// `{"raw": "<original>"}` rather than dropped.
pub fn normalize_tool_arguments(raw: &Value) -> String {
    match raw {
        Value::String(s) => {
            if serde_json::from_str::<Value>(s).is_ok() {
                s.clone()
            } else {
                serde_json::json!({ "raw": s }).to_string()
            }
        }
        other => other.to_string(),
    }
}

/// Splits inline `<think>` ranges out of streamed content.
///
/// Returns `(display_text, reasoning_text)`. Unterminated open tags swallow
/// the rest of the input into the reasoning side, matching how providers
/// emit the opening tag long before the close arrives.
pub fn split_think_tags(content: &str) -> (String, String) {
    let mut display = String::new();
    let mut reasoning = String::new();
    let mut rest = content;
    loop {
        match rest.find("<think>") {
            Some(open) => {
                display.push_str(&rest[..open]);
                let after_open = &rest[open + "<think>".len()..];
                match after_open.find("</think>") {
                    Some(close) => {
                        reasoning.push_str(&after_open[..close]);
                        rest = &after_open[close + "</think>".len()..];
                    }
                    None => {
                        reasoning.push_str(after_open);
                        rest = "";
                    }
                }
            }
            None => {
                display.push_str(rest);
                break;
            }
        }
        if rest.is_empty() {
            break;
        }
    }
    (display, reasoning)
}

/// Content with `<think>` ranges (tags and body) removed.
pub fn strip_think_tags(content: &str) -> String {
    split_think_tags(content).0
}

/// Reconstructs content carrying its `<think>` block for history storage.
pub fn rebuild_think_content(display: &str, reasoning: &str) -> String {
    if reasoning.is_empty() {
        display.to_string()
    } else {
        format!("<think>{}</think>{}", reasoning, display)
    }
}

/// Provider-specific generation hints that ride alongside a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ReasoningOptions {
    /// Effort level for OpenAI-style reasoning models (low/medium/high/minimal).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effort: Option<String>,
    /// Thinking token budget for Anthropic/Gemini-style providers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget_tokens: Option<i64>,
    /// Whether the provider should include reasoning in the response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_reasoning: Option<bool>,
    /// Responses-API reasoning summary mode ("auto", "detailed").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// A unified chat-completion request, accepted by every adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Provider-scoped model id (e.g., "anthropic/claude-sonnet-4").
    pub model: String,
    /// Ordered conversation history.
    pub messages: Vec<ChatMessage>,
    /// Tool catalog advertised for this request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Completion token ceiling.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Reasoning hints, interpreted per provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningOptions>,
}

impl ChatRequest {
    /// Creates a request with just a model and messages.
    pub fn new<S: Into<String>>(model: S, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: None,
            temperature: None,
            max_tokens: None,
            reasoning: None,
        }
    }
}

/// Token usage statistics for a completed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Usage {
    /// Number of tokens in the prompt.
    pub prompt_tokens: u32,
    /// Number of tokens in the completion.
    pub completion_tokens: u32,
    /// Total number of tokens used.
    pub total_tokens: u32,
}

/// One completion alternative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoice {
    /// Choice index, zero for every provider we bridge.
    pub index: u32,
    /// The assistant message.
    pub message: ChatMessage,
    /// Why generation stopped ("stop", "tool_calls", "length").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// A non-streaming chat completion in the OpenAI-compatible shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletion {
    /// Provider-assigned completion id.
    pub id: String,
    /// Model that produced the completion.
    pub model: String,
    /// Completion alternatives. Adapters always produce exactly one.
    pub choices: Vec<ChatChoice>,
    /// Token accounting, when the provider reports it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ChatCompletion {
    /// The first (and only) assistant message, if present.
    pub fn message(&self) -> Option<&ChatMessage> {
        self.choices.first().map(|c| &c.message)
    }
}

/// An incremental tool-call fragment inside a stream delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ToolCallDelta {
    /// Position of the call this fragment extends.
    pub index: u32,
    /// Call id, present on the first fragment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Always "function" when present.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub call_type: Option<String>,
    /// Name/argument fragments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function: Option<ToolCallFunctionDelta>,
}

/// Function name/argument fragments inside a tool-call delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ToolCallFunctionDelta {
    /// Function name, present on the first fragment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Argument text fragment, concatenated across chunks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// The delta payload of a streaming chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StreamDelta {
    /// Role, present on the first chunk only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Content fragment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Reasoning text fragment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    /// Structured reasoning fragments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_details: Option<Vec<ReasoningDetail>>,
    /// Tool-call fragments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
    /// Opaque provider continuation state, emitted on the final chunk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_state: Option<Value>,
}

/// One streamed choice delta.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChoice {
    /// Choice index, zero in practice.
    pub index: u32,
    /// The incremental payload.
    pub delta: StreamDelta,
    /// Set on the terminal chunk of the choice.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// A streaming chunk in the OpenAI-compatible chunk schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Completion id shared across all chunks of a response.
    pub id: String,
    /// Model that is producing the stream.
    pub model: String,
    /// Chunk choices.
    pub choices: Vec<StreamChoice>,
    /// Usage, reported by some providers on the final chunk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl StreamChunk {
    /// A synthetic terminal chunk for streams the upstream closed abruptly.
    pub fn synthetic_finish(id: &str, model: &str) -> Self {
        Self {
            id: id.to_string(),
            model: model.to_string(),
            choices: vec![StreamChoice {
                index: 0,
                delta: StreamDelta::default(),
                finish_reason: Some("stop".to_string()),
            }],
            usage: None,
        }
    }

    /// The first choice's delta, if any.
    pub fn delta(&self) -> Option<&StreamDelta> {
        self.choices.first().map(|c| &c.delta)
    }
}

/// A pinned stream of completion chunks.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, ProviderError>> + Send>>;

/// A trait for chat-completion providers.
///
/// All providers must be `Send + Sync` to allow concurrent use across
/// exchanges. `complete` returns a single completion; `stream` returns an
/// async sequence of chunks ending with a finish-reason chunk (adapters
/// synthesize one if the upstream closes without it).
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Generates a single chat completion.
    ///
    /// # Errors
    /// Returns a `ProviderError` if the request fails after retries.
    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, ProviderError>;

    /// Generates a streaming chat completion.
    ///
    /// # Errors
    /// Returns a `ProviderError` if the stream cannot be created. Errors
    /// during streaming are yielded as items in the stream itself.
    async fn stream(&self, request: &ChatRequest) -> Result<ChatStream, ProviderError>;

    /// Which provider family this adapter speaks to.
    fn kind(&self) -> ProviderKind;
}

impl std::fmt::Debug for dyn ChatProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ChatProvider").field(&self.kind()).finish()
    }
}
