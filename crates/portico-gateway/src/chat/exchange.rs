//! The agentic exchange loop.
//!
//! One exchange appends the user message, then iterates: call the
//! provider, execute any requested tool calls, append their results, and
//! re-enter until the provider answers without tool calls. Streaming
//! exchanges run the same loop with an emitter that relays SSE events
//! through a bounded channel; a closed channel (client disconnect) aborts
//! the loop at the next emit.

use crate::chat::catalog::{CatalogEntry, build_catalog};
use crate::chat::sessions::{ChatSession, ChatStep};
use crate::state::AppState;
use portico_abstraction::{
    ChatMessage, ChatProvider, ChatRequest, ProviderError, ReasoningOptions, ToolCall,
    ToolCallFunction, merge_reasoning_details, normalize_tool_arguments, rebuild_think_content,
    strip_think_tags,
};
use portico_providers::provider_for_model;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

fn default_true() -> bool {
    true
}

/// Body of `POST /sessions/{id}/messages`.
#[derive(Debug, Clone, Deserialize)]
pub struct MessagePayload {
    /// The user message.
    pub message: String,
    /// Switch the session to this model before answering.
    #[serde(default)]
    pub model: Option<String>,
    /// Stream SSE events instead of returning one JSON body.
    #[serde(default)]
    pub stream: bool,
    /// Sampling temperature.
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Completion token ceiling.
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    /// Ask the provider for reasoning tokens.
    #[serde(default = "default_true")]
    pub include_reasoning: bool,
    /// Reasoning effort hint (low/medium/high/minimal).
    #[serde(default)]
    pub reasoning_effort: Option<String>,
    /// Thinking token budget for budget-style providers.
    #[serde(default)]
    pub thinking_budget: Option<i64>,
}

/// Why an exchange stopped before completing.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// The provider call failed after retries.
    #[error("{0}")]
    Provider(#[from] ProviderError),
    /// The client went away; the worker observed a closed channel.
    #[error("client disconnected")]
    Cancelled,
}

/// Sends exchange events to the streaming relay.
pub struct Emitter {
    tx: mpsc::Sender<Value>,
}

impl Emitter {
    /// Wraps the SSE relay channel.
    pub fn new(tx: mpsc::Sender<Value>) -> Self {
        Self { tx }
    }

    async fn emit(&self, event_type: &str, mut fields: Value) -> Result<(), ExchangeError> {
        fields["type"] = json!(event_type);
        self.tx.send(fields).await.map_err(|_| ExchangeError::Cancelled)
    }
}

/// The outcome of one provider round.
#[derive(Debug)]
struct ProviderTurn {
    message: ChatMessage,
    tool_calls: Vec<ToolCall>,
    finish_reason: Option<String>,
    clean_content: String,
}

/// Resolves the provider adapter for a session, applying any model
/// override from the payload first.
pub fn resolve_provider(
    session: &mut ChatSession,
    payload: &MessagePayload,
) -> Result<std::sync::Arc<dyn ChatProvider>, ProviderError> {
    if let Some(ref model) = payload.model {
        if *model != session.model {
            session.model = model.clone();
        }
    }
    provider_for_model(&session.model)
}

/// Runs one exchange to completion and returns the final assistant
/// message. The caller holds the session lock for the duration, so
/// message appends are strictly sequential per session.
pub async fn perform_exchange(
    app: &AppState,
    session: &mut ChatSession,
    provider: &dyn ChatProvider,
    payload: &MessagePayload,
    emitter: Option<&Emitter>,
) -> Result<ChatMessage, ExchangeError> {
    if session.tool_defs.is_empty() {
        let (defs, index) = build_catalog(app, session.allowlist.as_deref());
        session.tool_defs = defs;
        session.tool_index = index;
    }

    session.messages.push(ChatMessage::user(payload.message.clone()));
    if let Some(emitter) = emitter {
        emitter.emit("session.updated", json!({"session": session.to_json()})).await?;
    }

    let mut iteration = 0;
    loop {
        iteration += 1;
        let mut step = ChatStep::start(
            format!("Step {}: Generating response", iteration),
            json!({"phase": "generation"}),
        );
        if let Some(emitter) = emitter {
            emitter.emit("step.started", json!({"step": step.to_json()})).await?;
        }

        let request = build_request(session, payload);
        let turn = match emitter {
            Some(emitter) => stream_turn(provider, &request, emitter).await?,
            None => complete_turn(provider, &request).await?,
        };

        info!(
            "Provider returned: finish_reason={:?}, tool_calls={}",
            turn.finish_reason,
            turn.tool_calls.len()
        );

        if !turn.tool_calls.is_empty() {
            // The assistant message that declared the calls goes first;
            // its tool results follow in declaration order.
            session.messages.push(turn.message.clone());
            step.detail["toolCalls"] = serde_json::to_value(&turn.tool_calls).unwrap_or_default();

            for call in &turn.tool_calls {
                if let Some(emitter) = emitter {
                    emitter
                        .emit("tool.call.started", json!({"toolCall": call}))
                        .await?;
                }
                let output = execute_tool_call(app, session, call).await;
                session.messages.push(ChatMessage::tool(
                    call.id.clone(),
                    call.function.name.clone(),
                    output.to_string(),
                ));
                if let Some(emitter) = emitter {
                    let mut result_payload =
                        serde_json::to_value(call).unwrap_or_else(|_| json!({}));
                    result_payload["result"] = output;
                    emitter
                        .emit("tool.call.result", json!({"toolCall": result_payload}))
                        .await?;
                }
            }

            step.complete("tools_executed");
            session.steps.push(step.clone());
            if let Some(emitter) = emitter {
                emitter
                    .emit(
                        "step.completed",
                        json!({"step": step.to_json(), "status": "tools_executed"}),
                    )
                    .await?;
            }
            continue;
        }

        session.messages.push(turn.message.clone());
        step.detail["finishReason"] = json!(turn.finish_reason);
        step.detail["summary"] = json!(summarize(&turn.clean_content));
        step.complete("completed");
        session.steps.push(step.clone());

        if let Some(emitter) = emitter {
            let mut ui_message =
                serde_json::to_value(&turn.message).unwrap_or_else(|_| json!({}));
            ui_message["content"] = json!(turn.clean_content);
            emitter
                .emit(
                    "message.completed",
                    json!({"message": ui_message, "finishReason": turn.finish_reason}),
                )
                .await?;
            emitter
                .emit(
                    "step.completed",
                    json!({"step": step.to_json(), "status": "completed"}),
                )
                .await?;
            emitter.emit("session.updated", json!({"session": session.to_json()})).await?;
        }
        return Ok(turn.message);
    }
}

fn build_request(session: &ChatSession, payload: &MessagePayload) -> ChatRequest {
    let messages: Vec<ChatMessage> = session
        .messages
        .iter()
        .map(|msg| {
            let mut msg = msg.clone();
            // Argument strings must be valid JSON before any provider sees
            // them again.
            if let Some(ref mut calls) = msg.tool_calls {
                for call in calls {
                    let raw = Value::String(call.function.arguments.clone());
                    call.function.arguments = normalize_tool_arguments(&raw);
                }
            }
            msg
        })
        .collect();

    let mut request = ChatRequest::new(session.model.clone(), messages);
    if !session.tool_defs.is_empty() {
        request.tools = Some(session.tool_defs.clone());
    }
    request.temperature = payload.temperature;
    request.max_tokens = payload.max_output_tokens;
    request.reasoning = Some(ReasoningOptions {
        effort: payload.reasoning_effort.clone(),
        budget_tokens: payload.thinking_budget,
        include_reasoning: Some(payload.include_reasoning),
        summary: None,
    });
    request
}

async fn complete_turn(
    provider: &dyn ChatProvider,
    request: &ChatRequest,
) -> Result<ProviderTurn, ProviderError> {
    let completion = provider.complete(request).await?;
    let choice = completion
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Serialization("completion carried no choices".to_string()))?;
    let mut message = choice.message;
    message.role = "assistant".to_string();

    if let Some(ref mut calls) = message.tool_calls {
        for call in calls.iter_mut() {
            let raw = Value::String(call.function.arguments.clone());
            call.function.arguments = normalize_tool_arguments(&raw);
        }
    }

    let clean_content = message.content.as_deref().map(strip_think_tags).unwrap_or_default();
    let tool_calls = message.tool_calls.clone().unwrap_or_default();
    Ok(ProviderTurn { message, tool_calls, finish_reason: choice.finish_reason, clean_content })
}

#[derive(Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

async fn stream_turn(
    provider: &dyn ChatProvider,
    request: &ChatRequest,
    emitter: &Emitter,
) -> Result<ProviderTurn, ExchangeError> {
    use futures::StreamExt;

    let mut stream = provider.stream(request).await?;

    let mut content = String::new();
    let mut reasoning = String::new();
    let mut reasoning_details = Vec::new();
    let mut calls: Vec<ToolCallAccumulator> = Vec::new();
    let mut provider_state: Option<Value> = None;
    let mut finish_reason: Option<String> = None;
    let mut role: Option<String> = None;
    let mut in_think = false;
    let mut think_buffer = String::new();

    while let Some(item) = stream.next().await {
        let chunk = match item {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!("Stream error from provider: {}", e);
                return Err(ExchangeError::Provider(e));
            }
        };
        for choice in &chunk.choices {
            let delta = &choice.delta;
            if let Some(ref delta_role) = delta.role {
                role = Some(delta_role.clone());
            }

            if let Some(ref details) = delta.reasoning_details {
                for detail in details {
                    if let Some(ref text) = detail.text {
                        if !text.is_empty() {
                            reasoning.push_str(text);
                            emitter.emit("reasoning.delta", json!({"text": text})).await?;
                        }
                    }
                }
                merge_reasoning_details(&mut reasoning_details, details);
            }

            if let Some(ref text) = delta.reasoning_content {
                if !text.is_empty() {
                    reasoning.push_str(text);
                    emitter.emit("reasoning.delta", json!({"text": text})).await?;
                }
            }

            if let Some(ref chunk_text) = delta.content {
                let mut rest = chunk_text.as_str();
                while !rest.is_empty() {
                    if in_think {
                        match rest.find("</think>") {
                            Some(end) => {
                                think_buffer.push_str(&rest[..end]);
                                reasoning.push_str(&think_buffer);
                                emitter
                                    .emit("reasoning.delta", json!({"text": think_buffer}))
                                    .await?;
                                think_buffer.clear();
                                in_think = false;
                                rest = &rest[end + "</think>".len()..];
                            }
                            None => {
                                think_buffer.push_str(rest);
                                rest = "";
                            }
                        }
                    } else {
                        match rest.find("<think>") {
                            Some(start) => {
                                let before = &rest[..start];
                                if !before.is_empty() {
                                    content.push_str(before);
                                    emitter
                                        .emit("message.delta", json!({"text": before}))
                                        .await?;
                                }
                                in_think = true;
                                rest = &rest[start + "<think>".len()..];
                            }
                            None => {
                                content.push_str(rest);
                                emitter.emit("message.delta", json!({"text": rest})).await?;
                                rest = "";
                            }
                        }
                    }
                }
            }

            for call_delta in delta.tool_calls.iter().flatten() {
                let index = call_delta.index as usize;
                while calls.len() <= index {
                    calls.push(ToolCallAccumulator::default());
                }
                let entry = &mut calls[index];
                if let Some(ref id) = call_delta.id {
                    entry.id = id.clone();
                }
                if let Some(ref function) = call_delta.function {
                    if let Some(ref name) = function.name {
                        entry.name = name.clone();
                    }
                    if let Some(ref fragment) = function.arguments {
                        entry.arguments.push_str(fragment);
                        emitter
                            .emit(
                                "tool.call.delta",
                                json!({"toolCall": {"id": entry.id, "arguments": entry.arguments}}),
                            )
                            .await?;
                    }
                }
            }

            if let Some(ref state) = delta.provider_state {
                provider_state = Some(state.clone());
            }
            if let Some(ref reason) = choice.finish_reason {
                finish_reason = Some(reason.clone());
            }
        }
    }

    // History keeps `<think>` ranges intact so the next turn round-trips
    // them; the UI stream already received reasoning separately.
    let (stored_content, clean_content) = if !reasoning.is_empty() && reasoning_details.is_empty() {
        (rebuild_think_content(&content, &reasoning), content.clone())
    } else {
        (content.clone(), content.clone())
    };

    let mut message = ChatMessage {
        role: role.unwrap_or_else(|| "assistant".to_string()),
        content: Some(stored_content),
        ..Default::default()
    };
    if !reasoning.is_empty() {
        message.reasoning_content = Some(reasoning);
    }
    if !reasoning_details.is_empty() {
        message.reasoning_details = Some(reasoning_details);
    }
    message.provider_state = provider_state;

    let tool_calls: Vec<ToolCall> = calls
        .into_iter()
        .filter(|c| !c.name.is_empty())
        .map(|c| {
            let raw = Value::String(if c.arguments.is_empty() {
                "{}".to_string()
            } else {
                c.arguments
            });
            ToolCall {
                id: c.id,
                call_type: "function".to_string(),
                function: ToolCallFunction {
                    name: c.name,
                    arguments: normalize_tool_arguments(&raw),
                },
            }
        })
        .collect();
    if !tool_calls.is_empty() {
        message.tool_calls = Some(tool_calls.clone());
    }

    Ok(ProviderTurn { message, tool_calls, finish_reason, clean_content })
}

/// Executes one catalog function. Failures are encoded in the returned
/// value so the loop can report them to the model instead of aborting the
/// exchange.
async fn execute_tool_call(app: &AppState, session: &ChatSession, call: &ToolCall) -> Value {
    let Some(entry) = session.tool_index.get(&call.function.name) else {
        return json!({"ok": false, "error": format!("Unknown tool '{}'", call.function.name)});
    };
    let args: Value = serde_json::from_str(&call.function.arguments)
        .unwrap_or_else(|_| Value::Object(serde_json::Map::new()));

    if let Some(management) = entry.management {
        return management.execute(app, &args);
    }

    dispatch_upstream(app, entry, args).await
}

async fn dispatch_upstream(app: &AppState, entry: &CatalogEntry, args: Value) -> Value {
    let Some(session) = app.supervisor().get(&entry.server) else {
        return json!({"ok": false, "error": format!("Server '{}' not found", entry.server)});
    };
    let endpoint_name = format!("{}/{}", entry.server, entry.tool_name);
    let timeout = app.settings().tool_timeout.map(Duration::from_secs_f64);
    let max_timeout = app.settings().tool_timeout_max.map(Duration::from_secs_f64);
    match app
        .runner()
        .execute(&session, &entry.tool_name, &endpoint_name, args, timeout, max_timeout)
        .await
    {
        Ok(value) => value,
        Err(e) => json!({"ok": false, "error": e.to_string()}),
    }
}

fn summarize(content: &str) -> String {
    const LIMIT: usize = 160;
    let trimmed = content.trim();
    if trimmed.chars().count() <= LIMIT {
        trimmed.to_string()
    } else {
        let prefix: String = trimmed.chars().take(LIMIT).collect();
        format!("{}...", prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use portico_abstraction::{
        ChatChoice, ChatCompletion, ChatStream, ProviderKind, StreamChoice, StreamChunk,
        StreamDelta, ToolCallDelta, ToolCallFunctionDelta,
    };

    /// Scripted provider: replays canned turns, one per provider round.
    struct ScriptedProvider {
        turns: std::sync::Mutex<Vec<Vec<StreamChunk>>>,
    }

    impl ScriptedProvider {
        fn new(turns: Vec<Vec<StreamChunk>>) -> Self {
            Self { turns: std::sync::Mutex::new(turns) }
        }
    }

    #[async_trait]
    impl ChatProvider for ScriptedProvider {
        async fn complete(&self, _request: &ChatRequest) -> Result<ChatCompletion, ProviderError> {
            Ok(ChatCompletion {
                id: "scripted".to_string(),
                model: "scripted".to_string(),
                choices: vec![ChatChoice {
                    index: 0,
                    message: ChatMessage::assistant("done"),
                    finish_reason: Some("stop".to_string()),
                }],
                usage: None,
            })
        }

        async fn stream(&self, _request: &ChatRequest) -> Result<ChatStream, ProviderError> {
            let turn = self.turns.lock().unwrap().remove(0);
            Ok(Box::pin(futures::stream::iter(turn.into_iter().map(Ok))))
        }

        fn kind(&self) -> ProviderKind {
            ProviderKind::OpenRouter
        }
    }

    fn content_chunk(text: &str, finish: Option<&str>) -> StreamChunk {
        StreamChunk {
            id: "c1".to_string(),
            model: "m".to_string(),
            choices: vec![StreamChoice {
                index: 0,
                delta: StreamDelta { content: Some(text.to_string()), ..Default::default() },
                finish_reason: finish.map(String::from),
            }],
            usage: None,
        }
    }

    fn tool_call_chunks() -> Vec<StreamChunk> {
        vec![
            StreamChunk {
                id: "c1".to_string(),
                model: "m".to_string(),
                choices: vec![StreamChoice {
                    index: 0,
                    delta: StreamDelta {
                        tool_calls: Some(vec![ToolCallDelta {
                            index: 0,
                            id: Some("call_1".to_string()),
                            call_type: Some("function".to_string()),
                            function: Some(ToolCallFunctionDelta {
                                name: Some("portico_list_servers".to_string()),
                                arguments: Some("{".to_string()),
                            }),
                        }]),
                        ..Default::default()
                    },
                    finish_reason: None,
                }],
                usage: None,
            },
            StreamChunk {
                id: "c1".to_string(),
                model: "m".to_string(),
                choices: vec![StreamChoice {
                    index: 0,
                    delta: StreamDelta {
                        tool_calls: Some(vec![ToolCallDelta {
                            index: 0,
                            id: None,
                            call_type: None,
                            function: Some(ToolCallFunctionDelta {
                                name: None,
                                arguments: Some("}".to_string()),
                            }),
                        }]),
                        ..Default::default()
                    },
                    finish_reason: Some("tool_calls".to_string()),
                }],
                usage: None,
            },
        ]
    }

    fn emitter() -> (Emitter, mpsc::Receiver<Value>) {
        let (tx, rx) = mpsc::channel(256);
        (Emitter::new(tx), rx)
    }

    async fn drain(mut rx: mpsc::Receiver<Value>) -> Vec<Value> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn request() -> ChatRequest {
        ChatRequest::new("m", vec![ChatMessage::user("hi")])
    }

    #[tokio::test]
    async fn test_stream_turn_accumulates_content() {
        let provider = ScriptedProvider::new(vec![vec![
            content_chunk("Hel", None),
            content_chunk("lo", Some("stop")),
        ]]);
        let (emitter, rx) = emitter();
        let turn = stream_turn(&provider, &request(), &emitter).await.unwrap();
        assert_eq!(turn.message.content.as_deref(), Some("Hello"));
        assert_eq!(turn.finish_reason.as_deref(), Some("stop"));
        assert!(turn.tool_calls.is_empty());

        let events = drain(rx).await;
        let deltas: Vec<&Value> =
            events.iter().filter(|e| e["type"] == "message.delta").collect();
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0]["text"], "Hel");
    }

    #[tokio::test]
    async fn test_stream_turn_splits_think_tags() {
        let provider = ScriptedProvider::new(vec![vec![
            content_chunk("<think>pondering</think>Answer", Some("stop")),
        ]]);
        let (emitter, rx) = emitter();
        let turn = stream_turn(&provider, &request(), &emitter).await.unwrap();
        // History keeps the tags; the clean content drops them.
        assert!(turn.message.content.as_deref().unwrap().contains("<think>"));
        assert_eq!(turn.clean_content, "Answer");
        assert_eq!(turn.message.reasoning_content.as_deref(), Some("pondering"));

        let events = drain(rx).await;
        assert!(events.iter().any(|e| e["type"] == "reasoning.delta"));
        let message_deltas: Vec<&Value> =
            events.iter().filter(|e| e["type"] == "message.delta").collect();
        // Only the non-think range streamed as message text.
        assert_eq!(message_deltas.len(), 1);
        assert_eq!(message_deltas[0]["text"], "Answer");
    }

    #[tokio::test]
    async fn test_stream_turn_accumulates_tool_call_fragments() {
        let provider = ScriptedProvider::new(vec![tool_call_chunks()]);
        let (emitter, rx) = emitter();
        let turn = stream_turn(&provider, &request(), &emitter).await.unwrap();
        assert_eq!(turn.tool_calls.len(), 1);
        assert_eq!(turn.tool_calls[0].id, "call_1");
        assert_eq!(turn.tool_calls[0].function.arguments, "{}");

        let events = drain(rx).await;
        assert!(events.iter().any(|e| e["type"] == "tool.call.delta"));
    }

    #[tokio::test]
    async fn test_stream_turn_merges_reasoning_details() {
        let detail = |id: &str, text: &str| portico_abstraction::ReasoningDetail {
            detail_type: Some("reasoning.text".to_string()),
            id: Some(id.to_string()),
            text: Some(text.to_string()),
            ..Default::default()
        };
        let chunk = |d: portico_abstraction::ReasoningDetail| StreamChunk {
            id: "c1".to_string(),
            model: "m".to_string(),
            choices: vec![StreamChoice {
                index: 0,
                delta: StreamDelta {
                    reasoning_details: Some(vec![d]),
                    ..Default::default()
                },
                finish_reason: None,
            }],
            usage: None,
        };
        let provider = ScriptedProvider::new(vec![vec![
            chunk(detail("r1", "first ")),
            chunk(detail("r1", "second")),
            content_chunk("done", Some("stop")),
        ]]);
        let (emitter, _rx) = emitter();
        let turn = stream_turn(&provider, &request(), &emitter).await.unwrap();
        let details = turn.message.reasoning_details.as_ref().unwrap();
        assert_eq!(details.len(), 1);
        assert_eq!(details[0].text.as_deref(), Some("first second"));
        // reasoning_details format does not rebuild think tags.
        assert!(!turn.message.content.as_deref().unwrap().contains("<think>"));
    }

    #[tokio::test]
    async fn test_cancelled_when_receiver_dropped() {
        let provider = ScriptedProvider::new(vec![vec![content_chunk("Hello", Some("stop"))]]);
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let emitter = Emitter::new(tx);
        let err = stream_turn(&provider, &request(), &emitter).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Cancelled));
    }

    #[tokio::test]
    async fn test_exchange_loop_appends_tool_results_after_assistant() {
        use crate::settings::RuntimeSettings;
        use crate::state::test_support::app_state;

        let (app, _dir) = app_state(RuntimeSettings::default());
        let mut session =
            crate::chat::sessions::ChatSession::new("scripted".to_string(), None, None);
        let (defs, index) = build_catalog(&app, None);
        session.tool_defs = defs;
        session.tool_index = index;

        // Turn one requests a management tool call; turn two answers.
        let provider = ScriptedProvider::new(vec![
            tool_call_chunks(),
            vec![content_chunk("All servers listed.", Some("stop"))],
        ]);

        let payload: MessagePayload =
            serde_json::from_value(json!({"message": "what servers are configured?"})).unwrap();
        let (emitter, rx) = emitter();

        let message = perform_exchange(&app, &mut session, &provider, &payload, Some(&emitter))
            .await
            .unwrap();
        assert_eq!(message.content.as_deref(), Some("All servers listed."));

        // History ordering: user, assistant-with-calls, tool results with
        // the same ids, terminal assistant.
        let roles: Vec<&str> = session.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "assistant", "tool", "assistant"]);
        let declared: Vec<String> = session.messages[1]
            .tool_calls
            .as_ref()
            .unwrap()
            .iter()
            .map(|c| c.id.clone())
            .collect();
        assert_eq!(
            session.messages[2].tool_call_id.as_deref(),
            Some(declared[0].as_str())
        );
        // The tool result carried the management tool's output.
        let tool_output: Value =
            serde_json::from_str(session.messages[2].content.as_deref().unwrap()).unwrap();
        assert_eq!(tool_output["ok"], true);
        // Steps: one tools_executed round, one completed round.
        assert_eq!(session.steps.len(), 2);
        assert_eq!(session.steps[0].status, "tools_executed");
        assert_eq!(session.steps[1].status, "completed");

        let events = drain(rx).await;
        assert!(events.iter().any(|e| e["type"] == "tool.call.started"));
        assert!(events.iter().any(|e| e["type"] == "tool.call.result"));
        assert!(events.iter().any(|e| e["type"] == "message.completed"));
    }

    #[tokio::test]
    async fn test_unknown_tool_call_reports_error_value() {
        use crate::settings::RuntimeSettings;
        use crate::state::test_support::app_state;

        let (app, _dir) = app_state(RuntimeSettings::default());
        let session =
            crate::chat::sessions::ChatSession::new("scripted".to_string(), None, None);
        let call = ToolCall {
            id: "call_x".to_string(),
            call_type: "function".to_string(),
            function: ToolCallFunction {
                name: "nope".to_string(),
                arguments: "{}".to_string(),
            },
        };
        let output = execute_tool_call(&app, &session, &call).await;
        assert_eq!(output["ok"], false);
        assert!(output["error"].as_str().unwrap().contains("Unknown tool"));
    }

    #[test]
    fn test_summarize_truncates() {
        let long = "x".repeat(500);
        let summary = summarize(&long);
        assert!(summary.ends_with("..."));
        assert!(summary.chars().count() <= 163);
        assert_eq!(summarize("short"), "short");
    }
}
