//! OpenAI-compatible wire mapping shared by the OpenRouter and OpenAI
//! adapters.

use portico_abstraction::{ChatCompletion, ChatMessage, ProviderError, StreamChunk, ToolDef};
use serde_json::{Value, json};

/// Serializes history messages for an OpenAI-compatible endpoint.
///
/// Reasoning fields round-trip; provider-opaque state stays local.
pub fn to_wire_messages(messages: &[ChatMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|msg| {
            let mut wire = serde_json::to_value(msg).unwrap_or_else(|_| json!({}));
            if let Some(obj) = wire.as_object_mut() {
                obj.remove("provider_state");
                // Tool and user roles need a concrete content string.
                if msg.role != "assistant" && !obj.contains_key("content") {
                    obj.insert("content".to_string(), json!(""));
                }
            }
            wire
        })
        .collect()
}

/// Serializes the tool catalog, or None when empty.
pub fn to_wire_tools(tools: Option<&Vec<ToolDef>>) -> Option<Value> {
    let tools = tools?;
    if tools.is_empty() {
        return None;
    }
    serde_json::to_value(tools).ok()
}

/// Parses a chat completion body, tolerating absent optional fields.
pub fn parse_completion(body: &str, fallback_model: &str) -> Result<ChatCompletion, ProviderError> {
    let mut value: Value = serde_json::from_str(body)
        .map_err(|e| ProviderError::Serialization(format!("invalid completion body: {}", e)))?;
    fill_envelope_defaults(&mut value, fallback_model);
    serde_json::from_value(value)
        .map_err(|e| ProviderError::Serialization(format!("unexpected completion shape: {}", e)))
}

/// Parses one streaming chunk payload.
pub fn parse_chunk(payload: &str, fallback_model: &str) -> Result<StreamChunk, ProviderError> {
    let mut value: Value = serde_json::from_str(payload)
        .map_err(|e| ProviderError::Serialization(format!("invalid stream chunk: {}", e)))?;
    fill_envelope_defaults(&mut value, fallback_model);
    serde_json::from_value(value)
        .map_err(|e| ProviderError::Serialization(format!("unexpected chunk shape: {}", e)))
}

fn fill_envelope_defaults(value: &mut Value, fallback_model: &str) {
    let Some(obj) = value.as_object_mut() else { return };
    obj.entry("id").or_insert_with(|| json!(""));
    if !obj.get("model").is_some_and(Value::is_string) {
        obj.insert("model".to_string(), json!(fallback_model));
    }
    obj.entry("choices").or_insert_with(|| json!([]));
}
