//! MiniMax provider implementation.
//!
//! MiniMax recommends its Anthropic-compatible endpoint, so this adapter
//! is a thin wrapper around [`AnthropicProvider`] pointed at the MiniMax
//! base URL. Prompt caching stays off since MiniMax does not honor
//! Anthropic `cache_control` markers. Model ids are prefixed
//! `minimax/` on the gateway side; the prefix is stripped on the wire.

use crate::anthropic::AnthropicProvider;
use async_trait::async_trait;
use portico_abstraction::{
    ChatCompletion, ChatProvider, ChatRequest, ChatStream, ProviderError, ProviderKind,
};
use std::env;

const DEFAULT_BASE_URL: &str = "https://api.minimax.io/anthropic";

/// Known MiniMax model ids surfaced in the model catalog.
pub const MINIMAX_MODELS: &[(&str, &str)] = &[
    ("minimax/MiniMax-M2.1", "MiniMax M2.1"),
    ("minimax/MiniMax-M2.1-lightning", "MiniMax M2.1 Lightning"),
    ("minimax/MiniMax-M2", "MiniMax M2"),
];

/// True when the model id belongs to MiniMax.
pub fn is_minimax_model(model: &str) -> bool {
    model.starts_with("minimax/")
}

fn bare_model_name(model: &str) -> &str {
    model.strip_prefix("minimax/").unwrap_or(model)
}

/// MiniMax provider implementation.
#[derive(Debug, Clone)]
pub struct MiniMaxProvider {
    inner: AnthropicProvider,
}

impl MiniMaxProvider {
    /// Creates a provider from the environment.
    ///
    /// # Errors
    /// Returns an error if `MINIMAX_API_KEY` is not set.
    pub fn new() -> Result<Self, ProviderError> {
        let api_key = env::var("MINIMAX_API_KEY").map_err(|_| {
            ProviderError::MissingApiKey("MINIMAX_API_KEY environment variable is required".to_string())
        })?;
        Ok(Self::with_api_key(api_key))
    }

    /// Creates a provider with an explicit API key.
    #[must_use]
    pub fn with_api_key(api_key: String) -> Self {
        let base_url =
            env::var("MINIMAX_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self {
            inner: AnthropicProvider::with_settings(api_key, base_url, false)
                .reporting_as(ProviderKind::MiniMax),
        }
    }

    fn rewrite_model(request: &ChatRequest) -> ChatRequest {
        let mut request = request.clone();
        request.model = bare_model_name(&request.model).to_string();
        request
    }
}

#[async_trait]
impl ChatProvider for MiniMaxProvider {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, ProviderError> {
        let mut completion = self.inner.complete(&Self::rewrite_model(request)).await?;
        completion.model = request.model.clone();
        Ok(completion)
    }

    async fn stream(&self, request: &ChatRequest) -> Result<ChatStream, ProviderError> {
        self.inner.stream(&Self::rewrite_model(request)).await
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::MiniMax
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portico_abstraction::ChatMessage;

    #[test]
    fn test_is_minimax_model() {
        assert!(is_minimax_model("minimax/MiniMax-M2"));
        assert!(!is_minimax_model("gpt-4o"));
    }

    #[test]
    fn test_prefix_stripped_on_wire() {
        let request =
            ChatRequest::new("minimax/MiniMax-M2", vec![ChatMessage::user("hi")]);
        let rewritten = MiniMaxProvider::rewrite_model(&request);
        assert_eq!(rewritten.model, "MiniMax-M2");
    }

    #[test]
    fn test_kind() {
        let provider = MiniMaxProvider::with_api_key("k".to_string());
        assert_eq!(provider.kind(), ProviderKind::MiniMax);
    }

    #[tokio::test]
    async fn test_completion_restores_prefixed_model() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/messages")
            .with_status(200)
            .with_body(r#"{"id":"msg_1","stop_reason":"end_turn","content":[{"type":"text","text":"hi"}]}"#)
            .create_async()
            .await;

        let provider = MiniMaxProvider {
            inner: AnthropicProvider::with_settings("k".to_string(), server.url(), false)
                .reporting_as(ProviderKind::MiniMax),
        };
        let request =
            ChatRequest::new("minimax/MiniMax-M2", vec![ChatMessage::user("hi")]);
        let completion = provider.complete(&request).await.unwrap();
        assert_eq!(completion.model, "minimax/MiniMax-M2");
    }
}
