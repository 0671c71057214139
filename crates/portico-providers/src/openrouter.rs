//! OpenRouter provider implementation.
//!
//! OpenRouter speaks the OpenAI chat-completions dialect with two
//! reasoning extensions: `include_reasoning` requests thinking tokens and
//! `reasoning_effort` tunes them. Reasoning arrives either as a
//! `reasoning_content` delta or inline `<think>` tags, both of which the
//! orchestrator preserves in history.

use crate::retry::{backoff_delay, is_retryable_status, max_retries, timeout};
use crate::sse::data_lines;
use crate::wire::{parse_chunk, parse_completion, to_wire_messages, to_wire_tools};
use async_trait::async_trait;
use futures::StreamExt;
use portico_abstraction::{
    ChatCompletion, ChatProvider, ChatRequest, ChatStream, ProviderError, ProviderKind,
    StreamChunk,
};
use reqwest::Client;
use serde_json::{Value, json};
use std::env;
use std::time::Duration;
use tracing::{debug, error};

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// OpenRouter provider implementation.
#[derive(Debug, Clone)]
pub struct OpenRouterProvider {
    /// The API key for authentication.
    api_key: String,
    /// The base URL for the OpenRouter API.
    base_url: String,
    /// Optional HTTP-Referer attribution header.
    site_url: Option<String>,
    /// Optional X-Title attribution header.
    app_name: Option<String>,
    /// Bounded retry count for transient failures.
    max_retries: u32,
    /// HTTP client for making requests.
    client: Client,
}

impl OpenRouterProvider {
    /// Creates a provider from the environment.
    ///
    /// # Errors
    /// Returns an error if `OPENROUTER_API_KEY` is not set.
    pub fn new() -> Result<Self, ProviderError> {
        let api_key = env::var("OPENROUTER_API_KEY").map_err(|_| {
            ProviderError::MissingApiKey("OPENROUTER_API_KEY environment variable is required".to_string())
        })?;
        Ok(Self::with_api_key(api_key))
    }

    /// Creates a provider with an explicit API key; base URL and tuning
    /// still come from the environment.
    #[must_use]
    pub fn with_api_key(api_key: String) -> Self {
        Self {
            api_key,
            base_url: env::var("OPENROUTER_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            site_url: env::var("OPENROUTER_SITE_URL").ok(),
            app_name: env::var("OPENROUTER_APP_NAME").ok(),
            max_retries: max_retries("OPENROUTER"),
            client: Client::builder()
                .timeout(timeout("OPENROUTER"))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    /// Overrides the base URL, for tests and self-hosted routers.
    #[must_use]
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn apply_headers(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let mut request = request
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json");
        if let Some(ref site_url) = self.site_url {
            request = request.header("HTTP-Referer", site_url.as_str());
        }
        if let Some(ref app_name) = self.app_name {
            request = request.header("X-Title", app_name.as_str());
        }
        request
    }

    fn build_payload(&self, request: &ChatRequest, stream: bool) -> Value {
        let mut payload = json!({
            "model": request.model,
            "messages": to_wire_messages(&request.messages),
            "include_reasoning": request
                .reasoning
                .as_ref()
                .and_then(|r| r.include_reasoning)
                .unwrap_or(true),
        });
        if stream {
            payload["stream"] = json!(true);
        }
        if let Some(tools) = to_wire_tools(request.tools.as_ref()) {
            payload["tools"] = tools;
        }
        if let Some(temperature) = request.temperature {
            payload["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            payload["max_output_tokens"] = json!(max_tokens);
        }
        if let Some(effort) = request.reasoning.as_ref().and_then(|r| r.effort.as_deref()) {
            payload["reasoning_effort"] = json!(effort);
        }
        payload
    }

    async fn post_with_retries(&self, payload: &Value) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut network_retried = false;
        let mut attempt = 0;
        loop {
            debug!(url = %url, attempt, "OpenRouter request");
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
                    error!(status, "OpenRouter API error: {}", truncate(&body, 500));
                    if status == 429 {
                        return Err(ProviderError::RateLimited {
                            provider: "openrouter".to_string(),
                            message: Some(truncate(&body, 500)),
                        });
                    }
                    return Err(ProviderError::Api { status, body: truncate(&body, 2000) });
                }
                Err(e) => {
                    // Network errors retry once.
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

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit { text.to_string() } else { text[..limit].to_string() }
}

#[async_trait]
impl ChatProvider for OpenRouterProvider {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, ProviderError> {
        let payload = self.build_payload(request, false);
        let response = self.post_with_retries(&payload).await?;
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Request(format!("Failed to read body: {}", e)))?;
        parse_completion(&body, &request.model)
    }

    async fn stream(&self, request: &ChatRequest) -> Result<ChatStream, ProviderError> {
        let payload = self.build_payload(request, true);
        let response = self.post_with_retries(&payload).await?;
        let model = request.model.clone();
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
        Ok(Box::pin(with_synthetic_finish(chunks, request.model.clone())))
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenRouter
    }
}

/// Appends a synthetic terminal chunk when the upstream closed the stream
/// without reporting a finish reason.
pub(crate) fn with_synthetic_finish(
    chunks: impl futures::Stream<Item = Result<StreamChunk, ProviderError>> + Send + 'static,
    model: String,
) -> impl futures::Stream<Item = Result<StreamChunk, ProviderError>> + Send + 'static {
    let tail_model = model;
    let state = (Box::pin(chunks), false, String::new(), false);
    futures::stream::unfold(state, move |(mut chunks, finished, mut last_id, tail_sent)| {
        let tail_model = tail_model.clone();
        async move {
            if let Some(item) = chunks.next().await {
                let finished = finished
                    || item.as_ref().is_ok_and(|chunk| {
                        chunk.choices.iter().any(|c| c.finish_reason.is_some())
                    });
                if let Ok(ref chunk) = item {
                    if !chunk.id.is_empty() {
                        last_id = chunk.id.clone();
                    }
                }
                return Some((item, (chunks, finished, last_id, tail_sent)));
            }
            if finished || tail_sent {
                return None;
            }
            let synthetic = StreamChunk::synthetic_finish(&last_id, &tail_model);
            Some((Ok(synthetic), (chunks, true, last_id, true)))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use portico_abstraction::ChatMessage;

    fn provider(server: &mockito::Server) -> OpenRouterProvider {
        OpenRouterProvider::with_api_key("test-key".to_string()).with_base_url(server.url())
    }

    fn request() -> ChatRequest {
        ChatRequest::new("anthropic/claude-sonnet-4", vec![ChatMessage::user("hi")])
    }

    #[tokio::test]
    async fn test_complete_parses_response() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .with_status(200)
            .with_body(
                r#"{"id":"gen-1","model":"anthropic/claude-sonnet-4","choices":[{"index":0,"message":{"role":"assistant","content":"hello"},"finish_reason":"stop"}],"usage":{"prompt_tokens":1,"completion_tokens":2,"total_tokens":3}}"#,
            )
            .create_async()
            .await;

        let completion = provider(&server).complete(&request()).await.unwrap();
        assert_eq!(completion.message().unwrap().content.as_deref(), Some("hello"));
        assert_eq!(completion.usage.unwrap().total_tokens, 3);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_payload_carries_reasoning_flags() {
        let provider = OpenRouterProvider::with_api_key("k".to_string());
        let mut req = request();
        req.reasoning = Some(portico_abstraction::ReasoningOptions {
            effort: Some("high".to_string()),
            ..Default::default()
        });
        let payload = provider.build_payload(&req, false);
        assert_eq!(payload["include_reasoning"], true);
        assert_eq!(payload["reasoning_effort"], "high");
        assert!(payload.get("stream").is_none());
    }

    #[tokio::test]
    async fn test_500_is_retried_until_budget_spent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(500)
            .with_body("boom")
            .expect(3)
            .create_async()
            .await;

        let err = provider(&server).complete(&request()).await.unwrap_err();
        match err {
            ProviderError::Api { status, .. } => assert_eq!(status, 500),
            other => panic!("expected api error, got {:?}", other),
        }
        // Initial attempt plus the default two retries.
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_retryable_status_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(400)
            .with_body("bad request")
            .create_async()
            .await;

        let err = provider(&server).complete(&request()).await.unwrap_err();
        match err {
            ProviderError::Api { status, .. } => assert_eq!(status, 400),
            other => panic!("expected api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stream_parses_chunks_and_stops_at_done() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(concat!(
                "data: {\"id\":\"gen-3\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"he\"}}]}\n\n",
                "data: {\"id\":\"gen-3\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"llo\"},\"finish_reason\":\"stop\"}]}\n\n",
                "data: [DONE]\n\n",
            ))
            .create_async()
            .await;

        let stream = provider(&server).stream(&request()).await.unwrap();
        let chunks: Vec<_> = stream.collect().await;
        assert_eq!(chunks.len(), 2);
        let first = chunks[0].as_ref().unwrap();
        assert_eq!(first.delta().unwrap().content.as_deref(), Some("he"));
        let last = chunks[1].as_ref().unwrap();
        assert_eq!(last.choices[0].finish_reason.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn test_stream_synthesizes_finish_when_upstream_drops() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body("data: {\"id\":\"gen-4\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"hi\"}}]}\n\n")
            .create_async()
            .await;

        let stream = provider(&server).stream(&request()).await.unwrap();
        let chunks: Vec<_> = stream.collect().await;
        assert_eq!(chunks.len(), 2);
        let tail = chunks[1].as_ref().unwrap();
        assert_eq!(tail.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(tail.id, "gen-4");
    }

    #[test]
    fn test_kind() {
        let provider = OpenRouterProvider::with_api_key("k".to_string());
        assert_eq!(provider.kind(), ProviderKind::OpenRouter);
    }
}
