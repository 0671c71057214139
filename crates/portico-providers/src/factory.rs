//! Provider resolution by model id.
//!
//! Routing mirrors the gateway's model catalog: `minimax/` ids go to
//! MiniMax, Gemini families go to Google, `anthropic/` and `openai/` ids
//! go direct when the matching key is present, and everything else falls
//! through to OpenRouter (which itself serves most vendor-prefixed ids).

use crate::anthropic::AnthropicProvider;
use crate::gemini::{GeminiProvider, is_google_model};
use crate::minimax::{MiniMaxProvider, is_minimax_model};
use crate::openai::OpenAiProvider;
use crate::openrouter::OpenRouterProvider;
use portico_abstraction::{ChatProvider, ProviderError, ProviderKind};
use std::sync::Arc;

/// Resolves model ids to provider adapters.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderFactory;

impl ProviderFactory {
    /// Which provider family serves a model id.
    pub fn kind_for_model(model: &str) -> ProviderKind {
        if is_minimax_model(model) {
            ProviderKind::MiniMax
        } else if is_google_model(model) {
            ProviderKind::Gemini
        } else if model.starts_with("anthropic/") && has_env("ANTHROPIC_API_KEY") {
            ProviderKind::Anthropic
        } else if model.starts_with("openai/") && has_direct_openai_key() {
            ProviderKind::OpenAi
        } else {
            ProviderKind::OpenRouter
        }
    }

    /// Builds the adapter for a model id.
    ///
    /// # Errors
    /// Returns a `MissingApiKey` error when the resolved provider's key is
    /// not configured.
    pub fn create(model: &str) -> Result<Arc<dyn ChatProvider>, ProviderError> {
        match Self::kind_for_model(model) {
            ProviderKind::MiniMax => Ok(Arc::new(MiniMaxProvider::new()?)),
            ProviderKind::Gemini => Ok(Arc::new(GeminiProvider::new()?)),
            ProviderKind::Anthropic => Ok(Arc::new(AnthropicProvider::new()?)),
            ProviderKind::OpenAi => Ok(Arc::new(OpenAiProvider::new()?)),
            ProviderKind::OpenRouter => Ok(Arc::new(OpenRouterProvider::new()?)),
        }
    }
}

/// Convenience wrapper over [`ProviderFactory::create`].
pub fn provider_for_model(model: &str) -> Result<Arc<dyn ChatProvider>, ProviderError> {
    ProviderFactory::create(model)
}

fn has_env(name: &str) -> bool {
    std::env::var(name).is_ok_and(|v| !v.is_empty())
}

fn has_direct_openai_key() -> bool {
    has_env("OPEN_AI_API_KEY") || has_env("OPENAI_API_KEY")
}
