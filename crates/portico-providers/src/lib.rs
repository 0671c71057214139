//! Provider adapters for the Portico chat orchestrator.
//!
//! Five adapters implement the unified [`portico_abstraction::ChatProvider`]
//! contract: OpenRouter, OpenAI, Anthropic, Google Gemini, and MiniMax
//! (which rides the Anthropic adapter against MiniMax's compatible
//! endpoint). Every adapter preserves provider reasoning state across
//! turns and retries transient failures with bounded backoff.

pub mod anthropic;
pub mod factory;
pub mod gemini;
pub mod minimax;
pub mod openai;
pub mod openrouter;
pub(crate) mod retry;
pub(crate) mod sse;
pub(crate) mod wire;

pub use anthropic::AnthropicProvider;
pub use factory::{ProviderFactory, provider_for_model};
pub use gemini::GeminiProvider;
pub use minimax::MiniMaxProvider;
pub use openai::OpenAiProvider;
pub use openrouter::OpenRouterProvider;
