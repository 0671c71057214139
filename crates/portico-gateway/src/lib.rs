//! The Portico HTTP gateway.
//!
//! Builds the two listener surfaces: the main port (synthesized tool
//! endpoints, admin meta surface, chat sessions, health) and the raw-MCP
//! port (filtered JSON-RPC proxy). The CLI owns process lifetime; this
//! crate owns everything HTTP.

pub mod app;
pub mod auth;
pub mod chat;
pub mod envelope;
pub mod health;
pub mod mcp_proxy;
pub mod meta;
pub mod openapi;
pub mod settings;
pub mod state;
pub mod tools;

pub use app::{build_main_router, build_proxy_router};
pub use settings::{EnforcementMode, RuntimeSettings};
pub use state::AppState;
