//! Transport implementations for MCP communication.

pub mod http;
pub mod sse;
pub mod stdio;

pub use http::StreamableHttpTransport;
pub use sse::SseTransport;
pub use stdio::StdioTransport;
