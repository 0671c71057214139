//! Core services for the Portico gateway.
//!
//! This crate contains everything below the HTTP surface: configuration
//! loading, durable enable/disable state, the JSON Schema translator, the
//! MCP client with its three transports, the upstream supervisor with
//! hot-reload, the tool runner, the log and metrics buses, and the raw-MCP
//! proxy filter.

pub mod config;
pub mod error;
pub mod logbus;
pub mod mcp;
pub mod metrics;
pub mod proxy;
pub mod runner;
pub mod schema;
pub mod state;
pub mod supervisor;

pub use config::{GatewayConfig, TransportType, UpstreamConfig};
pub use error::{ErrorCode, GatewayError};
pub use logbus::{LogBus, LogEntry, LogLevel, LogSource};
pub use metrics::MetricsAggregator;
pub use runner::Runner;
pub use state::{StateManager, StateQuery};
pub use supervisor::{Supervisor, UpstreamSession};
