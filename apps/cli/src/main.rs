//! Portico CLI - launcher for the protocol-bridging gateway.
//!
//! Boots the supervisor from a config file, binds the main HTTP surface
//! and the raw-MCP proxy listener, and tears both down on SIGINT/SIGTERM.

use anyhow::Context;
use clap::Parser;
use portico_core::config::GatewayConfig;
use portico_core::{LogBus, StateManager, Supervisor};
use portico_gateway::{AppState, EnforcementMode, RuntimeSettings, build_main_router, build_proxy_router};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

/// Portico - expose a fleet of MCP servers as one HTTP surface
#[derive(Parser, Debug)]
#[command(
    name = "portico",
    author,
    version,
    about = "Portico - MCP protocol-bridging gateway",
    long_about = "Portico mounts a fleet of MCP upstream servers (stdio, SSE, streamable-HTTP)\nand exposes each tool as a typed REST endpoint, plus a chat orchestrator and a\nfiltered raw-MCP proxy port."
)]
struct Args {
    /// Path to the config file ({"mcpServers": {...}})
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address for the main HTTP surface
    #[arg(long, default_value = "127.0.0.1:8000")]
    listen: String,

    /// Bind address for the raw-MCP proxy listener
    #[arg(long, default_value = "127.0.0.1:8001")]
    mcp_listen: String,

    /// Base path for the raw-MCP aggregate endpoint
    #[arg(long, default_value = "/mcp")]
    mcp_path: String,

    /// Shared bearer key for the main surface
    #[arg(long, env = "MCPO_API_KEY")]
    api_key: Option<String>,

    /// Reject every mutating admin endpoint
    #[arg(long)]
    read_only: bool,

    /// Default tool timeout in seconds
    #[arg(long, default_value_t = 30.0)]
    tool_timeout: f64,

    /// Maximum allowed per-request timeout override in seconds
    #[arg(long, default_value_t = 600.0)]
    tool_timeout_max: f64,

    /// MCP-Protocol-Version header checking (off, warn, enforce)
    #[arg(long, default_value = "warn")]
    protocol_version_mode: EnforcementMode,

    /// Upstream output-schema validation (off, warn, enforce)
    #[arg(long, default_value = "off")]
    validate_output_mode: EnforcementMode,

    /// Add classified output collections to envelopes
    #[arg(long)]
    structured_output: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let level: Level = level.parse().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to install tracing subscriber")?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level)?;

    let settings = RuntimeSettings {
        config_path: args.config.clone(),
        api_key: args.api_key.clone(),
        read_only: args.read_only,
        tool_timeout: Some(args.tool_timeout),
        tool_timeout_max: Some(args.tool_timeout_max),
        protocol_version_mode: args.protocol_version_mode,
        validate_output_mode: args.validate_output_mode,
        structured_output: args.structured_output,
    };

    let supervisor = Supervisor::new();
    if let Some(ref config_path) = args.config {
        let config = GatewayConfig::load(config_path)
            .with_context(|| format!("loading config {}", config_path.display()))?;
        info!("Mounting {} upstream server(s)", config.mcp_servers.len());
        supervisor.mount_all(config).await;
    } else {
        info!("No config file given; starting with an empty server map");
    }

    let state_path = args
        .config
        .as_deref()
        .map(StateManager::path_for_config)
        .unwrap_or_else(|| PathBuf::from("portico_state.json"));
    let state = Arc::new(StateManager::new(state_path));
    let logbus = Arc::new(LogBus::new(2000));

    let app = AppState::new(supervisor, state, logbus, settings);

    let main_router = build_main_router(app.clone());
    let proxy_router = build_proxy_router(app.clone(), &args.mcp_path);

    let main_listener = tokio::net::TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("binding {}", args.listen))?;
    let proxy_listener = tokio::net::TcpListener::bind(&args.mcp_listen)
        .await
        .with_context(|| format!("binding {}", args.mcp_listen))?;

    info!("Main surface on http://{}", args.listen);
    info!("Raw-MCP proxy on http://{}{}", args.mcp_listen, args.mcp_path);

    let main_server = tokio::spawn(async move {
        axum::serve(main_listener, main_router).await
    });
    let proxy_server = tokio::spawn(async move {
        axum::serve(proxy_listener, proxy_router).await
    });

    shutdown_signal().await;
    info!("Shutdown signal received, tearing down sessions");
    app.supervisor().shutdown().await;
    main_server.abort();
    proxy_server.abort();
    info!("Goodbye");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["portico"]);
        assert_eq!(args.listen, "127.0.0.1:8000");
        assert_eq!(args.mcp_listen, "127.0.0.1:8001");
        assert_eq!(args.mcp_path, "/mcp");
        assert_eq!(args.protocol_version_mode, EnforcementMode::Warn);
        assert!(!args.read_only);
    }

    #[test]
    fn test_mode_flags_parse() {
        let args = Args::parse_from([
            "portico",
            "--protocol-version-mode",
            "enforce",
            "--validate-output-mode",
            "warn",
            "--read-only",
            "--structured-output",
        ]);
        assert_eq!(args.protocol_version_mode, EnforcementMode::Enforce);
        assert_eq!(args.validate_output_mode, EnforcementMode::Warn);
        assert!(args.read_only);
        assert!(args.structured_output);
    }
}
