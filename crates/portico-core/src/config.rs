//! Gateway configuration: the `mcpServers` file and per-upstream settings.
//!
//! The config file is JSON with a single `mcpServers` map. String values in
//! `env` and `headers` may contain `${NAME}` placeholders which are expanded
//! from the process environment at load time (missing variables expand to
//! the empty string).

use crate::error::{ErrorCode, GatewayError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

/// MCP transport types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TransportType {
    /// Standard input/output transport for local subprocess servers.
    #[default]
    Stdio,
    /// Server-Sent Events transport for HTTP streaming.
    Sse,
    /// Streamable-HTTP transport for remote servers.
    #[serde(alias = "streamable_http", alias = "streamablehttp")]
    StreamableHttp,
}

impl TransportType {
    /// Stable identifier as written in config files and health output.
    pub fn as_str(self) -> &'static str {
        match self {
            TransportType::Stdio => "stdio",
            TransportType::Sse => "sse",
            TransportType::StreamableHttp => "streamable-http",
        }
    }
}

/// Configuration for one upstream MCP server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct UpstreamConfig {
    /// Transport type to use. Defaults to stdio.
    #[serde(rename = "type", default)]
    pub transport: TransportType,
    /// Command to execute (stdio transport).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Command arguments (stdio transport).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    /// Extra environment for the child process (stdio transport).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,
    /// Server URL (sse / streamable-http transports).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Extra request headers (sse / streamable-http transports).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    /// Read timeout in seconds for remote transports.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_timeout: Option<u64>,
}

impl UpstreamConfig {
    /// Validates the transport-specific required fields.
    ///
    /// # Errors
    /// Returns an `invalid` error when a stdio upstream has no command or a
    /// remote upstream has no URL.
    pub fn validate(&self, name: &str) -> Result<(), GatewayError> {
        match self.transport {
            TransportType::Stdio => {
                if self.command.as_deref().is_none_or(str::is_empty) {
                    return Err(GatewayError::new(
                        ErrorCode::Invalid,
                        format!("Server '{}': stdio requires 'command'", name),
                    ));
                }
            }
            TransportType::Sse | TransportType::StreamableHttp => {
                if self.url.as_deref().is_none_or(str::is_empty) {
                    return Err(GatewayError::new(
                        ErrorCode::Invalid,
                        format!("Server '{}': remote server requires 'url'", name),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// The parsed gateway configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct GatewayConfig {
    /// Upstream servers by name. Names are unique by construction.
    #[serde(rename = "mcpServers", default)]
    pub mcp_servers: BTreeMap<String, UpstreamConfig>,
}

impl GatewayConfig {
    /// Parses config JSON, validates every upstream, and expands `${VAR}`
    /// placeholders in env and header values.
    ///
    /// # Errors
    /// Returns `invalid_json` on a parse failure and `invalid` when an
    /// upstream fails validation.
    pub fn from_json(raw: &str) -> Result<Self, GatewayError> {
        let mut config: GatewayConfig = serde_json::from_str(raw)
            .map_err(|e| GatewayError::new(ErrorCode::InvalidJson, e.to_string()))?;
        for (name, server) in &mut config.mcp_servers {
            server.validate(name)?;
            if let Some(ref mut env) = server.env {
                expand_map(env);
            }
            if let Some(ref mut headers) = server.headers {
                expand_map(headers);
            }
        }
        Ok(config)
    }

    /// Loads and parses the config file at `path`.
    ///
    /// # Errors
    /// Returns `no_config` when the file does not exist, plus the
    /// `from_json` failure modes.
    pub fn load(path: &Path) -> Result<Self, GatewayError> {
        if !path.exists() {
            return Err(GatewayError::new(
                ErrorCode::NoConfig,
                format!("Config file not found: {}", path.display()),
            ));
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }
}

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([A-Z0-9_]+)\}").unwrap())
}

/// Replaces `${NAME}` in a string with the process environment value.
///
/// Missing variables expand to the empty string.
pub fn expand_placeholders(value: &str) -> String {
    expand_with(value, |name| std::env::var(name).ok())
}

/// Placeholder expansion against an arbitrary variable lookup.
pub fn expand_with<F>(value: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    placeholder_pattern()
        .replace_all(value, |caps: &regex::Captures<'_>| lookup(&caps[1]).unwrap_or_default())
        .into_owned()
}

fn expand_map(map: &mut BTreeMap<String, String>) {
    for value in map.values_mut() {
        *value = expand_placeholders(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_type_serialization() {
        assert_eq!(serde_json::to_string(&TransportType::Stdio).unwrap(), "\"stdio\"");
        assert_eq!(serde_json::to_string(&TransportType::Sse).unwrap(), "\"sse\"");
        assert_eq!(
            serde_json::to_string(&TransportType::StreamableHttp).unwrap(),
            "\"streamable-http\""
        );
    }

    #[test]
    fn test_transport_type_aliases() {
        let t: TransportType = serde_json::from_str("\"streamable_http\"").unwrap();
        assert_eq!(t, TransportType::StreamableHttp);
        let t: TransportType = serde_json::from_str("\"streamablehttp\"").unwrap();
        assert_eq!(t, TransportType::StreamableHttp);
    }

    #[test]
    fn test_stdio_requires_command() {
        let config = UpstreamConfig { transport: TransportType::Stdio, ..Default::default() };
        let err = config.validate("s1").unwrap_err();
        assert_eq!(err.code, ErrorCode::Invalid);
        assert!(err.to_string().contains("command"));
    }

    #[test]
    fn test_remote_requires_url() {
        let config = UpstreamConfig { transport: TransportType::Sse, ..Default::default() };
        let err = config.validate("s1").unwrap_err();
        assert!(err.to_string().contains("url"));
    }

    #[test]
    fn test_valid_stdio_config() {
        let config = UpstreamConfig {
            transport: TransportType::Stdio,
            command: Some("echo".to_string()),
            ..Default::default()
        };
        assert!(config.validate("s1").is_ok());
    }

    #[test]
    fn test_from_json_parses_servers() {
        let raw = r#"{"mcpServers": {"s1": {"command": "echo", "args": ["ok"]}}}"#;
        let config = GatewayConfig::from_json(raw).unwrap();
        assert_eq!(config.mcp_servers.len(), 1);
        let s1 = &config.mcp_servers["s1"];
        assert_eq!(s1.transport, TransportType::Stdio);
        assert_eq!(s1.command.as_deref(), Some("echo"));
    }

    #[test]
    fn test_from_json_rejects_invalid_json() {
        let err = GatewayConfig::from_json("{not json").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidJson);
    }

    #[test]
    fn test_from_json_rejects_invalid_server() {
        let raw = r#"{"mcpServers": {"s1": {"type": "sse"}}}"#;
        let err = GatewayConfig::from_json(raw).unwrap_err();
        assert_eq!(err.code, ErrorCode::Invalid);
    }

    #[test]
    fn test_expand_with_lookup() {
        let expanded = expand_with("Bearer ${API_TOKEN}", |name| {
            (name == "API_TOKEN").then(|| "secret".to_string())
        });
        assert_eq!(expanded, "Bearer secret");
    }

    #[test]
    fn test_expand_with_missing_var_is_empty() {
        assert_eq!(expand_with("x${MISSING_VAR}y", |_| None), "xy");
    }

    #[test]
    fn test_expand_ignores_lowercase_names() {
        assert_eq!(expand_with("${not_a_var}", |_| Some("v".to_string())), "${not_a_var}");
    }

    #[test]
    fn test_expand_placeholders_reads_process_env() {
        // PATH is always present; expansion should substitute something non-placeholder.
        let expanded = expand_placeholders("${PATH}");
        assert!(!expanded.contains("${"));
    }

    #[test]
    fn test_load_missing_file_is_no_config() {
        let err = GatewayConfig::load(Path::new("/nonexistent/portico.json")).unwrap_err();
        assert_eq!(err.code, ErrorCode::NoConfig);
    }

    #[test]
    fn test_config_round_trip() {
        let raw = r#"{"mcpServers": {"s1": {"command": "uvx", "args": ["mcp-server-time"]}}}"#;
        let config = GatewayConfig::from_json(raw).unwrap();
        let encoded = serde_json::to_string(&config).unwrap();
        let decoded = GatewayConfig::from_json(&encoded).unwrap();
        assert_eq!(config, decoded);
    }
}
