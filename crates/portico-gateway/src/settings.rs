//! Runtime settings for the gateway, resolved once at startup from CLI
//! flags and environment variables.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How strictly a check is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EnforcementMode {
    /// Skip the check entirely.
    Off,
    /// Log a warning and continue.
    #[default]
    Warn,
    /// Reject the request.
    Enforce,
}

impl std::str::FromStr for EnforcementMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "off" => Ok(EnforcementMode::Off),
            "warn" => Ok(EnforcementMode::Warn),
            "enforce" => Ok(EnforcementMode::Enforce),
            other => Err(format!("unknown mode '{}', expected off|warn|enforce", other)),
        }
    }
}

/// Gateway runtime settings.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    /// Path to the config file, when one was given.
    pub config_path: Option<PathBuf>,
    /// Shared bearer key guarding every surface except `/healthz`.
    pub api_key: Option<String>,
    /// When set, every mutating `/_meta/*` endpoint returns `read_only`.
    pub read_only: bool,
    /// Default tool timeout in seconds when the request names none.
    pub tool_timeout: Option<f64>,
    /// Upper bound for per-request timeout overrides, in seconds.
    pub tool_timeout_max: Option<f64>,
    /// Protocol-version header checking on synthesized endpoints.
    pub protocol_version_mode: EnforcementMode,
    /// Upstream output-schema validation on synthesized endpoints.
    pub validate_output_mode: EnforcementMode,
    /// Whether envelopes carry classified `output` collections.
    pub structured_output: bool,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            config_path: None,
            api_key: None,
            read_only: false,
            tool_timeout: Some(30.0),
            tool_timeout_max: Some(600.0),
            protocol_version_mode: EnforcementMode::Warn,
            validate_output_mode: EnforcementMode::Off,
            structured_output: false,
        }
    }
}
