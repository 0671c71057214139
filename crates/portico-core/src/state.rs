//! Durable enable/disable state for servers, tools, providers, and models.
//!
//! Every absent key defaults to enabled. Saves are atomic (write a temp file
//! next to the target, then rename); loads tolerate a missing or corrupt
//! file by starting from an empty state so a half-written file can never
//! take the gateway down.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, warn};

/// Read-only view of enable state, passed by value to synthesized handlers
/// and the proxy filter so they never hold a reference back into the app.
pub trait StateQuery: Send + Sync {
    /// Whether a server is enabled. Unknown servers are enabled.
    fn is_server_enabled(&self, server: &str) -> bool;
    /// Whether a tool is enabled. Unknown tools are enabled.
    fn is_tool_enabled(&self, server: &str, tool: &str) -> bool;
    /// Names of servers with any recorded state, for aggregate-mount scans.
    fn known_servers(&self) -> Vec<String>;
}

/// Per-server state: the server flag plus per-tool overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerState {
    /// Whether the server is enabled.
    pub enabled: bool,
    /// Per-tool flags. Absent tools are enabled.
    #[serde(default)]
    pub tools: BTreeMap<String, bool>,
}

impl Default for ServerState {
    fn default() -> Self {
        Self { enabled: true, tools: BTreeMap::new() }
    }
}

/// The on-disk state file layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    server_enabled: BTreeMap<String, bool>,
    #[serde(default)]
    tool_enabled: BTreeMap<String, BTreeMap<String, bool>>,
    #[serde(default)]
    provider_states: BTreeMap<String, bool>,
    #[serde(default)]
    model_states: BTreeMap<String, bool>,
    #[serde(default)]
    favorite_models: Vec<String>,
    #[serde(default)]
    last_updated: Option<String>,
}

fn default_version() -> u32 {
    1
}

#[derive(Debug, Default)]
struct StateData {
    servers: BTreeMap<String, ServerState>,
    providers: BTreeMap<String, bool>,
    models: BTreeMap<String, bool>,
    favorites: Vec<String>,
}

impl StateData {
    fn from_file(file: StateFile) -> Self {
        let mut servers: BTreeMap<String, ServerState> = BTreeMap::new();
        for (name, enabled) in file.server_enabled {
            servers.entry(name).or_default().enabled = enabled;
        }
        for (name, tools) in file.tool_enabled {
            servers.entry(name).or_default().tools = tools;
        }
        Self {
            servers,
            providers: file.provider_states,
            models: file.model_states,
            favorites: file.favorite_models,
        }
    }

    fn to_file(&self) -> StateFile {
        StateFile {
            version: 1,
            server_enabled: self
                .servers
                .iter()
                .map(|(name, state)| (name.clone(), state.enabled))
                .collect(),
            tool_enabled: self
                .servers
                .iter()
                .filter(|(_, state)| !state.tools.is_empty())
                .map(|(name, state)| (name.clone(), state.tools.clone()))
                .collect(),
            provider_states: self.providers.clone(),
            model_states: self.models.clone(),
            favorite_models: self.favorites.clone(),
            last_updated: Some(Utc::now().to_rfc3339()),
        }
    }
}

/// Thread-safe, file-backed enable/disable state.
///
/// All operations serialize through one mutex; mutations persist before the
/// guard is released, so two consecutive identical writes leave the file
/// byte-equal apart from the timestamp.
pub struct StateManager {
    path: PathBuf,
    data: Mutex<StateData>,
}

impl StateManager {
    /// Opens (or initializes) state stored at `path`.
    ///
    /// An unreadable or partially-written file yields an empty state rather
    /// than an error.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        let data = Mutex::new(Self::load(&path));
        Self { path, data }
    }

    /// Derives the conventional state path for a config file:
    /// `config.json` -> `config_state.json`.
    pub fn path_for_config(config_path: &Path) -> PathBuf {
        let stem = config_path.file_stem().and_then(|s| s.to_str()).unwrap_or("portico");
        config_path.with_file_name(format!("{}_state.json", stem))
    }

    fn load(path: &Path) -> StateData {
        if !path.exists() {
            return StateData::default();
        }
        match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str::<StateFile>(&raw) {
                Ok(file) => StateData::from_file(file),
                Err(e) => {
                    warn!("State file {} unreadable, starting empty: {}", path.display(), e);
                    StateData::default()
                }
            },
            Err(e) => {
                warn!("Failed to read state file {}: {}", path.display(), e);
                StateData::default()
            }
        }
    }

    fn save(&self, data: &StateData) {
        let file = data.to_file();
        let encoded = match serde_json::to_string_pretty(&file) {
            Ok(encoded) => encoded,
            Err(e) => {
                error!("Failed to serialize state: {}", e);
                return;
            }
        };
        let tmp = self.path.with_extension("tmp");
        let result = std::fs::write(&tmp, &encoded).and_then(|()| std::fs::rename(&tmp, &self.path));
        if let Err(e) = result {
            error!("Failed to save state to {}: {}", self.path.display(), e);
            let _ = std::fs::remove_file(&tmp);
        }
    }

    /// State for one server, defaulting to enabled with no tool overrides.
    pub fn server_state(&self, server: &str) -> ServerState {
        let data = self.data.lock().expect("state lock poisoned");
        data.servers.get(server).cloned().unwrap_or_default()
    }

    /// All recorded server states.
    pub fn all_server_states(&self) -> BTreeMap<String, ServerState> {
        let data = self.data.lock().expect("state lock poisoned");
        data.servers.clone()
    }

    /// Sets a server's enabled flag and persists.
    pub fn set_server_enabled(&self, server: &str, enabled: bool) {
        let mut data = self.data.lock().expect("state lock poisoned");
        data.servers.entry(server.to_string()).or_default().enabled = enabled;
        self.save(&data);
    }

    /// Sets a tool's enabled flag and persists.
    pub fn set_tool_enabled(&self, server: &str, tool: &str, enabled: bool) {
        let mut data = self.data.lock().expect("state lock poisoned");
        data.servers
            .entry(server.to_string())
            .or_default()
            .tools
            .insert(tool.to_string(), enabled);
        self.save(&data);
    }

    /// Whether a provider is enabled. Unknown providers are enabled.
    pub fn is_provider_enabled(&self, provider: &str) -> bool {
        let data = self.data.lock().expect("state lock poisoned");
        data.providers.get(provider).copied().unwrap_or(true)
    }

    /// Sets a provider's enabled flag and persists.
    pub fn set_provider_enabled(&self, provider: &str, enabled: bool) {
        let mut data = self.data.lock().expect("state lock poisoned");
        data.providers.insert(provider.to_string(), enabled);
        self.save(&data);
    }

    /// Whether a model is enabled. Unknown models are enabled.
    pub fn is_model_enabled(&self, model: &str) -> bool {
        let data = self.data.lock().expect("state lock poisoned");
        data.models.get(model).copied().unwrap_or(true)
    }

    /// Sets a model's enabled flag and persists.
    pub fn set_model_enabled(&self, model: &str, enabled: bool) {
        let mut data = self.data.lock().expect("state lock poisoned");
        data.models.insert(model.to_string(), enabled);
        self.save(&data);
    }

    /// The favorites list, in insertion order.
    pub fn favorite_models(&self) -> Vec<String> {
        let data = self.data.lock().expect("state lock poisoned");
        data.favorites.clone()
    }

    /// Replaces the favorites list and persists.
    pub fn set_favorite_models(&self, models: Vec<String>) {
        let mut data = self.data.lock().expect("state lock poisoned");
        data.favorites = models;
        self.save(&data);
    }

    /// Adds a model to favorites if absent, and persists on change.
    pub fn add_favorite_model(&self, model: &str) {
        let mut data = self.data.lock().expect("state lock poisoned");
        if !data.favorites.iter().any(|m| m == model) {
            data.favorites.push(model.to_string());
            self.save(&data);
        }
    }

    /// Removes a model from favorites, and persists on change.
    pub fn remove_favorite_model(&self, model: &str) {
        let mut data = self.data.lock().expect("state lock poisoned");
        let before = data.favorites.len();
        data.favorites.retain(|m| m != model);
        if data.favorites.len() != before {
            self.save(&data);
        }
    }
}

impl StateQuery for StateManager {
    fn is_server_enabled(&self, server: &str) -> bool {
        let data = self.data.lock().expect("state lock poisoned");
        data.servers.get(server).map_or(true, |s| s.enabled)
    }

    fn is_tool_enabled(&self, server: &str, tool: &str) -> bool {
        let data = self.data.lock().expect("state lock poisoned");
        data.servers
            .get(server)
            .and_then(|s| s.tools.get(tool))
            .copied()
            .unwrap_or(true)
    }

    fn known_servers(&self) -> Vec<String> {
        let data = self.data.lock().expect("state lock poisoned");
        data.servers.keys().cloned().collect()
    }
}

impl<T: StateQuery + ?Sized> StateQuery for std::sync::Arc<T> {
    fn is_server_enabled(&self, server: &str) -> bool {
        (**self).is_server_enabled(server)
    }

    fn is_tool_enabled(&self, server: &str, tool: &str) -> bool {
        (**self).is_tool_enabled(server, tool)
    }

    fn known_servers(&self) -> Vec<String> {
        (**self).known_servers()
    }
}
