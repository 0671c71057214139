//! Shared gateway state threaded through every handler.

use crate::chat::sessions::ChatSessionManager;
use crate::settings::RuntimeSettings;
use portico_core::schema::CompiledSchema;
use portico_core::{LogBus, MetricsAggregator, Runner, StateManager, Supervisor};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Everything the handlers need, cloned cheaply per request.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppInner>,
}

struct AppInner {
    supervisor: Supervisor,
    state: Arc<StateManager>,
    metrics: Arc<MetricsAggregator>,
    runner: Runner,
    logbus: Arc<LogBus>,
    settings: RuntimeSettings,
    sessions: ChatSessionManager,
    started_at: Instant,
    openapi_cache: Mutex<Option<(u64, serde_json::Value)>>,
    schema_cache: Mutex<HashMap<(u64, String, String), Arc<CompiledSchema>>>,
}

impl AppState {
    /// Assembles gateway state from its services.
    pub fn new(
        supervisor: Supervisor,
        state: Arc<StateManager>,
        logbus: Arc<LogBus>,
        settings: RuntimeSettings,
    ) -> Self {
        let metrics = Arc::new(MetricsAggregator::new());
        Self {
            inner: Arc::new(AppInner {
                supervisor,
                runner: Runner::new(metrics.clone()),
                state,
                metrics,
                logbus,
                settings,
                sessions: ChatSessionManager::new(),
                started_at: Instant::now(),
                openapi_cache: Mutex::new(None),
                schema_cache: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The upstream supervisor.
    pub fn supervisor(&self) -> &Supervisor {
        &self.inner.supervisor
    }

    /// Durable enable/disable state.
    pub fn state(&self) -> &Arc<StateManager> {
        &self.inner.state
    }

    /// Call metrics.
    pub fn metrics(&self) -> &Arc<MetricsAggregator> {
        &self.inner.metrics
    }

    /// The tool runner.
    pub fn runner(&self) -> &Runner {
        &self.inner.runner
    }

    /// The log ring buffer.
    pub fn logbus(&self) -> &Arc<LogBus> {
        &self.inner.logbus
    }

    /// Runtime settings.
    pub fn settings(&self) -> &RuntimeSettings {
        &self.inner.settings
    }

    /// In-memory chat sessions.
    pub fn sessions(&self) -> &ChatSessionManager {
        &self.inner.sessions
    }

    /// Seconds since the gateway started.
    pub fn uptime_secs(&self) -> u64 {
        self.inner.started_at.elapsed().as_secs()
    }

    /// Cached aggregate OpenAPI document for a generation.
    pub fn cached_openapi(&self, generation: u64) -> Option<serde_json::Value> {
        let cache = self.inner.openapi_cache.lock().expect("openapi cache poisoned");
        cache.as_ref().filter(|(g, _)| *g == generation).map(|(_, doc)| doc.clone())
    }

    /// Stores the aggregate OpenAPI document for a generation.
    pub fn store_openapi(&self, generation: u64, doc: serde_json::Value) {
        let mut cache = self.inner.openapi_cache.lock().expect("openapi cache poisoned");
        *cache = Some((generation, doc));
    }

    /// Compiled input schema for a tool, cached per reload generation.
    pub fn compiled_schema(
        &self,
        upstream: &str,
        tool: &str,
        input_schema: &serde_json::Value,
    ) -> Arc<CompiledSchema> {
        let generation = self.supervisor().generation();
        let key = (generation, upstream.to_string(), tool.to_string());
        let mut cache = self.inner.schema_cache.lock().expect("schema cache poisoned");
        // Stale generations are dropped wholesale on the first miss after
        // a reload.
        if !cache.contains_key(&key) {
            cache.retain(|(g, _, _), _| *g == generation);
        }
        cache
            .entry(key)
            .or_insert_with(|| Arc::new(CompiledSchema::compile(input_schema)))
            .clone()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use portico_core::config::GatewayConfig;
    use tempfile::TempDir;

    /// Builds an AppState over a temp state file, returning the dir so it
    /// outlives the test.
    pub fn app_state(settings: RuntimeSettings) -> (AppState, TempDir) {
        let dir = TempDir::new().expect("tempdir");
        let state = Arc::new(StateManager::new(dir.path().join("portico_state.json")));
        let logbus = Arc::new(LogBus::new(2000));
        let app = AppState::new(Supervisor::new(), state, logbus, settings);
        (app, dir)
    }

    /// Mounts a config whose servers all fail to connect (missing
    /// binaries), leaving disconnected-but-routed sessions.
    pub async fn mount_unreachable(app: &AppState, names: &[&str]) {
        let config = GatewayConfig {
            mcp_servers: names
                .iter()
                .map(|n| {
                    (
                        (*n).to_string(),
                        portico_core::config::UpstreamConfig {
                            transport: portico_core::config::TransportType::Stdio,
                            command: Some("portico_missing_binary_xyz".to_string()),
                            ..Default::default()
                        },
                    )
                })
                .collect(),
        };
        app.supervisor().mount_all(config).await;
    }
}
