//! Upstream supervisor: session lifecycle and hot reload.
//!
//! One [`UpstreamSession`] exists per configured upstream, regardless of
//! connection health, so the route table always mirrors the config. Hot
//! reload diffs the old and new server maps under a global reload lock and
//! rolls the route table back if any newly-mounted upstream fails to
//! connect.

use crate::config::{GatewayConfig, TransportType, UpstreamConfig};
use crate::error::{ErrorCode, GatewayError};
use crate::mcp::{McpClient, McpError, Tool, ToolCallResult};
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use tracing::{error, info, warn};

/// One mounted upstream: its config, client, discovered tools, and health.
pub struct UpstreamSession {
    name: String,
    config: UpstreamConfig,
    client: tokio::sync::Mutex<Option<McpClient>>,
    connected: AtomicBool,
    tools: RwLock<Vec<Tool>>,
    last_error: StdMutex<Option<String>>,
}

impl UpstreamSession {
    pub(crate) fn new(name: &str, config: UpstreamConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
            client: tokio::sync::Mutex::new(None),
            connected: AtomicBool::new(false),
            tools: RwLock::new(Vec::new()),
            last_error: StdMutex::new(None),
        }
    }

    /// Upstream name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Upstream config this session was mounted with.
    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    /// Transport type, for health reporting.
    pub fn transport(&self) -> TransportType {
        self.config.transport
    }

    /// Whether the session completed its handshake and is usable.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// The last connect error, when disconnected.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().expect("session lock poisoned").clone()
    }

    /// Discovered tools, empty while disconnected.
    pub fn tools(&self) -> Vec<Tool> {
        self.tools.read().expect("session lock poisoned").clone()
    }

    /// Looks up one tool by name.
    pub fn find_tool(&self, name: &str) -> Option<Tool> {
        self.tools
            .read()
            .expect("session lock poisoned")
            .iter()
            .find(|t| t.name == name)
            .cloned()
    }

    /// Connects (or reconnects) the transport, performs the handshake, and
    /// refreshes the tool list.
    ///
    /// # Errors
    /// On failure the session is left disconnected with the error stored.
    pub async fn connect(&self) -> Result<(), McpError> {
        let mut slot = self.client.lock().await;
        if let Some(old) = slot.take() {
            let _ = old.disconnect().await;
        }
        self.connected.store(false, Ordering::SeqCst);

        let result = async {
            let client = McpClient::connect(&self.config).await?;
            let tools = client.list_tools().await?;
            Ok::<(McpClient, Vec<Tool>), McpError>((client, tools))
        }
        .await;

        match result {
            Ok((client, tools)) => {
                info!("Connected to upstream '{}' ({} tools)", self.name, tools.len());
                *self.tools.write().expect("session lock poisoned") = tools;
                *slot = Some(client);
                self.connected.store(true, Ordering::SeqCst);
                *self.last_error.lock().expect("session lock poisoned") = None;
                Ok(())
            }
            Err(e) => {
                warn!("Failed to connect upstream '{}': {}", self.name, e);
                *self.last_error.lock().expect("session lock poisoned") = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Tears down the transport and marks the session disconnected.
    pub async fn disconnect(&self) {
        let mut slot = self.client.lock().await;
        if let Some(client) = slot.take() {
            if let Err(e) = client.disconnect().await {
                warn!("Error disconnecting upstream '{}': {}", self.name, e);
            }
        }
        self.connected.store(false, Ordering::SeqCst);
        self.tools.write().expect("session lock poisoned").clear();
    }

    /// Invokes a tool through this session.
    ///
    /// # Errors
    /// Returns a connection error when the session is disconnected.
    pub async fn call_tool(&self, tool: &str, arguments: Value) -> Result<ToolCallResult, McpError> {
        let slot = self.client.lock().await;
        let client = slot
            .as_ref()
            .ok_or_else(|| McpError::Connection(format!("Upstream '{}' is not connected", self.name)))?;
        client.call_tool(tool, arguments).await
    }

    /// Forwards a raw JSON-RPC message, for the proxy listener.
    ///
    /// # Errors
    /// Returns a connection error when the session is disconnected.
    pub async fn forward_raw(&self, message: Value) -> Result<Value, McpError> {
        let slot = self.client.lock().await;
        let client = slot
            .as_ref()
            .ok_or_else(|| McpError::Connection(format!("Upstream '{}' is not connected", self.name)))?;
        client.forward_raw(message).await
    }
}

/// The three change sets of a config diff.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigDiff {
    /// Present in the old config only.
    pub removed: Vec<String>,
    /// Present in the new config only.
    pub added: Vec<String>,
    /// Present in both but no longer deep-equal.
    pub updated: Vec<String>,
}

impl ConfigDiff {
    /// True when nothing changed.
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty() && self.updated.is_empty()
    }
}

/// Computes the reload diff between two server maps.
pub fn compute_diff(
    old: &BTreeMap<String, UpstreamConfig>,
    new: &BTreeMap<String, UpstreamConfig>,
) -> ConfigDiff {
    let old_names: BTreeSet<&String> = old.keys().collect();
    let new_names: BTreeSet<&String> = new.keys().collect();
    ConfigDiff {
        removed: old_names.difference(&new_names).map(|n| (*n).clone()).collect(),
        added: new_names.difference(&old_names).map(|n| (*n).clone()).collect(),
        updated: old_names
            .intersection(&new_names)
            .filter(|n| old[**n] != new[**n])
            .map(|n| (*n).clone())
            .collect(),
    }
}

/// Outcome of a successful reload.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ReloadOutcome {
    /// Servers added.
    pub added: Vec<String>,
    /// Servers removed.
    pub removed: Vec<String>,
    /// Servers remounted with new config.
    pub updated: Vec<String>,
    /// Generation after the reload.
    pub generation: u64,
}

/// Owns every upstream session and serializes reloads.
pub struct Supervisor {
    sessions: RwLock<HashMap<String, Arc<UpstreamSession>>>,
    mount_order: RwLock<Vec<String>>,
    config: RwLock<GatewayConfig>,
    reload_lock: tokio::sync::Mutex<()>,
    generation: AtomicU64,
    last_reload: StdMutex<Option<String>>,
}

impl Supervisor {
    /// Creates an empty supervisor.
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            mount_order: RwLock::new(Vec::new()),
            config: RwLock::new(GatewayConfig::default()),
            reload_lock: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
            last_reload: StdMutex::new(None),
        }
    }

    /// Mounts every upstream in the config. Connect failures leave a
    /// disconnected-but-routed session so clients see consistent topology.
    pub async fn mount_all(&self, config: GatewayConfig) {
        let _guard = self.reload_lock.lock().await;
        for (name, server_config) in &config.mcp_servers {
            let session = Arc::new(UpstreamSession::new(name, server_config.clone()));
            if let Err(e) = session.connect().await {
                error!("Upstream '{}' mounted disconnected: {}", name, e);
            }
            self.sessions.write().expect("supervisor lock poisoned").insert(name.clone(), session);
            self.mount_order.write().expect("supervisor lock poisoned").push(name.clone());
        }
        *self.config.write().expect("supervisor lock poisoned") = config;
        self.generation.fetch_add(1, Ordering::SeqCst);
        *self.last_reload.lock().expect("supervisor lock poisoned") = Some(Utc::now().to_rfc3339());
    }

    /// Looks up a session by upstream name.
    pub fn get(&self, name: &str) -> Option<Arc<UpstreamSession>> {
        self.sessions.read().expect("supervisor lock poisoned").get(name).cloned()
    }

    /// Snapshot of all sessions, in mount order.
    pub fn sessions(&self) -> Vec<Arc<UpstreamSession>> {
        let sessions = self.sessions.read().expect("supervisor lock poisoned");
        let order = self.mount_order.read().expect("supervisor lock poisoned");
        order.iter().filter_map(|name| sessions.get(name).cloned()).collect()
    }

    /// Current config snapshot.
    pub fn config(&self) -> GatewayConfig {
        self.config.read().expect("supervisor lock poisoned").clone()
    }

    /// Reload generation, incremented only on full success.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Timestamp of the last successful reload.
    pub fn last_reload(&self) -> Option<String> {
        self.last_reload.lock().expect("supervisor lock poisoned").clone()
    }

    /// Re-runs the handshake and tool discovery on a mounted upstream.
    ///
    /// # Errors
    /// `not_found` for unknown upstreams, `reinit_failed` on connect
    /// failure.
    pub async fn reinit(&self, name: &str) -> Result<(), GatewayError> {
        let session = self
            .get(name)
            .ok_or_else(|| GatewayError::not_found(format!("Server '{}' not found", name)))?;
        session.connect().await.map_err(|e| {
            GatewayError::new(ErrorCode::ReinitFailed, format!("Reinit of '{}' failed: {}", name, e))
        })
    }

    /// Unmounts one upstream and removes its route.
    ///
    /// # Errors
    /// `not_found` for unknown upstreams.
    pub async fn unmount(&self, name: &str) -> Result<(), GatewayError> {
        let session = {
            let mut sessions = self.sessions.write().expect("supervisor lock poisoned");
            sessions
                .remove(name)
                .ok_or_else(|| GatewayError::not_found(format!("Server '{}' not found", name)))?
        };
        self.mount_order.write().expect("supervisor lock poisoned").retain(|n| n != name);
        session.disconnect().await;
        Ok(())
    }

    /// Applies a new config: unmount removed and updated upstreams, mount
    /// added and updated ones. Runs under the reload lock; a connect
    /// failure while mounting rolls the route table back to the pre-reload
    /// snapshot and surfaces the original error.
    ///
    /// # Errors
    /// `reload_failed` carrying the failing upstream's error.
    pub async fn reload(&self, new_config: GatewayConfig) -> Result<ReloadOutcome, GatewayError> {
        let _guard = self.reload_lock.lock().await;

        let old_config = self.config.read().expect("supervisor lock poisoned").clone();
        let diff = compute_diff(&old_config.mcp_servers, &new_config.mcp_servers);

        // Snapshot for rollback.
        let snapshot_sessions = self.sessions.read().expect("supervisor lock poisoned").clone();
        let snapshot_order = self.mount_order.read().expect("supervisor lock poisoned").clone();

        for name in diff.removed.iter().chain(diff.updated.iter()) {
            if let Some(session) = {
                let mut sessions = self.sessions.write().expect("supervisor lock poisoned");
                sessions.remove(name)
            } {
                self.mount_order.write().expect("supervisor lock poisoned").retain(|n| n != name);
                session.disconnect().await;
            }
        }

        let mut mount_error: Option<(String, McpError)> = None;
        let mut mounted_in_attempt: Vec<Arc<UpstreamSession>> = Vec::new();
        for name in diff.added.iter().chain(diff.updated.iter()) {
            let session = Arc::new(UpstreamSession::new(name, new_config.mcp_servers[name].clone()));
            match session.connect().await {
                Ok(()) => {
                    self.sessions
                        .write()
                        .expect("supervisor lock poisoned")
                        .insert(name.clone(), session.clone());
                    self.mount_order.write().expect("supervisor lock poisoned").push(name.clone());
                    mounted_in_attempt.push(session);
                }
                Err(e) => {
                    mount_error = Some((name.clone(), e));
                    break;
                }
            }
        }

        if let Some((failed_name, e)) = mount_error {
            warn!("Reload failed on '{}', rolling back: {}", failed_name, e);
            // Tear down exactly what this attempt mounted (an updated
            // upstream shares its name with a snapshot entry, so the map
            // cannot tell them apart), then restore the snapshot and
            // reconnect sessions the unmount phase disconnected.
            for session in mounted_in_attempt {
                session.disconnect().await;
            }
            *self.sessions.write().expect("supervisor lock poisoned") = snapshot_sessions.clone();
            *self.mount_order.write().expect("supervisor lock poisoned") = snapshot_order;
            for session in snapshot_sessions.values() {
                if !session.is_connected() {
                    let _ = session.connect().await;
                }
            }
            return Err(GatewayError::new(
                ErrorCode::ReloadFailed,
                format!("Reload failed mounting '{}': {}", failed_name, e),
            ));
        }

        *self.config.write().expect("supervisor lock poisoned") = new_config;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_reload.lock().expect("supervisor lock poisoned") = Some(Utc::now().to_rfc3339());
        info!(
            "Reload complete: +{} -{} ~{} (generation {})",
            diff.added.len(),
            diff.removed.len(),
            diff.updated.len(),
            generation
        );
        Ok(ReloadOutcome {
            added: diff.added,
            removed: diff.removed,
            updated: diff.updated,
            generation,
        })
    }

    /// Tears down every session in reverse mount order.
    pub async fn shutdown(&self) {
        let _guard = self.reload_lock.lock().await;
        let order: Vec<String> = {
            let order = self.mount_order.read().expect("supervisor lock poisoned");
            order.iter().rev().cloned().collect()
        };
        for name in order {
            if let Some(session) = {
                let mut sessions = self.sessions.write().expect("supervisor lock poisoned");
                sessions.remove(&name)
            } {
                session.disconnect().await;
            }
        }
        self.mount_order.write().expect("supervisor lock poisoned").clear();
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stdio(command: &str) -> UpstreamConfig {
        UpstreamConfig {
            transport: TransportType::Stdio,
            command: Some(command.to_string()),
            ..Default::default()
        }
    }

    /// A minimal shell MCP server that completes the handshake and lists
    /// no tools. Responses echo the request id.
    const SCRIPTED_SERVER: &str = r#"while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2025-06-18","serverInfo":{"name":"scripted"},"capabilities":{}}}\n' "$id";;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[]}}\n' "$id";;
  esac
done"#;

    /// Connectable stdio config; `tag` only varies the argv so two configs
    /// compare unequal and diff as updated.
    fn scripted_stdio(tag: &str) -> UpstreamConfig {
        UpstreamConfig {
            transport: TransportType::Stdio,
            command: Some("sh".to_string()),
            args: Some(vec![
                "-c".to_string(),
                SCRIPTED_SERVER.to_string(),
                "mcp".to_string(),
                tag.to_string(),
            ]),
            ..Default::default()
        }
    }

    fn config_of(servers: Vec<(&str, UpstreamConfig)>) -> GatewayConfig {
        GatewayConfig {
            mcp_servers: servers.into_iter().map(|(n, c)| (n.to_string(), c)).collect(),
        }
    }

    #[test]
    fn test_diff_added_removed_updated() {
        let old = config_of(vec![("a", stdio("x")), ("b", stdio("y")), ("c", stdio("z"))]);
        let new = config_of(vec![("b", stdio("y")), ("c", stdio("changed")), ("d", stdio("w"))]);
        let diff = compute_diff(&old.mcp_servers, &new.mcp_servers);
        assert_eq!(diff.removed, vec!["a".to_string()]);
        assert_eq!(diff.added, vec!["d".to_string()]);
        assert_eq!(diff.updated, vec!["c".to_string()]);
    }

    #[test]
    fn test_diff_identical_is_empty() {
        let config = config_of(vec![("a", stdio("x"))]);
        let diff = compute_diff(&config.mcp_servers, &config.mcp_servers.clone());
        assert!(diff.is_empty());
    }

    #[tokio::test]
    async fn test_mount_failure_keeps_route() {
        let supervisor = Supervisor::new();
        supervisor
            .mount_all(config_of(vec![("broken", stdio("portico_missing_binary_xyz"))]))
            .await;
        let session = supervisor.get("broken").expect("route must exist");
        assert!(!session.is_connected());
        assert!(session.last_error().is_some());
        assert!(session.tools().is_empty());
    }

    #[tokio::test]
    async fn test_unmount_removes_route() {
        let supervisor = Supervisor::new();
        supervisor.mount_all(config_of(vec![("s1", stdio("portico_missing_binary_xyz"))])).await;
        supervisor.unmount("s1").await.unwrap();
        assert!(supervisor.get("s1").is_none());
        let err = supervisor.unmount("s1").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_reinit_unknown_server() {
        let supervisor = Supervisor::new();
        let err = supervisor.reinit("ghost").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_reload_failure_rolls_back_routes() {
        let supervisor = Supervisor::new();
        supervisor.mount_all(config_of(vec![("keep", stdio("portico_missing_binary_xyz"))])).await;
        let generation_before = supervisor.generation();

        let new_config = config_of(vec![
            ("keep", stdio("portico_missing_binary_xyz")),
            ("new", stdio("portico_other_missing_binary")),
        ]);
        let err = supervisor.reload(new_config).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ReloadFailed);

        // Route table matches the pre-reload snapshot.
        assert!(supervisor.get("keep").is_some());
        assert!(supervisor.get("new").is_none());
        assert_eq!(supervisor.generation(), generation_before);
        assert_eq!(supervisor.config().mcp_servers.len(), 1);
    }

    #[tokio::test]
    async fn test_reload_failure_rolls_back_updated_upstreams() {
        let supervisor = Supervisor::new();
        supervisor
            .mount_all(config_of(vec![
                ("upd_a", scripted_stdio("v1")),
                ("upd_b", scripted_stdio("v1")),
            ]))
            .await;
        let old_a = supervisor.get("upd_a").unwrap();
        assert!(old_a.is_connected());
        let generation_before = supervisor.generation();

        // Both entries diff as updated. upd_a remounts successfully with
        // its new config before upd_b fails to spawn, so the rollback has
        // to tear the fresh upd_a session down again.
        let new_config = config_of(vec![
            ("upd_a", scripted_stdio("v2")),
            ("upd_b", stdio("portico_missing_binary_xyz")),
        ]);
        let err = supervisor.reload(new_config).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ReloadFailed);

        // The snapshot sessions are back in the table and reconnected
        // with their original config.
        let restored = supervisor.get("upd_a").unwrap();
        assert!(Arc::ptr_eq(&restored, &old_a));
        assert!(restored.is_connected());
        assert_eq!(restored.config(), &scripted_stdio("v1"));
        assert!(supervisor.get("upd_b").is_some());
        assert_eq!(supervisor.generation(), generation_before);
        assert_eq!(supervisor.config().mcp_servers.len(), 2);
    }

    #[tokio::test]
    async fn test_reload_removal_succeeds_without_connecting() {
        let supervisor = Supervisor::new();
        supervisor.mount_all(config_of(vec![("gone", stdio("portico_missing_binary_xyz"))])).await;
        let generation_before = supervisor.generation();

        let outcome = supervisor.reload(config_of(vec![])).await.unwrap();
        assert_eq!(outcome.removed, vec!["gone".to_string()]);
        assert!(outcome.added.is_empty());
        assert_eq!(outcome.generation, generation_before + 1);
        assert!(supervisor.get("gone").is_none());
        assert!(supervisor.last_reload().is_some());
    }

    #[tokio::test]
    async fn test_sessions_follow_mount_order() {
        let supervisor = Supervisor::new();
        supervisor
            .mount_all(config_of(vec![
                ("a", stdio("portico_missing_binary_xyz")),
                ("b", stdio("portico_missing_binary_xyz")),
            ]))
            .await;
        let names: Vec<String> =
            supervisor.sessions().iter().map(|s| s.name().to_string()).collect();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_shutdown_clears_everything() {
        let supervisor = Supervisor::new();
        supervisor.mount_all(config_of(vec![("s1", stdio("portico_missing_binary_xyz"))])).await;
        supervisor.shutdown().await;
        assert!(supervisor.sessions().is_empty());
        assert!(supervisor.get("s1").is_none());
    }

    #[tokio::test]
    async fn test_call_tool_on_disconnected_session_errors() {
        let session = UpstreamSession::new("s1", stdio("portico_missing_binary_xyz"));
        let err = session.call_tool("t", serde_json::json!({})).await.unwrap_err();
        assert!(err.to_string().contains("not connected"));
    }
}
