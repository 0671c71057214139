//! In-memory chat sessions.
//!
//! Sessions live only for the process lifetime. Reset keeps the leading
//! system message and discards everything else, including steps and the
//! per-session tool catalog (which is rebuilt lazily on the next
//! message).

use crate::chat::catalog::CatalogEntry;
use chrono::Utc;
use portico_abstraction::{ChatMessage, ToolDef};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// One recorded step of an exchange.
#[derive(Debug, Clone)]
pub struct ChatStep {
    /// Step id.
    pub id: String,
    /// Step type, currently always "agent_step".
    pub step_type: String,
    /// Human-readable title ("Step 2: Generating response").
    pub title: String,
    /// Step status ("running", "tools_executed", "completed").
    pub status: String,
    /// Structured detail: phase, tool calls, finish reason, summary.
    pub detail: Value,
    /// ISO timestamp of step start.
    pub started_at: String,
    /// ISO timestamp of step completion.
    pub completed_at: Option<String>,
}

impl ChatStep {
    /// Starts a new running step.
    pub fn start(title: String, detail: Value) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            step_type: "agent_step".to_string(),
            title,
            status: "running".to_string(),
            detail,
            started_at: Utc::now().to_rfc3339(),
            completed_at: None,
        }
    }

    /// Marks the step finished with a status.
    pub fn complete(&mut self, status: &str) {
        self.status = status.to_string();
        self.completed_at = Some(Utc::now().to_rfc3339());
    }

    /// JSON view for session payloads and step events.
    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "type": self.step_type,
            "title": self.title,
            "status": self.status,
            "detail": self.detail,
            "startedAt": self.started_at,
            "completedAt": self.completed_at,
        })
    }
}

/// One chat session: history, steps, and the tool catalog.
pub struct ChatSession {
    /// Session id.
    pub id: String,
    /// Model serving the session; may change per message.
    pub model: String,
    /// Ordered message history, system message first when present.
    pub messages: Vec<ChatMessage>,
    /// Ordered step records.
    pub steps: Vec<ChatStep>,
    /// Tool definitions advertised to the provider.
    pub tool_defs: Vec<ToolDef>,
    /// Catalog index: function name to dispatch target.
    pub tool_index: HashMap<String, CatalogEntry>,
    /// Optional upstream allowlist fixed at session creation.
    pub allowlist: Option<Vec<String>>,
}

impl ChatSession {
    /// Creates a session, seeding the history with the system prompt.
    pub fn new(model: String, system_prompt: Option<String>, allowlist: Option<Vec<String>>) -> Self {
        let mut messages = Vec::new();
        if let Some(prompt) = system_prompt {
            messages.push(ChatMessage::system(prompt));
        }
        Self {
            id: Uuid::new_v4().simple().to_string(),
            model,
            messages,
            steps: Vec::new(),
            tool_defs: Vec::new(),
            tool_index: HashMap::new(),
            allowlist,
        }
    }

    /// Drops everything but the leading system message.
    pub fn reset(&mut self) {
        let system = self.messages.first().filter(|m| m.role == "system").cloned();
        self.messages.clear();
        if let Some(system) = system {
            self.messages.push(system);
        }
        self.steps.clear();
        self.tool_defs.clear();
        self.tool_index.clear();
    }

    /// JSON view returned by the session endpoints, with `<think>` ranges
    /// stripped from displayed assistant content.
    pub fn to_json(&self) -> Value {
        let messages: Vec<Value> = self
            .messages
            .iter()
            .map(|msg| {
                let mut view = serde_json::to_value(msg).unwrap_or_else(|_| json!({}));
                if msg.role == "assistant" {
                    if let Some(display) = msg.display_content() {
                        view["content"] = json!(display);
                    }
                }
                view
            })
            .collect();
        json!({
            "id": self.id,
            "model": self.model,
            "messages": messages,
            "steps": self.steps.iter().map(ChatStep::to_json).collect::<Vec<_>>(),
            "toolCount": self.tool_defs.len(),
            "servers": self.allowlist,
        })
    }
}

/// Owns every live chat session.
#[derive(Default)]
pub struct ChatSessionManager {
    sessions: Mutex<HashMap<String, Arc<tokio::sync::Mutex<ChatSession>>>>,
}

impl ChatSessionManager {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates and registers a session, returning its handle.
    pub fn create(
        &self,
        model: String,
        system_prompt: Option<String>,
        allowlist: Option<Vec<String>>,
    ) -> (String, Arc<tokio::sync::Mutex<ChatSession>>) {
        let session = ChatSession::new(model, system_prompt, allowlist);
        let id = session.id.clone();
        let handle = Arc::new(tokio::sync::Mutex::new(session));
        self.sessions
            .lock()
            .expect("session lock poisoned")
            .insert(id.clone(), handle.clone());
        (id, handle)
    }

    /// Looks up a session by id.
    pub fn get(&self, id: &str) -> Option<Arc<tokio::sync::Mutex<ChatSession>>> {
        self.sessions.lock().expect("session lock poisoned").get(id).cloned()
    }

    /// Deletes a session immediately.
    pub fn delete(&self, id: &str) -> bool {
        self.sessions.lock().expect("session lock poisoned").remove(id).is_some()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().expect("session lock poisoned").len()
    }

    /// True when no sessions are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
