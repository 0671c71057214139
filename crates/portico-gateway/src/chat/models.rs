//! The chat model catalog.
//!
//! A static baseline (MiniMax plus a handful of well-known ids) is merged
//! with live provider listings whenever the matching API key is present.
//! Any listing failure degrades to the static catalog; the endpoint never
//! errors. Entries are filtered through model and provider enable state.

use crate::state::AppState;
use portico_providers::minimax::MINIMAX_MODELS;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// One catalog entry.
#[derive(Debug, Clone)]
pub struct ModelEntry {
    /// Provider-scoped model id.
    pub id: String,
    /// Display label.
    pub label: String,
    /// Provider family key ("openrouter", "openai", "google", "minimax").
    pub provider: String,
}

fn format_label(model_id: &str) -> String {
    let tail = model_id.rsplit('/').next().unwrap_or(model_id);
    tail.replace(['-', '_'], " ")
}

fn static_catalog() -> Vec<ModelEntry> {
    let mut entries: Vec<ModelEntry> = MINIMAX_MODELS
        .iter()
        .map(|(id, label)| ModelEntry {
            id: (*id).to_string(),
            label: (*label).to_string(),
            provider: "minimax".to_string(),
        })
        .collect();
    for (id, provider) in [
        ("anthropic/claude-sonnet-4", "openrouter"),
        ("openai/gpt-4o", "openrouter"),
        ("gemini-2.5-flash", "google"),
        ("gemini-2.5-pro", "google"),
    ] {
        entries.push(ModelEntry {
            id: id.to_string(),
            label: format_label(id),
            provider: provider.to_string(),
        });
    }
    entries
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

async fn fetch_openrouter_models() -> Vec<ModelEntry> {
    let Ok(api_key) = std::env::var("OPENROUTER_API_KEY") else {
        return Vec::new();
    };
    let base_url = std::env::var("OPENROUTER_BASE_URL")
        .unwrap_or_else(|_| "https://openrouter.ai/api/v1".to_string());
    let url = format!("{}/models", base_url.trim_end_matches('/'));
    let result = async {
        let response = client().get(&url).bearer_auth(&api_key).send().await.ok()?;
        let payload: Value = response.json().await.ok()?;
        let entries = payload["data"]
            .as_array()?
            .iter()
            .filter_map(|entry| {
                let id = entry["id"].as_str()?;
                let label = entry["name"].as_str().map_or_else(|| format_label(id), String::from);
                Some(ModelEntry {
                    id: id.to_string(),
                    label,
                    provider: "openrouter".to_string(),
                })
            })
            .collect();
        Some(entries)
    }
    .await;
    result.unwrap_or_else(|| {
        debug!("OpenRouter model listing unavailable");
        Vec::new()
    })
}

async fn fetch_openai_models() -> Vec<ModelEntry> {
    let Ok(api_key) =
        std::env::var("OPEN_AI_API_KEY").or_else(|_| std::env::var("OPENAI_API_KEY"))
    else {
        return Vec::new();
    };
    let base_url = std::env::var("OPEN_AI_BASE_URL")
        .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
    let url = format!("{}/models", base_url.trim_end_matches('/'));
    let result = async {
        let response = client().get(&url).bearer_auth(&api_key).send().await.ok()?;
        let payload: Value = response.json().await.ok()?;
        let entries = payload["data"]
            .as_array()?
            .iter()
            .filter_map(|entry| {
                let id = entry["id"].as_str()?;
                if !(id.starts_with("gpt") || id.starts_with("o1") || id.starts_with("o3")
                    || id.starts_with("o4"))
                {
                    return None;
                }
                Some(ModelEntry {
                    id: id.to_string(),
                    label: format_label(id),
                    provider: "openai".to_string(),
                })
            })
            .collect();
        Some(entries)
    }
    .await;
    result.unwrap_or_default()
}

async fn fetch_google_models() -> Vec<ModelEntry> {
    let Ok(api_key) =
        std::env::var("GOOGLE_API_KEY").or_else(|_| std::env::var("GEMINI_API_KEY"))
    else {
        return Vec::new();
    };
    let base_url = std::env::var("GOOGLE_BASE_URL")
        .unwrap_or_else(|_| "https://generativelanguage.googleapis.com/v1beta".to_string());
    let url = format!("{}/models", base_url.trim_end_matches('/'));
    let result = async {
        let response =
            client().get(&url).header("x-goog-api-key", &api_key).send().await.ok()?;
        let payload: Value = response.json().await.ok()?;
        let entries = payload["models"]
            .as_array()?
            .iter()
            .filter_map(|entry| {
                let name = entry["name"].as_str()?;
                let id = name.strip_prefix("models/").unwrap_or(name);
                if !id.starts_with("gemini") {
                    return None;
                }
                let label = entry["displayName"]
                    .as_str()
                    .map_or_else(|| format_label(id), String::from);
                Some(ModelEntry { id: id.to_string(), label, provider: "google".to_string() })
            })
            .collect();
        Some(entries)
    }
    .await;
    result.unwrap_or_default()
}

/// Builds the merged, state-filtered model catalog.
pub async fn load_model_catalog(app: &AppState) -> Vec<Value> {
    let mut merged: BTreeMap<String, ModelEntry> = BTreeMap::new();
    for entry in static_catalog() {
        merged.insert(entry.id.clone(), entry);
    }
    let (openrouter, openai, google) =
        tokio::join!(fetch_openrouter_models(), fetch_openai_models(), fetch_google_models());
    for entry in openrouter.into_iter().chain(openai).chain(google) {
        merged.insert(entry.id.clone(), entry);
    }

    merged
        .into_values()
        .filter(|entry| app.state().is_provider_enabled(&entry.provider))
        .filter(|entry| app.state().is_model_enabled(&entry.id))
        .map(|entry| json!({"id": entry.id, "label": entry.label, "provider": entry.provider}))
        .collect()
}
