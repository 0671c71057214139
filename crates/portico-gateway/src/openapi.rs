//! Aggregate OpenAPI document for the synthesized surface.
//!
//! Each tool contributes one `POST /{server}/{tool}` operation whose
//! request schema comes from the schema translator. Component names are
//! always prefixed with the server name, so two upstreams sharing a
//! component name never collide. The document is cached per reload
//! generation.

use crate::state::AppState;
use axum::Json;
use axum::extract::{Query, State};
use portico_core::schema::{CompiledSchema, to_openapi_schema};
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Debug, Deserialize, Default)]
pub struct OpenApiQuery {
    /// Rebuild even when a cached document exists for this generation.
    #[serde(default)]
    pub force_refresh: bool,
}

/// Builds the aggregate document from the current session map.
pub fn build_aggregate(app: &AppState) -> Value {
    let mut paths = serde_json::Map::new();
    let mut components = serde_json::Map::new();

    for session in app.supervisor().sessions() {
        let server = session.name();
        for tool in session.tools() {
            let compiled = CompiledSchema::compile(&tool.input_schema);
            let request_schema = to_openapi_schema(&compiled);
            let operation_id = format!("{}_{}", server, tool.name);

            let mut operation = json!({
                "operationId": operation_id,
                "summary": tool.description.clone().unwrap_or_else(|| tool.name.clone()),
                "responses": {
                    "200": {
                        "description": "Successful tool execution",
                        "content": {"application/json": {"schema": {"type": "object"}}},
                    },
                },
            });
            if !compiled.is_parameterless() {
                operation["requestBody"] = json!({
                    "required": true,
                    "content": {"application/json": {"schema": request_schema}},
                });
            }

            if let Some(ref output_schema) = tool.output_schema {
                let component_name = format!("{}_{}_Output", server, tool.name);
                let output_compiled = CompiledSchema::compile(output_schema);
                components.insert(component_name.clone(), to_openapi_schema(&output_compiled));
                operation["responses"]["200"]["content"]["application/json"]["schema"] =
                    json!({"$ref": format!("#/components/schemas/{}", component_name)});
            }

            paths.insert(
                format!("/{}/{}", server, tool.name),
                json!({"post": operation}),
            );
        }
    }

    json!({
        "openapi": "3.1.0",
        "info": {
            "title": "Portico aggregate API",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "paths": paths,
        "components": {"schemas": components},
    })
}

/// `GET /_meta/aggregate_openapi`
pub async fn aggregate_openapi(
    State(app): State<AppState>,
    Query(query): Query<OpenApiQuery>,
) -> Json<Value> {
    let generation = app.supervisor().generation();
    if !query.force_refresh {
        if let Some(cached) = app.cached_openapi(generation) {
            return Json(cached);
        }
    }
    let doc = build_aggregate(&app);
    app.store_openapi(generation, doc.clone());
    Json(doc)
}
