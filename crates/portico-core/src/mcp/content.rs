//! Tool-result content flattening.
//!
//! Upstream tools return a list of typed content items. The gateway
//! flattens them into plain JSON: text that parses as JSON becomes the
//! parsed value, images become data objects, resources become URI objects.
//! A single-item list is unwrapped.

use super::{McpContent, ToolCallResult};
use serde_json::{Value, json};

/// Flattens one content item.
pub fn flatten_content(content: &McpContent) -> Value {
    match content {
        McpContent::Text { text } => match serde_json::from_str::<Value>(text) {
            Ok(parsed) => parsed,
            Err(_) => Value::String(text.clone()),
        },
        McpContent::Image { data, mime_type } => json!({
            "kind": "image",
            "mimeType": mime_type,
            "data": data,
        }),
        McpContent::Resource { resource } => {
            let mut out = json!({"kind": "resource", "uri": resource.uri});
            if let Some(ref text) = resource.text {
                out["text"] = json!(text);
            }
            out
        }
    }
}

/// Flattens a full tool result into the value returned to HTTP callers.
///
/// Exactly one item returns unwrapped; zero or many return the list.
pub fn flatten_tool_result(result: &ToolCallResult) -> Value {
    let mut items: Vec<Value> = result.content.iter().map(flatten_content).collect();
    match items.len() {
        1 => items.remove(0),
        _ => Value::Array(items),
    }
}

/// The message of the first text content item, used for upstream errors.
pub fn first_text(result: &ToolCallResult) -> Option<String> {
    result.content.iter().find_map(|c| match c {
        McpContent::Text { text } => Some(text.clone()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::ResourceContents;

    fn text(t: &str) -> McpContent {
        McpContent::Text { text: t.to_string() }
    }

    #[test]
    fn test_json_text_is_unquoted() {
        let result = ToolCallResult {
            content: vec![text("{\"time\": \"12:00\"}")],
            is_error: false,
            structured_content: None,
        };
        assert_eq!(flatten_tool_result(&result), json!({"time": "12:00"}));
    }

    #[test]
    fn test_plain_text_stays_string() {
        let result = ToolCallResult {
            content: vec![text("hello world")],
            is_error: false,
            structured_content: None,
        };
        assert_eq!(flatten_tool_result(&result), json!("hello world"));
    }

    #[test]
    fn test_numeric_text_parses() {
        let result =
            ToolCallResult { content: vec![text("42")], is_error: false, structured_content: None };
        assert_eq!(flatten_tool_result(&result), json!(42));
    }

    #[test]
    fn test_multiple_items_stay_listed() {
        let result = ToolCallResult {
            content: vec![text("a"), text("b")],
            is_error: false,
            structured_content: None,
        };
        assert_eq!(flatten_tool_result(&result), json!(["a", "b"]));
    }

    #[test]
    fn test_empty_content_is_empty_list() {
        let result =
            ToolCallResult { content: vec![], is_error: false, structured_content: None };
        assert_eq!(flatten_tool_result(&result), json!([]));
    }

    #[test]
    fn test_image_becomes_data_object() {
        let result = ToolCallResult {
            content: vec![McpContent::Image {
                data: "aGk=".to_string(),
                mime_type: "image/png".to_string(),
            }],
            is_error: false,
            structured_content: None,
        };
        let flat = flatten_tool_result(&result);
        assert_eq!(flat["kind"], "image");
        assert_eq!(flat["mimeType"], "image/png");
        assert_eq!(flat["data"], "aGk=");
    }

    #[test]
    fn test_resource_becomes_uri_object() {
        let result = ToolCallResult {
            content: vec![McpContent::Resource {
                resource: ResourceContents {
                    uri: "file:///tmp/x".to_string(),
                    mime_type: None,
                    text: Some("body".to_string()),
                },
            }],
            is_error: false,
            structured_content: None,
        };
        let flat = flatten_tool_result(&result);
        assert_eq!(flat["kind"], "resource");
        assert_eq!(flat["uri"], "file:///tmp/x");
        assert_eq!(flat["text"], "body");
    }

    #[test]
    fn test_first_text_skips_non_text() {
        let result = ToolCallResult {
            content: vec![
                McpContent::Image { data: "x".to_string(), mime_type: "image/png".to_string() },
                text("the error"),
            ],
            is_error: true,
            structured_content: None,
        };
        assert_eq!(first_text(&result).as_deref(), Some("the error"));
    }
}
