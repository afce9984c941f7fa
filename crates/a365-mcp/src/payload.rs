//! Helpers for the JSON documents tool servers return inside text content.

use a365_core::{A365Error, Result};
use serde_json::Value;

use crate::types::ToolCallResult;

const ID_KEYS: [&str; 2] = ["id", "chatId"];

/// Resolve the chat identifier out of a `createChat`-style tool result.
///
/// Accepts `{"id": ...}`, `{"chatId": ...}`, and either of those nested under
/// a `chat` or `value` object.
pub fn extract_chat_id(result: &ToolCallResult) -> Result<String> {
    let payload: Value = result.parse_text_payload()?;
    find_id(&payload).ok_or_else(|| {
        A365Error::Mcp(format!(
            "tool result does not contain a chat id: {}",
            preview(&payload)
        ))
    })
}

fn find_id(payload: &Value) -> Option<String> {
    for key in ID_KEYS {
        match payload.get(key) {
            Some(Value::String(id)) if !id.is_empty() => return Some(id.clone()),
            Some(Value::Number(id)) => return Some(id.to_string()),
            _ => {}
        }
    }
    ["chat", "value"]
        .iter()
        .filter_map(|key| payload.get(*key))
        .find_map(find_id)
}

fn preview(payload: &Value) -> String {
    let text = payload.to_string();
    if text.chars().count() > 200 {
        format!("{}...", text.chars().take(200).collect::<String>())
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(text: &str) -> ToolCallResult {
        serde_json::from_value(json!({ "content": [{ "text": text }] })).unwrap()
    }

    #[test]
    fn test_extracts_id() {
        assert_eq!(extract_chat_id(&result(r#"{"id":"chat-42"}"#)).unwrap(), "chat-42");
    }

    #[test]
    fn test_extracts_chat_id_alias() {
        assert_eq!(
            extract_chat_id(&result(r#"{"chatId":"19:abc@thread.v2","topic":"1:1"}"#)).unwrap(),
            "19:abc@thread.v2"
        );
        assert_eq!(
            extract_chat_id(&result(r#"{"chat":{"id":"nested"}}"#)).unwrap(),
            "nested"
        );
    }

    #[test]
    fn test_missing_id_is_an_error() {
        let err = extract_chat_id(&result(r#"{"topic":"no id here"}"#)).unwrap_err();
        assert!(matches!(err, A365Error::Mcp(_)));

        let err = extract_chat_id(&result("not json")).unwrap_err();
        assert!(matches!(err, A365Error::Serialization(_)));
    }
}
