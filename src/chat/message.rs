use std::fmt;

use serde::{Deserialize, Serialize};

/// Supported role values in chat requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Optional system prompt.
    System,
    /// Human/user role.
    User,
    /// Assistant role.
    Assistant,
    /// Tool result role.
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the conversation sent to the completion endpoint.
///
/// Tool results keep the optional `tool_call_id`/`name` the tool service
/// attaches so the second completion call can correlate them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default, deserialize_with = "content_or_empty")]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Builds a tool-result message associated with a tool call id.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(Role::Tool, content)
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.role, self.content)
    }
}

// Tool services reply with `null` content or structured output; both collapse
// into the plain text the completion endpoint expects.
fn content_or_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(text) => text,
        other => other.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::{Message, Role};
    use serde_json::json;

    #[test]
    fn user_message_serializes_without_optional_fields() {
        let value = serde_json::to_value(Message::user("hello")).expect("serializable");
        assert_eq!(value, json!({"role": "user", "content": "hello"}));
    }

    #[test]
    fn tool_result_keeps_call_id() {
        let value = serde_json::to_value(Message::tool_result("call_1", "1\n2\nFizz"))
            .expect("serializable");
        assert_eq!(value["role"], json!("tool"));
        assert_eq!(value["tool_call_id"], json!("call_1"));
    }

    #[test]
    fn null_and_structured_content_collapse_to_text() {
        let message: Message =
            serde_json::from_value(json!({"role": "assistant", "content": null}))
                .expect("null content is accepted");
        assert_eq!(message.content, "");

        let message: Message = serde_json::from_value(json!({
            "role": "tool",
            "content": {"stdout": "Fizz"},
            "name": "code_interpreter"
        }))
        .expect("structured content is accepted");
        assert_eq!(message.role, Role::Tool);
        assert_eq!(message.content, r#"{"stdout":"Fizz"}"#);
        assert_eq!(message.name.as_deref(), Some("code_interpreter"));
    }

    #[test]
    fn display_matches_conversation_line() {
        assert_eq!(Message::assistant("done").to_string(), "assistant: done");
    }
}
