use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::ToolCallId;

/// One turn of the conversation. The `role` tag matches the chat-completions wire names.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    System(TextMessage),
    User(TextMessage),
    Assistant(AssistantMessage),
    Tool(ToolMessage),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TextMessage {
    pub content: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolInvocation>,
}

/// Result of one tool invocation, linked back to the call that requested it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolMessage {
    pub tool_call_id: ToolCallId,
    pub name: String,
    pub arguments: serde_json::Value,
    pub content: String,
}

/// A tool call requested by the model. `arguments` is the raw JSON text as emitted,
/// which may be empty or malformed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: ToolCallId,
    pub name: String,
    pub arguments: String,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
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

// --- Convenience constructors ---

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Message::System(TextMessage { content: text.into() })
    }

    pub fn user(text: impl Into<String>) -> Self {
        Message::User(TextMessage { content: text.into() })
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Message::Assistant(AssistantMessage {
            content: Some(text.into()),
            tool_calls: Vec::new(),
        })
    }

    pub fn assistant_tool_calls(preamble: Option<String>, calls: Vec<ToolInvocation>) -> Self {
        Message::Assistant(AssistantMessage {
            content: preamble,
            tool_calls: calls,
        })
    }

    pub fn tool_result(
        tool_call_id: ToolCallId,
        name: impl Into<String>,
        arguments: serde_json::Value,
        content: impl Into<String>,
    ) -> Self {
        Message::Tool(ToolMessage {
            tool_call_id,
            name: name.into(),
            arguments,
            content: content.into(),
        })
    }

    pub fn role(&self) -> Role {
        match self {
            Message::System(_) => Role::System,
            Message::User(_) => Role::User,
            Message::Assistant(_) => Role::Assistant,
            Message::Tool(_) => Role::Tool,
        }
    }

    /// Text content of the turn, if any.
    pub fn content(&self) -> Option<&str> {
        match self {
            Message::System(m) | Message::User(m) => Some(&m.content),
            Message::Assistant(m) => m.content.as_deref(),
            Message::Tool(m) => Some(&m.content),
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        matches!(self, Message::Assistant(m) if !m.tool_calls.is_empty())
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self, Message::Tool(_))
    }

    /// Text measured for context budgeting: the content plus, for tool-call turns,
    /// each tool name and its raw argument text.
    pub fn measured_text(&self) -> String {
        let mut text = self.content().unwrap_or_default().to_string();
        if let Message::Assistant(m) = self {
            for call in &m.tool_calls {
                text.push_str(&call.name);
                text.push_str(&call.arguments);
            }
        }
        text
    }

    /// Single-line rendering used when flattening history for summarization.
    pub fn render_line(&self) -> String {
        match self {
            Message::Assistant(m) if !m.tool_calls.is_empty() => {
                let calls = m
                    .tool_calls
                    .iter()
                    .map(|c| format!("{}({})", c.name, c.arguments))
                    .collect::<Vec<_>>()
                    .join(", ");
                match &m.content {
                    Some(text) if !text.is_empty() => {
                        format!("assistant: {text} [tool calls: {calls}]")
                    }
                    _ => format!("assistant: [tool calls: {calls}]"),
                }
            }
            other => format!("{}: {}", other.role(), other.content().unwrap_or_default()),
        }
    }
}

impl ToolInvocation {
    pub fn new(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: ToolCallId::new(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn role_tags_match_wire_names() {
        assert_eq!(serde_json::to_value(Message::system("s")).unwrap()["role"], "system");
        assert_eq!(serde_json::to_value(Message::user("u")).unwrap()["role"], "user");
        assert_eq!(serde_json::to_value(Message::assistant_text("a")).unwrap()["role"], "assistant");
        let tool = Message::tool_result(ToolCallId::new(), "read_file", json!({}), "ok");
        assert_eq!(serde_json::to_value(tool).unwrap()["role"], "tool");
    }

    #[test]
    fn plain_assistant_omits_tool_calls() {
        let json = serde_json::to_value(Message::assistant_text("done")).unwrap();
        assert!(json.get("tool_calls").is_none());
        assert_eq!(json["content"], "done");
    }

    #[test]
    fn tool_call_turn_has_null_content() {
        let msg = Message::assistant_tool_calls(None, vec![ToolInvocation::new("list_files", "{}")]);
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json["content"].is_null());
        assert_eq!(json["tool_calls"][0]["name"], "list_files");
        assert!(msg.has_tool_calls());
        assert!(msg.content().is_none());
    }

    #[test]
    fn measured_text_includes_call_arguments() {
        let msg = Message::assistant_tool_calls(
            Some("fetching".into()),
            vec![ToolInvocation::new("fetch_and_save_pdb", r#"{"pdb_id":"1abc"}"#)],
        );
        let text = msg.measured_text();
        assert!(text.starts_with("fetching"));
        assert!(text.contains("fetch_and_save_pdb"));
        assert!(text.contains("1abc"));
    }

    #[test]
    fn render_line_formats() {
        assert_eq!(Message::user("hi").render_line(), "user: hi");
        let calls = Message::assistant_tool_calls(None, vec![ToolInvocation::new("find_input", "{}")]);
        assert_eq!(calls.render_line(), "assistant: [tool calls: find_input({})]");
        let tool = Message::tool_result(ToolCallId::new(), "find_input", json!({}), "nothing");
        assert_eq!(tool.render_line(), "tool: nothing");
    }

    #[test]
    fn serde_roundtrip_all_variants() {
        let messages = vec![
            Message::system("be brief"),
            Message::user("run 1abc"),
            Message::assistant_text("ok"),
            Message::assistant_tool_calls(
                Some("let me look".into()),
                vec![ToolInvocation::new("read_file", r#"{"path":"a.pdb"}"#)],
            ),
            Message::tool_result(ToolCallId::new(), "read_file", json!({"path": "a.pdb"}), "ATOM"),
        ];

        for msg in &messages {
            let json = serde_json::to_string(msg).unwrap();
            let parsed: Message = serde_json::from_str(&json).unwrap();
            assert_eq!(&parsed, msg, "roundtrip failed for {json}");
        }
    }
}
