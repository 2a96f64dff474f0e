//! Conversation messages exchanged with the model.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A structured tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    User {
        content: String,
    },
    Assistant {
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCallRequest>,
    },
    Tool {
        call_id: String,
        name: String,
        content: String,
    },
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
        }
    }

    /// Non-empty assistant text, if this is an assistant message carrying any.
    pub fn assistant_text(&self) -> Option<&str> {
        match self {
            Message::Assistant {
                content: Some(text),
                ..
            } if !text.trim().is_empty() => Some(text),
            _ => None,
        }
    }

    /// Like [`Message::assistant_text`], but only for messages with no tool calls.
    pub fn plain_assistant_text(&self) -> Option<&str> {
        match self {
            Message::Assistant { tool_calls, .. } if tool_calls.is_empty() => {
                self.assistant_text()
            }
            _ => None,
        }
    }
}
