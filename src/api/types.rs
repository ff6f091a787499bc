//! Typed records for the remote session API.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A remote conversational session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message in a session transcript.
///
/// `time` is an RFC 3339 UTC timestamp string. All timestamps come from the
/// same source and share one format, so lexical order is chronological order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    pub time: String,
    /// Model that produced (or was addressed by) this message, as
    /// `provider/model`. Present on user messages that carry a model choice.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub parts: Vec<MessagePart>,
}

impl MessageRecord {
    /// Concatenated text of all `Text` parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                MessagePart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Closed set of message part variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    Text {
        text: String,
    },
    Reasoning {
        text: String,
    },
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
    ToolResult {
        tool_call_id: String,
        content: String,
        is_error: bool,
    },
    File {
        path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        media_type: Option<String>,
    },
    Patch {
        diff: String,
    },
    Snapshot {
        id: String,
    },
    AgentSwitch {
        agent: String,
    },
}

/// How an agent may be used.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentMode {
    Subagent,
    Primary,
    All,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// None means the agent did not declare a mode and is usable anywhere.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<AgentMode>,
}

impl AgentInfo {
    /// Whether this agent may be dispatched as a sub-agent.
    pub fn usable_as_subagent(&self) -> bool {
        matches!(self.mode, None | Some(AgentMode::Subagent) | Some(AgentMode::All))
    }
}

/// Global platform configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Default model as `provider/model`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// A prompt dispatched into a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub parts: Vec<MessagePart>,
    /// Per-tool enable/disable overrides applied for this prompt.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tools: HashMap<String, bool>,
}
