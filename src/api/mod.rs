//! Remote collaborator seams: the session platform and the notification sink.

mod types;

pub use types::{
    AgentInfo, AgentMode, GlobalConfig, MessagePart, MessageRecord, PromptRequest, Role,
    SessionRecord,
};

use crate::error::Result;
use async_trait::async_trait;

/// The remote agent-session platform.
///
/// Every call is a suspension point; implementations map transport failures
/// to [`crate::Error::Remote`].
#[async_trait]
pub trait SessionApi: Send + Sync {
    /// Create a child session under `parent_id`. The returned record's id
    /// becomes the delegation id.
    async fn create_session(&self, parent_id: &str, title: &str) -> Result<SessionRecord>;

    /// Send a prompt into a session. Resolves when the prompt is accepted,
    /// not when the session finishes working on it.
    async fn send_prompt(&self, session_id: &str, req: PromptRequest) -> Result<()>;

    /// Best-effort abort of a session's current work.
    async fn abort_session(&self, session_id: &str) -> Result<()>;

    /// Ordered transcript of a session.
    async fn list_messages(&self, session_id: &str) -> Result<Vec<MessageRecord>>;

    /// Child sessions of a parent.
    async fn list_children(&self, parent_id: &str) -> Result<Vec<SessionRecord>>;

    /// Available agents.
    async fn list_agents(&self) -> Result<Vec<AgentInfo>>;

    /// Global platform configuration (default model etc).
    async fn global_config(&self) -> Result<GlobalConfig>;
}

/// Delivers notifications back into sessions.
///
/// `deliver` must return once the message is handed off; it must never wait
/// for the target session's own generation turn, or a parent that is
/// mid-generation would deadlock its delegations' completion path.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver `text` into `session_id` as a system message. `no_reply`
    /// marks the message as not expecting a response.
    async fn deliver(&self, session_id: &str, text: &str, no_reply: bool) -> Result<()>;

    /// Show a transient UI toast. Best-effort.
    async fn toast(&self, title: &str, body: &str) -> Result<()>;
}
