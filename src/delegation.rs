//! The delegation record: one remote background task and its lifecycle state.

use crate::format::format_duration;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DelegationStatus {
    Running,
    Completed,
    Error,
    Cancelled,
    Timeout,
}

impl fmt::Display for DelegationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// Best-effort liveness info, fed by message events. Never authoritative for
/// status.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Progress {
    pub tool_calls: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<DateTime<Utc>>,
}

/// One remote background task. `id` is the remote session id created for this
/// task; the two are the same value for the record's whole lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delegation {
    pub id: String,

    pub parent_session_id: String,
    pub parent_message_id: String,
    pub parent_agent: String,
    /// Parent's model at creation time, captured once for analysis defaults.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_model: Option<String>,

    pub agent: String,
    pub prompt: String,
    /// Explicit model override as `provider/model`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    pub status: DelegationStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub progress: Progress,
}

impl Delegation {
    pub fn is_terminal(&self) -> bool {
        self.status != DelegationStatus::Running
    }

    /// Human duration string; runs up to "now" while still running.
    pub fn duration_string(&self) -> String {
        let end = self.completed_at.unwrap_or_else(Utc::now);
        format_duration(self.started_at, end)
    }
}
