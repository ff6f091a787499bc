use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Agent not found: {agent}. Available agents: {}", available.join(", "))]
    AgentNotFound {
        agent: String,
        available: Vec<String>,
    },

    #[error("Session create failed: remote API returned no session id")]
    SessionCreateFailed,

    #[error("Delegation not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Remote call failed: {0}")]
    Remote(String),

    #[error("Analysis configuration missing: {0}")]
    AnalysisConfig(String),

    #[error("Analysis timed out")]
    AnalysisTimeout,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
