//! AI-based result analysis for completed delegations.
//!
//! Resolves the analysis model to an endpoint and API key through the local
//! catalog stores, renders the session transcript into a fixed review prompt,
//! and runs a single bounded completion call. Each invocation can leave a
//! JSON audit record on disk.

use crate::api::{MessagePart, MessageRecord, Role};
use crate::catalog::{CredentialStore, ModelCatalog};
use crate::delegation::Delegation;
use crate::error::{Error, Result};
use crate::format::{sortable_timestamp, truncate};
use crate::model::ModelRef;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Max characters of a reasoning or tool-result part shown in transcripts.
const PREVIEW_LEN: usize = 400;

/// HTTP request timeout for the completion call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
/// Connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const ANALYSIS_PROMPT: &str = "\
You are reviewing the output of a delegated background task performed by an \
AI agent. Assess the transcript below against the original request and report:

1. Missed requirements: anything the request asked for that was not done.
2. Incorrect assumptions: places the agent guessed wrongly instead of checking.
3. Abandoned work: threads the agent started and silently dropped.
4. Regressions: changes likely to have broken previously working behavior.
5. Strengths: what the agent did well.
6. Termination quality: did the task end at a sensible stopping point?
7. Overall reliability verdict: can the result be trusted as-is?
8. Recommended next action for the requester.

## Task metadata
Agent: {agent}
Status: {status}
Duration: {duration}

## Original request
{prompt}

## Transcript
{transcript}
";

/// A single text completion against an OpenAI-compatible endpoint.
#[async_trait]
pub trait CompletionApi: Send + Sync {
    async fn complete(
        &self,
        model: &str,
        base_url: &str,
        api_key: &str,
        prompt: &str,
    ) -> Result<String>;
}

/// Production `CompletionApi` over `reqwest`.
pub struct HttpCompletion {
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCompletion").finish()
    }
}

impl HttpCompletion {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }
}

impl Default for HttpCompletion {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionApi for HttpCompletion {
    async fn complete(
        &self,
        model: &str,
        base_url: &str,
        api_key: &str,
        prompt: &str,
    ) -> Result<String> {
        let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": model,
            "messages": [{"role": "user", "content": prompt}],
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Remote(format!("completion request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Remote(format!(
                "completion API error: {}",
                response.status()
            )));
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Remote(format!("completion response parse failed: {e}")))?;

        value["choices"][0]["message"]["content"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| Error::Remote("completion response had no content".to_string()))
    }
}

/// Render a transcript as role-tagged plain text.
pub fn format_transcript(messages: &[MessageRecord]) -> String {
    let mut out = String::new();
    for msg in messages {
        let role = match msg.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        out.push_str(&format!("[{role}]\n"));
        for part in &msg.parts {
            match part {
                MessagePart::Text { text } => {
                    out.push_str(text);
                    out.push('\n');
                }
                MessagePart::Reasoning { text } => {
                    out.push_str(&format!("(reasoning) {}\n", truncate(text, PREVIEW_LEN)));
                }
                MessagePart::ToolCall { name, .. } => {
                    out.push_str(&format!("(tool call: {name})\n"));
                }
                MessagePart::ToolResult {
                    content, is_error, ..
                } => {
                    let tag = if *is_error { "tool error" } else { "tool result" };
                    out.push_str(&format!("({tag}) {}\n", truncate(content, PREVIEW_LEN)));
                }
                MessagePart::File { path, .. } => {
                    out.push_str(&format!("(file: {path})\n"));
                }
                MessagePart::Patch { .. } => out.push_str("(patch)\n"),
                MessagePart::Snapshot { .. } => out.push_str("(snapshot)\n"),
                MessagePart::AgentSwitch { agent } => {
                    out.push_str(&format!("(agent switch: {agent})\n"));
                }
            }
        }
        out.push('\n');
    }
    out
}

fn render_prompt(delegation: &Delegation, transcript: &str) -> String {
    ANALYSIS_PROMPT
        .replace("{agent}", &delegation.agent)
        .replace("{status}", &delegation.status.to_string())
        .replace("{duration}", &delegation.duration_string())
        .replace("{prompt}", &delegation.prompt)
        .replace("{transcript}", transcript)
}

/// One audit record per analysis invocation.
#[derive(Debug, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: String,
    pub delegation_id: String,
    pub model: String,
    pub status: String,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn write_audit_record(log_dir: &Path, record: &AuditRecord) {
    let write = || -> std::io::Result<()> {
        std::fs::create_dir_all(log_dir)?;
        let filename = format!(
            "analysis-{}-{}.json",
            record.delegation_id, record.timestamp
        );
        let content = serde_json::to_string_pretty(record)?;
        std::fs::write(log_dir.join(filename), content)
    };
    if let Err(e) = write() {
        warn!(error = %e, "failed to write analysis audit record");
    }
}

/// Run the analysis for one delegation.
///
/// `messages` is the delegation session's transcript; `model` has already
/// been resolved through the fallback chain by the caller.
pub async fn analyze(
    delegation: &Delegation,
    messages: &[MessageRecord],
    model: &ModelRef,
    catalog: &ModelCatalog,
    credentials: &CredentialStore,
    completion: &dyn CompletionApi,
    timeout: Duration,
    audit_dir: Option<&Path>,
) -> Result<String> {
    let base_url = catalog
        .resolve(model)
        .map_err(|e| Error::AnalysisConfig(e.to_string()))?;
    let api_key = credentials
        .api_key(&model.provider)
        .map_err(|e| Error::AnalysisConfig(e.to_string()))?;

    let prompt = render_prompt(delegation, &format_transcript(messages));

    let started = std::time::Instant::now();
    let outcome = match tokio::time::timeout(
        timeout,
        completion.complete(&model.model, &base_url, &api_key, &prompt),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(Error::AnalysisTimeout),
    };
    let duration_ms = started.elapsed().as_millis() as u64;

    if let Some(dir) = audit_dir {
        let record = AuditRecord {
            timestamp: sortable_timestamp(),
            delegation_id: delegation.id.clone(),
            model: model.to_string(),
            status: if outcome.is_ok() { "success" } else { "error" }.to_string(),
            duration_ms,
            result: outcome.as_ref().ok().cloned(),
            error: outcome.as_ref().err().map(ToString::to_string),
        };
        write_audit_record(dir, &record);
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Credentials;
    use crate::delegation::DelegationStatus;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;

    struct FakeCompletion {
        reply: std::result::Result<String, String>,
        calls: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl CompletionApi for FakeCompletion {
        async fn complete(
            &self,
            model: &str,
            base_url: &str,
            _api_key: &str,
            prompt: &str,
        ) -> Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push((model.into(), base_url.into(), prompt.into()));
            self.reply.clone().map_err(Error::Remote)
        }
    }

    struct HangingCompletion;

    #[async_trait]
    impl CompletionApi for HangingCompletion {
        async fn complete(&self, _: &str, _: &str, _: &str, _: &str) -> Result<String> {
            futures::future::pending().await
        }
    }

    fn sample_delegation() -> Delegation {
        let started = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        Delegation {
            id: "d1".into(),
            parent_session_id: "parent".into(),
            parent_message_id: "msg".into(),
            parent_agent: "build".into(),
            parent_model: None,
            agent: "explore".into(),
            prompt: "map the crate layout".into(),
            model: None,
            status: DelegationStatus::Completed,
            started_at: started,
            completed_at: Some(started + chrono::Duration::seconds(30)),
            error: None,
            title: None,
            description: None,
            progress: crate::delegation::Progress::default(),
        }
    }

    fn stores(dir: &Path) -> (ModelCatalog, CredentialStore) {
        std::fs::write(
            dir.join("models.json"),
            r#"{"anthropic": {"base_url": "https://api.example.com/v1"}}"#,
        )
        .unwrap();
        let store = CredentialStore::at(dir.join("auth.json"));
        store
            .save("anthropic", Credentials::ApiKey { key: "sk-1".into() })
            .unwrap();
        (ModelCatalog::at(dir.join("models.json")), store)
    }

    fn sample_messages() -> Vec<MessageRecord> {
        vec![MessageRecord {
            id: "m1".into(),
            session_id: "d1".into(),
            role: Role::Assistant,
            time: "2026-01-01T00:00:00Z".into(),
            model: None,
            parts: vec![
                MessagePart::Reasoning {
                    text: "r".repeat(500),
                },
                MessagePart::Text {
                    text: "Crate has 4 modules.".into(),
                },
            ],
        }]
    }

    #[test]
    fn test_transcript_truncates_reasoning() {
        let transcript = format_transcript(&sample_messages());
        assert!(transcript.contains("[assistant]"));
        assert!(transcript.contains("Crate has 4 modules."));
        assert!(transcript.contains(&format!("{}...", "r".repeat(400))));
        assert!(!transcript.contains(&"r".repeat(401)));
    }

    #[tokio::test]
    async fn test_analyze_success_writes_audit_record() {
        let dir = tempfile::tempdir().unwrap();
        let (catalog, credentials) = stores(dir.path());
        let completion = FakeCompletion {
            reply: Ok("looks solid".into()),
            calls: Mutex::new(Vec::new()),
        };
        let model = ModelRef::parse("anthropic/claude-sonnet-4").unwrap();
        let log_dir = dir.path().join("analysis");

        let result = analyze(
            &sample_delegation(),
            &sample_messages(),
            &model,
            &catalog,
            &credentials,
            &completion,
            Duration::from_secs(60),
            Some(&log_dir),
        )
        .await
        .unwrap();
        assert_eq!(result, "looks solid");

        // Prompt carried metadata and transcript
        let calls = completion.calls.lock().unwrap();
        assert_eq!(calls[0].0, "claude-sonnet-4");
        assert_eq!(calls[0].1, "https://api.example.com/v1");
        assert!(calls[0].2.contains("map the crate layout"));
        assert!(calls[0].2.contains("Crate has 4 modules."));

        let entries: Vec<_> = std::fs::read_dir(&log_dir).unwrap().collect();
        assert_eq!(entries.len(), 1);
        let name = entries[0].as_ref().unwrap().file_name();
        assert!(name.to_string_lossy().starts_with("analysis-d1-"));
        let record: AuditRecord = serde_json::from_str(
            &std::fs::read_to_string(entries[0].as_ref().unwrap().path()).unwrap(),
        )
        .unwrap();
        assert_eq!(record.status, "success");
        assert_eq!(record.result.as_deref(), Some("looks solid"));
    }

    #[tokio::test]
    async fn test_analyze_missing_provider_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let (catalog, credentials) = stores(dir.path());
        let completion = FakeCompletion {
            reply: Ok("unused".into()),
            calls: Mutex::new(Vec::new()),
        };
        let model = ModelRef::parse("unknown/model").unwrap();

        let err = analyze(
            &sample_delegation(),
            &[],
            &model,
            &catalog,
            &credentials,
            &completion,
            Duration::from_secs(60),
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::AnalysisConfig(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_analyze_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let (catalog, credentials) = stores(dir.path());
        let model = ModelRef::parse("anthropic/claude-sonnet-4").unwrap();
        let log_dir = dir.path().join("analysis");

        let err = analyze(
            &sample_delegation(),
            &[],
            &model,
            &catalog,
            &credentials,
            &HangingCompletion,
            Duration::from_secs(60),
            Some(&log_dir),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::AnalysisTimeout));

        // Failure is audited too
        let entries: Vec<_> = std::fs::read_dir(&log_dir).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }
}
