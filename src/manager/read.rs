//! The delegation read operation: simple, full, and AI-analysis modes.

use super::DelegationManager;
use crate::analysis;
use crate::api::{MessagePart, MessageRecord, Role};
use crate::delegation::{Delegation, DelegationStatus};
use crate::error::{Error, Result};
use crate::format::truncate;
use crate::model::ModelRef;

/// Max messages a full read returns regardless of the caller's limit.
const FULL_MODE_CAP: usize = 100;
/// Preview length for reasoning and tool-result content in full mode.
const PREVIEW_LEN: usize = 400;

#[derive(Debug, Clone)]
pub struct ReadArgs {
    pub id: String,
    /// `simple` (default), `full`, or `ai`.
    pub mode: String,
    /// Analysis model override as `provider/model`.
    pub ai_model: Option<String>,
    /// Full mode: only messages strictly after this id.
    pub since_message_id: Option<String>,
    /// Full mode: cap on returned messages.
    pub limit: Option<usize>,
    pub include_thinking: bool,
    pub include_tools: bool,
}

impl ReadArgs {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            mode: "simple".to_string(),
            ai_model: None,
            since_message_id: None,
            limit: None,
            include_thinking: false,
            include_tools: false,
        }
    }
}

impl DelegationManager {
    /// Read a delegation's result as text.
    ///
    /// An unknown id is a hard [`Error::NotFound`]; every other failure mode
    /// comes back as descriptive text, so a calling agent always has
    /// something actionable.
    pub async fn read(&self, args: ReadArgs) -> Result<String> {
        let delegation = self
            .get(&args.id)
            .ok_or_else(|| Error::NotFound(args.id.clone()))?;

        if delegation.status == DelegationStatus::Running {
            return Ok(if args.mode == "ai" {
                format!(
                    "Delegation {} is still running ({} elapsed). AI analysis is only \
                     available after completion.",
                    delegation.id,
                    delegation.duration_string()
                )
            } else {
                format!(
                    "Delegation {} is still running ({} elapsed). Check back after the \
                     completion notification.",
                    delegation.id,
                    delegation.duration_string()
                )
            });
        }

        if delegation.status != DelegationStatus::Completed {
            let mut out = format!(
                "Delegation {} ended with status {} after {}.",
                delegation.id,
                delegation.status,
                delegation.duration_string()
            );
            if let Some(error) = &delegation.error {
                out.push_str(&format!("\nError: {error}"));
            }
            return Ok(out);
        }

        match args.mode.as_str() {
            "simple" => Ok(self.read_simple(&delegation).await),
            "full" => Ok(self.read_full(&delegation, &args).await),
            "ai" => Ok(self.read_ai(&delegation, &args).await),
            other => Ok(format!(
                "Invalid mode '{other}'. Valid modes: simple, full, ai."
            )),
        }
    }

    fn metadata_header(delegation: &Delegation) -> String {
        format!(
            "Delegation {} | agent: {} | status: {} | duration: {} | started: {} | completed: {}",
            delegation.id,
            delegation.agent,
            delegation.status,
            delegation.duration_string(),
            delegation.started_at.to_rfc3339(),
            delegation
                .completed_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".to_string()),
        )
    }

    /// Default mode: metadata header plus the last assistant message's text.
    async fn read_simple(&self, delegation: &Delegation) -> String {
        let messages = match self.api().list_messages(&delegation.id).await {
            Ok(messages) => messages,
            Err(e) => return format!("Failed to fetch messages for {}: {e}", delegation.id),
        };
        if messages.is_empty() {
            return format!("No messages recorded for delegation {}.", delegation.id);
        }

        let Some(last_assistant) = messages.iter().rev().find(|m| m.role == Role::Assistant)
        else {
            return format!(
                "Delegation {} produced no assistant output.",
                delegation.id
            );
        };

        let text = last_assistant.text();
        if text.is_empty() {
            return format!(
                "Delegation {}'s final assistant message contained no text.",
                delegation.id
            );
        }

        format!("{}\n\n{}", Self::metadata_header(delegation), text)
    }

    /// Full transcript with slicing, capping, and per-part gating.
    async fn read_full(&self, delegation: &Delegation, args: &ReadArgs) -> String {
        let mut messages = match self.api().list_messages(&delegation.id).await {
            Ok(messages) => messages,
            Err(e) => return format!("Failed to fetch messages for {}: {e}", delegation.id),
        };

        // Timestamps share one RFC 3339 UTC format, so lexical order is
        // chronological order.
        messages.sort_by(|a, b| a.time.cmp(&b.time));

        if let Some(since) = &args.since_message_id {
            if let Some(pos) = messages.iter().position(|m| &m.id == since) {
                messages.drain(..=pos);
            }
        }

        let cap = args.limit.unwrap_or(FULL_MODE_CAP).min(FULL_MODE_CAP);
        let remaining = messages.len().saturating_sub(cap);
        messages.truncate(cap);

        let mut out = Self::metadata_header(delegation);
        out.push('\n');
        for msg in &messages {
            out.push_str(&render_message(msg, args));
        }
        if remaining > 0 {
            out.push_str(&format!(
                "\n({remaining} more messages; pass since_message_id to continue)"
            ));
        }
        out
    }

    /// AI mode: resolve a model through the fallback chain and run the
    /// analysis helper.
    async fn read_ai(&self, delegation: &Delegation, args: &ReadArgs) -> String {
        let model_str = match &args.ai_model {
            Some(model) => Some(model.clone()),
            None => match &delegation.parent_model {
                Some(model) => Some(model.clone()),
                None => self
                    .api()
                    .global_config()
                    .await
                    .ok()
                    .and_then(|c| c.model),
            },
        };

        let Some(model_str) = model_str else {
            return "No analysis model could be resolved. Pass ai_model as \
                    'provider/model', or configure a default model."
                .to_string();
        };
        let Some(model) = ModelRef::parse(&model_str) else {
            return format!(
                "Analysis model '{model_str}' is not a valid 'provider/model' reference."
            );
        };

        let messages = match self.api().list_messages(&delegation.id).await {
            Ok(messages) => messages,
            Err(e) => return format!("Failed to fetch messages for {}: {e}", delegation.id),
        };

        let audit_dir = self
            .config()
            .debug_log
            .then(|| self.config().analysis_log_dir());
        match analysis::analyze(
            delegation,
            &messages,
            &model,
            self.catalog(),
            self.credentials(),
            self.completion().as_ref(),
            self.config().analysis_timeout(),
            audit_dir.as_deref(),
        )
        .await
        {
            Ok(report) => format!(
                "{}\n\nAnalysis ({model}):\n{report}",
                Self::metadata_header(delegation)
            ),
            Err(e) => format!("Analysis failed: {e}"),
        }
    }
}

fn render_message(msg: &MessageRecord, args: &ReadArgs) -> String {
    let role = match msg.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    };
    let mut out = format!("\n[{role}] {} ({})\n", msg.time, msg.id);
    for part in &msg.parts {
        match part {
            MessagePart::Text { text } => {
                out.push_str(text);
                out.push('\n');
            }
            MessagePart::Reasoning { text } => {
                if args.include_thinking {
                    out.push_str(&format!("(reasoning) {}\n", truncate(text, PREVIEW_LEN)));
                }
            }
            MessagePart::ToolCall { name, .. } => {
                if args.include_tools {
                    out.push_str(&format!("(tool call: {name})\n"));
                }
            }
            MessagePart::ToolResult {
                content, is_error, ..
            } => {
                if args.include_tools {
                    let tag = if *is_error { "tool error" } else { "tool result" };
                    out.push_str(&format!("({tag}) {}\n", truncate(content, PREVIEW_LEN)));
                }
            }
            // Structural parts carry no reader-facing text.
            MessagePart::File { path, .. } => {
                out.push_str(&format!("(file: {path})\n"));
            }
            MessagePart::Patch { .. }
            | MessagePart::Snapshot { .. }
            | MessagePart::AgentSwitch { .. } => {}
        }
    }
    out
}
