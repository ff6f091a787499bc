//! Delegation lifecycle coordination.
//!
//! [`DelegationManager`] owns every delegation record and the per-parent
//! pending-notification index, and is the only mutator of either. Remote
//! work (prompt dispatch, watchdog timers) runs on detached tasks holding a
//! clone of the manager handle; each terminal-transition handler re-checks
//! the record is still running before acting, so a cancel, a timeout, and an
//! idle signal can race without corrupting state, and whichever flips the
//! status first wins.

mod read;

pub use read::ReadArgs;

use crate::analysis::CompletionApi;
use crate::api::{MessagePart, NotificationSink, PromptRequest, Role, SessionApi};
use crate::catalog::{CredentialStore, ModelCatalog};
use crate::config::ManagerConfig;
use crate::delegation::{Delegation, DelegationStatus, Progress};
use crate::error::{Error, Result};
use crate::format::truncate;
use crate::notify;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Tools a delegated session may not use, preventing uncontrolled nested
/// delegation.
const DISABLED_TOOLS: &[&str] = &["delegate", "task", "plan"];

const TITLE_LEN: usize = 60;
const DESCRIPTION_LEN: usize = 200;
const LAST_MESSAGE_LEN: usize = 200;

/// Request to launch a new delegation.
#[derive(Debug, Clone)]
pub struct DelegateRequest {
    pub agent: String,
    pub prompt: String,
    pub parent_session_id: String,
    pub parent_message_id: String,
    pub parent_agent: String,
    /// Explicit model override as `provider/model`.
    pub model: Option<String>,
}

struct State {
    delegations: HashMap<String, Delegation>,
    /// parent session id → delegation ids not yet reported resolved. A set
    /// is never removed once created; empty means nothing outstanding.
    pending: HashMap<String, HashSet<String>>,
    /// Live watchdog tokens, keyed by delegation id.
    watchdogs: HashMap<String, CancellationToken>,
}

struct Inner {
    api: Arc<dyn SessionApi>,
    sink: Arc<dyn NotificationSink>,
    completion: Arc<dyn CompletionApi>,
    catalog: ModelCatalog,
    credentials: CredentialStore,
    config: ManagerConfig,
    state: Mutex<State>,
}

/// Cheaply clonable handle over the shared coordinator state.
#[derive(Clone)]
pub struct DelegationManager {
    inner: Arc<Inner>,
}

impl DelegationManager {
    pub fn new(
        api: Arc<dyn SessionApi>,
        sink: Arc<dyn NotificationSink>,
        completion: Arc<dyn CompletionApi>,
        catalog: ModelCatalog,
        credentials: CredentialStore,
        config: ManagerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                sink,
                completion,
                catalog,
                credentials,
                config,
                state: Mutex::new(State {
                    delegations: HashMap::new(),
                    pending: HashMap::new(),
                    watchdogs: HashMap::new(),
                }),
            }),
        }
    }

    /// Launch a delegation. Returns the `running` record immediately; the
    /// prompt is dispatched on a detached task and the remote task's outcome
    /// arrives later through [`handle_session_idle`](Self::handle_session_idle).
    pub async fn delegate(&self, req: DelegateRequest) -> Result<Delegation> {
        let agents = self.inner.api.list_agents().await?;
        let available: Vec<String> = agents
            .iter()
            .filter(|a| a.usable_as_subagent())
            .map(|a| a.name.clone())
            .collect();
        if !available.iter().any(|name| name == &req.agent) {
            return Err(Error::AgentNotFound {
                agent: req.agent,
                available,
            });
        }

        let title = truncate(&req.prompt, TITLE_LEN);
        let session = self
            .inner
            .api
            .create_session(&req.parent_session_id, &title)
            .await?;
        if session.id.is_empty() {
            return Err(Error::SessionCreateFailed);
        }
        let id = session.id;

        // Best-effort: remember what model the parent is running on, for
        // analysis defaults later. Absence is not an error.
        let parent_model = self.parent_model(&req.parent_session_id).await;

        let delegation = Delegation {
            id: id.clone(),
            parent_session_id: req.parent_session_id.clone(),
            parent_message_id: req.parent_message_id,
            parent_agent: req.parent_agent,
            parent_model,
            agent: req.agent.clone(),
            prompt: req.prompt.clone(),
            model: req.model.clone(),
            status: DelegationStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
            title: None,
            description: None,
            progress: Progress::default(),
        };

        {
            let mut state = self.inner.state.lock().unwrap();
            state.delegations.insert(id.clone(), delegation.clone());
            state
                .pending
                .entry(req.parent_session_id)
                .or_default()
                .insert(id.clone());
        }

        info!(id = %id, agent = %req.agent, "delegation started");
        self.arm_watchdog(&id);
        self.dispatch(&id, req.agent, req.prompt, req.model);

        Ok(delegation)
    }

    /// Resume a cancelled or errored delegation in its existing session,
    /// preserving the remote conversation history.
    pub async fn resume(&self, id: &str, prompt: Option<String>) -> Result<Delegation> {
        let (agent, model) = {
            let mut state = self.inner.state.lock().unwrap();
            let delegation = state
                .delegations
                .get_mut(id)
                .ok_or_else(|| Error::NotFound(id.to_string()))?;

            match delegation.status {
                DelegationStatus::Running => {
                    return Err(Error::InvalidState(
                        "cannot resume a running delegation".to_string(),
                    ));
                }
                DelegationStatus::Cancelled | DelegationStatus::Error => {}
                status => {
                    return Err(Error::InvalidState(format!(
                        "cannot resume a {status} delegation; only cancelled or errored \
                         delegations can be resumed"
                    )));
                }
            }

            delegation.status = DelegationStatus::Running;
            delegation.started_at = Utc::now();
            delegation.completed_at = None;
            delegation.error = None;
            delegation.progress = Progress::default();

            let parent = delegation.parent_session_id.clone();
            let agent = delegation.agent.clone();
            let model = delegation.model.clone();
            state.pending.entry(parent).or_default().insert(id.to_string());
            (agent, model)
        };

        info!(id = %id, "delegation resumed");
        self.arm_watchdog(id);
        let prompt = prompt.unwrap_or_else(|| self.inner.config.continue_prompt.clone());
        self.dispatch(id, agent, prompt, model);

        Ok(self.get(id).expect("delegation present"))
    }

    /// Cancel a running delegation. Returns false when the id is unknown or
    /// the delegation is not running.
    ///
    /// Local state flips to `cancelled` before the remote abort goes out, so
    /// an idle signal racing the abort finds the record already resolved.
    pub async fn cancel(&self, id: &str) -> bool {
        {
            let mut state = self.inner.state.lock().unwrap();
            let Some(delegation) = state.delegations.get_mut(id) else {
                return false;
            };
            if delegation.status != DelegationStatus::Running {
                return false;
            }
            delegation.status = DelegationStatus::Cancelled;
            delegation.completed_at = Some(Utc::now());
            if let Some(token) = state.watchdogs.remove(id) {
                token.cancel();
            }
        }

        info!(id = %id, "delegation cancelled");
        if let Err(e) = self.inner.api.abort_session(id).await {
            debug!(id = %id, error = %e, "abort after cancel failed");
        }
        self.notify_parent(id).await;
        true
    }

    /// Cancel every running delegation under a parent. Returns the ids that
    /// were cancelled.
    pub async fn cancel_all(&self, parent_session_id: &str) -> Vec<String> {
        // Snapshot first; cancel mutates the map we'd be scanning.
        let ids: Vec<String> = {
            let state = self.inner.state.lock().unwrap();
            state
                .delegations
                .values()
                .filter(|d| {
                    d.parent_session_id == parent_session_id
                        && d.status == DelegationStatus::Running
                })
                .map(|d| d.id.clone())
                .collect()
        };

        let mut cancelled = Vec::new();
        for id in ids {
            if self.cancel(&id).await {
                cancelled.push(id);
            }
        }
        cancelled
    }

    /// Watchdog body. Idempotent: a delegation that resolved before the
    /// timer fired is left alone.
    pub async fn handle_timeout(&self, id: &str) {
        {
            let mut state = self.inner.state.lock().unwrap();
            let Some(delegation) = state.delegations.get_mut(id) else {
                return;
            };
            if delegation.status != DelegationStatus::Running {
                return;
            }
            delegation.status = DelegationStatus::Timeout;
            delegation.completed_at = Some(Utc::now());
            delegation.error = Some(format!(
                "Delegation exceeded the maximum run time of {} minutes",
                self.inner.config.max_run_secs / 60
            ));
            state.watchdogs.remove(id);
        }

        warn!(id = %id, "delegation timed out");
        if let Err(e) = self.inner.api.abort_session(id).await {
            debug!(id = %id, error = %e, "abort after timeout failed");
        }
        self.notify_parent(id).await;
    }

    /// The remote platform reported the session idle: the delegation is
    /// done. Idempotent; a record already resolved (cancelled, timed out) is
    /// left alone.
    pub async fn handle_session_idle(&self, session_id: &str) {
        {
            let mut state = self.inner.state.lock().unwrap();
            let Some(delegation) = state.delegations.get_mut(session_id) else {
                return;
            };
            if delegation.status != DelegationStatus::Running {
                return;
            }
            delegation.status = DelegationStatus::Completed;
            delegation.completed_at = Some(Utc::now());
            if let Some(token) = state.watchdogs.remove(session_id) {
                token.cancel();
            }
        }

        info!(id = %session_id, "delegation completed");

        // Opportunistic metadata from the first user message.
        if let Ok(messages) = self.inner.api.list_messages(session_id).await {
            if let Some(first_user) = messages.iter().find(|m| m.role == Role::User) {
                let text = first_user.text();
                if !text.is_empty() {
                    let title = truncate(text.lines().next().unwrap_or(""), TITLE_LEN);
                    let description = truncate(&text, DESCRIPTION_LEN);
                    let mut state = self.inner.state.lock().unwrap();
                    if let Some(delegation) = state.delegations.get_mut(session_id) {
                        delegation.title = Some(title);
                        delegation.description = Some(description);
                    }
                }
            }
        }

        let toast_body = self
            .get(session_id)
            .and_then(|d| d.title)
            .unwrap_or_else(|| session_id.to_string());
        if let Err(e) = self.inner.sink.toast("Delegation complete", &toast_body).await {
            debug!(error = %e, "toast failed");
        }

        self.notify_parent(session_id).await;
    }

    /// Best-effort state reconstruction after a restart: register any child
    /// session of `parent_session_id` not already tracked. Adopted records
    /// are marked completed (the remote task outlived us; its transcript is
    /// still readable) and are not re-added to the pending set. Returns the
    /// adopted ids.
    pub async fn adopt_children(&self, parent_session_id: &str) -> Result<Vec<String>> {
        let children = self.inner.api.list_children(parent_session_id).await?;
        let now = Utc::now();
        let mut adopted = Vec::new();

        let mut state = self.inner.state.lock().unwrap();
        for child in children {
            if state.delegations.contains_key(&child.id) {
                continue;
            }
            let title = child.title.clone();
            state.delegations.insert(
                child.id.clone(),
                Delegation {
                    id: child.id.clone(),
                    parent_session_id: parent_session_id.to_string(),
                    parent_message_id: String::new(),
                    parent_agent: String::new(),
                    parent_model: None,
                    agent: String::new(),
                    prompt: title.clone().unwrap_or_default(),
                    model: None,
                    status: DelegationStatus::Completed,
                    started_at: now,
                    completed_at: Some(now),
                    error: None,
                    title,
                    description: None,
                    progress: Progress::default(),
                },
            );
            adopted.push(child.id);
        }
        if !adopted.is_empty() {
            info!(parent = %parent_session_id, count = adopted.len(), "adopted child sessions");
        }
        Ok(adopted)
    }

    /// Best-effort liveness update from a message-appended event. Never
    /// changes status. Events carrying no text are tool traffic.
    pub fn handle_message_event(&self, session_id: &str, text: Option<&str>) {
        let mut state = self.inner.state.lock().unwrap();
        let Some(delegation) = state.delegations.get_mut(session_id) else {
            return;
        };
        let now = Utc::now();
        delegation.progress.last_update = Some(now);
        match text {
            Some(text) => {
                delegation.progress.last_message = Some(truncate(text, LAST_MESSAGE_LEN));
                delegation.progress.last_message_at = Some(now);
            }
            None => delegation.progress.tool_calls += 1,
        }
    }

    /// Copy of one delegation record.
    pub fn get(&self, id: &str) -> Option<Delegation> {
        self.inner.state.lock().unwrap().delegations.get(id).cloned()
    }

    /// Copies of all delegations, optionally filtered by parent, newest
    /// first.
    pub fn list(&self, parent_session_id: Option<&str>) -> Vec<Delegation> {
        let state = self.inner.state.lock().unwrap();
        let mut delegations: Vec<Delegation> = state
            .delegations
            .values()
            .filter(|d| parent_session_id.is_none_or(|p| d.parent_session_id == p))
            .cloned()
            .collect();
        delegations.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        delegations
    }

    /// Ids outstanding for a parent.
    pub fn pending(&self, parent_session_id: &str) -> HashSet<String> {
        self.inner
            .state
            .lock()
            .unwrap()
            .pending
            .get(parent_session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Arm (or re-arm) the timeout watchdog for a delegation.
    fn arm_watchdog(&self, id: &str) {
        let token = CancellationToken::new();
        {
            let mut state = self.inner.state.lock().unwrap();
            if let Some(old) = state.watchdogs.insert(id.to_string(), token.clone()) {
                old.cancel();
            }
        }

        let manager = self.clone();
        let id = id.to_string();
        let deadline = self.inner.config.watchdog_after();
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(deadline) => manager.handle_timeout(&id).await,
            }
        });
    }

    /// Fire-and-forget prompt dispatch. A rejected dispatch flips the
    /// delegation to `error` and notifies the parent, arbitrarily later than
    /// the call that spawned it.
    fn dispatch(&self, id: &str, agent: String, prompt: String, model: Option<String>) {
        let mut parts = Vec::new();
        if let Some(prefs) = self.inner.config.model_prefs() {
            parts.push(MessagePart::Text { text: prefs });
        }
        parts.push(MessagePart::Text { text: prompt });

        let req = PromptRequest {
            agent: Some(agent),
            model,
            parts,
            tools: DISABLED_TOOLS
                .iter()
                .map(|name| ((*name).to_string(), false))
                .collect(),
        };

        let manager = self.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            if let Err(e) = manager.inner.api.send_prompt(&id, req).await {
                warn!(id = %id, error = %e, "prompt dispatch rejected");
                manager.fail_delegation(&id, format!("prompt dispatch failed: {e}")).await;
            }
        });
    }

    /// Transition a delegation to `error` after a failed dispatch.
    async fn fail_delegation(&self, id: &str, message: String) {
        {
            let mut state = self.inner.state.lock().unwrap();
            let Some(delegation) = state.delegations.get_mut(id) else {
                return;
            };
            if delegation.status != DelegationStatus::Running {
                return;
            }
            delegation.status = DelegationStatus::Error;
            delegation.completed_at = Some(Utc::now());
            delegation.error = Some(message);
            if let Some(token) = state.watchdogs.remove(id) {
                token.cancel();
            }
        }
        self.notify_parent(id).await;
    }

    /// Report one resolved delegation to its parent: drop it from the
    /// pending set, then deliver either an interim notice or, when nothing
    /// is left outstanding, the all-complete digest. Delivery failures are
    /// logged and swallowed.
    async fn notify_parent(&self, id: &str) {
        let (parent, delegation, still_running, resolved) = {
            let mut state = self.inner.state.lock().unwrap();
            let Some(delegation) = state.delegations.get(id).cloned() else {
                return;
            };
            let parent = delegation.parent_session_id.clone();

            let pending = state.pending.entry(parent.clone()).or_default();
            pending.remove(id);
            let still_running = pending.len();

            let mut resolved: Vec<Delegation> = state
                .delegations
                .values()
                .filter(|d| d.parent_session_id == parent && d.is_terminal())
                .cloned()
                .collect();
            resolved.sort_by(|a, b| a.id.cmp(&b.id));

            (parent, delegation, still_running, resolved)
        };

        let notice = notify::compose(&delegation, still_running, &resolved);
        if let Err(e) = self
            .inner
            .sink
            .deliver(&parent, &notice.body, notice.no_reply)
            .await
        {
            warn!(parent = %parent, error = %e, "parent notification failed");
        }
    }

    /// Model of the parent's last user message, if any.
    async fn parent_model(&self, parent_session_id: &str) -> Option<String> {
        let messages = self.inner.api.list_messages(parent_session_id).await.ok()?;
        messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .and_then(|m| m.model.clone())
    }

    pub(crate) fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    pub(crate) fn api(&self) -> &Arc<dyn SessionApi> {
        &self.inner.api
    }

    pub(crate) fn completion(&self) -> &Arc<dyn CompletionApi> {
        &self.inner.completion
    }

    pub(crate) fn catalog(&self) -> &ModelCatalog {
        &self.inner.catalog
    }

    pub(crate) fn credentials(&self) -> &CredentialStore {
        &self.inner.credentials
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_delegate_returns_running_record() {
        let f = fixture();
        let delegation = f.manager.delegate(request("explore", "p1")).await.unwrap();

        assert_eq!(delegation.status, DelegationStatus::Running);
        assert_eq!(delegation.id, "ses-1");
        assert!(delegation.completed_at.is_none());
        assert!(f.manager.pending("p1").contains("ses-1"));

        // Detached dispatch lands with nested delegation tools disabled.
        wait_for(|| !f.api.prompts.lock().unwrap().is_empty()).await;
        let prompts = f.api.prompts.lock().unwrap();
        let (session_id, req) = &prompts[0];
        assert_eq!(session_id, "ses-1");
        assert_eq!(req.agent.as_deref(), Some("explore"));
        for tool in DISABLED_TOOLS {
            assert_eq!(req.tools.get(*tool), Some(&false));
        }
    }

    #[tokio::test]
    async fn test_delegate_unknown_agent_lists_candidates() {
        let f = fixture();
        let err = f.manager.delegate(request("ghost", "p1")).await.unwrap_err();
        match err {
            Error::AgentNotFound { agent, available } => {
                assert_eq!(agent, "ghost");
                // primary-only agents are not candidates
                assert_eq!(available, vec!["explore", "build", "review"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(f.api.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_delegate_captures_parent_model() {
        let f = fixture();
        f.api.messages.lock().unwrap().insert(
            "p1".into(),
            vec![crate::api::MessageRecord {
                id: "m1".into(),
                session_id: "p1".into(),
                role: Role::User,
                time: "2026-01-01T00:00:00Z".into(),
                model: Some("anthropic/claude-sonnet-4".into()),
                parts: vec![],
            }],
        );
        let delegation = f.manager.delegate(request("explore", "p1")).await.unwrap();
        assert_eq!(
            delegation.parent_model.as_deref(),
            Some("anthropic/claude-sonnet-4")
        );
    }

    #[tokio::test]
    async fn test_dispatch_failure_transitions_to_error() {
        let f = fixture();
        f.api.fail_prompt.store(true, Ordering::SeqCst);
        f.manager.delegate(request("explore", "p1")).await.unwrap();

        wait_for(|| {
            f.manager.get("ses-1").unwrap().status == DelegationStatus::Error
        })
        .await;

        let delegation = f.manager.get("ses-1").unwrap();
        assert!(delegation.completed_at.is_some());
        assert!(delegation.error.as_ref().unwrap().contains("dispatch"));

        wait_for(|| !f.sink.delivered.lock().unwrap().is_empty()).await;
        let delivered = f.sink.delivered.lock().unwrap();
        assert_eq!(delivered[0].0, "p1");
    }

    #[tokio::test]
    async fn test_idle_completes_and_derives_metadata() {
        let f = fixture();
        f.manager.delegate(request("explore", "p1")).await.unwrap();
        f.api.messages.lock().unwrap().insert(
            "ses-1".into(),
            vec![crate::api::MessageRecord {
                id: "m1".into(),
                session_id: "ses-1".into(),
                role: Role::User,
                time: "2026-01-01T00:00:00Z".into(),
                model: None,
                parts: vec![MessagePart::Text {
                    text: "Investigate flaky scheduler test\nThen fix it.".into(),
                }],
            }],
        );

        f.manager.handle_session_idle("ses-1").await;

        let delegation = f.manager.get("ses-1").unwrap();
        assert_eq!(delegation.status, DelegationStatus::Completed);
        assert!(delegation.completed_at.is_some());
        assert_eq!(
            delegation.title.as_deref(),
            Some("Investigate flaky scheduler test")
        );
        assert!(delegation.description.is_some());

        assert_eq!(f.sink.toasts.lock().unwrap().len(), 1);
        assert!(!f.manager.pending("p1").contains("ses-1"));
    }

    #[tokio::test]
    async fn test_idle_is_idempotent() {
        let f = fixture();
        f.manager.delegate(request("explore", "p1")).await.unwrap();
        f.manager.handle_session_idle("ses-1").await;
        let completed_at = f.manager.get("ses-1").unwrap().completed_at;

        f.manager.handle_session_idle("ses-1").await;
        assert_eq!(f.manager.get("ses-1").unwrap().completed_at, completed_at);
        // Only one notification went out.
        assert_eq!(f.sink.delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_idle_unknown_session_is_noop() {
        let f = fixture();
        f.manager.handle_session_idle("nope").await;
        assert!(f.sink.delivered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_unknown_returns_false() {
        let f = fixture();
        assert!(!f.manager.cancel("unknown").await);
        assert!(f.sink.delivered.lock().unwrap().is_empty());
        assert!(f.api.aborts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_sets_state_and_aborts() {
        let f = fixture();
        f.manager.delegate(request("explore", "p1")).await.unwrap();

        assert!(f.manager.cancel("ses-1").await);
        let delegation = f.manager.get("ses-1").unwrap();
        assert_eq!(delegation.status, DelegationStatus::Cancelled);
        assert!(delegation.completed_at.is_some());
        assert_eq!(f.api.aborts.lock().unwrap().as_slice(), ["ses-1"]);

        // Second cancel is a no-op.
        assert!(!f.manager.cancel("ses-1").await);
    }

    #[tokio::test]
    async fn test_cancel_wins_over_racing_idle_signal() {
        let f = fixture();
        f.manager.delegate(request("explore", "p1")).await.unwrap();
        f.api.block_abort.store(true, Ordering::SeqCst);

        let manager = f.manager.clone();
        let cancel_task = tokio::spawn(async move { manager.cancel("ses-1").await });

        // Local state flips before the abort resolves.
        wait_for(|| {
            f.manager.get("ses-1").unwrap().status == DelegationStatus::Cancelled
        })
        .await;

        // Idle signal arrives while the abort is still in flight.
        f.manager.handle_session_idle("ses-1").await;
        assert_eq!(
            f.manager.get("ses-1").unwrap().status,
            DelegationStatus::Cancelled
        );

        f.api.abort_gate.notify_waiters();
        assert!(cancel_task.await.unwrap());
        assert_eq!(
            f.manager.get("ses-1").unwrap().status,
            DelegationStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_cancel_all_only_touches_parents_running_children() {
        let f = fixture();
        *f.api.next_session_id.lock().unwrap() = "a1".into();
        f.manager.delegate(request("explore", "p1")).await.unwrap();
        *f.api.next_session_id.lock().unwrap() = "a2".into();
        f.manager.delegate(request("explore", "p1")).await.unwrap();
        *f.api.next_session_id.lock().unwrap() = "b1".into();
        f.manager.delegate(request("explore", "p2")).await.unwrap();

        f.manager.handle_session_idle("a2").await;

        let mut cancelled = f.manager.cancel_all("p1").await;
        cancelled.sort();
        assert_eq!(cancelled, ["a1"]);
        assert_eq!(
            f.manager.get("b1").unwrap().status,
            DelegationStatus::Running
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_forces_timeout() {
        let f = fixture();
        f.manager.delegate(request("explore", "p1")).await.unwrap();

        tokio::time::sleep(f.manager.config().watchdog_after() + std::time::Duration::from_secs(1))
            .await;
        wait_for(|| {
            f.manager.get("ses-1").unwrap().status == DelegationStatus::Timeout
        })
        .await;

        let delegation = f.manager.get("ses-1").unwrap();
        assert!(delegation.error.as_ref().unwrap().contains("15 minutes"));
        assert!(delegation.completed_at.is_some());
        wait_for(|| !f.api.aborts.lock().unwrap().is_empty()).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_spares_resolved_delegation() {
        let f = fixture();
        f.manager.delegate(request("explore", "p1")).await.unwrap();
        f.manager.handle_session_idle("ses-1").await;

        tokio::time::sleep(f.manager.config().watchdog_after() + std::time::Duration::from_secs(1))
            .await;
        assert_eq!(
            f.manager.get("ses-1").unwrap().status,
            DelegationStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_timeout_handler_idempotent() {
        let f = fixture();
        f.manager.delegate(request("explore", "p1")).await.unwrap();
        f.manager.handle_timeout("ses-1").await;
        f.manager.handle_timeout("ses-1").await;
        assert_eq!(f.sink.delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_batched_notifications() {
        let f = fixture();
        for id in ["d1", "d2", "d3"] {
            *f.api.next_session_id.lock().unwrap() = id.into();
            f.manager.delegate(request("explore", "p1")).await.unwrap();
        }

        f.manager.handle_session_idle("d1").await;
        f.manager.handle_session_idle("d2").await;
        f.manager.handle_session_idle("d3").await;

        let delivered = f.sink.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 3);

        // Interim notices: decreasing remaining counts, no reply expected.
        assert!(delivered[0].1.contains("2 delegated tasks are still running"));
        assert!(delivered[0].2);
        assert!(delivered[1].1.contains("1 delegated task is still running"));
        assert!(delivered[1].2);

        // Final digest lists all three and expects a reply.
        let digest = &delivered[2];
        assert!(digest.1.contains("All delegated tasks have finished"));
        for id in ["d1", "d2", "d3"] {
            assert!(digest.1.contains(id));
        }
        assert!(!digest.2);
    }

    #[tokio::test]
    async fn test_resume_after_cancel_round_trip() {
        let f = fixture();
        f.manager.delegate(request("explore", "p1")).await.unwrap();
        f.manager.cancel("ses-1").await;
        assert!(!f.manager.pending("p1").contains("ses-1"));

        let delegation = f.manager.resume("ses-1", None).await.unwrap();
        assert_eq!(delegation.status, DelegationStatus::Running);
        assert!(delegation.completed_at.is_none());
        assert!(delegation.error.is_none());
        assert!(f.manager.pending("p1").contains("ses-1"));

        // Resume reuses the same session and sends the default prompt.
        wait_for(|| f.api.prompts.lock().unwrap().len() >= 2).await;
        let prompts = f.api.prompts.lock().unwrap();
        let (session_id, req) = prompts.last().unwrap();
        assert_eq!(session_id, "ses-1");
        let text = req
            .parts
            .iter()
            .filter_map(|p| match p {
                MessagePart::Text { text } => Some(text.clone()),
                _ => None,
            })
            .collect::<String>();
        assert_eq!(text, f.manager.config().continue_prompt);
        for tool in DISABLED_TOOLS {
            assert_eq!(req.tools.get(*tool), Some(&false));
        }
    }

    #[tokio::test]
    async fn test_resume_rejects_running_and_terminal_states() {
        let f = fixture();
        f.manager.delegate(request("explore", "p1")).await.unwrap();

        let err = f.manager.resume("ses-1", None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));

        f.manager.handle_session_idle("ses-1").await;
        let err = f.manager.resume("ses-1", None).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));

        let err = f.manager.resume("missing", None).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_completed_at_iff_not_running() {
        let f = fixture();
        f.manager.delegate(request("explore", "p1")).await.unwrap();

        let check = |d: &Delegation| {
            assert_eq!(
                d.completed_at.is_some(),
                d.status != DelegationStatus::Running
            );
        };

        check(&f.manager.get("ses-1").unwrap());
        f.manager.cancel("ses-1").await;
        check(&f.manager.get("ses-1").unwrap());
        f.manager.resume("ses-1", None).await.unwrap();
        check(&f.manager.get("ses-1").unwrap());
        f.manager.handle_session_idle("ses-1").await;
        check(&f.manager.get("ses-1").unwrap());
    }

    #[tokio::test]
    async fn test_message_event_updates_progress_only() {
        let f = fixture();
        f.manager.delegate(request("explore", "p1")).await.unwrap();

        f.manager.handle_message_event("ses-1", Some("reading files"));
        f.manager.handle_message_event("ses-1", None);
        f.manager.handle_message_event("ses-1", None);

        let delegation = f.manager.get("ses-1").unwrap();
        assert_eq!(delegation.status, DelegationStatus::Running);
        assert_eq!(delegation.progress.tool_calls, 2);
        assert_eq!(
            delegation.progress.last_message.as_deref(),
            Some("reading files")
        );
        assert!(delegation.progress.last_update.is_some());

        // Unknown session is a no-op.
        f.manager.handle_message_event("nope", Some("x"));
    }

    #[tokio::test]
    async fn test_model_prefs_injected_into_dispatch() {
        let f = fixture();
        std::fs::write(&f.manager.config().model_prefs_path, "prefer fast models").unwrap();
        f.manager.delegate(request("explore", "p1")).await.unwrap();

        wait_for(|| !f.api.prompts.lock().unwrap().is_empty()).await;
        let prompts = f.api.prompts.lock().unwrap();
        let (_, req) = &prompts[0];
        assert_eq!(req.parts.len(), 2);
        assert!(matches!(
            &req.parts[0],
            MessagePart::Text { text } if text == "prefer fast models"
        ));
    }

    #[tokio::test]
    async fn test_adopt_children_skips_tracked_ids() {
        let f = fixture();
        f.manager.delegate(request("explore", "p1")).await.unwrap();
        *f.api.children.lock().unwrap() = vec![
            crate::api::SessionRecord {
                id: "ses-1".into(),
                parent_id: Some("p1".into()),
                title: None,
            },
            crate::api::SessionRecord {
                id: "old-1".into(),
                parent_id: Some("p1".into()),
                title: Some("earlier task".into()),
            },
        ];

        let adopted = f.manager.adopt_children("p1").await.unwrap();
        assert_eq!(adopted, ["old-1"]);

        // Live record untouched, adopted one readable as completed.
        assert_eq!(
            f.manager.get("ses-1").unwrap().status,
            DelegationStatus::Running
        );
        let old = f.manager.get("old-1").unwrap();
        assert_eq!(old.status, DelegationStatus::Completed);
        assert!(old.completed_at.is_some());
        assert_eq!(old.title.as_deref(), Some("earlier task"));
        assert!(!f.manager.pending("p1").contains("old-1"));
    }

    #[tokio::test]
    async fn test_list_filters_by_parent() {
        let f = fixture();
        *f.api.next_session_id.lock().unwrap() = "a1".into();
        f.manager.delegate(request("explore", "p1")).await.unwrap();
        *f.api.next_session_id.lock().unwrap() = "b1".into();
        f.manager.delegate(request("explore", "p2")).await.unwrap();

        assert_eq!(f.manager.list(None).len(), 2);
        let p1 = f.manager.list(Some("p1"));
        assert_eq!(p1.len(), 1);
        assert_eq!(p1[0].id, "a1");
    }
}
