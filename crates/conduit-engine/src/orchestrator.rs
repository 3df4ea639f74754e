//! Generation orchestrator: one background task per response.
//!
//! Each run takes its subject's lock, launches the agent, feeds stdout
//! through [`StreamParser`] into the response's event log, and finalizes
//! the status. Cancellation is a token checked at every read; it never
//! aborts the task from outside.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{info, instrument, warn};

use conduit_core::{
    EventKind, MessageRole, OrchestratorError, ResponseId, ResponseStatus, TranscriptStore,
};
use conduit_settings::ConduitSettings;

use crate::hooks::{filter_events, RunHooks};
use crate::launcher::{AgentInvocation, SessionFlag};
use crate::locks::SessionLocks;
use crate::parser::{ParsedItem, StreamParser};
use crate::registry::{ResponseEntry, ResponseRegistry};
use crate::tool_policy::ToolPolicy;

/// Parameters for one generation run.
pub struct GenerationRequest {
    pub subject_key: String,
    /// Message after placeholder substitution.
    pub message: String,
    pub is_first_turn: bool,
    /// Agent-side session token, created on the first turn and resumed after.
    pub resume_token: String,
    pub tool_policy: ToolPolicy,
    pub extra_args: Vec<String>,
    pub work_dir: PathBuf,
    pub model: String,
    pub hooks: Arc<dyn RunHooks>,
}

#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub agent_binary: String,
    pub skip_permissions: bool,
    pub terminate_grace: Duration,
}

impl OrchestratorConfig {
    pub fn from_settings(settings: &ConduitSettings) -> Self {
        Self {
            agent_binary: settings.agent.binary.clone(),
            skip_permissions: settings.agent.skip_permissions,
            terminate_grace: settings.generation.terminate_grace(),
        }
    }
}

struct Inner {
    registry: Arc<ResponseRegistry>,
    locks: Arc<SessionLocks>,
    store: Arc<dyn TranscriptStore>,
    config: OrchestratorConfig,
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<ResponseRegistry>,
        locks: Arc<SessionLocks>,
        store: Arc<dyn TranscriptStore>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                locks,
                store,
                config,
            }),
        }
    }

    pub fn registry(&self) -> &Arc<ResponseRegistry> {
        &self.inner.registry
    }

    pub fn locks(&self) -> &Arc<SessionLocks> {
        &self.inner.locks
    }

    pub fn store(&self) -> &Arc<dyn TranscriptStore> {
        &self.inner.store
    }

    /// Register a `pending` response and run it on a background task.
    pub fn start(&self, request: GenerationRequest) -> ResponseId {
        let entry = self.inner.registry.create(request.subject_key.clone());
        let id = entry.id().clone();
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.run(entry, request).await;
        });
        id
    }

    pub fn cancel(&self, id: &ResponseId) -> bool {
        self.inner.registry.cancel(id)
    }

    pub fn cancel_active(&self, subject_key: Option<&str>) -> usize {
        self.inner.registry.cancel_active(subject_key)
    }
}

impl Inner {
    #[instrument(skip_all, fields(response_id = %entry.id(), subject = %request.subject_key))]
    async fn run(&self, entry: Arc<ResponseEntry>, request: GenerationRequest) {
        let _guard = tokio::select! {
            acquired = self.locks.acquire(&request.subject_key) => match acquired {
                Ok(guard) => guard,
                Err(e) => {
                    warn!(error = %e, kind = e.error_kind(), "session lock not acquired");
                    entry.fail(e.to_string());
                    return;
                }
            },
            _ = entry.cancel_token().cancelled() => {
                info!("cancelled while waiting for session lock");
                entry.set_status(ResponseStatus::Completed);
                return;
            }
        };

        if entry.is_cancelled() {
            entry.set_status(ResponseStatus::Completed);
            return;
        }

        if request.is_first_turn {
            request.hooks.on_first_turn(&entry, &request.message);
        }

        entry.set_status(ResponseStatus::Running);
        match self.drive(&entry, &request).await {
            Ok(()) => {
                entry.set_status(ResponseStatus::Completed);
                info!(
                    events = entry.event_count(),
                    cancelled = entry.is_cancelled(),
                    "generation finished"
                );
            }
            Err(e) => {
                warn!(error = %e, kind = e.error_kind(), "generation failed");
                entry.fail(e.to_string());
            }
        }
    }

    async fn drive(
        &self,
        entry: &Arc<ResponseEntry>,
        request: &GenerationRequest,
    ) -> Result<(), OrchestratorError> {
        let invocation = AgentInvocation {
            binary: self.config.agent_binary.clone(),
            model: request.model.clone(),
            session: Some(SessionFlag::for_turn(
                request.is_first_turn,
                request.resume_token.as_str(),
            )),
            skip_permissions: self.config.skip_permissions,
            extra_args: request.extra_args.clone(),
            tool_args: request.tool_policy.to_args(),
            work_dir: request.work_dir.clone(),
            message: request.message.clone(),
        };
        let mut process = invocation.spawn().await?;
        entry.set_pid(process.id());
        info!(pid = ?process.id(), model = %request.model, "agent started");

        let mut parser = StreamParser::new();
        let mut saw_result = false;
        loop {
            let line = tokio::select! {
                biased;
                _ = entry.cancel_token().cancelled() => {
                    info!("cancelling agent");
                    process.terminate(self.config.terminate_grace).await;
                    break;
                }
                line = process.next_line() => line,
            };
            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    process.terminate(self.config.terminate_grace).await;
                    entry.set_pid(None);
                    return Err(OrchestratorError::SubprocessCrash(format!(
                        "reading agent output: {e}"
                    )));
                }
            };

            for item in parser.feed(&line) {
                match item {
                    ParsedItem::Event { kind, data } => {
                        entry.push_event(kind, data);
                        if kind == EventKind::Text {
                            entry.set_final_text(parser.full_response());
                            request.hooks.on_text(entry, parser.full_response());
                        }
                    }
                    ParsedItem::Finished {
                        text,
                        usage_percent,
                    } => {
                        saw_result = true;
                        self.record_result(entry, request, text, usage_percent);
                    }
                }
            }
        }

        let status = process
            .wait()
            .await
            .map_err(|e| OrchestratorError::SubprocessCrash(e.to_string()))?;
        entry.set_pid(None);

        if entry.is_cancelled() {
            return Ok(());
        }
        if !status.success() && !saw_result {
            let tail = process.stderr_tail().await;
            let reason = if tail.is_empty() {
                format!("agent exited with {status}")
            } else {
                format!("agent exited with {status}: {tail}")
            };
            return Err(OrchestratorError::SubprocessCrash(reason));
        }

        self.persist(entry, request)
    }

    fn record_result(
        &self,
        entry: &ResponseEntry,
        request: &GenerationRequest,
        text: String,
        usage_percent: f64,
    ) {
        entry.set_final_text(&text);
        entry.set_context_percent(usage_percent);
        entry.push_event(
            EventKind::Result,
            json!({ "text": text, "contextUsagePercent": usage_percent }),
        );
        if usage_percent > 0.0 {
            if let Err(e) = self
                .store
                .update_context_usage(&request.subject_key, usage_percent)
            {
                warn!(error = %e, "failed to record context usage");
            }
        }
    }

    fn persist(
        &self,
        entry: &ResponseEntry,
        request: &GenerationRequest,
    ) -> Result<(), OrchestratorError> {
        let text = entry.final_text();
        let events = filter_events(entry.events(), request.hooks.persist_filter());
        if text.is_empty() && events.is_empty() {
            return Ok(());
        }
        let message_id = self.store.append_message(
            &request.subject_key,
            MessageRole::Assistant,
            &text,
            Some(&events),
        )?;
        entry.set_message_id(message_id);
        request.hooks.on_persisted(entry, message_id);
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::hooks::NoopHooks;
    use crate::test_support::{write_script, MemoryTranscript};
    use conduit_core::Event;
    use std::path::Path;

    struct Harness {
        orchestrator: Orchestrator,
        store: Arc<MemoryTranscript>,
        _dir: tempfile::TempDir,
        dir: PathBuf,
    }

    fn harness(script_body: &str, lock_timeout: Duration) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();
        let script = write_script(&path, "agent.sh", script_body);
        let store = Arc::new(MemoryTranscript::default());
        let orchestrator = Orchestrator::new(
            Arc::new(ResponseRegistry::new(Duration::from_secs(600))),
            Arc::new(SessionLocks::new(lock_timeout)),
            Arc::clone(&store) as Arc<dyn TranscriptStore>,
            OrchestratorConfig {
                agent_binary: script.to_string_lossy().into_owned(),
                skip_permissions: false,
                terminate_grace: Duration::from_secs(2),
            },
        );
        Harness {
            orchestrator,
            store,
            _dir: dir,
            dir: path,
        }
    }

    fn request(subject: &str, work_dir: &Path) -> GenerationRequest {
        GenerationRequest {
            subject_key: subject.into(),
            message: "hello".into(),
            is_first_turn: true,
            resume_token: "tok".into(),
            tool_policy: ToolPolicy::deny_only("AskUserQuestion"),
            extra_args: vec![],
            work_dir: work_dir.to_path_buf(),
            model: "sonnet".into(),
            hooks: Arc::new(NoopHooks),
        }
    }

    async fn wait_terminal(entry: &ResponseEntry) -> ResponseStatus {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let status = entry.status();
                if status.is_terminal() {
                    return status;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap()
    }

    const TRANSCRIPT: &str = r#"cat > /dev/null
cat <<'JSON'
{"type":"system","subtype":"init","session_id":"agent-1"}
not json at all
{"type":"assistant","message":{"usage":{"input_tokens":100,"cache_read_input_tokens":50},"content":[{"type":"text","text":"Listing files"},{"type":"tool_use","id":"t1","name":"Bash","input":{"command":"ls"}}]}}
{"type":"user","tool_use_result":{"stdout":"a.rs","stderr":"","exitCode":0}}
{"type":"result","result":"Found a.rs","modelUsage":{"sonnet":{"contextWindow":200000}}}
JSON
"#;

    #[tokio::test]
    async fn run_records_events_and_persists() {
        let h = harness(TRANSCRIPT, Duration::from_secs(5));
        let id = h.orchestrator.start(request("s1", &h.dir));
        let entry = h.orchestrator.registry().get(&id).unwrap();
        assert_eq!(wait_terminal(&entry).await, ResponseStatus::Completed);

        let kinds: Vec<EventKind> = entry.events().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::Init,
                EventKind::Text,
                EventKind::ToolUse,
                EventKind::BashResult,
                EventKind::Result
            ]
        );
        let last = entry.events().pop().unwrap();
        assert_eq!(last.data["contextUsagePercent"], 0.1);
        assert_eq!(entry.final_text(), "Found a.rs");

        let stored = h.store.messages.lock().clone();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].role, MessageRole::Assistant);
        assert_eq!(stored[0].content, "Found a.rs");
        assert_eq!(stored[0].events.as_ref().map(Vec::len), Some(5));
        assert_eq!(entry.message_id(), Some(1));
        assert_eq!(h.store.usage.lock().clone(), vec![("s1".to_string(), 0.1)]);
    }

    #[tokio::test]
    async fn cancel_before_lock_spawns_nothing() {
        let h = harness(
            "touch \"$(dirname \"$0\")/spawned\"\n",
            Duration::from_secs(5),
        );
        let held = h.orchestrator.locks().acquire("s1").await.unwrap();

        let id = h.orchestrator.start(request("s1", &h.dir));
        let entry = h.orchestrator.registry().get(&id).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(entry.status(), ResponseStatus::Pending);
        assert!(h.orchestrator.cancel(&id));

        assert_eq!(wait_terminal(&entry).await, ResponseStatus::Completed);
        drop(held);
        assert!(entry.events().is_empty());
        assert!(entry.pid().is_none());
        assert!(!h.dir.join("spawned").exists());
        assert!(h.store.messages.lock().is_empty());
    }

    #[tokio::test]
    async fn lock_timeout_fails_distinctly() {
        let h = harness("cat > /dev/null\n", Duration::from_millis(100));
        let _held = h.orchestrator.locks().acquire("s1").await.unwrap();
        let id = h.orchestrator.start(request("s1", &h.dir));
        let entry = h.orchestrator.registry().get(&id).unwrap();
        assert_eq!(wait_terminal(&entry).await, ResponseStatus::Error);
        assert_eq!(
            entry.error().as_deref(),
            Some("Previous response is still processing.")
        );
    }

    #[tokio::test]
    async fn same_subject_runs_never_overlap() {
        let body = "cat > /dev/null\nsleep 0.3\necho '{\"type\":\"result\",\"result\":\"ok\"}'\n";
        let h = harness(body, Duration::from_secs(10));
        let a = h.orchestrator.start(request("s1", &h.dir));
        let b = h.orchestrator.start(request("s1", &h.dir));
        let a = h.orchestrator.registry().get(&a).unwrap();
        let b = h.orchestrator.registry().get(&b).unwrap();

        let mut saw_one_running = false;
        tokio::time::timeout(Duration::from_secs(10), async {
            while !(a.status().is_terminal() && b.status().is_terminal()) {
                let running = [&a, &b]
                    .iter()
                    .filter(|e| e.status() == ResponseStatus::Running)
                    .count();
                assert!(running <= 1, "both runs reached running");
                saw_one_running |= running == 1;
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(saw_one_running);
        assert_eq!(a.status(), ResponseStatus::Completed);
        assert_eq!(b.status(), ResponseStatus::Completed);
        assert_eq!(h.store.messages.lock().len(), 2);
    }

    #[tokio::test]
    async fn different_subjects_run_concurrently() {
        let body = "cat > /dev/null\nsleep 0.5\necho '{\"type\":\"result\",\"result\":\"ok\"}'\n";
        let h = harness(body, Duration::from_secs(10));
        let a = h.orchestrator.start(request("s1", &h.dir));
        let b = h.orchestrator.start(request("s2", &h.dir));
        let a = h.orchestrator.registry().get(&a).unwrap();
        let b = h.orchestrator.registry().get(&b).unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while !(a.status() == ResponseStatus::Running && b.status() == ResponseStatus::Running)
            {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        wait_terminal(&a).await;
        wait_terminal(&b).await;
    }

    #[tokio::test]
    async fn cancel_mid_run_terminates_without_persisting() {
        let body = "cat > /dev/null\necho '{\"type\":\"assistant\",\"message\":{\"content\":[{\"type\":\"text\",\"text\":\"working\"}]}}'\nexec sleep 30\n";
        let h = harness(body, Duration::from_secs(5));
        let id = h.orchestrator.start(request("s1", &h.dir));
        let entry = h.orchestrator.registry().get(&id).unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while entry.event_count() == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        entry.cancel();

        assert_eq!(wait_terminal(&entry).await, ResponseStatus::Completed);
        assert_eq!(entry.event_count(), 1);
        assert!(entry.pid().is_none());
        assert!(h.store.messages.lock().is_empty());
    }

    #[tokio::test]
    async fn nonzero_exit_without_result_is_a_crash() {
        let h = harness(
            "cat > /dev/null\necho 'model not found' >&2\nexit 2\n",
            Duration::from_secs(5),
        );
        let id = h.orchestrator.start(request("s1", &h.dir));
        let entry = h.orchestrator.registry().get(&id).unwrap();
        assert_eq!(wait_terminal(&entry).await, ResponseStatus::Error);
        let reason = entry.error().unwrap();
        assert!(reason.starts_with("agent process failed"), "{reason}");
        assert!(h.store.messages.lock().is_empty());
    }

    #[tokio::test]
    async fn launch_failure_surfaces_as_error() {
        let h = harness("", Duration::from_secs(5));
        std::fs::remove_file(h.dir.join("agent.sh")).unwrap();
        let id = h.orchestrator.start(request("s1", &h.dir));
        let entry = h.orchestrator.registry().get(&id).unwrap();
        assert_eq!(wait_terminal(&entry).await, ResponseStatus::Error);
        assert!(entry.error().unwrap().starts_with("failed to launch agent"));
    }

    struct TextOnly;

    impl RunHooks for TextOnly {
        fn persist_filter(&self) -> Option<&[EventKind]> {
            Some(&[EventKind::Text])
        }
    }

    #[tokio::test]
    async fn persist_filter_limits_stored_events() {
        let h = harness(TRANSCRIPT, Duration::from_secs(5));
        let mut req = request("code_web", &h.dir);
        req.hooks = Arc::new(TextOnly);
        let id = h.orchestrator.start(req);
        let entry = h.orchestrator.registry().get(&id).unwrap();
        wait_terminal(&entry).await;

        let stored = h.store.messages.lock().clone();
        let events: Vec<Event> = stored[0].events.clone().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Text);
        // live log stays unfiltered
        assert_eq!(entry.event_count(), 5);
    }
}
