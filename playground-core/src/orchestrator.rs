//! Run orchestrator
//!
//! Ties the editor, the output log, the code store and an interpreter bridge
//! together. Every trigger (run button, auto-run, sample selection, save
//! shortcut) ends in [`RunOrchestrator::dispatch`], which flips the state to
//! `Running` before returning and spawns the run. A guard owned by the run
//! task puts the state back to `Idle` however the run ends.

use crate::bridge::{normalize_event, BridgeError, InterpreterBridge};
use crate::config::Config;
use crate::editor::{ChangeOrigin, EditorAdapter};
use crate::locations::extract_error_locations;
use crate::observe::{Listeners, SubscriptionId};
use crate::output::OutputLog;
use crate::ratelimit::{Debouncer, Throttle};
use crate::samples::{SampleChoice, SampleError, SampleLibrary};
use crate::store::{CodeStore, DEFAULT_CODE};
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use playground_types::{BridgeEvent, ErrorLocation, OutputRecord, RunState};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tokio::task::AbortHandle;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Nothing to run: the source is empty")]
    EmptySource,

    #[error("A run is already in progress")]
    AlreadyRunning,

    #[error(transparent)]
    Sample(#[from] SampleError),
}

#[derive(Error, Debug)]
pub enum RunError {
    #[error("Interpreter failed: {0}")]
    Fatal(String),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error("Run was aborted before the interpreter finished")]
    Aborted,
}

/// What caused a dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Trigger {
    #[default]
    Direct,
    RunButton,
    AutoRun,
    Sample,
    SaveShortcut,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchOptions {
    /// Do not persist the dispatched source
    pub skip_save: bool,
    pub trigger: Trigger,
}

impl DispatchOptions {
    pub fn new(trigger: Trigger) -> Self {
        Self {
            skip_save: false,
            trigger,
        }
    }

    pub fn skip_save(mut self) -> Self {
        self.skip_save = true;
        self
    }
}

/// Result of a run that reached `Done`
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub records: Vec<OutputRecord>,
    pub error_locations: Vec<ErrorLocation>,
    /// Editor version the run was dispatched from
    pub version: u64,
}

impl RunOutcome {
    pub fn has_errors(&self) -> bool {
        self.records.iter().any(|r| r.is_error)
    }
}

/// Handle to a dispatched run
#[derive(Debug)]
pub struct RunHandle {
    id: u64,
    receiver: oneshot::Receiver<Result<RunOutcome, RunError>>,
}

impl RunHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the run to end. The orchestrator is `Idle` again by the time
    /// this returns.
    pub async fn wait(self) -> Result<RunOutcome, RunError> {
        self.receiver.await.unwrap_or(Err(RunError::Aborted))
    }
}

/// Timing and persistence knobs, usually taken from [`Config`]
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub debounce: Duration,
    pub throttle: Duration,
    pub stop_grace: Duration,
    pub auto_run: bool,
    pub persist_on_edit: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(1000),
            throttle: Duration::from_millis(1000),
            stop_grace: Duration::from_millis(2000),
            auto_run: false,
            persist_on_edit: false,
        }
    }
}

impl From<&Config> for OrchestratorSettings {
    fn from(config: &Config) -> Self {
        Self {
            debounce: config.debounce(),
            throttle: config.throttle(),
            stop_grace: config.stop_grace(),
            auto_run: config.auto_run,
            persist_on_edit: config.persist_on_edit,
        }
    }
}

struct Inner {
    bridge: Arc<dyn InterpreterBridge>,
    store: Arc<dyn CodeStore>,
    editor: Arc<EditorAdapter>,
    log: Arc<OutputLog>,
    samples: RwLock<SampleLibrary>,
    settings: OrchestratorSettings,

    throttle: Throttle,
    auto_runner: Debouncer<String>,
    auto_run: AtomicBool,
    last_auto_run: Mutex<Option<String>>,

    state: watch::Sender<RunState>,
    state_listeners: Listeners<RunState>,
    next_run_id: AtomicU64,
    current: Mutex<RunSlot>,
    dispatched_version: Mutex<Option<u64>>,
    pending_input: Mutex<Option<String>>,

    editor_subscription: Mutex<Option<SubscriptionId>>,
    log_subscription: Mutex<Option<SubscriptionId>>,
}

/// Owns the run pipeline. Cheap to clone; clones share state.
///
/// Dispatching and editing spawn tasks, so they must happen inside a tokio
/// runtime.
#[derive(Clone)]
pub struct RunOrchestrator {
    inner: Arc<Inner>,
}

impl RunOrchestrator {
    /// Build an orchestrator whose editor starts with the stored source
    pub fn new(
        bridge: Arc<dyn InterpreterBridge>,
        store: Arc<dyn CodeStore>,
        settings: OrchestratorSettings,
    ) -> Self {
        let editor = Arc::new(EditorAdapter::new(store.get()));
        // Returning to the startup text is not a change worth re-running
        let startup_text = editor.text();
        let log = Arc::new(OutputLog::new());
        let (state, _) = watch::channel(RunState::Idle);

        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let weak = weak.clone();
            let auto_runner = Debouncer::new(settings.debounce, move |text: String| {
                if let Some(inner) = weak.upgrade() {
                    inner.auto_run_fire(text);
                }
            });

            Inner {
                bridge,
                store,
                editor,
                log,
                samples: RwLock::new(SampleLibrary::new()),
                throttle: Throttle::new(settings.throttle),
                auto_runner,
                auto_run: AtomicBool::new(settings.auto_run),
                last_auto_run: Mutex::new(Some(startup_text)),
                settings,
                state,
                state_listeners: Listeners::new(),
                next_run_id: AtomicU64::new(1),
                current: Mutex::new(RunSlot::default()),
                dispatched_version: Mutex::new(None),
                pending_input: Mutex::new(None),
                editor_subscription: Mutex::new(None),
                log_subscription: Mutex::new(None),
            }
        });

        let weak = Arc::downgrade(&inner);
        let editor_id = inner.editor.subscribe(move |change| {
            if change.origin != ChangeOrigin::User {
                return;
            }
            if let Some(inner) = weak.upgrade() {
                inner.on_user_edit(&change.text);
            }
        });
        *inner.editor_subscription.lock() = Some(editor_id);

        let weak = Arc::downgrade(&inner);
        let log_id = inner.log.subscribe(move |records| {
            if let Some(inner) = weak.upgrade() {
                inner.refresh_error_locations(records);
            }
        });
        *inner.log_subscription.lock() = Some(log_id);

        Self { inner }
    }

    pub fn with_samples(self, samples: SampleLibrary) -> Self {
        *self.inner.samples.write() = samples;
        self
    }

    pub fn editor(&self) -> &Arc<EditorAdapter> {
        &self.inner.editor
    }

    pub fn log(&self) -> &Arc<OutputLog> {
        &self.inner.log
    }

    pub fn bridge(&self) -> &Arc<dyn InterpreterBridge> {
        &self.inner.bridge
    }

    pub fn samples(&self) -> SampleLibrary {
        self.inner.samples.read().clone()
    }

    pub fn state(&self) -> RunState {
        *self.inner.state.borrow()
    }

    /// Receiver for awaiting state changes
    pub fn watch_state(&self) -> watch::Receiver<RunState> {
        self.inner.state.subscribe()
    }

    /// Call `callback` with every new run state
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&RunState) + Send + Sync + 'static,
    {
        self.inner.state_listeners.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.state_listeners.unsubscribe(id)
    }

    pub fn auto_run_enabled(&self) -> bool {
        self.inner.auto_run.load(Ordering::SeqCst)
    }

    /// Turning auto-run off drops any pending debounced run
    pub fn set_auto_run(&self, enabled: bool) {
        self.inner.auto_run.store(enabled, Ordering::SeqCst);
        if !enabled {
            self.inner.auto_runner.cancel();
        }
        tracing::debug!(enabled, "auto-run toggled");
    }

    /// Prompt of the run currently waiting for input
    pub fn pending_prompt(&self) -> Option<String> {
        self.inner.pending_input.lock().clone()
    }

    /// Start running `code`
    pub fn dispatch(
        &self,
        code: &str,
        options: DispatchOptions,
    ) -> Result<RunHandle, DispatchError> {
        self.inner.dispatch(code, options)
    }

    /// Run button: dispatches the editor text unless a click was accepted
    /// within the throttle window. Returns `None` when throttled.
    pub fn run_clicked(&self) -> Option<Result<RunHandle, DispatchError>> {
        let inner = &self.inner;
        inner.throttle.call(|| {
            inner.dispatch(&inner.editor.text(), DispatchOptions::new(Trigger::RunButton))
        })
    }

    /// Save shortcut: dispatches (and so persists) the editor text right away
    pub fn save_shortcut(&self) -> Result<RunHandle, DispatchError> {
        self.inner.dispatch(
            &self.inner.editor.text(),
            DispatchOptions::new(Trigger::SaveShortcut),
        )
    }

    /// Replace the document with a sample and run it without persisting.
    ///
    /// `choose` restores the stored source and `default` the built-in
    /// program; any other value names a sample file.
    pub fn select_sample(&self, selection: &str) -> Result<RunHandle, DispatchError> {
        let code = match SampleChoice::parse(selection) {
            SampleChoice::Stored => self.inner.store.get(),
            SampleChoice::Default => DEFAULT_CODE.to_string(),
            SampleChoice::Named(name) => self
                .inner
                .samples
                .read()
                .get(&name)
                .map(str::to_string)
                .ok_or(SampleError::Unknown(name))?,
        };

        self.inner.editor.load(code.as_str());
        self.inner
            .dispatch(&code, DispatchOptions::new(Trigger::Sample).skip_save())
    }

    /// Cancel the in-flight run.
    ///
    /// Returns false when nothing was running. If the bridge does not finish
    /// the run within the stop grace period the run task is aborted.
    pub async fn stop(&self) -> bool {
        let inner = &self.inner;
        if !self.state().is_running() {
            return false;
        }

        tracing::info!(bridge = inner.bridge.name(), "stopping run");
        if let Err(err) = inner.bridge.stop().await {
            tracing::error!(bridge = inner.bridge.name(), "Failed to stop run: {}", err);
        }

        let mut state = self.watch_state();
        let finished = matches!(
            tokio::time::timeout(
                inner.settings.stop_grace,
                state.wait_for(|s| !s.is_running())
            )
            .await,
            Ok(Ok(_))
        );

        if !finished {
            tracing::warn!(
                grace_ms = inner.settings.stop_grace.as_millis() as u64,
                "interpreter did not stop in time, aborting run"
            );
            if let Some((_, handle)) = inner.current.lock().active.as_ref() {
                handle.abort();
            }
            let _ = state.wait_for(|s| !s.is_running()).await;
        }
        true
    }

    /// Send a line of input to the current run, answering its pending
    /// prompt if there is one
    pub async fn provide_input(&self, value: &str) -> Result<(), BridgeError> {
        if !self.state().is_running() {
            return Err(BridgeError::NotAwaitingInput);
        }
        self.inner.pending_input.lock().take();
        self.inner.bridge.provide_input(value).await
    }
}

impl std::fmt::Debug for RunOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOrchestrator")
            .field("bridge", &self.inner.bridge.name())
            .field("state", &self.state())
            .field("auto_run", &self.auto_run_enabled())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn dispatch(
        self: &Arc<Self>,
        code: &str,
        options: DispatchOptions,
    ) -> Result<RunHandle, DispatchError> {
        if code.trim().is_empty() {
            return Err(DispatchError::EmptySource);
        }

        let claimed = self.state.send_if_modified(|state| {
            if state.is_running() {
                false
            } else {
                *state = RunState::Running;
                true
            }
        });
        if !claimed {
            return Err(DispatchError::AlreadyRunning);
        }
        self.state_listeners.notify(&RunState::Running);

        let id = self.next_run_id.fetch_add(1, Ordering::SeqCst);
        let version = self.editor.version();
        *self.dispatched_version.lock() = Some(version);
        self.log.clear();

        if !options.skip_save {
            if let Err(err) = self.store.set(code) {
                tracing::warn!("Failed to save code: {}", err);
            }
        }

        tracing::info!(
            run = id,
            trigger = ?options.trigger,
            bytes = code.len(),
            bridge = self.bridge.name(),
            "dispatching run"
        );

        let (reply, receiver) = oneshot::channel();
        let mut guard = RunGuard {
            inner: Arc::clone(self),
            id,
            reply: Some(reply),
            result: None,
        };
        let code = code.to_string();

        let task = tokio::spawn(async move {
            let result = guard.inner.execute(&code, version).await;
            guard.result = Some(result);
        });

        let mut current = self.current.lock();
        if current.last_finished != id {
            current.active = Some((id, task.abort_handle()));
        }

        Ok(RunHandle { id, receiver })
    }

    async fn execute(&self, code: &str, version: u64) -> Result<RunOutcome, RunError> {
        let mut events = match self.bridge.run(code).await {
            Ok(events) => events,
            Err(err) => {
                tracing::error!(bridge = self.bridge.name(), "Failed to start run: {}", err);
                self.log.error(err.to_string());
                return Err(err.into());
            }
        };

        while let Some(event) = events.next().await {
            tracing::debug!(kind = event.kind(), "interpreter event");
            match normalize_event(event) {
                BridgeEvent::Log(text) => self.log.log(text),
                BridgeEvent::Error(text) => self.log.error(text),
                BridgeEvent::Input(prompt) => {
                    *self.pending_input.lock() = Some(prompt.clone());
                    if !prompt.is_empty() {
                        self.log.log(prompt);
                    }
                }
                BridgeEvent::Fatal(message) => {
                    tracing::error!(bridge = self.bridge.name(), "interpreter fatal: {}", message);
                    self.log.error(message.clone());
                    return Err(RunError::Fatal(message));
                }
                BridgeEvent::Done => {
                    let records = self.log.records();
                    return Ok(RunOutcome {
                        error_locations: extract_error_locations(&records),
                        records,
                        version,
                    });
                }
            }
        }

        let message = "interpreter closed the event stream before finishing".to_string();
        tracing::error!(bridge = self.bridge.name(), "{}", message);
        self.log.error(message.clone());
        Err(RunError::Fatal(message))
    }

    fn finish_run(&self, id: u64) {
        {
            let mut current = self.current.lock();
            current.last_finished = id;
            if matches!(current.active, Some((active, _)) if active == id) {
                current.active = None;
            }
        }
        *self.pending_input.lock() = None;
        self.state.send_replace(RunState::Idle);
        self.state_listeners.notify(&RunState::Idle);
    }

    fn on_user_edit(&self, text: &str) {
        if self.settings.persist_on_edit {
            if let Err(err) = self.store.set(text) {
                tracing::warn!("Failed to save code: {}", err);
            }
        }
        if self.auto_run.load(Ordering::SeqCst) {
            self.auto_runner.call(text.to_string());
        }
    }

    fn auto_run_fire(self: &Arc<Self>, text: String) {
        if !self.auto_run.load(Ordering::SeqCst) {
            return;
        }
        if self.last_auto_run.lock().as_deref() == Some(text.as_str()) {
            tracing::debug!("source unchanged since last auto-run, skipping");
            return;
        }

        match self.dispatch(&text, DispatchOptions::new(Trigger::AutoRun)) {
            Ok(_) => *self.last_auto_run.lock() = Some(text),
            Err(err) => tracing::debug!("auto-run skipped: {}", err),
        }
    }

    fn refresh_error_locations(&self, records: &[OutputRecord]) {
        let Some(version) = *self.dispatched_version.lock() else {
            return;
        };
        let locations = extract_error_locations(records);
        if !self.editor.set_error_locations_for(version, &locations) {
            tracing::debug!(version, "document changed since dispatch, not decorating");
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(id) = self.editor_subscription.get_mut().take() {
            self.editor.unsubscribe(id);
        }
        if let Some(id) = self.log_subscription.get_mut().take() {
            self.log.unsubscribe(id);
        }
    }
}

/// Abort handle of the in-flight run. The run task may finish before its
/// handle is recorded, so the id of the last finished run is kept too.
#[derive(Default)]
struct RunSlot {
    active: Option<(u64, AbortHandle)>,
    last_finished: u64,
}

/// Owned by the run task; resets the state when the task ends for any reason
struct RunGuard {
    inner: Arc<Inner>,
    id: u64,
    reply: Option<oneshot::Sender<Result<RunOutcome, RunError>>>,
    result: Option<Result<RunOutcome, RunError>>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.inner.finish_run(self.id);
        match &self.result {
            Some(Ok(_)) => tracing::info!(run = self.id, "run finished"),
            Some(Err(err)) => tracing::info!(run = self.id, "run failed: {}", err),
            None => tracing::info!(run = self.id, "run aborted"),
        }
        // A missing result drops the sender, which the handle reports as aborted
        if let (Some(reply), Some(result)) = (self.reply.take(), self.result.take()) {
            let _ = reply.send(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::testing::ScriptedBridge;
    use crate::bridge::FORCE_STOP_MESSAGE;
    use crate::store::MemoryCodeStore;
    use std::collections::BTreeMap;

    fn orchestrator(
        bridge: ScriptedBridge,
        settings: OrchestratorSettings,
    ) -> (RunOrchestrator, Arc<ScriptedBridge>, Arc<MemoryCodeStore>) {
        let bridge = Arc::new(bridge);
        let store = Arc::new(MemoryCodeStore::new());
        let orch = RunOrchestrator::new(bridge.clone(), store.clone(), settings);
        (orch, bridge, store)
    }

    fn texts(records: &[OutputRecord]) -> Vec<(&str, bool)> {
        records
            .iter()
            .map(|r| (r.text.as_str(), r.is_error))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_runs_and_returns_to_idle() {
        let (orch, bridge, store) = orchestrator(
            ScriptedBridge::new(vec![
                BridgeEvent::Log("3".to_string()),
                BridgeEvent::Error("[line 2] Error: Expect ';' after value.".to_string()),
                BridgeEvent::Done,
            ]),
            OrchestratorSettings::default(),
        );
        orch.log().log("stale output");

        let handle = orch.dispatch("print 1 + 2;", DispatchOptions::default()).unwrap();
        assert_eq!(orch.state(), RunState::Running);
        assert!(orch.log().is_empty());
        assert_eq!(store.get(), "print 1 + 2;");

        let outcome = handle.wait().await.unwrap();
        assert_eq!(orch.state(), RunState::Idle);
        assert_eq!(
            texts(&outcome.records),
            vec![
                ("3", false),
                ("[line 2] Error: Expected ';' after value.", true)
            ]
        );
        assert!(outcome.has_errors());
        assert_eq!(*bridge.runs.lock(), vec!["print 1 + 2;".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_rejects_empty_source_and_reentry() {
        let (orch, _bridge, _store) = orchestrator(
            ScriptedBridge::new(vec![]).hold_open().stop_ends_stream(),
            OrchestratorSettings::default(),
        );

        assert!(matches!(
            orch.dispatch("  \n", DispatchOptions::default()),
            Err(DispatchError::EmptySource)
        ));
        assert_eq!(orch.state(), RunState::Idle);

        let handle = orch.dispatch("while (true) {}", DispatchOptions::default()).unwrap();
        assert!(matches!(
            orch.dispatch("print 1;", DispatchOptions::default()),
            Err(DispatchError::AlreadyRunning)
        ));

        tokio::task::yield_now().await;
        assert!(orch.stop().await);
        handle.wait().await.unwrap();
        assert_eq!(orch.state(), RunState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_event_fails_the_run() {
        let (orch, _bridge, _store) = orchestrator(
            ScriptedBridge::new(vec![
                BridgeEvent::Log("before".to_string()),
                BridgeEvent::Fatal("wasm trap: unreachable".to_string()),
                BridgeEvent::Log("never shown".to_string()),
            ]),
            OrchestratorSettings::default(),
        );

        let err = orch
            .dispatch("print 1;", DispatchOptions::default())
            .unwrap()
            .wait()
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Fatal(ref m) if m == "wasm trap: unreachable"));
        assert_eq!(
            texts(&orch.log().records()),
            vec![("before", false), ("wasm trap: unreachable", true)]
        );
        assert_eq!(orch.state(), RunState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_ending_without_done_is_fatal() {
        let (orch, _bridge, _store) = orchestrator(
            ScriptedBridge::new(vec![BridgeEvent::Log("partial".to_string())]),
            OrchestratorSettings::default(),
        );

        let err = orch
            .dispatch("print 1;", DispatchOptions::default())
            .unwrap()
            .wait()
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Fatal(_)));
        assert!(orch.log().has_errors());
        assert_eq!(orch.state(), RunState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bridge_failure_returns_to_idle() {
        let (orch, _bridge, _store) = orchestrator(
            ScriptedBridge::new(vec![]).fail_init(),
            OrchestratorSettings::default(),
        );

        let err = orch
            .dispatch("print 1;", DispatchOptions::default())
            .unwrap()
            .wait()
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Bridge(BridgeError::Init(_))));
        assert_eq!(orch.state(), RunState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_state_listeners_see_both_transitions() {
        let (orch, _bridge, _store) = orchestrator(
            ScriptedBridge::new(vec![BridgeEvent::Done]),
            OrchestratorSettings::default(),
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            orch.subscribe(move |state| seen.lock().push(*state));
        }

        orch.dispatch("print 1;", DispatchOptions::default())
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert_eq!(*seen.lock(), vec![RunState::Running, RunState::Idle]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_locations_follow_the_dispatched_version() {
        let (orch, bridge, _store) = orchestrator(
            ScriptedBridge::new(vec![
                BridgeEvent::Error("[line 2] Error at 'x': Undefined variable.".to_string()),
                BridgeEvent::Input("name?".to_string()),
            ])
            .hold_open()
            .stop_ends_stream(),
            OrchestratorSettings::default(),
        );
        orch.editor().load("var a = 1;\nprint x;\nprint a;");

        let handle = orch
            .dispatch(&orch.editor().text(), DispatchOptions::default())
            .unwrap();
        tokio::task::yield_now().await;
        assert_eq!(orch.editor().error_lines(), vec![2]);
        assert_eq!(orch.pending_prompt().as_deref(), Some("name?"));

        // The user edits while the run is suspended on input
        orch.editor().edit("var a = 1;\nprint a;\nprint a;");
        assert!(orch.editor().error_lines().is_empty());

        orch.provide_input("lox").await.unwrap();
        tokio::task::yield_now().await;
        assert_eq!(*bridge.inputs.lock(), vec!["lox".to_string()]);
        assert_eq!(orch.pending_prompt(), None);
        assert!(orch.editor().error_lines().is_empty());

        orch.stop().await;
        handle.wait().await.unwrap();
        assert!(matches!(
            orch.provide_input("late").await,
            Err(BridgeError::NotAwaitingInput)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_idle_is_a_noop() {
        let (orch, bridge, _store) =
            orchestrator(ScriptedBridge::new(vec![]), OrchestratorSettings::default());

        assert!(!orch.stop().await);
        assert_eq!(bridge.stop_count(), 0);
        assert_eq!(orch.state(), RunState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_reports_force_stop() {
        let (orch, bridge, _store) = orchestrator(
            ScriptedBridge::new(vec![BridgeEvent::Log("looping".to_string())])
                .hold_open()
                .stop_ends_stream(),
            OrchestratorSettings::default(),
        );

        let handle = orch.dispatch("while (true) {}", DispatchOptions::default()).unwrap();
        tokio::task::yield_now().await;
        assert!(orch.stop().await);

        let outcome = handle.wait().await.unwrap();
        assert_eq!(
            texts(&outcome.records),
            vec![("looping", false), (FORCE_STOP_MESSAGE, false)]
        );
        assert_eq!(bridge.stop_count(), 1);
        assert_eq!(orch.state(), RunState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresponsive_bridge_is_aborted_after_grace() {
        let (orch, _bridge, _store) = orchestrator(
            ScriptedBridge::new(vec![]).hold_open(),
            OrchestratorSettings {
                stop_grace: Duration::from_millis(500),
                ..Default::default()
            },
        );

        let handle = orch.dispatch("while (true) {}", DispatchOptions::default()).unwrap();
        let started = tokio::time::Instant::now();
        assert!(orch.stop().await);

        assert!(started.elapsed() >= Duration::from_millis(500));
        assert_eq!(orch.state(), RunState::Idle);
        assert!(matches!(handle.wait().await, Err(RunError::Aborted)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_run_debounces_user_edits() {
        let (orch, bridge, _store) = orchestrator(
            ScriptedBridge::new(vec![BridgeEvent::Done]),
            OrchestratorSettings {
                auto_run: true,
                ..Default::default()
            },
        );

        orch.editor().edit("p");
        tokio::time::sleep(Duration::from_millis(300)).await;
        orch.editor().edit("pri");
        tokio::time::sleep(Duration::from_millis(300)).await;
        orch.editor().edit("print 1;");
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(*bridge.runs.lock(), vec!["print 1;".to_string()]);

        // Same text again does not re-run
        orch.editor().edit("print 1;");
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(bridge.runs.lock().len(), 1);
        assert_eq!(orch.state(), RunState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_run_skips_return_to_startup_text() {
        let (orch, bridge, _store) = orchestrator(
            ScriptedBridge::new(vec![BridgeEvent::Done]),
            OrchestratorSettings {
                auto_run: true,
                ..Default::default()
            },
        );
        let startup = orch.editor().text();

        orch.editor().edit("print 1;");
        tokio::time::sleep(Duration::from_millis(300)).await;
        orch.editor().edit(startup.clone());
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(bridge.runs.lock().is_empty());

        orch.editor().edit("print 2;");
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(*bridge.runs.lock(), vec!["print 2;".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_run_off_ignores_edits() {
        let (orch, bridge, _store) = orchestrator(
            ScriptedBridge::new(vec![BridgeEvent::Done]),
            OrchestratorSettings {
                auto_run: true,
                ..Default::default()
            },
        );

        orch.editor().edit("print 1;");
        orch.set_auto_run(false);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(bridge.runs.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sample_selection_runs_without_saving() {
        let (orch, bridge, store) = orchestrator(
            ScriptedBridge::new(vec![BridgeEvent::Done]),
            OrchestratorSettings {
                auto_run: true,
                ..Default::default()
            },
        );
        let orch = orch.with_samples(SampleLibrary::from_map(BTreeMap::from([(
            "fib.lox".to_string(),
            "print 55;".to_string(),
        )])));
        store.set("print \"mine\";").unwrap();

        orch.select_sample("fib").unwrap().wait().await.unwrap();
        assert_eq!(orch.editor().text(), "print 55;");
        assert_eq!(store.get(), "print \"mine\";");

        orch.select_sample("choose").unwrap().wait().await.unwrap();
        assert_eq!(orch.editor().text(), "print \"mine\";");

        orch.select_sample("default").unwrap().wait().await.unwrap();
        assert_eq!(orch.editor().text(), DEFAULT_CODE);

        assert!(matches!(
            orch.select_sample("missing"),
            Err(DispatchError::Sample(SampleError::Unknown(_)))
        ));

        // Programmatic loads never schedule an auto-run
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(bridge.runs.lock().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_button_is_throttled() {
        let (orch, bridge, _store) = orchestrator(
            ScriptedBridge::new(vec![BridgeEvent::Done]),
            OrchestratorSettings::default(),
        );
        orch.editor().load("print 1;");

        orch.run_clicked().unwrap().unwrap().wait().await.unwrap();
        assert!(orch.run_clicked().is_none());

        tokio::time::advance(Duration::from_millis(1000)).await;
        orch.run_clicked().unwrap().unwrap().wait().await.unwrap();
        assert_eq!(bridge.runs.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_shortcut_and_persist_on_edit() {
        let (orch, _bridge, store) = orchestrator(
            ScriptedBridge::new(vec![BridgeEvent::Done]),
            OrchestratorSettings {
                persist_on_edit: true,
                ..Default::default()
            },
        );

        orch.editor().edit("print 2;");
        assert_eq!(store.get(), "print 2;");

        orch.editor().load("print 3;");
        assert_eq!(store.get(), "print 2;");
        orch.save_shortcut().unwrap().wait().await.unwrap();
        assert_eq!(store.get(), "print 3;");
    }
}
