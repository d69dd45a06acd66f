use super::table;
use crate::error::LifecycleError;
use crate::model::{LifecycleSnapshot, Phase, PostCloseAction, Transition, TransitionRecord};
use crate::orchestrator::{SaveCloseOrchestrator, SaveCloseOutcome};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reads UI-local state (e.g. pending local-storage edits) by key.
pub type LocalStateReader<'a> = dyn Fn(&str) -> Option<String> + 'a;

/// Side effects the host shell attaches to transitions.
///
/// Every hook defaults to a no-op. A failing hook aborts its transition
/// without advancing the phase, except under `forceShutdown`, where failures
/// are logged and ignored step by step.
pub trait LifecycleHooks: Send + Sync {
    /// Register resource handlers and the session with the hosting shell.
    fn create(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Bind session-scoped services.
    fn init(&self, _check_for_updates: bool) -> anyhow::Result<()> {
        Ok(())
    }

    fn web_app_loaded(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Flush UI-local state before projects are saved.
    fn flush_ui_state(&self, _read: &LocalStateReader<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Release the service bindings created by `init`.
    fn suspend(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn shutdown(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl LifecycleHooks for NoopHooks {}

/// A transition with its parameters, as sent by shells and automation drivers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transition", rename_all = "camelCase")]
pub enum TransitionRequest {
    Startup,
    Create,
    #[serde(rename_all = "camelCase")]
    Init {
        #[serde(default)]
        check_for_updates: Option<bool>,
    },
    WebAppLoaded,
    #[serde(rename_all = "camelCase")]
    SaveState {
        #[serde(default)]
        local_storage: Option<BTreeMap<String, String>>,
    },
    #[serde(rename_all = "camelCase")]
    Reload {
        #[serde(default)]
        local_storage: Option<BTreeMap<String, String>>,
    },
    Suspend,
    Shutdown,
    ForceShutdown,
}

impl TransitionRequest {
    pub fn transition(&self) -> Transition {
        match self {
            TransitionRequest::Startup => Transition::Startup,
            TransitionRequest::Create => Transition::Create,
            TransitionRequest::Init { .. } => Transition::Init,
            TransitionRequest::WebAppLoaded => Transition::WebAppLoaded,
            TransitionRequest::SaveState { .. } => Transition::SaveState,
            TransitionRequest::Reload { .. } => Transition::Reload,
            TransitionRequest::Suspend => Transition::Suspend,
            TransitionRequest::Shutdown => Transition::Shutdown,
            TransitionRequest::ForceShutdown => Transition::ForceShutdown,
        }
    }
}

/// Lifecycle context owned by the host shell.
///
/// All methods take `&mut self`; a multi-threaded host must serialize access,
/// e.g. through [`crate::orchestrator::spawn_controller`].
pub struct LifecycleStateMachine {
    phase: Option<Phase>,
    last: Option<Transition>,
    initialized: bool,
    history: Vec<TransitionRecord>,
    hooks: Arc<dyn LifecycleHooks>,
    orchestrator: SaveCloseOrchestrator,
}

impl LifecycleStateMachine {
    pub fn new(hooks: Arc<dyn LifecycleHooks>, orchestrator: SaveCloseOrchestrator) -> Self {
        Self {
            phase: None,
            last: None,
            initialized: false,
            history: Vec::new(),
            hooks,
            orchestrator,
        }
    }

    pub fn phase(&self) -> Option<Phase> {
        self.phase
    }

    pub fn last_transition(&self) -> Option<Transition> {
        self.last
    }

    /// True between a successful `init` and the next `suspend`/shutdown.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn history(&self) -> &[TransitionRecord] {
        &self.history
    }

    pub fn orchestrator(&self) -> &SaveCloseOrchestrator {
        &self.orchestrator
    }

    pub fn snapshot(&self) -> LifecycleSnapshot {
        LifecycleSnapshot {
            phase: self.phase,
            last_transition: self.last,
            initialized: self.initialized,
            history: self.history.clone(),
        }
    }

    pub fn is_last_state_transition(&self, transition: Transition) -> bool {
        self.last == Some(transition)
    }

    /// Whether invoking `transition` right now would succeed.
    pub fn is_next_state_transition(&self, transition: Transition) -> bool {
        self.is_repeated_init(transition) || table::is_legal(transition, self.phase)
    }

    /// Whether the current phase is strictly earlier than the phase `transition` produces.
    pub fn is_before_state_transition(&self, transition: Transition) -> bool {
        match self.phase {
            None => true,
            Some(phase) => phase < transition.target(),
        }
    }

    pub fn startup(&mut self) -> Result<(), LifecycleError> {
        self.guard(Transition::Startup)?;
        self.advance(Transition::Startup);
        Ok(())
    }

    pub fn create(&mut self) -> Result<(), LifecycleError> {
        self.guard(Transition::Create)?;
        self.run_hook(Transition::Create, |h| h.create())?;
        self.advance(Transition::Create);
        Ok(())
    }

    /// Repeated calls while already in `INIT` are ignored.
    pub fn init(&mut self, check_for_updates: bool) -> Result<(), LifecycleError> {
        if self.is_repeated_init(Transition::Init) {
            debug!("session already initialized; ignoring init");
            return Ok(());
        }
        self.guard(Transition::Init)?;
        self.run_hook(Transition::Init, |h| h.init(check_for_updates))?;
        self.initialized = true;
        self.advance(Transition::Init);
        Ok(())
    }

    pub fn web_app_loaded(&mut self) -> Result<(), LifecycleError> {
        self.guard(Transition::WebAppLoaded)?;
        self.run_hook(Transition::WebAppLoaded, |h| h.web_app_loaded())?;
        self.advance(Transition::WebAppLoaded);
        Ok(())
    }

    /// Flush UI-local state, then save-and-close every dirty project.
    ///
    /// A save the user cancels leaves the phase where it was.
    pub fn save_state(
        &mut self,
        local_state: Option<&LocalStateReader<'_>>,
    ) -> Result<SaveCloseOutcome, LifecycleError> {
        self.save_state_as(Transition::SaveState, local_state)
    }

    /// Same as [`Self::save_state`], triggered by a reload of the embedded content.
    pub fn reload(
        &mut self,
        local_state: Option<&LocalStateReader<'_>>,
    ) -> Result<SaveCloseOutcome, LifecycleError> {
        self.save_state_as(Transition::Reload, local_state)
    }

    pub fn suspend(&mut self) -> Result<(), LifecycleError> {
        self.guard(Transition::Suspend)?;
        self.run_hook(Transition::Suspend, |h| h.suspend())?;
        self.initialized = false;
        self.advance(Transition::Suspend);
        Ok(())
    }

    pub fn shutdown(&mut self) -> Result<(), LifecycleError> {
        self.guard(Transition::Shutdown)?;
        self.run_hook(Transition::Shutdown, |h| h.shutdown())?;
        self.initialized = false;
        self.advance(Transition::Shutdown);
        Ok(())
    }

    /// Land on `SHUTDOWN` from anywhere. Never fails.
    pub fn force_shutdown(&mut self) {
        let hooks = Arc::clone(&self.hooks);
        if self.initialized {
            best_effort("suspend", || hooks.suspend());
            self.initialized = false;
        }
        if self.phase != Some(Phase::Shutdown) {
            best_effort("shutdown", || hooks.shutdown());
        }
        self.advance(Transition::ForceShutdown);
    }

    /// Dispatch a request to the matching transition method.
    pub fn apply(
        &mut self,
        request: &TransitionRequest,
    ) -> Result<Option<SaveCloseOutcome>, LifecycleError> {
        match request {
            TransitionRequest::Startup => self.startup().map(|_| None),
            TransitionRequest::Create => self.create().map(|_| None),
            TransitionRequest::Init { check_for_updates } => {
                self.init(check_for_updates.unwrap_or(true)).map(|_| None)
            }
            TransitionRequest::WebAppLoaded => self.web_app_loaded().map(|_| None),
            TransitionRequest::SaveState { local_storage } => {
                let reader = local_storage.as_ref().map(map_reader);
                self.save_state(reader.as_deref()).map(Some)
            }
            TransitionRequest::Reload { local_storage } => {
                let reader = local_storage.as_ref().map(map_reader);
                self.reload(reader.as_deref()).map(Some)
            }
            TransitionRequest::Suspend => self.suspend().map(|_| None),
            TransitionRequest::Shutdown => self.shutdown().map(|_| None),
            TransitionRequest::ForceShutdown => {
                self.force_shutdown();
                Ok(None)
            }
        }
    }

    /// Return to the pristine pre-`startup` condition, bypassing all guards.
    pub fn reset_lifecycle_state(&mut self) {
        debug!("resetting lifecycle state");
        self.phase = None;
        self.last = None;
        self.initialized = false;
        self.history.clear();
    }

    /// Force the last transition (and its target phase) without guards or side effects.
    pub fn set_state_transition(&mut self, transition: Transition) {
        debug!(%transition, "forcing lifecycle state");
        let target = transition.target();
        self.phase = Some(target);
        self.last = Some(transition);
        self.initialized = matches!(
            target,
            Phase::Init | Phase::WebAppLoaded | Phase::SaveState
        );
    }

    fn is_repeated_init(&self, transition: Transition) -> bool {
        transition == Transition::Init && self.phase == Some(Phase::Init)
    }

    fn guard(&self, transition: Transition) -> Result<(), LifecycleError> {
        if table::is_legal(transition, self.phase) {
            return Ok(());
        }
        let err = LifecycleError::Violation {
            transition,
            current: self.phase,
        };
        warn!(%transition, "{err}");
        Err(err)
    }

    fn run_hook(
        &self,
        transition: Transition,
        hook: impl FnOnce(&dyn LifecycleHooks) -> anyhow::Result<()>,
    ) -> Result<(), LifecycleError> {
        hook(self.hooks.as_ref()).map_err(|source| {
            warn!(%transition, "lifecycle hook failed: {source:#}");
            LifecycleError::Hook { transition, source }
        })
    }

    fn save_state_as(
        &mut self,
        transition: Transition,
        local_state: Option<&LocalStateReader<'_>>,
    ) -> Result<SaveCloseOutcome, LifecycleError> {
        self.guard(transition)?;
        if let Some(read) = local_state {
            self.run_hook(transition, |h| h.flush_ui_state(read))?;
        }
        let dirty = self.orchestrator.dirty_project_ids();
        let outcome = self
            .orchestrator
            .request_interactive_save_and_close(&dirty, PostCloseAction::UpdateAppState);
        if outcome == SaveCloseOutcome::Cancelled {
            info!(%transition, "save cancelled; staying in {}", phase_name(self.phase));
            return Ok(outcome);
        }
        self.advance(transition);
        Ok(outcome)
    }

    fn advance(&mut self, transition: Transition) {
        let from = self.phase;
        let to = transition.target();
        self.phase = Some(to);
        self.last = Some(transition);
        info!(%transition, from = phase_name(from), %to, "lifecycle transition");
        self.history.push(TransitionRecord {
            transition,
            from,
            to,
            at: time::OffsetDateTime::now_utc()
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_else(|_| "now".into()),
        });
    }
}

fn phase_name(phase: Option<Phase>) -> &'static str {
    phase.map(Phase::as_str).unwrap_or("<none>")
}

fn map_reader(map: &BTreeMap<String, String>) -> Box<LocalStateReader<'_>> {
    Box::new(move |key: &str| map.get(key).cloned())
}

/// Run one cleanup step, logging and swallowing errors and panics.
fn best_effort(step: &str, f: impl FnOnce() -> anyhow::Result<()>) {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(step, "ignoring cleanup failure during force shutdown: {e:#}"),
        Err(_) => warn!(step, "ignoring panic during force shutdown"),
    }
}
