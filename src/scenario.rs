//! Scripted sessions: in-memory host collaborators and the JSON scenario format
//! the `app-lifecycle` driver replays.

use crate::lifecycle::{LifecycleHooks, LocalStateReader, TransitionRequest};
use crate::model::{InfoEvent, PostCloseAction, ProgressEvent, SessionEvent, Transition};
use crate::orchestrator::host::{
    Dialogs, EventSink, Host, InlineRunner, ProjectRegistry, SaveChoice, SavePrompt, ShellHooks,
    UiThread,
};
use crate::progress::{JobSignal, PROGRESS_CHANNEL};
use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Scenario {
    #[serde(default)]
    pub projects: Vec<ProjectSpec>,
    #[serde(default)]
    pub answers: DialogAnswers,
    #[serde(default)]
    pub hooks: HookScript,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("invalid scenario")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("in {}", path.display()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProjectSpec {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub dirty: bool,
    #[serde(default)]
    pub executing: bool,
    #[serde(default)]
    pub fail_save: bool,
    #[serde(default)]
    pub fail_close: bool,
}

impl ProjectSpec {
    fn with(id: &str, dirty: bool) -> Self {
        Self {
            id: id.to_string(),
            name: None,
            dirty,
            executing: false,
            fail_save: false,
            fail_close: false,
        }
    }

    pub fn dirty(id: &str) -> Self {
        Self::with(id, true)
    }

    pub fn clean(id: &str) -> Self {
        Self::with(id, false)
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn executing(mut self) -> Self {
        self.executing = true;
        self
    }

    pub fn failing_save(mut self) -> Self {
        self.fail_save = true;
        self
    }

    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }
}

/// Canned answers for the save prompt and the executing-projects confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DialogAnswers {
    #[serde(default = "default_save")]
    pub save: SaveChoice,
    #[serde(default = "default_true")]
    pub close_executing: bool,
}

fn default_save() -> SaveChoice {
    SaveChoice::Yes
}

fn default_true() -> bool {
    true
}

impl Default for DialogAnswers {
    fn default() -> Self {
        Self {
            save: default_save(),
            close_executing: true,
        }
    }
}

/// Lifecycle hook behaviour of a scripted session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HookScript {
    /// Transitions whose hook fails.
    #[serde(default)]
    pub fail: Vec<Transition>,
    /// Local-state keys read when UI state is flushed.
    #[serde(default)]
    pub flush_keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Step {
    Lifecycle(TransitionRequest),
    #[serde(rename_all = "camelCase")]
    SaveAndClose {
        project_ids: Vec<String>,
        action: PostCloseAction,
    },
    /// Raw headless call in its flat wire form.
    Headless(Vec<serde_json::Value>),
    Job {
        task: String,
        signals: Vec<JobSignal>,
    },
}

/// Project registry backed by a vector, preserving insertion order.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    projects: Mutex<Vec<ProjectSpec>>,
    saved: Mutex<Vec<(String, String)>>,
    activated: Mutex<Vec<String>>,
    events: Option<UnboundedSender<SessionEvent>>,
}

impl InMemoryRegistry {
    pub fn from_specs(specs: &[ProjectSpec]) -> Self {
        Self {
            projects: Mutex::new(specs.to_vec()),
            ..Self::default()
        }
    }

    pub fn with_events(mut self, tx: UnboundedSender<SessionEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// `(id, snapshot)` pairs in save order.
    pub fn saved(&self) -> Vec<(String, String)> {
        self.saved.lock().clone()
    }

    pub fn activated(&self) -> Vec<String> {
        self.activated.lock().clone()
    }

    fn lookup<T>(&self, id: &str, f: impl FnOnce(&ProjectSpec) -> T) -> Option<T> {
        self.projects.lock().iter().find(|p| p.id == id).map(f)
    }
}

impl ProjectRegistry for InMemoryRegistry {
    fn list_ids(&self) -> Vec<String> {
        self.projects.lock().iter().map(|p| p.id.clone()).collect()
    }

    fn name(&self, id: &str) -> Option<String> {
        self.lookup(id, |p| p.name.clone().unwrap_or_else(|| p.id.clone()))
    }

    fn is_dirty(&self, id: &str) -> bool {
        self.lookup(id, |p| p.dirty).unwrap_or(false)
    }

    fn is_executing(&self, id: &str) -> bool {
        self.lookup(id, |p| p.executing).unwrap_or(false)
    }

    fn save(&self, id: &str, snapshot: &str) -> Result<()> {
        let mut projects = self.projects.lock();
        let Some(project) = projects.iter_mut().find(|p| p.id == id) else {
            bail!("no project with id {id}");
        };
        if project.fail_save {
            bail!("disk full while writing {id}");
        }
        project.dirty = false;
        self.saved.lock().push((id.to_string(), snapshot.to_string()));
        Ok(())
    }

    fn cancel_and_remove(&self, id: &str) -> Result<()> {
        let mut projects = self.projects.lock();
        let Some(pos) = projects.iter().position(|p| p.id == id) else {
            bail!("no project with id {id}");
        };
        if projects[pos].fail_close {
            bail!("project {id} refused to close");
        }
        projects.remove(pos);
        Ok(())
    }

    fn activate(&self, id: &str) -> Result<()> {
        if self.lookup(id, |_| ()).is_none() {
            bail!("no project with id {id}");
        }
        self.activated.lock().push(id.to_string());
        if let Some(tx) = &self.events {
            let _ = tx.send(SessionEvent::Info {
                info: InfoEvent::ProjectActivated { id: id.to_string() },
            });
        }
        Ok(())
    }
}

/// Answers every dialog from a [`DialogAnswers`] script and records what was asked.
#[derive(Debug, Default)]
pub struct ScriptedDialogs {
    answers: DialogAnswers,
    prompts: Mutex<Vec<String>>,
    confirmations: Mutex<Vec<String>>,
    warnings: Mutex<Vec<(String, String)>>,
    events: Option<UnboundedSender<SessionEvent>>,
}

impl ScriptedDialogs {
    pub fn new(answers: DialogAnswers) -> Self {
        Self {
            answers,
            ..Self::default()
        }
    }

    pub fn with_events(mut self, tx: UnboundedSender<SessionEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    pub fn confirmations(&self) -> Vec<String> {
        self.confirmations.lock().clone()
    }

    /// `(title, message)` pairs.
    pub fn warnings(&self) -> Vec<(String, String)> {
        self.warnings.lock().clone()
    }
}

impl Dialogs for ScriptedDialogs {
    fn ask_save(&self, prompt: &SavePrompt) -> SaveChoice {
        self.prompts.lock().push(prompt.message());
        tracing::debug!(answer = ?self.answers.save, "{}", prompt.title());
        self.answers.save
    }

    fn confirm(&self, title: &str, message: &str) -> bool {
        self.confirmations.lock().push(message.to_string());
        tracing::debug!(answer = self.answers.close_executing, "{title}");
        self.answers.close_executing
    }

    fn warn(&self, title: &str, message: &str) {
        tracing::warn!("{title}: {message}");
        self.warnings
            .lock()
            .push((title.to_string(), message.to_string()));
        if let Some(tx) = &self.events {
            let _ = tx.send(SessionEvent::Info {
                info: InfoEvent::Warning {
                    title: title.to_string(),
                    message: message.to_string(),
                },
            });
        }
    }
}

/// Counts post-close actions instead of touching a real shell.
#[derive(Debug, Default)]
pub struct RecordingShell {
    closes: AtomicUsize,
    app_state_changes: AtomicUsize,
    perspective_switches: AtomicUsize,
    events: Option<UnboundedSender<SessionEvent>>,
}

impl RecordingShell {
    pub fn with_events(tx: UnboundedSender<SessionEvent>) -> Self {
        Self {
            events: Some(tx),
            ..Self::default()
        }
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn app_state_changes(&self) -> usize {
        self.app_state_changes.load(Ordering::SeqCst)
    }

    pub fn perspective_switches(&self) -> usize {
        self.perspective_switches.load(Ordering::SeqCst)
    }

    fn record(&self, counter: &AtomicUsize, action: PostCloseAction) -> Result<()> {
        counter.fetch_add(1, Ordering::SeqCst);
        if let Some(tx) = &self.events {
            let _ = tx.send(SessionEvent::Info {
                info: InfoEvent::PostCloseAction { action },
            });
        }
        Ok(())
    }
}

impl ShellHooks for RecordingShell {
    fn switch_perspective(&self) -> Result<()> {
        self.record(&self.perspective_switches, PostCloseAction::SwitchPerspective)
    }

    fn close(&self) -> Result<()> {
        self.record(&self.closes, PostCloseAction::Shutdown)
    }

    fn app_state_changed(&self) -> Result<()> {
        self.record(&self.app_state_changes, PostCloseAction::UpdateAppState)
    }
}

/// Keeps every emitted `(channel, payload)` pair.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(String, serde_json::Value)>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<(String, serde_json::Value)> {
        self.events.lock().clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, channel: &str, payload: serde_json::Value) {
        self.events.lock().push((channel.to_string(), payload));
    }
}

/// Forwards outward events into the session event stream.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: UnboundedSender<SessionEvent>,
}

impl ChannelSink {
    pub fn new(tx: UnboundedSender<SessionEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, channel: &str, payload: serde_json::Value) {
        let event = if channel == PROGRESS_CHANNEL {
            match serde_json::from_value::<ProgressEvent>(payload.clone()) {
                Ok(event) => SessionEvent::Progress { event },
                Err(_) => SessionEvent::Outward {
                    channel: channel.to_string(),
                    payload,
                },
            }
        } else {
            SessionEvent::Outward {
                channel: channel.to_string(),
                payload,
            }
        };
        let _ = self.tx.send(event);
    }
}

/// Lifecycle hooks driven by a [`HookScript`].
#[derive(Debug, Default)]
pub struct ScenarioHooks {
    script: HookScript,
    flushed: Mutex<Vec<(String, String)>>,
}

impl ScenarioHooks {
    pub fn new(script: HookScript) -> Self {
        Self {
            script,
            flushed: Mutex::new(Vec::new()),
        }
    }

    /// Local-state entries seen by the last flushes.
    pub fn flushed(&self) -> Vec<(String, String)> {
        self.flushed.lock().clone()
    }

    fn run(&self, transition: Transition) -> Result<()> {
        if self.script.fail.contains(&transition) {
            bail!("scripted {transition} failure");
        }
        tracing::debug!(%transition, "hook ran");
        Ok(())
    }
}

impl LifecycleHooks for ScenarioHooks {
    fn create(&self) -> Result<()> {
        self.run(Transition::Create)
    }

    fn init(&self, check_for_updates: bool) -> Result<()> {
        tracing::debug!(check_for_updates, "binding session services");
        self.run(Transition::Init)
    }

    fn web_app_loaded(&self) -> Result<()> {
        self.run(Transition::WebAppLoaded)
    }

    fn flush_ui_state(&self, read: &LocalStateReader<'_>) -> Result<()> {
        let mut flushed = self.flushed.lock();
        for key in &self.script.flush_keys {
            if let Some(value) = read(key) {
                flushed.push((key.clone(), value));
            }
        }
        self.run(Transition::SaveState)
    }

    fn suspend(&self) -> Result<()> {
        self.run(Transition::Suspend)
    }

    fn shutdown(&self) -> Result<()> {
        self.run(Transition::Shutdown)
    }
}

/// Wire the in-memory collaborators of a scenario into a [`Host`].
pub fn scenario_host(
    scenario: &Scenario,
    dialogs: Arc<dyn Dialogs>,
    ui: Arc<dyn UiThread>,
    events: UnboundedSender<SessionEvent>,
) -> (Host, Arc<InMemoryRegistry>) {
    let registry =
        Arc::new(InMemoryRegistry::from_specs(&scenario.projects).with_events(events.clone()));
    let host = Host {
        registry: registry.clone(),
        dialogs,
        runner: Arc::new(InlineRunner),
        shell: Arc::new(RecordingShell::with_events(events.clone())),
        ui,
        sink: Arc::new(ChannelSink::new(events)),
    };
    (host, registry)
}
