//! Narrow interfaces the core consumes from its embedding host.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Named, stateful units (open workflows) tracked by the host.
pub trait ProjectRegistry: Send + Sync {
    fn list_ids(&self) -> Vec<String>;
    /// Display name of a loaded project, `None` if the id is unknown.
    fn name(&self, id: &str) -> Option<String>;
    fn is_dirty(&self, id: &str) -> bool;
    fn is_executing(&self, id: &str) -> bool;
    /// Persist the project together with its rendered snapshot.
    fn save(&self, id: &str, snapshot: &str) -> anyhow::Result<()>;
    /// Cancel any in-flight execution, then drop the project.
    fn cancel_and_remove(&self, id: &str) -> anyhow::Result<()>;
    fn activate(&self, id: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveChoice {
    Yes,
    No,
    Cancel,
}

/// The single save question shown before closing dirty projects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SavePrompt {
    Single { name: String },
    Many { names: Vec<String> },
}

impl SavePrompt {
    pub fn for_names(mut names: Vec<String>) -> Self {
        if names.len() == 1 {
            SavePrompt::Single {
                name: names.remove(0),
            }
        } else {
            SavePrompt::Many { names }
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            SavePrompt::Single { .. } => "Save Resource",
            SavePrompt::Many { .. } => "Save Resources",
        }
    }

    pub fn message(&self) -> String {
        match self {
            SavePrompt::Single { name } => format!("Save '{name}'?"),
            SavePrompt::Many { names } => {
                let mut msg = String::from("Save changes to the following workflows?");
                for name in names {
                    msg.push_str("\n  - ");
                    msg.push_str(name);
                }
                msg
            }
        }
    }
}

/// User-facing dialogs. Implementations marshal onto the UI thread themselves.
pub trait Dialogs: Send + Sync {
    fn ask_save(&self, prompt: &SavePrompt) -> SaveChoice;
    fn confirm(&self, title: &str, message: &str) -> bool;
    fn warn(&self, title: &str, message: &str);
}

pub trait ProgressMonitor {
    fn begin(&self, name: &str, total_work: usize);
    fn sub_task(&self, text: &str);
    fn worked(&self, amount: usize);
    /// Set when the user pressed Cancel on the progress dialog.
    fn is_cancelled(&self) -> bool;
}

/// Blocking "run with progress" executor.
pub trait ProgressRunner: Send + Sync {
    fn run_with_progress(&self, title: &str, work: &mut dyn FnMut(&dyn ProgressMonitor));
}

/// Runs work directly on the calling thread and reports progress to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineRunner;

struct LogMonitor;

impl ProgressMonitor for LogMonitor {
    fn begin(&self, name: &str, total_work: usize) {
        tracing::debug!(total_work, "{name}");
    }

    fn sub_task(&self, text: &str) {
        tracing::debug!("{text}");
    }

    fn worked(&self, _amount: usize) {}

    fn is_cancelled(&self) -> bool {
        false
    }
}

impl ProgressRunner for InlineRunner {
    fn run_with_progress(&self, title: &str, work: &mut dyn FnMut(&dyn ProgressMonitor)) {
        let _span = tracing::info_span!("progress", title).entered();
        work(&LogMonitor);
    }
}

/// Targets of a [`crate::model::PostCloseAction`].
pub trait ShellHooks: Send + Sync {
    fn switch_perspective(&self) -> anyhow::Result<()>;
    /// Close the host shell, which exits the application.
    fn close(&self) -> anyhow::Result<()>;
    /// Recompute and broadcast the application snapshot.
    fn app_state_changed(&self) -> anyhow::Result<()>;
}

/// Hook for work that must run on the host's UI thread.
pub trait UiThread: Send + Sync {
    fn run_on_ui(&self, task: Box<dyn FnOnce() + Send + 'static>);
}

/// Runs UI work inline. For hosts without a dedicated UI thread, and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct CurrentThread;

impl UiThread for CurrentThread {
    fn run_on_ui(&self, task: Box<dyn FnOnce() + Send + 'static>) {
        task();
    }
}

/// Named-channel event transport to the remote UI.
pub trait EventSink: Send + Sync {
    fn emit(&self, channel: &str, payload: serde_json::Value);
}

/// Serialize `payload` and emit it, logging instead of failing.
pub fn emit_or_log<T: Serialize>(sink: &dyn EventSink, channel: &str, payload: &T) {
    match serde_json::to_value(payload) {
        Ok(value) => {
            tracing::debug!(channel, "emitting event");
            sink.emit(channel, value);
        }
        Err(e) => tracing::warn!(channel, "failed to serialize event: {e}"),
    }
}

/// Collaborators the orchestrator works against.
#[derive(Clone)]
pub struct Host {
    pub registry: Arc<dyn ProjectRegistry>,
    pub dialogs: Arc<dyn Dialogs>,
    pub runner: Arc<dyn ProgressRunner>,
    pub shell: Arc<dyn ShellHooks>,
    pub ui: Arc<dyn UiThread>,
    pub sink: Arc<dyn EventSink>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_dirty_project_gets_named_prompt() {
        let prompt = SavePrompt::for_names(vec!["Flow A".into()]);
        assert_eq!(prompt.message(), "Save 'Flow A'?");
        assert_eq!(prompt.title(), "Save Resource");
    }

    #[test]
    fn several_dirty_projects_get_list_prompt() {
        let prompt = SavePrompt::for_names(vec!["Flow A".into(), "Flow B".into()]);
        let msg = prompt.message();
        assert!(msg.starts_with("Save changes to the following workflows?"));
        assert!(msg.contains("\n  - Flow A"));
        assert!(msg.contains("\n  - Flow B"));
    }

    #[test]
    fn current_thread_runs_task_immediately() {
        let hit = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&hit);
        CurrentThread.run_on_ui(Box::new(move || {
            flag.store(true, std::sync::atomic::Ordering::SeqCst)
        }));
        assert!(hit.load(std::sync::atomic::Ordering::SeqCst));
    }
}
