use serde::{Deserialize, Serialize};
use std::fmt;

/// Named position in the session lifecycle. The declaration order is the
/// total order `Startup < Create < ... < Shutdown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Startup,
    Create,
    Init,
    WebAppLoaded,
    SaveState,
    Suspend,
    Shutdown,
}

impl Phase {
    pub const ALL: [Phase; 7] = [
        Phase::Startup,
        Phase::Create,
        Phase::Init,
        Phase::WebAppLoaded,
        Phase::SaveState,
        Phase::Suspend,
        Phase::Shutdown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Startup => "STARTUP",
            Phase::Create => "CREATE",
            Phase::Init => "INIT",
            Phase::WebAppLoaded => "WEB_APP_LOADED",
            Phase::SaveState => "SAVE_STATE",
            Phase::Suspend => "SUSPEND",
            Phase::Shutdown => "SHUTDOWN",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named, guarded operation that may advance the current [`Phase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Transition {
    Startup,
    Create,
    Init,
    WebAppLoaded,
    SaveState,
    Suspend,
    Shutdown,
    Reload,
    ForceShutdown,
}

impl Transition {
    pub const ALL: [Transition; 9] = [
        Transition::Startup,
        Transition::Create,
        Transition::Init,
        Transition::WebAppLoaded,
        Transition::SaveState,
        Transition::Suspend,
        Transition::Shutdown,
        Transition::Reload,
        Transition::ForceShutdown,
    ];

    /// Phase the machine lands on after this transition succeeds.
    pub fn target(self) -> Phase {
        match self {
            Transition::Startup => Phase::Startup,
            Transition::Create => Phase::Create,
            Transition::Init => Phase::Init,
            Transition::WebAppLoaded => Phase::WebAppLoaded,
            Transition::SaveState | Transition::Reload => Phase::SaveState,
            Transition::Suspend => Phase::Suspend,
            Transition::Shutdown | Transition::ForceShutdown => Phase::Shutdown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Transition::Startup => "startup",
            Transition::Create => "create",
            Transition::Init => "init",
            Transition::WebAppLoaded => "webAppLoaded",
            Transition::SaveState => "saveState",
            Transition::Suspend => "suspend",
            Transition::Shutdown => "shutdown",
            Transition::Reload => "reload",
            Transition::ForceShutdown => "forceShutdown",
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do once a batch of projects was saved and closed without failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PostCloseAction {
    SwitchPerspective,
    Shutdown,
    UpdateAppState,
}

impl PostCloseAction {
    pub fn as_str(self) -> &'static str {
        match self {
            PostCloseAction::SwitchPerspective => "SWITCH_PERSPECTIVE",
            PostCloseAction::Shutdown => "SHUTDOWN",
            PostCloseAction::UpdateAppState => "UPDATE_APP_STATE",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "SWITCH_PERSPECTIVE" => Some(PostCloseAction::SwitchPerspective),
            "SHUTDOWN" => Some(PostCloseAction::Shutdown),
            "UPDATE_APP_STATE" => Some(PostCloseAction::UpdateAppState),
            _ => None,
        }
    }
}

impl fmt::Display for PostCloseAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input of the headless save-and-close entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveCloseRequest {
    pub project_ids: Vec<String>,
    // One rendered snapshot per id, index-aligned with `project_ids`.
    pub snapshots: Vec<String>,
    pub action: PostCloseAction,
}

impl SaveCloseRequest {
    pub fn new(
        project_ids: Vec<String>,
        snapshots: Vec<String>,
        action: PostCloseAction,
    ) -> Result<Self, crate::error::RequestError> {
        if project_ids.len() != snapshots.len() {
            return Err(crate::error::RequestError::Misaligned {
                ids: project_ids.len(),
                snapshots: snapshots.len(),
            });
        }
        Ok(Self {
            project_ids,
            snapshots,
            action,
        })
    }

    pub fn len(&self) -> usize {
        self.project_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.project_ids.is_empty()
    }

    /// Iterate `(id, snapshot)` pairs in request order.
    pub fn items(&self) -> impl Iterator<Item = (&str, &str)> {
        self.project_ids
            .iter()
            .map(String::as_str)
            .zip(self.snapshots.iter().map(String::as_str))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgressStatus {
    Started,
    Fetching,
    Installing,
    Finished,
}

/// Normalized progress observation sent to the remote UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub task: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtask: Option<String>,
    pub status: ProgressStatus,
    pub progress: u8,
}

/// Payload of the outward "render snapshots, then call back" request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveClosePending {
    pub project_ids: Vec<String>,
    pub params: Vec<String>,
}

impl SaveClosePending {
    pub fn new(project_ids: Vec<String>, action: PostCloseAction) -> Self {
        Self {
            project_ids,
            params: vec![action.as_str().to_string()],
        }
    }
}

/// A successful transition as kept in the lifecycle history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub transition: Transition,
    pub from: Option<Phase>,
    pub to: Phase,
    pub at: String,
}

/// Serializable view of the lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleSnapshot {
    pub phase: Option<Phase>,
    pub last_transition: Option<Transition>,
    pub initialized: bool,
    pub history: Vec<TransitionRecord>,
}

/// Events emitted by the controller and consumed by CLI/UI layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    PhaseChanged {
        transition: Transition,
        from: Option<Phase>,
        to: Phase,
    },
    TransitionRejected {
        transition: Transition,
        message: String,
    },
    SaveClose {
        outcome: crate::orchestrator::SaveCloseOutcome,
    },
    SaveCloseReport {
        report: crate::orchestrator::HeadlessReport,
    },
    Progress {
        event: ProgressEvent,
    },
    Outward {
        channel: String,
        payload: serde_json::Value,
    },
    Info {
        info: InfoEvent,
    },
}

/// Structured info events consumed by UI/CLI layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InfoEvent {
    Message(String),
    Warning { title: String, message: String },
    ProjectActivated { id: String },
    PostCloseAction { action: PostCloseAction },
}

impl InfoEvent {
    /// Render a human-readable message for UI/CLI layers.
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::Message(msg) => msg.clone(),
            InfoEvent::Warning { title, message } => format!("{title}: {message}"),
            InfoEvent::ProjectActivated { id } => format!("Activated project {id}"),
            InfoEvent::PostCloseAction { action } => format!("Post-close action: {action}"),
        }
    }
}
