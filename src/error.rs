//! Error taxonomy for the lifecycle core.
//!
//! Guard violations are hard errors returned to the immediate caller. Per-project
//! save/close failures are plain values collected into batch reports instead.

use crate::model::{Phase, Transition};
use serde::{Deserialize, Serialize};

/// Fixed diagnostic phrase carried by every guard violation. Callers match on it.
pub const WRONG_TRANSITION: &str = "wrong life cycle state transition";

fn phase_label(phase: &Option<Phase>) -> &'static str {
    phase.map(Phase::as_str).unwrap_or("<none>")
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error(
        "wrong life cycle state transition: cannot {transition} from {}",
        phase_label(.current)
    )]
    Violation {
        transition: Transition,
        current: Option<Phase>,
    },
    #[error("{transition} hook failed")]
    Hook {
        transition: Transition,
        #[source]
        source: anyhow::Error,
    },
}

impl LifecycleError {
    pub fn is_violation(&self) -> bool {
        matches!(self, Self::Violation { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("save-and-close request has {ids} ids but {snapshots} snapshots")]
    Misaligned { ids: usize, snapshots: usize },
}

/// Malformed flat array for the headless save-and-close call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WireError {
    #[error("wire array is empty")]
    Empty,
    #[error("project count must be a non-negative whole number, got {0}")]
    BadCount(String),
    #[error("wire array for {count} projects needs {expected} entries, got {actual}")]
    Length {
        count: usize,
        expected: usize,
        actual: usize,
    },
    #[error("entry {index} must be a string")]
    NotAString { index: usize },
    #[error("unknown post-close action '{0}'")]
    UnknownAction(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The save step failed (I/O, lock, or save hook).
    Save,
    /// Cancel-and-remove failed after the project was saved or discarded.
    Close,
    /// The progress runner was cancelled before this project was reached.
    Interrupted,
}

/// One project's failure within a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind:?} failed for project {id}: {message}")]
pub struct ProjectFailure {
    pub id: String,
    pub kind: FailureKind,
    pub message: String,
}

impl ProjectFailure {
    pub fn new(id: impl Into<String>, kind: FailureKind, err: &anyhow::Error) -> Self {
        Self {
            id: id.into(),
            kind,
            message: format!("{err:#}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn violation_message_carries_fixed_phrase() {
        let err = LifecycleError::Violation {
            transition: Transition::Shutdown,
            current: Some(Phase::WebAppLoaded),
        };
        let msg = err.to_string();
        assert!(msg.contains(WRONG_TRANSITION));
        assert!(msg.contains("shutdown"));
        assert!(msg.contains("WEB_APP_LOADED"));
    }

    #[test]
    fn violation_from_pristine_state_is_labelled() {
        let err = LifecycleError::Violation {
            transition: Transition::Create,
            current: None,
        };
        assert!(err.to_string().ends_with("from <none>"));
        assert!(err.is_violation());
    }

    #[test]
    fn hook_error_keeps_cause_chain() {
        let err = LifecycleError::Hook {
            transition: Transition::Create,
            source: anyhow::anyhow!("port in use").context("register resource handlers"),
        };
        assert_eq!(err.to_string(), "create hook failed");
        assert!(!err.is_violation());

        let chained = format!("{:#}", anyhow::Error::from(err));
        assert_eq!(
            chained,
            "create hook failed: register resource handlers: port in use"
        );
        assert_eq!(chained.matches("port in use").count(), 1);
    }
}
