//! Text summary builder for CLI output.
//!
//! Accumulates the session event stream and formats human-readable lines for
//! text mode. The same report is what `--json` and `--export-json` write.

use app_lifecycle::model::{
    LifecycleSnapshot, ProgressEvent, ProgressStatus, SessionEvent, Transition,
};
use app_lifecycle::orchestrator::{HeadlessReport, SaveCloseOutcome};
use serde::Serialize;

/// Everything observed on the event stream during one run.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SessionTally {
    pub applied: usize,
    pub rejected: Vec<String>,
    pub outcomes: Vec<SaveCloseOutcome>,
    pub reports: Vec<HeadlessReport>,
    pub progress: Vec<ProgressEvent>,
    pub warnings: Vec<String>,
}

impl SessionTally {
    pub fn observe(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::PhaseChanged { .. } => self.applied += 1,
            SessionEvent::TransitionRejected { message, .. } => {
                self.rejected.push(message.clone())
            }
            SessionEvent::SaveClose { outcome } => self.outcomes.push(outcome.clone()),
            SessionEvent::SaveCloseReport { report } => self.reports.push(report.clone()),
            SessionEvent::Progress { event } => self.progress.push(event.clone()),
            SessionEvent::Info { info } => {
                if let app_lifecycle::model::InfoEvent::Warning { .. } = info {
                    self.warnings.push(info.to_message());
                }
            }
            SessionEvent::Outward { .. } => {}
        }
    }
}

/// Final report of a scenario run.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RunReport {
    pub lifecycle: LifecycleSnapshot,
    pub remaining_projects: Vec<String>,
    #[serde(flatten)]
    pub tally: SessionTally,
}

/// One stderr line per event in text mode; `None` for events not worth a line.
pub(crate) fn describe_event(event: &SessionEvent) -> Option<String> {
    match event {
        SessionEvent::PhaseChanged {
            transition,
            from,
            to,
        } => {
            let from = from.map(|p| p.to_string()).unwrap_or_else(|| "-".into());
            Some(format!("== {transition}: {from} -> {to} =="))
        }
        SessionEvent::TransitionRejected { message, .. } => Some(format!("rejected: {message}")),
        SessionEvent::SaveClose { outcome } => Some(match outcome {
            SaveCloseOutcome::Closed { report } => format!(
                "Closed {} project(s), {} failure(s)",
                report.closed.len(),
                report.failures.len()
            ),
            SaveCloseOutcome::Cancelled => "Save-and-close cancelled".into(),
            SaveCloseOutcome::SavePending {
                project_ids,
                action,
            } => format!(
                "Waiting for snapshots of {} project(s), then {action}",
                project_ids.len()
            ),
        }),
        SessionEvent::SaveCloseReport { report } => Some(format!(
            "Saved {} / closed {} project(s){}",
            report.saved.len(),
            report.closed.len(),
            report
                .first_failed
                .as_deref()
                .map(|id| format!(", first failure: {id}"))
                .unwrap_or_default()
        )),
        SessionEvent::Progress { event } => Some(match event.subtask.as_deref() {
            Some(sub) => format!("{} [{:?}] {}% {sub}", event.task, event.status, event.progress),
            None => format!("{} [{:?}] {}%", event.task, event.status, event.progress),
        }),
        SessionEvent::Info { info } => Some(info.to_message()),
        SessionEvent::Outward { .. } => None,
    }
}

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

pub(crate) fn build_text_summary(report: &RunReport) -> TextSummary {
    let mut lines = Vec::new();
    let lc = &report.lifecycle;

    let phase = lc.phase.map(|p| p.to_string()).unwrap_or_else(|| "-".into());
    let last = lc
        .last_transition
        .map(|t| t.to_string())
        .unwrap_or_else(|| "-".into());
    lines.push(format!("Phase: {phase} (last transition: {last})"));
    lines.push(format!(
        "Transitions: {} applied, {} rejected",
        lc.history.len(),
        report.tally.rejected.len()
    ));

    if report.remaining_projects.is_empty() {
        lines.push("Open projects: none".into());
    } else {
        lines.push(format!(
            "Open projects: {}",
            report.remaining_projects.join(", ")
        ));
    }

    let t = &report.tally;
    if !t.outcomes.is_empty() {
        let cancelled = t
            .outcomes
            .iter()
            .filter(|o| matches!(o, SaveCloseOutcome::Cancelled))
            .count();
        let pending = t
            .outcomes
            .iter()
            .filter(|o| matches!(o, SaveCloseOutcome::SavePending { .. }))
            .count();
        lines.push(format!(
            "Save-and-close requests: {} ({} cancelled, {} handed to the UI)",
            t.outcomes.len(),
            cancelled,
            pending
        ));
    }
    for r in &t.reports {
        let status = if r.is_success() { "ok" } else { "failed" };
        lines.push(format!(
            "Headless {}: {status}, saved {}, closed {}, {} failure(s)",
            r.action,
            r.saved.len(),
            r.closed.len(),
            r.failures.len()
        ));
    }

    if !t.progress.is_empty() {
        let finished = t
            .progress
            .iter()
            .filter(|e| e.status == ProgressStatus::Finished)
            .count();
        lines.push(format!(
            "Progress events: {} ({finished} job(s) finished)",
            t.progress.len()
        ));
    }
    for w in &t.warnings {
        lines.push(format!("Warning: {w}"));
    }

    TextSummary { lines }
}
