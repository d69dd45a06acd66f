//! Interactive and headless save-and-close of projects.
//!
//! The interactive entry asks the user once, then either closes right away
//! (discarding changes) or asks the remote UI to render snapshots and call the
//! headless entry back. The headless entry saves and closes index by index and
//! only runs the post-close action when every project went through.

use super::host::{emit_or_log, Host, SaveChoice, SavePrompt};
use super::{post_close, wire};
use crate::error::{FailureKind, ProjectFailure, WireError};
use crate::model::{PostCloseAction, SaveClosePending, SaveCloseRequest};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Outward channel asking the remote UI to render snapshots and call back.
pub const SAVE_CLOSE_CHANNEL: &str = "SaveAndCloseProjectsEvent";
pub const EXECUTING_TITLE: &str = "Workflow is executing";
pub const EXECUTING_MESSAGE: &str = "Executing nodes are not saved! Close anyway?";
pub const SAVE_FAILED_TITLE: &str = "Workflow could not be saved";
pub const CLOSE_FAILED_TITLE: &str = "Workflow could not be closed";
pub const DEFAULT_PROGRESS_TITLE: &str = "Saving and closing projects";

/// Result of closing projects without saving.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseReport {
    pub closed: Vec<String>,
    pub failures: Vec<ProjectFailure>,
}

impl CloseReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SaveCloseOutcome {
    /// Nothing needed saving, or the user discarded changes.
    Closed { report: CloseReport },
    /// The user cancelled; nothing was mutated.
    Cancelled,
    /// Snapshots were requested from the remote UI; the headless entry finishes the job.
    SavePending {
        project_ids: Vec<String>,
        action: PostCloseAction,
    },
}

/// Result of a headless save-and-close batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadlessReport {
    pub action: PostCloseAction,
    pub saved: Vec<String>,
    pub closed: Vec<String>,
    pub failures: Vec<ProjectFailure>,
    /// First failure of any kind.
    pub first_failed: Option<String>,
    /// First project that was not saved; this one gets reactivated.
    pub first_unsaved: Option<String>,
    pub action_dispatched: bool,
}

impl HeadlessReport {
    fn new(action: PostCloseAction) -> Self {
        Self {
            action,
            saved: Vec::new(),
            closed: Vec::new(),
            failures: Vec::new(),
            first_failed: None,
            first_unsaved: None,
            action_dispatched: false,
        }
    }

    fn record(&mut self, failure: ProjectFailure) {
        if self.first_failed.is_none() {
            self.first_failed = Some(failure.id.clone());
        }
        if self.first_unsaved.is_none() && failure.kind != FailureKind::Close {
            self.first_unsaved = Some(failure.id.clone());
        }
        self.failures.push(failure);
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct SaveCloseOrchestrator {
    host: Host,
    progress_title: String,
}

impl SaveCloseOrchestrator {
    pub fn new(host: Host) -> Self {
        Self {
            host,
            progress_title: DEFAULT_PROGRESS_TITLE.to_string(),
        }
    }

    pub fn with_progress_title(mut self, title: impl Into<String>) -> Self {
        self.progress_title = title.into();
        self
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    /// Ids of all loaded projects with unsaved changes, in registry order.
    pub fn dirty_project_ids(&self) -> Vec<String> {
        let registry = &self.host.registry;
        registry
            .list_ids()
            .into_iter()
            .filter(|id| registry.is_dirty(id))
            .collect()
    }

    pub fn request_interactive_save_and_close(
        &self,
        project_ids: &[String],
        action: PostCloseAction,
    ) -> SaveCloseOutcome {
        let registry = &self.host.registry;
        let resolved: Vec<(String, String)> = project_ids
            .iter()
            .filter_map(|id| match registry.name(id) {
                Some(name) => Some((id.clone(), name)),
                None => {
                    debug!(project_id = %id, "skipping unknown project");
                    None
                }
            })
            .collect();

        let dirty_names: Vec<String> = resolved
            .iter()
            .filter(|(id, _)| registry.is_dirty(id))
            .map(|(_, name)| name.clone())
            .collect();

        let choice = if dirty_names.is_empty() {
            SaveChoice::No
        } else {
            self.host
                .dialogs
                .ask_save(&SavePrompt::for_names(dirty_names))
        };
        if choice == SaveChoice::Cancel {
            info!("save-and-close cancelled by user");
            return SaveCloseOutcome::Cancelled;
        }

        let executing = resolved.iter().any(|(id, _)| registry.is_executing(id));
        if executing
            && !self
                .host
                .dialogs
                .confirm(EXECUTING_TITLE, EXECUTING_MESSAGE)
        {
            info!("save-and-close cancelled: projects still executing");
            return SaveCloseOutcome::Cancelled;
        }

        let ids: Vec<String> = resolved.into_iter().map(|(id, _)| id).collect();
        match choice {
            SaveChoice::Yes => {
                info!(count = ids.len(), %action, "requesting snapshots before save");
                emit_or_log(
                    self.host.sink.as_ref(),
                    SAVE_CLOSE_CHANNEL,
                    &SaveClosePending::new(ids.clone(), action),
                );
                SaveCloseOutcome::SavePending {
                    project_ids: ids,
                    action,
                }
            }
            _ => SaveCloseOutcome::Closed {
                report: self.close_projects(&ids),
            },
        }
    }

    /// Headless entry taking the flat wire array.
    pub fn save_and_close_wire(
        &self,
        arr: &[serde_json::Value],
    ) -> Result<HeadlessReport, WireError> {
        let request = wire::decode(arr)?;
        Ok(self.save_and_close(&request))
    }

    pub fn save_and_close(&self, request: &SaveCloseRequest) -> HeadlessReport {
        let mut report = HeadlessReport::new(request.action);
        let title = self.progress_title.clone();

        self.host.runner.run_with_progress(&title, &mut |monitor| {
            monitor.begin(&title, request.len());
            for (id, snapshot) in request.items() {
                monitor.sub_task(&format!("Saving '{id}'"));
                if monitor.is_cancelled() {
                    report.record(ProjectFailure {
                        id: id.to_string(),
                        kind: FailureKind::Interrupted,
                        message: "cancelled by user".into(),
                    });
                    continue;
                }
                match self.host.registry.save(id, snapshot) {
                    Ok(()) => report.saved.push(id.to_string()),
                    Err(e) => {
                        warn!(project_id = %id, "save failed: {e:#}");
                        report.record(ProjectFailure::new(id, FailureKind::Save, &e));
                        monitor.worked(1);
                        continue;
                    }
                }
                match self.close_project(id) {
                    Ok(()) => report.closed.push(id.to_string()),
                    Err(failure) => report.record(failure),
                }
                monitor.worked(1);
            }
        });

        if let Some(first) = report.first_failed.clone() {
            warn!(
                failures = report.failures.len(),
                first_failed = %first,
                "save-and-close incomplete; skipping {}",
                request.action
            );
            let dialogs = self.host.dialogs.clone();
            let registry = self.host.registry.clone();
            let unsaved = report.first_unsaved.clone();
            self.host.ui.run_on_ui(Box::new(move || match unsaved {
                Some(id) => {
                    let message = format!("Saving '{id}' failed. See the log for details.");
                    dialogs.warn(SAVE_FAILED_TITLE, &message);
                    if let Err(e) = registry.activate(&id) {
                        warn!(project_id = %id, "could not reactivate project: {e:#}");
                    }
                }
                // Every project was saved; only closing went wrong.
                None => {
                    let message = format!("Closing '{first}' failed. See the log for details.");
                    dialogs.warn(CLOSE_FAILED_TITLE, &message);
                }
            }));
            return report;
        }

        info!(count = report.closed.len(), action = %request.action, "projects saved and closed");
        post_close::dispatch(request.action, &self.host);
        report.action_dispatched = true;
        report
    }

    /// Close every id, attempting all of them even when some fail.
    fn close_projects(&self, ids: &[String]) -> CloseReport {
        let mut report = CloseReport::default();
        for id in ids {
            match self.close_project(id) {
                Ok(()) => report.closed.push(id.clone()),
                Err(failure) => report.failures.push(failure),
            }
        }
        report
    }

    fn close_project(&self, id: &str) -> Result<(), ProjectFailure> {
        self.host.registry.cancel_and_remove(id).map_err(|e| {
            warn!(project_id = %id, "close failed: {e:#}");
            ProjectFailure::new(id, FailureKind::Close, &e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::host::{CurrentThread, InlineRunner, ProjectRegistry};
    use crate::scenario::{
        DialogAnswers, InMemoryRegistry, ProjectSpec, RecordingShell, RecordingSink,
        ScriptedDialogs,
    };
    use std::sync::Arc;

    struct Fixture {
        registry: Arc<InMemoryRegistry>,
        dialogs: Arc<ScriptedDialogs>,
        shell: Arc<RecordingShell>,
        sink: Arc<RecordingSink>,
        orchestrator: SaveCloseOrchestrator,
    }

    fn fixture(projects: Vec<ProjectSpec>, answers: DialogAnswers) -> Fixture {
        let registry = Arc::new(InMemoryRegistry::from_specs(&projects));
        let dialogs = Arc::new(ScriptedDialogs::new(answers));
        let shell = Arc::new(RecordingShell::default());
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = SaveCloseOrchestrator::new(Host {
            registry: registry.clone(),
            dialogs: dialogs.clone(),
            runner: Arc::new(InlineRunner),
            shell: shell.clone(),
            ui: Arc::new(CurrentThread),
            sink: sink.clone(),
        });
        Fixture {
            registry,
            dialogs,
            shell,
            sink,
            orchestrator,
        }
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn headless_all_succeed_notifies_app_state_once() {
        let f = fixture(
            vec![
                ProjectSpec::dirty("p1"),
                ProjectSpec::dirty("p2"),
                ProjectSpec::dirty("p3"),
            ],
            DialogAnswers::default(),
        );
        let req = SaveCloseRequest::new(
            ids(&["p1", "p2", "p3"]),
            ids(&["s1", "s2", "s3"]),
            PostCloseAction::UpdateAppState,
        )
        .unwrap();

        let report = f.orchestrator.save_and_close(&req);

        assert!(report.is_success());
        assert!(report.action_dispatched);
        assert!(f.registry.list_ids().is_empty());
        assert_eq!(f.shell.app_state_changes(), 1);
        assert_eq!(f.shell.closes(), 0);
        assert!(f.dialogs.warnings().is_empty());
        assert_eq!(
            f.registry.saved(),
            vec![
                ("p1".to_string(), "s1".to_string()),
                ("p2".to_string(), "s2".to_string()),
                ("p3".to_string(), "s3".to_string())
            ]
        );
    }

    #[test]
    fn headless_failure_keeps_going_and_reactivates_first_failed() {
        let f = fixture(
            vec![
                ProjectSpec::dirty("p1"),
                ProjectSpec::dirty("p2").failing_save(),
                ProjectSpec::dirty("p3"),
            ],
            DialogAnswers::default(),
        );
        let req = SaveCloseRequest::new(
            ids(&["p1", "p2", "p3"]),
            ids(&["s1", "s2", "s3"]),
            PostCloseAction::Shutdown,
        )
        .unwrap();

        let report = f.orchestrator.save_and_close(&req);

        assert_eq!(report.first_failed.as_deref(), Some("p2"));
        assert_eq!(report.first_unsaved.as_deref(), Some("p2"));
        assert_eq!(report.saved, ids(&["p1", "p3"]));
        assert_eq!(report.closed, ids(&["p1", "p3"]));
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].kind, FailureKind::Save);
        assert!(!report.action_dispatched);
        assert_eq!(f.registry.list_ids(), ids(&["p2"]));
        assert_eq!(f.registry.activated(), ids(&["p2"]));
        assert_eq!(f.shell.closes(), 0);
        let warnings = f.dialogs.warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].0, SAVE_FAILED_TITLE);
    }

    #[test]
    fn headless_close_failure_blocks_post_close_action() {
        let f = fixture(
            vec![ProjectSpec::dirty("p1").failing_close(), ProjectSpec::dirty("p2")],
            DialogAnswers::default(),
        );
        let req = SaveCloseRequest::new(
            ids(&["p1", "p2"]),
            ids(&["s1", "s2"]),
            PostCloseAction::SwitchPerspective,
        )
        .unwrap();

        let report = f.orchestrator.save_and_close(&req);

        assert_eq!(report.saved, ids(&["p1", "p2"]));
        assert_eq!(report.closed, ids(&["p2"]));
        assert_eq!(report.failures[0].kind, FailureKind::Close);
        assert_eq!(report.first_failed.as_deref(), Some("p1"));
        assert_eq!(report.first_unsaved, None);
        assert_eq!(f.shell.perspective_switches(), 0);
        assert!(f.registry.activated().is_empty());
        let warnings = f.dialogs.warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].0, CLOSE_FAILED_TITLE);
        assert!(warnings[0].1.contains("Closing 'p1' failed"));
    }

    #[test]
    fn headless_mixed_failures_reactivate_the_unsaved_project() {
        let f = fixture(
            vec![
                ProjectSpec::dirty("p1").failing_close(),
                ProjectSpec::dirty("p2").failing_save(),
            ],
            DialogAnswers::default(),
        );
        let req = SaveCloseRequest::new(
            ids(&["p1", "p2"]),
            ids(&["s1", "s2"]),
            PostCloseAction::Shutdown,
        )
        .unwrap();

        let report = f.orchestrator.save_and_close(&req);

        assert_eq!(report.saved, ids(&["p1"]));
        assert_eq!(report.first_failed.as_deref(), Some("p1"));
        assert_eq!(report.first_unsaved.as_deref(), Some("p2"));
        assert!(!report.action_dispatched);
        assert_eq!(f.shell.closes(), 0);
        assert_eq!(f.registry.activated(), ids(&["p2"]));
        let warnings = f.dialogs.warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].0, SAVE_FAILED_TITLE);
        assert!(warnings[0].1.contains("Saving 'p2' failed"));
    }

    #[test]
    fn headless_wire_entry_decodes_and_runs() {
        let f = fixture(vec![ProjectSpec::dirty("p1")], DialogAnswers::default());
        let arr = serde_json::json!([1.0, "p1", "<svg/>", "SHUTDOWN"]);
        let report = f
            .orchestrator
            .save_and_close_wire(arr.as_array().unwrap())
            .unwrap();
        assert!(report.is_success());
        assert_eq!(f.shell.closes(), 1);

        let bad = serde_json::json!([2.0, "p1", "<svg/>", "SHUTDOWN"]);
        assert!(f
            .orchestrator
            .save_and_close_wire(bad.as_array().unwrap())
            .is_err());
    }

    #[test]
    fn interactive_without_dirty_projects_closes_without_dialogs() {
        let f = fixture(
            vec![ProjectSpec::clean("p1"), ProjectSpec::clean("p2")],
            DialogAnswers::default(),
        );
        let outcome = f
            .orchestrator
            .request_interactive_save_and_close(&ids(&["p1", "p2"]), PostCloseAction::Shutdown);

        match outcome {
            SaveCloseOutcome::Closed { report } => {
                assert_eq!(report.closed, ids(&["p1", "p2"]));
                assert!(report.is_success());
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(f.dialogs.prompts().is_empty());
        assert!(f.registry.list_ids().is_empty());
        assert!(f.sink.events().is_empty());
    }

    #[test]
    fn interactive_cancel_mutates_nothing() {
        let f = fixture(
            vec![ProjectSpec::dirty("p1"), ProjectSpec::clean("p2")],
            DialogAnswers {
                save: SaveChoice::Cancel,
                ..DialogAnswers::default()
            },
        );
        let outcome = f
            .orchestrator
            .request_interactive_save_and_close(&ids(&["p1", "p2"]), PostCloseAction::Shutdown);

        assert_eq!(outcome, SaveCloseOutcome::Cancelled);
        assert_eq!(f.registry.list_ids(), ids(&["p1", "p2"]));
        assert_eq!(f.dialogs.prompts(), vec!["Save 'p1'?".to_string()]);
    }

    #[test]
    fn interactive_yes_emits_pending_event_for_resolved_ids() {
        let f = fixture(
            vec![ProjectSpec::dirty("p1"), ProjectSpec::dirty("p2")],
            DialogAnswers::default(),
        );
        let outcome = f.orchestrator.request_interactive_save_and_close(
            &ids(&["p1", "ghost", "p2"]),
            PostCloseAction::SwitchPerspective,
        );

        assert_eq!(
            outcome,
            SaveCloseOutcome::SavePending {
                project_ids: ids(&["p1", "p2"]),
                action: PostCloseAction::SwitchPerspective,
            }
        );
        assert_eq!(f.registry.list_ids(), ids(&["p1", "p2"]));
        let events = f.sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, SAVE_CLOSE_CHANNEL);
        assert_eq!(
            events[0].1,
            serde_json::json!({"projectIds": ["p1", "p2"], "params": ["SWITCH_PERSPECTIVE"]})
        );
        assert!(f.dialogs.prompts()[0].starts_with("Save changes to the following workflows?"));
    }

    #[test]
    fn interactive_no_discards_and_closes_remaining_after_failure() {
        let f = fixture(
            vec![
                ProjectSpec::dirty("p1").failing_close(),
                ProjectSpec::dirty("p2"),
            ],
            DialogAnswers {
                save: SaveChoice::No,
                ..DialogAnswers::default()
            },
        );
        let outcome = f
            .orchestrator
            .request_interactive_save_and_close(&ids(&["p1", "p2"]), PostCloseAction::Shutdown);

        let SaveCloseOutcome::Closed { report } = outcome else {
            panic!("expected closed outcome");
        };
        assert_eq!(report.closed, ids(&["p2"]));
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].id, "p1");
        assert!(f.registry.saved().is_empty());
    }

    #[test]
    fn executing_projects_need_second_confirmation() {
        let f = fixture(
            vec![ProjectSpec::clean("p1").executing()],
            DialogAnswers {
                close_executing: false,
                ..DialogAnswers::default()
            },
        );
        let outcome = f
            .orchestrator
            .request_interactive_save_and_close(&ids(&["p1"]), PostCloseAction::Shutdown);

        assert_eq!(outcome, SaveCloseOutcome::Cancelled);
        assert_eq!(f.registry.list_ids(), ids(&["p1"]));
        assert_eq!(f.dialogs.confirmations(), vec![EXECUTING_MESSAGE.to_string()]);
    }

    #[test]
    fn confirmed_executing_project_goes_on_to_save() {
        let f = fixture(
            vec![ProjectSpec::dirty("p1").executing()],
            DialogAnswers::default(),
        );
        let outcome = f
            .orchestrator
            .request_interactive_save_and_close(&ids(&["p1"]), PostCloseAction::Shutdown);

        assert_eq!(
            outcome,
            SaveCloseOutcome::SavePending {
                project_ids: ids(&["p1"]),
                action: PostCloseAction::Shutdown,
            }
        );
        assert_eq!(f.dialogs.confirmations(), vec![EXECUTING_MESSAGE.to_string()]);
        assert_eq!(f.registry.list_ids(), ids(&["p1"]));
    }

    #[test]
    fn dirty_ids_follow_registry_order() {
        let f = fixture(
            vec![
                ProjectSpec::dirty("a"),
                ProjectSpec::clean("b"),
                ProjectSpec::dirty("c"),
            ],
            DialogAnswers::default(),
        );
        assert_eq!(f.orchestrator.dirty_project_ids(), ids(&["a", "c"]));
    }
}
