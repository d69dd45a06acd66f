//! Lifecycle command loop.
//!
//! Owns the state machine on a blocking worker, applies shell commands strictly
//! in arrival order and emits events for presentation layers.

use super::SaveCloseOutcome;
use crate::lifecycle::{LifecycleStateMachine, TransitionRequest};
use crate::model::{InfoEvent, LifecycleSnapshot, Phase, PostCloseAction, SessionEvent};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Commands emitted by shells, remote UIs and drivers.
#[derive(Debug)]
pub enum ShellCommand {
    Transition(TransitionRequest),
    SaveAndClose {
        project_ids: Vec<String>,
        action: PostCloseAction,
    },
    /// Headless save-and-close in its flat wire form.
    HeadlessSaveAndClose(Vec<serde_json::Value>),
    /// Reply with the current state once every earlier command was applied.
    Snapshot(oneshot::Sender<LifecycleSnapshot>),
    Quit,
}

/// Handle to a running controller.
pub struct ControllerHandle {
    cmd_tx: UnboundedSender<ShellCommand>,
    handle: tokio::task::JoinHandle<LifecycleStateMachine>,
}

impl ControllerHandle {
    pub fn sender(&self) -> UnboundedSender<ShellCommand> {
        self.cmd_tx.clone()
    }

    pub fn send(&self, cmd: ShellCommand) -> bool {
        self.cmd_tx.send(cmd).is_ok()
    }

    /// Wait until all previously sent commands were applied.
    pub async fn snapshot(&self) -> Option<LifecycleSnapshot> {
        let (tx, rx) = oneshot::channel();
        if !self.send(ShellCommand::Snapshot(tx)) {
            return None;
        }
        rx.await.ok()
    }

    /// Stop the loop and take the state machine back.
    pub async fn shutdown(self) -> anyhow::Result<LifecycleStateMachine> {
        let _ = self.cmd_tx.send(ShellCommand::Quit);
        drop(self.cmd_tx);
        self.handle
            .await
            .map_err(|e| anyhow::anyhow!("controller join failed: {e}"))
    }
}

/// Spawn the command loop. Requires a Tokio runtime.
pub fn spawn_controller(
    machine: LifecycleStateMachine,
    event_tx: UnboundedSender<SessionEvent>,
) -> ControllerHandle {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<ShellCommand>();
    let handle = tokio::task::spawn_blocking(move || run_controller(machine, cmd_rx, event_tx));
    ControllerHandle { cmd_tx, handle }
}

fn run_controller(
    mut machine: LifecycleStateMachine,
    mut cmd_rx: UnboundedReceiver<ShellCommand>,
    event_tx: UnboundedSender<SessionEvent>,
) -> LifecycleStateMachine {
    loop {
        match cmd_rx.blocking_recv() {
            Some(ShellCommand::Transition(request)) => {
                apply_transition(&mut machine, &request, &event_tx);
            }
            Some(ShellCommand::SaveAndClose {
                project_ids,
                action,
            }) => {
                let outcome = machine
                    .orchestrator()
                    .request_interactive_save_and_close(&project_ids, action);
                let _ = event_tx.send(SessionEvent::SaveClose { outcome });
            }
            Some(ShellCommand::HeadlessSaveAndClose(arr)) => {
                match machine.orchestrator().save_and_close_wire(&arr) {
                    Ok(report) => {
                        let _ = event_tx.send(SessionEvent::SaveCloseReport { report });
                    }
                    Err(e) => {
                        warn!("rejecting headless save-and-close call: {e}");
                        let _ = event_tx.send(SessionEvent::Info {
                            info: InfoEvent::Message(format!(
                                "Headless save-and-close rejected: {e}"
                            )),
                        });
                    }
                }
            }
            Some(ShellCommand::Snapshot(reply)) => {
                let _ = reply.send(machine.snapshot());
            }
            Some(ShellCommand::Quit) => break,
            None => {
                // Every sender is gone: the shell went away without quitting.
                if machine.phase() != Some(Phase::Shutdown) {
                    debug!("command channel closed; forcing shutdown");
                    apply_transition(&mut machine, &TransitionRequest::ForceShutdown, &event_tx);
                }
                break;
            }
        }
    }
    machine
}

fn apply_transition(
    machine: &mut LifecycleStateMachine,
    request: &TransitionRequest,
    event_tx: &UnboundedSender<SessionEvent>,
) {
    let transition = request.transition();
    let recorded = machine.history().len();
    match machine.apply(request) {
        Ok(outcome) => {
            if let Some(record) = machine.history().get(recorded) {
                let _ = event_tx.send(SessionEvent::PhaseChanged {
                    transition: record.transition,
                    from: record.from,
                    to: record.to,
                });
            }
            if let Some(outcome) = outcome {
                if outcome == SaveCloseOutcome::Cancelled {
                    let _ = event_tx.send(SessionEvent::Info {
                        info: InfoEvent::Message(format!("{transition} cancelled by user")),
                    });
                }
                let _ = event_tx.send(SessionEvent::SaveClose { outcome });
            }
        }
        Err(e) => {
            let _ = event_tx.send(SessionEvent::TransitionRejected {
                transition,
                message: format!("{:#}", anyhow::Error::from(e)),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::NoopHooks;
    use crate::model::Transition;
    use crate::orchestrator::host::{CurrentThread, Host, InlineRunner};
    use crate::orchestrator::SaveCloseOrchestrator;
    use crate::scenario::{
        DialogAnswers, InMemoryRegistry, ProjectSpec, RecordingShell, RecordingSink,
        ScriptedDialogs,
    };
    use std::sync::Arc;

    fn machine(projects: Vec<ProjectSpec>) -> LifecycleStateMachine {
        let host = Host {
            registry: Arc::new(InMemoryRegistry::from_specs(&projects)),
            dialogs: Arc::new(ScriptedDialogs::new(DialogAnswers::default())),
            runner: Arc::new(InlineRunner),
            shell: Arc::new(RecordingShell::default()),
            ui: Arc::new(CurrentThread),
            sink: Arc::new(RecordingSink::default()),
        };
        LifecycleStateMachine::new(Arc::new(NoopHooks), SaveCloseOrchestrator::new(host))
    }

    fn drain(rx: &mut UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn applies_commands_in_order_and_reports_rejections() {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let ctl = spawn_controller(machine(Vec::new()), event_tx);

        ctl.send(ShellCommand::Transition(TransitionRequest::Startup));
        ctl.send(ShellCommand::Transition(TransitionRequest::WebAppLoaded));
        ctl.send(ShellCommand::Transition(TransitionRequest::Create));
        let snap = ctl.snapshot().await.unwrap();

        assert_eq!(snap.phase, Some(Phase::Create));
        let events = drain(&mut event_rx);
        assert_eq!(events.len(), 3);
        assert!(matches!(
            &events[1],
            SessionEvent::TransitionRejected { transition: Transition::WebAppLoaded, message }
                if message.contains(crate::error::WRONG_TRANSITION)
        ));

        let m = ctl.shutdown().await.unwrap();
        assert_eq!(m.phase(), Some(Phase::Create));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pending_save_completes_through_headless_call() {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let ctl = spawn_controller(
            machine(vec![ProjectSpec::dirty("p1"), ProjectSpec::dirty("p2")]),
            event_tx,
        );

        ctl.send(ShellCommand::SaveAndClose {
            project_ids: vec!["p1".into(), "p2".into()],
            action: PostCloseAction::UpdateAppState,
        });
        ctl.snapshot().await.unwrap();
        let events = drain(&mut event_rx);
        let Some(SessionEvent::SaveClose {
            outcome: SaveCloseOutcome::SavePending { project_ids, action },
        }) = events.first()
        else {
            panic!("expected pending outcome, got {events:?}");
        };
        assert_eq!(project_ids.len(), 2);

        ctl.send(ShellCommand::HeadlessSaveAndClose(vec![
            2.0.into(),
            "p1".into(),
            "p2".into(),
            "<svg/>".into(),
            "<svg/>".into(),
            action.as_str().into(),
        ]));
        ctl.snapshot().await.unwrap();
        let events = drain(&mut event_rx);
        assert!(matches!(
            &events[0],
            SessionEvent::SaveCloseReport { report }
                if report.is_success() && report.closed.len() == 2
        ));

        let m = ctl.shutdown().await.unwrap();
        assert!(m.orchestrator().host().registry.list_ids().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dropped_senders_force_shutdown() {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let ControllerHandle { cmd_tx, handle } = spawn_controller(machine(Vec::new()), event_tx);
        cmd_tx
            .send(ShellCommand::Transition(TransitionRequest::Startup))
            .unwrap();
        drop(cmd_tx);

        let m = handle.await.unwrap();

        assert_eq!(m.phase(), Some(Phase::Shutdown));
        assert!(m.is_last_state_transition(Transition::ForceShutdown));
        let events = drain(&mut event_rx);
        assert!(matches!(
            events.last(),
            Some(SessionEvent::PhaseChanged {
                transition: Transition::ForceShutdown,
                ..
            })
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn malformed_wire_call_is_reported_not_fatal() {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let ctl = spawn_controller(machine(Vec::new()), event_tx);
        ctl.send(ShellCommand::HeadlessSaveAndClose(vec![3.0.into()]));
        ctl.snapshot().await.unwrap();
        let events = drain(&mut event_rx);
        assert!(matches!(
            &events[0],
            SessionEvent::Info { info: InfoEvent::Message(m) } if m.contains("rejected")
        ));
        ctl.shutdown().await.unwrap();
    }
}
