use crate::text_summary::{RunReport, SessionTally};
use anyhow::{Context, Result};
use app_lifecycle::config::{self, Settings};
use app_lifecycle::lifecycle::{LifecycleStateMachine, TransitionRequest};
use app_lifecycle::model::{SaveCloseRequest, SessionEvent};
use app_lifecycle::orchestrator::host::{CurrentThread, Dialogs, ProjectRegistry};
use app_lifecycle::orchestrator::{
    spawn_controller, wire, ControllerHandle, SaveCloseOrchestrator, SaveCloseOutcome,
    ShellCommand,
};
use app_lifecycle::progress::{JobHandle, ProgressTranslator};
use app_lifecycle::scenario::{scenario_host, Scenario, ScenarioHooks, ScriptedDialogs, Step};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "app-lifecycle",
    version,
    about = "Replay a scripted application session through the lifecycle state machine"
)]
pub struct Cli {
    /// Scenario file (JSON) to replay
    pub scenario: PathBuf,

    /// Print events and the final report as JSON
    #[arg(long)]
    pub json: bool,

    /// Print a text summary (default)
    #[arg(long)]
    pub text: bool,

    /// Run silently: suppress all output except errors (for cron usage)
    #[arg(long)]
    pub silent: bool,

    /// Settings file (defaults to the platform config dir)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Pause between scenario steps
    #[arg(long)]
    pub step_delay: Option<humantime::Duration>,

    /// Pass `checkForUpdates = false` to init unless the scenario sets it
    #[arg(long)]
    pub no_update_check: bool,

    /// Export the final report as JSON
    #[arg(long)]
    pub export_json: Option<PathBuf>,

    /// Answer save dialogs from the terminal instead of the scenario script
    #[cfg(feature = "tui")]
    #[arg(long, conflicts_with_all = ["json", "silent"])]
    pub interactive: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Text,
    Json,
    Silent,
}

pub async fn run(args: Cli) -> Result<()> {
    // Validate that --silent can only be used with --json
    if args.silent && !args.json {
        return Err(anyhow::anyhow!(
            "--silent can only be used with --json. Use --silent --json together."
        ));
    }
    let mode = if args.silent {
        OutputMode::Silent
    } else if args.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };

    let settings = build_settings(&args)?;
    if mode != OutputMode::Silent {
        app_lifecycle::logging::init_tracing(&settings.log_filter);
    }
    let scenario = Scenario::load(&args.scenario)?;

    let report = run_scenario(&args, &settings, scenario, mode).await?;
    handle_exports(&args, &report)?;
    Ok(())
}

/// Settings file first, then CLI overrides.
fn build_settings(args: &Cli) -> Result<Settings> {
    let mut settings = config::load(args.config.as_deref()).context("failed to load settings")?;
    if let Some(delay) = args.step_delay {
        settings.step_delay = Duration::from(delay);
    }
    if args.no_update_check {
        settings.check_for_updates = false;
    }
    Ok(settings)
}

fn dialogs_for(
    args: &Cli,
    scenario: &Scenario,
    event_tx: &mpsc::UnboundedSender<SessionEvent>,
) -> Arc<dyn Dialogs> {
    #[cfg(feature = "tui")]
    {
        if args.interactive {
            return Arc::new(crate::tui::TerminalDialogs::new());
        }
    }
    #[cfg(not(feature = "tui"))]
    let _ = args;
    Arc::new(ScriptedDialogs::new(scenario.answers).with_events(event_tx.clone()))
}

/// Fill in settings-driven defaults the scenario left open.
fn resolve_request(request: TransitionRequest, settings: &Settings) -> TransitionRequest {
    match request {
        TransitionRequest::Init {
            check_for_updates: None,
        } => TransitionRequest::Init {
            check_for_updates: Some(settings.check_for_updates),
        },
        other => other,
    }
}

/// Stand in for the remote UI: render placeholder snapshots for a pending
/// save and call the headless entry back.
fn answer_pending(
    outcome: &SaveCloseOutcome,
    settings: &Settings,
) -> Result<Option<ShellCommand>> {
    let SaveCloseOutcome::SavePending {
        project_ids,
        action,
    } = outcome
    else {
        return Ok(None);
    };
    let snapshots = vec![settings.snapshot_placeholder.clone(); project_ids.len()];
    let request = SaveCloseRequest::new(project_ids.clone(), snapshots, *action)?;
    Ok(Some(ShellCommand::HeadlessSaveAndClose(wire::encode(&request))))
}

struct EventPrinter {
    mode: OutputMode,
    out_tx: Option<mpsc::UnboundedSender<OutputLine>>,
    tally: SessionTally,
}

impl EventPrinter {
    fn emit(&mut self, event: &SessionEvent) {
        self.tally.observe(event);
        let Some(tx) = self.out_tx.as_ref() else {
            return;
        };
        match self.mode {
            OutputMode::Json => match serde_json::to_string(event) {
                Ok(line) => {
                    let _ = tx.send(OutputLine::Stdout(line));
                }
                Err(e) => tracing::warn!("failed to serialize event: {e}"),
            },
            OutputMode::Text => {
                if let Some(line) = crate::text_summary::describe_event(event) {
                    let _ = tx.send(OutputLine::Stderr(line));
                }
            }
            OutputMode::Silent => {}
        }
    }
}

/// Wait for the controller to catch up, print what it emitted and answer
/// pending saves until none are left.
async fn settle(
    ctl: &ControllerHandle,
    event_rx: &mut mpsc::UnboundedReceiver<SessionEvent>,
    printer: &mut EventPrinter,
    settings: &Settings,
) -> Result<()> {
    loop {
        ctl.snapshot().await.context("lifecycle controller stopped")?;
        let mut callbacks = Vec::new();
        while let Ok(event) = event_rx.try_recv() {
            if let SessionEvent::SaveClose { outcome } = &event {
                if let Some(cmd) = answer_pending(outcome, settings)? {
                    callbacks.push(cmd);
                }
            }
            printer.emit(&event);
        }
        if callbacks.is_empty() {
            return Ok(());
        }
        for cmd in callbacks {
            ctl.send(cmd);
        }
    }
}

async fn run_scenario(
    args: &Cli,
    settings: &Settings,
    scenario: Scenario,
    mode: OutputMode,
) -> Result<RunReport> {
    let (out_tx, out_handle) = if mode == OutputMode::Silent {
        (None, None)
    } else {
        let (tx, handle) = spawn_output_writer();
        (Some(tx), Some(handle))
    };
    let mut printer = EventPrinter {
        mode,
        out_tx,
        tally: SessionTally::default(),
    };

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<SessionEvent>();
    let dialogs = dialogs_for(args, &scenario, &event_tx);
    let (host, registry) = scenario_host(
        &scenario,
        dialogs,
        Arc::new(CurrentThread),
        event_tx.clone(),
    );
    let translator = ProgressTranslator::new(host.sink.clone());
    let orchestrator =
        SaveCloseOrchestrator::new(host).with_progress_title(settings.progress_title.clone());
    let hooks = Arc::new(ScenarioHooks::new(scenario.hooks.clone()));
    let machine = LifecycleStateMachine::new(hooks, orchestrator);
    let ctl = spawn_controller(machine, event_tx);

    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupt = {
        let cmd_tx = ctl.sender();
        let flag = Arc::clone(&interrupted);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, forcing shutdown");
                flag.store(true, Ordering::SeqCst);
                let _ = cmd_tx.send(ShellCommand::Transition(TransitionRequest::ForceShutdown));
            }
        })
    };

    let mut jobs: Vec<JobHandle> = Vec::new();
    for (index, step) in scenario.steps.into_iter().enumerate() {
        if interrupted.load(Ordering::SeqCst) {
            break;
        }
        tracing::debug!(step = index, "running step");
        match step {
            Step::Lifecycle(request) => {
                ctl.send(ShellCommand::Transition(resolve_request(request, settings)));
            }
            Step::SaveAndClose {
                project_ids,
                action,
            } => {
                ctl.send(ShellCommand::SaveAndClose {
                    project_ids,
                    action,
                });
            }
            Step::Headless(arr) => {
                ctl.send(ShellCommand::HeadlessSaveAndClose(arr));
            }
            Step::Job { task, signals } => {
                let job = translator.spawn_job(task);
                for signal in signals {
                    job.send(signal);
                }
                jobs.push(job);
            }
        }
        settle(&ctl, &mut event_rx, &mut printer, settings).await?;
        if !settings.step_delay.is_zero() {
            tokio::time::sleep(settings.step_delay).await;
        }
    }

    futures::future::join_all(jobs.into_iter().map(JobHandle::finish)).await;
    settle(&ctl, &mut event_rx, &mut printer, settings).await?;
    interrupt.abort();

    let machine = ctl.shutdown().await?;
    while let Ok(event) = event_rx.try_recv() {
        printer.emit(&event);
    }

    let report = RunReport {
        lifecycle: machine.snapshot(),
        remaining_projects: registry.list_ids(),
        tally: printer.tally,
    };

    if let Some(tx) = printer.out_tx.as_ref() {
        match mode {
            OutputMode::Json => {
                let out = serde_json::to_string_pretty(&report)?;
                let _ = tx.send(OutputLine::Stdout(out));
            }
            OutputMode::Text => {
                for line in crate::text_summary::build_text_summary(&report).lines {
                    let _ = tx.send(OutputLine::Stdout(line));
                }
            }
            OutputMode::Silent => {}
        }
    }

    drop(printer.out_tx);
    if let Some(handle) = out_handle {
        let _ = handle.await;
    }
    Ok(report)
}

fn handle_exports(args: &Cli, report: &RunReport) -> Result<()> {
    if let Some(p) = args.export_json.as_deref() {
        let json = serde_json::to_string_pretty(report)?;
        std::fs::write(p, json).with_context(|| format!("failed to write {}", p.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use app_lifecycle::model::{Phase, PostCloseAction};

    const SCENARIO: &str = r#"{
        "projects": [
            {"id": "p1", "dirty": true},
            {"id": "p2"}
        ],
        "steps": [
            {"lifecycle": {"transition": "startup"}},
            {"lifecycle": {"transition": "create"}},
            {"lifecycle": {"transition": "init"}},
            {"lifecycle": {"transition": "webAppLoaded"}},
            {"saveAndClose": {"projectIds": ["p1", "p2"], "action": "UPDATE_APP_STATE"}},
            {"job": {"task": "Updating Software", "signals": [
                {"signal": "running"},
                {"signal": "subTask", "text": "Installing foo"},
                {"signal": "worked", "amount": 50.4},
                {"signal": "done"}
            ]}},
            {"lifecycle": {"transition": "saveState"}},
            {"lifecycle": {"transition": "suspend"}},
            {"lifecycle": {"transition": "shutdown"}}
        ]
    }"#;

    fn args(path: PathBuf) -> Cli {
        Cli::parse_from(["app-lifecycle", path.to_str().unwrap_or_default(), "--json", "--silent"])
    }

    #[test]
    fn silent_requires_json() {
        let cli = Cli::parse_from(["app-lifecycle", "s.json", "--silent"]);
        let rt = tokio::runtime::Runtime::new().unwrap();
        let err = rt.block_on(run(cli)).unwrap_err();
        assert!(err.to_string().contains("--silent"));
    }

    #[test]
    fn pending_save_is_answered_with_placeholders() {
        let outcome = SaveCloseOutcome::SavePending {
            project_ids: vec!["a".into(), "b".into()],
            action: PostCloseAction::Shutdown,
        };
        let Some(ShellCommand::HeadlessSaveAndClose(arr)) =
            answer_pending(&outcome, &Settings::default()).unwrap()
        else {
            panic!("expected a headless call");
        };
        let request = wire::decode(&arr).unwrap();
        assert_eq!(request.snapshots, vec!["<svg/>", "<svg/>"]);
        assert_eq!(request.action, PostCloseAction::Shutdown);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn replays_full_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scenario.json");
        std::fs::write(&path, SCENARIO).unwrap();
        let cli = args(path);
        let scenario = Scenario::load(&cli.scenario).unwrap();

        let report = run_scenario(&cli, &Settings::default(), scenario, OutputMode::Silent)
            .await
            .unwrap();

        assert_eq!(report.lifecycle.phase, Some(Phase::Shutdown));
        assert_eq!(report.lifecycle.history.len(), 7);
        assert!(report.tally.rejected.is_empty());
        assert!(report.remaining_projects.is_empty());
        assert_eq!(report.tally.reports.len(), 1);
        assert!(report.tally.reports[0].is_success());
        assert_eq!(report.tally.progress.len(), 3);
    }

    #[test]
    fn export_writes_report() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("report.json");
        let mut cli = args(dir.path().join("unused.json"));
        cli.export_json = Some(out.clone());
        let report = RunReport {
            lifecycle: app_lifecycle::model::LifecycleSnapshot {
                phase: None,
                last_transition: None,
                initialized: false,
                history: Vec::new(),
            },
            remaining_projects: vec!["p9".into()],
            tally: SessionTally::default(),
        };

        handle_exports(&cli, &report).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(out).unwrap()).unwrap();
        assert_eq!(value["remainingProjects"][0], "p9");
    }
}
