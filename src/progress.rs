//! Progress event translator.
//!
//! Turns the free-form progress stream of a background job (software update,
//! install) into [`ProgressEvent`]s for the remote UI. Each job feeds its own
//! channel of [`JobSignal`]s; the translator only keeps the table of which jobs
//! currently have a registered monitor.

use crate::model::{ProgressEvent, ProgressStatus};
use crate::orchestrator::host::{emit_or_log, EventSink};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Channel name progress events are emitted on.
pub const PROGRESS_CHANNEL: &str = "ProgressEvent";
pub const CONTACTING_SITES_TASK: &str = "Contacting Software Sites";
pub const INSTALLING_TASK: &str = "Installing Software";
pub const UPDATING_TASK: &str = "Updating Software";

/// One callback of a job's progress stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "camelCase")]
pub enum JobSignal {
    Running,
    #[serde(rename_all = "camelCase")]
    BeginTask {
        name: String,
        total_work: f64,
    },
    SubTask {
        text: String,
    },
    Worked {
        amount: f64,
    },
    Done,
}

type StatusRule = fn(&str, &str) -> Option<ProgressStatus>;

fn is_task(task: &str, name: &str) -> bool {
    task.eq_ignore_ascii_case(name)
}

fn installing_rule(task: &str, subtask: &str) -> Option<ProgressStatus> {
    let install_task = is_task(task, INSTALLING_TASK) || is_task(task, UPDATING_TASK);
    let install_step = subtask.starts_with("Installing") || subtask.starts_with("Configuring");
    (install_task && install_step).then_some(ProgressStatus::Installing)
}

fn fetching_rule(_task: &str, subtask: &str) -> Option<ProgressStatus> {
    subtask
        .starts_with("Fetching")
        .then_some(ProgressStatus::Fetching)
}

fn contacting_rule(task: &str, _subtask: &str) -> Option<ProgressStatus> {
    is_task(task, CONTACTING_SITES_TASK).then_some(ProgressStatus::Fetching)
}

// Ordered: the first matching rule wins.
const STATUS_RULES: &[StatusRule] = &[installing_rule, fetching_rule, contacting_rule];

pub fn derive_status(task: &str, subtask: &str) -> ProgressStatus {
    STATUS_RULES
        .iter()
        .find_map(|rule| rule(task, subtask))
        .unwrap_or(ProgressStatus::Fetching)
}

/// Round raw progress to a whole percentage in `0..=100`.
pub fn round_progress(amount: f64) -> u8 {
    if !amount.is_finite() {
        return 0;
    }
    amount.round().clamp(0.0, 100.0) as u8
}

/// Per-job monitor state, touched only by that job's own signal sequence.
#[derive(Debug, Clone)]
pub struct JobMonitor {
    task: String,
    registered: bool,
    subtask: Option<String>,
}

impl JobMonitor {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            registered: false,
            subtask: None,
        }
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    /// Feed one signal; returns the event to emit, if any.
    pub fn observe(&mut self, signal: JobSignal) -> Option<ProgressEvent> {
        match signal {
            JobSignal::Running => {
                self.registered = true;
                self.subtask = None;
                Some(self.event(None, ProgressStatus::Started, 0))
            }
            JobSignal::Done => {
                self.registered = false;
                self.subtask = None;
                Some(self.event(None, ProgressStatus::Finished, 100))
            }
            _ if !self.registered => {
                tracing::trace!(job = %self.task, "ignoring signal without a registered monitor");
                None
            }
            JobSignal::BeginTask { name, total_work } => {
                tracing::debug!(job = %self.task, total_work, "begin {name}");
                None
            }
            JobSignal::SubTask { text } => {
                self.subtask = Some(text);
                None
            }
            JobSignal::Worked { amount } => {
                let subtask = self.subtask.clone();
                let status = derive_status(&self.task, subtask.as_deref().unwrap_or(""));
                Some(self.event(subtask, status, round_progress(amount)))
            }
        }
    }

    fn event(
        &self,
        subtask: Option<String>,
        status: ProgressStatus,
        progress: u8,
    ) -> ProgressEvent {
        ProgressEvent {
            task: self.task.clone(),
            subtask,
            status,
            progress,
        }
    }
}

/// Sender side of one job's progress stream.
pub struct JobHandle {
    pub id: u64,
    tx: mpsc::UnboundedSender<JobSignal>,
    handle: tokio::task::JoinHandle<usize>,
}

impl JobHandle {
    pub fn send(&self, signal: JobSignal) -> bool {
        self.tx.send(signal).is_ok()
    }

    /// Close the stream and wait for the pump; returns the number of events emitted.
    pub async fn finish(self) -> usize {
        drop(self.tx);
        self.handle.await.unwrap_or(0)
    }
}

pub struct ProgressTranslator {
    sink: Arc<dyn EventSink>,
    jobs: Arc<Mutex<BTreeMap<u64, String>>>,
    next_id: AtomicU64,
}

impl ProgressTranslator {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            jobs: Arc::new(Mutex::new(BTreeMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Jobs with a registered monitor, by job id.
    pub fn active_jobs(&self) -> Vec<(u64, String)> {
        self.jobs
            .lock()
            .iter()
            .map(|(id, task)| (*id, task.clone()))
            .collect()
    }

    /// Start translating a new job's stream on its own task. Requires a Tokio runtime.
    pub fn spawn_job(&self, task: impl Into<String>) -> JobHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel::<JobSignal>();
        let pump = JobPump {
            id,
            monitor: JobMonitor::new(task),
            sink: Arc::clone(&self.sink),
            jobs: Arc::clone(&self.jobs),
        };
        let handle = tokio::spawn(pump.run(rx));
        JobHandle { id, tx, handle }
    }
}

struct JobPump {
    id: u64,
    monitor: JobMonitor,
    sink: Arc<dyn EventSink>,
    jobs: Arc<Mutex<BTreeMap<u64, String>>>,
}

impl JobPump {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<JobSignal>) -> usize {
        let mut emitted = 0;
        while let Some(signal) = rx.recv().await {
            let Some(event) = self.monitor.observe(signal) else {
                continue;
            };
            match event.status {
                ProgressStatus::Started => {
                    self.jobs.lock().insert(self.id, self.monitor.task().to_string());
                }
                ProgressStatus::Finished => {
                    self.jobs.lock().remove(&self.id);
                }
                _ => {}
            }
            emit_or_log(self.sink.as_ref(), PROGRESS_CHANNEL, &event);
            emitted += 1;
        }
        // Stream ended without `Done`.
        if self.jobs.lock().remove(&self.id).is_some() {
            tracing::debug!(job = %self.monitor.task(), "job stream closed while running");
        }
        emitted
    }
}
