//! Save-and-close orchestration and the command loop driving the lifecycle.
//!
//! This module owns the interactive and headless save-and-close protocols,
//! post-close dispatch, and the serialized controller that shells and
//! automation drivers talk to. Host collaborators are reached only through the
//! traits in [`host`].

mod controller;
pub mod host;
mod post_close;
mod save_close;
pub mod wire;

pub use controller::{spawn_controller, ControllerHandle, ShellCommand};
pub use save_close::{
    CloseReport, HeadlessReport, SaveCloseOrchestrator, SaveCloseOutcome, CLOSE_FAILED_TITLE,
    DEFAULT_PROGRESS_TITLE, EXECUTING_MESSAGE, EXECUTING_TITLE, SAVE_CLOSE_CHANNEL,
    SAVE_FAILED_TITLE,
};
