//! Session lifecycle for an embedded application shell.
//!
//! The crate tracks the shell's lifecycle phases, coordinates saving and
//! closing of open projects with the remote UI, and translates background
//! job progress into UI events.

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod model;
pub mod orchestrator;
pub mod progress;
pub mod scenario;

pub use error::{LifecycleError, ProjectFailure, WireError};
pub use lifecycle::{LifecycleHooks, LifecycleStateMachine, TransitionRequest};
pub use model::{Phase, PostCloseAction, SessionEvent, Transition};
pub use orchestrator::{SaveCloseOrchestrator, SaveCloseOutcome};
