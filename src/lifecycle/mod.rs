//! Session lifecycle state machine.
//!
//! One [`LifecycleStateMachine`] per session, owned by the host shell and passed
//! explicitly. Every guarded transition consults the legal-predecessor table in
//! [`table`] before touching state.

mod machine;
pub mod table;

pub use machine::{
    LifecycleHooks, LifecycleStateMachine, LocalStateReader, NoopHooks, TransitionRequest,
};
