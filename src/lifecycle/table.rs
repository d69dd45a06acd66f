//! Legal-predecessor table.
//!
//! Single source of truth for which phase a transition may be invoked from.
//! `None` stands for the pristine state before the first `startup`.

use crate::model::{Phase, Transition};

/// Phases (or the pristine state) from which `transition` is legal.
pub fn legal_predecessors(transition: Transition) -> &'static [Option<Phase>] {
    match transition {
        Transition::Startup => &[None],
        Transition::Create => &[Some(Phase::Startup)],
        Transition::Init => &[Some(Phase::Create), Some(Phase::Suspend)],
        Transition::WebAppLoaded => &[Some(Phase::Init)],
        Transition::SaveState => &[Some(Phase::WebAppLoaded)],
        Transition::Reload => &[Some(Phase::WebAppLoaded)],
        Transition::Suspend => &[Some(Phase::SaveState)],
        Transition::Shutdown => &[
            Some(Phase::Startup),
            Some(Phase::Create),
            Some(Phase::Init),
            Some(Phase::Suspend),
        ],
        Transition::ForceShutdown => &[
            None,
            Some(Phase::Startup),
            Some(Phase::Create),
            Some(Phase::Init),
            Some(Phase::WebAppLoaded),
            Some(Phase::SaveState),
            Some(Phase::Suspend),
            Some(Phase::Shutdown),
        ],
    }
}

pub fn is_legal(transition: Transition, current: Option<Phase>) -> bool {
    legal_predecessors(transition).contains(&current)
}

/// Fold a sequence of transitions over the table, stopping at the first illegal one.
///
/// Returns the phase reached and the index of the rejected transition, if any.
/// `init` repeated while in `INIT` is accepted as a no-op.
pub fn fold(start: Option<Phase>, transitions: &[Transition]) -> (Option<Phase>, Option<usize>) {
    let mut current = start;
    for (i, t) in transitions.iter().copied().enumerate() {
        if t == Transition::Init && current == Some(Phase::Init) {
            continue;
        }
        if !is_legal(t, current) {
            return (current, Some(i));
        }
        current = Some(t.target());
    }
    (current, None)
}
