//! Post-close dispatch.
//!
//! Runs the requested follow-up once a save-and-close batch finished without failure.

use super::host::{Host, ShellHooks};
use crate::model::PostCloseAction;

pub(crate) fn perform(action: PostCloseAction, shell: &dyn ShellHooks) -> anyhow::Result<()> {
    match action {
        PostCloseAction::SwitchPerspective => shell.switch_perspective(),
        PostCloseAction::Shutdown => shell.close(),
        PostCloseAction::UpdateAppState => shell.app_state_changed(),
    }
}

/// Schedule `action` on the UI thread. Failures are logged; the batch already succeeded.
pub(crate) fn dispatch(action: PostCloseAction, host: &Host) {
    let shell = host.shell.clone();
    host.ui.run_on_ui(Box::new(move || {
        if let Err(e) = perform(action, shell.as_ref()) {
            tracing::warn!(%action, "post-close action failed: {e:#}");
        } else {
            tracing::info!(%action, "post-close action performed");
        }
    }));
}
