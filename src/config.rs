//! Settings file layer.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Passed to `init` when a request leaves it unset.
    pub check_for_updates: bool,
    /// `tracing` filter directive; `RUST_LOG` takes precedence.
    pub log_filter: String,
    /// Pause between scenario steps.
    #[serde(with = "humantime_serde")]
    pub step_delay: Duration,
    pub progress_title: String,
    /// Snapshot the driver renders when it stands in for the remote UI.
    pub snapshot_placeholder: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            check_for_updates: true,
            log_filter: "info".into(),
            step_delay: Duration::ZERO,
            progress_title: crate::orchestrator::DEFAULT_PROGRESS_TITLE.into(),
            snapshot_placeholder: "<svg/>".into(),
        }
    }
}

/// `<config dir>/app-lifecycle/settings.json`, if the platform has a config dir.
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("app-lifecycle").join("settings.json"))
}

pub fn read_from(path: &Path) -> Result<Settings> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read settings {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid settings in {}", path.display()))
}

/// An explicit path must exist; the default location is optional.
pub fn load(explicit: Option<&Path>) -> Result<Settings> {
    if let Some(path) = explicit {
        return read_from(path);
    }
    match default_path() {
        Some(path) if path.exists() => read_from(&path),
        _ => Ok(Settings::default()),
    }
}
