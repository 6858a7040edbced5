use chrono::{DateTime, Local};

use crate::settings::Settings;

/// Outcome of one false→true trigger, reported by a flag synchronizer.
#[derive(Debug, Clone)]
pub struct TriggerReport {
    pub flag: String,
    pub action: String,
    /// Set when the bound action returned an error.
    pub action_error: Option<String>,
    /// Set when writing the flag back to `false` failed.
    pub reset_error: Option<String>,
    pub at: DateTime<Local>,
}

impl TriggerReport {
    pub fn succeeded(&self) -> bool {
        self.action_error.is_none() && self.reset_error.is_none()
    }
}

pub enum BridgeEvent {
    /// A watched flag flipped to `true` and its action ran.
    FlagTriggered(TriggerReport),
    /// The settings INI changed on disk and was successfully re-parsed.
    SettingsReloaded(Settings),
    /// The game executable appeared in the process list.
    GameStarted,
    /// The game executable exited.
    GameStopped,
    /// Ctrl+C received; the daemon should stop every synchronizer and exit.
    Shutdown,
}
