use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::DetectionMethod;
use crate::event::TriggerReport;

/// Current operational state of the daemon.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "lowercase")]
pub enum BridgeState {
    /// Configuration loaded; synchronizers not yet running.
    Starting,
    /// Synchronizers are polling their flag files.
    Watching,
    /// Every synchronizer has been joined.
    Stopped,
}

/// Runtime status written by the daemon to %APPDATA%\McmBridge\status.toml.
/// The web front end reads this file (read-only) to display bridge state.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BridgeStatus {
    /// Daemon binary version (set from Cargo.toml at compile time).
    pub version: String,
    pub state: BridgeState,
    /// How the installation root was found.
    pub detection_method: DetectionMethod,
    /// Names of the flags currently being monitored.
    pub watched_flags: Vec<String>,
    pub game_running: bool,
    /// Name of the most recently triggered flag, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_trigger: Option<String>,
    /// Action run by that trigger.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_action: Option<String>,
    /// RFC 3339 timestamp of the most recent trigger, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_trigger_timestamp: Option<String>,
    /// Human-readable error message if the last trigger or startup step failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BridgeStatus {
    /// Constructs the initial status on daemon startup.
    pub fn new(detection_method: DetectionMethod) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            state: BridgeState::Starting,
            detection_method,
            watched_flags: Vec::new(),
            game_running: false,
            last_trigger: None,
            last_action: None,
            last_trigger_timestamp: None,
            error: None,
        }
    }

    /// Records a trigger. A failed action or reset becomes the current error;
    /// a clean trigger clears it.
    pub fn record_trigger(&mut self, report: &TriggerReport) {
        self.last_trigger = Some(report.flag.clone());
        self.last_action = Some(report.action.clone());
        self.last_trigger_timestamp = Some(report.at.to_rfc3339());
        self.error = match (&report.action_error, &report.reset_error) {
            (Some(e), _) => Some(format!("{}: {e}", report.flag)),
            (None, Some(e)) => Some(format!("{}: reset failed: {e}", report.flag)),
            (None, None) => None,
        };
    }
}

/// Serializes `status` to TOML and writes it to `path`.
/// Creates the parent directory if it does not exist.
/// Failures are logged; a status write never stops the daemon.
pub fn write_status(path: &Path, status: &BridgeStatus) {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            log::error!("[status] Failed to create directory {}: {e}", parent.display());
            return;
        }
    }
    match toml::to_string_pretty(status) {
        Ok(content) => {
            if let Err(e) = std::fs::write(path, content) {
                log::error!("[status] Failed to write status file: {e}");
            }
        }
        Err(e) => log::error!("[status] Failed to serialize status: {e}"),
    }
}
