/// The "open MCM" sequence run by `--activate`.
///
/// If the host is not active yet, the host flag is set to `true`, the start
/// script is launched, and the browser is opened after a short delay to give
/// the server time to come up. If the host is already active the browser is
/// opened straight away. The host flag stays `true` until the MCM flag or the
/// startup reset clears it.
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::{info, warn};

use crate::flag::WatchedFlag;
use crate::ini::IniDocument;
use crate::launcher::{open_url, powershell_script, ProcessLauncher};
use crate::sound::SoundAction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationOutcome {
    /// The host flag was `false`; it has been set and the start script launched.
    FirstActivation,
    AlreadyActive,
}

/// `[Host] localhost` in the host flag file overrides the configured URL.
pub fn host_url(host_file: &Path) -> Option<String> {
    let doc = IniDocument::load(host_file).ok()?;
    doc.get("Host", "localhost")
        .filter(|url| !url.is_empty())
        .map(str::to_string)
}

pub fn run(
    host: &WatchedFlag,
    start_script: &Path,
    sound: Option<&SoundAction>,
    default_url: &str,
    launcher: &dyn ProcessLauncher,
    launch_delay: Duration,
) -> Result<ActivationOutcome> {
    if let Some(sound) = sound {
        if let Err(e) = sound.play() {
            warn!("[activate] Activation sound failed: {e:#}");
        }
    }

    let url = host_url(host.file_path()).unwrap_or_else(|| default_url.to_string());

    let outcome = if host.read_value() {
        info!("[activate] Host already active");
        ActivationOutcome::AlreadyActive
    } else {
        if !start_script.exists() {
            bail!("Start script not found: {}", start_script.display());
        }
        host.write_value(true)
            .with_context(|| format!("Failed to activate host via {}", host.describe()))?;
        let child = match launcher.launch(&powershell_script(start_script, &[])) {
            Ok(child) => child,
            Err(e) => {
                if let Err(reset) = host.write_value(false) {
                    warn!("[activate] Could not clear {} after failed launch: {reset}", host.describe());
                }
                return Err(e.context(format!("Failed to launch {}", start_script.display())));
            }
        };
        info!(
            "[activate] Host activated; launched {} (PID {}), opening {url} in {}ms",
            start_script.display(),
            child.pid,
            launch_delay.as_millis()
        );
        std::thread::sleep(launch_delay);
        ActivationOutcome::FirstActivation
    };

    launcher
        .launch(&open_url(&url))
        .with_context(|| format!("Failed to open {url}"))?;
    info!("[activate] Opened {url}");
    Ok(outcome)
}
