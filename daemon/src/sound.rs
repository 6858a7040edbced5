/// Notification sounds.
///
/// A sound is played by launching the PowerShell sound helper with the WAV
/// path as its argument. When volume control is enabled the helper's audio
/// session volume is adjusted shortly after launch, once WASAPI has had time
/// to create the session.
///
/// On non-Windows platforms the volume step logs a warning and the sound
/// still counts as played.
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use log::{info, warn};

use crate::action::TriggerAction;
use crate::launcher::{self, LaunchedProcess, ProcessLauncher};
use crate::settings::{self, SharedSettings};

/// Wait between launching the helper and looking for its audio session.
pub const VOLUME_APPLY_DELAY: Duration = Duration::from_millis(500);

pub struct SoundAction {
    name: String,
    script: PathBuf,
    sound: PathBuf,
    launcher: Arc<dyn ProcessLauncher>,
    settings: SharedSettings,
    volume_delay: Duration,
}

impl SoundAction {
    pub fn new(
        name: impl Into<String>,
        script: PathBuf,
        sound: PathBuf,
        launcher: Arc<dyn ProcessLauncher>,
        settings: SharedSettings,
    ) -> Self {
        Self {
            name: name.into(),
            script,
            sound,
            launcher,
            settings,
            volume_delay: VOLUME_APPLY_DELAY,
        }
    }

    #[cfg(test)]
    fn with_volume_delay(mut self, delay: Duration) -> Self {
        self.volume_delay = delay;
        self
    }

    /// Launches the helper and applies the configured volume.
    pub fn play(&self) -> Result<LaunchedProcess> {
        if !self.sound.is_file() {
            bail!("Sound file not found: {}", self.sound.display());
        }
        if !self.script.is_file() {
            bail!("Sound script not found: {}", self.script.display());
        }

        let arg = self.sound.to_string_lossy().into_owned();
        let child = self
            .launcher
            .launch(&launcher::powershell_script(&self.script, &[arg]))?;

        let current = settings::snapshot(&self.settings);
        if current.volume_control {
            std::thread::sleep(self.volume_delay);
            match set_process_volume(child.pid, current.sound_volume) {
                Ok(true) => info!(
                    "[{}] Sound volume set to {}% (PID {})",
                    self.name,
                    (current.sound_volume * 100.0).round() as u32,
                    child.pid
                ),
                Ok(false) => warn!("[{}] No audio session found for PID {}", self.name, child.pid),
                Err(e) => warn!("[{}] Could not set sound volume: {e}", self.name),
            }
        }

        info!("[{}] Played {}", self.name, self.sound.display());
        Ok(child)
    }
}

impl TriggerAction for SoundAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self) -> Result<()> {
        self.play().map(|_| ())
    }
}

/// Sets the master volume of every audio session owned by `pid` on the
/// default render endpoint. Returns `false` when the process has no session.
pub fn set_process_volume(pid: u32, level: f32) -> Result<bool> {
    let level = level.clamp(0.0, 1.0);
    #[cfg(windows)]
    {
        imp::set_process_volume(pid, level)
    }
    #[cfg(not(windows))]
    {
        let _ = (pid, level);
        bail!("Audio session volume (WASAPI) is only supported on Windows")
    }
}

// ── Windows implementation ────────────────────────────────────────────────────

#[cfg(windows)]
mod imp {
    use anyhow::{Context, Result};
    use windows::core::Interface;
    use windows::Win32::Media::Audio::{
        eConsole, eRender, IAudioSessionControl2, IAudioSessionManager2, IMMDeviceEnumerator,
        ISimpleAudioVolume, MMDeviceEnumerator,
    };
    use windows::Win32::System::Com::{
        CoCreateInstance, CoInitializeEx, CLSCTX_ALL, COINIT_MULTITHREADED,
    };

    pub fn set_process_volume(pid: u32, level: f32) -> Result<bool> {
        unsafe {
            // COM must be initialised on this thread.
            let _ = CoInitializeEx(None, COINIT_MULTITHREADED);

            let enumerator: IMMDeviceEnumerator =
                CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
                    .context("Failed to create IMMDeviceEnumerator")?;

            let device = enumerator
                .GetDefaultAudioEndpoint(eRender, eConsole)
                .context("Failed to get default audio render endpoint")?;

            let manager: IAudioSessionManager2 = device
                .Activate(CLSCTX_ALL, None)
                .context("Failed to activate IAudioSessionManager2")?;

            let sessions = manager
                .GetSessionEnumerator()
                .context("GetSessionEnumerator failed")?;

            let mut applied = false;
            for i in 0..sessions.GetCount()? {
                let control = sessions.GetSession(i)?;
                let control2: IAudioSessionControl2 = control.cast()?;
                if control2.GetProcessId().ok() != Some(pid) {
                    continue;
                }
                let volume: ISimpleAudioVolume = control.cast()?;
                volume
                    .SetMasterVolume(level, std::ptr::null())
                    .context("SetMasterVolume failed")?;
                applied = true;
            }
            Ok(applied)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::testing::RecordingLauncher;
    use crate::settings::Settings;
    use std::path::Path;
    use std::sync::RwLock;

    fn fixture(dir: &Path) -> (PathBuf, PathBuf) {
        let script = dir.join("sound.ps1");
        let wav = dir.join("miau-PDA.wav");
        std::fs::write(&script, "param($f)").unwrap();
        std::fs::write(&wav, b"RIFF").unwrap();
        (script, wav)
    }

    fn shared(settings: Settings) -> SharedSettings {
        Arc::new(RwLock::new(settings))
    }

    #[test]
    fn play_launches_helper_with_wav_argument() {
        let dir = tempfile::tempdir().unwrap();
        let (script, wav) = fixture(dir.path());
        let launcher = Arc::new(RecordingLauncher::default());

        let action = SoundAction::new("activation_sound", script, wav.clone(), launcher.clone(), shared(Settings::default()));
        action.run().unwrap();

        let wav_arg = wav.to_string_lossy().into_owned();
        let requests = launcher.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].args.last(), Some(&wav_arg));
    }

    #[test]
    fn missing_wav_is_an_error_and_launches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (script, _) = fixture(dir.path());
        let launcher = Arc::new(RecordingLauncher::default());

        let action = SoundAction::new("s", script, dir.path().join("nope.wav"), launcher.clone(), shared(Settings::default()));
        assert!(action.run().is_err());
        assert!(launcher.requests().is_empty());
    }

    #[test]
    fn missing_script_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (_, wav) = fixture(dir.path());
        let launcher = Arc::new(RecordingLauncher::default());

        let action = SoundAction::new("s", dir.path().join("none.ps1"), wav, launcher.clone(), shared(Settings::default()));
        assert!(action.run().is_err());
        assert!(launcher.requests().is_empty());
    }

    #[test]
    fn launch_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let (script, wav) = fixture(dir.path());
        let launcher = Arc::new(RecordingLauncher::failing());

        let action = SoundAction::new("s", script, wav, launcher, shared(Settings::default()));
        assert!(action.run().is_err());
    }

    #[test]
    fn volume_control_failure_does_not_fail_the_sound() {
        let dir = tempfile::tempdir().unwrap();
        let (script, wav) = fixture(dir.path());
        let launcher = Arc::new(RecordingLauncher::default());
        let settings = Settings {
            volume_control: true,
            sound_volume: 0.25,
            ..Settings::default()
        };

        let action = SoundAction::new("s", script, wav, launcher.clone(), shared(settings))
            .with_volume_delay(Duration::ZERO);
        // The fake PID has no audio session (or WASAPI is unavailable); either
        // way the sound itself was launched.
        assert!(action.play().is_ok());
        assert_eq!(launcher.requests().len(), 1);
    }

    #[cfg(not(windows))]
    #[test]
    fn set_process_volume_is_unsupported_off_windows() {
        let err = set_process_volume(1, 0.5).unwrap_err();
        assert!(err.to_string().contains("Windows"));
    }
}
