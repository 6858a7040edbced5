/// User-facing settings written by the web front end into the settings INI.
///
///   [Advanced_MCM]      startup             = true   ; play the startup sound
///   [Top Notifications] visible             = true   ; show notices
///   [Volume Control]    SoundVolume         = 0.8    ; 0.0 – 1.0
///   [Volume Control]    MasterVolumeEnabled = false
///
/// The file is watched for changes and re-parsed on every write.
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use log::info;
use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::event::BridgeEvent;
use crate::ini::IniDocument;

pub type SharedSettings = Arc<RwLock<Settings>>;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub startup_sound: bool,
    pub top_notifications: bool,
    /// Helper-script volume in `[0.0, 1.0]`.
    pub sound_volume: f32,
    /// Whether `sound_volume` is applied to the helper's audio session.
    pub volume_control: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            startup_sound: true,
            top_notifications: true,
            sound_volume: 1.0,
            volume_control: false,
        }
    }
}

impl Settings {
    /// Applies the values present in `doc` on top of `self`.
    ///
    /// Missing keys keep their current value; a volume that does not parse or
    /// falls outside `[0, 1]` is ignored.
    pub fn merged_with(&self, doc: &IniDocument) -> Self {
        let mut next = self.clone();
        if let Some(v) = doc.get_bool("Advanced_MCM", "startup") {
            next.startup_sound = v;
        }
        if let Some(v) = doc.get_bool("Top Notifications", "visible") {
            next.top_notifications = v;
        }
        if let Some(v) = doc
            .get("Volume Control", "SoundVolume")
            .and_then(|raw| raw.parse::<f32>().ok())
            .filter(|v| (0.0..=1.0).contains(v))
        {
            next.sound_volume = v;
        }
        if let Some(v) = doc.get_bool("Volume Control", "MasterVolumeEnabled") {
            next.volume_control = v;
        }
        next
    }

    /// Human-readable list of what differs between `self` and `other`.
    pub fn changes_from(&self, other: &Settings) -> Vec<String> {
        let mut changes = Vec::new();
        if self.startup_sound != other.startup_sound {
            changes.push(format!("startup sound {}", on_off(self.startup_sound)));
        }
        if self.top_notifications != other.top_notifications {
            changes.push(format!("top notifications {}", on_off(self.top_notifications)));
        }
        if self.sound_volume != other.sound_volume || self.volume_control != other.volume_control {
            changes.push(format!(
                "volume {}% ({})",
                (self.sound_volume * 100.0).round() as u32,
                on_off(self.volume_control)
            ));
        }
        changes
    }
}

/// Loads settings from `path` on top of `base`. A missing file yields `base`.
pub fn load(path: &Path, base: &Settings) -> Result<Settings> {
    if !path.exists() {
        return Ok(base.clone());
    }
    let doc = IniDocument::load(path)
        .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
    Ok(base.merged_with(&doc))
}

/// Clones the current settings out of the shared lock.
pub fn snapshot(shared: &SharedSettings) -> Settings {
    match shared.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// Replaces the shared settings and logs what changed.
pub fn replace(shared: &SharedSettings, next: Settings) {
    let mut guard = match shared.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    for change in next.changes_from(&guard) {
        info!("[settings] {change}");
    }
    *guard = next;
}

/// Shows a notice to the user unless notifications are turned off.
pub fn notice(shared: &SharedSettings, message: &str) {
    if snapshot(shared).top_notifications {
        println!("{message}");
    }
    info!("[notice] {message}");
}

/// Watches the parent directory of `path`. Whenever the settings file is
/// created or modified, re-parses it and sends a `SettingsReloaded` event.
pub async fn watch_settings(path: PathBuf, shared: SharedSettings, tx: mpsc::Sender<BridgeEvent>) {
    let (watch_tx, mut watch_rx) = mpsc::channel::<notify::Event>(16);

    let mut watcher = match RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = watch_tx.blocking_send(event);
            }
        },
        NotifyConfig::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            log::error!("[settings] Failed to create file watcher: {e}");
            return;
        }
    };

    // Watch the directory rather than the file so editor-style atomic saves
    // (write-new + rename) are seen.
    let watch_dir = match path.parent() {
        Some(d) if d.is_dir() => d.to_path_buf(),
        _ => {
            log::warn!("[settings] Settings directory not found; not watching {}", path.display());
            return;
        }
    };

    if let Err(e) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
        log::error!("[settings] Failed to watch settings directory: {e}");
        return;
    }

    while let Some(event) = watch_rx.recv().await {
        let affects_settings = event.paths.iter().any(|p| p == path.as_path());
        let is_write = matches!(
            event.kind,
            notify::EventKind::Create(_) | notify::EventKind::Modify(_)
        );

        if affects_settings && is_write {
            let current = snapshot(&shared);
            match load(&path, &current) {
                Ok(settings) if settings != current => {
                    if tx.send(BridgeEvent::SettingsReloaded(settings)).await.is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => log::error!("[settings] Failed to reload settings: {e}"),
            }
        }
    }
}

fn on_off(value: bool) -> &'static str {
    if value {
        "enabled"
    } else {
        "disabled"
    }
}
