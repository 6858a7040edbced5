/// Trigger actions: the side effect a [`WatchedFlag`](crate::flag::WatchedFlag)
/// runs when it flips from `false` to `true`.
///
/// Actions never see the flag that triggered them; everything they touch is
/// captured when they are built from configuration.
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use log::info;

use crate::config::{ActionConfig, FlagConfig, InstallationContext};
use crate::copy::CopyFileAction;
use crate::flag::{FileLocks, WatchedFlag};
use crate::launcher::{self, ProcessLauncher};
use crate::settings::SharedSettings;
use crate::snapshot::SnapshotAction;
use crate::sound::SoundAction;

/// A unit of work bound to a watched flag.
pub trait TriggerAction: Send + Sync {
    /// Identifier used in logs and trigger reports.
    fn name(&self) -> &str;

    /// Performs the side effect. Runs on a blocking thread.
    fn run(&self) -> Result<()>;

    /// Value written back to the flag after the action, whatever its outcome.
    fn reset_value(&self) -> bool {
        false
    }
}

/// Closure-backed action.
#[cfg(test)]
pub struct FnAction<F> {
    name: String,
    f: F,
}

#[cfg(test)]
pub fn from_fn<F>(name: impl Into<String>, f: F) -> FnAction<F>
where
    F: Fn() -> Result<()> + Send + Sync,
{
    FnAction {
        name: name.into(),
        f,
    }
}

#[cfg(test)]
impl<F> TriggerAction for FnAction<F>
where
    F: Fn() -> Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self) -> Result<()> {
        (self.f)()
    }
}

/// Writes `false` to another flag (the MCM flag clears the host flag this way).
pub struct ResetFlagAction {
    name: String,
    target: WatchedFlag,
}

impl ResetFlagAction {
    pub fn new(name: impl Into<String>, target: WatchedFlag) -> Self {
        Self {
            name: name.into(),
            target,
        }
    }
}

impl TriggerAction for ResetFlagAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self) -> Result<()> {
        self.target
            .write_value(false)
            .with_context(|| format!("Failed to reset {}", self.target.describe()))?;
        info!("[{}] {} reset to false", self.name, self.target.describe());
        Ok(())
    }
}

/// Launches a PowerShell script and does not wait for it.
pub struct ScriptAction {
    name: String,
    script: PathBuf,
    args: Vec<String>,
    launcher: Arc<dyn ProcessLauncher>,
}

impl ScriptAction {
    pub fn new(
        name: impl Into<String>,
        script: PathBuf,
        args: Vec<String>,
        launcher: Arc<dyn ProcessLauncher>,
    ) -> Self {
        Self {
            name: name.into(),
            script,
            args,
            launcher,
        }
    }
}

impl TriggerAction for ScriptAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self) -> Result<()> {
        if !self.script.exists() {
            anyhow::bail!("Script not found: {}", self.script.display());
        }
        let request = launcher::powershell_script(&self.script, &self.args);
        let child = self.launcher.launch(&request)?;
        info!(
            "[{}] Launched {} (PID {})",
            self.name,
            self.script.display(),
            child.pid
        );
        Ok(())
    }
}

/// Opens a URL in the default browser.
pub struct OpenUrlAction {
    name: String,
    url: String,
    launcher: Arc<dyn ProcessLauncher>,
}

impl OpenUrlAction {
    pub fn new(name: impl Into<String>, url: String, launcher: Arc<dyn ProcessLauncher>) -> Self {
        Self {
            name: name.into(),
            url,
            launcher,
        }
    }
}

impl TriggerAction for OpenUrlAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self) -> Result<()> {
        self.launcher
            .launch(&launcher::open_url(&self.url))
            .with_context(|| format!("Failed to open {}", self.url))?;
        info!("[{}] Opened {}", self.name, self.url);
        Ok(())
    }
}

/// Shared capabilities handed to [`build`].
#[derive(Clone)]
pub struct ActionDeps {
    pub launcher: Arc<dyn ProcessLauncher>,
    pub settings: SharedSettings,
    pub sound_script: PathBuf,
    /// Serializes the copy actions: the JSON master and record flags move the
    /// same pair of files in opposite directions.
    pub copy_lock: Arc<Mutex<()>>,
    /// Flags on the same file, including `reset_flag` targets, share a lock.
    pub file_locks: FileLocks,
}

/// Builds the action bound to `flag`; `None` for a state flag.
///
/// `reset_flag` actions look their target up in `all_flags` by name.
pub fn build(
    flag: &FlagConfig,
    all_flags: &[FlagConfig],
    ctx: &InstallationContext,
    deps: &ActionDeps,
) -> Result<Option<Arc<dyn TriggerAction>>> {
    let Some(config) = &flag.action else {
        return Ok(None);
    };
    let name = flag.name.clone();
    let action: Arc<dyn TriggerAction> = match config {
        ActionConfig::Copy { from, to } => Arc::new(CopyFileAction::new(
            name,
            ctx.resolve(from),
            ctx.resolve(to),
            Arc::clone(&deps.copy_lock),
        )),
        ActionConfig::Script { script, args } => Arc::new(ScriptAction::new(
            name,
            ctx.resolve(script),
            args.clone(),
            Arc::clone(&deps.launcher),
        )),
        ActionConfig::ResetFlag { flag: target } => {
            let target_cfg = all_flags
                .iter()
                .find(|f| f.name == *target)
                .with_context(|| format!("reset_flag target `{target}` is not a configured flag"))?;
            let target_flag = WatchedFlag::configure(
                ctx.resolve(&target_cfg.file),
                &target_cfg.section,
                &target_cfg.key,
                None,
            )?
            .with_locks(&deps.file_locks);
            Arc::new(ResetFlagAction::new(name, target_flag))
        }
        ActionConfig::Sound { file } => Arc::new(SoundAction::new(
            name,
            ctx.resolve(&deps.sound_script),
            ctx.resolve(file),
            Arc::clone(&deps.launcher),
            deps.settings.clone(),
        )),
        ActionConfig::Snapshot {
            plugins_txt,
            data_dir,
            output,
        } => Arc::new(SnapshotAction::new(
            name,
            ctx.resolve(plugins_txt),
            ctx.resolve(data_dir),
            ctx.resolve(output),
        )),
        ActionConfig::OpenUrl { url } => Arc::new(OpenUrlAction::new(
            name,
            url.clone(),
            Arc::clone(&deps.launcher),
        )),
    };
    Ok(Some(action))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::testing::RecordingLauncher;
    use crate::settings::Settings;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::RwLock;

    fn deps(launcher: Arc<RecordingLauncher>) -> ActionDeps {
        ActionDeps {
            launcher,
            settings: Arc::new(RwLock::new(Settings::default())),
            sound_script: PathBuf::from("Assets/sound.ps1"),
            copy_lock: Arc::new(Mutex::new(())),
            file_locks: FileLocks::new(),
        }
    }

    fn ctx(root: &std::path::Path) -> InstallationContext {
        InstallationContext {
            root: Some(root.to_path_buf()),
            ..InstallationContext::default()
        }
    }

    fn flag(name: &str, file: &str, section: &str, key: &str, action: Option<ActionConfig>) -> FlagConfig {
        FlagConfig {
            name: name.to_string(),
            file: PathBuf::from(file),
            section: section.to_string(),
            key: key.to_string(),
            interval_secs: 1,
            reset_on_startup: false,
            action,
        }
    }

    #[test]
    fn fn_action_runs_closure() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let action = from_fn("count", move || {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        action.run().unwrap();
        action.run().unwrap();
        assert_eq!(action.name(), "count");
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(!action.reset_value());
    }

    #[test]
    fn reset_flag_action_clears_target() {
        let dir = tempfile::tempdir().unwrap();
        let host = dir.path().join("host.ini");
        std::fs::write(&host, "[Active]\nactive_host = true\n").unwrap();

        let target = WatchedFlag::configure(host.clone(), "Active", "active_host", None).unwrap();
        ResetFlagAction::new("mcm", target).run().unwrap();

        assert_eq!(
            std::fs::read_to_string(&host).unwrap(),
            "[Active]\nactive_host = false\n"
        );
    }

    #[test]
    fn script_action_missing_script_does_not_launch() {
        let launcher = Arc::new(RecordingLauncher::default());
        let action = ScriptAction::new(
            "host",
            PathBuf::from("/definitely/missing/startMCM.ps1"),
            vec![],
            launcher.clone(),
        );
        assert!(action.run().is_err());
        assert!(launcher.requests().is_empty());
    }

    #[test]
    fn script_action_launches_powershell() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("startMCM.ps1");
        std::fs::write(&script, "Write-Host hi").unwrap();

        let launcher = Arc::new(RecordingLauncher::default());
        ScriptAction::new("host", script.clone(), vec!["-Port".into(), "6050".into()], launcher.clone())
            .run()
            .unwrap();

        let requests = launcher.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].args.contains(&script.to_string_lossy().into_owned()));
        assert_eq!(requests[0].args.last().map(String::as_str), Some("6050"));
    }

    #[test]
    fn build_resolves_reset_flag_target_by_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("host.ini"), "[Active]\nactive_host = true\n").unwrap();

        let flags = vec![
            flag("host", "host.ini", "Active", "active_host", None),
            flag("mcm", "MCM.ini", "Active_MCM", "MCM", Some(ActionConfig::ResetFlag { flag: "host".into() })),
        ];
        let launcher = Arc::new(RecordingLauncher::default());
        let deps = deps(launcher);
        assert!(build(&flags[0], &flags, &ctx(dir.path()), &deps).unwrap().is_none());
        let action = build(&flags[1], &flags, &ctx(dir.path()), &deps).unwrap().unwrap();
        assert_eq!(action.name(), "mcm");

        action.run().unwrap();
        let text = std::fs::read_to_string(dir.path().join("host.ini")).unwrap();
        assert!(text.contains("active_host = false"));
    }

    #[test]
    fn build_rejects_unknown_reset_target() {
        let dir = tempfile::tempdir().unwrap();
        let flags = vec![flag(
            "mcm",
            "MCM.ini",
            "Active_MCM",
            "MCM",
            Some(ActionConfig::ResetFlag { flag: "nope".into() }),
        )];
        let launcher = Arc::new(RecordingLauncher::default());
        assert!(build(&flags[0], &flags, &ctx(dir.path()), &deps(launcher)).is_err());
    }

    #[test]
    fn open_url_action_uses_launcher() {
        let launcher = Arc::new(RecordingLauncher::default());
        OpenUrlAction::new("web", "http://localhost:6050".into(), launcher.clone())
            .run()
            .unwrap();
        let requests = launcher.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].args.iter().any(|a| a == "http://localhost:6050"));
    }
}
