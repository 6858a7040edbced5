mod action;
mod activation;
mod config;
mod copy;
mod event;
mod flag;
mod heartbeat;
mod ini;
mod launcher;
mod logging;
mod paths;
mod settings;
mod snapshot;
mod sound;
mod status;
mod supervisor;
mod synchronizer;

use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use anyhow::{bail, Context, Result};
use log::{error, info, warn};
use tokio::sync::mpsc;

use crate::action::ActionDeps;
use crate::activation::ActivationOutcome;
use crate::config::{Config, FlagConfig, InstallationContext};
use crate::event::BridgeEvent;
use crate::flag::{FileLocks, WatchedFlag};
use crate::launcher::{ProcessLauncher, SystemLauncher};
use crate::settings::{Settings, SharedSettings};
use crate::sound::SoundAction;
use crate::supervisor::Supervisor;
use crate::synchronizer::FlagSynchronizer;

const USAGE: &str = "usage: mcm-bridge-daemon [--config <path>] [--activate]";

#[derive(Debug, Default, PartialEq)]
struct Args {
    config: Option<PathBuf>,
    activate: bool,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args> {
    let mut parsed = Args::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let path = args.next().context("--config needs a path")?;
                parsed.config = Some(PathBuf::from(path));
            }
            "--activate" => parsed.activate = true,
            other => bail!("unknown argument `{other}`"),
        }
    }
    Ok(parsed)
}

#[tokio::main]
async fn main() {
    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}\n{USAGE}");
            std::process::exit(2);
        }
    };

    // ── App data directory ────────────────────────────────────────────────────
    let app_dir = match paths::app_data_dir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = std::fs::create_dir_all(&app_dir) {
        eprintln!("Failed to create app data directory {}: {e}", app_dir.display());
        std::process::exit(1);
    }

    // ── Configuration ─────────────────────────────────────────────────────────
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| paths::config_file_path(&app_dir));
    let (mut config, config_error) = match config::load_or_default(&config_path) {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(format!("{e:#}"))),
    };
    config.install = std::mem::take(&mut config.install).located(paths::executable_dir);
    let ctx = config.install.clone();

    // ── Logging ───────────────────────────────────────────────────────────────
    let mut log_files: Vec<PathBuf> = config.logging.files.iter().map(|p| ctx.resolve(p)).collect();
    log_files.push(paths::log_file_path(&app_dir));
    if let Err(e) = logging::init(log_files, config.logging.level_filter()) {
        eprintln!("[logging] {e:#}");
    }
    if let Some(e) = &config_error {
        error!("[config] {e} (using defaults)");
    }
    info!(
        "mcm-bridge-daemon v{} (root: {}, detected via {:?})",
        env!("CARGO_PKG_VERSION"),
        ctx.root
            .as_deref()
            .map(|r| r.display().to_string())
            .unwrap_or_else(|| "<none>".to_string()),
        ctx.detection_method
    );

    // ── Settings and shared capabilities ──────────────────────────────────────
    let settings_path = ctx.resolve(&ctx.settings_ini);
    let initial_settings = settings::load(&settings_path, &Settings::default()).unwrap_or_else(|e| {
        warn!("[settings] {e:#} (using defaults)");
        Settings::default()
    });
    let shared_settings: SharedSettings = Arc::new(RwLock::new(initial_settings));
    let launcher: Arc<dyn ProcessLauncher> = Arc::new(SystemLauncher);
    let deps = ActionDeps {
        launcher,
        settings: shared_settings.clone(),
        sound_script: config.sound.script.clone(),
        copy_lock: Arc::new(Mutex::new(())),
        file_locks: FileLocks::new(),
    };

    if args.activate {
        let code = match tokio::task::block_in_place(|| activate(&config, &ctx, &deps)) {
            Ok(outcome) => {
                info!("[activate] Done: {outcome:?}");
                0
            }
            Err(e) => {
                error!("[activate] {e:#}");
                1
            }
        };
        std::process::exit(code);
    }

    // ── Initial status ────────────────────────────────────────────────────────
    let status_path = paths::status_file_path(&app_dir);
    let mut current_status = status::BridgeStatus::new(ctx.detection_method);
    current_status.error = config_error;
    status::write_status(&status_path, &current_status);

    let (event_tx, mut event_rx) = mpsc::channel::<BridgeEvent>(32);

    // ── Flag monitors ─────────────────────────────────────────────────────────
    let mut supervisor = build_supervisor(&config, &ctx, &deps, &event_tx);
    let started = supervisor.start_all();
    current_status.watched_flags = supervisor
        .names()
        .into_iter()
        .filter(|name| supervisor.is_running(name))
        .collect();
    current_status.state = status::BridgeState::Watching;
    status::write_status(&status_path, &current_status);

    // ── Background tasks ──────────────────────────────────────────────────────
    tokio::spawn(settings::watch_settings(
        settings_path,
        shared_settings.clone(),
        event_tx.clone(),
    ));

    let heartbeat_task = config.heartbeat.enabled.then(|| {
        tokio::spawn(heartbeat::run(
            config.heartbeat.process_name.clone(),
            heartbeat::HeartbeatLog::new(ctx.resolve(&config.heartbeat.log_file)),
            config.heartbeat.interval(),
            event_tx.clone(),
            supervisor.shutdown_token(),
        ))
    });

    // Graceful shutdown on Ctrl+C.
    {
        let tx = event_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(BridgeEvent::Shutdown).await;
            }
        });
    }

    if settings::snapshot(&shared_settings).startup_sound {
        if let Some(file) = &config.activation.startup_sound {
            let sound = SoundAction::new(
                "startup_sound",
                ctx.resolve(&config.sound.script),
                ctx.resolve(file),
                Arc::clone(&deps.launcher),
                shared_settings.clone(),
            );
            tokio::task::spawn_blocking(move || {
                if let Err(e) = sound.play() {
                    warn!("[startup_sound] {e:#}");
                }
            });
        }
    }

    settings::notice(
        &shared_settings,
        &format!("MCM bridge active: monitoring {started} flag(s)"),
    );

    // ── Event loop ────────────────────────────────────────────────────────────
    while let Some(evt) = event_rx.recv().await {
        match evt {
            BridgeEvent::FlagTriggered(report) => {
                current_status.record_trigger(&report);
                if report.succeeded() {
                    info!("[{}] {} done", report.flag, report.action);
                } else if let Some(e) = &current_status.error {
                    settings::notice(&shared_settings, &format!("MCM bridge error: {e}"));
                }
                status::write_status(&status_path, &current_status);
            }

            BridgeEvent::SettingsReloaded(new_settings) => {
                info!("[settings] Reloaded");
                settings::replace(&shared_settings, new_settings);
            }

            BridgeEvent::GameStarted => {
                current_status.game_running = true;
                status::write_status(&status_path, &current_status);
            }

            BridgeEvent::GameStopped => {
                current_status.game_running = false;
                status::write_status(&status_path, &current_status);
            }

            BridgeEvent::Shutdown => {
                info!("Shutting down");
                break;
            }
        }
    }

    supervisor.shutdown().await;
    if let Some(task) = heartbeat_task {
        let _ = task.await;
    }
    current_status.state = status::BridgeState::Stopped;
    current_status.game_running = false;
    status::write_status(&status_path, &current_status);
}

/// Builds one synchronizer per configured flag. A flag whose action or file
/// cannot be set up is logged and left out; the others still run.
fn build_supervisor(
    config: &Config,
    ctx: &InstallationContext,
    deps: &ActionDeps,
    events: &mpsc::Sender<BridgeEvent>,
) -> Supervisor {
    let mut supervisor = Supervisor::new();
    for flag_cfg in &config.flags {
        let added = build_synchronizer(flag_cfg, config, ctx, deps)
            .and_then(|sync| supervisor.add(sync.with_events(events.clone())));
        if let Err(e) = added {
            error!("[{}] Not monitored: {e:#}", flag_cfg.name);
        }
    }
    supervisor
}

fn build_synchronizer(
    flag_cfg: &FlagConfig,
    config: &Config,
    ctx: &InstallationContext,
    deps: &ActionDeps,
) -> Result<FlagSynchronizer> {
    let action = action::build(flag_cfg, &config.flags, ctx, deps)?;
    let flag = WatchedFlag::configure(
        ctx.resolve(&flag_cfg.file),
        &flag_cfg.section,
        &flag_cfg.key,
        action,
    )?
    .with_locks(&deps.file_locks);

    if flag_cfg.reset_on_startup && flag.read_value() {
        match flag.write_value(false) {
            Ok(()) => info!("[{}] Reset {} at startup", flag_cfg.name, flag.describe()),
            Err(e) => warn!("[{}] Startup reset failed: {e}", flag_cfg.name),
        }
    }

    Ok(FlagSynchronizer::new(flag_cfg.name.clone(), flag, flag_cfg.interval()))
}

fn activate(config: &Config, ctx: &InstallationContext, deps: &ActionDeps) -> Result<ActivationOutcome> {
    let host_name = &config.activation.host_flag;
    let host_cfg = config
        .flag(host_name)
        .with_context(|| format!("activation host flag `{host_name}` is not configured"))?;
    let host = WatchedFlag::configure(
        ctx.resolve(&host_cfg.file),
        &host_cfg.section,
        &host_cfg.key,
        None,
    )?
    .with_locks(&deps.file_locks);
    let sound = config.activation.sound.as_ref().map(|file| {
        SoundAction::new(
            "activation_sound",
            ctx.resolve(&config.sound.script),
            ctx.resolve(file),
            Arc::clone(&deps.launcher),
            deps.settings.clone(),
        )
    });
    activation::run(
        &host,
        &ctx.resolve(&config.activation.start_script),
        sound.as_ref(),
        &config.activation.url,
        deps.launcher.as_ref(),
        config.activation.launch_delay(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ActionConfig;
    use crate::launcher::testing::RecordingLauncher;

    fn args(list: &[&str]) -> Result<Args> {
        parse_args(list.iter().map(|s| s.to_string()))
    }

    fn test_deps(launcher: Arc<RecordingLauncher>) -> ActionDeps {
        ActionDeps {
            launcher,
            settings: Arc::new(RwLock::new(Settings::default())),
            sound_script: PathBuf::from("sound.ps1"),
            copy_lock: Arc::new(Mutex::new(())),
            file_locks: FileLocks::new(),
        }
    }

    fn rooted(root: &std::path::Path) -> InstallationContext {
        InstallationContext {
            root: Some(root.to_path_buf()),
            ..InstallationContext::default()
        }
    }

    // ── parse_args ────────────────────────────────────────────────────────────

    #[test]
    fn parse_args_defaults() {
        assert_eq!(args(&[]).unwrap(), Args::default());
    }

    #[test]
    fn parse_args_reads_config_and_activate() {
        let parsed = args(&["--activate", "--config", "C:/bridge.toml"]).unwrap();
        assert!(parsed.activate);
        assert_eq!(parsed.config, Some(PathBuf::from("C:/bridge.toml")));
    }

    #[test]
    fn parse_args_rejects_unknown_and_dangling() {
        assert!(args(&["--verbose"]).is_err());
        assert!(args(&["--config"]).is_err());
    }

    // ── build_supervisor ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn build_supervisor_applies_startup_reset_and_skips_bad_flags() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("host.ini"), "[Active]\nactive_host = true\n").unwrap();

        let mut config = Config::default();
        config.flags = vec![
            FlagConfig {
                name: "host".to_string(),
                file: PathBuf::from("host.ini"),
                section: "Active".to_string(),
                key: "active_host".to_string(),
                interval_secs: 2,
                reset_on_startup: true,
                action: None,
            },
            FlagConfig {
                name: "mcm".to_string(),
                file: PathBuf::from("MCM.ini"),
                section: "Active_MCM".to_string(),
                key: "MCM".to_string(),
                interval_secs: 4,
                reset_on_startup: false,
                action: Some(ActionConfig::ResetFlag {
                    flag: "missing".to_string(),
                }),
            },
        ];
        let (tx, _rx) = mpsc::channel(4);
        let deps = test_deps(Arc::new(RecordingLauncher::default()));

        let supervisor = build_supervisor(&config, &rooted(dir.path()), &deps, &tx);

        assert_eq!(supervisor.names(), ["host"]);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("host.ini")).unwrap(),
            "[Active]\nactive_host = false\n"
        );
    }

    // ── activate ──────────────────────────────────────────────────────────────

    /// Default config rooted at `root`, with the start script in place.
    fn activation_config(root: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.activation.sound = None;
        config.activation.launch_delay_ms = 0;
        let script = root.join(&config.activation.start_script);
        std::fs::create_dir_all(script.parent().unwrap()).unwrap();
        std::fs::write(&script, "Start-Process node").unwrap();
        config
    }

    fn start_script_launches(config: &Config, root: &std::path::Path, launcher: &RecordingLauncher) -> usize {
        let script = root.join(&config.activation.start_script).to_string_lossy().into_owned();
        launcher
            .requests()
            .iter()
            .filter(|r| r.args.contains(&script))
            .count()
    }

    #[test]
    fn activate_sets_configured_host_flag_and_launches_start_script() {
        let dir = tempfile::tempdir().unwrap();
        let host = dir.path().join("Act3_OBody_NG_PDA_NG.ini");
        std::fs::write(&host, "[Active]\nactive_host = false\n").unwrap();
        let config = activation_config(dir.path());
        let launcher = Arc::new(RecordingLauncher::default());

        let outcome = activate(&config, &rooted(dir.path()), &test_deps(launcher.clone())).unwrap();

        assert_eq!(outcome, ActivationOutcome::FirstActivation);
        assert!(std::fs::read_to_string(&host).unwrap().contains("active_host = true"));
        assert_eq!(launcher.requests().len(), 2);
        assert_eq!(start_script_launches(&config, dir.path(), &launcher), 1);
    }

    #[tokio::test]
    async fn host_stays_active_under_a_running_monitor() {
        let dir = tempfile::tempdir().unwrap();
        let root = rooted(dir.path());
        let host = dir.path().join("Act3_OBody_NG_PDA_NG.ini");
        std::fs::write(&host, "[Active]\nactive_host = false\n").unwrap();

        let mut config = activation_config(dir.path());
        config.flags.retain(|f| f.name == "host");
        config.flags[0].interval_secs = 1;
        let launcher = Arc::new(RecordingLauncher::default());
        let deps = test_deps(launcher.clone());
        let (tx, mut rx) = mpsc::channel(4);

        let mut supervisor = build_supervisor(&config, &root, &deps, &tx);
        assert_eq!(supervisor.start_all(), 1);

        let first = activate(&config, &root, &deps).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
        let second = activate(&config, &root, &deps).unwrap();
        supervisor.shutdown().await;

        assert_eq!(first, ActivationOutcome::FirstActivation);
        assert_eq!(second, ActivationOutcome::AlreadyActive);
        assert_eq!(start_script_launches(&config, dir.path(), &launcher), 1);
        assert_eq!(
            std::fs::read_to_string(&host).unwrap(),
            "[Active]\nactive_host = true\n"
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn activate_requires_known_host_flag() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.activation.host_flag = "nope".to_string();
        let deps = test_deps(Arc::new(RecordingLauncher::default()));
        assert!(activate(&config, &rooted(dir.path()), &deps).is_err());
    }
}
