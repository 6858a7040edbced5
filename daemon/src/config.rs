use anyhow::{Context, Result};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const MIN_INTERVAL_SECS: u64 = 1;
pub const MAX_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_INTERVAL_SECS: u64 = 2;
pub const DEFAULT_MCM_URL: &str = "http://localhost:6050/";
pub const DEFAULT_GAME_PROCESS: &str = "SkyrimSE.exe";
/// Asset folder shipped next to the plugin DLLs, relative to the install root.
pub const ASSETS_DIR: &str = "OBody_NG_PDA_NG_Full_Assistance/Assets";

/// Root configuration structure. Deserialized from %APPDATA%\McmBridge\bridge.toml.
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub install: InstallationContext,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub sound: SoundConfig,
    #[serde(default)]
    pub activation: ActivationConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    /// Watched flags. Omitting the table entirely yields the stock set.
    #[serde(default = "default_flags")]
    pub flags: Vec<FlagConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            install: InstallationContext::default(),
            logging: LoggingConfig::default(),
            sound: SoundConfig::default(),
            activation: ActivationConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            flags: default_flags(),
        }
    }
}

impl Config {
    pub fn flag(&self, name: &str) -> Option<&FlagConfig> {
        self.flags.iter().find(|f| f.name == name)
    }
}

/// How the installation root was found.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    /// `root` was given in the config file.
    #[default]
    Configured,
    /// No root configured; the daemon executable's directory is used.
    ExecutableDir,
}

/// Resolved installation paths. Built once at startup and read-only afterwards.
#[derive(Debug, Deserialize, Clone)]
pub struct InstallationContext {
    #[serde(default)]
    pub detection_method: DetectionMethod,
    /// The plugin directory (`Data\SKSE\Plugins`). Relative paths resolve here.
    pub root: Option<PathBuf>,
    /// User settings INI written by the web front end.
    #[serde(default = "default_settings_ini")]
    pub settings_ini: PathBuf,
}

impl Default for InstallationContext {
    fn default() -> Self {
        Self {
            detection_method: DetectionMethod::default(),
            root: None,
            settings_ini: default_settings_ini(),
        }
    }
}

impl InstallationContext {
    /// Fills in `fallback` as the root when none was configured.
    pub fn located(mut self, fallback: impl FnOnce() -> Option<PathBuf>) -> Self {
        if self.root.is_none() {
            self.root = fallback();
            self.detection_method = DetectionMethod::ExecutableDir;
        }
        self
    }

    /// Expands `%VAR%` references, then joins relative paths onto the root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        let expanded = PathBuf::from(expand_env(&path.to_string_lossy()));
        if expanded.is_absolute() {
            return expanded;
        }
        match &self.root {
            Some(root) => root.join(expanded),
            None => expanded,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Every file receives the same lines. Relative entries resolve against the root.
    #[serde(default = "default_log_files")]
    pub files: Vec<PathBuf>,
    /// `error`, `warn`, `info`, `debug` or `trace`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            files: default_log_files(),
            level: default_log_level(),
        }
    }
}

impl LoggingConfig {
    /// Unknown level names fall back to `info`.
    pub fn level_filter(&self) -> LevelFilter {
        self.level.parse().unwrap_or(LevelFilter::Info)
    }
}

#[derive(Debug, Deserialize)]
pub struct SoundConfig {
    /// PowerShell helper that plays the WAV passed as its first argument.
    #[serde(default = "default_sound_script")]
    pub script: PathBuf,
}

impl Default for SoundConfig {
    fn default() -> Self {
        Self {
            script: default_sound_script(),
        }
    }
}

/// The `--activate` sequence.
#[derive(Debug, Deserialize)]
pub struct ActivationConfig {
    /// Name of the flag in `[[flags]]` that marks the host as active.
    #[serde(default = "default_host_flag")]
    pub host_flag: String,
    /// Launched when the host goes from inactive to active.
    #[serde(default = "default_start_script")]
    pub start_script: PathBuf,
    #[serde(default = "default_sound_file")]
    pub sound: Option<PathBuf>,
    /// Played once when the daemon starts, if the startup-sound setting is on.
    #[serde(default = "default_sound_file")]
    pub startup_sound: Option<PathBuf>,
    /// Used unless the host flag file carries `[Host] localhost`.
    #[serde(default = "default_mcm_url")]
    pub url: String,
    #[serde(default = "default_launch_delay_ms")]
    pub launch_delay_ms: u64,
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            host_flag: default_host_flag(),
            start_script: default_start_script(),
            sound: default_sound_file(),
            startup_sound: default_sound_file(),
            url: default_mcm_url(),
            launch_delay_ms: default_launch_delay_ms(),
        }
    }
}

impl ActivationConfig {
    pub fn launch_delay(&self) -> Duration {
        Duration::from_millis(self.launch_delay_ms)
    }
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Executable name matched case-insensitively against the process list.
    #[serde(default = "default_game_process")]
    pub process_name: String,
    #[serde(default = "default_heartbeat_log")]
    pub log_file: PathBuf,
    #[serde(default = "default_heartbeat_interval")]
    pub interval_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            process_name: default_game_process(),
            log_file: default_heartbeat_log(),
            interval_secs: default_heartbeat_interval(),
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.clamp(MIN_INTERVAL_SECS, MAX_INTERVAL_SECS))
    }
}

/// One watched boolean and the action bound to it.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct FlagConfig {
    pub name: String,
    pub file: PathBuf,
    pub section: String,
    pub key: String,
    /// Poll interval in seconds. Clamped to [1, 60].
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    /// Force the flag to `false` on disk before monitoring starts.
    #[serde(default)]
    pub reset_on_startup: bool,
    /// Omitted for state flags, whose value is only observed.
    #[serde(default)]
    pub action: Option<ActionConfig>,
}

impl FlagConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.clamp(MIN_INTERVAL_SECS, MAX_INTERVAL_SECS))
    }
}

/// Side effect of a flag, tagged by `kind` in TOML:
///
/// ```toml
/// [flags.action]
/// kind = "copy"
/// from = "a.json"
/// to = "b.json"
/// ```
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionConfig {
    Copy {
        from: PathBuf,
        to: PathBuf,
    },
    Script {
        script: PathBuf,
        #[serde(default)]
        args: Vec<String>,
    },
    /// Writes `false` to the named flag.
    ResetFlag {
        flag: String,
    },
    Sound {
        file: PathBuf,
    },
    Snapshot {
        plugins_txt: PathBuf,
        data_dir: PathBuf,
        output: PathBuf,
    },
    OpenUrl {
        url: String,
    },
}

/// Loads the config file at `path`, returning `Config::default()` if the file does not exist.
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Replaces `%NAME%` with the value of environment variable `NAME`. Unknown
/// variables are left as written.
pub fn expand_env(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find('%') {
        let after = &rest[start + 1..];
        let Some(len) = after.find('%') else {
            break;
        };
        let name = &after[..len];
        result.push_str(&rest[..start]);
        match std::env::var(name) {
            Ok(val) if !name.is_empty() => {
                result.push_str(&val);
                rest = &after[len + 1..];
            }
            _ => {
                // Keep the opening `%` and rescan from the closing one.
                result.push('%');
                result.push_str(name);
                rest = &after[len..];
            }
        }
    }
    result.push_str(rest);
    result
}

/// The stock flag set of a standard install.
pub fn default_flags() -> Vec<FlagConfig> {
    let assets = Path::new(ASSETS_DIR);
    let preset_json = "OBody_presetDistributionConfig.json";
    vec![
        FlagConfig {
            name: "host".to_string(),
            file: PathBuf::from("Act3_OBody_NG_PDA_NG.ini"),
            section: "Active".to_string(),
            key: "active_host".to_string(),
            interval_secs: 2,
            reset_on_startup: true,
            action: None,
        },
        FlagConfig {
            name: "mcm".to_string(),
            file: assets.join("ini").join("MCM.ini"),
            section: "Active_MCM".to_string(),
            key: "MCM".to_string(),
            interval_secs: 4,
            reset_on_startup: false,
            action: Some(ActionConfig::ResetFlag {
                flag: "host".to_string(),
            }),
        },
        FlagConfig {
            name: "json_master".to_string(),
            file: assets.join("ini").join("JsonMaster.ini"),
            section: "Act3_JSON".to_string(),
            key: "startAct3".to_string(),
            interval_secs: 1,
            reset_on_startup: false,
            action: Some(ActionConfig::Copy {
                from: PathBuf::from(preset_json),
                to: assets.join("Json").join(preset_json),
            }),
        },
        FlagConfig {
            name: "json_record".to_string(),
            file: assets.join("ini").join("JsonRecord.ini"),
            section: "Act4_JSON".to_string(),
            key: "startAct4".to_string(),
            interval_secs: 1,
            reset_on_startup: false,
            action: Some(ActionConfig::Copy {
                from: assets.join("Json").join(preset_json),
                to: PathBuf::from(preset_json),
            }),
        },
        FlagConfig {
            name: "plugin_list".to_string(),
            file: PathBuf::from("Act2_Manager.ini"),
            section: "Plugin_Outfits".to_string(),
            key: "Plugin_list".to_string(),
            interval_secs: 3,
            reset_on_startup: false,
            action: Some(ActionConfig::Snapshot {
                plugins_txt: PathBuf::from("%LOCALAPPDATA%/Skyrim Special Edition/plugins.txt"),
                data_dir: PathBuf::from("../.."),
                output: assets.join("Json").join("Act2_Plugins.json"),
            }),
        },
    ]
}

fn default_settings_ini() -> PathBuf {
    PathBuf::from("OBody_NG_Preset_Distribution_Assistant_NG.ini")
}

fn default_log_files() -> Vec<PathBuf> {
    vec![PathBuf::from("logs/OBody_NG_PDA_NG.log")]
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_sound_script() -> PathBuf {
    Path::new(ASSETS_DIR).join("OBody_Sound.ps1")
}

fn default_sound_file() -> Option<PathBuf> {
    Some(Path::new(ASSETS_DIR).join("Sound").join("miau-PDA.wav"))
}

fn default_host_flag() -> String {
    "host".to_string()
}

fn default_start_script() -> PathBuf {
    Path::new(ASSETS_DIR).join("startMCM.ps1")
}

fn default_mcm_url() -> String {
    DEFAULT_MCM_URL.to_string()
}

fn default_launch_delay_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

fn default_game_process() -> String {
    DEFAULT_GAME_PROCESS.to_string()
}

fn default_heartbeat_log() -> PathBuf {
    PathBuf::from("logs/OBody_NG_PDA_NG_heartbeat.log")
}

fn default_heartbeat_interval() -> u64 {
    3
}

fn default_interval() -> u64 {
    DEFAULT_INTERVAL_SECS
}
