/// Canonical file paths for bridge data files.
///
/// Everything lives under %APPDATA%\McmBridge\:
///   - bridge.toml     Daemon configuration.
///   - status.toml     Written by the daemon, read by the web front end.
///   - mcm_bridge.log  Mirror of the install-root log.
///
/// `MCM_BRIDGE_HOME` overrides the directory; without `APPDATA` (non-Windows)
/// `$HOME/.config` is used instead.
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};

const APP_DIR_NAME: &str = "McmBridge";
pub const CONFIG_FILE_NAME: &str = "bridge.toml";
pub const STATUS_FILE_NAME: &str = "status.toml";
pub const LOG_FILE_NAME: &str = "mcm_bridge.log";

/// Returns the bridge application data directory.
pub fn app_data_dir() -> Result<PathBuf> {
    resolve_app_data_dir(|name| std::env::var_os(name).map(PathBuf::from))
}

fn resolve_app_data_dir(var: impl Fn(&str) -> Option<PathBuf>) -> Result<PathBuf> {
    if let Some(home) = var("MCM_BRIDGE_HOME") {
        return Ok(home);
    }
    if let Some(appdata) = var("APPDATA") {
        return Ok(appdata.join(APP_DIR_NAME));
    }
    if let Some(home) = var("HOME") {
        return Ok(home.join(".config").join(APP_DIR_NAME));
    }
    bail!("Neither APPDATA nor HOME is set; cannot locate the app data directory")
}

pub fn config_file_path(app_dir: &Path) -> PathBuf {
    app_dir.join(CONFIG_FILE_NAME)
}

pub fn status_file_path(app_dir: &Path) -> PathBuf {
    app_dir.join(STATUS_FILE_NAME)
}

pub fn log_file_path(app_dir: &Path) -> PathBuf {
    app_dir.join(LOG_FILE_NAME)
}

/// Directory containing the running executable, used when no install root
/// is configured.
pub fn executable_dir() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<PathBuf> {
        let map: HashMap<String, PathBuf> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), PathBuf::from(v)))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn override_wins() {
        let dir = resolve_app_data_dir(env(&[("MCM_BRIDGE_HOME", "/tmp/bridge"), ("APPDATA", "/a")])).unwrap();
        assert_eq!(dir, PathBuf::from("/tmp/bridge"));
    }

    #[test]
    fn appdata_dir_ends_with_app_name() {
        let dir = resolve_app_data_dir(env(&[("APPDATA", "/roaming"), ("HOME", "/home/u")])).unwrap();
        assert_eq!(dir, Path::new("/roaming").join("McmBridge"));
    }

    #[test]
    fn home_is_the_last_resort() {
        let dir = resolve_app_data_dir(env(&[("HOME", "/home/u")])).unwrap();
        assert_eq!(dir, Path::new("/home/u").join(".config").join("McmBridge"));
    }

    #[test]
    fn no_variables_is_an_error() {
        assert!(resolve_app_data_dir(env(&[])).is_err());
    }

    #[test]
    fn files_share_the_app_dir() {
        let app = Path::new("app");
        assert_eq!(config_file_path(app).file_name().unwrap(), CONFIG_FILE_NAME);
        assert_eq!(status_file_path(app).file_name().unwrap(), STATUS_FILE_NAME);
        assert_eq!(log_file_path(app).parent(), status_file_path(app).parent());
    }

    #[test]
    fn executable_dir_exists() {
        assert!(executable_dir().unwrap().is_dir());
    }
}
