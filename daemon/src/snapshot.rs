/// Plugin load-order snapshot written for the web front end.
///
/// The load order comes from `plugins.txt` (active entries are prefixed with
/// `*`), preceded by the base-game masters the engine always loads. Each
/// trigger regenerates the whole JSON file.
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Serialize, Serializer};

use crate::action::TriggerAction;

/// Loaded implicitly, in this order, whenever present in the data directory.
pub const IMPLICIT_MASTERS: [&str; 5] = [
    "Skyrim.esm",
    "Update.esm",
    "Dawnguard.esm",
    "HearthFires.esm",
    "Dragonborn.esm",
];

/// Full plugins occupy `0x00..=0xFD`; `0xFE` is shared by light plugins.
const MAX_FULL_INDEX: u16 = 0xFD;
const MAX_LIGHT_INDEX: u16 = 0xFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    Master,
    Plugin,
    Light,
}

impl PluginKind {
    pub fn from_name(name: &str) -> Option<Self> {
        let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "esm" => Some(Self::Master),
            "esp" => Some(Self::Plugin),
            "esl" => Some(Self::Light),
            _ => None,
        }
    }
}

/// Load-order slot, serialized as `0x0A` or `0xFE00A`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadIndex {
    Full(u8),
    Light(u16),
}

impl fmt::Display for LoadIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadIndex::Full(i) => write!(f, "0x{i:02X}"),
            LoadIndex::Light(i) => write!(f, "0xFE{i:03X}"),
        }
    }
}

impl Serialize for LoadIndex {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginEntry {
    pub plugin_name: String,
    pub kind: PluginKind,
    pub load_index: LoadIndex,
    pub file_size: u64,
}

#[derive(Debug, Serialize)]
pub struct PluginSnapshot {
    /// `YYYY-MM-DD HH:MM:SS`, local time.
    pub timestamp: String,
    pub total_plugins: usize,
    pub total_bytes: u64,
    pub plugins: Vec<PluginEntry>,
}

/// Active plugin names from a `plugins.txt` body, in file order.
pub fn parse_load_order(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter_map(|line| line.strip_prefix('*'))
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

/// Reads `plugins_txt` and returns the full load order with the implicit
/// masters that exist in `data_dir` prepended.
pub fn read_load_order(plugins_txt: &Path, data_dir: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(plugins_txt)
        .with_context(|| format!("Failed to read load order: {}", plugins_txt.display()))?;
    let listed = parse_load_order(&text);

    let mut order: Vec<String> = IMPLICIT_MASTERS
        .iter()
        .filter(|m| data_dir.join(m).is_file())
        .map(|m| m.to_string())
        .collect();
    for name in listed {
        if !order.iter().any(|o| o.eq_ignore_ascii_case(&name)) {
            order.push(name);
        }
    }
    Ok(order)
}

/// Assigns load indices and file sizes. Plugins missing from `data_dir` or
/// beyond the index space are skipped with a warning.
pub fn scan_plugins(order: &[String], data_dir: &Path) -> Vec<PluginEntry> {
    let mut next_full: u16 = 0;
    let mut next_light: u16 = 0;
    let mut entries = Vec::with_capacity(order.len());

    for name in order {
        let Some(kind) = PluginKind::from_name(name) else {
            warn!("[snapshot] Not a plugin file: {name}");
            continue;
        };
        let file_size = match std::fs::metadata(data_dir.join(name)) {
            Ok(meta) => meta.len(),
            Err(_) => {
                warn!("[snapshot] {name} is listed but missing from {}", data_dir.display());
                continue;
            }
        };

        let load_index = match kind {
            PluginKind::Light if next_light <= MAX_LIGHT_INDEX => {
                next_light += 1;
                LoadIndex::Light(next_light - 1)
            }
            PluginKind::Master | PluginKind::Plugin if next_full <= MAX_FULL_INDEX => {
                next_full += 1;
                LoadIndex::Full((next_full - 1) as u8)
            }
            _ => {
                warn!("[snapshot] Load order full; skipping {name}");
                continue;
            }
        };

        entries.push(PluginEntry {
            plugin_name: name.clone(),
            kind,
            load_index,
            file_size,
        });
    }
    entries
}

pub fn build_snapshot(plugins_txt: &Path, data_dir: &Path) -> Result<PluginSnapshot> {
    let order = read_load_order(plugins_txt, data_dir)?;
    let plugins = scan_plugins(&order, data_dir);
    Ok(PluginSnapshot {
        timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        total_plugins: plugins.len(),
        total_bytes: plugins.iter().map(|p| p.file_size).sum(),
        plugins,
    })
}

/// Serializes `value` as pretty JSON over `path`, creating parent directories.
pub fn write_snapshot<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(value).context("Failed to serialize snapshot")?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

pub struct SnapshotAction {
    name: String,
    plugins_txt: PathBuf,
    data_dir: PathBuf,
    output: PathBuf,
}

impl SnapshotAction {
    pub fn new(name: impl Into<String>, plugins_txt: PathBuf, data_dir: PathBuf, output: PathBuf) -> Self {
        Self {
            name: name.into(),
            plugins_txt,
            data_dir,
            output,
        }
    }
}

impl TriggerAction for SnapshotAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self) -> Result<()> {
        let snapshot = build_snapshot(&self.plugins_txt, &self.data_dir)?;
        write_snapshot(&self.output, &snapshot)?;
        info!(
            "[{}] Exported {} plugins ({} bytes) to {}",
            self.name,
            snapshot.total_plugins,
            snapshot.total_bytes,
            self.output.display()
        );
        Ok(())
    }
}
