/// File logger behind the `log` facade.
///
/// Every record is appended to each configured file (the install-root copy
/// and the app-data mirror) and echoed to stderr:
///
///   [2024-03-09 07:05:01.123] [log] [info] [flag.rs:212] message
///
/// One mutex serializes "open, append line, close" across all tasks.
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use log::{Level, LevelFilter, Log, Metadata, Record};

pub fn format_line(now: DateTime<Local>, level: Level, file: &str, line: u32, message: &str) -> String {
    let file = Path::new(file)
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_else(|| file.into());
    format!(
        "[{}] [log] [{}] [{file}:{line}] {message}",
        now.format("%Y-%m-%d %H:%M:%S%.3f"),
        level.as_str().to_lowercase()
    )
}

pub struct BridgeLogger {
    files: Vec<PathBuf>,
    level: LevelFilter,
    echo: bool,
    lock: Mutex<()>,
}

impl BridgeLogger {
    pub fn new(files: Vec<PathBuf>, level: LevelFilter) -> Self {
        Self {
            files,
            level,
            echo: true,
            lock: Mutex::new(()),
        }
    }

    fn append(path: &Path, line: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{line}")
    }
}

impl Log for BridgeLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_line(
            Local::now(),
            record.level(),
            record.file().unwrap_or("?"),
            record.line().unwrap_or(0),
            &record.args().to_string(),
        );

        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        for path in &self.files {
            if let Err(e) = Self::append(path, &line) {
                eprintln!("[logging] Failed to write {}: {e}", path.display());
            }
        }
        if self.echo {
            eprintln!("{line}");
        }
    }

    fn flush(&self) {}
}

/// Installs the process-wide logger. Parent directories of `files` are
/// created; a directory that cannot be created drops that copy.
pub fn init(files: Vec<PathBuf>, level: LevelFilter) -> Result<()> {
    let files = files
        .into_iter()
        .filter(|path| match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => match std::fs::create_dir_all(parent) {
                Ok(()) => true,
                Err(e) => {
                    eprintln!("[logging] Cannot create {}: {e}", parent.display());
                    false
                }
            },
            _ => true,
        })
        .collect();

    log::set_boxed_logger(Box::new(BridgeLogger::new(files, level)))
        .context("A logger is already installed")?;
    log::set_max_level(level);
    Ok(())
}
