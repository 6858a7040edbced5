/// Verified file copy used by the JSON master/record flags.
///
/// The destination directory tree is created when missing, and the copy is
/// checked by comparing source and destination sizes afterwards.
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use log::info;

use crate::action::TriggerAction;

/// Copies `from` over `to` and returns the number of bytes copied.
pub fn copy_verified(from: &Path, to: &Path) -> Result<u64> {
    if !from.is_file() {
        bail!("Source file not found: {}", from.display());
    }

    if let Some(parent) = to.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
            info!("Created destination directory: {}", parent.display());
        }
    }

    std::fs::copy(from, to)
        .with_context(|| format!("Failed to copy {} to {}", from.display(), to.display()))?;

    let source_size = std::fs::metadata(from)
        .with_context(|| format!("Failed to stat {}", from.display()))?
        .len();
    let dest_size = std::fs::metadata(to)
        .with_context(|| format!("Destination missing after copy: {}", to.display()))?
        .len();

    if source_size != dest_size {
        bail!(
            "Size mismatch after copy: source {source_size} bytes, destination {dest_size} bytes"
        );
    }
    Ok(dest_size)
}

pub struct CopyFileAction {
    name: String,
    from: PathBuf,
    to: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl CopyFileAction {
    pub fn new(name: impl Into<String>, from: PathBuf, to: PathBuf, lock: Arc<Mutex<()>>) -> Self {
        Self {
            name: name.into(),
            from,
            to,
            lock,
        }
    }
}

impl TriggerAction for CopyFileAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let bytes = copy_verified(&self.from, &self.to)?;
        info!(
            "[{}] Copied {} -> {} ({bytes} bytes, verified)",
            self.name,
            self.from.display(),
            self.to.display()
        );
        Ok(())
    }
}
