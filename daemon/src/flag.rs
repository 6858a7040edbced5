/// A boolean switch stored in a small INI file, plus the state the poll loop
/// keeps about it.
///
/// The synchronizer only re-reads the value when the file's modification time
/// moves forward. `last_value` is therefore the value most recently *read*,
/// not necessarily what is on disk right now.
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use log::{error, info, warn};
use thiserror::Error;

use crate::action::TriggerAction;
use crate::ini::{IniDocument, IniError};

#[derive(Debug, Error)]
pub enum ConfigureError {
    #[error("flag file path has no parent directory: {0}")]
    NoParent(PathBuf),
    #[error("cannot create directory for flag file {path}: {source}")]
    Unresolvable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("flag file not found: {0}")]
    FileMissing(PathBuf),
    #[error(transparent)]
    KeyNotFound(#[from] IniError),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("verification failed: wrote {expected}, read back {actual}")]
    Verification { expected: bool, actual: bool },
}

/// Result of one poll-cycle check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    /// The file does not exist right now.
    Missing,
    /// Modification time has not moved (or could not be read).
    Unchanged,
    /// The file changed and the new value was adopted without a trigger.
    Adopted { previous: bool, current: bool },
    /// `false → true` on a flag with an action: run it, then call
    /// [`WatchedFlag::consume`].
    Triggered,
}

/// One lock per flag file, shared by every [`WatchedFlag`] that reads or
/// writes it.
#[derive(Clone, Default)]
pub struct FileLocks {
    locks: Arc<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>>,
}

impl FileLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock guarding `path`. Spellings of the same file that resolve to
    /// one parent directory share a lock.
    pub fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        let key = lock_key(path);
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        Arc::clone(locks.entry(key).or_default())
    }
}

fn lock_key(path: &Path) -> PathBuf {
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => std::fs::canonicalize(parent)
            .map(|dir| dir.join(name))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => path.to_path_buf(),
    }
}

pub struct WatchedFlag {
    file_path: PathBuf,
    section: String,
    key: String,
    last_write_time: Option<SystemTime>,
    last_value: bool,
    action: Option<Arc<dyn TriggerAction>>,
    file_lock: Arc<Mutex<()>>,
    /// Runs between the write and the verifying read.
    #[cfg(test)]
    after_write: Option<Box<dyn Fn(&Path) + Send + Sync>>,
}

impl WatchedFlag {
    /// Binds `section`/`key` in `file_path` to an optional action. A flag
    /// without an action is a plain state flag: its changes are observed but
    /// never consumed.
    ///
    /// The file itself may be missing (monitoring waits for it to appear), but
    /// its parent directory must exist or be creatable.
    pub fn configure(
        file_path: impl Into<PathBuf>,
        section: &str,
        key: &str,
        action: Option<Arc<dyn TriggerAction>>,
    ) -> Result<Self, ConfigureError> {
        let file_path = file_path.into();
        if !file_path.exists() {
            let parent = file_path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .ok_or_else(|| ConfigureError::NoParent(file_path.clone()))?;
            std::fs::create_dir_all(parent).map_err(|source| ConfigureError::Unresolvable {
                path: file_path.clone(),
                source,
            })?;
        }

        Ok(Self {
            file_path,
            section: section.to_string(),
            key: key.to_string(),
            last_write_time: None,
            last_value: false,
            action,
            file_lock: Arc::new(Mutex::new(())),
            #[cfg(test)]
            after_write: None,
        })
    }

    /// Shares the file lock with every other flag on the same file.
    pub fn with_locks(mut self, locks: &FileLocks) -> Self {
        self.file_lock = locks.lock_for(&self.file_path);
        self
    }

    #[cfg(test)]
    pub(crate) fn set_after_write(&mut self, hook: impl Fn(&Path) + Send + Sync + 'static) {
        self.after_write = Some(Box::new(hook));
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn action(&self) -> Option<&Arc<dyn TriggerAction>> {
        self.action.as_ref()
    }

    pub fn last_value(&self) -> bool {
        self.last_value
    }

    /// Short human-readable address, e.g. `[Active] active_host in host.ini`.
    pub fn describe(&self) -> String {
        let file = self
            .file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.file_path.display().to_string());
        format!("[{}] {} in {}", self.section, self.key, file)
    }

    /// Reads the value fresh from disk. Missing file, unreadable file and
    /// absent key all read as `false`.
    pub fn read_value(&self) -> bool {
        let _guard = self.file_lock.lock().unwrap_or_else(|p| p.into_inner());
        self.read_unlocked()
    }

    fn read_unlocked(&self) -> bool {
        match IniDocument::load(&self.file_path) {
            Ok(doc) => doc.get_bool(&self.section, &self.key).unwrap_or(false),
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!("Could not read {}: {e}", self.file_path.display());
                false
            }
        }
    }

    /// Rewrites the key's value in place and verifies it by re-reading.
    ///
    /// When the key is absent the file is not written at all. The file lock is
    /// held from the read through the verification.
    pub fn write_value(&self, value: bool) -> Result<(), WriteError> {
        let _guard = self.file_lock.lock().unwrap_or_else(|p| p.into_inner());
        let text = match std::fs::read_to_string(&self.file_path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(WriteError::FileMissing(self.file_path.clone()))
            }
            Err(source) => {
                return Err(WriteError::Io {
                    path: self.file_path.clone(),
                    source,
                })
            }
        };

        let mut doc = IniDocument::parse(&text);
        doc.set(&self.section, &self.key, bool_token(value))?;

        std::fs::write(&self.file_path, doc.to_string()).map_err(|source| WriteError::Io {
            path: self.file_path.clone(),
            source,
        })?;

        #[cfg(test)]
        if let Some(hook) = &self.after_write {
            hook(&self.file_path);
        }

        let actual = self.read_unlocked();
        if actual != value {
            return Err(WriteError::Verification {
                expected: value,
                actual,
            });
        }
        Ok(())
    }

    /// Records the current modification time and value without acting on
    /// them, so a stale `true` from a previous session is not replayed.
    pub fn take_baseline(&mut self) {
        self.last_write_time = modified(&self.file_path);
        self.last_value = self.read_value();
    }

    /// One poll-cycle check. Updates the observed state and reports what the
    /// caller has to do.
    pub fn detect(&mut self) -> Detection {
        if !self.file_path.exists() {
            return Detection::Missing;
        }
        let Some(current_time) = modified(&self.file_path) else {
            return Detection::Unchanged;
        };
        if self.last_write_time.is_some_and(|last| current_time <= last) {
            return Detection::Unchanged;
        }
        self.last_write_time = Some(current_time);

        let previous = self.last_value;
        let current = self.read_value();
        if previous != current {
            info!("{} changed from {previous} to {current}", self.describe());
        }

        if !previous && current && self.action.is_some() {
            Detection::Triggered
        } else {
            self.last_value = current;
            Detection::Adopted { previous, current }
        }
    }

    /// Writes the reset value after a trigger. The in-memory value becomes the
    /// reset value even when the write fails.
    pub fn consume(&mut self) -> Result<(), WriteError> {
        let reset = self.action.as_ref().is_some_and(|a| a.reset_value());
        let result = self.write_value(reset);
        self.last_value = reset;

        match &result {
            Ok(()) => info!("{} reset to {reset} (verified)", self.describe()),
            Err(e) => error!("Failed to reset {}: {e}", self.describe()),
        }
        result
    }
}

impl fmt::Debug for WatchedFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchedFlag")
            .field("file_path", &self.file_path)
            .field("section", &self.section)
            .field("key", &self.key)
            .field("last_write_time", &self.last_write_time)
            .field("last_value", &self.last_value)
            .field("action", &self.action.as_ref().map(|a| a.name().to_string()))
            .finish()
    }
}

fn bool_token(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
