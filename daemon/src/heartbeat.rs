use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};
use log::{error, info};
use sysinfo::{ProcessesToUpdate, System};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::event::BridgeEvent;

/// Lines kept in the heartbeat file.
pub const HEARTBEAT_CAPACITY: usize = 20;

pub fn heartbeat_line(now: DateTime<Local>) -> String {
    format!("[{}] [log] [info] the game is on", now.format("%Y-%m-%d %H:%M:%S"))
}

/// Fixed-size log whose file is rewritten in full on every push.
///
/// Holds at most [`HEARTBEAT_CAPACITY`] lines; the oldest is evicted to make
/// room for the newest.
pub struct HeartbeatLog {
    path: PathBuf,
    lines: VecDeque<String>,
    capacity: usize,
}

impl HeartbeatLog {
    pub fn new(path: PathBuf) -> Self {
        Self::with_capacity(path, HEARTBEAT_CAPACITY)
    }

    pub fn with_capacity(path: PathBuf, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            path,
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    /// Appends `line`, evicting the oldest when full, and rewrites the file.
    pub fn push(&mut self, line: String) -> std::io::Result<()> {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
        self.flush()
    }

    fn flush(&self) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let body: String = self.lines().map(|line| format!("{line}\n")).collect();
        std::fs::write(&self.path, body)
    }
}

/// Whether any process named `process_name` (case-insensitive) is running.
pub fn is_running(sys: &System, process_name: &str) -> bool {
    let target = process_name.to_lowercase();
    sys.processes()
        .values()
        .any(|p| p.name().to_string_lossy().to_lowercase() == target)
}

/// Polls the OS process list every `period` and, while the game is running,
/// appends a heartbeat line. Emits [`BridgeEvent::GameStarted`] /
/// [`BridgeEvent::GameStopped`] on transitions. Ends when `cancel` fires.
pub async fn run(
    process_name: String,
    mut ring: HeartbeatLog,
    period: Duration,
    tx: mpsc::Sender<BridgeEvent>,
    cancel: CancellationToken,
) {
    let mut sys = System::new();
    let mut game_running = false;
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        "[heartbeat] Watching for {process_name}; writing {}",
        ring.path().display()
    );

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        sys.refresh_processes(ProcessesToUpdate::All, false);
        let found = is_running(&sys, &process_name);

        if found {
            if let Err(e) = ring.push(heartbeat_line(Local::now())) {
                error!("[heartbeat] Failed to write {}: {e}", ring.path().display());
            }
        }

        let event = match (game_running, found) {
            (false, true) => BridgeEvent::GameStarted,
            (true, false) => BridgeEvent::GameStopped,
            _ => continue,
        };
        game_running = found;
        info!("[heartbeat] {process_name} {}", if found { "started" } else { "exited" });
        if tx.send(event).await.is_err() {
            break;
        }
    }
}
