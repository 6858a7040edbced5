/// Background poll loop for one [`WatchedFlag`].
///
/// Each synchronizer owns its flag while stopped and lends it to a tokio task
/// while running; `stop` joins the task and takes the flag back, so observed
/// state survives a stop/start cycle.
use std::time::Duration;

use chrono::Local;
use log::{error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::event::{BridgeEvent, TriggerReport};
use crate::flag::{Detection, WatchedFlag};

pub struct FlagSynchronizer {
    name: String,
    interval: Duration,
    flag: Option<WatchedFlag>,
    baselined: bool,
    handle: Option<JoinHandle<WatchedFlag>>,
    cancel_token: Option<CancellationToken>,
    events: Option<mpsc::Sender<BridgeEvent>>,
}

impl FlagSynchronizer {
    pub fn new(name: impl Into<String>, flag: WatchedFlag, interval: Duration) -> Self {
        Self {
            name: name.into(),
            interval,
            flag: Some(flag),
            baselined: false,
            handle: None,
            cancel_token: None,
            events: None,
        }
    }

    /// Trigger reports are sent here. Full or closed channels drop the report.
    pub fn with_events(mut self, events: mpsc::Sender<BridgeEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// The flag, while the synchronizer is stopped.
    #[cfg(test)]
    pub fn flag(&self) -> Option<&WatchedFlag> {
        self.flag.as_ref()
    }

    /// Spawns the poll loop as a child of `shutdown`. Returns `false` without
    /// doing anything if the loop is already running.
    pub fn start(&mut self, shutdown: &CancellationToken) -> bool {
        if self.handle.is_some() {
            return false;
        }
        let Some(mut flag) = self.flag.take() else {
            error!("[{}] Flag state was lost; cannot start", self.name);
            return false;
        };

        if !self.baselined {
            flag.take_baseline();
            self.baselined = true;
        }

        let cancel_token = shutdown.child_token();
        info!(
            "[{}] Monitoring {} every {}s",
            self.name,
            flag.describe(),
            self.interval.as_secs_f32()
        );
        let handle = tokio::spawn(poll_loop(
            self.name.clone(),
            flag,
            self.interval,
            cancel_token.clone(),
            self.events.clone(),
        ));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        true
    }

    /// Cancels the loop and waits for it to exit. A cycle in progress
    /// finishes first; nothing touches the flag file after this returns.
    pub async fn stop(&mut self) {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
        if let Some(handle) = self.handle.take() {
            match handle.await {
                Ok(flag) => {
                    info!("[{}] Stopped; {} last read {}", self.name, flag.describe(), flag.last_value());
                    self.flag = Some(flag);
                }
                Err(e) => error!("[{}] Poll loop failed to join: {e}", self.name),
            }
        }
    }
}

async fn poll_loop(
    name: String,
    mut flag: WatchedFlag,
    interval: Duration,
    cancel_token: CancellationToken,
    events: Option<mpsc::Sender<BridgeEvent>>,
) -> WatchedFlag {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            _ = ticker.tick() => {
                if let Some(report) = poll_cycle(&name, &mut flag).await {
                    send_report(&name, events.as_ref(), report);
                }
            }
        }
    }
    flag
}

/// One check of the flag. Runs the action on a blocking thread when the flag
/// went `false → true`, then writes the reset value whatever the outcome.
async fn poll_cycle(name: &str, flag: &mut WatchedFlag) -> Option<TriggerReport> {
    if flag.detect() != Detection::Triggered {
        return None;
    }
    let action = flag.action().cloned()?;

    let action_name = action.name().to_string();
    info!("[{name}] Triggered; running {action_name}");
    let action_error = match tokio::task::spawn_blocking(move || action.run()).await {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(format!("{e:#}")),
        Err(e) => Some(format!("action task failed: {e}")),
    };
    if let Some(e) = &action_error {
        error!("[{name}] {action_name} failed: {e}");
    }

    let reset_error = flag.consume().err().map(|e| e.to_string());

    Some(TriggerReport {
        flag: name.to_string(),
        action: action_name,
        action_error,
        reset_error,
        at: Local::now(),
    })
}

fn send_report(name: &str, events: Option<&mpsc::Sender<BridgeEvent>>, report: TriggerReport) {
    let Some(tx) = events else {
        return;
    };
    if let Err(e) = tx.try_send(BridgeEvent::FlagTriggered(report)) {
        warn!("[{name}] Trigger report dropped: {e}");
    }
}
