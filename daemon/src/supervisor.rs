use anyhow::{bail, Result};
use log::{error, info};
use tokio_util::sync::CancellationToken;

use crate::synchronizer::FlagSynchronizer;

/// Owns every flag synchronizer and the shutdown token they derive from.
pub struct Supervisor {
    synchronizers: Vec<FlagSynchronizer>,
    shutdown: CancellationToken,
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            synchronizers: Vec::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Registers a synchronizer. Names must be unique.
    pub fn add(&mut self, synchronizer: FlagSynchronizer) -> Result<()> {
        if self.find(synchronizer.name()).is_some() {
            bail!("a flag named `{}` is already supervised", synchronizer.name());
        }
        self.synchronizers.push(synchronizer);
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        self.synchronizers.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.find(name)
            .map(|i| self.synchronizers[i].is_running())
            .unwrap_or(false)
    }

    /// Other background tasks stop when this token is cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Starts every synchronizer that is not already running. Returns how many
    /// were started.
    pub fn start_all(&mut self) -> usize {
        self.names()
            .iter()
            .filter(|name| matches!(self.start(name), Ok(true)))
            .count()
    }

    /// Starts one synchronizer. `Ok(false)` when it was already running.
    pub fn start(&mut self, name: &str) -> Result<bool> {
        let Some(index) = self.find(name) else {
            bail!("no flag named `{name}`");
        };
        Ok(self.synchronizers[index].start(&self.shutdown))
    }

    /// Stops one synchronizer and waits for its task to exit. Others are untouched.
    pub async fn stop(&mut self, name: &str) -> Result<()> {
        let Some(index) = self.find(name) else {
            bail!("no flag named `{name}`");
        };
        self.synchronizers[index].stop().await;
        Ok(())
    }

    /// Cancels the shared token and joins every synchronizer in registration order.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        for name in self.names() {
            if let Err(e) = self.stop(&name).await {
                error!("[supervisor] {e:#}");
            }
        }
        info!("[supervisor] All {} flag monitors stopped", self.synchronizers.len());
    }

    fn find(&self, name: &str) -> Option<usize> {
        self.synchronizers.iter().position(|s| s.name() == name)
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}
