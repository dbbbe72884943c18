//! Configuration change feed

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::core::AdmissionGate;
use crate::domain::FlowControlConfig;

/// Applies every configuration published on a watch channel
pub struct ConfigFeed {
    gate: Arc<AdmissionGate>,
    rx: watch::Receiver<FlowControlConfig>,
}

impl ConfigFeed {
    pub fn new(gate: Arc<AdmissionGate>, rx: watch::Receiver<FlowControlConfig>) -> Self {
        Self { gate, rx }
    }

    /// Apply the current value, then each change, until the sender is
    /// dropped or `cancel` fires
    pub async fn run(mut self, cancel: CancellationToken) {
        debug!("ConfigFeed::run: called");
        self.apply_current();
        loop {
            tokio::select! {
                changed = self.rx.changed() => {
                    if changed.is_err() {
                        debug!("ConfigFeed::run: sender dropped");
                        break;
                    }
                    self.apply_current();
                }
                _ = cancel.cancelled() => {
                    debug!("ConfigFeed::run: cancelled");
                    break;
                }
            }
        }
        info!("Configuration feed stopped");
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    fn apply_current(&mut self) {
        let config = self.rx.borrow_and_update().clone();
        match self.gate.apply(&config) {
            Ok(report) => debug!(version = report.version, clean = report.is_clean(), "ConfigFeed::apply_current: applied"),
            // Already reported on the event bus; keep serving the previous snapshot
            Err(e) => error!(error = %e, "Configuration rejected"),
        }
    }
}
