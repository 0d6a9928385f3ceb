//! Compensating cleanup for failed deployments

use std::sync::Arc;

use crate::models::Guest;
use crate::proxmox::{CommandOutput, Hypervisor};
use crate::Result;

/// Stops and destroys a guest left behind by a failed pipeline.
///
/// Both steps are best effort. Their failures are logged and swallowed so the
/// caller always gets back the original pipeline error.
#[derive(Clone)]
pub struct RollbackController {
    hypervisor: Arc<dyn Hypervisor>,
}

impl RollbackController {
    pub fn new(hypervisor: Arc<dyn Hypervisor>) -> Self {
        Self { hypervisor }
    }

    pub async fn rollback(&self, guest: Guest) {
        tracing::warn!(guest = %guest, "Rolling back");

        let stop = self.hypervisor.stop(guest).await;
        log_step(guest, "stop", stop);

        let destroy = self.hypervisor.destroy(guest).await;
        log_step(guest, "destroy", destroy);
    }
}

fn log_step(guest: Guest, step: &str, result: Result<CommandOutput>) {
    match result {
        Ok(out) if out.success() => tracing::debug!(guest = %guest, step, "Rollback step done"),
        Ok(out) => tracing::warn!(
            guest = %guest,
            step,
            exit = %out.describe_exit(),
            output = %out.combined(),
            "Rollback step failed, ignoring"
        ),
        Err(e) => tracing::warn!(guest = %guest, step, error = %e, "Rollback step failed, ignoring"),
    }
}
